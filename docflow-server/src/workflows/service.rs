//! # Workflow Store Service
//!
//! Step CRUD with static type-compatibility validation. Append validates
//! the whole resulting flow before persisting; reorder applies the new
//! sequence numbers to a working copy, revalidates, and only persists when
//! the result is consistent; an invalid reorder leaves the store
//! untouched.

use std::sync::Arc;

use uuid::Uuid;

use docflow_sdk::events::JsonMap;
use docflow_sdk::plugin::PluginMetadata;
use docflow_sdk::storage::{Stores, WorkflowStore as _};
use docflow_sdk::workflow::{StepReorder, WorkflowScope, WorkflowStep};

use crate::error::ApiError;
use crate::plugins::registry::PluginRegistry;
use crate::workflows::validation::{expected_input_at, validate_flow};

pub struct WorkflowService {
    stores: Stores,
    registry: Arc<PluginRegistry>,
}

impl WorkflowService {
    pub fn new(stores: Stores, registry: Arc<PluginRegistry>) -> Self {
        Self { stores, registry }
    }

    /// Steps for (scope, type), ordered by sequence number.
    pub async fn workflow(
        &self,
        scope: WorkflowScope,
        document_type: &str,
    ) -> Result<Vec<WorkflowStep>, ApiError> {
        Ok(self.stores.workflows.steps(&scope, document_type).await?)
    }

    /// Append a step after validating compatibility with the full flow.
    pub async fn append_step(
        &self,
        scope: WorkflowScope,
        document_type: &str,
        plugin_name: &str,
        sequence_number: u32,
        settings: JsonMap,
    ) -> Result<WorkflowStep, ApiError> {
        if sequence_number == 0 {
            return Err(ApiError::validation("sequence_number must be positive"));
        }

        let metadata = self
            .registry
            .metadata(plugin_name)
            .ok_or_else(|| ApiError::validation(format!("plugin {plugin_name} not found")))?;
        if !self.registry.is_active(plugin_name) {
            return Err(ApiError::validation(format!(
                "plugin {plugin_name} is not active"
            )));
        }

        let existing = self.stores.workflows.steps(&scope, document_type).await?;

        if existing.iter().any(|s| {
            s.sequence_number == sequence_number && s.plugin_name == plugin_name
        }) {
            return Err(ApiError::conflict(format!(
                "step ({sequence_number}, {plugin_name}) already exists for this workflow"
            )));
        }

        // Direct check first for a precise message, then whole-flow
        // validation to catch breakage downstream of the insertion point.
        let expected = expected_input_at(&existing, document_type, sequence_number, &self.registry);
        if !metadata.accepts(&expected) {
            return Err(ApiError::validation(format!(
                "plugin {} cannot process '{}' at step {}; accepts: {}",
                plugin_name,
                expected,
                sequence_number,
                metadata.input_types.join(", ")
            )));
        }

        let step = WorkflowStep::new(
            scope,
            document_type,
            sequence_number,
            plugin_name,
            settings,
        );

        let mut candidate = existing;
        candidate.push(step.clone());
        candidate.sort_by_key(|s| s.sequence_number);
        validate_flow(&candidate, document_type, &self.registry)
            .map_err(|e| ApiError::validation(e.to_string()))?;

        self.stores.workflows.insert_step(step.clone()).await?;
        tracing::info!(
            scope = %step.scope,
            document_type,
            plugin = plugin_name,
            sequence = sequence_number,
            "workflow step added"
        );
        Ok(step)
    }

    /// Delete a step owned by (scope, type).
    pub async fn delete_step(
        &self,
        scope: WorkflowScope,
        document_type: &str,
        step_id: Uuid,
    ) -> Result<(), ApiError> {
        let step = self
            .stores
            .workflows
            .step(step_id)
            .await?
            .filter(|s| s.scope == scope && s.document_type == document_type)
            .ok_or_else(|| ApiError::not_found("workflow step not found"))?;

        self.stores.workflows.delete_step(step.id).await?;
        tracing::info!(scope = %scope, document_type, step_id = %step_id, "workflow step deleted");
        Ok(())
    }

    /// Reorder steps. Validates the resulting flow before persisting; on
    /// failure the persisted sequences are unchanged.
    pub async fn reorder(
        &self,
        scope: WorkflowScope,
        document_type: &str,
        order: &[StepReorder],
    ) -> Result<Vec<WorkflowStep>, ApiError> {
        let existing = self.stores.workflows.steps(&scope, document_type).await?;

        let mut candidate = existing.clone();
        for entry in order {
            if entry.sequence_number == 0 {
                return Err(ApiError::validation("sequence_number must be positive"));
            }
            let step = candidate
                .iter_mut()
                .find(|s| s.id == entry.id)
                .ok_or_else(|| {
                    ApiError::not_found(format!("workflow step {} not found", entry.id))
                })?;
            step.sequence_number = entry.sequence_number;
        }
        candidate.sort_by_key(|s| s.sequence_number);

        validate_flow(&candidate, document_type, &self.registry)
            .map_err(|e| ApiError::validation(format!("invalid workflow after reorder: {e}")))?;

        self.stores
            .workflows
            .set_sequences(&scope, document_type, order)
            .await?;

        tracing::info!(scope = %scope, document_type, "workflow reordered");
        self.workflow(scope, document_type).await
    }

    /// Active plugins that could be inserted at `sequence_number`, i.e.
    /// those accepting the expected input type at that position.
    pub async fn compatible_plugins(
        &self,
        scope: WorkflowScope,
        document_type: &str,
        sequence_number: Option<u32>,
    ) -> Result<Vec<PluginMetadata>, ApiError> {
        let expected = match sequence_number {
            None | Some(0) | Some(1) => document_type.to_string(),
            Some(seq) => {
                let steps = self.stores.workflows.steps(&scope, document_type).await?;
                expected_input_at(&steps, document_type, seq, &self.registry)
            }
        };

        Ok(self
            .registry
            .active()
            .into_iter()
            .map(|(metadata, _)| metadata)
            .filter(|m| m.accepts(&expected))
            .collect())
    }
}
