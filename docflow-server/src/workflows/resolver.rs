//! # Workflow Resolver
//!
//! Maps a document to its effective step list: the source-scoped workflow
//! when the document has a source and that workflow is non-empty, else the
//! owner's user-scoped default, else empty.
//!
//! Resolution validates at read time so partial workflows still progress
//! as far as they can: steps referencing unknown or inactive plugins are
//! skipped with a warning, and steps whose input type does not match the
//! running expected type are dropped rather than errored.

use std::sync::Arc;

use docflow_sdk::document::Document;
use docflow_sdk::storage::{StoreResult, Stores, WorkflowStore as _};
use docflow_sdk::workflow::{ResolvedStep, WorkflowScope, WorkflowStep};

use crate::plugins::registry::PluginRegistry;

pub struct WorkflowResolver {
    stores: Stores,
    registry: Arc<PluginRegistry>,
}

impl WorkflowResolver {
    pub fn new(stores: Stores, registry: Arc<PluginRegistry>) -> Self {
        Self { stores, registry }
    }

    /// Effective step list for a document, ordered by sequence number.
    pub async fn workflow_for_document(
        &self,
        document: &Document,
    ) -> StoreResult<Vec<ResolvedStep>> {
        if let Some(source_id) = document.source_id {
            let steps = self
                .resolve(WorkflowScope::Source(source_id), &document.document_type)
                .await?;
            if !steps.is_empty() {
                tracing::debug!(
                    document_id = %document.id,
                    source_id = %source_id,
                    steps = steps.len(),
                    "using source workflow"
                );
                return Ok(steps);
            }
        }

        let steps = self
            .resolve(
                WorkflowScope::User(document.owner_id),
                &document.document_type,
            )
            .await?;
        if steps.is_empty() {
            tracing::warn!(
                document_id = %document.id,
                document_type = %document.document_type,
                owner_id = %document.owner_id,
                "no workflow configured for document"
            );
        } else {
            tracing::debug!(
                document_id = %document.id,
                steps = steps.len(),
                "using user default workflow"
            );
        }
        Ok(steps)
    }

    async fn resolve(
        &self,
        scope: WorkflowScope,
        document_type: &str,
    ) -> StoreResult<Vec<ResolvedStep>> {
        let steps: Vec<WorkflowStep> = self
            .stores
            .workflows
            .steps(&scope, document_type)
            .await?
            .into_iter()
            .filter(|s| s.is_enabled)
            .collect();

        if steps.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::new();
        let mut expected = document_type.to_string();
        let mut index = 0;

        while index < steps.len() {
            let sequence = steps[index].sequence_number;
            let mut accepted_outputs: Vec<Option<String>> = Vec::new();

            while index < steps.len() && steps[index].sequence_number == sequence {
                let step = &steps[index];
                index += 1;

                let Some(metadata) = self.registry.metadata(&step.plugin_name) else {
                    tracing::warn!(
                        plugin = %step.plugin_name,
                        sequence = step.sequence_number,
                        "unknown plugin in workflow, skipping step"
                    );
                    continue;
                };

                if !self.registry.is_active(&step.plugin_name) {
                    tracing::warn!(
                        plugin = %step.plugin_name,
                        sequence = step.sequence_number,
                        "plugin not active, skipping step"
                    );
                    continue;
                }

                if !metadata.accepts(&expected) {
                    tracing::warn!(
                        plugin = %step.plugin_name,
                        sequence = step.sequence_number,
                        expected = %expected,
                        accepts = ?metadata.input_types,
                        "type-incompatible step, dropping"
                    );
                    continue;
                }

                resolved.push(ResolvedStep {
                    sequence_number: step.sequence_number,
                    plugin_name: step.plugin_name.clone(),
                    settings: step.settings.clone(),
                });
                accepted_outputs.push(metadata.output_type);
            }

            // A single accepted step with a declared output advances the
            // flow type; parallel siblings keep the previous type and do
            // not chain.
            if accepted_outputs.len() == 1 {
                if let Some(output) = accepted_outputs.into_iter().next().flatten() {
                    expected = output;
                }
            }
        }

        Ok(resolved)
    }
}
