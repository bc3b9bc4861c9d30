//! # Workflow Model
//!
//! A workflow is an ordered list of steps keyed by (scope, document type),
//! where the scope is either a source or a user (the user list acts as the
//! default when no source workflow exists). Steps sharing a sequence number
//! are parallel siblings and run concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::JsonMap;

/// Scope key of a workflow: per-source or per-user default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum WorkflowScope {
    Source(Uuid),
    User(Uuid),
}

impl std::fmt::Display for WorkflowScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowScope::Source(id) => write!(f, "source:{id}"),
            WorkflowScope::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// One persisted workflow entry. The unique key is
/// (scope, document_type, sequence_number, plugin_name), which permits
/// parallel siblings at the same sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub scope: WorkflowScope,
    pub document_type: String,
    /// Positive; equal numbers within a scope+type are parallel siblings
    pub sequence_number: u32,
    pub plugin_name: String,
    pub is_enabled: bool,
    #[serde(default)]
    pub settings: JsonMap,
    pub created_at: DateTime<Utc>,
}

impl WorkflowStep {
    pub fn new(
        scope: WorkflowScope,
        document_type: impl Into<String>,
        sequence_number: u32,
        plugin_name: impl Into<String>,
        settings: JsonMap,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            document_type: document_type.into(),
            sequence_number,
            plugin_name: plugin_name.into(),
            is_enabled: true,
            settings,
            created_at: Utc::now(),
        }
    }
}

/// A step as returned by the resolver: validated, enabled, and referring to
/// an active plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStep {
    pub sequence_number: u32,
    pub plugin_name: String,
    pub settings: JsonMap,
}

/// One entry of a reorder request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReorder {
    pub id: Uuid,
    pub sequence_number: u32,
}
