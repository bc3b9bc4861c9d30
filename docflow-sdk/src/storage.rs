//! # Storage Traits
//!
//! Async store interfaces the orchestrator composes at startup. Persistence
//! is external to the core: the server ships an in-memory reference
//! implementation, and relational or other backends adapt to these traits
//! without touching orchestration logic.
//!
//! The job store is authoritative for job state and enforces the state
//! machine at its boundary: invalid transitions return
//! [`StoreError::InvalidTransition`] and progress never decreases while a
//! job is running.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::document::{Document, DocumentType, Source, StorageDescriptor};
use crate::error::StoreError;
use crate::events::{Event, JsonMap};
use crate::job::Job;
use crate::workflow::{StepReorder, WorkflowScope, WorkflowStep};

pub type StoreResult<T> = Result<T, StoreError>;

/// Document graph persistence.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, document: Document) -> StoreResult<()>;

    async fn document(&self, id: Uuid) -> StoreResult<Option<Document>>;

    /// Direct children of `parent_id`, oldest first.
    async fn children(&self, parent_id: Uuid) -> StoreResult<Vec<Document>>;

    /// First child of `parent_id` with the given document type, if any.
    /// Backs the at-most-one-per-fingerprint check.
    async fn child_of_type(
        &self,
        parent_id: Uuid,
        document_type: &str,
    ) -> StoreResult<Option<Document>>;

    /// Remove a single document row. Cascading is the caller's job.
    async fn delete_document(&self, id: Uuid) -> StoreResult<bool>;
}

/// Durable job records with state-machine enforcement.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> StoreResult<()>;

    async fn job(&self, id: Uuid) -> StoreResult<Option<Job>>;

    /// Pending -> Queued, recording the worker-task id.
    async fn set_queued(&self, id: Uuid, task_id: Uuid) -> StoreResult<Job>;

    /// Queued -> Running, stamping `started_at`.
    async fn set_running(&self, id: Uuid) -> StoreResult<Job>;

    /// Update progress while running. Values are clamped to 0..=100 and
    /// never decrease.
    async fn set_progress(&self, id: Uuid, progress: u8, message: &str) -> StoreResult<Job>;

    /// Running -> Completed with progress 100 and `completed_at`.
    async fn set_completed(
        &self,
        id: Uuid,
        result: JsonMap,
        output_document_id: Option<Uuid>,
    ) -> StoreResult<Job>;

    /// Running -> Failed with the error message captured.
    async fn set_failed(&self, id: Uuid, error_message: &str) -> StoreResult<Job>;

    /// Any non-terminal -> Cancelled.
    async fn set_cancelled(&self, id: Uuid, reason: &str) -> StoreResult<Job>;

    /// Jobs currently queued or running.
    async fn active_jobs(&self) -> StoreResult<Vec<Job>>;

    async fn active_count(&self) -> StoreResult<usize>;

    async fn jobs_for_document(&self, document_id: Uuid) -> StoreResult<Vec<Job>>;
}

/// Workflow step persistence.
#[async_trait::async_trait]
pub trait WorkflowStore: Send + Sync {
    /// All steps for (scope, document type), ordered by sequence number.
    /// Includes disabled steps; filtering is the resolver's concern.
    async fn steps(&self, scope: &WorkflowScope, document_type: &str)
        -> StoreResult<Vec<WorkflowStep>>;

    /// Insert a step. Fails with [`StoreError::Conflict`] when the
    /// (scope, type, sequence, plugin) key already exists.
    async fn insert_step(&self, step: WorkflowStep) -> StoreResult<()>;

    async fn step(&self, id: Uuid) -> StoreResult<Option<WorkflowStep>>;

    async fn delete_step(&self, id: Uuid) -> StoreResult<bool>;

    /// Apply new sequence numbers atomically. All ids must belong to the
    /// given scope and type.
    async fn set_sequences(
        &self,
        scope: &WorkflowScope,
        document_type: &str,
        order: &[StepReorder],
    ) -> StoreResult<()>;
}

/// Append-only persisted event log.
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    async fn append_event(&self, event: &Event) -> StoreResult<()>;

    async fn event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    async fn count(&self) -> StoreResult<usize>;
}

/// Per-plugin persisted configuration: settings map and enabled flag.
#[async_trait::async_trait]
pub trait PluginConfigStore: Send + Sync {
    async fn plugin_settings(&self) -> StoreResult<HashMap<String, JsonMap>>;

    async fn set_plugin_settings(&self, plugin_name: &str, settings: JsonMap) -> StoreResult<()>;

    async fn set_plugin_enabled(&self, plugin_name: &str, enabled: bool) -> StoreResult<()>;

    /// Defaults to true for plugins with no persisted row.
    async fn plugin_enabled(&self, plugin_name: &str) -> StoreResult<bool>;
}

/// Registered document types.
#[async_trait::async_trait]
pub trait DocumentTypeStore: Send + Sync {
    /// Insert or refresh a type by name.
    async fn upsert_document_type(&self, document_type: DocumentType) -> StoreResult<()>;

    async fn document_type(&self, name: &str) -> StoreResult<Option<DocumentType>>;

    async fn document_types(&self) -> StoreResult<Vec<DocumentType>>;
}

/// External source records.
#[async_trait::async_trait]
pub trait SourceStore: Send + Sync {
    async fn insert_source(&self, source: Source) -> StoreResult<()>;

    async fn source(&self, id: Uuid) -> StoreResult<Option<Source>>;

    async fn source_by_name(&self, owner_id: Uuid, name: &str) -> StoreResult<Option<Source>>;
}

/// Raw object storage for document bytes.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes and return the descriptor (path, size, checksum).
    async fn put(
        &self,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> StoreResult<StorageDescriptor>;
}

/// The bundle of store handles threaded through the orchestrator. Built
/// once at startup; tests construct fresh copies trivially.
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentStore>,
    pub jobs: Arc<dyn JobStore>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub events: Arc<dyn EventLog>,
    pub plugin_configs: Arc<dyn PluginConfigStore>,
    pub document_types: Arc<dyn DocumentTypeStore>,
    pub sources: Arc<dyn SourceStore>,
}
