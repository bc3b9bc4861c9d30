//! # Worker and Handler Contexts
//!
//! [`JobContext`] is handed to a plugin's `process` call: progress
//! reporting, cancellation polling, event emission, and child-document
//! creation. Because worker tasks do not share memory with the server's
//! event bus, all events here go out through the broker's events channel
//! and re-enter the bus via the bridge; the context persists its own events
//! to the event log first (bridged frames are not re-persisted).
//!
//! [`HandlerContext`] is the slimmer seam available to event handlers in
//! the server process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::Broker;
use crate::document::{Document, StorageDescriptor};
use crate::error::{PluginError, StoreError, SubmitError};
use crate::events::{
    EventDraft, EventEnvelope, EventSeverity, EventSink, EventType, JsonMap,
};
use crate::job::JobStatus;
use crate::payload;
use crate::storage::{
    DocumentStore as _, DocumentTypeStore as _, EventLog as _, JobStore as _, Stores,
};

/// A request to run a plugin against a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub plugin_name: String,
    pub document_id: Uuid,
    #[serde(default)]
    pub settings: JsonMap,
}

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A job record was created and queued
    Scheduled { job_id: Uuid },
    /// A child document of the expected output type already exists and the
    /// plugin does not regenerate
    AlreadyDone { existing_document_id: Uuid },
    /// Submission refused (e.g. shutdown in progress)
    Refused { reason: String },
}

/// Submission seam; the scheduler implements this.
#[async_trait::async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, request: JobRequest) -> Result<SubmitOutcome, SubmitError>;
}

/// Context available to plugin event handlers in the server process.
#[derive(Clone)]
pub struct HandlerContext {
    pub jobs: Arc<dyn JobSubmitter>,
    pub stores: Stores,
    pub events: Arc<dyn EventSink>,
}

/// Context for one running job on the worker pool.
pub struct JobContext {
    job_id: Uuid,
    document_id: Uuid,
    plugin_name: String,
    settings: JsonMap,
    stores: Stores,
    broker: Arc<dyn Broker>,
    events_channel: String,
    last_progress: AtomicU8,
}

impl JobContext {
    pub fn new(
        job_id: Uuid,
        document_id: Uuid,
        plugin_name: impl Into<String>,
        settings: JsonMap,
        stores: Stores,
        broker: Arc<dyn Broker>,
        events_channel: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            document_id,
            plugin_name: plugin_name.into(),
            settings,
            stores,
            broker,
            events_channel: events_channel.into(),
            last_progress: AtomicU8::new(0),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    /// Per-step settings merged from the workflow step and plugin config.
    pub fn settings(&self) -> &JsonMap {
        &self.settings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Report progress. Values are clamped to 0..=100 and must not
    /// decrease; a lower value than previously reported is ignored.
    pub async fn update_progress(&self, percent: u8, message: &str) -> Result<(), PluginError> {
        let percent = percent.min(100);
        let previous = self.last_progress.load(Ordering::Relaxed);
        if percent < previous {
            tracing::debug!(
                job_id = %self.job_id,
                percent,
                previous,
                "ignoring non-monotonic progress update"
            );
            return Ok(());
        }
        self.last_progress.store(percent, Ordering::Relaxed);

        if let Err(e) = self
            .stores
            .jobs
            .set_progress(self.job_id, percent, message)
            .await
        {
            // A progress write racing a cancel shows up as an invalid
            // transition; surface it as cancellation so the plugin
            // unwinds cleanly.
            if matches!(e, StoreError::InvalidTransition { .. }) {
                self.check_cancellation().await?;
            }
            return Err(e.into());
        }

        self.emit(
            EventType::JobProgress.as_str(),
            payload![
                ("job_id", self.job_id.to_string()),
                ("document_id", self.document_id.to_string()),
                ("plugin_name", self.plugin_name.clone()),
                ("progress", percent),
                ("message", message),
            ],
            EventSeverity::Info,
        )
        .await
    }

    /// Raise [`PluginError::Cancelled`] if the job has been cancelled.
    /// Long operations should call this between units of work.
    pub async fn check_cancellation(&self) -> Result<(), PluginError> {
        let job = self.stores.jobs.job(self.job_id).await?;
        match job {
            Some(job) if job.status == JobStatus::Cancelled => Err(PluginError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Emit an event from worker context: persisted to the event log here,
    /// then published on the broker's events channel for the bridge to
    /// fan out in the server process.
    pub async fn emit(
        &self,
        event_type: &str,
        payload: JsonMap,
        severity: EventSeverity,
    ) -> Result<(), PluginError> {
        let event = EventDraft::new(event_type, format!("task:{}", self.plugin_name), payload)
            .severity(severity)
            .into_event();

        if let Err(e) = self.stores.events.append_event(&event).await {
            tracing::error!(event_type, error = %e, "failed to persist worker event");
        }

        let frame = serde_json::to_vec(&EventEnvelope::from(&event))?;
        self.broker.publish(&self.events_channel, &frame).await?;
        Ok(())
    }

    /// Create a child document of the job's input document. The child
    /// re-enters the pipeline through its own `document.created` event.
    pub async fn create_child_document(
        &self,
        document_type: &str,
        storage: StorageDescriptor,
        properties: JsonMap,
    ) -> Result<Document, PluginError> {
        let parent = self
            .stores
            .documents
            .document(self.document_id)
            .await?
            .ok_or_else(|| PluginError::InvalidInput {
                message: format!("parent document {} not found", self.document_id),
            })?;

        if self
            .stores
            .document_types
            .document_type(document_type)
            .await?
            .is_none()
        {
            return Err(PluginError::InvalidInput {
                message: format!("unknown document type: {document_type}"),
            });
        }

        // Children inherit the parent's source so source-scoped workflows
        // keep routing documents produced further down the pipeline.
        let document = Document {
            id: Uuid::new_v4(),
            document_type: document_type.to_string(),
            owner_id: parent.owner_id,
            source_id: parent.source_id,
            parent_id: Some(parent.id),
            storage,
            properties,
            created_at: chrono::Utc::now(),
        };
        self.stores.documents.insert_document(document.clone()).await?;

        self.emit(
            EventType::DocumentCreated.as_str(),
            payload![
                ("document_id", document.id.to_string()),
                ("document_type", document.document_type.clone()),
                ("owner_id", document.owner_id.to_string()),
                ("parent_id", parent.id.to_string()),
                ("source_id", document.source_id.map(|id| id.to_string())),
            ],
            EventSeverity::Info,
        )
        .await?;

        Ok(document)
    }
}
