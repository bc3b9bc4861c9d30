//! # Job Model
//!
//! A job is the durable execution record for one (document, plugin)
//! pairing. Status follows a strict state machine; terminal states are
//! final and progress never decreases while running.
//!
//! ```text
//!            submit             dispatch              start
//!   Pending ───────▶ Queued ─────────────▶ Running ────────▶ Completed
//!                                            │
//!                                            ├─── fail ────▶ Failed
//!                                            └── cancel ───▶ Cancelled
//!   any non-terminal ──── cancel ───▶ Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::JsonMap;

/// Processing job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Queued) => true,
            (Queued, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (Pending, Cancelled) | (Queued, Cancelled) | (Running, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: Uuid,
    pub plugin_name: String,
    /// Worker-task identifier, set once the job is queued on the broker
    pub task_id: Option<Uuid>,
    pub status: JobStatus,
    /// 0..=100, monotonic nondecreasing while running
    pub progress: u8,
    pub progress_message: Option<String>,
    pub result: Option<JsonMap>,
    pub error_message: Option<String>,
    /// Document created by the plugin, if any
    pub output_document_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when status becomes terminal
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(document_id: Uuid, plugin_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            plugin_name: plugin_name.into(),
            task_id: None,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: None,
            result: None,
            error_message: None,
            output_document_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// What a successful plugin run hands back to the worker runtime.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub result: JsonMap,
    pub output_document_id: Option<Uuid>,
}

impl JobOutcome {
    pub fn with_output(output_document_id: Uuid) -> Self {
        Self {
            result: JsonMap::new(),
            output_document_id: Some(output_document_id),
        }
    }
}
