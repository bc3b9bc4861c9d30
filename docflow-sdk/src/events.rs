//! # Event Model
//!
//! Events are immutable facts emitted by the system: consumed by in-process
//! handlers, buffered briefly for replay, optionally persisted to the event
//! log, and streamed to subscribed clients.
//!
//! Worker processes do not share memory with the bus; they serialize an
//! [`EventEnvelope`] onto the broker's events channel and the bridge
//! re-emits it in the server process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form JSON object used for event payloads, plugin settings, job
/// results, and document properties.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Core event types. Plugins may emit additional custom type strings; an
/// [`Event`] carries its type as a plain string for that reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    DocumentCreated,
    DocumentUpdated,
    DocumentDeleted,
    JobQueued,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobCancelled,
    SourceCreated,
    SourceDeleted,
    PluginLoaded,
    PluginEnabled,
    PluginDisabled,
    PluginError,
    SystemStartup,
    SystemShutdown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DocumentCreated => "document.created",
            EventType::DocumentUpdated => "document.updated",
            EventType::DocumentDeleted => "document.deleted",
            EventType::JobQueued => "job.queued",
            EventType::JobStarted => "job.started",
            EventType::JobProgress => "job.progress",
            EventType::JobCompleted => "job.completed",
            EventType::JobFailed => "job.failed",
            EventType::JobCancelled => "job.cancelled",
            EventType::SourceCreated => "source.created",
            EventType::SourceDeleted => "source.deleted",
            EventType::PluginLoaded => "plugin.loaded",
            EventType::PluginEnabled => "plugin.enabled",
            EventType::PluginDisabled => "plugin.disabled",
            EventType::PluginError => "plugin.error",
            EventType::SystemStartup => "system.startup",
            EventType::SystemShutdown => "system.shutdown",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity, used for timeline rendering and log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Success,
}

impl Default for EventSeverity {
    fn default() -> Self {
        EventSeverity::Info
    }
}

/// An emitted event. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Event type string, e.g. `"document.created"` or a custom type
    #[serde(rename = "type")]
    pub event_type: String,
    /// Origin: `"core:documents"`, `"plugin:audio_transcription"`,
    /// `"task:audio_transcription"`, `"api:jobs"`
    pub origin: String,
    pub payload: JsonMap,
    #[serde(default)]
    pub severity: EventSeverity,
    pub user_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Everything needed to emit an event; the bus stamps id and timestamp.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: String,
    pub origin: String,
    pub payload: JsonMap,
    pub severity: EventSeverity,
    pub user_id: Option<Uuid>,
    pub persist: bool,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, origin: impl Into<String>, payload: JsonMap) -> Self {
        Self {
            event_type: event_type.into(),
            origin: origin.into(),
            payload,
            severity: EventSeverity::Info,
            user_id: None,
            persist: true,
        }
    }

    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn no_persist(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn into_event(self) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            origin: self.origin,
            payload: self.payload,
            severity: self.severity,
            user_id: self.user_id,
            timestamp: Utc::now(),
        }
    }
}

/// Wire form of an event on the broker's events channel. Newline-free JSON;
/// unknown fields are ignored so workers and server can evolve separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub origin: String,
    #[serde(default)]
    pub payload: JsonMap,
    #[serde(default)]
    pub severity: EventSeverity,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&Event> for EventEnvelope {
    fn from(event: &Event) -> Self {
        Self {
            event_type: event.event_type.clone(),
            origin: event.origin.clone(),
            payload: event.payload.clone(),
            severity: event.severity,
            user_id: event.user_id,
            timestamp: Some(event.timestamp),
        }
    }
}

/// Emission seam handed to plugins during setup. The server's event bus
/// implements this; tests can substitute their own sink.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, draft: EventDraft) -> Event;
}

/// Build a [`JsonMap`] from `(key, value)` pairs.
///
/// ```ignore
/// let payload = payload![("document_id", doc.id.to_string()), ("size", 42)];
/// ```
#[macro_export]
macro_rules! payload {
    ($(($key:expr, $value:expr)),* $(,)?) => {{
        let mut map = $crate::events::JsonMap::new();
        $(map.insert($key.to_string(), ::serde_json::json!($value));)*
        map
    }};
}
