//! # Docflow SDK
//!
//! Contracts shared between the Docflow orchestrator and its processing
//! plugins. This crate deliberately contains no I/O implementations; it
//! defines the shapes both sides program against:
//!
//! - **Plugin contract**: the [`plugin::Plugin`] trait, its metadata and
//!   capability records, and the compile-time [`plugin::PluginSet`]
//!   registration table.
//! - **Data model**: documents, document types, sources, workflow steps,
//!   jobs, and events.
//! - **Storage traits**: async store interfaces the orchestrator composes
//!   at startup; concrete backends live outside the core.
//! - **Broker trait**: pub/sub plus per-plugin task queues, the transport
//!   between the server process and the worker pool.
//! - **Worker context**: [`context::JobContext`] with progress reporting,
//!   cancellation polling, and event emission helpers.
//!
//! ## Plugin lifecycle
//!
//! Plugins are registered at compile time, discovered and dependency-ordered
//! by the loader, initialized with their persisted settings, and then driven
//! entirely by events: a `document.created` event that routes to a plugin
//! (per the owner's workflow configuration) results in a job on that
//! plugin's queue, executed by the worker runtime through
//! [`plugin::Plugin::process`].
//!
//! ## Error taxonomy
//!
//! [`error::PluginError`] distinguishes validation, cancellation, transient
//! external failures (retried by the worker runtime), and programmer errors
//! (turned into job failures). Store and broker layers carry their own
//! error enums.

pub mod broker;
pub mod common;
pub mod context;
pub mod document;
pub mod error;
pub mod events;
pub mod job;
pub mod plugin;
pub mod storage;
pub mod workflow;

pub use broker::{Broker, BrokerSubscription, TaskEnvelope};
pub use context::{HandlerContext, JobContext, JobRequest, JobSubmitter, SubmitOutcome};
pub use document::{Document, DocumentType, Source, StorageDescriptor};
pub use error::{BrokerError, PluginError, StoreError, SubmitError};
pub use events::{Event, EventDraft, EventEnvelope, EventSeverity, EventSink, EventType, JsonMap};
pub use job::{Job, JobOutcome, JobStatus};
pub use plugin::{
    DocumentTypeSpec, Plugin, PluginCapabilities, PluginMetadata, PluginSet, PluginState,
};
pub use storage::Stores;
pub use workflow::{ResolvedStep, StepReorder, WorkflowScope, WorkflowStep};
