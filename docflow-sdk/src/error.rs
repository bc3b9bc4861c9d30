//! # Error Types
//!
//! Error enums for the three layers a plugin interacts with: its own
//! processing ([`PluginError`]), the persistence layer ([`StoreError`]),
//! and the message broker ([`BrokerError`]).
//!
//! The worker runtime uses [`PluginError::is_transient`] to decide whether
//! a failed attempt is retried with backoff or surfaced as a job failure.
//! Cancellation is modelled as an error variant so that it unwinds a
//! plugin's `process` call through the ordinary `?` chain.

use thiserror::Error;

/// Errors produced by plugin lifecycle hooks and document processing.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Invalid or missing plugin configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The input document is missing, malformed, or of an unexpected type
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Processing failed for a reason that will not improve on retry
    #[error("Processing failed: {message}")]
    Processing { message: String },

    /// A third-party service failed in a way that may succeed on retry
    #[error("External service error: {message}")]
    ExternalService { message: String },

    /// The job was cancelled while the plugin was running
    #[error("Job cancelled")]
    Cancelled,

    /// Persistence-layer failure observed from plugin context
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Broker failure observed from plugin context
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// JSON serialization and deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    /// Whether the worker runtime should retry the attempt with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PluginError::ExternalService { .. } | PluginError::Broker(_)
        )
    }
}

/// Errors from the storage traits in [`crate::storage`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity not found
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness violation (duplicate workflow step, duplicate type name)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Job state machine violation; terminal states are final
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Backend-level failure (connection, I/O, serialization)
    #[error("Storage backend error: {message}")]
    Backend { message: String },
}

/// Errors from the [`crate::broker::Broker`] trait.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Broker unreachable or connection lost
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    /// A frame could not be encoded or decoded
    #[error("Broker frame error: {0}")]
    Frame(#[from] serde_json::Error),

    /// Subscription closed by the broker
    #[error("Broker subscription closed")]
    Closed,
}

/// Errors returned by job submission through [`crate::context::JobSubmitter`].
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The named plugin is not registered or not active
    #[error("Unknown plugin: {name}")]
    UnknownPlugin { name: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
