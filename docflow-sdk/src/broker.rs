//! # Broker Contract
//!
//! The broker is the cross-process transport: a pub/sub channel carries
//! event envelopes from worker contexts back to the server's bus, and
//! per-plugin task queues carry job envelopes to the worker pool.
//!
//! Delivery is at-least-once; plugins are expected to be idempotent.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::events::JsonMap;

/// One unit of work on a plugin queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub plugin_name: String,
    #[serde(default)]
    pub settings: JsonMap,
}

/// Message broker abstraction. Implementations: redis (pub/sub + lists)
/// for deployments, in-memory channels for tests and single-process runs.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Publish a frame on a fan-out channel.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Subscribe to a fan-out channel.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError>;

    /// Push a task onto a named queue.
    async fn push_task(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), BrokerError>;

    /// Pop a task from a named queue, waiting up to `timeout`.
    /// `Ok(None)` means the wait elapsed with nothing available.
    async fn pop_task(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<TaskEnvelope>, BrokerError>;

    /// Connectivity check used during strict startup.
    async fn check(&self) -> Result<(), BrokerError>;
}

/// A live channel subscription.
#[async_trait::async_trait]
pub trait BrokerSubscription: Send {
    /// Next raw frame; `Ok(None)` when the subscription has closed.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, BrokerError>;
}
