//! # Worker Runtime
//!
//! Executes one task envelope: marks the job running, emits `job.started`,
//! drives the plugin's `process` with a [`JobContext`], and settles the
//! job as completed, failed, or cancelled.
//!
//! Transient-external failures are retried with linear backoff before the
//! job fails; any other plugin error fails the job immediately with the
//! error message captured. All lifecycle events go out through the broker
//! so behavior is identical when the pool runs out of process.

use std::sync::Arc;
use std::time::Duration;

use docflow_sdk::broker::{Broker, TaskEnvelope};
use docflow_sdk::context::JobContext;
use docflow_sdk::error::{PluginError, StoreError};
use docflow_sdk::events::{EventSeverity, EventType};
use docflow_sdk::payload;
use docflow_sdk::plugin::Plugin as _;
use docflow_sdk::storage::{DocumentStore as _, JobStore as _, Stores};

use crate::plugins::registry::PluginRegistry;

/// Retry behavior for transient-external failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct WorkerDeps {
    pub stores: Stores,
    pub broker: Arc<dyn Broker>,
    pub registry: Arc<PluginRegistry>,
    pub events_channel: String,
    pub retry: RetryPolicy,
}

/// Run one task to completion.
pub async fn run(envelope: TaskEnvelope, deps: WorkerDeps) {
    let job_id = envelope.job_id;

    let job = match deps.stores.jobs.job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::warn!(job_id = %job_id, "task references unknown job, dropping");
            return;
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to load job");
            return;
        }
    };
    if job.status.is_terminal() {
        tracing::debug!(job_id = %job_id, status = %job.status, "job already settled, dropping task");
        return;
    }

    let ctx = JobContext::new(
        job_id,
        envelope.document_id,
        envelope.plugin_name.clone(),
        envelope.settings.clone(),
        deps.stores.clone(),
        deps.broker.clone(),
        deps.events_channel.clone(),
    );

    // Running is claimed at pickup; every failure after this point settles
    // through the Running -> Failed edge.
    match deps.stores.jobs.set_running(job_id).await {
        Ok(_) => {}
        Err(StoreError::InvalidTransition { .. }) => {
            // Cancelled between dispatch and start.
            tracing::debug!(job_id = %job_id, "job no longer startable, dropping task");
            return;
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to mark job running");
            return;
        }
    }

    emit(
        &ctx,
        EventType::JobStarted,
        payload![
            ("job_id", job_id.to_string()),
            ("document_id", envelope.document_id.to_string()),
            ("plugin_name", envelope.plugin_name.clone()),
        ],
        EventSeverity::Info,
    )
    .await;

    let Some(plugin) = deps.registry.get(&envelope.plugin_name) else {
        settle_failed(&ctx, &deps, &envelope, "plugin not available").await;
        return;
    };

    let document = match deps.stores.documents.document(envelope.document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            settle_failed(&ctx, &deps, &envelope, "document not found").await;
            return;
        }
        Err(e) => {
            settle_failed(&ctx, &deps, &envelope, &format!("document load failed: {e}")).await;
            return;
        }
    };

    let mut attempt: u32 = 0;
    let outcome = loop {
        match plugin.process(&ctx, &document).await {
            Ok(outcome) => break Ok(outcome),
            Err(PluginError::Cancelled) => break Err(PluginError::Cancelled),
            Err(e) if e.is_transient() && attempt < deps.retry.max_retries => {
                attempt += 1;
                tracing::warn!(
                    job_id = %job_id,
                    plugin = %envelope.plugin_name,
                    attempt,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(deps.retry.retry_delay * attempt).await;
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(outcome) => {
            match deps
                .stores
                .jobs
                .set_completed(job_id, outcome.result.clone(), outcome.output_document_id)
                .await
            {
                Ok(_) => {
                    let mut payload = payload![
                        ("job_id", job_id.to_string()),
                        ("document_id", envelope.document_id.to_string()),
                        ("plugin_name", envelope.plugin_name.clone()),
                    ];
                    if let Some(output) = outcome.output_document_id {
                        payload.insert(
                            "output_document_id".to_string(),
                            serde_json::json!(output.to_string()),
                        );
                    }
                    emit(&ctx, EventType::JobCompleted, payload, EventSeverity::Success).await;
                }
                Err(StoreError::InvalidTransition { .. }) => {
                    tracing::debug!(job_id = %job_id, "job settled elsewhere before completion");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "failed to record completion");
                }
            }
        }
        Err(PluginError::Cancelled) => {
            // The cancel API already updated the record and emitted
            // job.cancelled; only repair the row if it raced.
            if let Ok(Some(job)) = deps.stores.jobs.job(job_id).await {
                if !job.status.is_terminal() {
                    let _ = deps
                        .stores
                        .jobs
                        .set_cancelled(job_id, "cancelled during processing")
                        .await;
                }
            }
            tracing::info!(job_id = %job_id, plugin = %envelope.plugin_name, "job cancelled");
        }
        Err(e) => {
            settle_failed(&ctx, &deps, &envelope, &e.to_string()).await;
        }
    }
}

async fn settle_failed(ctx: &JobContext, deps: &WorkerDeps, envelope: &TaskEnvelope, error: &str) {
    match deps.stores.jobs.set_failed(envelope.job_id, error).await {
        Ok(_) => {
            tracing::error!(
                job_id = %envelope.job_id,
                plugin = %envelope.plugin_name,
                error,
                "job failed"
            );
            emit(
                ctx,
                EventType::JobFailed,
                payload![
                    ("job_id", envelope.job_id.to_string()),
                    ("document_id", envelope.document_id.to_string()),
                    ("plugin_name", envelope.plugin_name.clone()),
                    ("error", error),
                ],
                EventSeverity::Error,
            )
            .await;
        }
        Err(StoreError::InvalidTransition { .. }) => {
            tracing::debug!(job_id = %envelope.job_id, "job settled elsewhere before failure");
        }
        Err(e) => {
            tracing::error!(job_id = %envelope.job_id, error = %e, "failed to record job failure");
        }
    }
}

async fn emit(
    ctx: &JobContext,
    event_type: EventType,
    payload: docflow_sdk::events::JsonMap,
    severity: EventSeverity,
) {
    if let Err(e) = ctx.emit(event_type.as_str(), payload, severity).await {
        tracing::error!(event_type = %event_type, error = %e, "failed to emit job event");
    }
}
