//! # Job Scheduler Module
//!
//! This module provides job submission and dispatch for the Docflow
//! orchestrator: durable job records, per-plugin task queues, per-plugin
//! concurrency limits, cancellation, and the drain used by graceful
//! shutdown.
//!
//! ## Overview
//!
//! The scheduler is responsible for:
//! - **Submission**: turning a `(plugin, document)` request into a durable
//!   job record and a task envelope on the plugin's broker queue
//! - **Dispatch**: one loop per queue popping envelopes and spawning
//!   worker tasks
//! - **Concurrency Limits**: a semaphore per plugin sized to its
//!   `max_concurrent_jobs`, acquired before a worker task starts
//! - **Cancellation**: revoking queued envelopes, aborting running tasks,
//!   settling the record, and emitting `job.cancelled`
//! - **Shutdown Support**: refusing new submissions, draining active
//!   jobs, and cancelling stragglers
//!
//! ## Job Lifecycle
//!
//! Submission and execution walk the job state machine:
//!
//! 1. **Pending**: the record exists but has not reached the queue
//! 2. **Queued**: the record carries its worker-task id; the envelope is
//!    pushed to the broker immediately after, so a worker may pick it up
//!    the moment it lands
//! 3. **Running**: claimed by the worker runtime at pickup
//! 4. **Completed / Failed / Cancelled**: terminal; the store rejects any
//!    further transition
//!
//! ## Queueing Model
//!
//! Each plugin routes to its own broker queue (queue name defaults to the
//! plugin name; plugins may opt into a shared queue). Dispatchers are
//! spawned per distinct queue at startup. Because the semaphore is
//! acquired before the worker task spawns, a slow plugin backs up its own
//! queue without stealing capacity from the others.
//!
//! ## At-Most-One-Per-Fingerprint
//!
//! When a plugin's effective `regenerate` flag is false, submission first
//! checks whether a child document of the plugin's output type already
//! exists for the input document. If so the submission short-circuits
//! with `AlreadyDone` and no job is created. A `regenerate: true` entry
//! in the request settings overrides the plugin default.
//!
//! ## Cancellation
//!
//! An external cancel request transitions any non-terminal job to
//! cancelled:
//!
//! - the task id joins the revoked set, so a still-queued envelope is
//!   dropped at pickup
//! - a running task is aborted through its abort handle
//! - the record settles with the reason captured and `job.cancelled` is
//!   emitted on the bus
//!
//! Workers additionally poll `check_cancellation` between units of work,
//! which covers the window where the abort has not landed yet.
//!
//! ## Usage
//!
//! ```rust
//! use docflow_sdk::context::{JobRequest, JobSubmitter, SubmitOutcome};
//!
//! let outcome = scheduler
//!     .submit(JobRequest {
//!         plugin_name: "audio_transcription".to_string(),
//!         document_id,
//!         settings: Default::default(),
//!     })
//!     .await?;
//!
//! match outcome {
//!     SubmitOutcome::Scheduled { job_id } => println!("queued {job_id}"),
//!     SubmitOutcome::AlreadyDone { .. } => println!("output already exists"),
//!     SubmitOutcome::Refused { reason } => println!("refused: {reason}"),
//! }
//! ```
//!
//! ## Error Handling
//!
//! A broker push failure settles the record as cancelled so it does not
//! linger in the queue states, and the error surfaces to the submitter.
//! Dispatch loops log pop failures and back off rather than exiting, so a
//! broker hiccup does not strand a queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use docflow_sdk::broker::{Broker, TaskEnvelope};
use docflow_sdk::context::{JobRequest, JobSubmitter, SubmitOutcome};
use docflow_sdk::error::SubmitError;
use docflow_sdk::events::{EventDraft, EventSeverity, EventType};
use docflow_sdk::job::Job;
use docflow_sdk::payload;
use docflow_sdk::storage::{DocumentStore as _, JobStore as _, Stores};

use crate::error::ApiError;
use crate::events::bus::EventBus;
use crate::jobs::worker::{self, RetryPolicy, WorkerDeps};
use crate::plugins::registry::PluginRegistry;
use crate::shutdown::ShutdownCoordinator;

const POP_TIMEOUT: Duration = Duration::from_secs(1);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct JobScheduler {
    stores: Stores,
    broker: Arc<dyn Broker>,
    registry: Arc<PluginRegistry>,
    bus: Arc<EventBus>,
    shutdown: Arc<ShutdownCoordinator>,
    retry: RetryPolicy,
    events_channel: String,
    semaphores: DashMap<String, Arc<Semaphore>>,
    running: Arc<DashMap<Uuid, AbortHandle>>,
    revoked: Arc<DashMap<Uuid, ()>>,
    dispatchers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: Stores,
        broker: Arc<dyn Broker>,
        registry: Arc<PluginRegistry>,
        bus: Arc<EventBus>,
        shutdown: Arc<ShutdownCoordinator>,
        retry: RetryPolicy,
        events_channel: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            stores,
            broker,
            registry,
            bus,
            shutdown,
            retry,
            events_channel: events_channel.into(),
            semaphores: DashMap::new(),
            running: Arc::new(DashMap::new()),
            revoked: Arc::new(DashMap::new()),
            dispatchers: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Spawn one dispatcher loop per distinct plugin queue.
    pub fn start(self: Arc<Self>) {
        let mut queues: Vec<String> = self
            .registry
            .active()
            .iter()
            .map(|(metadata, _)| metadata.queue_name().to_string())
            .collect();
        queues.sort();
        queues.dedup();

        let mut dispatchers = self.dispatchers.lock().expect("dispatcher list poisoned");
        for queue in queues {
            tracing::info!(queue = %queue, "starting job dispatcher");
            let scheduler = self.clone();
            dispatchers.push(tokio::spawn(async move {
                scheduler.dispatch_loop(queue).await;
            }));
        }
    }

    /// Abort dispatcher loops. Called at the end of shutdown, after the
    /// drain window.
    pub fn stop(&self) {
        let mut dispatchers = self.dispatchers.lock().expect("dispatcher list poisoned");
        for handle in dispatchers.drain(..) {
            handle.abort();
        }
    }

    async fn dispatch_loop(self: Arc<Self>, queue: String) {
        loop {
            match self.broker.pop_task(&queue, POP_TIMEOUT).await {
                Ok(Some(envelope)) => self.dispatch(envelope).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "task pop failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn dispatch(&self, envelope: TaskEnvelope) {
        let task_id = envelope.task_id;

        if self.revoked.remove(&task_id).is_some() {
            tracing::debug!(task_id = %task_id, "dropping revoked task");
            return;
        }

        let semaphore = self.semaphore_for(&envelope.plugin_name);
        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        // Re-check after waiting for capacity.
        if self.revoked.remove(&task_id).is_some() {
            tracing::debug!(task_id = %task_id, "dropping task revoked while waiting");
            return;
        }

        let deps = WorkerDeps {
            stores: self.stores.clone(),
            broker: self.broker.clone(),
            registry: self.registry.clone(),
            events_channel: self.events_channel.clone(),
            retry: self.retry,
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            worker::run(envelope, deps).await;
        });

        self.running.insert(task_id, handle.abort_handle());
        let running = self.running.clone();
        tokio::spawn(async move {
            let _ = handle.await;
            running.remove(&task_id);
        });
    }

    fn semaphore_for(&self, plugin_name: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(plugin_name.to_string())
            .or_insert_with(|| {
                let capacity = self
                    .registry
                    .metadata(plugin_name)
                    .map(|m| m.max_concurrent_jobs.max(1))
                    .unwrap_or(1);
                Arc::new(Semaphore::new(capacity))
            })
            .clone()
    }

    /// Cancel a non-terminal job: revoke the task, update the record,
    /// emit `job.cancelled`.
    pub async fn cancel(
        &self,
        job_id: Uuid,
        reason: &str,
        cancelled_by: Option<Uuid>,
    ) -> Result<Job, ApiError> {
        let job = self
            .stores
            .jobs
            .job(job_id)
            .await?
            .ok_or_else(|| ApiError::not_found("job not found"))?;

        if job.status.is_terminal() {
            return Err(ApiError::conflict(format!(
                "cannot cancel job with status: {}",
                job.status
            )));
        }

        if let Some(task_id) = job.task_id {
            self.revoked.insert(task_id, ());
            if let Some((_, handle)) = self.running.remove(&task_id) {
                handle.abort();
            }
        }

        let updated = self.stores.jobs.set_cancelled(job_id, reason).await?;

        let mut draft = EventDraft::new(
            EventType::JobCancelled.as_str(),
            "api:jobs",
            payload![
                ("job_id", job_id.to_string()),
                ("plugin_name", updated.plugin_name.clone()),
                ("document_id", updated.document_id.to_string()),
                ("reason", reason),
            ],
        )
        .severity(EventSeverity::Warning);
        if let Some(user) = cancelled_by {
            draft = draft.user(user);
        }
        self.bus.emit(draft).await;

        Ok(updated)
    }

    /// Cancel every queued or running job; used by the shutdown
    /// coordinator after the drain window expires.
    pub async fn cancel_active(&self, reason: &str) {
        let active = match self.stores.jobs.active_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "failed to list active jobs for cancellation");
                return;
            }
        };

        for job in active {
            if let Err(e) = self.cancel(job.id, reason, None).await {
                tracing::warn!(job_id = %job.id, error = %e, "failed to cancel job");
            }
        }
    }

    /// Wait for queued and running jobs to settle, up to `window`.
    /// Returns true when everything finished inside the window.
    pub async fn drain(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;

        loop {
            let active = self.stores.jobs.active_count().await.unwrap_or(0);
            if active == 0 {
                tracing::info!("all jobs settled");
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(active, "drain window expired with jobs still active");
                return false;
            }
            tracing::info!(active, "waiting for jobs to settle");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}

#[async_trait::async_trait]
impl JobSubmitter for JobScheduler {
    async fn submit(&self, request: JobRequest) -> Result<SubmitOutcome, SubmitError> {
        if self.shutdown.is_shutting_down() {
            return Ok(SubmitOutcome::Refused {
                reason: "shutdown in progress".to_string(),
            });
        }

        let metadata = self
            .registry
            .metadata(&request.plugin_name)
            .filter(|_| self.registry.is_active(&request.plugin_name))
            .ok_or_else(|| SubmitError::UnknownPlugin {
                name: request.plugin_name.clone(),
            })?;

        // At-most-one-per-fingerprint: skip when an output child already
        // exists and regeneration was not requested.
        let regenerate = request
            .settings
            .get("regenerate")
            .and_then(|v| v.as_bool())
            .unwrap_or(metadata.regenerate);
        if !regenerate {
            if let Some(output_type) = &metadata.output_type {
                if let Some(existing) = self
                    .stores
                    .documents
                    .child_of_type(request.document_id, output_type)
                    .await?
                {
                    tracing::debug!(
                        plugin = %request.plugin_name,
                        document_id = %request.document_id,
                        existing = %existing.id,
                        "output already exists, skipping job"
                    );
                    return Ok(SubmitOutcome::AlreadyDone {
                        existing_document_id: existing.id,
                    });
                }
            }
        }

        let job = Job::new(request.document_id, request.plugin_name.clone());
        let job_id = job.id;
        self.stores.jobs.insert_job(job).await?;

        let envelope = TaskEnvelope {
            task_id: Uuid::new_v4(),
            job_id,
            document_id: request.document_id,
            plugin_name: request.plugin_name.clone(),
            settings: request.settings,
        };

        // The record moves to queued before the broker send; a worker may
        // pick the envelope up the moment it lands on the queue.
        self.stores.jobs.set_queued(job_id, envelope.task_id).await?;

        if let Err(e) = self
            .broker
            .push_task(metadata.queue_name(), &envelope)
            .await
        {
            // The envelope never reached the queue; settle the record so
            // it does not linger.
            let _ = self
                .stores
                .jobs
                .set_cancelled(job_id, &format!("broker enqueue failed: {e}"))
                .await;
            return Err(e.into());
        }

        self.bus
            .emit(EventDraft::new(
                EventType::JobQueued.as_str(),
                "core:scheduler",
                payload![
                    ("job_id", job_id.to_string()),
                    ("plugin_name", request.plugin_name),
                    ("document_id", request.document_id.to_string()),
                ],
            ))
            .await;

        Ok(SubmitOutcome::Scheduled { job_id })
    }
}
