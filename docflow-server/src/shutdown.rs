//! # Shutdown Coordinator
//!
//! Signal-driven graceful drain with a bounded timeout. On the first
//! termination signal the coordinator flips the shutting-down flag (the
//! routing filter and scheduler refuse new work from that moment) and the
//! server runs the staged sequence:
//!
//! 1. emit `system.shutdown` with reason and uptime
//! 2. stop the broker bridge (≤5 s)
//! 3. wait for queued/running jobs, up to grace − 5 s, polling every 2 s
//! 4. cancel whatever is still active
//! 5. run each plugin's shutdown hook with a 5 s budget
//! 6. stop the dispatcher loops and release external handles
//!
//! Exceeding the total budget is logged but never prevents process exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use docflow_sdk::events::{EventDraft, EventSeverity, EventType};
use docflow_sdk::payload;
use docflow_sdk::plugin::Plugin as _;

use crate::server::AppState;

const BRIDGE_STOP_BUDGET: Duration = Duration::from_secs(5);
const PLUGIN_HOOK_BUDGET: Duration = Duration::from_secs(5);
const DRAIN_RESERVE: Duration = Duration::from_secs(5);

pub struct ShutdownCoordinator {
    shutting_down: AtomicBool,
    trigger_tx: watch::Sender<bool>,
    grace_period: Duration,
    started_at: Instant,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Arc<Self> {
        let (trigger_tx, _) = watch::channel(false);
        Arc::new(Self {
            shutting_down: AtomicBool::new(false),
            trigger_tx,
            grace_period,
            started_at: Instant::now(),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Mark shutdown as requested. Idempotent; the first call wins.
    pub fn trigger(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                grace_seconds = self.grace_period.as_secs(),
                "shutdown requested"
            );
            let _ = self.trigger_tx.send(true);
        }
    }

    /// Resolve once shutdown has been requested. Used as the server's
    /// graceful-shutdown future.
    pub async fn triggered(&self) {
        let mut rx = self.trigger_tx.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Listen for SIGTERM / ctrl-c and trigger on the first one.
    pub fn install_signal_handlers(self: Arc<Self>) {
        let coordinator = self;
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut sigterm =
                    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    {
                        Ok(signal) => signal,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to install SIGTERM handler");
                            let _ = ctrl_c.await;
                            coordinator.trigger();
                            return;
                        }
                    };
                tokio::select! {
                    _ = ctrl_c => tracing::warn!("received interrupt signal"),
                    _ = sigterm.recv() => tracing::warn!("received terminate signal"),
                }
            }

            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                tracing::warn!("received interrupt signal");
            }

            coordinator.trigger();
        });
    }

    /// Run the staged drain. Called after the HTTP listener has stopped
    /// accepting connections.
    pub async fn run_drain(&self, state: &AppState) {
        let drain_started = Instant::now();

        state
            .bus
            .emit(
                EventDraft::new(
                    EventType::SystemShutdown.as_str(),
                    "system",
                    payload![
                        ("reason", "graceful_shutdown"),
                        ("uptime_seconds", self.uptime().as_secs()),
                    ],
                )
                .severity(EventSeverity::Warning),
            )
            .await;

        state.bridge.stop(BRIDGE_STOP_BUDGET).await;

        let drain_window = self.grace_period.saturating_sub(DRAIN_RESERVE);
        let all_settled = state.scheduler.drain(drain_window).await;

        if !all_settled {
            state
                .scheduler
                .cancel_active("cancelled by shutdown")
                .await;
        }

        for (metadata, plugin) in state.registry.active() {
            match tokio::time::timeout(PLUGIN_HOOK_BUDGET, plugin.on_shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(plugin = %metadata.name, error = %e, "plugin shutdown hook failed");
                }
                Err(_) => {
                    tracing::warn!(plugin = %metadata.name, "plugin shutdown hook timed out");
                }
            }
        }

        state.scheduler.stop();

        let elapsed = drain_started.elapsed();
        if elapsed > self.grace_period {
            tracing::warn!(
                elapsed_seconds = elapsed.as_secs(),
                budget_seconds = self.grace_period.as_secs(),
                "shutdown exceeded graceful budget"
            );
        }
        tracing::info!(
            elapsed_ms = elapsed.as_millis() as u64,
            "shutdown complete"
        );
    }
}
