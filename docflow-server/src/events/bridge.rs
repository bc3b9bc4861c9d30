//! # Broker Bridge
//!
//! Worker tasks emit events through the broker's events channel because
//! they do not share memory with the server's bus. This bridge is the
//! single point of re-entry: a long-running task subscribed to the channel
//! that re-emits each envelope into the bus with `persist = false` (the
//! emitter already persisted it).
//!
//! Malformed frames are logged and skipped. On broker disconnect the
//! bridge retries with a short backoff; on explicit stop it unsubscribes
//! and closes cleanly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use docflow_sdk::broker::Broker;
use docflow_sdk::events::{EventDraft, EventEnvelope};

use super::bus::EventBus;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub struct BrokerBridge {
    shutdown_tx: watch::Sender<bool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BrokerBridge {
    /// Spawn the bridge task subscribed to `channel`.
    pub fn start(broker: Arc<dyn Broker>, bus: Arc<EventBus>, channel: impl Into<String>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = channel.into();
        let handle = tokio::spawn(run(broker, bus, channel, shutdown_rx));
        Self {
            shutdown_tx,
            handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Signal the bridge to stop and wait up to `timeout` for its drain.
    pub async fn stop(&self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("bridge handle poisoned").take();
        if let Some(handle) = handle {
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => tracing::info!("broker bridge stopped"),
                Err(_) => tracing::warn!("broker bridge stop timed out"),
            }
        }
    }
}

async fn run(
    broker: Arc<dyn Broker>,
    bus: Arc<EventBus>,
    channel: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::info!(channel = %channel, "broker bridge listening");

    'outer: while !*shutdown_rx.borrow() {
        let mut subscription = match broker.subscribe(&channel).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(error = %e, "broker bridge subscribe failed, retrying");
                tokio::select! {
                    _ = shutdown_rx.changed() => break 'outer,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue 'outer,
                }
            }
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break 'outer,
                frame = subscription.next_frame() => match frame {
                    Ok(Some(data)) => handle_frame(&bus, &data).await,
                    Ok(None) => {
                        tracing::warn!("broker bridge subscription closed, reconnecting");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue 'outer;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "broker bridge receive error, reconnecting");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue 'outer;
                    }
                }
            }
        }
    }

    tracing::info!("broker bridge closed");
}

async fn handle_frame(bus: &EventBus, data: &[u8]) {
    let envelope: EventEnvelope = match serde_json::from_slice(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(error = %e, "broker bridge received malformed frame");
            return;
        }
    };

    let mut draft = EventDraft::new(envelope.event_type, envelope.origin, envelope.payload)
        .severity(envelope.severity)
        .no_persist();
    if let Some(user_id) = envelope.user_id {
        draft = draft.user(user_id);
    }
    bus.emit(draft).await;
}
