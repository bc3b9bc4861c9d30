//! # Event Bus Module
//!
//! This module provides the central event bus for the Docflow
//! orchestrator: single-process, cooperative pub/sub with a bounded
//! recent-events buffer, best-effort persistence, and live fan-out to
//! subscribed streaming clients.
//!
//! ## Overview
//!
//! The event bus provides:
//! - **Pub/Sub for Handlers**: per-type handler lists plus a `"*"`
//!   wildcard list, invoked on every emit
//! - **Ring Buffer**: a recent-events cache bounded by count and age,
//!   backing SSE replay and the recent-events query
//! - **Persistence Hook**: a fire-and-forget insert into the event log
//!   for emits with `persist` set
//! - **Streaming Fan-out**: bounded per-client inboxes written with
//!   non-blocking sends
//! - **Broker Egress**: `emit_remote` serializes an envelope onto the
//!   broker's events channel for contexts that do not share this memory
//!
//! ## Emission Pipeline
//!
//! Every `emit` walks the same stages:
//!
//! 1. **Build**: the draft is stamped with a fresh id and timestamp
//! 2. **Handlers**: handlers for the concrete type fire before wildcard
//!    handlers; within one list, registration order. Each handler is
//!    awaited before the next begins, which gives plugins deterministic
//!    sequencing when they care
//! 3. **Buffer**: the event is appended to the ring buffer, which is then
//!    trimmed by size and by age
//! 4. **Persist**: when requested, a spawned task inserts into the event
//!    log; failures are logged and never surface to the emitter
//! 5. **Fan-out**: the event is pushed to every registered client inbox
//!    with `try_send`; a full or closed inbox evicts its client
//!
//! ## Ordering Guarantees
//!
//! - Handlers for a single event type fire in subscription order
//! - Each streaming client observes events in emit order; cross-client
//!   ordering is not guaranteed
//! - Replay slices from the ring buffer are timestamp-ordered by the
//!   consumer before delivery
//!
//! ## Error Isolation
//!
//! Handler failures are caught and logged; one misbehaving plugin cannot
//! poison the others or abort the emit. The handler registry is
//! append-only during normal operation and is never mutated from worker
//! contexts.
//!
//! ## Cross-Process Traffic
//!
//! Worker tasks do not share memory with this bus. They publish
//! envelopes through the broker (see `emit_remote` and the sdk's
//! `JobContext`), and the broker bridge re-emits the frames here with
//! `persist` off, the emitter having already persisted them. In-process
//! handlers therefore only ever observe worker events after the bridge.
//!
//! ## Usage
//!
//! ```rust
//! use docflow_sdk::events::EventDraft;
//! use docflow_sdk::payload;
//!
//! // Subscribe a handler for one event type
//! bus.subscribe("document.created", "my-plugin", handler).await;
//!
//! // Emit an event; handlers run before this returns
//! let event = bus
//!     .emit(EventDraft::new(
//!         "document.created",
//!         "core:documents",
//!         payload![("document_id", id.to_string())],
//!     ))
//!     .await;
//!
//! // Query the recent slice, newest first
//! let recent = bus.recent_events(5, Some(&["job.*".to_string()]), None);
//! ```
//!
//! ## Configuration
//!
//! [`EventBusConfig`] carries the knobs: ring-buffer size (default 1000),
//! ring-buffer age (default 15 minutes), and the per-client inbox size
//! (default 100). All three are surfaced through the server's `[events]`
//! configuration section.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use docflow_sdk::broker::Broker;
use docflow_sdk::error::{BrokerError, PluginError};
use docflow_sdk::events::{Event, EventDraft, EventEnvelope, EventSink};
use docflow_sdk::storage::EventLog;

/// Boxed async event handler. Returned errors are logged, never propagated.
pub type EventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), PluginError>> + Send + Sync>;

struct RegisteredHandler {
    /// Label used in logs and for unsubscription
    label: String,
    handler: EventHandler,
}

/// Ring buffer and fan-out knobs.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub buffer_max_size: usize,
    pub buffer_max_age: Duration,
    pub client_inbox_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: 1000,
            buffer_max_age: Duration::from_secs(15 * 60),
            client_inbox_size: 100,
        }
    }
}

/// Central event bus. Constructed once at startup and threaded through the
/// component wiring; tests instantiate fresh copies.
pub struct EventBus {
    config: EventBusConfig,
    handlers: RwLock<HashMap<String, Vec<RegisteredHandler>>>,
    clients: DashMap<Uuid, mpsc::Sender<Event>>,
    buffer: Mutex<VecDeque<Event>>,
    event_log: Option<Arc<dyn EventLog>>,
    broker: Option<Arc<dyn Broker>>,
    events_channel: String,
}

impl EventBus {
    pub fn new(
        config: EventBusConfig,
        event_log: Option<Arc<dyn EventLog>>,
        broker: Option<Arc<dyn Broker>>,
        events_channel: impl Into<String>,
    ) -> Self {
        Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            clients: DashMap::new(),
            buffer: Mutex::new(VecDeque::new()),
            event_log,
            broker,
            events_channel: events_channel.into(),
        }
    }

    // === subscription ===

    /// Subscribe a handler to an event type, or `"*"` for all events.
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        label: impl Into<String>,
        handler: EventHandler,
    ) {
        let event_type = event_type.into();
        let label = label.into();
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.clone())
            .or_default()
            .push(RegisteredHandler { label, handler });
        tracing::debug!(event_type = %event_type, "handler subscribed");
    }

    pub async fn unsubscribe(&self, event_type: &str, label: &str) {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|h| h.label != label);
        }
    }

    // === emission ===

    /// Emit an event: invoke handlers, buffer, persist, fan out. Returns
    /// the built event.
    pub async fn emit(&self, draft: EventDraft) -> Event {
        let persist = draft.persist;
        let event = draft.into_event();

        // Handlers for the concrete type fire before wildcard handlers;
        // within one list, registration order. Each handler is awaited
        // before the next begins.
        let to_invoke: Vec<(String, EventHandler)> = {
            let handlers = self.handlers.read().await;
            let mut list = Vec::new();
            for key in [event.event_type.as_str(), "*"] {
                if let Some(registered) = handlers.get(key) {
                    for h in registered {
                        list.push((h.label.clone(), h.handler.clone()));
                    }
                }
            }
            list
        };

        for (label, handler) in to_invoke {
            if let Err(e) = handler(event.clone()).await {
                tracing::error!(
                    event_type = %event.event_type,
                    handler = %label,
                    error = %e,
                    "event handler failed"
                );
            }
        }

        self.add_to_buffer(event.clone());

        if persist {
            if let Some(log) = self.event_log.clone() {
                let persisted = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = log.append_event(&persisted).await {
                        tracing::error!(
                            event_type = %persisted.event_type,
                            error = %e,
                            "failed to persist event"
                        );
                    }
                });
            }
        }

        self.push_to_clients(&event);

        tracing::debug!(event_type = %event.event_type, origin = %event.origin, "event emitted");
        event
    }

    /// Serialize an event onto the broker's events channel. Used from
    /// contexts that do not share memory with this bus; the bridge
    /// re-emits the frame here with `persist = false`.
    pub async fn emit_remote(&self, draft: EventDraft) -> Result<(), BrokerError> {
        let broker = self.broker.as_ref().ok_or(BrokerError::Connection {
            message: "no broker configured".to_string(),
        })?;
        let event = draft.into_event();
        let frame = serde_json::to_vec(&EventEnvelope::from(&event))?;
        broker.publish(&self.events_channel, &frame).await
    }

    // === ring buffer ===

    fn add_to_buffer(&self, event: Event) {
        let mut buffer = self.buffer.lock().expect("event buffer poisoned");
        buffer.push_back(event);

        while buffer.len() > self.config.buffer_max_size {
            buffer.pop_front();
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.buffer_max_age)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        while buffer.front().is_some_and(|e| e.timestamp < cutoff) {
            buffer.pop_front();
        }
    }

    /// Newest-first slice of the ring buffer, filtered by age, event types
    /// (exact or `prefix.*`), and an origin substring.
    pub fn recent_events(
        &self,
        minutes: u32,
        event_types: Option<&[String]>,
        origin_filter: Option<&str>,
    ) -> Vec<Event> {
        let cutoff = Utc::now() - chrono::Duration::minutes(i64::from(minutes));
        let buffer = self.buffer.lock().expect("event buffer poisoned");

        let mut events: Vec<Event> = buffer
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .filter(|e| {
                event_types
                    .map(|types| matches_type_filter(types, &e.event_type))
                    .unwrap_or(true)
            })
            .filter(|e| {
                origin_filter
                    .map(|needle| e.origin.contains(needle))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().expect("event buffer poisoned").len()
    }

    // === streaming clients ===

    /// Acquire a bounded inbox registered with the bus. The caller owns
    /// the receiving side and must call [`unregister_client`] when done.
    pub fn register_client(&self) -> (Uuid, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.config.client_inbox_size);
        let id = Uuid::new_v4();
        self.clients.insert(id, tx);
        tracing::debug!(client_id = %id, "streaming client registered");
        (id, rx)
    }

    pub fn unregister_client(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            tracing::debug!(client_id = %id, "streaming client unregistered");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn push_to_clients(&self, event: &Event) {
        let mut evicted = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(client_id = %entry.key(), "client inbox full, evicting");
                    evicted.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(*entry.key());
                }
            }
        }
        for id in evicted {
            self.clients.remove(&id);
        }
    }
}

#[async_trait::async_trait]
impl EventSink for EventBus {
    async fn emit(&self, draft: EventDraft) -> Event {
        EventBus::emit(self, draft).await
    }
}

/// Match an event type against a filter list. Entries are exact type
/// strings or prefix patterns ending in `.*` (e.g. `job.*`).
pub fn matches_type_filter(filter: &[String], event_type: &str) -> bool {
    filter.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix(".*") {
            event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            pattern == event_type
        }
    })
}
