//! # SSE Streaming
//!
//! Server-pushed event stream: an initial replay of the ring buffer
//! (filtered by requested types, in timestamp order) followed by a live
//! tail of the client's bounded inbox, with a keep-alive every 15 seconds
//! of idleness.
//!
//! The `EventSource` API cannot set headers, so the caller identity comes
//! in as the `token` query parameter, minted by the fronting auth layer.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use docflow_sdk::events::Event;

use crate::error::ApiError;
use crate::server::AppState;

use super::bus::{matches_type_filter, EventBus};

const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated event types; `job.*` prefix patterns are accepted
    pub types: Option<String>,
    /// Initial replay window in minutes (1-60)
    pub minutes: Option<u32>,
    /// Caller identity token from the fronting auth layer
    pub token: Option<String>,
}

/// Unregisters the streaming client when the response stream is dropped.
struct ClientGuard {
    bus: Arc<EventBus>,
    id: Uuid,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.bus.unregister_client(self.id);
    }
}

pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let _user: Uuid = query
        .token
        .as_deref()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| ApiError::Authorization {
            message: "missing or invalid token".to_string(),
        })?;

    let minutes = query.minutes.unwrap_or(5).clamp(1, 60);
    let types: Option<Vec<String>> = query
        .types
        .as_deref()
        .map(|t| t.split(',').map(|s| s.trim().to_string()).collect());

    let bus = state.bus.clone();

    // Replay slice is taken before the inbox registration; events landing
    // in the gap are delivered twice at worst, never lost out of order.
    let mut replay = bus.recent_events(minutes, types.as_deref(), None);
    replay.reverse();

    let (client_id, mut rx) = bus.register_client();
    tracing::debug!(client_id = %client_id, minutes, "event stream subscribed");

    let stream = async_stream::stream! {
        let _guard = ClientGuard { bus, id: client_id };

        for event in replay {
            yield Ok(frame_event(&event));
        }

        while let Some(event) = rx.recv().await {
            if let Some(filter) = types.as_deref() {
                if !matches_type_filter(filter, &event.event_type) {
                    continue;
                }
            }
            yield Ok(frame_event(&event));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}

fn frame_event(event: &Event) -> SseEvent {
    let data = json!({
        "id": event.id,
        "type": event.event_type,
        "data": event.payload,
        "severity": event.severity,
        "timestamp": event.timestamp,
    });

    SseEvent::default()
        .event(event.event_type.clone())
        .id(event.id.to_string())
        .data(data.to_string())
}
