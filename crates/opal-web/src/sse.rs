//! SSE event stream.
//!
//! `GET /api/sse?session_id=…` subscribes to one session's events.  Frames
//! are `event: <event_type>` + `data: <json>` with snake_case keys and an
//! RFC 3339 timestamp, exactly as the event model serializes.  Each
//! subscriber owns a bounded queue on the bus; overflow disconnects the
//! subscriber (the stream ends) instead of back-pressuring the engine.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use tracing::debug;

use opal_events::AgentEvent;

use crate::state::AppState;

/// Queue capacity per SSE subscriber.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Query parameters for the SSE endpoint.
#[derive(Deserialize)]
pub struct SseParams {
    /// The session whose events to stream.
    pub session_id: String,
}

/// Open a live event stream for one session.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session_id = %params.session_id, "sse subscriber connected");

    let rx = state
        .coordinator
        .bus()
        .subscribe(&params.session_id, SUBSCRIBER_CAPACITY);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(frame(&event)), rx))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// Serialize one event into an SSE frame.
fn frame(event: &Arc<AgentEvent>) -> Event {
    Event::default()
        .event(event.event_type())
        .data(frame_data(event))
}

/// The `data:` payload for one event.
fn frame_data(event: &AgentEvent) -> String {
    serde_json::to_string(event)
        .unwrap_or_else(|e| format!(r#"{{"error":"event serialization failed: {e}"}}"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_events::EventKind;

    #[test]
    fn frame_payload_is_snake_case_with_envelope_fields() {
        let event = AgentEvent::new(
            "s1",
            "r1",
            EventKind::IterationStart { iter: 1, total: 50 },
        );
        let data = frame_data(&event);
        let v: serde_json::Value = serde_json::from_str(&data).unwrap();

        assert_eq!(v["event_type"], "iteration_start");
        assert_eq!(v["session_id"], "s1");
        assert_eq!(v["run_id"], "r1");
        assert_eq!(v["iter"], 1);
        // RFC 3339 timestamp string.
        assert!(v["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(event.event_type(), "iteration_start");
    }
}
