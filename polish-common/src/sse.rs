//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE conversion and keep-alive settings for Polish services.

use crate::events::ProgressEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Convert a progress event to an SSE frame named after its event type
///
/// Returns `None` if the event cannot be serialized; the stream skips it.
pub fn progress_event_to_sse(event: &ProgressEvent) -> Option<Event> {
    let event_type = event.event_type();
    match serde_json::to_string(event) {
        Ok(event_json) => {
            debug!("SSE: Sending {} for session {}", event_type, event.session_id());
            Some(Event::default().event(event_type).data(event_json))
        }
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

/// Keep-alive comment sent while a stream is idle
pub fn heartbeat_keep_alive(interval: Duration) -> KeepAlive {
    KeepAlive::new().interval(interval).text("heartbeat")
}

/// Wrap a progress event sequence as an SSE response
///
/// The response ends when `events` ends. Idle periods are filled with
/// heartbeat comments every `heartbeat`.
pub fn progress_sse<S>(
    events: S,
    heartbeat: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ProgressEvent> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut events = Box::pin(events);
        info!("SSE: Progress stream started");

        while let Some(event) = events.next().await {
            if let Some(frame) = progress_event_to_sse(&event) {
                yield Ok(frame);
            }
        }

        info!("SSE: Progress stream finished");
    };

    Sse::new(stream).keep_alive(heartbeat_keep_alive(heartbeat))
}
