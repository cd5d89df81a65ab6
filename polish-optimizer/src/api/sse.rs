//! Server-Sent Events for session progress
//!
//! GET /api/optimization/sessions/:id/stream?card_key=...

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use polish_common::sse::progress_sse;
use std::convert::Infallible;
use uuid::Uuid;

use crate::api::auth::Owner;
use crate::error::ApiResult;
use crate::AppState;

/// Snapshot first, then live deltas; the stream ends after `SessionTerminal`
pub async fn session_event_stream(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let events = state.manager.subscribe(&owner, session_id).await?;
    tracing::info!(session_id = %session_id, "Progress stream client connected");
    Ok(progress_sse(events, state.config.heartbeat_interval()))
}

pub fn stream_routes() -> Router<AppState> {
    Router::new().route(
        "/api/optimization/sessions/:id/stream",
        get(session_event_stream),
    )
}
