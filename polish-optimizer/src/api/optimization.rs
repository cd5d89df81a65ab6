//! Optimization session API handlers
//!
//! POST /api/optimization/start, GET /api/optimization/status,
//! GET /api/optimization/terms and the per-session routes under
//! /api/optimization/sessions/:id

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::Owner;
use crate::changes::ChangeRecord;
use crate::error::ApiResult;
use crate::models::{ExportArtifact, ExportConfirmation, ExportTerms, SessionSnapshot, SessionSummary};
use crate::services::{
    QueueStatus, RetryResponse, SessionDetail, StartRequest, StartResponse, StopAck,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ChangesResponse {
    pub session_id: Uuid,
    pub changes: Vec<ChangeRecord>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub session_id: Uuid,
    pub deleted: bool,
}

/// POST /api/optimization/start
///
/// Returns 202 Accepted; segments run in the background.
pub async fn start(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<StartRequest>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let response = state.manager.start(owner, request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/optimization/status[?session_id=]
pub async fn queue_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<QueueStatus>> {
    let status = state.manager.queue_status(&owner, query.session_id).await?;
    Ok(Json(status))
}

/// GET /api/optimization/terms
pub async fn export_terms(State(state): State<AppState>) -> Json<ExportTerms> {
    Json(state.manager.terms().clone())
}

/// GET /api/optimization/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Json<SessionListResponse> {
    let sessions = state.manager.list(&owner).await;
    Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    })
}

/// GET /api/optimization/sessions/:id
pub async fn session_detail(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionDetail>> {
    Ok(Json(state.manager.detail(&owner, session_id).await?))
}

/// GET /api/optimization/sessions/:id/progress
pub async fn session_progress(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    Ok(Json(state.manager.progress(&owner, session_id).await?))
}

/// GET /api/optimization/sessions/:id/changes
pub async fn session_changes(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ChangesResponse>> {
    let changes = state.manager.changes(&owner, session_id).await?;
    Ok(Json(ChangesResponse {
        session_id,
        changes,
    }))
}

/// POST /api/optimization/sessions/:id/stop
pub async fn stop_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<StopAck>> {
    Ok(Json(state.manager.stop(&owner, session_id).await?))
}

/// POST /api/optimization/sessions/:id/export
///
/// Body `{"accepted": true, "token": "<terms token>"}`; a missing or
/// unparsable body is treated as no confirmation.
pub async fn export_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
    confirmation: Option<Json<ExportConfirmation>>,
) -> ApiResult<Json<ExportArtifact>> {
    let confirmation = confirmation.map(|Json(c)| c).unwrap_or_default();
    Ok(Json(
        state
            .manager
            .export(&owner, session_id, &confirmation)
            .await?,
    ))
}

/// POST /api/optimization/sessions/:id/retry
pub async fn retry_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<RetryResponse>> {
    Ok(Json(state.manager.retry(&owner, session_id).await?))
}

/// DELETE /api/optimization/sessions/:id[?force=true]
pub async fn delete_session(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(session_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    state
        .manager
        .delete(&owner, session_id, query.force)
        .await?;
    Ok(Json(DeleteResponse {
        session_id,
        deleted: true,
    }))
}

/// Request/response routes; the stream route is built separately so it is
/// not subject to the request timeout
pub fn optimization_routes() -> Router<AppState> {
    Router::new()
        .route("/api/optimization/start", post(start))
        .route("/api/optimization/status", get(queue_status))
        .route("/api/optimization/terms", get(export_terms))
        .route("/api/optimization/sessions", get(list_sessions))
        .route(
            "/api/optimization/sessions/:id",
            get(session_detail).delete(delete_session),
        )
        .route("/api/optimization/sessions/:id/progress", get(session_progress))
        .route("/api/optimization/sessions/:id/changes", get(session_changes))
        .route("/api/optimization/sessions/:id/stop", post(stop_session))
        .route("/api/optimization/sessions/:id/export", post(export_session))
        .route("/api/optimization/sessions/:id/retry", post(retry_session))
}
