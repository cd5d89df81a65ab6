//! polish-optimizer library interface
//!
//! Exposes the application state and router so integration tests can drive
//! the service in-process.

pub mod api;
pub mod changes;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod provider;
pub mod segmenter;
pub mod services;

pub use crate::error::{ApiResult, OptimizerError};

use axum::Router;
use chrono::{DateTime, Utc};
use polish_common::api::CardKeySet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::OptimizerConfig;
use crate::services::OptimizationManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<OptimizationManager>,
    /// Accepted card keys
    pub card_keys: Arc<CardKeySet>,
    pub config: Arc<OptimizerConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        manager: Arc<OptimizationManager>,
        card_keys: CardKeySet,
        config: Arc<OptimizerConfig>,
    ) -> Self {
        Self {
            manager,
            card_keys: Arc::new(card_keys),
            config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Request/response routes share the configured request timeout; the
/// progress stream is long-lived and exempt.
pub fn build_router(state: AppState) -> Router {
    let timed = Router::new()
        .merge(api::optimization_routes())
        .merge(api::health_routes())
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    Router::new()
        .merge(timed)
        .merge(api::stream_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
