//! HTTP API handlers for polish-optimizer
//!
//! REST endpoints for session control and polling, plus an SSE stream per
//! session.

pub mod auth;
pub mod health;
pub mod optimization;
pub mod sse;

pub use health::health_routes;
pub use optimization::optimization_routes;
pub use sse::stream_routes;
