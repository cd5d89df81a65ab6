//! Model providers
//!
//! A provider turns one segment into its optimized text. Providers are
//! external services; the manager only sees the [`ModelProvider`] trait, so
//! tests drive the whole pipeline with in-process providers.

pub mod http;
pub mod pool;

pub use http::ChatCompletionsProvider;
pub use pool::{HealthReport, OverallStatus, ProviderPool};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Availability of one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Available,
    /// Reachable but slow; still used for dispatch
    Degraded,
    /// Never dispatched to
    Unavailable,
}

impl ModelStatus {
    pub fn is_usable(&self) -> bool {
        !matches!(self, ModelStatus::Unavailable)
    }
}

/// Last known health of one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelHealth {
    pub status: ModelStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl ModelHealth {
    pub fn available(latency: Duration) -> Self {
        Self {
            status: ModelStatus::Available,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
            checked_at: Some(Utc::now()),
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            status: ModelStatus::Unavailable,
            latency_ms: None,
            error: Some(error.into()),
            checked_at: Some(Utc::now()),
        }
    }

    /// Assumed health before the first probe
    pub fn unchecked() -> Self {
        Self {
            status: ModelStatus::Available,
            latency_ms: None,
            error: None,
            checked_at: None,
        }
    }
}

/// One segment to optimize
#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub session_id: Uuid,
    pub segment_index: usize,
    pub attempt: u32,
    pub system_prompt: String,
    pub text: String,
}

/// Segment execution failure, recorded on the segment as its error detail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Provider call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed provider response: {0}")]
    BadResponse(String),

    #[error("No model provider available: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Name used in config, health reports and session pinning
    fn name(&self) -> &str;

    /// Upper bound for one `optimize` call
    fn timeout(&self) -> Duration;

    async fn optimize(&self, request: &OptimizationRequest) -> Result<String, ProviderError>;

    /// Lightweight reachability check
    async fn probe(&self) -> ModelHealth {
        ModelHealth::available(Duration::ZERO)
    }
}
