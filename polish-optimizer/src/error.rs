//! Error types for polish-optimizer
//!
//! Every boundary-facing error maps to a stable outcome code. Internal
//! failures are logged with detail and answered with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use polish_common::api::types::ErrorResponse;
use thiserror::Error;
use uuid::Uuid;

use crate::segmenter::AssemblyError;

/// Optimizer error taxonomy
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Malformed document or options (400), nothing mutated
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Admission refused (429), caller should retry later
    #[error("Queue saturated: {active} active sessions (limit {limit})")]
    QueueSaturated { active: usize, limit: usize },

    /// No healthy provider (503), session not created
    #[error("No model provider available: {0}")]
    ProviderUnavailable(String),

    /// Unknown session, or a session owned by another credential (404)
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session state forbids the operation (409)
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Export without a valid confirmation (428)
    #[error("Export requires confirmation of the academic integrity terms")]
    ConfirmationRequired,

    /// Missing or invalid card key (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] polish_common::api::CredentialError),

    /// Assembly attempted on an incomplete session (invariant violation)
    #[error("Incomplete assembly: {0}")]
    IncompleteAssembly(#[from] AssemblyError),

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Any other internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OptimizerError {
    /// Stable outcome code and HTTP status
    pub fn outcome(&self) -> (StatusCode, &'static str) {
        match self {
            OptimizerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            OptimizerError::QueueSaturated { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "QUEUE_SATURATED")
            }
            OptimizerError::ProviderUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
            }
            OptimizerError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            OptimizerError::SessionBusy(_) => (StatusCode::CONFLICT, "SESSION_BUSY"),
            OptimizerError::ConfirmationRequired => {
                (StatusCode::PRECONDITION_REQUIRED, "CONFIRMATION_REQUIRED")
            }
            OptimizerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            OptimizerError::IncompleteAssembly(_)
            | OptimizerError::Database(_)
            | OptimizerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            OptimizerError::IncompleteAssembly(_)
                | OptimizerError::Database(_)
                | OptimizerError::Internal(_)
        )
    }
}

impl From<polish_common::Error> for OptimizerError {
    fn from(err: polish_common::Error) -> Self {
        match err {
            polish_common::Error::Database(e) => OptimizerError::Database(e),
            other => OptimizerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for OptimizerError {
    fn into_response(self) -> Response {
        let (status, code) = self.outcome();

        let message = if self.is_internal() {
            tracing::error!(error = %self, "Internal error while handling request");
            "Internal server error".to_string()
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
            self.to_string()
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

/// Result type for API handlers and manager operations
pub type ApiResult<T> = Result<T, OptimizerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use polish_common::api::CredentialError;

    #[test]
    fn test_outcome_codes_are_stable() {
        let cases = [
            (OptimizerError::Validation("x".into()), "VALIDATION_ERROR", 400),
            (
                OptimizerError::QueueSaturated { active: 2, limit: 2 },
                "QUEUE_SATURATED",
                429,
            ),
            (
                OptimizerError::ProviderUnavailable("x".into()),
                "PROVIDER_UNAVAILABLE",
                503,
            ),
            (
                OptimizerError::SessionNotFound(Uuid::nil()),
                "SESSION_NOT_FOUND",
                404,
            ),
            (OptimizerError::SessionBusy("x".into()), "SESSION_BUSY", 409),
            (OptimizerError::ConfirmationRequired, "CONFIRMATION_REQUIRED", 428),
            (
                OptimizerError::Unauthorized(CredentialError::Missing),
                "UNAUTHORIZED",
                401,
            ),
            (OptimizerError::Internal("x".into()), "INTERNAL_ERROR", 500),
        ];

        for (error, code, status) in cases {
            let (actual_status, actual_code) = error.outcome();
            assert_eq!(actual_code, code);
            assert_eq!(actual_status.as_u16(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_detail_not_exposed() {
        let response =
            OptimizerError::Internal("lock poisoned at registry.rs:42".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("registry.rs"));
        assert!(text.contains("INTERNAL_ERROR"));
    }
}
