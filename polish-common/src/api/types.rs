//! Shared API request/response types

use serde::{Deserialize, Serialize};

/// Card key carried as a query parameter
///
/// EventSource clients cannot set headers, so every endpoint accepts the
/// credential as `?card_key=...`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CardKeyQuery {
    pub card_key: Option<String>,
}

/// Error body of every failed API call
///
/// # Examples
///
/// ```
/// use polish_common::api::types::ErrorResponse;
///
/// let body = ErrorResponse::new("SESSION_NOT_FOUND", "Session not found");
/// let json = serde_json::to_value(&body).unwrap();
/// assert_eq!(json["error"]["code"], "SESSION_NOT_FOUND");
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorBody {
    /// Stable outcome code
    pub code: String,
    /// Human-readable message (never contains internal detail)
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
