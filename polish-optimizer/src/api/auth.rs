//! Card key extraction
//!
//! Every optimization endpoint takes the card key from the `card_key` query
//! parameter (the only option for EventSource clients) or the `X-Card-Key`
//! header. The extractor rejects the request with 401 before the handler runs.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use polish_common::api::{CardKeyQuery, OwnerId};

use crate::error::OptimizerError;
use crate::AppState;

pub const CARD_KEY_HEADER: &str = "x-card-key";

/// Owner of the request, derived from a valid card key
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerId);

fn card_key_from(parts: &Parts) -> Option<String> {
    let from_query = Query::<CardKeyQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.card_key);

    from_query.or_else(|| {
        parts
            .headers
            .get(CARD_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    })
}

#[async_trait]
impl FromRequestParts<AppState> for Owner {
    type Rejection = OptimizerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let card_key = card_key_from(parts);
        match state.card_keys.validate(card_key.as_deref()) {
            Ok(owner) => Ok(Owner(owner)),
            Err(e) => {
                tracing::debug!(path = %parts.uri.path(), reason = %e, "Rejected card key");
                Err(OptimizerError::Unauthorized(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str, header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = header {
            builder = builder.header(CARD_KEY_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_query_parameter_wins_over_header() {
        let parts = parts("/api/optimization/sessions?card_key=from-query", Some("from-header"));
        assert_eq!(card_key_from(&parts).as_deref(), Some("from-query"));
    }

    #[test]
    fn test_header_fallback() {
        let parts = parts("/api/optimization/sessions", Some("from-header"));
        assert_eq!(card_key_from(&parts).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_missing_key() {
        let parts = parts("/api/optimization/sessions?other=1", None);
        assert_eq!(card_key_from(&parts), None);
    }
}
