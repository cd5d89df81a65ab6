//! Tests for the shared SSE helpers

use axum::response::IntoResponse;
use chrono::Utc;
use polish_common::events::{ProgressEvent, ProgressSummary, SessionStatus};
use polish_common::sse::progress_sse;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_progress_sse_emits_named_events_and_ends() {
    let session_id = Uuid::new_v4();
    let events = futures::stream::iter(vec![
        ProgressEvent::ProgressChanged {
            session_id,
            status: SessionStatus::Running,
            progress: ProgressSummary::default(),
            timestamp: Utc::now(),
        },
        ProgressEvent::SessionTerminal {
            session_id,
            status: SessionStatus::Completed,
            progress: ProgressSummary::default(),
            timestamp: Utc::now(),
        },
    ]);

    let response = progress_sse(events, Duration::from_secs(15)).into_response();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("event: ProgressChanged"));
    assert!(text.contains("event: SessionTerminal"));
    assert!(text.contains(&session_id.to_string()));
}
