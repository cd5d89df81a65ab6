//! Progress event types for optimization sessions
//!
//! Events are published per session and serialized for SSE transmission.
//! Status enums live here so that every consumer of the stream shares one
//! vocabulary with the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Admitted, no segment dispatched yet
    Queued,
    /// At least one segment dispatched
    Running,
    /// Every segment is done
    Completed,
    /// At least one segment failed and nothing is pending or running
    Failed,
    /// Stopped by explicit user request
    Stopped,
}

impl SessionStatus {
    /// Whether no further dispatch will happen without an explicit request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Queued => "queued",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(SessionStatus::Queued),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "stopped" => Ok(SessionStatus::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Per-segment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Running => "running",
            SegmentStatus::Done => "done",
            SegmentStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SegmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SegmentStatus::Pending),
            "running" => Ok(SegmentStatus::Running),
            "done" => Ok(SegmentStatus::Done),
            "failed" => Ok(SegmentStatus::Failed),
            other => Err(format!("unknown segment status: {other}")),
        }
    }
}

/// Aggregate progress of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    /// Share of segments that reached a terminal status (0.0 - 100.0)
    pub percentage: f64,
}

impl ProgressSummary {
    /// Build a summary from per-segment statuses
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = SegmentStatus>,
    {
        let mut summary = ProgressSummary::default();
        for status in statuses {
            summary.total += 1;
            match status {
                SegmentStatus::Pending => summary.pending += 1,
                SegmentStatus::Running => summary.running += 1,
                SegmentStatus::Done => summary.done += 1,
                SegmentStatus::Failed => summary.failed += 1,
            }
        }
        summary.percentage = if summary.total > 0 {
            (summary.done + summary.failed) as f64 / summary.total as f64 * 100.0
        } else {
            0.0
        };
        summary
    }
}

/// Status of one segment as seen by progress consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentProgress {
    pub index: usize,
    pub status: SegmentStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events streamed to progress subscribers
///
/// A subscriber always receives `SessionSnapshot` first, then deltas in the
/// order they were applied to the session, and `SessionTerminal` last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// Full current state, sent on subscribe and after a subscriber fell behind
    SessionSnapshot {
        session_id: Uuid,
        status: SessionStatus,
        progress: ProgressSummary,
        segments: Vec<SegmentProgress>,
        timestamp: DateTime<Utc>,
    },

    /// One segment changed status
    SegmentStatusChanged {
        session_id: Uuid,
        segment_index: usize,
        old_status: SegmentStatus,
        new_status: SegmentStatus,
        attempts: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate progress or overall status changed
    ProgressChanged {
        session_id: Uuid,
        status: SessionStatus,
        progress: ProgressSummary,
        timestamp: DateTime<Utc>,
    },

    /// Session reached a terminal status; no further events follow
    SessionTerminal {
        session_id: Uuid,
        status: SessionStatus,
        progress: ProgressSummary,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::SessionSnapshot { .. } => "SessionSnapshot",
            ProgressEvent::SegmentStatusChanged { .. } => "SegmentStatusChanged",
            ProgressEvent::ProgressChanged { .. } => "ProgressChanged",
            ProgressEvent::SessionTerminal { .. } => "SessionTerminal",
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            ProgressEvent::SessionSnapshot { session_id, .. }
            | ProgressEvent::SegmentStatusChanged { session_id, .. }
            | ProgressEvent::ProgressChanged { session_id, .. }
            | ProgressEvent::SessionTerminal { session_id, .. } => *session_id,
        }
    }

    /// Whether the stream ends after this event
    ///
    /// A snapshot of a terminal session also ends the stream.
    pub fn ends_stream(&self) -> bool {
        match self {
            ProgressEvent::SessionTerminal { .. } => true,
            ProgressEvent::SessionSnapshot { status, .. } => status.is_terminal(),
            _ => false,
        }
    }
}
