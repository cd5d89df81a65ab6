//! Segment of a session document

use chrono::{DateTime, Utc};
use polish_common::events::{SegmentProgress, SegmentStatus};
use serde::{Deserialize, Serialize};

/// A contiguous unit of the submitted document
///
/// `separator` is the whitespace that followed the unit in the original
/// document; it is never sent to a provider and is re-inserted verbatim on
/// reassembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub source: String,
    pub separator: String,
    pub status: SegmentStatus,
    /// Set once `done`
    pub result: Option<String>,
    /// Set once `failed`
    pub error: Option<String>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(index: usize, source: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            index,
            source: source.into(),
            separator: separator.into(),
            status: SegmentStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn progress(&self) -> SegmentProgress {
        SegmentProgress {
            index: self.index,
            status: self.status,
            attempts: self.attempts,
            error: self.error.clone(),
        }
    }

    pub fn char_count(&self) -> usize {
        self.source.chars().count()
    }
}
