//! Session state machine
//!
//! Session status moves `queued → running → completed | failed`, any
//! non-terminal status may move to `stopped`, and `failed → running` on retry.
//! Every mutation returns the progress events describing it, in the order
//! they happened, so the caller can publish them while still holding the
//! session lock.

use chrono::{DateTime, Utc};
use polish_common::api::OwnerId;
use polish_common::events::{
    ProgressEvent, ProgressSummary, SegmentProgress, SegmentStatus, SessionStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::changes::{self, ChangeRecord};
use crate::models::{ExportArtifact, OptimizationMode, OptimizationOptions, Segment};
use crate::segmenter::{self, AssemblyError};

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("segment {0} does not exist")]
    UnknownSegment(usize),

    #[error("session is {0:?}; no segment can be dispatched")]
    NotDispatchable(SessionStatus),

    #[error("segment {index} is {actual:?}, expected {expected:?}")]
    UnexpectedSegmentStatus {
        index: usize,
        actual: SegmentStatus,
        expected: SegmentStatus,
    },

    #[error("stale lease on segment {index}: attempt {attempt}, current attempt {current}")]
    StaleLease {
        index: usize,
        attempt: u32,
        current: u32,
    },

    #[error("session already {0:?}")]
    AlreadyTerminal(SessionStatus),

    #[error("session is {0:?}; only failed sessions can be retried")]
    NotRetryable(SessionStatus),
}

/// Exclusive right to execute one segment attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub session_id: Uuid,
    pub segment_index: usize,
    pub attempt: u32,
    pub source: String,
}

/// Read-only view shared by polling endpoints and the progress stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub progress: ProgressSummary,
    pub segments: Vec<SegmentProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent::SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            progress: self.progress.clone(),
            segments: self.segments.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// One row of the session list
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub title: Option<String>,
    pub mode: OptimizationMode,
    pub status: SessionStatus,
    pub progress: ProgressSummary,
    pub exported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One optimization job
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub owner: OwnerId,
    pub title: Option<String>,
    pub options: OptimizationOptions,
    pub status: SessionStatus,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub export: Option<ExportArtifact>,
    /// Change records of `done` segments, filled on first request
    change_cache: BTreeMap<usize, ChangeRecord>,
}

impl Session {
    /// Create a queued session from already-split segments
    pub fn new(
        owner: OwnerId,
        title: Option<String>,
        options: OptimizationOptions,
        segments: Vec<Segment>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            owner,
            title,
            options,
            status: SessionStatus::Queued,
            segments,
            created_at: now,
            updated_at: now,
            ended_at: None,
            export: None,
            change_cache: BTreeMap::new(),
        }
    }

    /// Rebuild a session loaded from storage
    #[allow(clippy::too_many_arguments)]
    pub fn restored(
        session_id: Uuid,
        owner: OwnerId,
        title: Option<String>,
        options: OptimizationOptions,
        status: SessionStatus,
        segments: Vec<Segment>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        export: Option<ExportArtifact>,
    ) -> Self {
        Self {
            session_id,
            owner,
            title,
            options,
            status,
            segments,
            created_at,
            updated_at,
            ended_at,
            export,
            change_cache: BTreeMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn progress(&self) -> ProgressSummary {
        ProgressSummary::from_statuses(self.segments.iter().map(|s| s.status))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            progress: self.progress(),
            segments: self.segments.iter().map(Segment::progress).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            title: self.title.clone(),
            mode: self.options.mode,
            status: self.status,
            progress: self.progress(),
            exported: self.export.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            ended_at: self.ended_at,
        }
    }

    /// Indices of segments waiting for dispatch, ascending
    pub fn pending_indices(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Pending)
            .map(|s| s.index)
            .collect()
    }

    fn segment_mut(&mut self, index: usize) -> Result<&mut Segment, TransitionError> {
        self.segments
            .get_mut(index)
            .filter(|s| s.index == index)
            .ok_or(TransitionError::UnknownSegment(index))
    }

    fn progress_event(&self) -> ProgressEvent {
        ProgressEvent::ProgressChanged {
            session_id: self.session_id,
            status: self.status,
            progress: self.progress(),
            timestamp: Utc::now(),
        }
    }

    fn terminal_event(&self) -> ProgressEvent {
        ProgressEvent::SessionTerminal {
            session_id: self.session_id,
            status: self.status,
            progress: self.progress(),
            timestamp: Utc::now(),
        }
    }

    /// Dispatch one pending segment: `pending → running`
    ///
    /// The first dispatch moves the session `queued → running`.
    pub fn begin_segment(
        &mut self,
        index: usize,
    ) -> Result<(Lease, Vec<ProgressEvent>), TransitionError> {
        if !matches!(self.status, SessionStatus::Queued | SessionStatus::Running) {
            return Err(TransitionError::NotDispatchable(self.status));
        }

        let session_id = self.session_id;
        let now = Utc::now();
        let segment = self.segment_mut(index)?;
        if segment.status != SegmentStatus::Pending {
            return Err(TransitionError::UnexpectedSegmentStatus {
                index,
                actual: segment.status,
                expected: SegmentStatus::Pending,
            });
        }

        segment.status = SegmentStatus::Running;
        segment.attempts += 1;
        segment.error = None;
        segment.updated_at = now;

        let lease = Lease {
            session_id,
            segment_index: index,
            attempt: segment.attempts,
            source: segment.source.clone(),
        };
        let changed = ProgressEvent::SegmentStatusChanged {
            session_id,
            segment_index: index,
            old_status: SegmentStatus::Pending,
            new_status: SegmentStatus::Running,
            attempts: lease.attempt,
            error: None,
            timestamp: now,
        };

        self.status = SessionStatus::Running;
        self.updated_at = now;

        Ok((lease, vec![changed, self.progress_event()]))
    }

    /// Record the outcome of a leased attempt: `running → done | failed`
    ///
    /// On a stopped session the segment still reaches its terminal status but
    /// the session status is left untouched.
    pub fn finish_segment(
        &mut self,
        index: usize,
        attempt: u32,
        outcome: Result<String, String>,
    ) -> Result<Vec<ProgressEvent>, TransitionError> {
        let session_id = self.session_id;
        let now = Utc::now();
        let segment = self.segment_mut(index)?;

        if segment.status != SegmentStatus::Running {
            return Err(TransitionError::UnexpectedSegmentStatus {
                index,
                actual: segment.status,
                expected: SegmentStatus::Running,
            });
        }
        if segment.attempts != attempt {
            return Err(TransitionError::StaleLease {
                index,
                attempt,
                current: segment.attempts,
            });
        }

        let (new_status, error) = match outcome {
            Ok(result) => {
                segment.result = Some(result);
                segment.error = None;
                (SegmentStatus::Done, None)
            }
            Err(error) => {
                segment.result = None;
                segment.error = Some(error.clone());
                (SegmentStatus::Failed, Some(error))
            }
        };
        segment.status = new_status;
        segment.updated_at = now;

        let mut events = vec![ProgressEvent::SegmentStatusChanged {
            session_id,
            segment_index: index,
            old_status: SegmentStatus::Running,
            new_status,
            attempts: attempt,
            error,
            timestamp: now,
        }];

        self.updated_at = now;
        if self.status == SessionStatus::Stopped {
            return Ok(events);
        }

        let progress = self.progress();
        let next = if progress.done == progress.total {
            SessionStatus::Completed
        } else if progress.pending == 0 && progress.running == 0 && progress.failed > 0 {
            SessionStatus::Failed
        } else {
            SessionStatus::Running
        };
        self.status = next;

        events.push(self.progress_event());
        if next.is_terminal() {
            self.ended_at = Some(now);
            events.push(self.terminal_event());
        }
        Ok(events)
    }

    /// Explicit stop from any non-terminal status
    ///
    /// Running segments keep their lease and finish later; pending segments
    /// stay pending and are never dispatched.
    pub fn stop(&mut self) -> Result<Vec<ProgressEvent>, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.status));
        }

        let now = Utc::now();
        self.status = SessionStatus::Stopped;
        self.updated_at = now;
        self.ended_at = Some(now);

        Ok(vec![self.progress_event(), self.terminal_event()])
    }

    /// Retry: reset only `failed` segments to `pending`, session `failed → running`
    ///
    /// Returns the reset indices in ascending order.
    pub fn reset_failed(&mut self) -> Result<(Vec<usize>, Vec<ProgressEvent>), TransitionError> {
        if self.status != SessionStatus::Failed {
            return Err(TransitionError::NotRetryable(self.status));
        }

        let session_id = self.session_id;
        let now = Utc::now();
        let mut reset = Vec::new();
        let mut events = Vec::new();

        for segment in self
            .segments
            .iter_mut()
            .filter(|s| s.status == SegmentStatus::Failed)
        {
            segment.status = SegmentStatus::Pending;
            segment.error = None;
            segment.updated_at = now;
            reset.push(segment.index);
            events.push(ProgressEvent::SegmentStatusChanged {
                session_id,
                segment_index: segment.index,
                old_status: SegmentStatus::Failed,
                new_status: SegmentStatus::Pending,
                attempts: segment.attempts,
                error: None,
                timestamp: now,
            });
        }

        self.status = SessionStatus::Running;
        self.updated_at = now;
        self.ended_at = None;
        events.push(self.progress_event());

        Ok((reset, events))
    }

    /// Startup recovery for a session loaded from a previous run
    ///
    /// Segments still `running` lost their worker and become `failed`. A
    /// non-terminal session also fails its `pending` segments and becomes
    /// `failed`, which leaves it retryable; a terminal session keeps its
    /// status. Returns false if nothing changed.
    pub fn interrupt(&mut self) -> bool {
        let terminal = self.is_terminal();
        let now = Utc::now();
        let mut changed = false;

        for segment in self.segments.iter_mut().filter(|s| match s.status {
            SegmentStatus::Running => true,
            SegmentStatus::Pending => !terminal,
            _ => false,
        }) {
            segment.status = SegmentStatus::Failed;
            segment.error = Some("Interrupted by service restart".to_string());
            segment.updated_at = now;
            changed = true;
        }

        if !terminal {
            self.status = SessionStatus::Failed;
            self.ended_at = Some(now);
            changed = true;
        }
        if changed {
            self.updated_at = now;
        }
        changed
    }

    /// Optimized document; only defined once every segment is `done`
    pub fn assemble(&self) -> Result<String, AssemblyError> {
        segmenter::reassemble(&self.segments)
    }

    /// Change records of every `done` segment, computed once per segment
    pub fn changes(&mut self) -> Vec<ChangeRecord> {
        for segment in &self.segments {
            if segment.status != SegmentStatus::Done || self.change_cache.contains_key(&segment.index) {
                continue;
            }
            if let Some(result) = &segment.result {
                let record = changes::compare(segment.index, &segment.source, result);
                self.change_cache.insert(segment.index, record);
            }
        }

        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Done)
            .filter_map(|s| self.change_cache.get(&s.index).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(count: usize) -> Session {
        let segments = (0..count)
            .map(|i| Segment::new(i, format!("paragraph {i}"), "\n\n"))
            .collect();
        Session::new(
            OwnerId::from_digest("owner"),
            None,
            OptimizationOptions::default(),
            segments,
        )
    }

    fn run(session: &mut Session, index: usize, outcome: Result<String, String>) -> Vec<ProgressEvent> {
        let (lease, _) = session.begin_segment(index).unwrap();
        session.finish_segment(index, lease.attempt, outcome).unwrap()
    }

    #[test]
    fn test_first_dispatch_moves_queued_to_running() {
        let mut session = session_with(2);
        assert_eq!(session.status, SessionStatus::Queued);

        let (lease, events) = session.begin_segment(0).unwrap();
        assert_eq!(lease.attempt, 1);
        assert_eq!(session.status, SessionStatus::Running);
        assert!(matches!(
            events[0],
            ProgressEvent::SegmentStatusChanged {
                new_status: SegmentStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_all_done_completes_session() {
        let mut session = session_with(2);
        run(&mut session, 0, Ok("a".into()));
        let events = run(&mut session, 1, Ok("b".into()));

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.ended_at.is_some());
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::SessionTerminal {
                status: SessionStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_failure_not_final_while_siblings_pending() {
        let mut session = session_with(3);
        run(&mut session, 0, Err("timeout".into()));
        assert_eq!(session.status, SessionStatus::Running);

        run(&mut session, 1, Ok("b".into()));
        assert_eq!(session.status, SessionStatus::Running);

        run(&mut session, 2, Ok("c".into()));
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.segments[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_failure_not_final_while_sibling_running() {
        let mut session = session_with(2);
        let (lease0, _) = session.begin_segment(0).unwrap();
        let (lease1, _) = session.begin_segment(1).unwrap();

        session.finish_segment(0, lease0.attempt, Err("boom".into())).unwrap();
        assert_eq!(session.status, SessionStatus::Running);

        session.finish_segment(1, lease1.attempt, Ok("b".into())).unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[test]
    fn test_cannot_lease_segment_twice() {
        let mut session = session_with(1);
        session.begin_segment(0).unwrap();
        let err = session.begin_segment(0).unwrap_err();
        assert!(matches!(err, TransitionError::UnexpectedSegmentStatus { .. }));
    }

    #[test]
    fn test_stale_lease_rejected() {
        let mut session = session_with(1);
        run(&mut session, 0, Err("boom".into()));
        session.reset_failed().unwrap();
        let (lease, _) = session.begin_segment(0).unwrap();
        assert_eq!(lease.attempt, 2);

        let err = session.finish_segment(0, 1, Ok("old".into())).unwrap_err();
        assert!(matches!(err, TransitionError::StaleLease { .. }));
    }

    #[test]
    fn test_stop_blocks_dispatch_and_survives_late_results() {
        let mut session = session_with(3);
        let (lease, _) = session.begin_segment(0).unwrap();
        session.stop().unwrap();

        assert_eq!(
            session.begin_segment(1).unwrap_err(),
            TransitionError::NotDispatchable(SessionStatus::Stopped)
        );

        let events = session.finish_segment(0, lease.attempt, Ok("late".into())).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(session.segments[0].status, SegmentStatus::Done);
        assert_eq!(session.segments[1].status, SegmentStatus::Pending);
    }

    #[test]
    fn test_stop_on_terminal_rejected() {
        let mut session = session_with(1);
        run(&mut session, 0, Ok("a".into()));
        assert_eq!(
            session.stop().unwrap_err(),
            TransitionError::AlreadyTerminal(SessionStatus::Completed)
        );
    }

    #[test]
    fn test_reset_failed_touches_only_failed_segments() {
        let mut session = session_with(3);
        run(&mut session, 0, Ok("first".into()));
        run(&mut session, 1, Err("boom".into()));
        run(&mut session, 2, Ok("third".into()));
        assert_eq!(session.status, SessionStatus::Failed);
        let before = session.segments.clone();

        let (reset, _) = session.reset_failed().unwrap();
        assert_eq!(reset, vec![1]);
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.segments[0], before[0]);
        assert_eq!(session.segments[2], before[2]);
        assert_eq!(session.segments[1].status, SegmentStatus::Pending);
        assert!(session.segments[1].error.is_none());
    }

    #[test]
    fn test_retry_only_from_failed() {
        let mut session = session_with(1);
        assert_eq!(
            session.reset_failed().unwrap_err(),
            TransitionError::NotRetryable(SessionStatus::Queued)
        );
    }

    #[test]
    fn test_progress_decreases_only_after_retry() {
        let mut session = session_with(2);
        run(&mut session, 0, Err("boom".into()));
        run(&mut session, 1, Ok("b".into()));
        assert_eq!(session.progress().percentage, 100.0);

        session.reset_failed().unwrap();
        assert_eq!(session.progress().percentage, 50.0);
    }

    #[test]
    fn test_interrupt_fails_unfinished_segments() {
        let mut session = session_with(3);
        run(&mut session, 0, Ok("done".into()));
        session.begin_segment(1).unwrap();

        assert!(session.interrupt());
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.segments[0].status, SegmentStatus::Done);
        assert_eq!(session.segments[1].status, SegmentStatus::Failed);
        assert_eq!(session.segments[2].status, SegmentStatus::Failed);
        assert!(!session.interrupt());

        let (reset, _) = session.reset_failed().unwrap();
        assert_eq!(reset, vec![1, 2]);
    }

    #[test]
    fn test_interrupt_keeps_stopped_status() {
        let mut session = session_with(3);
        session.begin_segment(0).unwrap();
        session.stop().unwrap();

        assert!(session.interrupt());
        assert_eq!(session.status, SessionStatus::Stopped);
        assert_eq!(session.segments[0].status, SegmentStatus::Failed);
        assert_eq!(session.segments[1].status, SegmentStatus::Pending);
        assert_eq!(session.progress().running, 0);
        assert!(!session.interrupt());
    }

    #[test]
    fn test_changes_cover_done_segments_only() {
        let mut session = session_with(2);
        run(&mut session, 0, Ok("paragraph zero".into()));
        session.begin_segment(1).unwrap();

        let changes = session.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].segment_index, 0);
        assert_eq!(session.changes(), changes);
    }
}
