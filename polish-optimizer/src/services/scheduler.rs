//! Session admission and ready-segment queue
//!
//! Admission bounds the number of queued + running sessions. Ready segments
//! are kept per session in index order; sessions take turns in a round-robin
//! rotation so a long document never starves a short one.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::OptimizerError;

/// One ready unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub session_id: Uuid,
    pub segment_index: usize,
}

#[derive(Debug, Default)]
struct SchedulerState {
    /// Admitted sessions that have not reached a terminal status
    active: HashSet<Uuid>,
    /// Sessions with ready segments, in turn order
    rotation: VecDeque<Uuid>,
    ready: HashMap<Uuid, BTreeSet<usize>>,
}

pub struct Scheduler {
    state: Mutex<SchedulerState>,
    ready_signal: Notify,
    max_active: usize,
}

impl Scheduler {
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            ready_signal: Notify::new(),
            max_active,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Reserve an active-session slot
    ///
    /// Re-admitting a session that already holds a slot is a no-op.
    pub async fn admit(&self, session_id: Uuid) -> Result<(), OptimizerError> {
        let mut state = self.state.lock().await;
        if state.active.contains(&session_id) {
            return Ok(());
        }
        if state.active.len() >= self.max_active {
            return Err(OptimizerError::QueueSaturated {
                active: state.active.len(),
                limit: self.max_active,
            });
        }
        state.active.insert(session_id);
        Ok(())
    }

    /// Mark segments of an admitted session ready for dispatch
    pub async fn enqueue(&self, session_id: Uuid, indices: impl IntoIterator<Item = usize>) {
        let mut state = self.state.lock().await;
        let ready = state.ready.entry(session_id).or_default();
        ready.extend(indices);
        if ready.is_empty() {
            state.ready.remove(&session_id);
            return;
        }
        if !state.rotation.contains(&session_id) {
            state.rotation.push_back(session_id);
        }
        drop(state);
        self.ready_signal.notify_one();
    }

    /// Drop a session's slot and every ready segment it still has
    pub async fn release(&self, session_id: Uuid) {
        let mut state = self.state.lock().await;
        state.active.remove(&session_id);
        state.ready.remove(&session_id);
        state.rotation.retain(|id| *id != session_id);
    }

    /// Next entry in turn order, if any
    ///
    /// The session at the head of the rotation yields its lowest ready index
    /// and moves to the back if it has more.
    pub async fn dequeue_ready(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock().await;
        while let Some(session_id) = state.rotation.pop_front() {
            let Some(ready) = state.ready.get_mut(&session_id) else {
                continue;
            };
            let Some(segment_index) = ready.pop_first() else {
                state.ready.remove(&session_id);
                continue;
            };
            if ready.is_empty() {
                state.ready.remove(&session_id);
            } else {
                state.rotation.push_back(session_id);
            }
            return Some(QueueEntry {
                session_id,
                segment_index,
            });
        }
        None
    }

    /// Wait for the next ready entry; `None` once `cancel` fires
    pub async fn next_ready(&self, cancel: &CancellationToken) -> Option<QueueEntry> {
        loop {
            let notified = self.ready_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.dequeue_ready().await {
                return Some(entry);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn ready_segments(&self) -> usize {
        self.state.lock().await.ready.values().map(BTreeSet::len).sum()
    }
}
