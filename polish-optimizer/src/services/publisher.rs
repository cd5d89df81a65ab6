//! Per-session progress fan-out
//!
//! One bounded broadcast channel per session with subscribers. Publishing
//! never waits: a subscriber that falls more than the channel capacity
//! behind loses the backlog and is resynchronized with a fresh snapshot.
//!
//! Publishing and subscribing both happen under the session lock, so a new
//! subscriber's snapshot and the first delta it receives never overlap.

use futures::Stream;
use polish_common::events::ProgressEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::services::registry::SessionHandle;

pub struct ProgressPublisher {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver events in order; the channel is closed after a terminal event
    pub async fn publish(&self, session_id: Uuid, events: Vec<ProgressEvent>) {
        let terminal = events
            .iter()
            .any(|e| matches!(e, ProgressEvent::SessionTerminal { .. }));

        {
            let channels = self.channels.read().await;
            let Some(sender) = channels.get(&session_id) else {
                return;
            };
            for event in events {
                tracing::debug!(
                    session_id = %session_id,
                    event = event.event_type(),
                    "Publishing progress event"
                );
                // No receivers left is not an error
                let _ = sender.send(event);
            }
        }

        if terminal {
            self.close(session_id).await;
        }
    }

    /// Receiver for live deltas; call with the session lock held
    pub async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop the session's channel; open streams end
    pub async fn close(&self, session_id: Uuid) {
        if self.channels.write().await.remove(&session_id).is_some() {
            tracing::debug!(session_id = %session_id, "Progress channel closed");
        }
    }
}

/// Snapshot first, then live deltas until the session is terminal
///
/// Returns an empty stream tail for a session that is already terminal.
pub async fn subscribe_stream(
    publisher: Arc<ProgressPublisher>,
    handle: SessionHandle,
) -> impl Stream<Item = ProgressEvent> {
    let (session_id, snapshot, receiver) = {
        let session = handle.lock().await;
        let snapshot = session.snapshot().to_event();
        let receiver = if session.is_terminal() {
            None
        } else {
            Some(publisher.subscribe(session.session_id).await)
        };
        (session.session_id, snapshot, receiver)
    };

    async_stream::stream! {
        yield snapshot;

        let Some(mut receiver) = receiver else {
            return;
        };

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let ends = event.ends_stream();
                    yield event;
                    if ends {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        session_id = %session_id,
                        skipped,
                        "Subscriber lagged; resynchronizing with snapshot"
                    );
                    let (snapshot, resubscribed) = {
                        let session = handle.lock().await;
                        let snapshot = session.snapshot().to_event();
                        let resubscribed = if session.is_terminal() {
                            None
                        } else {
                            Some(publisher.subscribe(session_id).await)
                        };
                        (snapshot, resubscribed)
                    };
                    yield snapshot;
                    match resubscribed {
                        Some(fresh) => receiver = fresh,
                        None => break,
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptimizationOptions, Segment, Session, SessionStatus};
    use futures::StreamExt;
    use polish_common::api::OwnerId;
    use tokio::sync::Mutex;

    fn handle_with(count: usize) -> SessionHandle {
        let segments = (0..count)
            .map(|i| Segment::new(i, format!("paragraph {i}"), "\n\n"))
            .collect();
        Arc::new(Mutex::new(Session::new(
            OwnerId::from_digest("owner"),
            None,
            OptimizationOptions::default(),
            segments,
        )))
    }

    #[tokio::test]
    async fn test_lagging_subscriber_resyncs_with_snapshot() {
        let publisher = Arc::new(ProgressPublisher::new(1));
        let handle = handle_with(4);
        let stream = subscribe_stream(publisher.clone(), handle.clone()).await;
        let mut stream = Box::pin(stream);

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type(), "SessionSnapshot");

        // Every transition is published before the subscriber reads again
        for index in 0..4 {
            let mut session = handle.lock().await;
            let session_id = session.session_id;
            let (lease, events) = session.begin_segment(index).unwrap();
            publisher.publish(session_id, events).await;
            let events = session
                .finish_segment(index, lease.attempt, Ok(format!("paragraph {index}")))
                .unwrap();
            publisher.publish(session_id, events).await;
        }

        let rest: Vec<ProgressEvent> = stream.collect().await;
        assert_eq!(rest.len(), 1);
        match &rest[0] {
            ProgressEvent::SessionSnapshot { status, progress, .. } => {
                assert_eq!(*status, SessionStatus::Completed);
                assert_eq!(progress.done, 4);
            }
            other => panic!("expected a snapshot, got {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn test_terminal_session_stream_is_snapshot_only() {
        let publisher = Arc::new(ProgressPublisher::new(8));
        let handle = handle_with(1);
        handle.lock().await.stop().unwrap();

        let events: Vec<ProgressEvent> =
            subscribe_stream(publisher, handle).await.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].ends_stream());
    }
}
