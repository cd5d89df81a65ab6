//! Session registry
//!
//! An arena of sessions keyed by id. Each session sits behind its own lock;
//! the arena lock is only held to find, insert or remove a handle. With a
//! database pool attached every transition is written through.

use chrono::{DateTime, Utc};
use polish_common::api::OwnerId;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiResult, OptimizerError};
use crate::models::{Session, SessionSummary};

pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    owner: OwnerId,
    created_at: DateTime<Utc>,
    handle: SessionHandle,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    db: Option<SqlitePool>,
}

impl SessionRegistry {
    pub fn in_memory() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            db: None,
        }
    }

    pub fn with_database(pool: SqlitePool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            db: Some(pool),
        }
    }

    /// Load persisted sessions into the arena
    ///
    /// Sessions left non-terminal by the previous run are marked failed along
    /// with their unfinished segments, so the user can retry them. Stopped
    /// sessions keep their status but lose any segment still `running`.
    pub async fn restore(&self) -> ApiResult<usize> {
        let Some(pool) = &self.db else {
            return Ok(0);
        };

        let loaded = db::sessions::load_sessions(pool).await?;
        let count = loaded.len();
        let mut sessions = self.sessions.write().await;

        for mut session in loaded {
            if session.interrupt() {
                tracing::warn!(
                    session_id = %session.session_id,
                    status = ?session.status,
                    "Session interrupted by restart; unfinished segments marked failed"
                );
                db::sessions::save_session(pool, &session).await?;
            }
            sessions.insert(
                session.session_id,
                Entry {
                    owner: session.owner.clone(),
                    created_at: session.created_at,
                    handle: Arc::new(Mutex::new(session)),
                },
            );
        }

        tracing::info!(count, "Sessions restored from database");
        Ok(count)
    }

    pub async fn create(&self, session: Session) -> ApiResult<SessionHandle> {
        if let Some(pool) = &self.db {
            db::sessions::save_session(pool, &session).await?;
        }

        let session_id = session.session_id;
        let entry = Entry {
            owner: session.owner.clone(),
            created_at: session.created_at,
            handle: Arc::new(Mutex::new(session)),
        };
        let handle = Arc::clone(&entry.handle);
        self.sessions.write().await.insert(session_id, entry);
        Ok(handle)
    }

    /// Session owned by `owner`; other owners' sessions are not found
    pub async fn get(&self, session_id: Uuid, owner: &OwnerId) -> ApiResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .filter(|entry| &entry.owner == owner)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or(OptimizerError::SessionNotFound(session_id))
    }

    /// Unscoped lookup for the dispatch path
    pub async fn handle(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Summaries of `owner`'s sessions, most recent first
    pub async fn list(&self, owner: &OwnerId) -> Vec<SessionSummary> {
        let mut handles: Vec<(DateTime<Utc>, SessionHandle)> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|entry| &entry.owner == owner)
            .map(|entry| (entry.created_at, Arc::clone(&entry.handle)))
            .collect();
        handles.sort_by(|a, b| b.0.cmp(&a.0));

        let mut summaries = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            summaries.push(handle.lock().await.summary());
        }
        summaries
    }

    /// Every handle, oldest first
    pub async fn all_by_age(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<(DateTime<Utc>, Uuid, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (entry.created_at, *id, Arc::clone(&entry.handle)))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        handles.into_iter().map(|(_, _, handle)| handle).collect()
    }

    /// Write through one transition; `indices` are the segments it touched
    pub async fn persist(&self, session: &Session, indices: &[usize]) -> ApiResult<()> {
        if let Some(pool) = &self.db {
            db::sessions::save_segments(pool, session, indices).await?;
        }
        Ok(())
    }

    /// Remove from the arena and storage; call with the session lock held
    pub async fn remove(&self, session_id: Uuid) -> ApiResult<()> {
        if let Some(pool) = &self.db {
            db::sessions::delete_session(pool, session_id).await?;
        }
        self.sessions.write().await.remove(&session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptimizationOptions, Segment, SegmentStatus, SessionStatus};

    fn session(owner: &str) -> Session {
        Session::new(
            OwnerId::from_digest(owner),
            None,
            OptimizationOptions::default(),
            vec![Segment::new(0, "text", "")],
        )
    }

    #[tokio::test]
    async fn test_foreign_owner_sees_not_found() {
        let registry = SessionRegistry::in_memory();
        let handle = registry.create(session("alice")).await.unwrap();
        let id = handle.lock().await.session_id;

        assert!(registry.get(id, &OwnerId::from_digest("alice")).await.is_ok());
        assert!(matches!(
            registry.get(id, &OwnerId::from_digest("bob")).await,
            Err(OptimizerError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let registry = SessionRegistry::in_memory();
        let first = registry.create(session("alice")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = registry.create(session("alice")).await.unwrap();
        registry.create(session("bob")).await.unwrap();

        let listed = registry.list(&OwnerId::from_digest("alice")).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, second.lock().await.session_id);
        assert_eq!(listed[1].session_id, first.lock().await.session_id);
    }

    #[tokio::test]
    async fn test_restore_fails_interrupted_sessions() {
        let pool = db::init_memory_pool().await.unwrap();
        let registry = SessionRegistry::with_database(pool.clone());
        let handle = registry.create(session("alice")).await.unwrap();
        let id = {
            let mut s = handle.lock().await;
            s.begin_segment(0).unwrap();
            registry.persist(&s, &[0]).await.unwrap();
            s.session_id
        };

        let restarted = SessionRegistry::with_database(pool);
        assert_eq!(restarted.restore().await.unwrap(), 1);

        let restored = restarted.get(id, &OwnerId::from_digest("alice")).await.unwrap();
        let restored = restored.lock().await;
        assert_eq!(restored.status, SessionStatus::Failed);
        assert!(restored.segments[0].error.is_some());
    }

    #[tokio::test]
    async fn test_restore_fails_in_flight_segment_of_stopped_session() {
        let pool = db::init_memory_pool().await.unwrap();
        let registry = SessionRegistry::with_database(pool.clone());
        let handle = registry.create(session("alice")).await.unwrap();
        let id = {
            let mut s = handle.lock().await;
            s.begin_segment(0).unwrap();
            registry.persist(&s, &[0]).await.unwrap();
            s.stop().unwrap();
            registry.persist(&s, &[]).await.unwrap();
            s.session_id
        };

        let restarted = SessionRegistry::with_database(pool.clone());
        restarted.restore().await.unwrap();

        let restored = restarted.get(id, &OwnerId::from_digest("alice")).await.unwrap();
        let restored = restored.lock().await;
        assert_eq!(restored.status, SessionStatus::Stopped);
        assert_eq!(restored.segments[0].status, SegmentStatus::Failed);
        assert_eq!(restored.progress().running, 0);
        drop(restored);

        // The repair was written back, so a second restart sees it too
        let again = SessionRegistry::with_database(pool);
        again.restore().await.unwrap();
        let reloaded = again.get(id, &OwnerId::from_digest("alice")).await.unwrap();
        assert_eq!(reloaded.lock().await.segments[0].status, SegmentStatus::Failed);
    }
}
