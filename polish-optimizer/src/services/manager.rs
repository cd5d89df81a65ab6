//! Optimization session manager
//!
//! Facade over the registry, scheduler, worker pool, publisher and provider
//! pool. Every session mutation happens under that session's lock, and the
//! events it produces are published and written through before the lock is
//! released, so subscribers and storage see transitions in the order they
//! were applied.
//!
//! # Dispatch
//! The dispatch loop takes the next ready entry in round-robin order, waits
//! for a free worker slot, leases the segment and spawns the provider call.
//! The worker records the outcome and frees its slot.

use chrono::Utc;
use futures::Stream;
use polish_common::api::OwnerId;
use polish_common::events::{ProgressEvent, SessionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::changes::ChangeRecord;
use crate::config::{OptimizerConfig, SegmentationConfig};
use crate::error::{ApiResult, OptimizerError};
use crate::models::{
    ExportArtifact, ExportConfirmation, ExportTerms, Lease, OptimizationOptions, Segment, Session,
    SessionSnapshot, SessionSummary,
};
use crate::provider::{
    HealthReport, ModelProvider, OptimizationRequest, ProviderError, ProviderPool,
};
use crate::segmenter::{self, SplitPolicy};
use crate::services::publisher::{self, ProgressPublisher};
use crate::services::registry::{SessionHandle, SessionRegistry};
use crate::services::scheduler::{QueueEntry, Scheduler};
use crate::services::worker_pool::WorkerPool;

/// How long shutdown waits for in-flight provider calls
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST /api/optimization/start`
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub document: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub options: OptimizationOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub segment_count: usize,
}

/// Queue position of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionQueueInfo {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// 1-based position among queued sessions, oldest first
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued_sessions: usize,
    pub running_sessions: usize,
    pub max_active_sessions: usize,
    pub ready_segments: usize,
    pub busy_workers: usize,
    pub worker_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionQueueInfo>,
}

/// Full session with every segment
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub options: OptimizationOptions,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopAck {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// False if the session was already terminal
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub retried_segments: Vec<usize>,
}

/// Request limits taken from configuration
#[derive(Debug, Clone)]
struct Limits {
    max_document_chars: usize,
    max_segments_per_session: usize,
    segmentation: SegmentationConfig,
}

pub struct OptimizationManager {
    registry: Arc<SessionRegistry>,
    scheduler: Scheduler,
    publisher: Arc<ProgressPublisher>,
    workers: WorkerPool,
    providers: Arc<ProviderPool>,
    terms: ExportTerms,
    limits: Limits,
}

impl OptimizationManager {
    pub fn new(
        config: &OptimizerConfig,
        registry: Arc<SessionRegistry>,
        providers: Arc<ProviderPool>,
    ) -> Self {
        Self {
            registry,
            scheduler: Scheduler::new(config.scheduler.max_active_sessions),
            publisher: Arc::new(ProgressPublisher::new(config.stream.channel_capacity)),
            workers: WorkerPool::new(config.scheduler.worker_pool_size),
            providers,
            terms: ExportTerms::current(),
            limits: Limits {
                max_document_chars: config.scheduler.max_document_chars,
                max_segments_per_session: config.scheduler.max_segments_per_session,
                segmentation: config.segmentation.clone(),
            },
        }
    }

    pub fn terms(&self) -> &ExportTerms {
        &self.terms
    }

    pub fn providers(&self) -> &Arc<ProviderPool> {
        &self.providers
    }

    pub async fn health(&self) -> HealthReport {
        self.providers.report().await
    }

    // ========================================
    // Session operations
    // ========================================

    /// Validate, split and admit a new session
    pub async fn start(&self, owner: OwnerId, request: StartRequest) -> ApiResult<StartResponse> {
        let StartRequest {
            document,
            title,
            options,
        } = request;

        let policy = self.validate_start(&document, &options)?;
        self.providers
            .ensure_available(options.model.as_deref())
            .await
            .map_err(|e| OptimizerError::ProviderUnavailable(e.to_string()))?;

        let segments = segmenter::split(&document, &policy);
        if segments.len() > self.limits.max_segments_per_session {
            return Err(OptimizerError::Validation(format!(
                "document splits into {} segments (limit {}); use a larger segment size",
                segments.len(),
                self.limits.max_segments_per_session
            )));
        }

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let session = Session::new(owner, title, options, segments);
        let session_id = session.session_id;
        let segment_count = session.segments.len();

        self.scheduler.admit(session_id).await?;
        if let Err(e) = self.registry.create(session).await {
            self.scheduler.release(session_id).await;
            return Err(e);
        }
        self.scheduler.enqueue(session_id, 0..segment_count).await;

        tracing::info!(
            session_id = %session_id,
            segments = segment_count,
            chars = document.chars().count(),
            "Optimization session queued"
        );

        Ok(StartResponse {
            session_id,
            status: SessionStatus::Queued,
            segment_count,
        })
    }

    fn validate_start(&self, document: &str, options: &OptimizationOptions) -> ApiResult<SplitPolicy> {
        if document.trim().is_empty() {
            return Err(OptimizerError::Validation("document is empty".to_string()));
        }

        let chars = document.chars().count();
        if chars > self.limits.max_document_chars {
            return Err(OptimizerError::Validation(format!(
                "document has {} characters (limit {})",
                chars, self.limits.max_document_chars
            )));
        }

        let seg = &self.limits.segmentation;
        let max_chars = options.max_segment_chars.unwrap_or(seg.default_max_chars);
        if !(seg.min_max_chars..=seg.max_max_chars).contains(&max_chars) {
            return Err(OptimizerError::Validation(format!(
                "max_segment_chars must be between {} and {}",
                seg.min_max_chars, seg.max_max_chars
            )));
        }

        if let Some(model) = options.model.as_deref() {
            if !self.providers.contains(model) {
                return Err(OptimizerError::Validation(format!("unknown model: {}", model)));
            }
        }

        Ok(SplitPolicy::new(max_chars))
    }

    /// Queue counters, plus one session's position when asked
    pub async fn queue_status(&self, owner: &OwnerId, session_id: Option<Uuid>) -> ApiResult<QueueStatus> {
        if let Some(id) = session_id {
            self.registry.get(id, owner).await?;
        }

        let mut queued_sessions = 0;
        let mut running_sessions = 0;
        let mut session = None;

        for handle in self.registry.all_by_age().await {
            let s = handle.lock().await;
            let position = match s.status {
                SessionStatus::Queued => {
                    queued_sessions += 1;
                    Some(queued_sessions)
                }
                SessionStatus::Running => {
                    running_sessions += 1;
                    None
                }
                _ => None,
            };
            if Some(s.session_id) == session_id {
                session = Some(SessionQueueInfo {
                    session_id: s.session_id,
                    status: s.status,
                    position,
                });
            }
        }

        Ok(QueueStatus {
            queued_sessions,
            running_sessions,
            max_active_sessions: self.scheduler.max_active(),
            ready_segments: self.scheduler.ready_segments().await,
            busy_workers: self.workers.busy(),
            worker_capacity: self.workers.size(),
            session,
        })
    }

    pub async fn list(&self, owner: &OwnerId) -> Vec<SessionSummary> {
        self.registry.list(owner).await
    }

    pub async fn detail(&self, owner: &OwnerId, session_id: Uuid) -> ApiResult<SessionDetail> {
        let handle = self.registry.get(session_id, owner).await?;
        let session = handle.lock().await;
        Ok(SessionDetail {
            summary: session.summary(),
            options: session.options.clone(),
            segments: session.segments.clone(),
        })
    }

    /// Shared read accessor behind polling and the stream's snapshots
    pub async fn progress(&self, owner: &OwnerId, session_id: Uuid) -> ApiResult<SessionSnapshot> {
        let handle = self.registry.get(session_id, owner).await?;
        let snapshot = handle.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn changes(&self, owner: &OwnerId, session_id: Uuid) -> ApiResult<Vec<ChangeRecord>> {
        let handle = self.registry.get(session_id, owner).await?;
        let changes = handle.lock().await.changes();
        Ok(changes)
    }

    /// Cooperative stop; stopping a terminal session is acknowledged as-is
    pub async fn stop(&self, owner: &OwnerId, session_id: Uuid) -> ApiResult<StopAck> {
        let handle = self.registry.get(session_id, owner).await?;
        let mut session = handle.lock().await;

        if session.is_terminal() {
            return Ok(StopAck {
                session_id,
                status: session.status,
                stopped: false,
            });
        }

        self.stop_locked(&mut session).await?;
        Ok(StopAck {
            session_id,
            status: session.status,
            stopped: true,
        })
    }

    async fn stop_locked(&self, session: &mut Session) -> ApiResult<()> {
        let session_id = session.session_id;
        let events = session
            .stop()
            .map_err(|e| OptimizerError::Internal(e.to_string()))?;

        self.scheduler.release(session_id).await;
        self.publisher.publish(session_id, events).await;
        self.registry.persist(session, &[]).await?;

        let in_flight = session.progress().running;
        tracing::info!(
            session_id = %session_id,
            in_flight,
            "Optimization session stopped"
        );
        Ok(())
    }

    /// Export the assembled document; repeated exports return the same artifact
    pub async fn export(
        &self,
        owner: &OwnerId,
        session_id: Uuid,
        confirmation: &ExportConfirmation,
    ) -> ApiResult<ExportArtifact> {
        let handle = self.registry.get(session_id, owner).await?;

        if !self.terms.accepts(confirmation) {
            return Err(OptimizerError::ConfirmationRequired);
        }

        let mut session = handle.lock().await;
        if let Some(artifact) = &session.export {
            return Ok(artifact.clone());
        }

        if session.status != SessionStatus::Completed {
            return Err(OptimizerError::SessionBusy(format!(
                "session is {}; only completed sessions can be exported",
                session.status.as_str()
            )));
        }

        let document = session.assemble()?;
        let artifact = ExportArtifact {
            session_id,
            title: session.title.clone(),
            document,
            segment_count: session.segments.len(),
            confirmation_token: self.terms.token.clone(),
            exported_at: Utc::now(),
        };

        session.export = Some(artifact.clone());
        session.updated_at = artifact.exported_at;
        self.registry.persist(&session, &[]).await?;

        tracing::info!(session_id = %session_id, "Optimization session exported");
        Ok(artifact)
    }

    /// Delete a terminal session; `force` stops a non-terminal one first
    pub async fn delete(&self, owner: &OwnerId, session_id: Uuid, force: bool) -> ApiResult<()> {
        let handle = self.registry.get(session_id, owner).await?;
        let mut session = handle.lock().await;

        if !session.is_terminal() {
            if !force {
                return Err(OptimizerError::SessionBusy(format!(
                    "session is {}; stop it before deleting",
                    session.status.as_str()
                )));
            }
            self.stop_locked(&mut session).await?;
        }

        self.scheduler.release(session_id).await;
        self.registry.remove(session_id).await?;
        self.publisher.close(session_id).await;

        tracing::info!(session_id = %session_id, force, "Optimization session deleted");
        Ok(())
    }

    /// Re-enqueue the failed segments of a failed session
    pub async fn retry(&self, owner: &OwnerId, session_id: Uuid) -> ApiResult<RetryResponse> {
        let handle = self.registry.get(session_id, owner).await?;
        let mut session = handle.lock().await;

        match session.status {
            SessionStatus::Failed => {}
            SessionStatus::Queued | SessionStatus::Running => {
                return Err(OptimizerError::SessionBusy(format!(
                    "session is {}",
                    session.status.as_str()
                )))
            }
            other => {
                return Err(OptimizerError::Validation(format!(
                    "session is {}; only failed sessions can be retried",
                    other.as_str()
                )))
            }
        }

        self.providers
            .ensure_available(session.options.model.as_deref())
            .await
            .map_err(|e| OptimizerError::ProviderUnavailable(e.to_string()))?;
        self.scheduler.admit(session_id).await?;

        let (indices, events) = session
            .reset_failed()
            .map_err(|e| OptimizerError::Internal(e.to_string()))?;

        self.publisher.publish(session_id, events).await;
        self.scheduler.enqueue(session_id, indices.iter().copied()).await;
        self.registry.persist(&session, &indices).await?;

        tracing::info!(
            session_id = %session_id,
            segments = indices.len(),
            "Retrying failed segments"
        );

        Ok(RetryResponse {
            session_id,
            status: session.status,
            retried_segments: indices,
        })
    }

    /// Snapshot followed by live deltas until the session is terminal
    pub async fn subscribe(
        &self,
        owner: &OwnerId,
        session_id: Uuid,
    ) -> ApiResult<impl Stream<Item = ProgressEvent>> {
        let handle = self.registry.get(session_id, owner).await?;
        Ok(publisher::subscribe_stream(Arc::clone(&self.publisher), handle).await)
    }

    // ========================================
    // Dispatch
    // ========================================

    /// Dispatch ready segments until `cancel` fires, then drain in-flight work
    pub async fn run_dispatch_loop(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(workers = self.workers.size(), "Dispatch loop started");

        loop {
            let Some(entry) = self.scheduler.next_ready(&cancel).await else {
                break;
            };

            // The entry is leased only once a worker is free, so a stop that
            // lands while we wait still wins
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.workers.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if let Some(job) = self.lease(entry).await {
                let manager = Arc::clone(&self);
                tokio::spawn(async move { manager.run_segment(job, permit).await });
            }
        }

        if tokio::time::timeout(DRAIN_TIMEOUT, self.workers.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("In-flight segments still running at shutdown");
        }
        tracing::info!("Dispatch loop stopped");
    }

    /// Lease a queued segment; `None` if the entry went stale
    async fn lease(&self, entry: QueueEntry) -> Option<Job> {
        let handle = self.registry.handle(entry.session_id).await?;
        let mut session = handle.lock().await;

        let (lease, events) = match session.begin_segment(entry.segment_index) {
            Ok(leased) => leased,
            Err(e) => {
                tracing::debug!(
                    session_id = %entry.session_id,
                    segment_index = entry.segment_index,
                    reason = %e,
                    "Skipping stale queue entry"
                );
                return None;
            }
        };

        let provider = self.providers.select(session.options.model.as_deref()).await;
        let request = OptimizationRequest {
            session_id: lease.session_id,
            segment_index: lease.segment_index,
            attempt: lease.attempt,
            system_prompt: session.options.system_prompt(),
            text: lease.source.clone(),
        };

        self.publisher.publish(lease.session_id, events).await;
        if let Err(e) = self.registry.persist(&session, &[lease.segment_index]).await {
            tracing::error!(session_id = %lease.session_id, error = %e, "Failed to persist dispatch");
        }

        drop(session);
        Some(Job {
            handle,
            lease,
            request,
            provider,
        })
    }

    async fn run_segment(self: Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        let Job {
            handle,
            lease,
            request,
            provider,
        } = job;

        let outcome = match provider {
            Ok(provider) => {
                tracing::debug!(
                    session_id = %lease.session_id,
                    segment_index = lease.segment_index,
                    attempt = lease.attempt,
                    provider = provider.name(),
                    "Executing segment"
                );
                WorkerPool::execute(provider.as_ref(), &request).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::warn!(
                session_id = %lease.session_id,
                segment_index = lease.segment_index,
                attempt = lease.attempt,
                error = %e,
                "Segment execution failed"
            );
        }

        self.complete(&handle, &lease, outcome).await;
        drop(permit);
    }

    /// Record a worker outcome on the session
    async fn complete(&self, handle: &SessionHandle, lease: &Lease, outcome: Result<String, ProviderError>) {
        let mut session = handle.lock().await;
        let session_id = session.session_id;

        let events = match session.finish_segment(
            lease.segment_index,
            lease.attempt,
            outcome.map_err(|e| e.to_string()),
        ) {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    segment_index = lease.segment_index,
                    error = %e,
                    "Invalid segment completion"
                );
                return;
            }
        };

        self.publisher.publish(session_id, events).await;

        // Deleted while in flight
        if self.registry.handle(session_id).await.is_none() {
            return;
        }

        if let Err(e) = self.registry.persist(&session, &[lease.segment_index]).await {
            tracing::error!(session_id = %session_id, error = %e, "Failed to persist segment result");
        }

        if session.is_terminal() && session.status != SessionStatus::Stopped {
            self.scheduler.release(session_id).await;
            let progress = session.progress();
            tracing::info!(
                session_id = %session_id,
                status = session.status.as_str(),
                done = progress.done,
                failed = progress.failed,
                "Optimization session finished"
            );
        }
    }
}

/// A leased segment on its way to a worker
struct Job {
    handle: SessionHandle,
    lease: Lease,
    request: OptimizationRequest,
    provider: Result<Arc<dyn ModelProvider>, ProviderError>,
}
