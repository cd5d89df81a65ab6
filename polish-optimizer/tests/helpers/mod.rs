//! Shared fixtures for polish-optimizer integration tests
//!
//! Scripted in-process providers and builders for a manager with a running
//! dispatch loop or a full router.

#![allow(dead_code)]

use async_trait::async_trait;
use polish_common::api::{CardKeySet, OwnerId};
use polish_common::events::SessionStatus;
use polish_optimizer::config::OptimizerConfig;
use polish_optimizer::provider::{
    ModelHealth, ModelProvider, OptimizationRequest, ProviderError, ProviderPool,
};
use polish_optimizer::services::{OptimizationManager, SessionRegistry};
use polish_optimizer::AppState;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const CARD_KEY: &str = "test-card-key";

/// Segment size used by [`document`]; each paragraph gets its own segment
pub const SEGMENT_CHARS: usize = 60;

/// Provider whose behavior is set per test
///
/// By default it echoes the segment back. A gated provider holds every call
/// until the test releases it.
pub struct ScriptedProvider {
    name: String,
    /// Segment indices whose first attempt fails
    fail_first_attempt: HashSet<usize>,
    gate: Option<Arc<Semaphore>>,
    rewrite: Option<fn(&str) -> String>,
    calls: Mutex<Vec<(Uuid, usize)>>,
    probe: Mutex<ModelHealth>,
}

impl ScriptedProvider {
    pub fn identity(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_first_attempt: HashSet::new(),
            gate: None,
            rewrite: None,
            calls: Mutex::new(Vec::new()),
            probe: Mutex::new(ModelHealth::available(Duration::from_millis(1))),
        }
    }

    pub fn failing_first_attempt(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.fail_first_attempt.extend(indices);
        self
    }

    /// Every call waits for one permit released through the returned gate
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn rewriting(mut self, rewrite: fn(&str) -> String) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    pub fn set_probe(&self, health: ModelHealth) {
        *self.probe.lock().unwrap() = health;
    }

    /// Every call in the order it started
    pub fn calls(&self) -> Vec<(Uuid, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn optimize(&self, request: &OptimizationRequest) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.session_id, request.segment_index));

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if request.attempt == 1 && self.fail_first_attempt.contains(&request.segment_index) {
            return Err(ProviderError::Transport("scripted failure".to_string()));
        }

        Ok(match self.rewrite {
            Some(rewrite) => rewrite(&request.text),
            None => request.text.clone(),
        })
    }

    async fn probe(&self) -> ModelHealth {
        self.probe.lock().unwrap().clone()
    }
}

/// Provider list for the pool
pub fn providers(provider: &Arc<ScriptedProvider>) -> Vec<Arc<dyn ModelProvider>> {
    vec![Arc::clone(provider) as Arc<dyn ModelProvider>]
}

/// Config sized for tests: small segments, explicit pool and admission limits
pub fn test_config(workers: usize, max_active: usize) -> OptimizerConfig {
    let mut config = OptimizerConfig::default();
    config.database.in_memory = true;
    config.scheduler.worker_pool_size = workers;
    config.scheduler.max_active_sessions = max_active;
    config.segmentation.min_max_chars = 20;
    config.segmentation.default_max_chars = SEGMENT_CHARS;
    config.stream.heartbeat_secs = 1;
    config
}

/// Manager with its dispatch loop running
pub struct TestManager {
    pub manager: Arc<OptimizationManager>,
    pub shutdown: CancellationToken,
    pub dispatch: JoinHandle<()>,
}

impl TestManager {
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.dispatch.await;
    }
}

pub fn test_manager(
    config: &OptimizerConfig,
    providers: Vec<Arc<dyn ModelProvider>>,
) -> TestManager {
    let registry = Arc::new(SessionRegistry::in_memory());
    let providers = Arc::new(ProviderPool::new(providers));
    let manager = Arc::new(OptimizationManager::new(config, registry, providers));

    let shutdown = CancellationToken::new();
    let dispatch = tokio::spawn(Arc::clone(&manager).run_dispatch_loop(shutdown.clone()));

    TestManager {
        manager,
        shutdown,
        dispatch,
    }
}

/// App state around a running manager, accepting [`CARD_KEY`]
pub fn test_app(config: OptimizerConfig, providers: Vec<Arc<dyn ModelProvider>>) -> (AppState, TestManager) {
    let harness = test_manager(&config, providers);
    let state = AppState::new(
        Arc::clone(&harness.manager),
        CardKeySet::from_entries([CARD_KEY]),
        Arc::new(config),
    );
    (state, harness)
}

pub fn owner() -> OwnerId {
    owner_for(CARD_KEY)
}

pub fn owner_for(card_key: &str) -> OwnerId {
    CardKeySet::from_entries([card_key])
        .validate(Some(card_key))
        .unwrap()
}

/// Document of `paragraphs` paragraphs separated by blank lines
///
/// Each paragraph is longer than half of [`SEGMENT_CHARS`], so with that
/// segment size every paragraph becomes exactly one segment.
pub fn document(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| format!("Paragraph {:02} states one claim about teh results.", i))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Poll `check` until it returns true or five seconds pass
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the session reaches `status`
pub async fn wait_for_status(
    manager: &OptimizationManager,
    owner: &OwnerId,
    session_id: Uuid,
    status: SessionStatus,
) {
    wait_until(&format!("session {} to be {:?}", session_id, status), || async {
        manager
            .progress(owner, session_id)
            .await
            .map(|snapshot| snapshot.status == status)
            .unwrap_or(false)
    })
    .await;
}
