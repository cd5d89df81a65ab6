//! Configured providers and their health
//!
//! Health starts optimistic and is refreshed by periodic probes. Dispatch
//! never selects a provider whose last probe reported `unavailable`.

use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ModelHealth, ModelProvider, ModelStatus, ProviderError};

/// Service-wide model availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Every model available
    Healthy,
    /// Some models down or slow, at least one still usable
    Degraded,
    /// No usable model
    Unavailable,
}

/// Body of `GET /api/health/models`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub available_models: Vec<String>,
    pub models: BTreeMap<String, ModelHealth>,
}

pub struct ProviderPool {
    providers: Vec<Arc<dyn ModelProvider>>,
    health: RwLock<HashMap<String, ModelHealth>>,
    probe_timeout: Duration,
    degraded_latency: Duration,
}

impl ProviderPool {
    pub fn new(providers: Vec<Arc<dyn ModelProvider>>) -> Self {
        let health = providers
            .iter()
            .map(|p| (p.name().to_string(), ModelHealth::unchecked()))
            .collect();

        Self {
            providers,
            health: RwLock::new(health),
            probe_timeout: Duration::from_secs(10),
            degraded_latency: Duration::from_secs(5),
        }
    }

    pub fn with_probe_limits(mut self, probe_timeout: Duration, degraded_latency: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self.degraded_latency = degraded_latency;
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.name() == name)
    }

    async fn status_of(&self, name: &str) -> ModelStatus {
        self.health
            .read()
            .await
            .get(name)
            .map(|h| h.status)
            .unwrap_or(ModelStatus::Unavailable)
    }

    /// Provider for the next segment: the pinned one, else the first usable
    pub async fn select(&self, pinned: Option<&str>) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        if let Some(name) = pinned {
            let provider = self
                .providers
                .iter()
                .find(|p| p.name() == name)
                .ok_or_else(|| ProviderError::Unavailable(format!("model {} is not configured", name)))?;

            return if self.status_of(name).await.is_usable() {
                Ok(Arc::clone(provider))
            } else {
                Err(ProviderError::Unavailable(format!("model {} is unavailable", name)))
            };
        }

        let health = self.health.read().await;
        self.providers
            .iter()
            .find(|p| {
                health
                    .get(p.name())
                    .map(|h| h.status.is_usable())
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| ProviderError::Unavailable("all configured models are down".to_string()))
    }

    /// Admission check for a new session
    pub async fn ensure_available(&self, pinned: Option<&str>) -> Result<(), ProviderError> {
        self.select(pinned).await.map(|_| ())
    }

    /// Probe every provider concurrently and store the results
    pub async fn refresh(&self) {
        let probes = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let probe_timeout = self.probe_timeout;
            async move {
                let health = match tokio::time::timeout(probe_timeout, provider.probe()).await {
                    Ok(health) => health,
                    Err(_) => ModelHealth::unavailable(format!(
                        "probe timed out after {}s",
                        probe_timeout.as_secs()
                    )),
                };
                (provider.name().to_string(), health)
            }
        });

        let results = join_all(probes).await;

        let mut health = self.health.write().await;
        for (name, mut probed) in results {
            let slow = probed
                .latency_ms
                .map(|ms| ms > self.degraded_latency.as_millis() as u64)
                .unwrap_or(false);
            if probed.status == ModelStatus::Available && slow {
                probed.status = ModelStatus::Degraded;
            }

            if health.get(&name).map(|h| h.status) != Some(probed.status) {
                tracing::info!(
                    provider = %name,
                    status = ?probed.status,
                    latency_ms = ?probed.latency_ms,
                    error = ?probed.error,
                    "Model health changed"
                );
            }
            health.insert(name, probed);
        }
    }

    pub async fn report(&self) -> HealthReport {
        let health = self.health.read().await;
        let models: BTreeMap<String, ModelHealth> = self
            .providers
            .iter()
            .map(|p| {
                let h = health
                    .get(p.name())
                    .cloned()
                    .unwrap_or_else(|| ModelHealth::unavailable("no health data"));
                (p.name().to_string(), h)
            })
            .collect();

        let available_models: Vec<String> = models
            .iter()
            .filter(|(_, h)| h.status.is_usable())
            .map(|(name, _)| name.clone())
            .collect();

        let overall_status = if available_models.is_empty() {
            OverallStatus::Unavailable
        } else if models.values().all(|h| h.status == ModelStatus::Available) {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        HealthReport {
            overall_status,
            available_models,
            models,
        }
    }

    /// Background probe loop, stopped by `cancel`
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.refresh().await,
                }
            }
            tracing::debug!("Model health probe loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OptimizationRequest;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        health: ModelHealth,
    }

    #[async_trait]
    impl ModelProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn optimize(&self, request: &OptimizationRequest) -> Result<String, ProviderError> {
            Ok(request.text.clone())
        }

        async fn probe(&self) -> ModelHealth {
            self.health.clone()
        }
    }

    fn pool(entries: Vec<(&'static str, ModelHealth)>) -> ProviderPool {
        ProviderPool::new(
            entries
                .into_iter()
                .map(|(name, health)| Arc::new(Fixed { name, health }) as Arc<dyn ModelProvider>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_unchecked_pool_is_healthy() {
        let pool = pool(vec![("a", ModelHealth::unchecked())]);
        let report = pool.report().await;
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        assert_eq!(report.available_models, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_select_skips_unavailable() {
        let pool = pool(vec![
            ("a", ModelHealth::unavailable("down")),
            ("b", ModelHealth::available(Duration::from_millis(5))),
        ]);
        pool.refresh().await;

        assert_eq!(pool.select(None).await.unwrap().name(), "b");
        assert!(pool.select(Some("a")).await.is_err());
        assert_eq!(pool.report().await.overall_status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_all_down_is_unavailable() {
        let pool = pool(vec![("a", ModelHealth::unavailable("down"))]);
        pool.refresh().await;

        assert!(matches!(
            pool.ensure_available(None).await,
            Err(ProviderError::Unavailable(_))
        ));
        assert_eq!(pool.report().await.overall_status, OverallStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_slow_probe_is_degraded_but_usable() {
        let pool = pool(vec![("slow", ModelHealth::available(Duration::from_secs(9)))])
            .with_probe_limits(Duration::from_secs(10), Duration::from_secs(5));
        pool.refresh().await;

        let report = pool.report().await;
        assert_eq!(report.models["slow"].status, ModelStatus::Degraded);
        assert_eq!(report.overall_status, OverallStatus::Degraded);
        assert!(pool.select(Some("slow")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_pinned_model_rejected() {
        let pool = pool(vec![("a", ModelHealth::unchecked())]);
        assert!(pool.select(Some("missing")).await.is_err());
    }
}
