//! Bounded segment executors
//!
//! The pool is a semaphore of `W` permits. The dispatch loop takes a permit
//! before it leases a segment, so at most `W` provider calls run at once
//! across every session.

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::provider::{ModelProvider, OptimizationRequest, ProviderError};

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently executing a segment
    pub fn busy(&self) -> usize {
        self.size.saturating_sub(self.permits.available_permits())
    }

    /// Wait for a free worker slot
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.permits).acquire_owned().await
    }

    /// Wait until every worker is free (shutdown drain)
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.permits.acquire_many(self.size as u32).await {
            drop(all);
        }
    }

    /// Run one provider call under the provider's timeout
    ///
    /// No retry: a timeout or transport failure is returned as-is and
    /// recorded on the segment.
    pub async fn execute(
        provider: &dyn ModelProvider,
        request: &OptimizationRequest,
    ) -> Result<String, ProviderError> {
        let limit = provider.timeout();
        match tokio::time::timeout(limit, provider.optimize(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    struct Sleepy(Duration);

    #[async_trait]
    impl ModelProvider for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn optimize(&self, request: &OptimizationRequest) -> Result<String, ProviderError> {
            tokio::time::sleep(self.0).await;
            Ok(request.text.clone())
        }
    }

    fn request() -> OptimizationRequest {
        OptimizationRequest {
            session_id: Uuid::new_v4(),
            segment_index: 0,
            attempt: 1,
            system_prompt: String::new(),
            text: "text".to_string(),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let result = WorkerPool::execute(&Sleepy(Duration::from_secs(5)), &request()).await;
        assert_eq!(result, Err(ProviderError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn test_fast_call_succeeds() {
        let result = WorkerPool::execute(&Sleepy(Duration::ZERO), &request()).await;
        assert_eq!(result.unwrap(), "text");
    }

    #[tokio::test]
    async fn test_busy_counts_held_permits() {
        let pool = WorkerPool::new(2);
        let first = pool.acquire().await.unwrap();
        assert_eq!(pool.busy(), 1);
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.busy(), 2);
        drop(first);
        assert_eq!(pool.busy(), 1);
    }
}
