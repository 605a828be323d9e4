//! Retrying provider: exponential backoff with jitter for transient failures.
//!
//! Wraps any provider. Errors for which [`ProviderError::is_retryable`] holds
//! (rate limits, timeouts, network, 5xx) are retried up to `max_attempts`
//! total calls; everything else is returned immediately.

use async_trait::async_trait;
use lorekeep_core::error::ProviderError;
use lorekeep_core::provider::*;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for [`RetryingProvider`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &lorekeep_config::RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, raised to the provider's retry-after hint,
    /// capped at `max_delay`, plus up to 10% jitter.
    pub fn delay_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let hinted = match error {
            ProviderError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
            _ => Duration::ZERO,
        };
        let delay = exp.max(hinted).min(self.max_delay);
        let jitter_cap = (delay.as_millis() as u64 / 10).max(1);
        let jitter = rand::rng().random_range(0..jitter_cap);
        delay + Duration::from_millis(jitter)
    }

    async fn run<T, F, Fut>(&self, provider: &str, op: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        provider,
                        op,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A provider that retries its inner provider on transient failures.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.policy
            .run(self.inner.name(), "complete", || self.inner.complete(request.clone()))
            .await
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        self.policy
            .run(self.inner.name(), "embed", || self.inner.embed(request.clone()))
            .await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::message::Message;
    use std::sync::Mutex;

    /// Fails with the queued errors, then succeeds.
    struct FlakyProvider {
        failures: Mutex<Vec<ProviderError>>,
        calls: Mutex<usize>,
    }

    impl FlakyProvider {
        fn new(failures: Vec<ProviderError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(ProviderResponse {
                    message: Message::assistant("ok"),
                    usage: None,
                    model: "test-model".into(),
                    metadata: serde_json::Map::new(),
                })
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn test_request() -> ProviderRequest {
        ProviderRequest {
            model: "test".into(),
            messages: vec![Message::user("hello")],
            temperature: 0.7,
            max_tokens: None,
            response_schema: None,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let inner = Arc::new(FlakyProvider::new(vec![
            ProviderError::Network("reset".into()),
            ProviderError::ApiError { status_code: 503, message: "busy".into() },
        ]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.message.content, "ok");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempt_cap() {
        let inner = Arc::new(FlakyProvider::new(vec![
            ProviderError::Timeout("1".into()),
            ProviderError::Timeout("2".into()),
            ProviderError::Timeout("3".into()),
        ]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(2));

        let err = provider.complete(test_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let inner = Arc::new(FlakyProvider::new(vec![ProviderError::AuthenticationFailed(
            "bad key".into(),
        )]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(5));

        let err = provider.complete(test_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = fast_policy(5);
        let network = ProviderError::Network("x".into());
        let first = policy.delay_for(1, &network);
        let third = policy.delay_for(3, &network);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(111));
        assert!(third >= Duration::from_millis(400) && third < Duration::from_millis(441));
        let tenth = policy.delay_for(10, &network);
        assert!(tenth <= Duration::from_millis(1100));
    }

    #[test]
    fn rate_limit_hint_raises_delay() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        };
        let delay = policy.delay_for(1, &ProviderError::RateLimited { retry_after_secs: 5 });
        assert!(delay >= Duration::from_secs(5));
    }
}
