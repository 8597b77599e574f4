//! Backoff wrapper. Sits outside the agent loop: the loop itself never
//! retries, it only observes the final outcome of a provider call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Message, Provider, TextStream};
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Exponential: base * 2^attempt, capped at max_delay.
    fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Retries transient failures with exponential backoff; permanent failures
/// surface immediately.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        RetryingProvider { inner, policy }
    }

    pub fn wrap(inner: Arc<dyn Provider>) -> Self {
        Self::new(inner, RetryPolicy::default())
    }

    async fn backoff(&self, attempt: u32, error: &ProviderError) {
        let delay = self.policy.delay_for(attempt);
        tracing::warn!(
            attempt = attempt + 1,
            max_retries = self.policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "provider call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    async fn chat(&self, history: &[Message]) -> Result<String, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(history).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stream(&self, history: &[Message]) -> Result<TextStream, ProviderError> {
        // Only the initial call is retried. Once chunks are flowing a
        // mid-stream failure reaches the consumer, which treats it as a
        // provider abort.
        let mut attempt = 0;
        loop {
            match self.inner.stream(history).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn for_model(&self, model: &str, temperature: Option<f32>) -> Option<Arc<dyn Provider>> {
        self.inner.for_model(model, temperature).map(|rebound| {
            Arc::new(RetryingProvider::new(rebound, self.policy.clone())) as Arc<dyn Provider>
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a retryable error until `failures` calls have happened.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Provider for Flaky {
        async fn chat(&self, _history: &[Message]) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ProviderError::Request("connection reset".into()))
            } else {
                Ok("recovered".into())
            }
        }
    }

    struct AlwaysFatal;

    #[async_trait]
    impl Provider for AlwaysFatal {
        async fn chat(&self, _history: &[Message]) -> Result<String, ProviderError> {
            Err(ProviderError::ModelNotAvailable {
                model: "m".into(),
                message: "not pulled".into(),
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let inner = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let provider = RetryingProvider::new(inner.clone(), fast_policy());

        let out = provider.chat(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3, "two failures + one success");
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let provider = RetryingProvider::new(inner.clone(), fast_policy());

        let err = provider.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(err.is_retryable(), "should surface the last transient error");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4, "initial + 3 retries");
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let provider = RetryingProvider::new(Arc::new(AlwaysFatal), fast_policy());
        let err = provider.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotAvailable { .. }));
    }

    #[test]
    fn delay_growth_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1), "capped");
    }
}
