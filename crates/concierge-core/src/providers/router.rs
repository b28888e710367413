//! Failover across providers with retry on transient errors

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{ChatRequest, ChatResponse, LlmProvider};

pub struct ModelRouter {
    /// Providers in failover order (index 0 = primary)
    providers: Vec<Arc<dyn LlmProvider>>,
    max_retries_per_provider: u32,
    base_retry_delay: Duration,
}

impl ModelRouter {
    /// Single provider, no retries
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            providers: vec![provider],
            max_retries_per_provider: 1,
            base_retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_failover(providers: Vec<Arc<dyn LlmProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(anyhow!("ModelRouter requires at least one provider"));
        }
        Ok(Self {
            providers,
            max_retries_per_provider: 2,
            base_retry_delay: Duration::from_millis(500),
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries_per_provider = max_retries.max(1);
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl LlmProvider for ModelRouter {
    fn provider_name(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.provider_name())
            .unwrap_or("unknown")
    }

    fn model(&self) -> &str {
        self.providers.first().map(|p| p.model()).unwrap_or("unknown")
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut last_error = None;

        for (idx, provider) in self.providers.iter().enumerate() {
            for attempt in 0..self.max_retries_per_provider {
                debug!(
                    "Trying provider {} ({}) attempt {}/{}",
                    provider.provider_name(),
                    provider.model(),
                    attempt + 1,
                    self.max_retries_per_provider,
                );

                match provider.chat(request).await {
                    Ok(response) => {
                        if idx > 0 {
                            info!(
                                "Request succeeded on failover provider {} ({})",
                                provider.provider_name(),
                                provider.model()
                            );
                        }
                        return Ok(response);
                    }
                    Err(e) => {
                        let retryable = is_retryable_error(&e.to_string());
                        warn!(
                            "Provider {} failed (attempt {}, retryable={}): {}",
                            provider.provider_name(),
                            attempt + 1,
                            retryable,
                            e
                        );
                        last_error = Some(e);

                        if !retryable {
                            break;
                        }
                        if attempt + 1 < self.max_retries_per_provider {
                            let delay = self.base_retry_delay * 2u32.pow(attempt);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }

            if let Some(next) = self.providers.get(idx + 1) {
                info!(
                    "Failing over from {} to {}",
                    provider.provider_name(),
                    next.provider_name()
                );
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("All providers failed")))
    }
}

/// Rate limits, server errors and timeouts are worth another attempt
fn is_retryable_error(err: &str) -> bool {
    const RETRYABLE: [&str; 12] = [
        "429",
        "500",
        "502",
        "503",
        "504",
        "rate limit",
        "rate_limit",
        "overloaded",
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
    ];
    let lower = err.to_lowercase();
    RETRYABLE.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::{ChatUsage, StopReason};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        name: &'static str,
        fail_with: Option<&'static str>,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn new(name: &'static str, fail_with: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_with,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            self.name
        }
        fn model(&self) -> &str {
            "test-model"
        }
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(msg) => Err(anyhow!("{}", msg)),
                None => Ok(ChatResponse {
                    text: format!("from {}", self.name),
                    stop_reason: StopReason::EndTurn,
                    usage: ChatUsage::default(),
                }),
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("sys").user("hi")
    }

    #[tokio::test]
    async fn test_single_success() {
        let p = FlakyProvider::new("primary", None);
        let router = ModelRouter::single(p.clone());
        let resp = router.chat(&request()).await.unwrap();
        assert_eq!(resp.text, "from primary");
        assert_eq!(router.provider_name(), "primary");
    }

    #[tokio::test]
    async fn test_failover_on_retryable_error() {
        let primary = FlakyProvider::new("primary", Some("status 503 overloaded"));
        let backup = FlakyProvider::new("backup", None);
        let providers: Vec<Arc<dyn LlmProvider>> = vec![primary.clone(), backup.clone()];
        let router = ModelRouter::with_failover(providers)
            .unwrap()
            .with_base_retry_delay(Duration::from_millis(1));

        let resp = router.chat(&request()).await.unwrap();
        assert_eq!(resp.text, "from backup");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_skips_retries() {
        let primary = FlakyProvider::new("primary", Some("status 401 invalid api key"));
        let backup = FlakyProvider::new("backup", None);
        let providers: Vec<Arc<dyn LlmProvider>> = vec![primary.clone(), backup];
        let router = ModelRouter::with_failover(providers)
            .unwrap()
            .with_base_retry_delay(Duration::from_millis(1));

        router.chat(&request()).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_fail_returns_last_error() {
        let a = FlakyProvider::new("a", Some("status 500"));
        let b = FlakyProvider::new("b", Some("status 401 unauthorized"));
        let providers: Vec<Arc<dyn LlmProvider>> = vec![a, b];
        let router = ModelRouter::with_failover(providers)
            .unwrap()
            .with_base_retry_delay(Duration::from_millis(1));

        let err = router.chat(&request()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_empty_failover_rejected() {
        assert!(ModelRouter::with_failover(vec![]).is_err());
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("HTTP 429 Too Many Requests"));
        assert!(is_retryable_error("operation timed out"));
        assert!(!is_retryable_error("invalid request body"));
    }
}
