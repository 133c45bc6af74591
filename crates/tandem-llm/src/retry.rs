use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use tandem_core::config::RetryConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::InferenceClient;
use tandem_core::types::{InferenceRequest, InferenceResult};

/// An inference client that retries failed requests and falls back to
/// alternative clients.
pub struct RetryingClient {
    primary: Arc<dyn InferenceClient>,
    fallbacks: Vec<Arc<dyn InferenceClient>>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(primary: Arc<dyn InferenceClient>, retry_config: RetryConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry_config,
        }
    }

    pub fn with_fallback(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.fallbacks.push(client);
        self
    }
}

fn is_retryable(e: &TandemError) -> bool {
    match e {
        TandemError::Inference(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl InferenceClient for RetryingClient {
    fn infer(&self, request: InferenceRequest) -> BoxFuture<'_, Result<InferenceResult>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.infer(request.clone()).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying inference request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary inference client exhausted, trying fallbacks");
            }
            for (i, fallback) in self.fallbacks.iter().enumerate() {
                match fallback.infer(request.clone()).await {
                    Ok(result) => {
                        info!(fallback = i, "Fell back to alternative inference client");
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!(fallback = i, error = %e, "Fallback inference client also failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| TandemError::Inference("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: AtomicU32,
        error: &'static str,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: &'static str) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl InferenceClient for Flaky {
        fn infer(&self, _request: InferenceRequest) -> BoxFuture<'_, Result<InferenceResult>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let left = self.failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures.store(left - 1, Ordering::SeqCst);
                    return Err(TandemError::Inference(self.error.into()));
                }
                Ok(InferenceResult::Text("ok".into()))
            })
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            instruction: "i".into(),
            input: "x".into(),
            output_shape: None,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let primary = Arc::new(Flaky::new(2, "HTTP 503: overloaded"));
        let client = RetryingClient::new(primary.clone(), fast());
        let result = client.infer(request()).await.unwrap();
        assert_eq!(result, InferenceResult::Text("ok".into()));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let primary = Arc::new(Flaky::new(1, "HTTP 401: bad key"));
        let client = RetryingClient::new(primary.clone(), fast());
        assert!(client.infer(request()).await.is_err());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_exhausted() {
        let primary = Arc::new(Flaky::new(u32::MAX, "HTTP 500: boom"));
        let fallback = Arc::new(Flaky::new(0, ""));
        let client = RetryingClient::new(primary.clone(), fast()).with_fallback(fallback.clone());
        assert!(client.infer(request()).await.is_ok());
        assert_eq!(primary.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 1000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(1200));
        assert!(d >= Duration::from_millis(800));
    }
}
