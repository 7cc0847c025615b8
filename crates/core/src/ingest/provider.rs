use crate::error::FetchError;
use crate::ingest::types::QuoteSnapshot;
use std::future::Future;
use std::time::Duration;

/// One external lookup per ticker, keyed by `<code>.<exchange-suffix>`.
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError>;
}

/// Bounded retry with exponential backoff and +/-50% jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per lookup; 1 disables retries.
    pub max_attempts: u32,
    pub base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based: the wait after the first failure is 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let capped = self
            .base
            .saturating_mul(1 << exp)
            .min(self.max_backoff)
            .as_millis() as u64;

        let jitter = capped / 2;
        let offset = fastrand::u64(0..=jitter * 2);
        Duration::from_millis(capped - jitter + offset)
    }

    pub async fn run<F, Fut>(&self, symbol: &str, mut op: F) -> Result<QuoteSnapshot, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<QuoteSnapshot, FetchError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => {
                    if attempt >= self.max_attempts.max(1) || !err.is_retryable() {
                        return Err(err);
                    }
                    let backoff = self.backoff(attempt);
                    tracing::warn!(attempt, ?backoff, %symbol, error = %err, "quote fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn backoff_stays_within_jitter_band_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };
        for _ in 0..50 {
            let first = policy.backoff(1);
            assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(150));
            let capped = policy.backoff(10);
            assert!(capped >= Duration::from_millis(150) && capped <= Duration::from_millis(450));
        }
    }

    #[tokio::test]
    async fn retries_transport_errors_until_success() {
        let calls = AtomicU32::new(0);
        let res = fast()
            .run("005930.KS", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(FetchError::Transport {
                            symbol: "005930.KS".to_string(),
                            detail: "reset".to_string(),
                        })
                    } else {
                        Ok(QuoteSnapshot::default())
                    }
                }
            })
            .await;

        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_missing_tickers() {
        let calls = AtomicU32::new(0);
        let res = fast()
            .run("999999.KS", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::NoData {
                        symbol: "999999.KS".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(res, Err(FetchError::NoData { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res = fast()
            .run("005930.KS", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::Http {
                        symbol: "005930.KS".to_string(),
                        status: 503,
                    })
                }
            })
            .await;

        assert!(matches!(res, Err(FetchError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
