use crate::domain::catalog::CatalogRow;
use crate::error::FetchError;
use crate::ingest::provider::QuoteProvider;
use crate::ingest::types::QuoteSnapshot;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_LOGGED_FAILURES: usize = 10;

/// Side channel for progress; receives `(index, limit)` after every attempt, `index` 1-based.
pub trait FetchProgress: Send + Sync {
    fn on_attempt(&self, index: usize, limit: usize);
}

impl<F> FetchProgress for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_attempt(&self, index: usize, limit: usize) {
        self(index, limit)
    }
}

pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_attempt(&self, _index: usize, _limit: usize) {}
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub limit: usize,
    pub exchange_suffix: String,
    /// Pause between consecutive lookups.
    pub request_delay: Duration,
    /// Log progress every N attempts (plus first and last); 0 disables.
    pub progress_every: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: 40,
            exchange_suffix: "KS".to_string(),
            request_delay: Duration::from_millis(100),
            progress_every: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedQuote {
    pub row: CatalogRow,
    pub snapshot: QuoteSnapshot,
}

#[derive(Debug)]
pub struct FetchFailure {
    pub code: String,
    pub error: FetchError,
}

#[derive(Debug)]
pub struct FetchReport {
    /// One entry per attempted ticker, in catalog order.
    pub results: Vec<Result<FetchedQuote, FetchFailure>>,
    pub limit: usize,
    pub cancelled: bool,
}

impl FetchReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}

/// Look up the first `opts.limit` catalog rows one by one, in order.
///
/// A failed lookup never aborts the batch; it is recorded and the loop moves on.
/// Cancellation is checked before every ticker.
pub async fn fetch_quotes(
    provider: &dyn QuoteProvider,
    catalog: &[CatalogRow],
    opts: &FetchOptions,
    progress: &dyn FetchProgress,
    cancel: &CancellationToken,
) -> FetchReport {
    let targets = &catalog[..opts.limit.min(catalog.len())];
    let total = targets.len();

    let mut results = Vec::with_capacity(total);
    let mut failures: usize = 0;
    let mut cancelled = false;

    for (idx, row) in targets.iter().enumerate() {
        if idx != 0 && !opts.request_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(opts.request_delay) => {}
            }
        }
        if cancel.is_cancelled() {
            tracing::warn!(processed = idx, total, "quote fetch cancelled");
            cancelled = true;
            break;
        }

        let symbol = row.symbol(&opts.exchange_suffix);
        match provider.fetch_quote(&symbol).await {
            Ok(snapshot) => results.push(Ok(FetchedQuote {
                row: row.clone(),
                snapshot,
            })),
            Err(error) => {
                failures += 1;
                if failures <= MAX_LOGGED_FAILURES {
                    tracing::warn!(
                        idx,
                        ticker = %symbol,
                        name = %row.name,
                        failure_count = failures,
                        error = %error,
                        "quote fetch failed; skipping ticker"
                    );
                }
                results.push(Err(FetchFailure {
                    code: row.code.clone(),
                    error,
                }));
            }
        }

        let n = idx + 1;
        progress.on_attempt(n, total);

        if opts.progress_every != 0 && (n == 1 || n == total || n % opts.progress_every == 0) {
            tracing::info!(
                processed = n,
                total,
                ok = n - failures,
                failures,
                provider = provider.provider_name(),
                "quote fetch progress"
            );
        }
    }

    FetchReport {
        results,
        limit: total,
        cancelled,
    }
}
