use crate::cache::{BatchCache, BatchKey};
use crate::config::Settings;
use crate::domain::analysis::FetchBatch;
use crate::domain::catalog::Catalog;
use crate::domain::metric::{MetricId, MetricPolicyTable, SizeBasis};
use crate::error::{ConfigurationError, DataLoadError};
use crate::ingest::catalog::load_catalog;
use crate::ingest::fetcher::{fetch_quotes, FetchOptions, FetchProgress};
use crate::ingest::provider::QuoteProvider;
use crate::mapper;
use crate::normalize::normalize_report;
use crate::render::{render, RenderOptions, RenderSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything the UI layer selects, passed explicitly into the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderRequest {
    pub metric: MetricId,
    #[serde(default, alias = "size")]
    pub size_basis: SizeBasis,
    /// Result-count bound; defaults from settings, clamped to the catalog size.
    #[serde(default)]
    pub count: Option<usize>,
    /// Value printed under each name. Defaults to `metric`.
    #[serde(default)]
    pub label_metric: Option<MetricId>,
    /// Bypass the batch cache and re-read the catalog.
    #[serde(default)]
    pub refresh: bool,
}

impl RenderRequest {
    pub fn new(metric: MetricId, size_basis: SizeBasis) -> Self {
        Self {
            metric,
            size_basis,
            count: None,
            label_metric: None,
            refresh: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub batch_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub limit: usize,
    pub attempted: usize,
    pub rows: usize,
    pub failures: usize,
    pub failure_ratio: f64,
    pub from_cache: bool,
    pub cancelled: bool,
}

impl BatchStats {
    fn new(batch: &FetchBatch, limit: usize, from_cache: bool) -> Self {
        Self {
            batch_id: batch.batch_id,
            fetched_at: batch.fetched_at,
            limit,
            attempted: batch.attempted,
            rows: batch.rows.len(),
            failures: batch.failure_count,
            failure_ratio: batch.failure_ratio(),
            from_cache,
            cancelled: batch.cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HeatmapOutcome {
    Rendered { spec: RenderSpec, stats: BatchStats },
    /// Zero usable rows; present as "no data, retry later".
    NoData { stats: BatchStats },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    DataLoad(#[from] DataLoadError),
}

pub struct HeatmapPipeline {
    catalog: RwLock<Arc<Catalog>>,
    catalog_path: Option<PathBuf>,
    provider: Arc<dyn QuoteProvider>,
    cache: BatchCache,
    policies: MetricPolicyTable,
    fetch_template: FetchOptions,
    root_label: String,
    default_count: usize,
}

impl HeatmapPipeline {
    pub fn new(
        catalog: Catalog,
        provider: Arc<dyn QuoteProvider>,
        settings: &Settings,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            catalog: RwLock::new(Arc::new(catalog)),
            catalog_path: Some(settings.catalog_path.clone()),
            provider,
            cache: BatchCache::new(settings.cache_ttl),
            policies: settings.policy_table()?,
            fetch_template: settings.fetch_options(settings.default_count),
            root_label: settings.root_label.clone(),
            default_count: settings.default_count,
        })
    }

    /// Load the catalog from `settings.catalog_path` and build the pipeline.
    pub fn from_settings(
        settings: &Settings,
        provider: Arc<dyn QuoteProvider>,
    ) -> Result<Self, PipelineError> {
        let catalog = load_catalog(&settings.catalog_path)?;
        Ok(Self::new(catalog, provider, settings)?)
    }

    /// Keep the in-memory catalog on refresh instead of re-reading a file.
    pub fn without_catalog_reload(mut self) -> Self {
        self.catalog_path = None;
        self
    }

    pub fn with_cache(mut self, cache: BatchCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_fetch_options(mut self, opts: FetchOptions) -> Self {
        self.fetch_template = opts;
        self
    }

    pub async fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&*self.catalog.read().await)
    }

    pub fn policies(&self) -> &MetricPolicyTable {
        &self.policies
    }

    pub fn cache(&self) -> &BatchCache {
        &self.cache
    }

    pub async fn reload_catalog(&self) -> Result<(), DataLoadError> {
        let Some(path) = self.catalog_path.as_deref() else {
            return Ok(());
        };
        let fresh = load_catalog(path)?;
        let mut current = self.catalog.write().await;
        if current.version != fresh.version {
            tracing::info!(rows = fresh.len(), version = fresh.version, "catalog changed; dropping cached batches");
            self.cache.clear().await;
        }
        *current = Arc::new(fresh);
        Ok(())
    }

    /// Fetched and normalized rows for the first `limit` catalog entries, served from the
    /// cache when possible. Cancelled batches are returned but never cached.
    pub async fn load_batch(
        &self,
        limit: usize,
        refresh: bool,
        progress: &dyn FetchProgress,
        cancel: &CancellationToken,
    ) -> (Arc<FetchBatch>, bool) {
        let catalog = self.catalog().await;
        let key = BatchKey {
            limit,
            catalog_version: catalog.version,
        };

        if !refresh {
            if let Some(hit) = self.cache.get(&key).await {
                tracing::debug!(limit, batch_id = %hit.batch_id, "fetch batch served from cache");
                return (hit, true);
            }
        }

        let opts = FetchOptions {
            limit,
            ..self.fetch_template.clone()
        };
        let report = fetch_quotes(self.provider.as_ref(), &catalog.rows, &opts, progress, cancel).await;
        let batch = Arc::new(normalize_report(report));

        tracing::info!(
            limit,
            attempted = batch.attempted,
            rows = batch.rows.len(),
            failures = batch.failure_count,
            cancelled = batch.cancelled,
            "fetch batch complete"
        );

        // Empty batches are not cached so the next request retries the provider.
        if !batch.cancelled && !batch.is_empty() {
            self.cache.put(key, Arc::clone(&batch), None).await;
        }

        (batch, false)
    }

    pub async fn run(
        &self,
        req: &RenderRequest,
        progress: &dyn FetchProgress,
        cancel: &CancellationToken,
    ) -> Result<HeatmapOutcome, PipelineError> {
        if req.refresh {
            self.reload_catalog().await?;
        }

        let limit = self
            .catalog()
            .await
            .clamp_count(req.count.unwrap_or(self.default_count));

        let (batch, from_cache) = self.load_batch(limit, req.refresh, progress, cancel).await;
        let stats = BatchStats::new(&batch, limit, from_cache);

        if batch.is_empty() {
            tracing::warn!(limit, attempted = stats.attempted, failures = stats.failures, "no data");
            return Ok(HeatmapOutcome::NoData { stats });
        }

        let visual = mapper::resolve(&self.policies, req.metric, &batch.rows)?;
        let spec = render(
            &batch.rows,
            &RenderOptions {
                root_label: self.root_label.clone(),
                size_basis: req.size_basis,
                visual,
                label_metric: req.label_metric.unwrap_or(req.metric),
            },
        );

        Ok(HeatmapOutcome::Rendered { spec, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::ColorScale;
    use crate::ingest::catalog::parse_catalog;
    use crate::ingest::fetcher::testing::{fast_opts, quote, StubProvider};
    use crate::ingest::fetcher::NoProgress;
    use crate::ingest::types::QuoteSnapshot;
    use std::time::Duration;

    const CATALOG: &str = "Code,Name,Sector\n5930,삼성전자,전기전자\n660,SK하이닉스,전기전자\n5380,현대차,\n";

    fn settings() -> Settings {
        Settings::from_lookup(|_| None)
    }

    fn stub() -> StubProvider {
        StubProvider::default()
            .with(
                "005930.KS",
                QuoteSnapshot {
                    forward_pe: Some(5.0),
                    ..quote(71000.0, 70000.0)
                },
            )
            .with(
                "000660.KS",
                QuoteSnapshot {
                    trailing_pe: Some(15.0),
                    ..quote(180000.0, 185000.0)
                },
            )
            .with("005380.KS", quote(250000.0, 250000.0))
    }

    fn pipeline(provider: Arc<StubProvider>) -> HeatmapPipeline {
        let catalog = parse_catalog(CATALOG.as_bytes()).unwrap();
        HeatmapPipeline::new(catalog, provider, &settings())
            .unwrap()
            .without_catalog_reload()
            .with_fetch_options(fast_opts(40))
    }

    #[tokio::test]
    async fn renders_per_heatmap_with_positive_median() {
        let p = pipeline(Arc::new(stub()));
        let out = p
            .run(
                &RenderRequest::new(MetricId::Per, SizeBasis::Price),
                &NoProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let HeatmapOutcome::Rendered { spec, stats } = out else {
            panic!("expected a rendered heatmap");
        };
        // Count defaults to 40, clamped to 3 catalog rows.
        assert_eq!(stats.limit, 3);
        assert_eq!(stats.rows, 3);
        assert_eq!(spec.color_axis.scale, ColorScale::DivergingRedGreenReversed);
        assert_eq!(spec.color_axis.midpoint, Some(10.0));
        let sectors: Vec<_> = spec.root.children.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(sectors, vec!["전기전자", "Other"]);
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let provider = Arc::new(stub());
        let p = pipeline(Arc::clone(&provider));
        let req = RenderRequest::new(MetricId::Change, SizeBasis::AbsChange);

        let first = p.run(&req, &NoProgress, &CancellationToken::new()).await.unwrap();
        let second = p.run(&req, &NoProgress, &CancellationToken::new()).await.unwrap();
        assert_eq!(provider.calls(), 3);

        let (HeatmapOutcome::Rendered { stats: a, .. }, HeatmapOutcome::Rendered { stats: b, .. }) =
            (first, second)
        else {
            panic!("expected rendered heatmaps");
        };
        assert!(!a.from_cache);
        assert!(b.from_cache);
        assert_eq!(a.batch_id, b.batch_id);

        let refresh = RenderRequest {
            refresh: true,
            ..req.clone()
        };
        p.run(&refresh, &NoProgress, &CancellationToken::new()).await.unwrap();
        assert_eq!(provider.calls(), 6);
    }

    #[tokio::test]
    async fn expired_batches_do_not_accumulate() {
        let provider = Arc::new(stub());
        let p = pipeline(provider).with_cache(BatchCache::new(Duration::from_millis(20)));

        for count in 1..=3 {
            let req = RenderRequest {
                count: Some(count),
                ..RenderRequest::new(MetricId::Change, SizeBasis::Price)
            };
            p.run(&req, &NoProgress, &CancellationToken::new()).await.unwrap();
        }
        assert_eq!(p.cache().len().await, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        p.run(
            &RenderRequest::new(MetricId::Change, SizeBasis::Price),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(p.cache().len().await, 1);
    }

    #[tokio::test]
    async fn catalog_change_on_refresh_drops_cached_batches() {
        let path = std::env::temp_dir().join(format!("heatmap-catalog-{}.csv", Uuid::new_v4()));
        std::fs::write(&path, CATALOG).unwrap();
        let path_str = path.to_string_lossy().into_owned();
        let settings = Settings::from_lookup(|k| (k == "HEATMAP_CATALOG_PATH").then(|| path_str.clone()));

        let provider = Arc::new(stub());
        let p = HeatmapPipeline::from_settings(&settings, provider)
            .unwrap()
            .with_fetch_options(fast_opts(40));
        for count in 1..=2 {
            let req = RenderRequest {
                count: Some(count),
                ..RenderRequest::new(MetricId::Change, SizeBasis::Price)
            };
            p.run(&req, &NoProgress, &CancellationToken::new()).await.unwrap();
        }
        assert_eq!(p.cache().len().await, 2);
        let old_version = p.catalog().await.version;

        std::fs::write(&path, "Code,Name,Sector\n5930,삼성전자,전기전자\n").unwrap();
        let refresh = RenderRequest {
            refresh: true,
            ..RenderRequest::new(MetricId::Change, SizeBasis::Price)
        };
        let out = p.run(&refresh, &NoProgress, &CancellationToken::new()).await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_ne!(p.catalog().await.version, old_version);
        assert!(matches!(out, HeatmapOutcome::Rendered { ref stats, .. } if stats.limit == 1));
        assert_eq!(p.cache().len().await, 1);
    }

    #[tokio::test]
    async fn zero_count_reports_no_data() {
        let p = pipeline(Arc::new(stub()));
        let req = RenderRequest {
            count: Some(0),
            ..RenderRequest::new(MetricId::Change, SizeBasis::Price)
        };
        let out = p.run(&req, &NoProgress, &CancellationToken::new()).await.unwrap();
        assert!(matches!(out, HeatmapOutcome::NoData { ref stats } if stats.attempted == 0));
    }

    #[tokio::test]
    async fn all_failing_provider_reports_no_data_and_is_not_cached() {
        let provider = Arc::new(StubProvider::default());
        let p = pipeline(Arc::clone(&provider));
        let req = RenderRequest::new(MetricId::Change, SizeBasis::Price);

        let out = p.run(&req, &NoProgress, &CancellationToken::new()).await.unwrap();
        let HeatmapOutcome::NoData { stats } = out else {
            panic!("expected no data");
        };
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.failure_ratio, 1.0);
        assert_eq!(p.cache().len().await, 0);
    }

    #[tokio::test]
    async fn partial_failures_are_reported() {
        let provider = Arc::new(StubProvider::default().with("005930.KS", quote(1.0, 1.0)));
        let p = pipeline(provider);
        let out = p
            .run(
                &RenderRequest::new(MetricId::Change, SizeBasis::Price),
                &NoProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let HeatmapOutcome::Rendered { spec, stats } = out else {
            panic!("expected a rendered heatmap");
        };
        assert_eq!(spec.leaf_count, 1);
        assert_eq!(stats.failures, 2);
    }

    #[tokio::test]
    async fn cancelled_runs_are_not_cached() {
        let p = pipeline(Arc::new(stub()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = p
            .run(&RenderRequest::new(MetricId::Change, SizeBasis::Price), &NoProgress, &cancel)
            .await
            .unwrap();
        assert!(matches!(out, HeatmapOutcome::NoData { ref stats } if stats.cancelled));
        assert_eq!(p.cache().len().await, 0);
    }

    #[test]
    fn request_accepts_korean_labels() {
        let req: RenderRequest = serde_json::from_value(serde_json::json!({
            "metric": "배당수익률",
            "size": "등락률(절대값)",
            "count": 10
        }))
        .unwrap();
        assert_eq!(req.metric, MetricId::DividendYield);
        assert_eq!(req.size_basis, SizeBasis::AbsChange);
        assert_eq!(req.count, Some(10));
        assert!(!req.refresh);
    }
}
