use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use heatmap_core::domain::metric::{MetricId, SizeBasis};
use heatmap_core::ingest::yahoo::YahooQuoteProvider;
use heatmap_core::pipeline::{HeatmapOutcome, HeatmapPipeline, RenderRequest};

#[derive(Debug, Parser)]
#[command(name = "heatmap_worker")]
struct Args {
    /// Color/display metric: 등락률, PER, PBR, ROE, 배당수익률, PEG (or change, per, ...).
    #[arg(long, default_value = "change")]
    metric: MetricId,

    /// Leaf size basis: 현재가, 등락률(절대값), 시가총액 (or price, abs_change, market_cap).
    #[arg(long, default_value = "price")]
    size: SizeBasis,

    /// Number of catalog rows to fetch. Defaults to HEATMAP_DEFAULT_COUNT.
    #[arg(long)]
    count: Option<usize>,

    /// Metric printed under each name, if different from --metric.
    #[arg(long)]
    label: Option<MetricId>,

    /// Catalog CSV. Overrides HEATMAP_CATALOG_PATH.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Write JSON here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Emit the flattened trace (ids/labels/parents/values/colors/texts).
    #[arg(long)]
    flat: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = heatmap_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(path) = args.catalog.clone() {
        settings.catalog_path = path;
    }

    let res = run(&settings, &args).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "heatmap run failed");
    }
    res
}

async fn run(settings: &heatmap_core::config::Settings, args: &Args) -> anyhow::Result<()> {
    let provider = Arc::new(YahooQuoteProvider::from_settings(settings)?);
    let pipeline = HeatmapPipeline::from_settings(settings, provider).context("pipeline init failed")?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current ticker");
            on_ctrl_c.cancel();
        }
    });

    let req = RenderRequest {
        metric: args.metric,
        size_basis: args.size,
        count: args.count,
        label_metric: args.label,
        refresh: false,
    };

    let progress = |index: usize, limit: usize| {
        tracing::debug!(index, limit, "ticker attempted");
    };

    let outcome = pipeline.run(&req, &progress, &cancel).await?;

    let json = match &outcome {
        HeatmapOutcome::NoData { stats } => {
            anyhow::bail!(
                "no data collected ({} attempted, {} failed); retry later",
                stats.attempted,
                stats.failures
            );
        }
        HeatmapOutcome::Rendered { spec, stats } => {
            tracing::info!(
                metric = %req.metric,
                size = %req.size_basis,
                rows = stats.rows,
                failures = stats.failures,
                cancelled = stats.cancelled,
                "heatmap rendered"
            );
            if args.flat {
                serde_json::to_string_pretty(&serde_json::json!({
                    "trace": spec.flatten(),
                    "color_axis": spec.color_axis,
                    "stats": stats,
                }))?
            } else {
                serde_json::to_string_pretty(&outcome)?
            }
        }
    };

    match &args.out {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}

fn init_sentry(settings: &heatmap_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
