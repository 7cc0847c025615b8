use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use heatmap_core::domain::metric::{MetricId, SizeBasis};
use heatmap_core::error::ConfigurationError;
use heatmap_core::ingest::fetcher::NoProgress;
use heatmap_core::ingest::yahoo::YahooQuoteProvider;
use heatmap_core::pipeline::{HeatmapOutcome, HeatmapPipeline, PipelineError, RenderRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = heatmap_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let provider = Arc::new(YahooQuoteProvider::from_settings(&settings)?);

    // The catalog is mandatory: refuse to start without it.
    let pipeline = match HeatmapPipeline::from_settings(&settings, provider) {
        Ok(p) => p,
        Err(e) => {
            let err = anyhow::Error::new(e);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "pipeline init failed");
            return Err(err);
        }
    };

    let shutdown = CancellationToken::new();
    let state = AppState {
        pipeline: Arc::new(pipeline),
        shutdown: shutdown.clone(),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(list_metrics))
        .route("/catalog", get(get_catalog))
        .route("/heatmap", get(get_heatmap))
        .route("/heatmap/flat", get(get_heatmap_flat))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<HeatmapPipeline>,
    /// Cancelled on shutdown; in-flight fetches stop between tickers.
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct HeatmapQuery {
    metric: Option<String>,
    size: Option<String>,
    count: Option<usize>,
    label: Option<String>,
    #[serde(default)]
    refresh: bool,
}

impl HeatmapQuery {
    fn into_request(self) -> Result<RenderRequest, ConfigurationError> {
        let metric = match self.metric.as_deref() {
            Some(m) => m.parse()?,
            None => MetricId::Change,
        };
        let size_basis = match self.size.as_deref() {
            Some(s) => s.parse()?,
            None => SizeBasis::default(),
        };
        let label_metric = self.label.as_deref().map(str::parse).transpose()?;

        Ok(RenderRequest {
            metric,
            size_basis,
            count: self.count,
            label_metric,
            refresh: self.refresh,
        })
    }
}

enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<ConfigurationError> for ApiError {
    fn from(e: ConfigurationError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Configuration(c) => c.into(),
            PipelineError::DataLoad(d) => Self::Internal(anyhow::Error::new(d)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response(),
            Self::Internal(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "heatmap request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

async fn run_pipeline(state: &AppState, query: HeatmapQuery) -> Result<HeatmapOutcome, ApiError> {
    let req = query.into_request()?;
    let cancel = state.shutdown.child_token();
    Ok(state.pipeline.run(&req, &NoProgress, &cancel).await?)
}

fn no_data_response(outcome: &HeatmapOutcome) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "no data collected; retry later",
            "outcome": outcome,
        })),
    )
        .into_response()
}

async fn get_heatmap(
    State(state): State<AppState>,
    Query(query): Query<HeatmapQuery>,
) -> Result<Response, ApiError> {
    let outcome = run_pipeline(&state, query).await?;
    match outcome {
        HeatmapOutcome::NoData { .. } => Ok(no_data_response(&outcome)),
        HeatmapOutcome::Rendered { .. } => Ok(Json(outcome).into_response()),
    }
}

async fn get_heatmap_flat(
    State(state): State<AppState>,
    Query(query): Query<HeatmapQuery>,
) -> Result<Response, ApiError> {
    let outcome = run_pipeline(&state, query).await?;
    match &outcome {
        HeatmapOutcome::NoData { .. } => Ok(no_data_response(&outcome)),
        HeatmapOutcome::Rendered { spec, stats } => Ok(Json(json!({
            "trace": spec.flatten(),
            "color_axis": spec.color_axis,
            "stats": stats,
        }))
        .into_response()),
    }
}

#[derive(Debug, Serialize)]
struct MetricOption {
    key: &'static str,
    label: &'static str,
}

async fn list_metrics() -> Json<serde_json::Value> {
    let metrics: Vec<MetricOption> = MetricId::ALL
        .iter()
        .map(|m| MetricOption {
            key: m.key(),
            label: m.label(),
        })
        .collect();
    let sizes: Vec<MetricOption> = SizeBasis::ALL
        .iter()
        .map(|s| MetricOption {
            key: s.key(),
            label: s.label(),
        })
        .collect();
    Json(json!({ "metrics": metrics, "size_bases": sizes }))
}

async fn get_catalog(State(state): State<AppState>) -> Json<serde_json::Value> {
    let catalog = state.pipeline.catalog().await;
    Json(json!({
        "rows": catalog.len(),
        "version": catalog.version.to_string(),
        "loaded_at": catalog.loaded_at,
    }))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.cancel();
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
