use crate::config::Settings;
use crate::error::FetchError;
use crate::ingest::provider::{QuoteProvider, RetryPolicy};
use crate::ingest::types::QuoteSnapshot;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const QUOTE_SUMMARY_PATH: &str = "/v10/finance/quoteSummary";
const CRUMB_PATH: &str = "/v1/test/getcrumb";
const MODULES: &str = "price,summaryDetail,defaultKeyStatistics,financialData";
const MAX_CRUMB_LEN: usize = 100;

/// quoteSummary client. Lookups need a session cookie plus a matching crumb; both are
/// obtained on first use (unless `YAHOO_CRUMB` is set) and refreshed once when a lookup
/// comes back 401.
#[derive(Debug, Clone)]
pub struct YahooQuoteProvider {
    http: reqwest::Client,
    base_url: String,
    cookie_url: String,
    crumb: Arc<Mutex<Option<String>>>,
    retry: RetryPolicy,
}

impl YahooQuoteProvider {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .quote_provider_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let retry = RetryPolicy {
            max_attempts: settings.quote_max_attempts,
            ..RetryPolicy::default()
        };

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://finance.yahoo.com/"));
        // A fixed cookie takes precedence over the jar.
        if let Some(cookie) = settings.yahoo_cookie.as_deref() {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie).context("YAHOO_COOKIE is not a valid header value")?,
            );
        }

        let http = reqwest::Client::builder()
            .timeout(settings.quote_timeout)
            .user_agent(concat!("heatmap/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .context("failed to build quote provider http client")?;

        Ok(Self {
            http,
            base_url,
            cookie_url: settings.yahoo_cookie_url.clone(),
            crumb: Arc::new(Mutex::new(settings.yahoo_crumb.clone())),
            retry,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Cached crumb, fetching one if none is held. The lock is held across the fetch so
    /// concurrent lookups share a single refresh.
    async fn crumb(&self, symbol: &str) -> Result<String, FetchError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        let fresh = self.fetch_crumb(symbol).await?;
        tracing::debug!(provider = self.provider_name(), "obtained session crumb");
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop `rejected` unless another lookup already replaced it.
    async fn invalidate_crumb(&self, rejected: &str) {
        let mut cached = self.crumb.lock().await;
        if cached.as_deref() == Some(rejected) {
            *cached = None;
        }
    }

    async fn fetch_crumb(&self, symbol: &str) -> Result<String, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            symbol: symbol.to_string(),
            detail: format!("crumb request failed: {e}"),
        };

        // The session page usually answers 404; only its Set-Cookie matters.
        self.http
            .get(&self.cookie_url)
            .send()
            .await
            .map_err(transport)?;

        let res = self
            .http
            .get(self.endpoint(CRUMB_PATH))
            .send()
            .await
            .map_err(transport)?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                symbol: symbol.to_string(),
                status: status.as_u16(),
            });
        }

        let body = res.text().await.map_err(transport)?;
        let crumb = body.trim();
        if crumb.is_empty()
            || crumb.len() >= MAX_CRUMB_LEN
            || crumb.contains(|c: char| c.is_whitespace() || c == '<')
        {
            return Err(FetchError::Parse {
                symbol: symbol.to_string(),
                detail: "unexpected crumb response".to_string(),
            });
        }

        Ok(crumb.to_string())
    }

    async fn fetch_once(&self, symbol: &str, crumb: &str) -> Result<QuoteSnapshot, FetchError> {
        let url = self.endpoint(&format!("{QUOTE_SUMMARY_PATH}/{symbol}"));
        let res = self
            .http
            .get(url)
            .query(&[("modules", MODULES), ("crumb", crumb)])
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                symbol: symbol.to_string(),
                detail: e.to_string(),
            })?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NoData {
                symbol: symbol.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Http {
                symbol: symbol.to_string(),
                status: status.as_u16(),
            });
        }

        let text = res.text().await.map_err(|e| FetchError::Transport {
            symbol: symbol.to_string(),
            detail: format!("failed to read response: {e}"),
        })?;

        parse_quote_summary(symbol, &text)
    }

    async fn fetch_authenticated(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError> {
        let crumb = self.crumb(symbol).await?;
        match self.fetch_once(symbol, &crumb).await {
            Err(FetchError::Http { status: 401, .. }) => {
                tracing::debug!(%symbol, "crumb rejected; re-authenticating");
                self.invalidate_crumb(&crumb).await;
                let crumb = self.crumb(symbol).await?;
                self.fetch_once(symbol, &crumb).await
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl QuoteProvider for YahooQuoteProvider {
    fn provider_name(&self) -> &'static str {
        "yahoo_quote_summary"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, FetchError> {
        self.retry.run(symbol, || self.fetch_authenticated(symbol)).await
    }
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    #[serde(default)]
    price: Option<PriceModule>,
    #[serde(default)]
    summary_detail: Option<SummaryDetailModule>,
    #[serde(default)]
    default_key_statistics: Option<KeyStatisticsModule>,
    #[serde(default)]
    financial_data: Option<FinancialDataModule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    #[serde(default)]
    regular_market_price: Option<Value>,
    #[serde(default)]
    regular_market_previous_close: Option<Value>,
    #[serde(default)]
    market_cap: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetailModule {
    #[serde(default)]
    previous_close: Option<Value>,
    #[serde(default)]
    market_cap: Option<Value>,
    #[serde(default, rename = "forwardPE")]
    forward_pe: Option<Value>,
    #[serde(default, rename = "trailingPE")]
    trailing_pe: Option<Value>,
    #[serde(default)]
    dividend_yield: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatisticsModule {
    #[serde(default, rename = "forwardPE")]
    forward_pe: Option<Value>,
    #[serde(default)]
    price_to_book: Option<Value>,
    #[serde(default)]
    peg_ratio: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialDataModule {
    #[serde(default)]
    current_price: Option<Value>,
    #[serde(default)]
    return_on_equity: Option<Value>,
}

/// Values arrive either bare or wrapped as `{"raw": 1.23, "fmt": "1.23"}`; `{}` means absent.
fn raw_f64(v: &Option<Value>) -> Option<f64> {
    let v = v.as_ref()?;
    let n = match v {
        Value::Object(o) => o.get("raw")?.as_f64(),
        other => other.as_f64(),
    }?;
    n.is_finite().then_some(n)
}

fn first_of(candidates: &[Option<f64>]) -> Option<f64> {
    candidates.iter().flatten().copied().next()
}

pub(crate) fn parse_quote_summary(symbol: &str, text: &str) -> Result<QuoteSnapshot, FetchError> {
    let parsed: QuoteSummaryResponse = serde_json::from_str(text).map_err(|e| FetchError::Parse {
        symbol: symbol.to_string(),
        detail: e.to_string(),
    })?;

    if let Some(err) = parsed.quote_summary.error.filter(|e| !e.is_null()) {
        tracing::debug!(%symbol, error = %err, "quote provider returned an error body");
        return Err(FetchError::NoData {
            symbol: symbol.to_string(),
        });
    }

    let result = parsed
        .quote_summary
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| FetchError::NoData {
            symbol: symbol.to_string(),
        })?;

    let price = result.price.unwrap_or_default();
    let detail = result.summary_detail.unwrap_or_default();
    let stats = result.default_key_statistics.unwrap_or_default();
    let financial = result.financial_data.unwrap_or_default();

    let snapshot = QuoteSnapshot {
        current_price: first_of(&[
            raw_f64(&financial.current_price),
            raw_f64(&price.regular_market_price),
        ]),
        previous_close: first_of(&[
            raw_f64(&detail.previous_close),
            raw_f64(&price.regular_market_previous_close),
        ]),
        market_cap: first_of(&[raw_f64(&detail.market_cap), raw_f64(&price.market_cap)]),
        forward_pe: first_of(&[raw_f64(&detail.forward_pe), raw_f64(&stats.forward_pe)]),
        trailing_pe: raw_f64(&detail.trailing_pe),
        price_to_book: raw_f64(&stats.price_to_book),
        return_on_equity: raw_f64(&financial.return_on_equity),
        dividend_yield: raw_f64(&detail.dividend_yield),
        peg_ratio: raw_f64(&stats.peg_ratio),
    };

    if snapshot == QuoteSnapshot::default() {
        return Err(FetchError::NoData {
            symbol: symbol.to_string(),
        });
    }

    Ok(snapshot)
}
