pub mod cache;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod mapper;
pub mod normalize;
pub mod pipeline;
pub mod render;

pub mod config {
    use crate::domain::metric::MetricPolicyTable;
    use crate::error::ConfigurationError;
    use crate::ingest::fetcher::FetchOptions;
    use std::path::PathBuf;
    use std::time::Duration;

    const DEFAULT_CATALOG_PATH: &str = "kospi_list.csv";
    const DEFAULT_EXCHANGE_SUFFIX: &str = "KS";
    const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
    const DEFAULT_COUNT: usize = 40;
    const DEFAULT_REQ_DELAY_MS: u64 = 100;
    const DEFAULT_ROOT_LABEL: &str = "KOSPI";
    const DEFAULT_QUOTE_TIMEOUT_SECS: u64 = 10;
    const DEFAULT_QUOTE_MAX_ATTEMPTS: u64 = 2;
    const DEFAULT_YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub catalog_path: PathBuf,
        pub exchange_suffix: String,
        pub cache_ttl: Duration,
        pub default_count: usize,
        pub request_delay: Duration,
        pub root_label: String,
        pub policy_overrides: Option<String>,
        pub quote_provider_base_url: Option<String>,
        pub quote_timeout: Duration,
        /// Attempts per ticker lookup, at least 1.
        pub quote_max_attempts: u32,
        /// Page visited to obtain a session cookie before asking for a crumb.
        pub yahoo_cookie_url: String,
        pub yahoo_crumb: Option<String>,
        pub yahoo_cookie: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self::from_lookup(|key| std::env::var(key).ok()))
        }

        /// Unparseable numbers fall back to their defaults; blank strings count as unset.
        pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
            let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
            let num = |key: &str, default: u64| {
                get(key)
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(default)
            };

            Self {
                catalog_path: get("HEATMAP_CATALOG_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_PATH)),
                exchange_suffix: get("HEATMAP_EXCHANGE_SUFFIX")
                    .unwrap_or_else(|| DEFAULT_EXCHANGE_SUFFIX.to_string()),
                cache_ttl: Duration::from_secs(num("HEATMAP_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)),
                default_count: num("HEATMAP_DEFAULT_COUNT", DEFAULT_COUNT as u64) as usize,
                request_delay: Duration::from_millis(num("QUOTE_REQ_DELAY_MS", DEFAULT_REQ_DELAY_MS)),
                root_label: get("HEATMAP_ROOT_LABEL").unwrap_or_else(|| DEFAULT_ROOT_LABEL.to_string()),
                policy_overrides: get("HEATMAP_POLICY_OVERRIDES"),
                quote_provider_base_url: get("QUOTE_PROVIDER_BASE_URL"),
                quote_timeout: Duration::from_secs(num("QUOTE_TIMEOUT_SECS", DEFAULT_QUOTE_TIMEOUT_SECS)),
                quote_max_attempts: num("QUOTE_MAX_ATTEMPTS", DEFAULT_QUOTE_MAX_ATTEMPTS).clamp(1, 10) as u32,
                yahoo_cookie_url: get("YAHOO_COOKIE_URL")
                    .unwrap_or_else(|| DEFAULT_YAHOO_COOKIE_URL.to_string()),
                yahoo_crumb: get("YAHOO_CRUMB"),
                yahoo_cookie: get("YAHOO_COOKIE"),
                sentry_dsn: get("SENTRY_DSN"),
            }
        }

        pub fn policy_table(&self) -> Result<MetricPolicyTable, ConfigurationError> {
            match self.policy_overrides.as_deref() {
                Some(spec) => MetricPolicyTable::default().with_overrides(spec),
                None => Ok(MetricPolicyTable::default()),
            }
        }

        pub fn fetch_options(&self, limit: usize) -> FetchOptions {
            FetchOptions {
                limit,
                exchange_suffix: self.exchange_suffix.clone(),
                request_delay: self.request_delay,
                ..FetchOptions::default()
            }
        }
    }

}
