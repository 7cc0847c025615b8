use std::path::PathBuf;

/// Catalog could not be loaded. Fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog is missing required column `{0}`")]
    MissingColumn(&'static str),

    #[error("malformed catalog row at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("duplicate catalog code {code} at line {line}")]
    DuplicateCode { code: String, line: usize },

    #[error("catalog csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// One ticker lookup failed. The row is dropped, the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("quote request for {symbol} failed: {detail}")]
    Transport { symbol: String, detail: String },

    #[error("quote provider HTTP {status} for {symbol}")]
    Http { symbol: String, status: u16 },

    #[error("quote response for {symbol} could not be parsed: {detail}")]
    Parse { symbol: String, detail: String },

    #[error("quote provider has no data for {symbol}")]
    NoData { symbol: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Parse { .. } | Self::NoData { .. } => false,
        }
    }
}

/// UI/core contract mismatch: unknown metric or size key, bad policy override.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("unknown size basis `{0}`")]
    UnknownSizeBasis(String),

    #[error("unknown color scale `{0}`")]
    UnknownColorScale(String),

    #[error("invalid policy override `{0}`")]
    InvalidOverride(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_throttling_are_retryable() {
        let t = FetchError::Transport {
            symbol: "005930.KS".to_string(),
            detail: "timeout".to_string(),
        };
        assert!(t.is_retryable());

        let throttled = FetchError::Http {
            symbol: "005930.KS".to_string(),
            status: 429,
        };
        assert!(throttled.is_retryable());

        let not_found = FetchError::Http {
            symbol: "999999.KS".to_string(),
            status: 404,
        };
        assert!(!not_found.is_retryable());

        let missing = FetchError::NoData {
            symbol: "999999.KS".to_string(),
        };
        assert!(!missing.is_retryable());
    }
}
