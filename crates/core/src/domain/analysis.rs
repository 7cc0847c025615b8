use crate::domain::metric::{MetricId, SizeBasis};
use serde::{Deserialize, Serialize};

/// Smallest area any leaf may have.
pub const MIN_AREA: f64 = 0.1;

pub const NOT_AVAILABLE: &str = "N/A";

/// Normalized row consumed by the renderer. Ratio fields hold 0 when unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRow {
    pub code: String,
    pub instrument: String,
    pub sector: String,
    pub price: f64,
    pub percent_change: f64,
    pub per: f64,
    pub pbr: f64,
    pub peg: f64,
    pub roe: f64,
    pub dividend_yield: f64,
    pub market_cap: f64,
    /// `|percent_change| + 0.1`, always positive.
    pub abs_change_size: f64,
}

impl AnalysisRow {
    pub fn metric_value(&self, metric: MetricId) -> f64 {
        match metric {
            MetricId::Change => self.percent_change,
            MetricId::Per => self.per,
            MetricId::Pbr => self.pbr,
            MetricId::Peg => self.peg,
            MetricId::Roe => self.roe,
            MetricId::DividendYield => self.dividend_yield,
        }
    }

    /// Leaf area for the given basis. Never zero or negative.
    pub fn size_metric(&self, basis: SizeBasis) -> f64 {
        let v = match basis {
            SizeBasis::Price => self.price,
            SizeBasis::AbsChange => self.abs_change_size,
            SizeBasis::MarketCap => self.market_cap,
        };
        if v.is_finite() && v > 0.0 {
            v
        } else {
            MIN_AREA
        }
    }

    /// Text shown under the instrument name.
    pub fn display_value(&self, metric: MetricId) -> String {
        let v = self.metric_value(metric);
        if metric.zero_means_unknown() && v == 0.0 {
            return NOT_AVAILABLE.to_string();
        }
        match metric {
            MetricId::Change => format!("{v:+.2}%"),
            m if m.is_percent() => format!("{v:.2}%"),
            _ => format!("{v:.2}"),
        }
    }
}

/// One fetch cycle's normalized rows. Immutable once built; shared via `Arc` by the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBatch {
    pub batch_id: uuid::Uuid,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub rows: Vec<AnalysisRow>,
    /// Tickers attempted, successful or not.
    pub attempted: usize,
    pub failure_count: usize,
    /// Stopped early by cancellation; such batches are never cached.
    pub cancelled: bool,
}

impl FetchBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.attempted as f64
        }
    }
}
