use serde::{Deserialize, Serialize};

/// Raw per-ticker quote fields as returned by the provider. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub current_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub market_cap: Option<f64>,
    pub forward_pe: Option<f64>,
    pub trailing_pe: Option<f64>,
    pub price_to_book: Option<f64>,
    /// Fraction, e.g. 0.12 for 12%.
    pub return_on_equity: Option<f64>,
    /// Fraction, e.g. 0.025 for 2.5%.
    pub dividend_yield: Option<f64>,
    pub peg_ratio: Option<f64>,
}
