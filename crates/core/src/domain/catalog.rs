use serde::{Deserialize, Serialize};

pub const CODE_WIDTH: usize = 6;
pub const DEFAULT_SECTOR: &str = "Other";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    /// Six-character, left-zero-padded KRX code, e.g. `005930`.
    pub code: String,
    pub name: String,
    pub sector: String,
}

impl CatalogRow {
    /// Provider symbol, e.g. `005930.KS`.
    pub fn symbol(&self, exchange_suffix: &str) -> String {
        format!("{}.{}", self.code, exchange_suffix.trim_start_matches('.'))
    }
}

/// Loaded catalog. Row order is priority order (pre-sorted in the source, e.g. by market cap).
#[derive(Debug, Clone)]
pub struct Catalog {
    pub rows: Vec<CatalogRow>,
    /// Content fingerprint of the source, used to key cached fetch batches.
    pub version: u64,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Clamp a requested result count to the catalog size.
    pub fn clamp_count(&self, requested: usize) -> usize {
        requested.min(self.rows.len())
    }
}

/// Left-pad a code to `CODE_WIDTH` with zeros. Returns `None` for empty codes, codes longer
/// than the width, and codes with non-alphanumeric characters.
///
/// Spreadsheet exports sometimes store numeric codes as floats (`5930.0`); the fractional
/// zero suffix is dropped before padding.
pub fn pad_code(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if let Some(int_part) = s.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.bytes().all(|b| b.is_ascii_digit()) {
            s = int_part;
        }
    }

    if s.is_empty() || s.len() > CODE_WIDTH || !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }

    Some(format!("{s:0>width$}", width = CODE_WIDTH))
}
