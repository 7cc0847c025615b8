use crate::domain::catalog::{pad_code, Catalog, CatalogRow, DEFAULT_SECTOR};
use crate::error::DataLoadError;
use encoding_rs::EUC_KR;
use std::borrow::Cow;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;

const CODE_HEADERS: &[&str] = &["code", "종목코드"];
const NAME_HEADERS: &[&str] = &["name", "종목명"];
const SECTOR_HEADERS: &[&str] = &["sector", "업종"];

pub fn load_catalog(path: &Path) -> Result<Catalog, DataLoadError> {
    let bytes = std::fs::read(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let catalog = parse_catalog(&bytes)?;
    tracing::info!(
        path = %path.display(),
        rows = catalog.len(),
        version = catalog.version,
        "catalog loaded"
    );
    Ok(catalog)
}

pub fn parse_catalog(bytes: &[u8]) -> Result<Catalog, DataLoadError> {
    let text = decode_catalog_text(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let code_idx = find_column(&headers, CODE_HEADERS).ok_or(DataLoadError::MissingColumn("Code"))?;
    let name_idx = find_column(&headers, NAME_HEADERS).ok_or(DataLoadError::MissingColumn("Name"))?;
    // Sector is nullable; a catalog without the column puts everything under the default.
    let sector_idx = find_column(&headers, SECTOR_HEADERS);

    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for (idx, record) in reader.records().enumerate() {
        // records() starts after the header line; lines are 1-based.
        let line = idx + 2;
        let record = record?;

        let raw_code = record.get(code_idx).unwrap_or("");
        let code = pad_code(raw_code).ok_or_else(|| DataLoadError::Malformed {
            line,
            reason: format!("invalid code `{raw_code}`"),
        })?;

        let name = record
            .get(name_idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DataLoadError::Malformed {
                line,
                reason: "missing name".to_string(),
            })?
            .to_string();

        let sector = sector_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !is_null_marker(s))
            .unwrap_or(DEFAULT_SECTOR)
            .to_string();

        if !seen.insert(code.clone()) {
            return Err(DataLoadError::DuplicateCode { code, line });
        }

        rows.push(CatalogRow { code, name, sector });
    }

    Ok(Catalog {
        rows,
        version: fingerprint(bytes),
        loaded_at: chrono::Utc::now(),
    })
}

/// UTF-8 (BOM stripped) when valid, otherwise EUC-KR as exported by Korean spreadsheet tools.
fn decode_catalog_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let (cow, _, had_errors) = EUC_KR.decode(bytes);
            if had_errors {
                tracing::warn!("catalog is neither valid UTF-8 nor EUC-KR; some names may be garbled");
            }
            cow
        }
    }
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().to_ascii_lowercase();
        candidates.iter().any(|c| h == *c)
    })
}

fn is_null_marker(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null")
}

fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
