use crate::domain::analysis::{AnalysisRow, FetchBatch};
use crate::domain::catalog::CatalogRow;
use crate::ingest::fetcher::{FetchFailure, FetchReport};
use crate::ingest::types::QuoteSnapshot;

/// Added to `|percent_change|` so a flat ticker still gets a visible leaf.
pub const ABS_CHANGE_EPSILON: f64 = 0.1;

/// Round to 2 decimals; negative zero collapses to zero.
pub fn round2(v: f64) -> f64 {
    let r = (v * 100.0).round() / 100.0;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

/// Missing, non-finite and zero all read as "not provided".
fn provided(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x != 0.0)
}

pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return 0.0;
    }
    round2((current - previous) / previous * 100.0)
}

pub fn normalize(snapshot: &QuoteSnapshot, row: &CatalogRow) -> AnalysisRow {
    let price = snapshot.current_price.filter(|v| v.is_finite()).unwrap_or(0.0);
    let previous = snapshot.previous_close.unwrap_or(0.0);
    let change = percent_change(price, previous);

    let per = provided(snapshot.forward_pe)
        .or(provided(snapshot.trailing_pe))
        .unwrap_or(0.0);
    let pbr = provided(snapshot.price_to_book).unwrap_or(0.0);
    let peg = provided(snapshot.peg_ratio).unwrap_or(0.0);
    let roe = provided(snapshot.return_on_equity).unwrap_or(0.0) * 100.0;
    let dividend_yield = provided(snapshot.dividend_yield).unwrap_or(0.0) * 100.0;
    let market_cap = snapshot
        .market_cap
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0);

    AnalysisRow {
        code: row.code.clone(),
        instrument: row.name.clone(),
        sector: row.sector.clone(),
        price,
        percent_change: change,
        per: round2(per),
        pbr: round2(pbr),
        peg: round2(peg),
        roe: round2(roe),
        dividend_yield: round2(dividend_yield),
        market_cap,
        abs_change_size: change.abs() + ABS_CHANGE_EPSILON,
    }
}

/// Per-row results aggregated into a batch. Failed rows are counted, never kept.
pub fn normalize_report(report: FetchReport) -> FetchBatch {
    let attempted = report.attempted();
    let cancelled = report.cancelled;

    let per_row: Vec<Result<AnalysisRow, FetchFailure>> = report
        .results
        .into_iter()
        .map(|r| r.map(|q| normalize(&q.snapshot, &q.row)))
        .collect();

    let mut rows = Vec::with_capacity(per_row.len());
    let mut failure_count = 0;
    for r in per_row {
        match r {
            Ok(row) => rows.push(row),
            Err(_) => failure_count += 1,
        }
    }

    FetchBatch {
        batch_id: uuid::Uuid::new_v4(),
        fetched_at: chrono::Utc::now(),
        rows,
        attempted,
        failure_count,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::SizeBasis;
    use crate::error::FetchError;
    use crate::ingest::fetcher::testing::{catalog_row, fast_opts, quote, StubProvider};
    use crate::ingest::fetcher::{fetch_quotes, FetchedQuote, NoProgress};
    use tokio_util::sync::CancellationToken;

    fn samsung() -> CatalogRow {
        catalog_row("005930", "삼성전자", "전기전자")
    }

    #[test]
    fn computes_rounded_percent_change() {
        let row = normalize(&quote(71000.0, 70000.0), &samsung());
        assert_eq!(row.percent_change, 1.43);
        assert_eq!(row.price, 71000.0);
        assert_eq!(row.abs_change_size, 1.43 + 0.1);
    }

    #[test]
    fn zero_or_missing_previous_close_gives_zero_change() {
        let row = normalize(&quote(71000.0, 0.0), &samsung());
        assert_eq!(row.percent_change, 0.0);
        assert_eq!(row.abs_change_size, 0.1);

        let snap = QuoteSnapshot {
            current_price: Some(71000.0),
            ..QuoteSnapshot::default()
        };
        assert_eq!(normalize(&snap, &samsung()).percent_change, 0.0);
    }

    #[test]
    fn pe_prefers_forward_then_trailing_then_zero() {
        let mut snap = QuoteSnapshot {
            forward_pe: Some(9.876),
            trailing_pe: Some(14.2),
            ..QuoteSnapshot::default()
        };
        assert_eq!(normalize(&snap, &samsung()).per, 9.88);

        snap.forward_pe = Some(0.0);
        assert_eq!(normalize(&snap, &samsung()).per, 14.2);

        snap.forward_pe = None;
        snap.trailing_pe = None;
        let row = normalize(&snap, &samsung());
        assert_eq!(row.per, 0.0);
        assert_eq!(row.display_value(crate::domain::metric::MetricId::Per), "N/A");
    }

    #[test]
    fn fractions_become_percentages() {
        let snap = QuoteSnapshot {
            return_on_equity: Some(0.08571),
            dividend_yield: Some(0.0203),
            ..QuoteSnapshot::default()
        };
        let row = normalize(&snap, &samsung());
        assert_eq!(row.roe, 8.57);
        assert_eq!(row.dividend_yield, 2.03);
    }

    #[test]
    fn size_metric_is_strictly_positive_for_every_basis() {
        let rows = [
            normalize(&QuoteSnapshot::default(), &samsung()),
            normalize(&quote(100.0, 100.0), &samsung()),
            normalize(&quote(90.0, 100.0), &samsung()),
        ];
        for row in &rows {
            for basis in SizeBasis::ALL {
                assert!(row.size_metric(basis) > 0.0, "{basis} for {row:?}");
            }
        }
        assert_eq!(rows[1].size_metric(SizeBasis::AbsChange), 0.1);
    }

    #[tokio::test]
    async fn fetch_and_normalize_is_deterministic() {
        let catalog = [
            catalog_row("005930", "삼성전자", "전기전자"),
            catalog_row("000660", "SK하이닉스", "전기전자"),
            catalog_row("005380", "현대차", "운수장비"),
        ];
        let provider = StubProvider::default()
            .with("005930.KS", quote(71000.0, 70000.0))
            .with(
                "000660.KS",
                QuoteSnapshot {
                    trailing_pe: Some(7.3),
                    price_to_book: Some(1.9),
                    ..quote(180000.0, 185000.0)
                },
            )
            .with(
                "005380.KS",
                QuoteSnapshot {
                    dividend_yield: Some(0.041),
                    ..quote(250000.0, 250000.0)
                },
            );

        let mut runs = Vec::new();
        for _ in 0..2 {
            let report = fetch_quotes(
                &provider,
                &catalog,
                &fast_opts(3),
                &NoProgress,
                &CancellationToken::new(),
            )
            .await;
            let batch = normalize_report(report);
            assert_eq!(batch.rows.len(), 3);
            runs.push(serde_json::to_vec(&batch.rows).unwrap());
        }
        assert_eq!(provider.calls(), 6);
        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn report_aggregates_successes_and_failures() {
        let report = FetchReport {
            results: vec![
                Ok(FetchedQuote {
                    row: samsung(),
                    snapshot: quote(1.0, 1.0),
                }),
                Err(FetchFailure {
                    code: "999999".to_string(),
                    error: FetchError::NoData {
                        symbol: "999999.KS".to_string(),
                    },
                }),
            ],
            limit: 2,
            cancelled: false,
        };

        let batch = normalize_report(report);
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.attempted, 2);
        assert_eq!(batch.failure_count, 1);
        assert_eq!(batch.failure_ratio(), 0.5);
    }

    #[test]
    fn all_failures_yield_an_empty_batch() {
        let report = FetchReport {
            results: vec![],
            limit: 0,
            cancelled: false,
        };
        let batch = normalize_report(report);
        assert!(batch.is_empty());
        assert_eq!(batch.attempted, 0);
    }
}
