use crate::domain::analysis::AnalysisRow;
use crate::domain::metric::{ColorScale, MetricId, MetricPolicyTable, MidpointRule};
use crate::error::ConfigurationError;
use serde::Serialize;

/// Rendering parameters derived from the selected metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedVisual {
    pub value_field: MetricId,
    pub color_scale: ColorScale,
    /// `None` means auto-ranged.
    pub midpoint: Option<f64>,
}

pub fn resolve(
    table: &MetricPolicyTable,
    metric: MetricId,
    rows: &[AnalysisRow],
) -> Result<ResolvedVisual, ConfigurationError> {
    let policy = table.get(metric)?;

    let midpoint = match policy.midpoint {
        MidpointRule::Fixed(v) => Some(v),
        MidpointRule::Auto => None,
        MidpointRule::Median => median_of(policy.value_field, rows),
    };

    Ok(ResolvedVisual {
        value_field: policy.value_field,
        color_scale: policy.color_scale,
        midpoint,
    })
}

/// String entry point used by outer layers that receive raw selector values.
pub fn resolve_str(
    table: &MetricPolicyTable,
    metric_id: &str,
    rows: &[AnalysisRow],
) -> Result<ResolvedVisual, ConfigurationError> {
    resolve(table, metric_id.parse()?, rows)
}

/// Median of `field` over `rows`. Fields where 0 stands for "unknown" only count positive
/// values. Returns `None` when nothing qualifies.
pub fn median_of(field: MetricId, rows: &[AnalysisRow]) -> Option<f64> {
    let mut values: Vec<f64> = rows
        .iter()
        .map(|r| r.metric_value(field))
        .filter(|v| v.is_finite())
        .filter(|v| !field.zero_means_unknown() || *v > 0.0)
        .collect();

    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
