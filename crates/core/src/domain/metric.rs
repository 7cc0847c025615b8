use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selectable display/color metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum MetricId {
    Change,
    Per,
    Pbr,
    Roe,
    DividendYield,
    Peg,
}

impl MetricId {
    pub const ALL: [MetricId; 6] = [
        MetricId::Change,
        MetricId::Per,
        MetricId::Pbr,
        MetricId::Roe,
        MetricId::DividendYield,
        MetricId::Peg,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::Per => "per",
            Self::Pbr => "pbr",
            Self::Roe => "roe",
            Self::DividendYield => "dividend_yield",
            Self::Peg => "peg",
        }
    }

    /// Label shown in the selector.
    pub fn label(self) -> &'static str {
        match self {
            Self::Change => "등락률",
            Self::Per => "PER",
            Self::Pbr => "PBR",
            Self::Roe => "ROE",
            Self::DividendYield => "배당수익률",
            Self::Peg => "PEG",
        }
    }

    /// Valuation ratios use 0 as the "unknown" placeholder.
    pub fn zero_means_unknown(self) -> bool {
        matches!(self, Self::Per | Self::Pbr | Self::Peg)
    }

    /// Stored as a percentage (fraction * 100).
    pub fn is_percent(self) -> bool {
        matches!(self, Self::Change | Self::Roe | Self::DividendYield)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for MetricId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let out = match t {
            "등락률" => Self::Change,
            "배당수익률" => Self::DividendYield,
            _ => match t.to_ascii_lowercase().as_str() {
                "change" | "pct_change" | "percent_change" => Self::Change,
                "per" | "pe" => Self::Per,
                "pbr" | "pb" => Self::Pbr,
                "roe" => Self::Roe,
                "dividend_yield" | "dividend" => Self::DividendYield,
                "peg" => Self::Peg,
                _ => return Err(ConfigurationError::UnknownMetric(t.to_string())),
            },
        };
        Ok(out)
    }
}

impl TryFrom<String> for MetricId {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Field that drives leaf area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum SizeBasis {
    Price,
    AbsChange,
    MarketCap,
}

impl SizeBasis {
    pub const ALL: [SizeBasis; 3] = [SizeBasis::Price, SizeBasis::AbsChange, SizeBasis::MarketCap];

    pub fn key(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::AbsChange => "abs_change",
            Self::MarketCap => "market_cap",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Price => "현재가",
            Self::AbsChange => "등락률(절대값)",
            Self::MarketCap => "시가총액",
        }
    }
}

impl Default for SizeBasis {
    fn default() -> Self {
        Self::Price
    }
}

impl fmt::Display for SizeBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SizeBasis {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let out = match t {
            "현재가" => Self::Price,
            "등락률(절대값)" => Self::AbsChange,
            "시가총액" => Self::MarketCap,
            _ => match t.to_ascii_lowercase().as_str() {
                "price" => Self::Price,
                "abs_change" | "change" => Self::AbsChange,
                "market_cap" | "marketcap" | "cap" => Self::MarketCap,
                _ => return Err(ConfigurationError::UnknownSizeBasis(t.to_string())),
            },
        };
        Ok(out)
    }
}

impl TryFrom<String> for SizeBasis {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScale {
    /// Red (low) through yellow to green (high).
    DivergingRedGreen,
    /// Green (low) through yellow to red (high).
    DivergingRedGreenReversed,
    /// Light to dark green.
    SequentialGreen,
}

impl FromStr for ColorScale {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diverging" | "rdylgn" | "diverging_red_green" => Ok(Self::DivergingRedGreen),
            "diverging_reversed" | "rdylgn_r" | "diverging_red_green_reversed" => {
                Ok(Self::DivergingRedGreenReversed)
            }
            "sequential" | "ylgn" | "sequential_green" => Ok(Self::SequentialGreen),
            other => Err(ConfigurationError::UnknownColorScale(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule", content = "value")]
pub enum MidpointRule {
    Fixed(f64),
    Median,
    /// No midpoint; the color range is the data range.
    Auto,
}

impl FromStr for MidpointRule {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        match t.to_ascii_lowercase().as_str() {
            "median" => Ok(Self::Median),
            "auto" | "none" => Ok(Self::Auto),
            _ => t
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Self::Fixed)
                .ok_or_else(|| ConfigurationError::InvalidOverride(format!("mid:{t}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPolicy {
    pub value_field: MetricId,
    pub color_scale: ColorScale,
    pub midpoint: MidpointRule,
}

/// Static metric -> (value field, color scale, midpoint rule) table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPolicyTable {
    entries: Vec<(MetricId, MetricPolicy)>,
}

impl Default for MetricPolicyTable {
    fn default() -> Self {
        let policy = |value_field, color_scale, midpoint| MetricPolicy {
            value_field,
            color_scale,
            midpoint,
        };

        // Valuation ratios: low reads as cheap, so green sits at the low end.
        Self {
            entries: vec![
                (
                    MetricId::Change,
                    policy(MetricId::Change, ColorScale::DivergingRedGreen, MidpointRule::Fixed(0.0)),
                ),
                (
                    MetricId::Per,
                    policy(MetricId::Per, ColorScale::DivergingRedGreenReversed, MidpointRule::Median),
                ),
                (
                    MetricId::Pbr,
                    policy(MetricId::Pbr, ColorScale::DivergingRedGreenReversed, MidpointRule::Median),
                ),
                (
                    MetricId::Peg,
                    policy(MetricId::Peg, ColorScale::DivergingRedGreenReversed, MidpointRule::Median),
                ),
                (
                    MetricId::Roe,
                    policy(MetricId::Roe, ColorScale::SequentialGreen, MidpointRule::Auto),
                ),
                (
                    MetricId::DividendYield,
                    policy(MetricId::DividendYield, ColorScale::SequentialGreen, MidpointRule::Auto),
                ),
            ],
        }
    }
}

impl MetricPolicyTable {
    pub fn get(&self, metric: MetricId) -> Result<&MetricPolicy, ConfigurationError> {
        self.entries
            .iter()
            .find(|(id, _)| *id == metric)
            .map(|(_, p)| p)
            .ok_or_else(|| ConfigurationError::UnknownMetric(metric.key().to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricId, &MetricPolicy)> {
        self.entries.iter().map(|(id, p)| (*id, p))
    }

    /// Apply overrides of the form `PBR=mid:1.0;PER=scale:diverging,mid:median`.
    pub fn with_overrides(mut self, spec: &str) -> Result<Self, ConfigurationError> {
        for entry in spec.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (metric, directives) = entry
                .split_once('=')
                .ok_or_else(|| ConfigurationError::InvalidOverride(entry.to_string()))?;
            let metric: MetricId = metric.parse()?;

            let slot = self
                .entries
                .iter_mut()
                .find(|(id, _)| *id == metric)
                .map(|(_, p)| p)
                .ok_or_else(|| ConfigurationError::UnknownMetric(metric.key().to_string()))?;

            for directive in directives.split(',') {
                let directive = directive.trim();
                match directive.split_once(':') {
                    Some(("scale", v)) => slot.color_scale = v.parse()?,
                    Some(("mid", v)) => slot.midpoint = v.parse()?,
                    _ => return Err(ConfigurationError::InvalidOverride(directive.to_string())),
                }
            }
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_korean_labels_and_ascii_keys() {
        assert_eq!("등락률".parse::<MetricId>().unwrap(), MetricId::Change);
        assert_eq!("change".parse::<MetricId>().unwrap(), MetricId::Change);
        assert_eq!("PER".parse::<MetricId>().unwrap(), MetricId::Per);
        assert_eq!("배당수익률".parse::<MetricId>().unwrap(), MetricId::DividendYield);
        assert_eq!("현재가".parse::<SizeBasis>().unwrap(), SizeBasis::Price);
        assert_eq!("등락률(절대값)".parse::<SizeBasis>().unwrap(), SizeBasis::AbsChange);
        assert_eq!("market_cap".parse::<SizeBasis>().unwrap(), SizeBasis::MarketCap);
    }

    #[test]
    fn unknown_keys_are_configuration_errors() {
        assert_eq!(
            "EV/EBITDA".parse::<MetricId>(),
            Err(ConfigurationError::UnknownMetric("EV/EBITDA".to_string()))
        );
        assert!(matches!(
            "volume".parse::<SizeBasis>(),
            Err(ConfigurationError::UnknownSizeBasis(_))
        ));
    }

    #[test]
    fn every_metric_has_exactly_one_policy() {
        let table = MetricPolicyTable::default();
        for metric in MetricId::ALL {
            assert_eq!(table.iter().filter(|(id, _)| *id == metric).count(), 1);
            assert_eq!(table.get(metric).unwrap().value_field, metric);
        }
    }

    #[test]
    fn overrides_replace_scale_and_midpoint() {
        let table = MetricPolicyTable::default()
            .with_overrides("PBR=mid:1.0; per=scale:diverging,mid:auto")
            .unwrap();

        assert_eq!(table.get(MetricId::Pbr).unwrap().midpoint, MidpointRule::Fixed(1.0));
        let per = table.get(MetricId::Per).unwrap();
        assert_eq!(per.color_scale, ColorScale::DivergingRedGreen);
        assert_eq!(per.midpoint, MidpointRule::Auto);
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        assert!(MetricPolicyTable::default().with_overrides("PBR").is_err());
        assert!(MetricPolicyTable::default().with_overrides("PBR=mid:abc").is_err());
        assert!(MetricPolicyTable::default().with_overrides("PBR=width:3").is_err());
        assert!(MetricPolicyTable::default().with_overrides("XYZ=mid:1").is_err());
    }

    #[test]
    fn serde_uses_ascii_keys_and_accepts_labels() {
        assert_eq!(serde_json::to_value(MetricId::DividendYield).unwrap(), "dividend_yield");
        let m: MetricId = serde_json::from_value(serde_json::json!("등락률")).unwrap();
        assert_eq!(m, MetricId::Change);
    }
}
