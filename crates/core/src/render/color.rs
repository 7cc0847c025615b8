use crate::domain::metric::ColorScale;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

// ColorBrewer RdYlGn, 11 classes, low to high.
const RD_YL_GN: [Rgb; 11] = [
    Rgb(165, 0, 38),
    Rgb(215, 48, 39),
    Rgb(244, 109, 67),
    Rgb(253, 174, 97),
    Rgb(254, 224, 139),
    Rgb(255, 255, 191),
    Rgb(217, 239, 139),
    Rgb(166, 217, 106),
    Rgb(102, 189, 99),
    Rgb(26, 152, 80),
    Rgb(0, 104, 55),
];

// ColorBrewer YlGn, 9 classes, low to high.
const YL_GN: [Rgb; 9] = [
    Rgb(255, 255, 229),
    Rgb(247, 252, 185),
    Rgb(217, 240, 163),
    Rgb(173, 221, 142),
    Rgb(120, 198, 121),
    Rgb(65, 171, 93),
    Rgb(35, 132, 67),
    Rgb(0, 104, 55),
    Rgb(0, 69, 41),
];

/// Color at position `t` in `[0, 1]` (clamped), linearly interpolated between stops.
pub fn sample(scale: ColorScale, t: f64) -> Rgb {
    let (stops, reversed): (&[Rgb], bool) = match scale {
        ColorScale::DivergingRedGreen => (&RD_YL_GN, false),
        ColorScale::DivergingRedGreenReversed => (&RD_YL_GN, true),
        ColorScale::SequentialGreen => (&YL_GN, false),
    };

    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
    let t = if reversed { 1.0 - t } else { t };

    let scaled = t * (stops.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(stops.len() - 1);
    let frac = scaled - lo as f64;

    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (a, b) = (stops[lo], stops[hi]);
    Rgb(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Value range mapped onto a color scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorAxis {
    pub scale: ColorScale,
    pub cmin: f64,
    pub cmax: f64,
    pub midpoint: Option<f64>,
}

impl ColorAxis {
    /// Range from the data; with a midpoint the range is widened to sit symmetric around it.
    pub fn fit(scale: ColorScale, midpoint: Option<f64>, values: impl IntoIterator<Item = f64>) -> Self {
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for v in values.into_iter().filter(|v| v.is_finite()) {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if lo > hi {
            let m = midpoint.unwrap_or(0.0);
            lo = m;
            hi = m;
        }

        let (cmin, cmax) = match midpoint {
            Some(m) => {
                let half = (hi - m).abs().max((m - lo).abs());
                (m - half, m + half)
            }
            None => (lo, hi),
        };

        Self {
            scale,
            cmin,
            cmax,
            midpoint,
        }
    }

    pub fn position(&self, v: f64) -> f64 {
        let span = self.cmax - self.cmin;
        if span.is_nan() || span <= 0.0 || !v.is_finite() {
            return 0.5;
        }
        ((v - self.cmin) / span).clamp(0.0, 1.0)
    }

    pub fn color(&self, v: f64) -> Rgb {
        sample(self.scale, self.position(v))
    }
}
