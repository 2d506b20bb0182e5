use serde::{Deserialize, Serialize};

use super::BenchmarkMetric;

/// Where a value falls within a benchmark distribution, on a 0..=100 scale.
///
/// The value is clamped to `[min, max]` and then linearly interpolated
/// between the anchor points `(0, min) (25, p25) (50, p50) (75, p75)
/// (90, p90) (100, max)`. A degenerate (zero-width) segment maps to its
/// lower anchor's rank.
pub fn percentile_rank(value: f64, b: &BenchmarkMetric) -> f64 {
    if value <= b.min {
        return 0.0;
    }
    if value >= b.max {
        return 100.0;
    }

    let anchors = [
        (0.0, b.min),
        (25.0, b.p25),
        (50.0, b.p50),
        (75.0, b.p75),
        (90.0, b.p90),
        (100.0, b.max),
    ];
    for pair in anchors.windows(2) {
        let (lo_rank, lo_val) = pair[0];
        let (hi_rank, hi_val) = pair[1];
        if value <= hi_val {
            if hi_val <= lo_val {
                return lo_rank;
            }
            return lo_rank + (value - lo_val) / (hi_val - lo_val) * (hi_rank - lo_rank);
        }
    }
    100.0
}

/// Percentile of a project among its peers: the share of peer values at or
/// below the project's value, rounded to one decimal place.
pub fn peer_percentile(project_value: f64, peer_values: &[f64]) -> f64 {
    if peer_values.is_empty() {
        return 0.0;
    }
    let mut sorted = peer_values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let at_or_below = sorted.iter().take_while(|v| **v <= project_value).count();
    let pct = at_or_below as f64 / sorted.len() as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub slope: f64,
    pub current_value: f64,
    /// Percent change from the first to the last value (0 when the first
    /// value is 0).
    pub change_rate: f64,
    /// Next value on the fitted line: last value plus slope.
    pub projected_next: f64,
    pub data_points: usize,
}

const TREND_THRESHOLD: f64 = 0.05;

/// Least-squares trend over an evenly spaced series. Needs at least two
/// points.
pub fn analyze_trend(values: &[f64]) -> Option<TrendAnalysis> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let nf = n as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let denom = nf * sum_xx - sum_x * sum_x;
    let slope = if denom == 0.0 {
        0.0
    } else {
        (nf * sum_xy - sum_x * sum_y) / denom
    };

    let direction = if slope > TREND_THRESHOLD {
        TrendDirection::Improving
    } else if slope < -TREND_THRESHOLD {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };

    let first = values[0];
    let last = values[n - 1];
    let change_rate = if first != 0.0 {
        (last - first) / first * 100.0
    } else {
        0.0
    };

    Some(TrendAnalysis {
        direction,
        slope,
        current_value: last,
        change_rate,
        projected_next: last + slope,
        data_points: n,
    })
}
