//! Peak picking on a measured response.

use super::{AnalysisError, AnalyzerConfig, Result};
use crate::solution::{FrequencyResponse, Resonance};
use std::f64::consts::{PI, SQRT_2};

const MIN_ZETA: f64 = 0.005;
const MAX_ZETA: f64 = 0.5;

/// Dominant resonance from the half-power bandwidth around the highest
/// peak.
pub fn estimate(response: &FrequencyResponse, config: &AnalyzerConfig) -> Result<Resonance> {
    let g = &response.g;
    let Some((peak, &g_peak)) = g.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) else {
        return Err(AnalysisError::NoVibration);
    };
    if !(g_peak > 0.0) || g_peak < config.min_peak_prominence * median(g) {
        return Err(AnalysisError::NoVibration);
    }

    let f: Vec<f64> = response.frequencies_hz().collect();
    let level = g_peak / SQRT_2;
    let crossing = |below: usize, above: usize| {
        f[below] + (level - g[below]) / (g[above] - g[below]) * (f[above] - f[below])
    };
    let left = (0..peak).rev().find(|&i| g[i] < level).map(|i| crossing(i, i + 1));
    let right = (peak + 1..g.len()).find(|&i| g[i] < level).map(|i| crossing(i, i - 1));

    let f_peak = f[peak];
    let bandwidth = match (left, right) {
        (Some(l), Some(r)) => r - l,
        (Some(l), None) => 2.0 * (f_peak - l),
        (None, Some(r)) => 2.0 * (r - f_peak),
        (None, None) => return Err(AnalysisError::NoVibration),
    };
    let zeta = (bandwidth / (2.0 * f_peak)).clamp(MIN_ZETA, MAX_ZETA);
    // |H| peaks slightly below the natural frequency
    let wc = 2.0 * PI * f_peak / (1.0 - 2.0 * zeta * zeta).sqrt();
    Ok(Resonance { wc, zeta })
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
