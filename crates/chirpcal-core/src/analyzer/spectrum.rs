//! Magnitude response of the trimmed chirp.
//!
//! For a linear chirp of amplitude `a` sweeping at `dfdt`, the one-sided
//! DFT magnitude at each frequency is `a / (2 * sqrt(dfdt) * T)` times the
//! axis' gain there, so normalising by that factor leaves the gain.

use super::AnalyzerConfig;
use crate::{solution::FrequencyResponse, sweep::SweepConfig};
use rustfft::{FftPlanner, num_complex::Complex64};
use std::f64::consts::PI;

pub fn response(
    chirp: &[f64],
    sweep: &SweepConfig,
    period: f64,
    config: &AnalyzerConfig,
) -> FrequencyResponse {
    let n = chirp.len();
    if n < 2 {
        return FrequencyResponse::default();
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<Complex64> = chirp.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    fft.process(&mut buffer);

    let df = 1.0 / (n as f64 * period);
    let lo = (sweep.f0 / df).ceil() as usize;
    let hi = ((sweep.f1 / df).floor() as usize).min(n / 2);
    if lo > hi {
        return FrequencyResponse::default();
    }

    let band_samples = (sweep.f1 - sweep.f0) / (sweep.dfdt * period);
    let scale = 2.0 * (sweep.f1 - sweep.f0) / (sweep.a * sweep.dfdt.sqrt() * band_samples);
    let raw: Vec<f64> = buffer[lo..=hi].iter().map(|c| c.norm() * scale).collect();

    let half_width = ((config.smoothing_hz / df) / 2.0).round().max(1.0) as usize;
    let g = triangular_smooth(&raw, half_width);
    let w = (lo..=hi).map(|k| 2.0 * PI * k as f64 * df).collect();
    FrequencyResponse::new(w, g)
}

/// Bartlett-weighted moving average; the kernel is renormalised at the
/// edges so a constant input stays constant.
pub fn triangular_smooth(x: &[f64], half_width: usize) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let from = i.saturating_sub(half_width);
            let to = (i + half_width).min(n - 1);
            let (sum, weight) = (from..=to).fold((0.0, 0.0), |(sum, weight), j| {
                let w = (half_width + 1 - i.abs_diff(j)) as f64;
                (sum + w * x[j], weight + w)
            });
            sum / weight
        })
        .collect()
}
