//! Weak-signal detection.
//!
//! Compares the mean rectified acceleration at the start of the chirp with
//! what an ideal chirp of the configured amplitude would produce. A loose
//! sensor or a sensor mounted on the wrong axis shows up as a tiny ratio.

use super::{AnalysisError, AnalyzerConfig, Result, Stage, trim::samples_for};
use crate::sweep::SweepConfig;
use std::f64::consts::PI;

/// Mean of |sin| over a period.
const RECTIFIED_MEAN: f64 = 2.0 / PI;

/// Returns the observed-to-expected energy ratio.
pub fn check(
    chirp: &[f64],
    sweep: &SweepConfig,
    period: f64,
    config: &AnalyzerConfig,
) -> Result<f64> {
    let window = samples_for(config.weak_signal_window_secs, period).max(1);
    if chirp.len() < window {
        return Err(AnalysisError::InsufficientSamples {
            stage: Stage::SignalCheck,
            got: chirp.len(),
            needed: window,
        });
    }

    let observed: f64 = chirp[..window].iter().map(|v| v.abs()).sum();
    let expected: f64 = (0..window)
        .map(|i| sweep.envelope(i as f64 * period) * RECTIFIED_MEAN)
        .sum();
    let ratio = if expected > 0.0 { observed / expected } else { 0.0 };

    if ratio < config.weak_signal_ratio {
        return Err(AnalysisError::WeakSignal {
            ratio,
            threshold: config.weak_signal_ratio,
        });
    }
    Ok(ratio)
}
