//! Frequency-response estimation from a recorded chirp sweep.
//!
//! The pipeline runs in a fixed order and every stage can reject the
//! recording with a named [`AnalysisError`]:
//!
//! 1. [`trim`] isolates the chirp between the two quiet gaps that surround it.
//! 2. [`signal`] checks that the chirp was actually felt by the sensor.
//! 3. [`spectrum`] turns the chirp into a smoothed magnitude response.
//! 4. [`regression`] recovers the sample-index to frequency mapping.
//! 5. [`resonance`] picks the dominant peak and its damping.

use crate::{
    solution::{CalibrationSolution, FrequencyResponse},
    sweep::SweepConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod regression;
pub mod resonance;
pub mod signal;
pub mod spectrum;
pub mod trim;

pub use regression::FrequencyMap;
pub use trim::Trimmed;

/// Pipeline stage that ran out of samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Trim,
    SignalCheck,
    Regression,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Trim => "trim",
            Stage::SignalCheck => "signal check",
            Stage::Regression => "regression",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("could not locate the sweep's marker steps in the recording")]
    StepsNotFound,
    #[error("insufficient samples at {stage}: got {got}, needed {needed}")]
    InsufficientSamples {
        stage: Stage,
        got: usize,
        needed: usize,
    },
    #[error("sweep signal too weak (ratio {ratio:.3} below {threshold})")]
    WeakSignal { ratio: f64, threshold: f64 },
    #[error("frequency regression found {inliers} consistent segments, needed {needed}")]
    ConsensusFailed { inliers: usize, needed: usize },
    #[error("fitted sweep rate is off by a factor of {ratio:.3}")]
    SlopeMismatch { ratio: f64 },
    #[error("no dominant vibration found in the response")]
    NoVibration,
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Tunables for every stage of the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Length of the quiet window searched for on each side of the chirp.
    pub trim_window_secs: f64,
    /// Extra search span beyond the nominal delay.
    pub trim_slack_secs: f64,
    /// Windows within this fraction of the quietest one count as equally quiet.
    pub trim_tie_tolerance: f64,
    /// Fraction of the step acceleration that marks a step.
    pub step_threshold: f64,
    /// Minimum trimmed length as a fraction of the ideal chirp length.
    pub min_sweep_fraction: f64,
    pub weak_signal_window_secs: f64,
    pub weak_signal_ratio: f64,
    pub smoothing_hz: f64,
    pub segment_secs: f64,
    pub segment_overlap: f64,
    pub weight_power: f64,
    pub ransac_iterations: usize,
    pub ransac_sample_size: usize,
    /// Inlier residual threshold in normalised frequency units.
    pub ransac_threshold: f64,
    pub min_inliers: usize,
    /// Accepted fitted/expected slope ratio is `[1/band, band]`.
    pub slope_ratio_band: f64,
    pub seed: u64,
    /// Peak must exceed the median response by this factor.
    pub min_peak_prominence: f64,
    /// Skip the index-to-frequency regression.
    pub skip_regression: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            trim_window_secs: 0.1,
            trim_slack_secs: 0.5,
            trim_tie_tolerance: 0.25,
            step_threshold: 0.5,
            min_sweep_fraction: 0.5,
            weak_signal_window_secs: 2.0,
            weak_signal_ratio: 0.1,
            smoothing_hz: 0.5,
            segment_secs: 0.5,
            segment_overlap: 0.75,
            weight_power: 1.0,
            ransac_iterations: 200,
            ransac_sample_size: 3,
            ransac_threshold: 0.02,
            min_inliers: 10,
            slope_ratio_band: 1.25,
            seed: 0x5eed,
            min_peak_prominence: 1.5,
            skip_regression: false,
        }
    }
}

/// Everything the pipeline learned about one recording.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub trimmed: Trimmed,
    pub signal_ratio: f64,
    pub frequency_map: Option<FrequencyMap>,
    pub solution: CalibrationSolution,
}

#[derive(Clone, Debug, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Runs the full pipeline on one axis' recording.
    pub fn analyze(&self, samples: &[f64], sweep: &SweepConfig, period: f64) -> Result<Analysis> {
        let (trimmed, signal_ratio, response) = self.measure(samples, sweep, period)?;
        let chirp = &samples[trimmed.range()];
        let frequency_map = if self.config.skip_regression {
            None
        } else {
            Some(regression::fit(
                chirp,
                trimmed.start,
                &response,
                sweep,
                period,
                &self.config,
            )?)
        };
        let resonance = resonance::estimate(&response, &self.config)?;
        Ok(Analysis {
            trimmed,
            signal_ratio,
            frequency_map,
            solution: CalibrationSolution::new(resonance, response),
        })
    }

    /// Only the magnitude response, used to verify an applied shaper.
    pub fn response(
        &self,
        samples: &[f64],
        sweep: &SweepConfig,
        period: f64,
    ) -> Result<FrequencyResponse> {
        self.measure(samples, sweep, period)
            .map(|(_, _, response)| response)
    }

    fn measure(
        &self,
        samples: &[f64],
        sweep: &SweepConfig,
        period: f64,
    ) -> Result<(Trimmed, f64, FrequencyResponse)> {
        let trimmed = trim::trim(samples, sweep, period, &self.config)?;
        let chirp = &samples[trimmed.range()];
        let signal_ratio = signal::check(chirp, sweep, period, &self.config)?;
        let response = spectrum::response(chirp, sweep, period, &self.config);
        Ok((trimmed, signal_ratio, response))
    }
}
