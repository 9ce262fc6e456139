//! Locates the chirp inside a raw recording.
//!
//! A recording starts some unknown time before the firmware begins the
//! profile and ends shortly after it finishes. The marker steps are the
//! first and last samples above a fraction of the step acceleration; the
//! chirp lies between the quiet gaps that follow the opening step and
//! precede the closing one.

use super::{AnalysisError, AnalyzerConfig, Result, Stage};
use crate::sweep::SweepConfig;
use std::ops::Range;

/// Sample range of the chirp within the original recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trimmed {
    pub start: usize,
    pub end: usize,
}

impl Trimmed {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pick {
    Earliest,
    Latest,
}

pub(crate) fn samples_for(secs: f64, period: f64) -> usize {
    (secs / period).round().max(0.0) as usize
}

pub fn trim(
    samples: &[f64],
    sweep: &SweepConfig,
    period: f64,
    config: &AnalyzerConfig,
) -> Result<Trimmed> {
    let threshold = config.step_threshold * sweep.step_a;
    let first = samples
        .iter()
        .position(|v| v.abs() > threshold)
        .ok_or(AnalysisError::StepsNotFound)?;
    let last = samples
        .iter()
        .rposition(|v| v.abs() > threshold)
        .ok_or(AnalysisError::StepsNotFound)?;
    if first >= last {
        return Err(AnalysisError::StepsNotFound);
    }

    let window = samples_for(config.trim_window_secs, period).max(1);
    let steps = samples_for(4.0 * sweep.step_ti, period);
    let lead = steps + samples_for(sweep.dly2_ti + config.trim_slack_secs, period);
    let tail = steps + samples_for(sweep.dly3_ti + config.trim_slack_secs, period);
    let floor = f64::EPSILON * sweep.a * window as f64;

    let opening = first..(first + lead).min(samples.len());
    let closing = last.saturating_sub(tail)..last + 1;
    let needed = samples_for(config.min_sweep_fraction * sweep.chirp_duration(), period);
    let insufficient = |got| AnalysisError::InsufficientSamples {
        stage: Stage::Trim,
        got,
        needed,
    };

    let tolerance = config.trim_tie_tolerance;
    let opening = quietest_window(samples, opening, window, tolerance, floor, Pick::Latest)
        .ok_or_else(|| insufficient(0))?;
    let closing = quietest_window(samples, closing, window, tolerance, floor, Pick::Earliest)
        .ok_or_else(|| insufficient(0))?;

    let start = opening + window;
    let end = closing;
    let got = end.saturating_sub(start);
    if got < needed.max(1) {
        return Err(insufficient(got));
    }
    Ok(Trimmed { start, end })
}

/// Start index of the quietest `window` within `region`, breaking ties
/// within `tolerance` of the minimum towards `pick`.
fn quietest_window(
    samples: &[f64],
    region: Range<usize>,
    window: usize,
    tolerance: f64,
    floor: f64,
    pick: Pick,
) -> Option<usize> {
    if region.len() < window {
        return None;
    }
    // summed directly so silent windows stay exactly zero
    let energies: Vec<(usize, f64)> = (region.start..=region.end - window)
        .map(|start| {
            let energy = samples[start..start + window].iter().map(|v| v.abs()).sum();
            (start, energy)
        })
        .collect();
    let min = energies.iter().map(|(_, e)| *e).fold(f64::INFINITY, f64::min);
    let limit = min * (1.0 + tolerance) + floor;
    let mut quiet = energies.iter().filter(|(_, e)| *e <= limit).map(|(i, _)| *i);
    match pick {
        Pick::Earliest => quiet.next(),
        Pick::Latest => quiet.last(),
    }
}
