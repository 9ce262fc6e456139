//! Recovers which frequency the chirp was at for every recorded sample.
//!
//! The chirp is cut into overlapping Hann-windowed segments and the dominant
//! frequency of each one becomes a point `(segment centre, frequency)`, both
//! normalised to `[0, 1]`. A linear chirp puts these points on a line; a
//! consensus fit over random subsets discards segments dominated by noise
//! or harmonics, and the surviving points are fitted by weighted least
//! squares with weights taken from the measured response.

use super::{AnalysisError, AnalyzerConfig, Result, Stage, trim::samples_for};
use crate::{solution::FrequencyResponse, sweep::SweepConfig};
use rand::{SeedableRng, rngs::StdRng, seq::index};
use rustfft::{FftPlanner, num_complex::Complex64};
use std::f64::consts::PI;

const ZERO_PADDING: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line {
    pub intercept: f64,
    pub slope: f64,
}

impl Line {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Maps sample indices of a recording to the chirp frequency at that
/// sample.
#[derive(Clone, Debug, PartialEq)]
pub struct FrequencyMap {
    pub line: Line,
    pub inliers: usize,
    offset: usize,
    len: usize,
    f_lo: f64,
    f_hi: f64,
    period: f64,
}

impl FrequencyMap {
    fn span(&self) -> f64 {
        (self.len - 1) as f64
    }

    /// Chirp frequency at `sample`, an index into the untrimmed recording.
    pub fn frequency_at(&self, sample: usize) -> f64 {
        let x = (sample as f64 - self.offset as f64) / self.span();
        self.f_lo + (self.f_hi - self.f_lo) * self.line.at(x)
    }

    /// Untrimmed sample index at which the chirp passes `frequency`.
    pub fn sample_at(&self, frequency: f64) -> Option<usize> {
        if self.line.slope == 0.0 {
            return None;
        }
        let y = (frequency - self.f_lo) / (self.f_hi - self.f_lo);
        let x = (y - self.line.intercept) / self.line.slope;
        let sample = self.offset as f64 + x * self.span();
        (sample >= 0.0).then(|| sample.round() as usize)
    }

    /// Frequency at the first trimmed sample.
    pub fn start_frequency(&self) -> f64 {
        self.frequency_at(self.offset)
    }

    /// Fitted sweep rate in Hz/s.
    pub fn sweep_rate(&self) -> f64 {
        self.line.slope * (self.f_hi - self.f_lo) / (self.span() * self.period)
    }
}

pub fn fit(
    chirp: &[f64],
    offset: usize,
    response: &FrequencyResponse,
    sweep: &SweepConfig,
    period: f64,
    config: &AnalyzerConfig,
) -> Result<FrequencyMap> {
    let points = segment_peaks(chirp, response, sweep, period, config)?;
    let (line, inliers) = ransac(&points, config)?;

    let (f_lo, f_hi) = (sweep.chirp_start_frequency(), sweep.f1);
    let span = (chirp.len() - 1) as f64;
    let expected = sweep.dfdt * period * span / (f_hi - f_lo);
    let ratio = line.slope / expected;
    let band = config.slope_ratio_band;
    if !(ratio >= 1.0 / band && ratio <= band) {
        return Err(AnalysisError::SlopeMismatch { ratio });
    }

    Ok(FrequencyMap {
        line,
        inliers,
        offset,
        len: chirp.len(),
        f_lo,
        f_hi,
        period,
    })
}

/// Dominant frequency of each segment as a normalised point.
pub fn segment_peaks(
    chirp: &[f64],
    response: &FrequencyResponse,
    sweep: &SweepConfig,
    period: f64,
    config: &AnalyzerConfig,
) -> Result<Vec<Point>> {
    let segment = samples_for(config.segment_secs, period).max(8);
    if chirp.len() < segment {
        return Err(AnalysisError::InsufficientSamples {
            stage: Stage::Regression,
            got: chirp.len(),
            needed: segment,
        });
    }
    let hop = ((segment as f64 * (1.0 - config.segment_overlap)).round() as usize).max(1);
    let nfft = segment.next_power_of_two() * ZERO_PADDING;
    let window: Vec<f64> = (0..segment)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (segment - 1) as f64).cos())
        .collect();

    let (f_lo, f_hi) = (sweep.chirp_start_frequency(), sweep.f1);
    let df = 1.0 / (nfft as f64 * period);
    let k_lo = ((f_lo / df).ceil() as usize).max(1);
    let k_hi = ((f_hi / df).floor() as usize).min(nfft / 2 - 1);
    if k_lo >= k_hi {
        return Ok(Vec::new());
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(nfft);
    let span = (chirp.len() - 1) as f64;
    let mut buffer = vec![Complex64::new(0.0, 0.0); nfft];
    let mut points = Vec::new();

    for start in (0..=chirp.len() - segment).step_by(hop) {
        buffer.iter_mut().for_each(|c| *c = Complex64::new(0.0, 0.0));
        for (slot, (x, w)) in buffer.iter_mut().zip(chirp[start..].iter().zip(&window)) {
            *slot = Complex64::new(x * w, 0.0);
        }
        fft.process(&mut buffer);

        let magnitude = |k: usize| buffer[k].norm();
        let Some(peak) = (k_lo..=k_hi).max_by(|&a, &b| magnitude(a).total_cmp(&magnitude(b)))
        else {
            continue;
        };
        if magnitude(peak) <= 0.0 {
            continue;
        }

        let mut bin = peak as f64;
        if peak > k_lo && peak < k_hi {
            let (a, b, c) = (magnitude(peak - 1), magnitude(peak), magnitude(peak + 1));
            if a > 0.0 && c > 0.0 {
                let (a, b, c) = (a.ln(), b.ln(), c.ln());
                let curvature = a - 2.0 * b + c;
                if curvature < 0.0 {
                    bin += (0.5 * (a - c) / curvature).clamp(-0.5, 0.5);
                }
            }
        }

        let frequency = bin * df;
        let centre = start as f64 + (segment - 1) as f64 / 2.0;
        let gain = response.interpolate(2.0 * PI * frequency).max(0.0);
        points.push(Point {
            x: centre / span,
            y: (frequency - f_lo) / (f_hi - f_lo),
            weight: gain.powf(config.weight_power),
        });
    }
    Ok(points)
}

/// Weighted least-squares line, `None` when the points do not determine
/// one.
pub fn weighted_least_squares(points: &[Point]) -> Option<Line> {
    let (mut w, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        w += p.weight;
        sx += p.weight * p.x;
        sy += p.weight * p.y;
        sxx += p.weight * p.x * p.x;
        sxy += p.weight * p.x * p.y;
    }
    let det = w * sxx - sx * sx;
    if w <= 0.0 || det.abs() < 1e-12 {
        return None;
    }
    let slope = (w * sxy - sx * sy) / det;
    Some(Line {
        intercept: (sy - slope * sx) / w,
        slope,
    })
}

/// Consensus line fit. Returns the refitted line and its inlier count.
pub fn ransac(points: &[Point], config: &AnalyzerConfig) -> Result<(Line, usize)> {
    let needed = config.min_inliers.max(2);
    if points.len() < needed {
        return Err(AnalysisError::ConsensusFailed {
            inliers: points.len(),
            needed,
        });
    }

    let threshold = config.ransac_threshold;
    let is_inlier = |line: &Line, p: &Point| (p.y - line.at(p.x)).abs() < threshold;
    let sample_size = config.ransac_sample_size.clamp(2, points.len());
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(usize, f64, Line)> = None;

    for _ in 0..config.ransac_iterations {
        let subset: Vec<Point> = index::sample(&mut rng, points.len(), sample_size)
            .iter()
            .map(|i| points[i])
            .collect();
        let Some(line) = weighted_least_squares(&subset) else {
            continue;
        };
        let (count, error) = points
            .iter()
            .filter(|p| is_inlier(&line, p))
            .fold((0, 0.0), |(count, error), p| {
                let r = p.y - line.at(p.x);
                (count + 1, error + p.weight * r * r)
            });
        let better = match best {
            None => true,
            Some((best_count, best_error, _)) => {
                count > best_count || (count == best_count && error < best_error)
            }
        };
        if better {
            best = Some((count, error, line));
        }
    }

    let Some((count, _, line)) = best.filter(|(count, _, _)| *count >= needed) else {
        return Err(AnalysisError::ConsensusFailed {
            inliers: best.map_or(0, |(count, _, _)| count),
            needed,
        });
    };

    let inliers: Vec<Point> = points
        .iter()
        .filter(|p| is_inlier(&line, p))
        .copied()
        .collect();
    Ok((weighted_least_squares(&inliers).unwrap_or(line), count))
}
