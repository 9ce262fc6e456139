use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Magnitude response sampled at angular frequencies `w` (rad/s).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResponse {
    pub w: Vec<f64>,
    pub g: Vec<f64>,
}

impl FrequencyResponse {
    pub fn new(w: Vec<f64>, g: Vec<f64>) -> Self {
        debug_assert_eq!(w.len(), g.len());
        Self { w, g }
    }

    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn frequencies_hz(&self) -> impl Iterator<Item = f64> + '_ {
        self.w.iter().map(|w| w / (2.0 * PI))
    }

    /// Linear interpolation of G at `w`, clamped to the sampled range.
    pub fn interpolate(&self, w: f64) -> f64 {
        let Some((&first, &last)) = self.w.first().zip(self.w.last()) else {
            return 0.0;
        };
        if w <= first {
            return self.g[0];
        }
        if w >= last {
            return self.g[self.g.len() - 1];
        }
        let upper = self.w.partition_point(|&x| x < w);
        let (w0, w1) = (self.w[upper - 1], self.w[upper]);
        let (g0, g1) = (self.g[upper - 1], self.g[upper]);
        g0 + (g1 - g0) * (w - w0) / (w1 - w0)
    }

    /// Element-wise product with a shaper magnitude evaluated on `w`.
    pub fn shaped(&self, magnitudes: &[f64]) -> FrequencyResponse {
        let g = self.g.iter().zip(magnitudes).map(|(g, m)| g * m).collect();
        FrequencyResponse::new(self.w.clone(), g)
    }
}

/// Dominant resonance of an axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resonance {
    /// Natural frequency in rad/s.
    pub wc: f64,
    pub zeta: f64,
}

impl Resonance {
    pub fn frequency_hz(&self) -> f64 {
        self.wc / (2.0 * PI)
    }
}

/// Result of a calibration run: the measured response and, once a
/// resonance has been identified, its frequency and damping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSolution {
    pub resonance: Option<Resonance>,
    pub response: FrequencyResponse,
}

impl CalibrationSolution {
    pub fn new(resonance: Resonance, response: FrequencyResponse) -> Self {
        Self {
            resonance: Some(resonance),
            response,
        }
    }

    /// A response without an identified resonance, used when the peak is
    /// picked by hand.
    pub fn unresolved(response: FrequencyResponse) -> Self {
        Self {
            resonance: None,
            response,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resonance.is_some()
    }

    /// Overrides the damping ratio. Has no effect until a peak is known.
    pub fn set_damping(&mut self, zeta: f64) {
        if let Some(resonance) = &mut self.resonance {
            resonance.zeta = zeta;
        }
    }

    /// Overrides the peak frequency, keeping the damping or falling back to
    /// `default_zeta` when no resonance was identified yet.
    pub fn set_peak_frequency(&mut self, frequency_hz: f64, default_zeta: f64) {
        let wc = 2.0 * PI * frequency_hz;
        match &mut self.resonance {
            Some(resonance) => resonance.wc = wc,
            None => {
                self.resonance = Some(Resonance {
                    wc,
                    zeta: default_zeta,
                })
            }
        }
    }
}
