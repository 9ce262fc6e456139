//! Sweep excitation profile.
//!
//! The firmware executes a fixed piecewise trajectory on the calibrated
//! axis:
//!
//! ```text
//!  dly1 | step | dly2 |        chirp        | dly3 | step
//! ```
//!
//! The two steps are bang-bang moves at `step_a` that return to the
//! starting position; they are used to locate the chirp inside a recording.
//! The chirp starts one hertz below `f0`, rises linearly at `dfdt` and keeps
//! a constant acceleration amplitude `a` once its cubic ramp-in completes.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Chirp excitation parameters, frequencies in Hz and times in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub f0: f64,
    pub f1: f64,
    pub dfdt: f64,
    pub a: f64,
    pub step_ti: f64,
    pub step_a: f64,
    pub dly1_ti: f64,
    pub dly2_ti: f64,
    pub dly3_ti: f64,
}

/// Second-order resonance applied to simulated sweeps.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resonator {
    pub frequency_hz: f64,
    pub damping: f64,
}

impl Resonator {
    pub fn gain(&self, f: f64) -> f64 {
        let r = f / self.frequency_hz;
        1.0 / ((1.0 - r * r).powi(2) + (2.0 * self.damping * r).powi(2)).sqrt()
    }
}

impl SweepConfig {
    /// Highest chirp frequency an axis can follow at acceleration `a`
    /// without losing steps.
    pub fn max_end_frequency(a: f64, steps_per_unit: f64) -> f64 {
        ((a * steps_per_unit).sqrt() / (2.0 * PI)).floor()
    }

    pub fn chirp_start_frequency(&self) -> f64 {
        self.f0 - 1.0
    }

    pub fn chirp_duration(&self) -> f64 {
        (self.f1 - self.chirp_start_frequency()) / self.dfdt
    }

    /// End times of the six profile segments.
    pub fn breakpoints(&self) -> [f64; 6] {
        let p0 = self.dly1_ti;
        let p1 = p0 + 4.0 * self.step_ti;
        let p2 = p1 + self.dly2_ti;
        let p3 = p2 + self.chirp_duration();
        let p4 = p3 + self.dly3_ti;
        let p5 = p4 + 4.0 * self.step_ti;
        [p0, p1, p2, p3, p4, p5]
    }

    pub fn duration(&self) -> f64 {
        self.breakpoints()[5]
    }

    /// Instantaneous chirp frequency `tau` seconds into the chirp.
    pub fn frequency_at(&self, tau: f64) -> f64 {
        self.chirp_start_frequency() + tau * self.dfdt
    }

    /// Chirp acceleration envelope at `tau`, ignoring any resonance.
    pub fn envelope(&self, tau: f64) -> f64 {
        (tau * tau * tau).min(1.0) * self.a
    }

    /// Commanded displacement at time `t` from the start of the profile.
    pub fn displacement(&self, t: f64, resonator: Option<&Resonator>) -> f64 {
        let [p0, p1, p2, p3, p4, p5] = self.breakpoints();
        if t <= p0 {
            0.0
        } else if t <= p1 {
            self.step(t - p0)
        } else if t <= p2 {
            0.0
        } else if t <= p3 {
            let tau = t - p2;
            let k1 = PI * self.dfdt;
            let k2 = 2.0 * PI * self.chirp_start_frequency();
            let k = 1.0 / (2.0 * k1 * tau + k2);
            let mut amplitude = self.envelope(tau) * k * k;
            if let Some(resonator) = resonator {
                amplitude *= resonator.gain(self.frequency_at(tau));
            }
            amplitude * (k1 * tau * tau + k2 * tau).sin()
        } else if t <= p4 {
            0.0
        } else if t <= p5 {
            -self.step(t - p4)
        } else {
            0.0
        }
    }

    fn step(&self, tau: f64) -> f64 {
        let half_a = 0.5 * self.step_a;
        if tau < self.step_ti {
            half_a * tau * tau
        } else if tau < 3.0 * self.step_ti {
            let k = tau - 2.0 * self.step_ti;
            self.step_a * self.step_ti * self.step_ti - half_a * k * k
        } else {
            let k = tau - 4.0 * self.step_ti;
            half_a * k * k
        }
    }

    /// Displacement sampled every `period` seconds over the whole profile.
    pub fn displacement_profile(&self, period: f64, resonator: Option<&Resonator>) -> Vec<f64> {
        let samples = (self.duration() / period + 0.5).round() as usize;
        (0..samples)
            .map(|i| self.displacement(i as f64 * period, resonator))
            .collect()
    }

    /// Acceleration an ideal sensor would record over the whole profile.
    pub fn acceleration_profile(&self, period: f64, resonator: Option<&Resonator>) -> Vec<f64> {
        let displacement = self.displacement_profile(period, resonator);
        let velocity: Vec<f64> = gradient(&displacement).into_iter().map(|v| v / period).collect();
        gradient(&velocity).into_iter().map(|v| v / period).collect()
    }
}

/// Central differences in the interior, one-sided at the ends.
pub fn gradient(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| match i {
            0 => x[1] - x[0],
            i if i == n - 1 => x[n - 1] - x[n - 2],
            i => 0.5 * (x[i + 1] - x[i - 1]),
        })
        .collect()
}
