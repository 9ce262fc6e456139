//! Input shaper families and their frequency-domain magnitudes.
//!
//! Every shaper is a short train of equally spaced impulses whose
//! amplitudes sum to one. The magnitude of the train's frequency response,
//! evaluated relative to the shaper's tuning frequency, is what the session
//! layer plots next to a measured response.

use serde::{Deserialize, Serialize};
use std::{f64::consts::PI, fmt, str::FromStr};
use thiserror::Error;

/// Smallest vibration tolerance the two-hump EI shaper supports.
pub const MIN_EI2H_VTOL: f64 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaperKind {
    Zv,
    Zvd,
    Mzv,
    Ei,
    Ei2h,
    Ei3h,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown shaper '{0}'")]
pub struct ParseShaperError(pub String);

impl ShaperKind {
    pub const ALL: [ShaperKind; 6] = [
        ShaperKind::Zv,
        ShaperKind::Zvd,
        ShaperKind::Mzv,
        ShaperKind::Ei,
        ShaperKind::Ei2h,
        ShaperKind::Ei3h,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShaperKind::Zv => "zv",
            ShaperKind::Zvd => "zvd",
            ShaperKind::Mzv => "mzv",
            ShaperKind::Ei => "ei",
            ShaperKind::Ei2h => "ei2h",
            ShaperKind::Ei3h => "ei3h",
        }
    }

    /// Mode number understood by the firmware's shaper command.
    pub fn firmware_mode(self) -> u8 {
        match self {
            ShaperKind::Zv => 1,
            ShaperKind::Zvd => 2,
            ShaperKind::Ei => 5,
            ShaperKind::Ei2h => 6,
            ShaperKind::Ei3h => 7,
            ShaperKind::Mzv => 8,
        }
    }

    /// Whether the family takes a vibration tolerance parameter.
    pub fn uses_vtol(self) -> bool {
        matches!(self, ShaperKind::Ei | ShaperKind::Ei2h | ShaperKind::Ei3h)
    }

    /// Impulse spacing in units of half the damped period.
    fn spacing(self) -> f64 {
        match self {
            ShaperKind::Mzv => 0.75,
            _ => 1.0,
        }
    }
}

impl fmt::Display for ShaperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShaperKind {
    type Err = ParseShaperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ShaperKind::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| ParseShaperError(s.to_string()))
    }
}

/// A shaper family with its damping and vibration tolerance fixed.
#[derive(Clone, Debug, PartialEq)]
pub struct Shaper {
    kind: ShaperKind,
    zeta: f64,
    vtol: f64,
    amplitudes: Vec<f64>,
}

impl Shaper {
    /// `vtol` is ignored by families without a tolerance and clamped to
    /// [`MIN_EI2H_VTOL`] for EI2H.
    pub fn new(kind: ShaperKind, zeta: f64, vtol: f64) -> Self {
        let vtol = match kind {
            ShaperKind::Ei2h => vtol.max(MIN_EI2H_VTOL),
            ShaperKind::Ei | ShaperKind::Ei3h => vtol.max(0.0),
            _ => 0.0,
        };
        let amplitudes = amplitudes(kind, zeta, vtol);
        Self {
            kind,
            zeta,
            vtol,
            amplitudes,
        }
    }

    pub fn kind(&self) -> ShaperKind {
        self.kind
    }

    pub fn zeta(&self) -> f64 {
        self.zeta
    }

    pub fn vtol(&self) -> f64 {
        self.vtol
    }

    /// Normalised impulse amplitudes, first impulse at t = 0.
    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    fn damping_factor(&self) -> f64 {
        (1.0 - self.zeta * self.zeta).sqrt()
    }

    /// Impulse spacing in seconds for a shaper tuned to `wc` rad/s.
    pub fn spacing(&self, wc: f64) -> f64 {
        self.kind.spacing() * PI / (wc * self.damping_factor())
    }

    /// Impulse times in seconds for a shaper tuned to `wc` rad/s.
    pub fn impulse_times(&self, wc: f64) -> Vec<f64> {
        let dt = self.spacing(wc);
        (0..self.amplitudes.len()).map(|i| i as f64 * dt).collect()
    }

    /// Linear magnitude of the shaper's response at `w` rad/s.
    pub fn magnitude(&self, w: f64, wc: f64) -> f64 {
        let arg = (w / wc) * self.kind.spacing() * PI / self.damping_factor();
        let (re, im) = self
            .amplitudes
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(re, im), (i, a)| {
                let phase = i as f64 * arg;
                (re + a * phase.cos(), im + a * phase.sin())
            });
        (re * re + im * im).sqrt()
    }

    pub fn magnitudes(&self, w: &[f64], wc: f64) -> Vec<f64> {
        w.iter().map(|&w| self.magnitude(w, wc)).collect()
    }

    /// Magnitude in dB, reported as 0 dB above the shaper's useful band.
    pub fn attenuation_db(&self, w: f64, wc: f64) -> f64 {
        if w > self.cutoff(wc) {
            return 0.0;
        }
        20.0 * self.magnitude(w, wc).log10()
    }

    /// Frequency above which the magnitude pattern repeats.
    pub fn cutoff(&self, wc: f64) -> f64 {
        match self.kind {
            ShaperKind::Mzv => wc * self.damping_factor() / 0.375,
            _ => 2.0 * wc * self.damping_factor(),
        }
    }
}

fn amplitudes(kind: ShaperKind, zeta: f64, vtol: f64) -> Vec<f64> {
    let df = (1.0 - zeta * zeta).sqrt();
    let k = (-zeta * PI / df).exp();
    let raw = match kind {
        ShaperKind::Zv => vec![1.0, k],
        ShaperKind::Zvd => vec![1.0, 2.0 * k, k * k],
        ShaperKind::Mzv => {
            let b = std::f64::consts::SQRT_2 * k;
            vec![1.0, b, k * k]
        }
        ShaperKind::Ei => {
            let a0 = 0.25 * (1.0 + vtol);
            vec![a0, 0.5 * (1.0 - vtol) * k, a0 * k * k]
        }
        ShaperKind::Ei2h => {
            let v2 = vtol * vtol;
            let k2 = (v2 * ((1.0 - v2).sqrt() + 1.0)).cbrt();
            let a0 = (3.0 * k2 * k2 + 2.0 * k2 + 3.0 * v2) / (16.0 * k2);
            let a1 = (0.5 - a0) * k;
            vec![a0, a1, a1 * k, a0 * k * k * k]
        }
        ShaperKind::Ei3h => {
            let a0 = 0.0625 * (1.0 + 3.0 * vtol + 2.0 * (2.0 * (vtol + 1.0) * vtol).sqrt());
            let a1 = 0.25 * (1.0 - vtol) * k;
            let a2 = (0.5 * (1.0 + vtol) - 2.0 * a0) * k * k;
            vec![a0, a1, a2, a1 * k * k, a0 * k.powi(4)]
        }
    };
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|a| a / sum).collect()
}
