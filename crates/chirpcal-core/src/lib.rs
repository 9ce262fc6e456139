//! Resonance calibration math shared across chirpcal components.
//!
//! This crate intentionally avoids any transport-, sensor- or
//! firmware-specific dependencies. Everything here operates on plain sample
//! buffers and configuration values.

pub mod analyzer;
pub mod axis;
pub mod shaper;
pub mod solution;
pub mod sweep;

pub use analyzer::{AnalysisError, Analyzer, AnalyzerConfig};
pub use axis::Axis;
pub use shaper::{Shaper, ShaperKind};
pub use solution::{CalibrationSolution, FrequencyResponse, Resonance};
pub use sweep::SweepConfig;
