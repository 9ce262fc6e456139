//! Runtime side of chirpcal.
//!
//! Wires the sweep and analysis math from `chirpcal-core` and the firmware
//! protocol from `chirpcal-gcode` to real (or simulated) hardware: an
//! accelerometer, a motion controller reachable over a line-oriented link,
//! and an optional remote solving service.

pub mod accel;
pub mod analysis;
pub mod config;
pub mod fsm;
pub mod machine;
pub mod session;
pub mod solver;

pub use config::Config;
pub use fsm::{Calibrator, CommandSink, RecordingSink};
pub use session::Session;
