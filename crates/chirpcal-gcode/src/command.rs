use chirpcal_core::{Axis, ShaperKind, SweepConfig};
use std::fmt;

/// Millimetres per minute used when moving an axis to its centre.
pub const DEFAULT_FEED_RATE: u32 = 6000;

/// Sweep mode that cancels a running profile.
const SWEEP_ABORT: u8 = 99;

/// A line sent to the motion firmware. `Display` renders the exact text.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineCommand {
    DisableShaping {
        axis: Axis,
    },
    SetShaper {
        axis: Axis,
        kind: ShaperKind,
        frequency_hz: f64,
        zeta: f64,
        vtol: f64,
    },
    SaveSettings,
    StartSweep {
        axis: Axis,
        sweep: SweepConfig,
    },
    AbortSweep,
    QueryAxisConfig,
    QueryStepsPerUnit,
    QueryPosition,
    QueryFirmware,
    Home {
        axes: Vec<char>,
    },
    MoveTo {
        axis: Axis,
        position: i64,
        feed: u32,
    },
}

impl MachineCommand {
    pub fn home(axis: Axis) -> Self {
        MachineCommand::Home {
            axes: vec![axis.letter()],
        }
    }

    /// Move `axis` to the middle of its travel.
    pub fn center(axis: Axis, length: f64, feed: u32) -> Self {
        MachineCommand::MoveTo {
            axis,
            position: (length / 2.0).round_ties_even() as i64,
            feed,
        }
    }
}

impl fmt::Display for MachineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineCommand::DisableShaping { axis } => write!(f, "M493 S1 {}0", axis.letter()),
            MachineCommand::SetShaper {
                axis,
                kind,
                frequency_hz,
                zeta,
                vtol,
            } => {
                let [freq, damp, tol] = axis.shaper_letters();
                write!(
                    f,
                    "M493 {}{} {freq}{frequency_hz:.2} {damp}{zeta:.4}",
                    axis.letter(),
                    kind.firmware_mode()
                )?;
                if kind.uses_vtol() {
                    write!(f, " {tol}{vtol:.2}")?;
                }
                Ok(())
            }
            MachineCommand::SaveSettings => f.write_str("M500"),
            MachineCommand::StartSweep { axis, sweep } => write!(
                f,
                "M494 A{} B{} C{} D{} E{} F{:.3} H{} I{:.3} J{:.3} K{:.3}",
                axis.sweep_code(),
                sweep.f0,
                sweep.f1,
                sweep.dfdt,
                sweep.a,
                sweep.step_ti,
                sweep.step_a,
                sweep.dly1_ti,
                sweep.dly2_ti,
                sweep.dly3_ti
            ),
            MachineCommand::AbortSweep => write!(f, "M494 A{SWEEP_ABORT}"),
            MachineCommand::QueryAxisConfig => f.write_str("M494"),
            MachineCommand::QueryStepsPerUnit => f.write_str("M92"),
            MachineCommand::QueryPosition => f.write_str("M114"),
            MachineCommand::QueryFirmware => f.write_str("M115"),
            MachineCommand::Home { axes } => {
                // axis letters go out as one run, e.g. `G28 XY`
                let letters: String = axes.iter().collect();
                if letters.is_empty() {
                    f.write_str("G28")
                } else {
                    write!(f, "G28 {letters}")
                }
            }
            MachineCommand::MoveTo {
                axis,
                position,
                feed,
            } => write!(f, "G1 {}{position} F{feed}", axis.letter()),
        }
    }
}
