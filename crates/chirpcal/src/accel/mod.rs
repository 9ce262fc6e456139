//! Accelerometer acquisition.
//!
//! A driver owns its sensor bus and, while collecting, a [`Poller`] thread
//! that drains the sensor on a fixed period into a shared [`Acquisition`].
//! The status is `Collecting` exactly while that thread runs; every other
//! status except `Init` is terminal for the acquisition and is left for the
//! caller to act on.

use chirpcal_core::{Axis, SweepConfig};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

pub mod adxl345;
mod buffers;
pub mod bus;
mod poller;
pub mod sim;

pub use adxl345::Adxl345;
pub use buffers::{Acquisition, Samples};
pub use bus::{BusError, PigpioBus, RegisterBus};
pub use poller::{PollSource, Poller};
pub use sim::SimulatedAccelerometer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelStatus {
    Init,
    Collecting,
    ConnectionFailed,
    ReadFailed,
    Overrun,
    OutOfRange,
    Stopped,
}

impl AccelStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AccelStatus::Init | AccelStatus::Collecting)
    }

    pub fn name(self) -> &'static str {
        match self {
            AccelStatus::Init => "init",
            AccelStatus::Collecting => "collecting",
            AccelStatus::ConnectionFailed => "connection failed",
            AccelStatus::ReadFailed => "read failed",
            AccelStatus::Overrun => "overrun",
            AccelStatus::OutOfRange => "out of range",
            AccelStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AccelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SelfTestOutcome {
    Pass,
    Fail,
}

/// Sensor channel, used to pick a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    X,
    Y,
    Z,
}

impl From<Axis> for Channel {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::X => Channel::X,
            Axis::Y => Channel::Y,
        }
    }
}

/// Full-scale range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelRange {
    #[default]
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "8g")]
    G8,
    #[serde(rename = "16g")]
    G16,
}

impl AccelRange {
    pub fn g(self) -> f64 {
        match self {
            AccelRange::G2 => 2.0,
            AccelRange::G4 => 4.0,
            AccelRange::G8 => 8.0,
            AccelRange::G16 => 16.0,
        }
    }

    /// DATA_FORMAT range bits.
    pub fn code(self) -> u8 {
        match self {
            AccelRange::G2 => 0b00,
            AccelRange::G4 => 0b01,
            AccelRange::G8 => 0b10,
            AccelRange::G16 => 0b11,
        }
    }

    /// mm/s² per LSB of a 10-bit reading.
    pub fn scale(self) -> f64 {
        2.0 * self.g() / 1024.0 * 9806.65
    }
}

/// Output data rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum AccelRate {
    Hz3200,
    #[default]
    Hz1600,
    Hz800,
    Hz400,
    Hz200,
}

impl AccelRate {
    pub fn hz(self) -> u32 {
        match self {
            AccelRate::Hz3200 => 3200,
            AccelRate::Hz1600 => 1600,
            AccelRate::Hz800 => 800,
            AccelRate::Hz400 => 400,
            AccelRate::Hz200 => 200,
        }
    }

    /// BW_RATE register value.
    pub fn code(self) -> u8 {
        match self {
            AccelRate::Hz3200 => 0x0F,
            AccelRate::Hz1600 => 0x0E,
            AccelRate::Hz800 => 0x0D,
            AccelRate::Hz400 => 0x0C,
            AccelRate::Hz200 => 0x0B,
        }
    }

    pub fn sample_period(self) -> f64 {
        1.0 / self.hz() as f64
    }

    /// Poll often enough that the 32-entry FIFO never fills between reads.
    pub fn poll_period(self) -> Duration {
        match self {
            AccelRate::Hz3200 => Duration::from_micros(500),
            _ => Duration::from_millis(1),
        }
    }

    /// Raw samples averaged into one live-view point.
    pub fn decimation(self) -> usize {
        (24 * self.hz() / 1600).max(1) as usize
    }
}

impl TryFrom<u32> for AccelRate {
    type Error = String;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        match hz {
            3200 => Ok(AccelRate::Hz3200),
            1600 => Ok(AccelRate::Hz1600),
            800 => Ok(AccelRate::Hz800),
            400 => Ok(AccelRate::Hz400),
            200 => Ok(AccelRate::Hz200),
            other => Err(format!("unsupported accelerometer rate {other} Hz")),
        }
    }
}

impl From<AccelRate> for u32 {
    fn from(rate: AccelRate) -> Self {
        rate.hz()
    }
}

#[derive(Debug, Error)]
pub enum AccelError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("accelerometer is already collecting")]
    AlreadyCollecting,
    #[error("failed to spawn the acquisition thread")]
    Spawn(#[source] std::io::Error),
    #[error("acquisition thread panicked")]
    PollerPanicked,
}

/// A polled three-axis accelerometer.
pub trait Accelerometer: Send {
    fn self_test(&mut self) -> Result<SelfTestOutcome, AccelError>;

    /// Tell the driver which sweep is about to run. Only the simulated
    /// sensor needs it.
    fn prepare(&mut self, _sweep: &SweepConfig) {}

    /// Clear the buffers and begin polling.
    fn start(&mut self) -> Result<(), AccelError>;

    /// End polling, blocking until the poll thread has exited.
    fn stop(&mut self) -> Result<(), AccelError>;

    fn status(&self) -> AccelStatus;

    /// Raw samples in mm/s².
    fn samples(&self) -> Samples;

    /// The latest `n` down-sampled points of one channel.
    fn live_view(&self, channel: Channel, n: usize) -> Vec<f64>;

    /// Seconds between raw samples.
    fn sample_period(&self) -> f64;
}

impl<A: Accelerometer + ?Sized> Accelerometer for Box<A> {
    fn self_test(&mut self) -> Result<SelfTestOutcome, AccelError> {
        (**self).self_test()
    }

    fn prepare(&mut self, sweep: &SweepConfig) {
        (**self).prepare(sweep)
    }

    fn start(&mut self) -> Result<(), AccelError> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<(), AccelError> {
        (**self).stop()
    }

    fn status(&self) -> AccelStatus {
        (**self).status()
    }

    fn samples(&self) -> Samples {
        (**self).samples()
    }

    fn live_view(&self, channel: Channel, n: usize) -> Vec<f64> {
        (**self).live_view(channel, n)
    }

    fn sample_period(&self) -> f64 {
        (**self).sample_period()
    }
}
