//! Accelerometer stand-in that replays the modelled sweep.

use super::{
    AccelError, AccelRate, AccelStatus, Accelerometer, Acquisition, Channel, PollSource, Poller,
    Samples, SelfTestOutcome,
};
use crate::config::{AccelerometerConfig, SimulationConfig};
use chirpcal_core::{SweepConfig, sweep::Resonator};
use parking_lot::Mutex;
use std::{sync::Arc, thread, time::Instant};

/// Feeds the precomputed acceleration profile at `speedup` times real time.
/// Every channel sees the same signal.
struct Replay {
    profile: Arc<[f64]>,
    next: usize,
    period: f64,
    speedup: f64,
    last: Instant,
}

impl PollSource for Replay {
    fn poll(&mut self, out: &mut Vec<[f64; 3]>) -> Option<AccelStatus> {
        let now = Instant::now();
        let due = (self.speedup * (now - self.last).as_secs_f64() / self.period).round() as usize;
        let end = (self.next + due).min(self.profile.len());
        out.extend(self.profile[self.next..end].iter().map(|&v| [v, v, v]));
        self.next = end;
        self.last = now;
        None
    }
}

pub struct SimulatedAccelerometer {
    shared: Arc<Mutex<Acquisition>>,
    poller: Option<Poller<Replay>>,
    profile: Arc<[f64]>,
    rate: AccelRate,
    speedup: f64,
    resonator: Resonator,
}

impl SimulatedAccelerometer {
    pub fn new(accel: &AccelerometerConfig, sim: &SimulationConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Acquisition::new(
                accel.rate.decimation(),
                accel.live_view_samples,
            ))),
            poller: None,
            profile: Arc::from(Vec::new()),
            rate: accel.rate,
            speedup: sim.speedup,
            resonator: Resonator {
                frequency_hz: sim.resonance_hz,
                damping: sim.damping,
            },
        }
    }

    /// True once the whole profile has been replayed.
    pub fn is_done(&self) -> bool {
        self.shared.lock().samples().len() >= self.profile.len()
    }
}

impl Accelerometer for SimulatedAccelerometer {
    fn self_test(&mut self) -> Result<SelfTestOutcome, AccelError> {
        Ok(SelfTestOutcome::Pass)
    }

    fn prepare(&mut self, sweep: &SweepConfig) {
        let profile = sweep.acceleration_profile(self.rate.sample_period(), Some(&self.resonator));
        tracing::debug!(samples = profile.len(), "simulated sweep profile ready");
        self.profile = profile.into();
    }

    fn start(&mut self) -> Result<(), AccelError> {
        let ended = self.shared.lock().status().is_terminal();
        if let Some(poller) = self.poller.take_if(|poller| ended || poller.is_finished()) {
            poller.join()?;
        }
        if self.poller.is_some() {
            return Err(AccelError::AlreadyCollecting);
        }
        self.shared.lock().reset();
        let replay = Replay {
            profile: Arc::clone(&self.profile),
            next: 0,
            period: self.rate.sample_period(),
            speedup: self.speedup,
            last: Instant::now(),
        };
        let poller = Poller::spawn(replay, Arc::clone(&self.shared), self.rate.poll_period())?;
        self.poller = Some(poller);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AccelError> {
        let Some(poller) = self.poller.take() else {
            return Ok(());
        };
        poller.request_stop();
        while !self.shared.lock().status().is_terminal() && !poller.is_finished() {
            thread::sleep(self.rate.poll_period());
        }
        poller.join()?;
        Ok(())
    }

    fn status(&self) -> AccelStatus {
        self.shared.lock().status()
    }

    fn samples(&self) -> Samples {
        self.shared.lock().samples().clone()
    }

    fn live_view(&self, channel: Channel, n: usize) -> Vec<f64> {
        self.shared.lock().live_view(channel, n)
    }

    fn sample_period(&self) -> f64 {
        self.rate.sample_period()
    }
}
