use super::{AccelStatus, Channel};
use serde::Serialize;
use std::collections::VecDeque;

/// Per-channel sample buffers in mm/s².
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Samples {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl Samples {
    pub fn push(&mut self, [x, y, z]: [f64; 3]) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
    }

    pub fn channel(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::X => &self.x,
            Channel::Y => &self.y,
            Channel::Z => &self.z,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Mean of each channel after dropping the first `skip` samples.
    pub fn means(&self, skip: usize) -> Option<[f64; 3]> {
        let mean = |v: &[f64]| {
            let tail = v.get(skip..).filter(|t| !t.is_empty())?;
            Some(tail.iter().sum::<f64>() / tail.len() as f64)
        };
        Some([mean(&self.x)?, mean(&self.y)?, mean(&self.z)?])
    }
}

/// Buffers and status of one acquisition, shared between a driver and its
/// poll thread.
#[derive(Debug)]
pub struct Acquisition {
    status: AccelStatus,
    raw: Samples,
    live: [VecDeque<f64>; 3],
    live_capacity: usize,
    decimation: usize,
    pending: [f64; 3],
    pending_count: usize,
}

impl Acquisition {
    pub fn new(decimation: usize, live_capacity: usize) -> Self {
        Self {
            status: AccelStatus::Init,
            raw: Samples::default(),
            live: Default::default(),
            live_capacity,
            decimation: decimation.max(1),
            pending: [0.0; 3],
            pending_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.status = AccelStatus::Init;
        self.raw = Samples::default();
        self.live.iter_mut().for_each(VecDeque::clear);
        self.pending = [0.0; 3];
        self.pending_count = 0;
    }

    pub fn status(&self) -> AccelStatus {
        self.status
    }

    pub fn set_status(&mut self, status: AccelStatus) {
        self.status = status;
    }

    pub fn push(&mut self, sample: [f64; 3]) {
        self.raw.push(sample);
        for (acc, v) in self.pending.iter_mut().zip(sample) {
            *acc += v;
        }
        self.pending_count += 1;
        if self.pending_count == self.decimation {
            for (buffer, acc) in self.live.iter_mut().zip(&mut self.pending) {
                buffer.push_back(*acc / self.decimation as f64);
                if buffer.len() > self.live_capacity {
                    buffer.pop_front();
                }
                *acc = 0.0;
            }
            self.pending_count = 0;
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.raw
    }

    pub fn live_view(&self, channel: Channel, n: usize) -> Vec<f64> {
        let buffer = &self.live[channel as usize];
        buffer.iter().skip(buffer.len().saturating_sub(n)).copied().collect()
    }
}
