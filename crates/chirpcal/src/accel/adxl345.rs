//! Analog Devices ADXL345 on a register bus.

use super::{
    AccelError, AccelRange, AccelRate, AccelStatus, Accelerometer, Acquisition, BusError,
    Channel, PollSource, Poller, RegisterBus, Samples, SelfTestOutcome,
};
use crate::config::AccelerometerConfig;
use parking_lot::Mutex;
use std::{sync::Arc, thread, time::Duration};

const REG_BW_RATE: u8 = 0x2C;
const REG_POWER_CTL: u8 = 0x2D;
const REG_DATA_FORMAT: u8 = 0x31;
const REG_DATAX0: u8 = 0x32;
const REG_FIFO_CTL: u8 = 0x38;
const REG_FIFO_STATUS: u8 = 0x39;

const READ: u8 = 0x80;
const MULTI_BYTE: u8 = 0x40;

const FIFO_STREAM: u8 = 0x80;
const MEASURE: u8 = 0x08;
const STANDBY: u8 = 0x00;
const FULL_RES: u8 = 0x08;
const SELF_TEST: u8 = 0x80;
const ENTRIES_MASK: u8 = 0x3F;

const FIFO_DEPTH: u8 = 32;
/// Keep draining within one cycle while at least this many entries wait.
const CONTINUE_THRESHOLD: u8 = 5;

/// Samples dropped from each self-test window while the output settles.
const SELF_TEST_DISCARD: usize = 32;

/// Self-test output change bands in LSB at 3.3 V, full resolution.
const SELF_TEST_X: (f64, f64) = (1.77 * 50.0, 1.77 * 540.0);
const SELF_TEST_Y: (f64, f64) = (1.77 * -540.0, 1.77 * -50.0);
const SELF_TEST_Z: (f64, f64) = (1.47 * 75.0, 1.47 * 875.0);

fn read_registers<B: RegisterBus>(
    bus: &mut B,
    addr: u8,
    count: usize,
) -> Result<Vec<u8>, BusError> {
    let mut cmd = addr | READ;
    if count > 1 {
        cmd |= MULTI_BYTE;
    }
    let mut tx = vec![0xFF; count + 1];
    tx[0] = cmd;
    let rx = bus.transfer(&tx)?;
    Ok(rx.get(1..).unwrap_or_default().to_vec())
}

fn fifo_entries<B: RegisterBus>(bus: &mut B) -> Result<u8, BusError> {
    let status = read_registers(bus, REG_FIFO_STATUS, 1)?;
    Ok(status.first().copied().unwrap_or_default() & ENTRIES_MASK)
}

/// Reads the FIFO on the poll thread.
pub struct FifoReader<B> {
    bus: B,
    scale: f64,
    zero_reads: u32,
    zero_limit: u32,
}

impl<B: RegisterBus> FifoReader<B> {
    fn new(bus: B, scale: f64, zero_limit: u32) -> Self {
        Self {
            bus,
            scale,
            zero_reads: 0,
            zero_limit,
        }
    }

    fn read_entries(&mut self, n: u8, out: &mut Vec<[f64; 3]>) -> Result<(), BusError> {
        for _ in 0..n {
            let raw = read_registers(&mut self.bus, REG_DATAX0, 6)?;
            if raw.len() < 6 {
                return Err(BusError::ShortTransfer {
                    sent: 6,
                    received: raw.len(),
                });
            }
            let axis = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]) as f64 * self.scale;
            out.push([axis(0), axis(2), axis(4)]);
        }
        Ok(())
    }

    fn cycle(&mut self, out: &mut Vec<[f64; 3]>) -> Result<Option<AccelStatus>, BusError> {
        let mut entries = fifo_entries(&mut self.bus)?;
        if entries == 0 {
            self.zero_reads += 1;
            let lost = self.zero_reads > self.zero_limit;
            return Ok(lost.then_some(AccelStatus::ConnectionFailed));
        }
        if entries > FIFO_DEPTH {
            return Ok(Some(AccelStatus::OutOfRange));
        }

        self.zero_reads = 0;
        self.read_entries(entries, out)?;
        loop {
            entries = fifo_entries(&mut self.bus)?;
            if entries < CONTINUE_THRESHOLD {
                return Ok(None);
            }
            if entries > FIFO_DEPTH {
                return Ok(Some(AccelStatus::OutOfRange));
            }
            if entries == FIFO_DEPTH {
                return Ok(Some(AccelStatus::Overrun));
            }
            self.read_entries(entries, out)?;
        }
    }
}

impl<B: RegisterBus> PollSource for FifoReader<B> {
    fn poll(&mut self, out: &mut Vec<[f64; 3]>) -> Option<AccelStatus> {
        match self.cycle(out) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(%err, "FIFO read failed");
                Some(AccelStatus::ReadFailed)
            }
        }
    }
}

enum Link<B> {
    Idle(B),
    Polling(Poller<FifoReader<B>>),
    /// The poll thread died with the bus.
    Lost,
}

pub struct Adxl345<B: RegisterBus> {
    link: Link<B>,
    shared: Arc<Mutex<Acquisition>>,
    range: AccelRange,
    rate: AccelRate,
    config: AccelerometerConfig,
}

impl<B: RegisterBus> Adxl345<B> {
    pub fn new(bus: B, config: &AccelerometerConfig) -> Self {
        Self {
            link: Link::Idle(bus),
            shared: Arc::new(Mutex::new(Acquisition::new(
                config.rate.decimation(),
                config.live_view_samples,
            ))),
            range: config.range,
            rate: config.rate,
            config: config.clone(),
        }
    }

    /// Takes the bus back from a poll thread that ended on its own. The
    /// thread exits right after publishing a terminal status.
    fn reclaim(&mut self) -> Result<(), AccelError> {
        let ended = match &self.link {
            Link::Polling(poller) => {
                poller.is_finished() || self.shared.lock().status().is_terminal()
            }
            _ => false,
        };
        if !ended {
            return Ok(());
        }
        if let Link::Polling(poller) = std::mem::replace(&mut self.link, Link::Lost) {
            let reader = poller.join()?;
            self.link = Link::Idle(reader.bus);
        }
        Ok(())
    }

    fn bus(&mut self) -> Result<&mut B, AccelError> {
        self.reclaim()?;
        match &mut self.link {
            Link::Idle(bus) => Ok(bus),
            Link::Polling(_) => Err(AccelError::AlreadyCollecting),
            Link::Lost => Err(AccelError::PollerPanicked),
        }
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), AccelError> {
        Ok(self.bus()?.write(&[reg, value])?)
    }

    fn configure_streaming(&mut self) -> Result<(), AccelError> {
        self.write(REG_BW_RATE, self.rate.code())?;
        self.write(REG_DATA_FORMAT, self.range.code())?;
        self.write(REG_FIFO_CTL, FIFO_STREAM)?;
        self.write(REG_POWER_CTL, MEASURE)
    }

    fn configure_self_test(&mut self) -> Result<(), AccelError> {
        self.write(REG_BW_RATE, AccelRate::Hz400.code())?;
        self.write(REG_DATA_FORMAT, FULL_RES | AccelRange::G16.code())?;
        self.write(REG_FIFO_CTL, FIFO_STREAM)?;
        self.write(REG_POWER_CTL, MEASURE)
    }

    fn drain_fifo(&mut self) -> Result<Option<AccelStatus>, AccelError> {
        let bus = self.bus()?;
        let entries = fifo_entries(bus)?;
        if entries > FIFO_DEPTH {
            return Ok(Some(AccelStatus::OutOfRange));
        }
        for _ in 0..entries {
            read_registers(bus, REG_DATAX0, 6)?;
        }
        Ok(None)
    }

    /// Drop whatever the FIFO holds and hand the bus to a poll thread.
    /// A failure shows up in the status, as it would from a poll cycle.
    fn begin_polling(&mut self, scale: f64) -> Result<(), AccelError> {
        self.shared.lock().reset();
        match self.drain_fifo() {
            Ok(None) => {}
            Ok(Some(status)) => {
                self.shared.lock().set_status(status);
                return Ok(());
            }
            Err(AccelError::Bus(err)) => {
                tracing::warn!(%err, "failed to drain FIFO");
                self.shared.lock().set_status(AccelStatus::ReadFailed);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        let bus = match std::mem::replace(&mut self.link, Link::Lost) {
            Link::Idle(bus) => bus,
            other => {
                self.link = other;
                return Err(AccelError::AlreadyCollecting);
            }
        };
        let reader = FifoReader::new(bus, scale, self.config.zero_fifo_limit);
        let poller = Poller::spawn(reader, Arc::clone(&self.shared), self.rate.poll_period())?;
        self.link = Link::Polling(poller);
        Ok(())
    }

    /// Stop the poll thread once it has reported a terminal status and take
    /// the bus back.
    fn end_polling(&mut self) -> Result<(), AccelError> {
        let poller = match std::mem::replace(&mut self.link, Link::Lost) {
            Link::Polling(poller) => poller,
            other => {
                self.link = other;
                return Ok(());
            }
        };
        poller.request_stop();
        while !self.shared.lock().status().is_terminal() && !poller.is_finished() {
            thread::sleep(self.rate.poll_period());
        }
        let reader = poller.join()?;
        self.link = Link::Idle(reader.bus);
        Ok(())
    }

    fn self_test_window(&mut self) -> Result<Option<Samples>, AccelError> {
        self.begin_polling(AccelRange::G16.scale())?;
        thread::sleep(Duration::from_millis(self.config.self_test_window_ms));
        self.stop()?;
        let acquisition = self.shared.lock();
        Ok((acquisition.status() == AccelStatus::Stopped).then(|| acquisition.samples().clone()))
    }
}

fn within((lo, hi): (f64, f64), value: f64) -> bool {
    value > lo && value < hi
}

impl<B: RegisterBus> Accelerometer for Adxl345<B> {
    fn self_test(&mut self) -> Result<SelfTestOutcome, AccelError> {
        self.configure_self_test()?;
        let Some(off) = self.self_test_window()? else {
            return Ok(SelfTestOutcome::Fail);
        };
        self.configure_self_test()?;
        self.write(REG_DATA_FORMAT, SELF_TEST | FULL_RES | AccelRange::G16.code())?;
        let Some(on) = self.self_test_window()? else {
            return Ok(SelfTestOutcome::Fail);
        };
        self.configure_self_test()?;
        self.write(REG_POWER_CTL, STANDBY)?;

        let (Some(off), Some(on)) = (off.means(SELF_TEST_DISCARD), on.means(SELF_TEST_DISCARD))
        else {
            tracing::warn!(off = off.len(), on = on.len(), "too few self-test samples");
            return Ok(SelfTestOutcome::Fail);
        };
        let scale = AccelRange::G16.scale();
        let delta = |i: usize| (on[i] - off[i]) / scale;
        let (x, y, z) = (delta(0), delta(1), delta(2));
        tracing::debug!(x, y, z, "self-test output change in LSB");

        let pass = within(SELF_TEST_X, x) && within(SELF_TEST_Y, y) && within(SELF_TEST_Z, z);
        Ok(if pass {
            SelfTestOutcome::Pass
        } else {
            SelfTestOutcome::Fail
        })
    }

    fn start(&mut self) -> Result<(), AccelError> {
        self.configure_streaming()?;
        thread::sleep(Duration::from_millis(self.config.settle_ms));
        self.begin_polling(self.range.scale())
    }

    fn stop(&mut self) -> Result<(), AccelError> {
        self.end_polling()?;
        if matches!(self.link, Link::Idle(_)) {
            self.write(REG_POWER_CTL, STANDBY)?;
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    /// Register-level stand-in for the sensor. The FIFO alternates between
    /// holding `level` entries and being empty.
    struct FakeSensor {
        data_format: u8,
        power: u8,
        level: u8,
        full: bool,
        off: [i16; 3],
        on: [i16; 3],
        /// After this many status reads, report a fixed occupancy.
        occupancy_after: Option<(usize, u8)>,
        /// The status read with this number fails on the bus.
        fail_at: Option<usize>,
        /// Samples left before the FIFO stays empty.
        budget: Option<usize>,
        reads: usize,
    }

    impl FakeSensor {
        fn new(on: [i16; 3]) -> Self {
            Self {
                data_format: 0,
                power: STANDBY,
                level: 16,
                full: false,
                off: [10, -20, 300],
                on,
                occupancy_after: None,
                fail_at: None,
                budget: None,
                reads: 0,
            }
        }

        fn fifo_status(&mut self) -> Result<u8, BusError> {
            self.reads += 1;
            if self.fail_at == Some(self.reads) {
                return Err(BusError::Transfer { code: -83 });
            }
            if let Some((after, occupancy)) = self.occupancy_after {
                if self.reads > after {
                    return Ok(occupancy);
                }
            }
            self.full = !self.full;
            let mut level = if self.full { self.level } else { 0 };
            if let Some(budget) = &mut self.budget {
                level = level.min(*budget as u8);
                *budget -= level as usize;
            }
            Ok(level)
        }
    }

    impl RegisterBus for FakeSensor {
        fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError> {
            let mut rx = vec![0u8; tx.len()];
            match tx[0] & 0x3F {
                REG_FIFO_STATUS => rx[1] = self.fifo_status()?,
                REG_DATAX0 => {
                    let values = if self.data_format & SELF_TEST != 0 {
                        self.on
                    } else {
                        self.off
                    };
                    for (i, v) in values.iter().enumerate() {
                        rx[1 + 2 * i..3 + 2 * i].copy_from_slice(&v.to_le_bytes());
                    }
                }
                _ => {}
            }
            Ok(rx)
        }

        fn write(&mut self, tx: &[u8]) -> Result<(), BusError> {
            match tx[0] {
                REG_DATA_FORMAT => self.data_format = tx[1],
                REG_POWER_CTL => self.power = tx[1],
                _ => {}
            }
            Ok(())
        }
    }

    fn config() -> AccelerometerConfig {
        AccelerometerConfig {
            self_test_window_ms: 100,
            settle_ms: 0,
            ..AccelerometerConfig::default()
        }
    }

    fn self_test_with(delta: [i16; 3]) -> SelfTestOutcome {
        let mut fake = FakeSensor::new([0; 3]);
        fake.on = [0, 1, 2].map(|i| fake.off[i] + delta[i]);
        let mut sensor = Adxl345::new(fake, &config());
        sensor.self_test().unwrap()
    }

    #[test]
    fn self_test_passes_just_inside_bands() {
        assert_eq!(self_test_with([89, -89, 111]), SelfTestOutcome::Pass);
    }

    #[test]
    fn self_test_fails_outside_y_band() {
        assert_eq!(self_test_with([89, -88, 111]), SelfTestOutcome::Fail);
    }

    #[test]
    fn streams_scaled_samples_until_stopped() {
        let mut sensor = Adxl345::new(FakeSensor::new([0; 3]), &config());
        sensor.start().unwrap();
        assert_eq!(sensor.status(), AccelStatus::Collecting);
        thread::sleep(Duration::from_millis(30));
        sensor.stop().unwrap();
        assert_eq!(sensor.status(), AccelStatus::Stopped);

        let samples = sensor.samples();
        assert!(samples.len() >= 16);
        let scale = AccelRange::G2.scale();
        assert!((samples.x[0] - 10.0 * scale).abs() < 1e-9);
        assert!((samples.y[0] + 20.0 * scale).abs() < 1e-9);
        let Link::Idle(bus) = &sensor.link else {
            panic!("bus not reclaimed");
        };
        assert_eq!(bus.power, STANDBY);
    }

    #[test]
    fn full_fifo_reports_overrun() {
        let mut fake = FakeSensor::new([0; 3]);
        fake.occupancy_after = Some((6, FIFO_DEPTH));
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        while sensor.status() == AccelStatus::Collecting {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sensor.status(), AccelStatus::Overrun);
        sensor.stop().unwrap();
        assert_eq!(sensor.status(), AccelStatus::Overrun);
    }

    fn wait_while_collecting<B: RegisterBus>(sensor: &Adxl345<B>) {
        while sensor.status() == AccelStatus::Collecting {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn occupancy_beyond_fifo_depth_is_out_of_range() {
        // first read of a cycle
        let mut fake = FakeSensor::new([0; 3]);
        fake.occupancy_after = Some((2, 40));
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        wait_while_collecting(&sensor);
        assert_eq!(sensor.status(), AccelStatus::OutOfRange);
        sensor.stop().unwrap();

        // while draining within a cycle
        let mut fake = FakeSensor::new([0; 3]);
        fake.occupancy_after = Some((3, 40));
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        wait_while_collecting(&sensor);
        assert_eq!(sensor.status(), AccelStatus::OutOfRange);
        assert_eq!(sensor.samples().len(), 16);
        sensor.stop().unwrap();
    }

    #[test]
    fn bus_error_reports_read_failed() {
        let mut fake = FakeSensor::new([0; 3]);
        fake.fail_at = Some(3);
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        wait_while_collecting(&sensor);
        assert_eq!(sensor.status(), AccelStatus::ReadFailed);
        sensor.stop().unwrap();
        assert_eq!(sensor.status(), AccelStatus::ReadFailed);
    }

    #[test]
    fn restarts_after_poll_ends_on_its_own() {
        let mut fake = FakeSensor::new([89, -109, 411]);
        fake.fail_at = Some(3);
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        wait_while_collecting(&sensor);
        assert_eq!(sensor.status(), AccelStatus::ReadFailed);

        // no stop in between
        sensor.start().unwrap();
        assert_ne!(sensor.status(), AccelStatus::ReadFailed);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sensor.status(), AccelStatus::Collecting);
        sensor.stop().unwrap();
        assert_eq!(sensor.status(), AccelStatus::Stopped);
        assert!(!sensor.samples().is_empty());

        let mut fake = FakeSensor::new([89, -109, 411]);
        fake.level = 0;
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        wait_while_collecting(&sensor);
        assert_eq!(sensor.status(), AccelStatus::ConnectionFailed);
        assert!(sensor.self_test().is_ok());
        assert!(matches!(sensor.link, Link::Idle(_)));
    }

    #[test]
    fn self_test_fails_with_too_few_samples() {
        let mut fake = FakeSensor::new([89, -109, 411]);
        fake.level = 4;
        fake.budget = Some(20);
        let config = AccelerometerConfig {
            zero_fifo_limit: 100_000,
            ..config()
        };
        let mut sensor = Adxl345::new(fake, &config);
        assert_eq!(sensor.self_test().unwrap(), SelfTestOutcome::Fail);
        assert_eq!(sensor.samples().len(), 0);
    }

    #[test]
    fn silent_fifo_reports_connection_failure() {
        let mut fake = FakeSensor::new([0; 3]);
        fake.level = 0;
        let mut sensor = Adxl345::new(fake, &config());
        sensor.start().unwrap();
        while sensor.status() == AccelStatus::Collecting {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sensor.status(), AccelStatus::ConnectionFailed);
        sensor.stop().unwrap();
    }
}
