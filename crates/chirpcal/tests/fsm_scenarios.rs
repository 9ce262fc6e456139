/// Whole-run scenarios for the calibration state machine
use anyhow::Result;
use chirpcal::{
    accel::{AccelError, AccelStatus, Accelerometer, Channel, Samples, SelfTestOutcome},
    analysis::{AnalysisBackend, CalibrationError, Recording},
    config::{CalibrationConfig, FsmConfig},
    fsm::{Calibrator, Purpose, RecordingSink, RunOutcome, State},
};
use chirpcal_core::{Axis, CalibrationSolution, FrequencyResponse, Resonance};
use chirpcal_gcode::MachineCommand;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[derive(Clone, Default)]
struct Sensor {
    status: Arc<Mutex<Option<AccelStatus>>>,
    stops: Arc<AtomicUsize>,
}

impl Sensor {
    fn set(&self, status: AccelStatus) {
        *self.status.lock() = Some(status);
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Accelerometer for Sensor {
    fn self_test(&mut self) -> Result<SelfTestOutcome, AccelError> {
        Ok(SelfTestOutcome::Pass)
    }

    fn start(&mut self) -> Result<(), AccelError> {
        self.set(AccelStatus::Collecting);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AccelError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock();
        if *status == Some(AccelStatus::Collecting) {
            *status = Some(AccelStatus::Stopped);
        }
        Ok(())
    }

    fn status(&self) -> AccelStatus {
        (*self.status.lock()).unwrap_or(AccelStatus::Init)
    }

    fn samples(&self) -> Samples {
        Samples::default()
    }

    fn live_view(&self, _channel: Channel, _n: usize) -> Vec<f64> {
        Vec::new()
    }

    fn sample_period(&self) -> f64 {
        1.0 / 1600.0
    }
}

/// Counts solve calls and always finds 35 Hz.
struct Counting(Arc<AtomicUsize>);

impl AnalysisBackend for Counting {
    fn solve(
        &mut self,
        _recording: &Recording<'_>,
    ) -> Result<CalibrationSolution, CalibrationError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(CalibrationSolution::new(
            Resonance {
                wc: 2.0 * std::f64::consts::PI * 35.0,
                zeta: 0.1,
            },
            FrequencyResponse::new(vec![220.0], vec![4.0]),
        ))
    }

    fn verify(
        &mut self,
        _recording: &Recording<'_>,
    ) -> Result<FrequencyResponse, CalibrationError> {
        Ok(FrequencyResponse::default())
    }
}

fn calibrator(prehome: bool) -> (Calibrator<RecordingSink>, Sensor, Arc<AtomicUsize>) {
    let sensor = Sensor::default();
    let solves = Arc::new(AtomicUsize::new(0));
    let calibration = CalibrationConfig {
        home_axis_before_calibration: prehome,
        ..CalibrationConfig::default()
    };
    let calibrator = Calibrator::new(
        FsmConfig::default(),
        calibration,
        RecordingSink::default(),
        Box::new(sensor.clone()),
        Box::new(Counting(solves.clone())),
    );
    (calibrator, sensor, solves)
}

/// Ticks from Home until acquisition has started.
fn reach_sweep(calibrator: &mut Calibrator<RecordingSink>) {
    calibrator.tick(); // Home entry
    calibrator.tick(); // -> GetAxisInfo
    calibrator.tick(); // queries
    calibrator.handle_line("echo: M494 FTMCFG X_MAX_LENGTH:255.00 Y_MAX_LENGTH:255.00");
    calibrator.handle_line("echo: M92 X80.00 Y80.00 Z400.00 E93.00");
    calibrator.tick(); // -> Sweep
    assert_eq!(calibrator.state(), State::Sweep);
    calibrator.tick(); // acquisition starts
}

fn sweeps_started(calibrator: &Calibrator<RecordingSink>) -> usize {
    calibrator
        .sink()
        .commands
        .iter()
        .filter(|c| matches!(c, MachineCommand::StartSweep { .. }))
        .count()
}

#[test]
fn test_run_without_prehome_skips_centering() -> Result<()> {
    let (mut calibrator, sensor, solves) = calibrator(false);
    calibrator.start(Axis::X, Purpose::Calibrate)?;
    reach_sweep(&mut calibrator);
    assert_eq!(sensor.status(), AccelStatus::Collecting);
    assert!(
        !calibrator
            .sink()
            .commands
            .iter()
            .any(|c| matches!(c, MachineCommand::MoveTo { .. } | MachineCommand::Home { .. }))
    );

    // the sweep goes out once the start delay has passed
    for _ in 0..3 {
        calibrator.tick();
    }
    assert_eq!(sweeps_started(&calibrator), 1);

    calibrator.handle_line("echo:M494 profile ran to completion.");
    calibrator.tick();
    assert_eq!(calibrator.state(), State::Analyze);
    calibrator.tick();
    calibrator.tick();
    assert_eq!(calibrator.state(), State::Idle);
    assert_eq!(solves.load(Ordering::SeqCst), 1);
    assert_eq!(sweeps_started(&calibrator), 1);

    let Some(RunOutcome::Calibrated { axis, solution }) = calibrator.take_outcome() else {
        panic!("expected a calibration");
    };
    assert_eq!(axis, Axis::X);
    assert!((solution.resonance.unwrap().frequency_hz() - 35.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_overruns_retry_then_give_up() -> Result<()> {
    let (mut calibrator, sensor, solves) = calibrator(false);
    calibrator.start(Axis::Y, Purpose::Calibrate)?;

    for attempt in 1..=2 {
        reach_sweep(&mut calibrator);
        assert_eq!(calibrator.axis_length(), Some(255.0));
        assert!(calibrator.sweep().is_some());
        sensor.set(AccelStatus::Overrun);
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Home);
        assert_eq!(calibrator.axis(), Some(Axis::Y));
        assert_eq!(calibrator.retries(), attempt);
        // the retry starts from a clean run
        assert_eq!(calibrator.axis_length(), None);
        assert!(calibrator.sweep().is_none());
    }

    reach_sweep(&mut calibrator);
    sensor.set(AccelStatus::Overrun);
    calibrator.tick();
    assert_eq!(calibrator.state(), State::Idle);
    assert_eq!(calibrator.axis(), None);
    assert_eq!(solves.load(Ordering::SeqCst), 0);
    assert!(matches!(
        calibrator.take_outcome(),
        Some(RunOutcome::Aborted {
            axis: Some(Axis::Y),
            ..
        })
    ));

    let titles: Vec<String> = calibrator
        .take_notices()
        .into_iter()
        .map(|n| n.title)
        .filter(|t| t == "Retrying" || t == "Retry Limit")
        .collect();
    assert_eq!(titles, ["Retrying", "Retrying", "Retry Limit"]);
    Ok(())
}

#[test]
fn test_lost_sensor_aborts_run() -> Result<()> {
    let (mut calibrator, sensor, _) = calibrator(false);
    calibrator.start(Axis::X, Purpose::Verify)?;
    reach_sweep(&mut calibrator);
    sensor.set(AccelStatus::ReadFailed);
    calibrator.tick();
    assert_eq!(calibrator.state(), State::Idle);
    let notices = calibrator.take_notices();
    assert!(notices.iter().any(|n| n.title == "Accelerometer Connection Lost"));
    // verification runs leave the applied shaper alone
    assert!(
        !calibrator
            .sink()
            .commands
            .iter()
            .any(|c| matches!(c, MachineCommand::DisableShaping { .. }))
    );
    Ok(())
}

#[test]
fn test_abort_releases_sensor_that_stopped_on_its_own() -> Result<()> {
    let (mut calibrator, sensor, _) = calibrator(false);
    calibrator.start(Axis::X, Purpose::Calibrate)?;
    reach_sweep(&mut calibrator);
    let before = sensor.stops();

    // the poll loop ends before the next sweep tick sees it
    sensor.set(AccelStatus::ConnectionFailed);
    calibrator.kill();
    assert_eq!(sensor.stops(), before + 1);
    assert_eq!(calibrator.state(), State::Idle);
    assert!(matches!(
        calibrator.take_outcome(),
        Some(RunOutcome::Aborted { .. })
    ));

    // an idle sensor is left alone
    let (mut idle, sensor, _) = self::calibrator(false);
    idle.kill();
    assert_eq!(sensor.stops(), 0);
    Ok(())
}
