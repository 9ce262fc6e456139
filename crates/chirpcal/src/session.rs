//! Operator workflow on top of the state machine.
//!
//! A session connects the sensor, calibrates one axis at a time, lets the
//! operator pick a shaper family and tolerance, applies the shaper with a
//! verification sweep and finally saves it. Which controls are usable is
//! recomputed into a [`Layout`] after every operation.

use crate::{
    accel::{AccelError, BusError, Channel, SelfTestOutcome},
    fsm::{
        Calibrator, CommandSink, Notice, NoticeLevel, Prompt, PromptReply, Purpose, RunOutcome,
        StartError,
    },
};
use chirpcal_core::{
    Axis, CalibrationSolution, FrequencyResponse, Shaper, ShaperKind, shaper::MIN_EI2H_VTOL,
};
use chirpcal_gcode::MachineCommand;
use serde::Serialize;
use std::{f64::consts::PI, fmt};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Connect,
    CalibrateX,
    CalibrateY,
    SelectZv,
    SelectZvd,
    SelectMzv,
    SelectEi,
    SelectEi2h,
    SelectEi3h,
    LoadCalibration,
    SaveCalibration,
    ClearSession,
}

impl Control {
    pub const ALL: [Control; 12] = [
        Control::Connect,
        Control::CalibrateX,
        Control::CalibrateY,
        Control::SelectZv,
        Control::SelectZvd,
        Control::SelectMzv,
        Control::SelectEi,
        Control::SelectEi2h,
        Control::SelectEi3h,
        Control::LoadCalibration,
        Control::SaveCalibration,
        Control::ClearSession,
    ];

    pub fn calibrate(axis: Axis) -> Self {
        match axis {
            Axis::X => Control::CalibrateX,
            Axis::Y => Control::CalibrateY,
        }
    }

    pub fn select(kind: ShaperKind) -> Self {
        match kind {
            ShaperKind::Zv => Control::SelectZv,
            ShaperKind::Zvd => Control::SelectZvd,
            ShaperKind::Mzv => Control::SelectMzv,
            ShaperKind::Ei => Control::SelectEi,
            ShaperKind::Ei2h => Control::SelectEi2h,
            ShaperKind::Ei3h => Control::SelectEi3h,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a control currently shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    #[default]
    Ready,
    NotConnected,
    Connecting,
    Connected,
    NotCalibrated,
    Calibrating,
    CalibrationReady,
    CalibrationApplied,
    NotSelected,
    Selected,
    NotLoaded,
    Loading,
    Loaded,
    NotSaved,
    Saved,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ControlStatus {
    pub enabled: bool,
    pub state: ControlState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Layout {
    controls: [ControlStatus; Control::ALL.len()],
    pub vtol_visible: bool,
}

impl Layout {
    pub fn get(&self, control: Control) -> ControlStatus {
        self.controls[control.index()]
    }

    pub fn is_enabled(&self, control: Control) -> bool {
        self.get(control).enabled
    }

    pub fn iter(&self) -> impl Iterator<Item = (Control, ControlStatus)> + '_ {
        Control::ALL.into_iter().zip(self.controls.iter().copied())
    }
}

/// Curves for plotting a calibration against its shaper.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShaperView {
    pub axis: Axis,
    pub kind: ShaperKind,
    pub frequencies_hz: Vec<f64>,
    pub response: Vec<f64>,
    pub compensator: Vec<f64>,
    pub shaped: Vec<f64>,
    pub verification: Option<Vec<f64>>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} is not available right now")]
    Disabled(Control),
    #[error(transparent)]
    Start(#[from] StartError),
    #[error(transparent)]
    Accelerometer(#[from] AccelError),
    #[error("no calibration result to apply")]
    NoSolution,
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct Session<S> {
    calibrator: Calibrator<S>,
    vtol: f64,
    connected: bool,
    self_test_active: bool,
    calibrating: Option<Axis>,
    verifying: bool,
    saved: bool,
    solution: Option<(Axis, CalibrationSolution)>,
    selected: Option<ShaperKind>,
    applied: [bool; 2],
    verification: Option<FrequencyResponse>,
    notices: Vec<Notice>,
    layout: Layout,
}

impl<S: CommandSink> Session<S> {
    pub fn new(calibrator: Calibrator<S>, vtol: f64) -> Self {
        let mut session = Self {
            calibrator,
            vtol,
            connected: false,
            self_test_active: false,
            calibrating: None,
            verifying: false,
            saved: false,
            solution: None,
            selected: None,
            applied: [false; 2],
            verification: None,
            notices: Vec::new(),
            layout: Layout::default(),
        };
        session.refresh();
        session
    }

    pub fn calibrator(&self) -> &Calibrator<S> {
        &self.calibrator
    }

    pub fn calibrator_mut(&mut self) -> &mut Calibrator<S> {
        &mut self.calibrator
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn is_busy(&self) -> bool {
        self.self_test_active
            || self.calibrating.is_some()
            || self.verifying
            || self.calibrator.is_busy()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn vtol(&self) -> f64 {
        self.vtol
    }

    pub fn selected(&self) -> Option<ShaperKind> {
        self.selected
    }

    pub fn solution(&self) -> Option<(Axis, &CalibrationSolution)> {
        self.solution.as_ref().map(|(axis, solution)| (*axis, solution))
    }

    pub fn solution_mut(&mut self) -> Option<&mut CalibrationSolution> {
        self.solution.as_mut().map(|(_, solution)| solution)
    }

    pub fn verification(&self) -> Option<&FrequencyResponse> {
        self.verification.as_ref()
    }

    pub fn is_applied(&self, axis: Axis) -> bool {
        self.applied[axis.index()]
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Notices raised by the session and its runs since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        let mut notices = std::mem::take(&mut self.notices);
        notices.extend(self.calibrator.take_notices());
        notices
    }

    pub fn take_prompt(&mut self) -> Option<Prompt> {
        self.calibrator.take_prompt()
    }

    pub fn respond_prompt(&mut self, reply: PromptReply) {
        self.calibrator.respond_prompt(reply);
    }

    pub fn handle_line(&mut self, line: &str) {
        self.calibrator.handle_line(line);
    }

    /// Self-tests the sensor and marks it connected when it passes.
    pub fn connect(&mut self) -> Result<SelfTestOutcome> {
        self.require(Control::Connect)?;
        self.self_test_active = true;
        self.connected = false;
        self.refresh();

        let result = self.calibrator.accelerometer_mut().self_test();
        self.self_test_active = false;
        let outcome = match result {
            Ok(SelfTestOutcome::Pass) => {
                self.connected = true;
                Ok(SelfTestOutcome::Pass)
            }
            Ok(SelfTestOutcome::Fail) => {
                self.notify(
                    NoticeLevel::Error,
                    "Accelerometer Error",
                    "Accelerometer self-test failed. Try another device.",
                );
                Ok(SelfTestOutcome::Fail)
            }
            Err(err) => {
                self.notify(
                    NoticeLevel::Error,
                    "Accelerometer Error",
                    "Connecting to the accelerometer failed. Check hardware and wiring.",
                );
                Err(err.into())
            }
        };
        self.refresh();
        outcome
    }

    pub fn calibrate(&mut self, axis: Axis) -> Result<()> {
        self.require(Control::calibrate(axis))?;
        self.calibrator.start(axis, Purpose::Calibrate)?;
        self.calibrating = Some(axis);
        self.applied[axis.index()] = false;
        self.solution = None;
        self.selected = None;
        self.verification = None;
        self.refresh();
        Ok(())
    }

    pub fn select_shaper(&mut self, kind: ShaperKind) -> Result<()> {
        self.require(Control::select(kind))?;
        if self.selected != Some(kind) {
            self.selected = Some(kind);
            if kind == ShaperKind::Ei2h {
                self.vtol = self.vtol.max(MIN_EI2H_VTOL);
            }
            self.invalidate_applied();
        }
        self.refresh();
        Ok(())
    }

    /// Vibration tolerance in percent.
    pub fn set_vtol_percent(&mut self, percent: f64) {
        let vtol = percent / 100.0;
        if vtol == self.vtol {
            return;
        }
        self.vtol = if self.selected == Some(ShaperKind::Ei2h) {
            vtol.max(MIN_EI2H_VTOL)
        } else {
            vtol
        };
        self.invalidate_applied();
        self.refresh();
    }

    /// Sends the selected shaper to the machine and starts a verification
    /// sweep with it applied.
    pub fn load_calibration(&mut self) -> Result<()> {
        self.require(Control::LoadCalibration)?;
        let Some(kind) = self.selected else {
            return Err(SessionError::NoSolution);
        };
        let Some((axis, resonance)) = self
            .solution
            .as_ref()
            .and_then(|(axis, solution)| Some((*axis, solution.resonance?)))
        else {
            return Err(SessionError::NoSolution);
        };

        let command = MachineCommand::SetShaper {
            axis,
            kind,
            frequency_hz: resonance.frequency_hz(),
            zeta: resonance.zeta,
            vtol: self.vtol,
        };
        tracing::info!(%command, %axis, %kind, "applying shaper");
        self.calibrator.start(axis, Purpose::Verify)?;
        self.calibrator.send(command);
        self.saved = false;
        self.verifying = true;
        self.refresh();
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        self.require(Control::SaveCalibration)?;
        self.calibrator.send(MachineCommand::SaveSettings);
        self.saved = true;
        self.notify(
            NoticeLevel::Info,
            "Saved to EEPROM",
            "Settings have been saved to the machine.",
        );
        self.refresh();
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.require(Control::ClearSession)?;
        self.calibrator.kill();
        self.self_test_active = false;
        self.calibrating = None;
        self.verifying = false;
        self.connected = false;
        self.saved = false;
        self.solution = None;
        self.selected = None;
        self.verification = None;
        self.applied = [false; 2];
        self.refresh();
        Ok(())
    }

    /// Advances the running calibration and folds its outcome into the
    /// session.
    pub fn tick(&mut self) {
        self.calibrator.tick();
        if let Some(outcome) = self.calibrator.take_outcome() {
            self.absorb(outcome);
        }
        self.refresh();
    }

    fn absorb(&mut self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Calibrated { axis, solution } => {
                self.calibrating = None;
                self.solution = Some((axis, solution));
                self.selected = Some(ShaperKind::Zvd);
                self.invalidate_applied();
            }
            RunOutcome::Verified { axis, response } => {
                self.verifying = false;
                self.verification = Some(response);
                self.applied[axis.index()] = true;
            }
            RunOutcome::Failed { purpose, .. } => match purpose {
                Purpose::Calibrate => {
                    self.calibrating = None;
                    self.solution = None;
                }
                Purpose::Verify => {
                    self.verifying = false;
                    self.verification = None;
                }
            },
            RunOutcome::Aborted { .. } => {
                self.calibrating = None;
                self.verifying = false;
                self.connected = false;
            }
        }
    }

    /// Stops whatever is running. The machine connection is considered lost
    /// afterwards.
    pub fn abort(&mut self) {
        self.calibrator.kill();
        if let Some(outcome) = self.calibrator.take_outcome() {
            self.absorb(outcome);
        }
        self.self_test_active = false;
        self.refresh();
    }

    /// Last `n` live-view points, zero-padded at the front.
    pub fn live_view(&self, n: usize) -> Vec<f64> {
        let channel = if self.self_test_active {
            Channel::Z
        } else {
            self.calibrator.axis().map_or(Channel::X, Channel::from)
        };
        let points = self.calibrator.accelerometer().live_view(channel, n);
        let mut padded = vec![0.0; n.saturating_sub(points.len())];
        padded.extend(points);
        padded
    }

    pub fn shaper_view(&self) -> Option<ShaperView> {
        let kind = self.selected?;
        let (axis, solution) = self.solution.as_ref()?;
        let resonance = solution.resonance?;
        let shaper = Shaper::new(kind, resonance.zeta, self.vtol);
        let response = &solution.response;
        let compensator = shaper.magnitudes(&response.w, resonance.wc);
        let shaped = response.shaped(&compensator).g;
        Some(ShaperView {
            axis: *axis,
            kind,
            frequencies_hz: response.w.iter().map(|w| w / (2.0 * PI)).collect(),
            response: response.g.clone(),
            compensator,
            shaped,
            verification: self.verification.as_ref().map(|v| v.g.clone()),
        })
    }

    fn require(&self, control: Control) -> Result<()> {
        if self.layout.is_enabled(control) {
            Ok(())
        } else {
            Err(SessionError::Disabled(control))
        }
    }

    fn notify(&mut self, level: NoticeLevel, title: &str, message: &str) {
        tracing::info!(?level, title, message, "session notice");
        self.notices.push(Notice {
            level,
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    /// A changed shaper choice means the machine no longer runs what is shown.
    fn invalidate_applied(&mut self) {
        if let Some((axis, _)) = &self.solution {
            self.applied[axis.index()] = false;
        }
        self.saved = false;
        self.verification = None;
    }

    fn refresh(&mut self) {
        let busy = self.is_busy();
        let solution_axis = self.solution.as_ref().map(|(axis, _)| *axis);
        let solution_applied = solution_axis.is_some_and(|axis| self.applied[axis.index()]);

        let mut layout = Layout {
            vtol_visible: !busy && self.selected.is_some_and(ShaperKind::uses_vtol),
            ..Layout::default()
        };
        for control in Control::ALL {
            let enabled = !busy
                && match control {
                    Control::Connect | Control::ClearSession => true,
                    Control::CalibrateX | Control::CalibrateY => self.connected,
                    Control::LoadCalibration => self.selected.is_some() && self.connected,
                    Control::SaveCalibration => solution_applied,
                    _ => self.solution.is_some(),
                };
            let state = match control {
                Control::Connect if self.self_test_active => ControlState::Connecting,
                Control::Connect if self.connected => ControlState::Connected,
                Control::Connect => ControlState::NotConnected,
                Control::CalibrateX => self.calibrate_state(Axis::X, solution_axis),
                Control::CalibrateY => self.calibrate_state(Axis::Y, solution_axis),
                Control::LoadCalibration if self.verifying => ControlState::Loading,
                Control::LoadCalibration if solution_applied => ControlState::Loaded,
                Control::LoadCalibration => ControlState::NotLoaded,
                Control::SaveCalibration if self.saved => ControlState::Saved,
                Control::SaveCalibration => ControlState::NotSaved,
                Control::ClearSession => ControlState::Ready,
                select => {
                    let chosen = self
                        .selected
                        .is_some_and(|kind| Control::select(kind) == select);
                    if chosen {
                        ControlState::Selected
                    } else {
                        ControlState::NotSelected
                    }
                }
            };
            layout.controls[control.index()] = ControlStatus { enabled, state };
        }
        self.layout = layout;
    }

    fn calibrate_state(&self, axis: Axis, solution_axis: Option<Axis>) -> ControlState {
        if self.applied[axis.index()] {
            ControlState::CalibrationApplied
        } else if self.calibrating == Some(axis) {
            ControlState::Calibrating
        } else if self.calibrating.is_none() && solution_axis == Some(axis) {
            ControlState::CalibrationReady
        } else {
            ControlState::NotCalibrated
        }
    }
}

/// Operator-facing notice for a sensor that could not be brought up.
pub fn bring_up_notice(err: &AccelError) -> Notice {
    let (title, message) = match err {
        AccelError::Bus(BusError::DaemonNotRunning { .. }) => (
            "Pigpio Not Running",
            "The accelerometer cannot be connected because the pigpio daemon is not running."
                .to_string(),
        ),
        AccelError::Bus(BusError::ConnectionFailed { .. }) => (
            "Pigpio Connection Failed",
            "The accelerometer cannot be connected because the pigpio connection failed."
                .to_string(),
        ),
        AccelError::Bus(BusError::SpiOpenFailed { .. }) => (
            "Pigpio SPI Open Failed",
            "The accelerometer cannot be connected because the SPI connection could not be opened."
                .to_string(),
        ),
        other => ("Accelerometer Startup Failed", other.to_string()),
    };
    Notice {
        level: NoticeLevel::Error,
        title: title.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accel::{AccelStatus, Accelerometer, Samples},
        analysis::{AnalysisBackend, CalibrationError, Recording},
        config::{CalibrationConfig, FsmConfig},
        fsm::RecordingSink,
    };
    use chirpcal_core::Resonance;

    struct Bench {
        outcome: SelfTestOutcome,
        status: AccelStatus,
    }

    impl Accelerometer for Bench {
        fn self_test(&mut self) -> std::result::Result<SelfTestOutcome, AccelError> {
            Ok(self.outcome)
        }

        fn start(&mut self) -> std::result::Result<(), AccelError> {
            self.status = AccelStatus::Collecting;
            Ok(())
        }

        fn stop(&mut self) -> std::result::Result<(), AccelError> {
            if self.status == AccelStatus::Collecting {
                self.status = AccelStatus::Stopped;
            }
            Ok(())
        }

        fn status(&self) -> AccelStatus {
            self.status
        }

        fn samples(&self) -> Samples {
            Samples::default()
        }

        fn live_view(&self, _channel: Channel, n: usize) -> Vec<f64> {
            vec![1.0; n.min(3)]
        }

        fn sample_period(&self) -> f64 {
            1.0 / 1600.0
        }
    }

    struct Answer;

    impl AnalysisBackend for Answer {
        fn solve(
            &mut self,
            _recording: &Recording<'_>,
        ) -> std::result::Result<CalibrationSolution, CalibrationError> {
            Ok(CalibrationSolution::new(
                Resonance {
                    wc: 2.0 * PI * 40.0,
                    zeta: 0.1,
                },
                FrequencyResponse::new(vec![100.0, 250.0, 400.0], vec![1.0, 5.0, 1.0]),
            ))
        }

        fn verify(
            &mut self,
            _recording: &Recording<'_>,
        ) -> std::result::Result<FrequencyResponse, CalibrationError> {
            Ok(FrequencyResponse::new(vec![100.0], vec![0.5]))
        }
    }

    fn session(outcome: SelfTestOutcome) -> Session<RecordingSink> {
        let calibration = CalibrationConfig {
            home_axis_before_calibration: false,
            ..CalibrationConfig::default()
        };
        let calibrator = Calibrator::new(
            FsmConfig::default(),
            calibration,
            RecordingSink::default(),
            Box::new(Bench {
                outcome,
                status: AccelStatus::Init,
            }),
            Box::new(Answer),
        );
        Session::new(calibrator, 0.05)
    }

    /// Drives a run to completion, answering the machine's queries.
    fn finish_run(session: &mut Session<RecordingSink>) {
        session.tick();
        session.tick();
        session.tick();
        session.handle_line("echo: M494 FTMCFG X_MAX_LENGTH:250.00 Y_MAX_LENGTH:250.00");
        session.handle_line("echo: M92 X80.00 Y80.00 Z400.00");
        for _ in 0..5 {
            session.tick();
        }
        session.handle_line("echo:M494 profile ran to completion");
        while session.is_busy() {
            session.tick();
        }
    }

    #[test]
    fn fresh_session_only_connects() {
        let session = session(SelfTestOutcome::Pass);
        let enabled: Vec<Control> = session
            .layout()
            .iter()
            .filter(|(_, status)| status.enabled)
            .map(|(control, _)| control)
            .collect();
        assert_eq!(enabled, [Control::Connect, Control::ClearSession]);
        assert_eq!(
            session.layout().get(Control::Connect).state,
            ControlState::NotConnected
        );
    }

    #[test]
    fn failed_self_test_keeps_calibration_locked() {
        let mut session = session(SelfTestOutcome::Fail);
        assert_eq!(session.connect().unwrap(), SelfTestOutcome::Fail);
        assert!(!session.layout().is_enabled(Control::CalibrateX));
        assert_eq!(session.take_notices()[0].title, "Accelerometer Error");
        assert!(matches!(
            session.calibrate(Axis::X),
            Err(SessionError::Disabled(Control::CalibrateX))
        ));
    }

    #[test]
    fn calibration_selects_zvd_and_unlocks_loading() {
        let mut session = session(SelfTestOutcome::Pass);
        session.connect().unwrap();
        session.calibrate(Axis::X).unwrap();
        assert!(Control::ALL.iter().all(|c| !session.layout().is_enabled(*c)));
        assert_eq!(
            session.layout().get(Control::CalibrateX).state,
            ControlState::Calibrating
        );

        finish_run(&mut session);
        assert_eq!(session.selected(), Some(ShaperKind::Zvd));
        assert_eq!(
            session.layout().get(Control::CalibrateX).state,
            ControlState::CalibrationReady
        );
        assert_eq!(
            session.layout().get(Control::SelectZvd).state,
            ControlState::Selected
        );
        assert!(session.layout().is_enabled(Control::LoadCalibration));
        assert!(!session.layout().is_enabled(Control::SaveCalibration));
        assert!(!session.layout().vtol_visible);

        let view = session.shaper_view().unwrap();
        assert_eq!(view.frequencies_hz.len(), 3);
        assert!(view.shaped[1] < view.response[1]);
    }

    #[test]
    fn apply_verify_and_save() {
        let mut session = session(SelfTestOutcome::Pass);
        session.connect().unwrap();
        session.calibrate(Axis::X).unwrap();
        finish_run(&mut session);
        session.calibrator_mut().sink_mut().commands.clear();

        session.select_shaper(ShaperKind::Ei).unwrap();
        assert!(session.layout().vtol_visible);
        session.load_calibration().unwrap();
        assert_eq!(
            session.layout().get(Control::LoadCalibration).state,
            ControlState::Loading
        );
        let first = session.calibrator().sink().commands[0].to_string();
        assert_eq!(first, "M493 X5 A40.00 I0.1000 Q0.05");

        finish_run(&mut session);
        assert!(session.is_applied(Axis::X));
        assert_eq!(
            session.layout().get(Control::CalibrateX).state,
            ControlState::CalibrationApplied
        );
        assert!(session.verification().is_some());
        assert!(session.layout().is_enabled(Control::SaveCalibration));

        session.save().unwrap();
        assert!(session.is_saved());
        assert_eq!(
            session.calibrator().sink().commands.last().unwrap().to_string(),
            "M500"
        );

        // changing the tolerance means the machine no longer matches
        session.set_vtol_percent(10.0);
        assert!(!session.is_applied(Axis::X));
        assert!(!session.is_saved());
    }

    #[test]
    fn ei2h_tolerance_floor() {
        let mut session = session(SelfTestOutcome::Pass);
        session.connect().unwrap();
        session.calibrate(Axis::Y).unwrap();
        finish_run(&mut session);
        session.select_shaper(ShaperKind::Ei2h).unwrap();
        session.set_vtol_percent(0.0);
        assert_eq!(session.vtol(), MIN_EI2H_VTOL);
        session.select_shaper(ShaperKind::Ei).unwrap();
        session.set_vtol_percent(0.0);
        assert_eq!(session.vtol(), 0.0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut session = session(SelfTestOutcome::Pass);
        session.connect().unwrap();
        session.calibrate(Axis::X).unwrap();
        finish_run(&mut session);
        session.clear().unwrap();
        assert!(session.solution().is_none());
        assert!(!session.is_connected());
        assert_eq!(session.selected(), None);
        assert!(!session.layout().is_enabled(Control::CalibrateX));
    }

    #[test]
    fn abort_drops_the_connection() {
        let mut session = session(SelfTestOutcome::Pass);
        session.connect().unwrap();
        session.calibrate(Axis::Y).unwrap();
        session.tick();
        session.abort();
        assert!(!session.is_busy());
        assert!(!session.is_connected());
        assert_eq!(
            session.layout().get(Control::CalibrateY).state,
            ControlState::NotCalibrated
        );
    }

    #[test]
    fn live_view_is_padded() {
        let session = session(SelfTestOutcome::Pass);
        assert_eq!(session.live_view(5), vec![0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn bring_up_notices() {
        let err = AccelError::Bus(BusError::DaemonNotRunning {
            address: "127.0.0.1:8888".into(),
        });
        assert_eq!(bring_up_notice(&err).title, "Pigpio Not Running");
        let err = AccelError::Bus(BusError::SpiOpenFailed {
            channel: 0,
            code: -1,
        });
        assert_eq!(bring_up_notice(&err).title, "Pigpio SPI Open Failed");
    }
}
