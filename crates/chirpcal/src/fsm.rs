//! Calibration state machine.
//!
//! One run calibrates (or verifies) a single axis:
//!
//! ```text
//! Idle -> Home -> GetAxisInfo -> [Center] -> Sweep -> Analyze -> Idle
//! ```
//!
//! The machine is advanced by [`Calibrator::tick`] on a fixed period and
//! fed firmware telemetry through [`Calibrator::handle_line`]. On every
//! tick either the entry action of a newly entered state runs, or the
//! during action of the current one. Commands for the firmware go to a
//! [`CommandSink`]; operator notices, prompts and the final outcome are
//! queued for the caller to collect.

use crate::{
    accel::{AccelStatus, Accelerometer, Channel},
    analysis::{AnalysisBackend, CalibrationError, ErrorKind, Metadata, Recording},
    config::{CalibrationConfig, FsmConfig},
};
use chirpcal_core::{Axis, CalibrationSolution, FrequencyResponse, SweepConfig};
use chirpcal_gcode::{MachineCommand, Reply};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Receives the commands a run sends to the firmware, in order.
pub trait CommandSink {
    fn push(&mut self, command: MachineCommand);
}

#[derive(Default, Debug)]
pub struct RecordingSink {
    pub commands: Vec<MachineCommand>,
}

impl CommandSink for RecordingSink {
    fn push(&mut self, command: MachineCommand) {
        self.commands.push(command);
    }
}

/// Forwards commands to a writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub UnboundedSender<MachineCommand>);

impl CommandSink for ChannelSink {
    fn push(&mut self, command: MachineCommand) {
        if let Err(err) = self.0.send(command) {
            tracing::warn!(command = %err.0, "command channel closed");
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Home,
    GetAxisInfo,
    Center,
    Sweep,
    Analyze,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    #[default]
    Calibrate,
    /// Measure the axis with its shaper applied.
    Verify,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

/// A question the operator must answer before the run can continue.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prompt {
    pub title: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptReply {
    Proceed,
    Cancel,
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Calibrated {
        axis: Axis,
        solution: CalibrationSolution,
    },
    Verified {
        axis: Axis,
        response: FrequencyResponse,
    },
    Failed {
        axis: Axis,
        purpose: Purpose,
        error: CalibrationError,
    },
    Aborted {
        axis: Option<Axis>,
        purpose: Purpose,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a run is already in progress (state {state:?})")]
    Busy { state: State },
}

/// Per-run state, cleared on every start, retry and abort.
#[derive(Debug, Default)]
struct Run {
    axis_length: Option<f64>,
    steps_per_unit: Option<f64>,
    position: f64,
    centering_wait: f64,
    sweep: Option<SweepConfig>,
    sweep_initiated: bool,
    sweep_done_received: bool,
    accelerometer_stop_requested: bool,
    homing_required: Option<Vec<char>>,
    axis_info_timeout_extended: bool,
}

pub struct Calibrator<S> {
    config: FsmConfig,
    calibration: CalibrationConfig,
    sink: S,
    accelerometer: Box<dyn Accelerometer>,
    backend: Box<dyn AnalysisBackend>,
    state: State,
    entered: Option<State>,
    time_in_state: f64,
    axis: Option<Axis>,
    purpose: Purpose,
    retries: u32,
    run: Run,
    metadata: Metadata,
    awaiting_reply: bool,
    prompt_reply: Option<PromptReply>,
    prompt: Option<Prompt>,
    notices: VecDeque<Notice>,
    outcome: Option<RunOutcome>,
}

impl<S: CommandSink> Calibrator<S> {
    pub fn new(
        config: FsmConfig,
        calibration: CalibrationConfig,
        sink: S,
        accelerometer: Box<dyn Accelerometer>,
        backend: Box<dyn AnalysisBackend>,
    ) -> Self {
        Self {
            config,
            calibration,
            sink,
            accelerometer,
            backend,
            state: State::Idle,
            entered: Some(State::Idle),
            time_in_state: 0.0,
            axis: None,
            purpose: Purpose::default(),
            retries: 0,
            run: Run::default(),
            metadata: Metadata::default(),
            awaiting_reply: false,
            prompt_reply: None,
            prompt: None,
            notices: VecDeque::new(),
            outcome: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != State::Idle
    }

    pub fn axis(&self) -> Option<Axis> {
        self.axis
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn time_in_state(&self) -> f64 {
        self.time_in_state
    }

    pub fn axis_length(&self) -> Option<f64> {
        self.run.axis_length
    }

    pub fn sweep(&self) -> Option<&SweepConfig> {
        self.run.sweep.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn accelerometer(&self) -> &dyn Accelerometer {
        self.accelerometer.as_ref()
    }

    pub fn accelerometer_mut(&mut self) -> &mut dyn Accelerometer {
        self.accelerometer.as_mut()
    }

    /// Swaps in a different sensor, e.g. after reconnecting.
    pub fn replace_accelerometer(&mut self, accelerometer: Box<dyn Accelerometer>) {
        self.release_accelerometer();
        self.accelerometer = accelerometer;
    }

    /// The latest down-sampled points of the axis being measured.
    pub fn live_view(&self, n: usize) -> Vec<f64> {
        let channel = self.axis.map_or(Channel::X, Channel::from);
        self.accelerometer.live_view(channel, n)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    pub fn take_prompt(&mut self) -> Option<Prompt> {
        self.prompt.take()
    }

    pub fn awaiting_prompt(&self) -> bool {
        self.awaiting_reply
    }

    pub fn take_outcome(&mut self) -> Option<RunOutcome> {
        self.outcome.take()
    }

    pub fn send(&mut self, command: MachineCommand) {
        tracing::debug!(%command, "send");
        self.sink.push(command);
    }

    pub fn start(&mut self, axis: Axis, purpose: Purpose) -> Result<(), StartError> {
        if self.is_busy() {
            return Err(StartError::Busy { state: self.state });
        }
        self.reset(false);
        self.axis = Some(axis);
        self.purpose = purpose;
        self.outcome = None;
        self.transition(State::Home);
        self.entered = None;
        tracing::info!(%axis, ?purpose, "run started");
        Ok(())
    }

    pub fn respond_prompt(&mut self, reply: PromptReply) {
        if !self.awaiting_reply {
            tracing::debug!(?reply, "no prompt pending");
            return;
        }
        self.awaiting_reply = false;
        self.prompt_reply = Some(reply);
    }

    /// Advances the machine by one tick.
    pub fn tick(&mut self) {
        let state = self.state;
        if self.entered != Some(state) {
            self.time_in_state = 0.0;
            self.entered = Some(state);
            self.enter(state);
        } else {
            self.time_in_state += self.config.tick_secs;
            self.during(state);
        }
    }

    /// Aborts the current run and returns to Idle.
    pub fn kill(&mut self) {
        let was_busy = self.is_busy();
        if self.run.sweep_initiated {
            self.send(MachineCommand::AbortSweep);
        }
        if !matches!(
            self.accelerometer.status(),
            AccelStatus::Init | AccelStatus::Stopped
        ) {
            self.release_accelerometer();
        }
        if was_busy {
            self.outcome = Some(RunOutcome::Aborted {
                axis: self.axis,
                purpose: self.purpose,
            });
            tracing::info!(axis = ?self.axis, "run aborted");
        }
        self.reset(false);
        self.awaiting_reply = false;
        self.prompt_reply = None;
        self.prompt = None;
        self.transition(State::Idle);
        self.entered = None;
    }

    /// Feeds one line of firmware output.
    pub fn handle_line(&mut self, line: &str) {
        tracing::trace!(line, "recv");
        let reply = match Reply::parse(line) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::debug!(%err, line, "ignoring malformed telemetry");
                return;
            }
        };
        let length = self.axis.and_then(|axis| reply.axis_length(axis));
        match reply {
            Reply::AxisConfig(fields) => {
                if self.state == State::GetAxisInfo && length.is_some() {
                    self.run.axis_length = length;
                }
                self.metadata.axis_config = Some(fields);
            }
            Reply::SweepComplete => {
                if self.state == State::Sweep {
                    tracing::debug!("sweep complete");
                    self.run.sweep_done_received = true;
                }
            }
            Reply::Position(position) => {
                if self.state == State::Center {
                    let coordinate = match self.axis {
                        Some(Axis::X) => position.x,
                        Some(Axis::Y) => position.y,
                        None => None,
                    };
                    if let Some(coordinate) = coordinate {
                        self.run.position = coordinate;
                    }
                }
            }
            Reply::Firmware(fields) => self.metadata.firmware = Some(fields),
            Reply::StepsPerUnit(steps) => {
                if let Some(axis) = self.axis {
                    self.run.steps_per_unit = Some(steps.for_axis(axis));
                }
                self.metadata.steps_per_unit = Some(steps);
            }
            Reply::HomingRequired { axes } => {
                if self.state == State::Center {
                    tracing::debug!(?axes, "firmware requires homing");
                    self.run.homing_required = Some(axes);
                }
            }
            Reply::Other => {}
        }
    }

    fn transition(&mut self, next: State) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "transition");
        }
        self.state = next;
    }

    fn reset(&mut self, retry: bool) {
        self.run = Run::default();
        if !retry {
            self.axis = None;
            self.retries = 0;
        }
    }

    fn notify(&mut self, level: NoticeLevel, title: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Error => tracing::error!(title, %message),
            NoticeLevel::Warning => tracing::warn!(title, %message),
            NoticeLevel::Info | NoticeLevel::Success => tracing::info!(title, %message),
        }
        self.notices.push_back(Notice {
            level,
            title: title.to_string(),
            message,
        });
    }

    fn release_accelerometer(&mut self) {
        if let Err(err) = self.accelerometer.stop() {
            tracing::warn!(%err, "failed to stop the accelerometer");
        }
    }

    fn enter(&mut self, state: State) {
        match state {
            State::Idle => {}
            State::Home => self.enter_home(),
            State::GetAxisInfo => self.enter_axis_info(),
            State::Center => self.enter_center(),
            State::Sweep => self.enter_sweep(),
            State::Analyze => self.enter_analyze(),
        }
    }

    fn during(&mut self, state: State) {
        match state {
            State::Idle => {}
            State::Home => self.during_home(),
            State::GetAxisInfo => self.during_axis_info(),
            State::Center => self.during_center(),
            State::Sweep => self.during_sweep(),
            State::Analyze => {
                self.reset(false);
                self.transition(State::Idle);
            }
        }
    }

    fn enter_home(&mut self) {
        let Some(axis) = self.axis else {
            return self.kill();
        };
        if self.purpose == Purpose::Calibrate {
            self.send(MachineCommand::DisableShaping { axis });
        }
        let prehome = self.calibration.home_axis_before_calibration;
        match self.run.homing_required.clone() {
            Some(_) if !prehome => {
                self.notify(
                    NoticeLevel::Error,
                    "Homing Configuration Error",
                    "The machine wants to home before it accepts movement commands, but homing \
                     before calibration is disabled. Re-enable the setting and try again.",
                );
                self.kill();
            }
            Some(axes) => {
                let axes: String = axes.iter().collect();
                self.prompt = Some(Prompt {
                    title: "Machine Homing Confirm".into(),
                    message: format!(
                        "The machine wants to home the {axes} axes before moving. Verify motion \
                         is clear and proceed."
                    ),
                });
                self.awaiting_reply = true;
                self.prompt_reply = None;
                self.run.axis_info_timeout_extended = true;
            }
            None if prehome => self.send(MachineCommand::home(axis)),
            None => {}
        }
    }

    fn during_home(&mut self) {
        if self.run.homing_required.is_some() {
            if self.awaiting_reply {
                return;
            }
            match self.prompt_reply.take() {
                Some(PromptReply::Cancel) => return self.kill(),
                Some(PromptReply::Proceed) => {
                    if let Some(axes) = self.run.homing_required.take() {
                        self.send(MachineCommand::Home { axes });
                    }
                }
                None => {}
            }
        }
        self.transition(State::GetAxisInfo);
    }

    fn enter_axis_info(&mut self) {
        self.send(MachineCommand::QueryAxisConfig);
        self.send(MachineCommand::QueryStepsPerUnit);
        self.notify(
            NoticeLevel::Info,
            "Calibrating",
            "Initiating calibration sweep procedure...",
        );
    }

    fn during_axis_info(&mut self) {
        let timeout = if self.run.axis_info_timeout_extended {
            self.config.homing_axis_info_timeout_secs
        } else {
            self.config.axis_info_timeout_secs
        };
        if self.time_in_state > timeout {
            self.notify(
                NoticeLevel::Error,
                "Axis Info. Error",
                "Couldn't get information about the axis. Is the firmware compatible?",
            );
            return self.kill();
        }
        if self.run.axis_length.is_some() && self.run.steps_per_unit.is_some() {
            if self.calibration.home_axis_before_calibration {
                self.transition(State::Center);
            } else {
                self.transition(State::Sweep);
            }
        }
    }

    fn enter_center(&mut self) {
        let (Some(axis), Some(length)) = (self.axis, self.run.axis_length) else {
            return self.kill();
        };
        self.send(MachineCommand::center(axis, length, self.config.center_feed_rate));
    }

    fn during_center(&mut self) {
        if self.run.homing_required.is_some() {
            return self.transition(State::Home);
        }
        self.send(MachineCommand::QueryPosition);

        let half = self.run.axis_length.unwrap_or_default() / 2.0;
        let centred = (self.run.position - half).abs() < 1.0;
        if centred || !self.calibration.home_axis_before_calibration {
            let travel_time = half / (f64::from(self.config.center_feed_rate) / 60.0);
            if self.run.centering_wait >= travel_time {
                return self.transition(State::Sweep);
            }
            self.run.centering_wait += self.config.tick_secs;
        }

        if self.time_in_state > self.config.center_timeout_secs {
            self.notify(
                NoticeLevel::Error,
                "Axis Center Timeout",
                "Unknown error moving the axis to center.",
            );
            self.kill();
        }
    }

    fn enter_sweep(&mut self) {
        self.send(MachineCommand::QueryFirmware);
        let Some(steps) = self.run.steps_per_unit else {
            return self.kill();
        };
        let sweep = self.calibration.sweep(steps);
        tracing::debug!(?sweep, "sweep configured");
        self.accelerometer.prepare(&sweep);
        self.run.sweep = Some(sweep);
        if let Err(err) = self.accelerometer.start() {
            self.notify(
                NoticeLevel::Error,
                "Accelerometer Error",
                format!("Could not start the accelerometer: {err}"),
            );
            self.kill();
        }
    }

    fn during_sweep(&mut self) {
        if self.time_in_state > self.config.sweep_start_delay_secs && !self.run.sweep_initiated {
            if let (Some(axis), Some(sweep)) = (self.axis, self.run.sweep.clone()) {
                self.send(MachineCommand::StartSweep { axis, sweep });
            }
            self.run.sweep_initiated = true;
        }

        let elapsed = self
            .config
            .simulated_sweep_secs
            .is_some_and(|secs| self.time_in_state > secs);
        if !self.run.accelerometer_stop_requested && (self.run.sweep_done_received || elapsed) {
            tracing::debug!("stopping acquisition");
            self.release_accelerometer();
            self.run.accelerometer_stop_requested = true;
        }

        match self.accelerometer.status() {
            AccelStatus::Collecting => {}
            AccelStatus::Stopped => self.transition(State::Analyze),
            AccelStatus::Overrun => {
                self.release_accelerometer();
                if self.retries < self.config.max_retries {
                    self.retries += 1;
                    self.send(MachineCommand::AbortSweep);
                    self.notify(
                        NoticeLevel::Warning,
                        "Retrying",
                        "Some accelerometer data was lost, the routine will be retried.",
                    );
                    self.reset(true);
                    self.transition(State::Home);
                } else {
                    self.notify(
                        NoticeLevel::Error,
                        "Retry Limit",
                        "Retry limit reached, exiting this attempt.",
                    );
                    self.kill();
                }
            }
            status => {
                self.release_accelerometer();
                self.notify(
                    NoticeLevel::Error,
                    "Accelerometer Connection Lost",
                    format!("Accelerometer connection was lost during the routine ({status})."),
                );
                self.kill();
            }
        }
    }

    fn enter_analyze(&mut self) {
        self.retries = 0;
        let Some(axis) = self.axis else {
            return self.kill();
        };
        let Some(sweep) = self.run.sweep.clone() else {
            return self.kill();
        };
        match self.purpose {
            Purpose::Calibrate => self.notify(
                NoticeLevel::Info,
                "Processing Data",
                "Processing data, please wait...",
            ),
            Purpose::Verify => {
                self.notify(NoticeLevel::Info, "Verifying Calibration", "Please wait...")
            }
        }

        let samples = self.accelerometer.samples();
        let recording = Recording {
            axis,
            sweep: &sweep,
            samples: &samples,
            sample_period: self.accelerometer.sample_period(),
            metadata: &self.metadata,
        };
        let outcome = match self.purpose {
            Purpose::Calibrate => self
                .backend
                .solve(&recording)
                .map(|solution| RunOutcome::Calibrated { axis, solution }),
            Purpose::Verify => self
                .backend
                .verify(&recording)
                .map(|response| RunOutcome::Verified { axis, response }),
        };

        let outcome = match outcome {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Verified { .. } => self.notify(
                        NoticeLevel::Success,
                        "Calibration Applied",
                        format!(
                            "The calibration for the {} axis was applied successfully.",
                            axis.letter()
                        ),
                    ),
                    _ => self.notify(NoticeLevel::Success, "Calibration Received", ""),
                }
                outcome
            }
            Err(error) => {
                let kind = error.kind();
                let level = if kind.is_informational() {
                    NoticeLevel::Info
                } else {
                    NoticeLevel::Error
                };
                self.notify(level, kind.title(), kind.message());
                if kind == ErrorKind::NoVibration {
                    self.send(MachineCommand::DisableShaping { axis });
                }
                RunOutcome::Failed {
                    axis,
                    purpose: self.purpose,
                    error,
                }
            }
        };
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{AccelError, Samples, SelfTestOutcome};
    use chirpcal_core::{AnalysisError, Resonance};
    use parking_lot::Mutex;
    use std::{mem, sync::Arc};

    /// Sensor whose status the test sets directly.
    #[derive(Clone, Default)]
    struct Scripted(Arc<Mutex<ScriptState>>);

    #[derive(Default)]
    struct ScriptState {
        status: Option<AccelStatus>,
        starts: usize,
        stops: usize,
    }

    impl Scripted {
        fn set(&self, status: AccelStatus) {
            self.0.lock().status = Some(status);
        }
    }

    impl Accelerometer for Scripted {
        fn self_test(&mut self) -> Result<SelfTestOutcome, AccelError> {
            Ok(SelfTestOutcome::Pass)
        }

        fn start(&mut self) -> Result<(), AccelError> {
            let mut state = self.0.lock();
            state.starts += 1;
            state.status = Some(AccelStatus::Collecting);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), AccelError> {
            let mut state = self.0.lock();
            state.stops += 1;
            if state.status == Some(AccelStatus::Collecting) {
                state.status = Some(AccelStatus::Stopped);
            }
            Ok(())
        }

        fn status(&self) -> AccelStatus {
            self.0.lock().status.unwrap_or(AccelStatus::Init)
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

    /// Backend returning a fixed answer.
    struct Fixed(Result<CalibrationSolution, CalibrationError>);

    impl AnalysisBackend for Fixed {
        fn solve(
            &mut self,
            _recording: &Recording<'_>,
        ) -> Result<CalibrationSolution, CalibrationError> {
            self.0.clone()
        }

        fn verify(
            &mut self,
            _recording: &Recording<'_>,
        ) -> Result<FrequencyResponse, CalibrationError> {
            self.0.clone().map(|solution| solution.response)
        }
    }

    fn solved() -> CalibrationSolution {
        CalibrationSolution::new(
            Resonance { wc: 220.0, zeta: 0.1 },
            FrequencyResponse::new(vec![1.0], vec![1.0]),
        )
    }

    fn calibrator_with(
        prehome: bool,
        backend: Fixed,
    ) -> (Calibrator<RecordingSink>, Scripted) {
        let sensor = Scripted::default();
        let calibration = CalibrationConfig {
            home_axis_before_calibration: prehome,
            ..CalibrationConfig::default()
        };
        let calibrator = Calibrator::new(
            FsmConfig::default(),
            calibration,
            RecordingSink::default(),
            Box::new(sensor.clone()),
            Box::new(backend),
        );
        (calibrator, sensor)
    }

    fn lines(calibrator: &mut Calibrator<RecordingSink>) -> Vec<String> {
        mem::take(&mut calibrator.sink_mut().commands)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn answer_axis_info(calibrator: &mut Calibrator<RecordingSink>) {
        calibrator.handle_line("echo:M494 FTMCFG X_MAX_LENGTH:255.00 Y_MAX_LENGTH:210.00");
        calibrator.handle_line("echo: M92 X80.00 Y80.00 Z400.00");
    }

    #[test]
    fn start_rejected_while_busy() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        assert_eq!(
            calibrator.start(Axis::Y, Purpose::Calibrate),
            Err(StartError::Busy { state: State::Home })
        );
    }

    #[test]
    fn home_entry_disables_shaping_and_homes() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::Y, Purpose::Calibrate).unwrap();
        calibrator.tick();
        assert_eq!(lines(&mut calibrator), ["M493 S1 Y0", "G28 Y"]);

        let (mut calibrator, _) = calibrator_with(false, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Verify).unwrap();
        calibrator.tick();
        assert!(lines(&mut calibrator).is_empty());
    }

    #[test]
    fn centres_the_axis_before_sweeping() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        calibrator.tick();
        calibrator.tick();
        assert_eq!(calibrator.state(), State::GetAxisInfo);
        calibrator.tick();
        answer_axis_info(&mut calibrator);
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Center);
        assert_eq!(calibrator.axis_length(), Some(255.0));
        lines(&mut calibrator);

        calibrator.tick();
        assert_eq!(lines(&mut calibrator), ["G1 X128 F6000"]);

        // not there yet
        calibrator.handle_line("X:10.00 Y:0.00 Z:0.00 E:0.00 Count X:800 Y:0 Z:0");
        calibrator.tick();
        assert_eq!(lines(&mut calibrator), ["M114"]);
        assert_eq!(calibrator.state(), State::Center);

        // 127.5 mm at 100 mm/s needs 1.275 s of settled wait
        calibrator.handle_line("X:127.50 Y:0.00 Z:0.00 E:0.00 Count X:10200 Y:0 Z:0");
        let mut ticks = 0;
        while calibrator.state() == State::Center {
            calibrator.tick();
            ticks += 1;
        }
        assert_eq!(ticks, 7);
        assert_eq!(calibrator.state(), State::Sweep);
    }

    #[test]
    fn centre_timeout_aborts() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        for _ in 0..3 {
            calibrator.tick();
        }
        answer_axis_info(&mut calibrator);
        calibrator.tick();
        while calibrator.is_busy() {
            calibrator.tick();
        }
        let notices = calibrator.take_notices();
        assert_eq!(notices.last().unwrap().title, "Axis Center Timeout");
        assert_eq!(
            calibrator.take_outcome(),
            Some(RunOutcome::Aborted {
                axis: Some(Axis::X),
                purpose: Purpose::Calibrate
            })
        );
        assert_eq!(calibrator.axis(), None);
    }

    #[test]
    fn sweep_command_sent_once_after_delay() {
        let (mut calibrator, sensor) = calibrator_with(false, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        calibrator.tick();
        calibrator.tick();
        calibrator.tick();
        answer_axis_info(&mut calibrator);
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Sweep);
        lines(&mut calibrator);

        calibrator.tick();
        assert_eq!(lines(&mut calibrator), ["M115"]);
        assert_eq!(sensor.0.lock().starts, 1);
        assert_eq!(calibrator.sweep().unwrap().f1, 90.0);

        for _ in 0..8 {
            calibrator.tick();
        }
        let sent = lines(&mut calibrator);
        assert_eq!(
            sent,
            ["M494 A1 B5 C90 D4 E4000 F0.050 H4000 I0.500 J1.000 K1.000"]
        );
    }

    #[test]
    fn sweep_complete_leads_to_one_analysis() {
        let (mut calibrator, sensor) = calibrator_with(false, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        for _ in 0..3 {
            calibrator.tick();
        }
        answer_axis_info(&mut calibrator);
        for _ in 0..5 {
            calibrator.tick();
        }
        calibrator.handle_line("echo:M494 profile ran to completion");
        calibrator.tick();
        assert_eq!(sensor.0.lock().stops, 1);
        assert_eq!(calibrator.state(), State::Analyze);

        calibrator.tick();
        assert_eq!(
            calibrator.take_outcome(),
            Some(RunOutcome::Calibrated {
                axis: Axis::X,
                solution: solved()
            })
        );
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Idle);
        calibrator.tick();
        assert_eq!(calibrator.take_outcome(), None);

        let titles: Vec<_> = calibrator
            .take_notices()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(
            titles,
            ["Calibrating", "Processing Data", "Calibration Received"]
        );
    }

    #[test]
    fn no_vibration_disables_shaping() {
        let failure = Fixed(Err(AnalysisError::NoVibration.into()));
        let (mut calibrator, sensor) = calibrator_with(false, failure);
        calibrator.start(Axis::Y, Purpose::Calibrate).unwrap();
        for _ in 0..3 {
            calibrator.tick();
        }
        answer_axis_info(&mut calibrator);
        calibrator.tick();
        calibrator.tick();
        sensor.set(AccelStatus::Stopped);
        calibrator.tick();
        lines(&mut calibrator);
        calibrator.tick();
        assert_eq!(lines(&mut calibrator), ["M493 S1 Y0"]);
        match calibrator.take_outcome() {
            Some(RunOutcome::Failed { error, .. }) => {
                assert_eq!(error.kind(), ErrorKind::NoVibration)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn homing_prompt_waits_for_operator() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        for _ in 0..3 {
            calibrator.tick();
        }
        answer_axis_info(&mut calibrator);
        calibrator.tick();
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Center);
        calibrator.handle_line("echo:Home XY First");
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Home);
        lines(&mut calibrator);

        calibrator.tick();
        assert!(calibrator.take_prompt().is_some());
        assert!(calibrator.awaiting_prompt());
        for _ in 0..4 {
            calibrator.tick();
            assert_eq!(calibrator.state(), State::Home);
        }
        calibrator.respond_prompt(PromptReply::Proceed);
        calibrator.tick();
        assert_eq!(lines(&mut calibrator), ["M493 S1 X0", "G28 XY"]);
        assert_eq!(calibrator.state(), State::GetAxisInfo);
        // the known length survives the detour
        assert_eq!(calibrator.axis_length(), Some(255.0));
    }

    #[test]
    fn cancelled_prompt_kills_the_run() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        for _ in 0..3 {
            calibrator.tick();
        }
        answer_axis_info(&mut calibrator);
        calibrator.tick();
        calibrator.tick();
        calibrator.handle_line("echo:Home XY First");
        calibrator.tick();
        calibrator.tick();
        calibrator.respond_prompt(PromptReply::Cancel);
        calibrator.tick();
        assert_eq!(calibrator.state(), State::Idle);
        assert!(matches!(
            calibrator.take_outcome(),
            Some(RunOutcome::Aborted { .. })
        ));
    }

    #[test]
    fn axis_info_timeout() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        calibrator.tick();
        calibrator.tick();
        calibrator.tick();
        // only the length arrives
        calibrator.handle_line("echo:M494 FTMCFG X_MAX_LENGTH:255.00");
        let mut ticks = 0;
        while calibrator.is_busy() {
            calibrator.tick();
            ticks += 1;
        }
        assert_eq!(ticks, 41);
        assert_eq!(
            calibrator.take_notices().last().unwrap().title,
            "Axis Info. Error"
        );
    }

    #[test]
    fn axis_config_outside_axis_info_only_updates_metadata() {
        let (mut calibrator, _) = calibrator_with(true, Fixed(Ok(solved())));
        calibrator.handle_line("echo:M494 FTMCFG X_MAX_LENGTH:255.00");
        assert!(calibrator.metadata().axis_config.is_some());
        calibrator.start(Axis::X, Purpose::Calibrate).unwrap();
        assert_eq!(calibrator.axis_length(), None);
    }
}
