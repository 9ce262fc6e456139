//! Analysis back-ends that turn a recorded sweep into a calibration.

use crate::{
    accel::Samples,
    config::ServiceConfig,
    solver::{Operation, RequestParts, ServiceError, ServiceReply, SolveRequest, SolverClient},
};
use chirpcal_core::{
    AnalysisError, Analyzer, Axis, CalibrationSolution, FrequencyResponse, SweepConfig,
};
use chirpcal_gcode::StepsPerUnit;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Machine details collected while a run talks to the firmware.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(rename = "FTMCFG", skip_serializing_if = "Option::is_none")]
    pub axis_config: Option<BTreeMap<String, String>>,
    #[serde(rename = "FIRMWARE", skip_serializing_if = "Option::is_none")]
    pub firmware: Option<BTreeMap<String, String>>,
    #[serde(rename = "STEPSPERUNIT", skip_serializing_if = "Option::is_none")]
    pub steps_per_unit: Option<StepsPerUnit>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.axis_config.is_none() && self.firmware.is_none() && self.steps_per_unit.is_none()
    }
}

/// One finished recording, ready to be analyzed.
pub struct Recording<'a> {
    pub axis: Axis,
    pub sweep: &'a SweepConfig,
    pub samples: &'a Samples,
    pub sample_period: f64,
    pub metadata: &'a Metadata,
}

impl Recording<'_> {
    fn axis_samples(&self) -> &[f64] {
        match self.axis {
            Axis::X => &self.samples.x,
            Axis::Y => &self.samples.y,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no samples were recorded")]
    NoSamples,
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// How a failed run is reported to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Connection,
    WeakSignal,
    SignalDetection,
    NoVibration,
    Internal,
    UnknownResponse,
    NotAuthenticated,
    MachineIdNotFound,
}

impl CalibrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalibrationError::NoSamples => ErrorKind::WeakSignal,
            CalibrationError::Analysis(err) => match err {
                AnalysisError::WeakSignal { .. } => ErrorKind::WeakSignal,
                AnalysisError::NoVibration => ErrorKind::NoVibration,
                AnalysisError::StepsNotFound
                | AnalysisError::InsufficientSamples { .. }
                | AnalysisError::ConsensusFailed { .. }
                | AnalysisError::SlopeMismatch { .. } => ErrorKind::SignalDetection,
            },
            CalibrationError::Service(err) => match err {
                ServiceError::Timeout => ErrorKind::Timeout,
                ServiceError::Transport(_) => ErrorKind::Connection,
                ServiceError::NotAuthenticated => ErrorKind::NotAuthenticated,
                ServiceError::MachineIdNotFound => ErrorKind::MachineIdNotFound,
                ServiceError::NoSignal => ErrorKind::WeakSignal,
                ServiceError::SignalSync => ErrorKind::SignalDetection,
                ServiceError::NoVibrationDetected => ErrorKind::NoVibration,
                ServiceError::NoQualifiedSolution | ServiceError::InternalServer => {
                    ErrorKind::Internal
                }
                ServiceError::UnknownResponse(_) => ErrorKind::UnknownResponse,
            },
        }
    }
}

impl ErrorKind {
    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Timed out connecting to the solving service.",
            ErrorKind::Connection => "Error connecting to the solving service.",
            ErrorKind::WeakSignal => "Weak signal detected.",
            ErrorKind::SignalDetection => "Signal detection issue.",
            ErrorKind::NoVibration => "No vibration detected.",
            ErrorKind::Internal => "Internal solver error.",
            ErrorKind::UnknownResponse => "Unknown response received.",
            ErrorKind::NotAuthenticated => "Not authenticated.",
            ErrorKind::MachineIdNotFound => "Machine ID not found.",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Timed out waiting for the solving service to answer.",
            ErrorKind::Connection => {
                "Got an error while connecting to the solving service. If you are connected to \
                 the internet, it could be a problem with the service. Try again later."
            }
            ErrorKind::WeakSignal => {
                "Could not calibrate due to a weak signal. Is the accelerometer mounted on the \
                 correct axis and in the correct orientation?"
            }
            ErrorKind::SignalDetection => {
                "Could not calibrate due to a signal detection issue. Is the accelerometer \
                 mounted on the correct axis and in the correct orientation?"
            }
            ErrorKind::NoVibration => {
                "No vibration on the axis was detected. Shaping on this axis has been \
                 disabled, but you may wish to use the same shaper as the other axis."
            }
            ErrorKind::Internal => {
                "An internal solver error occurred. This cannot be solved at this time."
            }
            ErrorKind::UnknownResponse => "This cannot be solved at this time.",
            ErrorKind::NotAuthenticated => {
                "Unable to verify the service credentials. Please check your configuration."
            }
            ErrorKind::MachineIdNotFound => {
                "The configured machine ID is not known to the solving service."
            }
        }
    }

    /// Informational rather than a failure of the run itself.
    pub fn is_informational(self) -> bool {
        self == ErrorKind::NoVibration
    }
}

/// Turns a recording into a calibration, or into the response of an axis
/// whose shaper is already applied.
pub trait AnalysisBackend: Send {
    fn solve(&mut self, recording: &Recording<'_>) -> Result<CalibrationSolution, CalibrationError>;

    fn verify(&mut self, recording: &Recording<'_>) -> Result<FrequencyResponse, CalibrationError>;
}

impl<B: AnalysisBackend + ?Sized> AnalysisBackend for Box<B> {
    fn solve(&mut self, recording: &Recording<'_>) -> Result<CalibrationSolution, CalibrationError> {
        (**self).solve(recording)
    }

    fn verify(&mut self, recording: &Recording<'_>) -> Result<FrequencyResponse, CalibrationError> {
        (**self).verify(recording)
    }
}

/// Runs the frequency-response analyzer in-process.
#[derive(Debug, Default)]
pub struct LocalAnalysis {
    analyzer: Analyzer,
}

impl LocalAnalysis {
    pub fn new(analyzer: Analyzer) -> Self {
        Self { analyzer }
    }
}

impl AnalysisBackend for LocalAnalysis {
    fn solve(&mut self, recording: &Recording<'_>) -> Result<CalibrationSolution, CalibrationError> {
        let samples = recording.axis_samples();
        if samples.is_empty() {
            return Err(CalibrationError::NoSamples);
        }
        let analysis = self
            .analyzer
            .analyze(samples, recording.sweep, recording.sample_period)?;
        if let Some(map) = &analysis.frequency_map {
            tracing::debug!(
                start_hz = map.start_frequency(),
                rate = map.sweep_rate(),
                "recovered sweep mapping"
            );
        }
        tracing::info!(
            axis = %recording.axis,
            signal_ratio = analysis.signal_ratio,
            resonance = ?analysis.solution.resonance,
            "analysis complete"
        );
        Ok(analysis.solution)
    }

    fn verify(&mut self, recording: &Recording<'_>) -> Result<FrequencyResponse, CalibrationError> {
        let samples = recording.axis_samples();
        if samples.is_empty() {
            return Err(CalibrationError::NoSamples);
        }
        Ok(self
            .analyzer
            .response(samples, recording.sweep, recording.sample_period)?)
    }
}

/// Forwards recordings to the remote solving service.
pub struct RemoteAnalysis<C> {
    client: C,
    identity: ServiceConfig,
    source: String,
}

impl<C: SolverClient> RemoteAnalysis<C> {
    pub fn new(client: C, identity: ServiceConfig) -> Self {
        Self {
            client,
            identity,
            source: String::new(),
        }
    }

    /// Address reported as the request source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    fn exchange(
        &mut self,
        recording: &Recording<'_>,
        operation: Operation,
    ) -> Result<ServiceReply, CalibrationError> {
        let request = SolveRequest::new(RequestParts {
            axis: recording.axis,
            operation,
            samples: recording.samples,
            sweep: recording.sweep,
            metadata: recording.metadata,
            identity: &self.identity,
            source: &self.source,
            time: chrono::Local::now(),
        });
        let body = request
            .to_body()
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        tracing::debug!(?operation, bytes = body.len(), "posting recording");
        let reply = self.client.post(&body)?;
        Ok(crate::solver::parse_reply(&reply)?)
    }
}

impl<C: SolverClient> AnalysisBackend for RemoteAnalysis<C> {
    fn solve(&mut self, recording: &Recording<'_>) -> Result<CalibrationSolution, CalibrationError> {
        match self.exchange(recording, Operation::Solve)? {
            ServiceReply::Solved {
                resonance,
                response,
            } => Ok(CalibrationSolution::new(resonance, response)),
            ServiceReply::Verified { .. } => Err(ServiceError::UnknownResponse(
                "verification reply to a solve request".into(),
            )
            .into()),
        }
    }

    fn verify(&mut self, recording: &Recording<'_>) -> Result<FrequencyResponse, CalibrationError> {
        match self.exchange(recording, Operation::Verify)? {
            ServiceReply::Verified { response } => Ok(response),
            ServiceReply::Solved { .. } => Err(ServiceError::UnknownResponse(
                "solution reply to a verify request".into(),
            )
            .into()),
        }
    }
}
