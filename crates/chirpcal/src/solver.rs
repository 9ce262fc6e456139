//! Request and response contract of the remote solving service.
//!
//! The transport itself is supplied by the embedder through
//! [`SolverClient`]; this module only builds request bodies and interprets
//! replies.

use crate::{accel::Samples, analysis::Metadata, config::ServiceConfig};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chirpcal_core::{Axis, FrequencyResponse, Resonance, SweepConfig};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const CLIENT_VERSION: &str = "V0.3";
const PRINTER_VERSION: &str = "V0.01";
const REQUEST_TIME_FORMAT: &str = "%d/%m/%Y_%H:%M:%S";
const UNKNOWN_SOURCE: &str = "0.0.0.0";

/// Posts one request body and returns the raw response body.
pub trait SolverClient: Send {
    fn post(&mut self, body: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("timed out waiting for the solving service")]
    Timeout,
    #[error("could not reach the solving service: {0}")]
    Transport(String),
    #[error("the solving service rejected the credentials")]
    NotAuthenticated,
    #[error("the machine id is not registered with the solving service")]
    MachineIdNotFound,
    #[error("the recording carried no usable signal")]
    NoSignal,
    #[error("the recording could not be aligned with the sweep")]
    SignalSync,
    #[error("no shaper met the service's acceptance criteria")]
    NoQualifiedSolution,
    #[error("no vibration was detected on the axis")]
    NoVibrationDetected,
    #[error("the solving service reported an internal error")]
    InternalServer,
    #[error("unrecognised response from the solving service: {0}")]
    UnknownResponse(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Solve,
    Verify,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SolveRequest {
    pub action: &'static str,
    #[serde(rename = "XAXISRESPONSE")]
    pub x_response: String,
    #[serde(rename = "YAXISRESPONSE")]
    pub y_response: String,
    #[serde(rename = "ZAXISRESPONSE")]
    pub z_response: String,
    pub axis: Axis,
    pub operation: Operation,
    pub metadata: Value,
    pub access: Access,
    pub request: RequestInfo,
    pub sweep_cfg: FirmwareSweep,
    pub conditions: String,
    pub printer: PrinterInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Access {
    pub client_id: String,
    pub org_id: String,
    pub access_id: String,
    pub machine_id: String,
    pub machine_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RequestInfo {
    pub request_time: String,
    pub client_version: &'static str,
    #[serde(rename = "RequestSource")]
    pub request_source: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PrinterInfo {
    pub printer_make: String,
    pub printer_model: String,
    pub version: &'static str,
    pub manufacturer_name: String,
}

/// Sweep parameters in the firmware's units: times in milliseconds.
#[derive(Debug, PartialEq, Serialize)]
pub struct FirmwareSweep {
    pub f0: f64,
    pub f1: f64,
    pub dfdt: f64,
    pub a: f64,
    pub step_ti: f64,
    pub step_a: f64,
    pub dly1_ti: f64,
    pub dly2_ti: f64,
    pub dly3_ti: f64,
}

impl From<&SweepConfig> for FirmwareSweep {
    fn from(sweep: &SweepConfig) -> Self {
        let ms = |secs: f64| (secs * 1000.0).round();
        Self {
            f0: sweep.f0,
            f1: sweep.f1,
            dfdt: sweep.dfdt,
            a: sweep.a,
            step_ti: ms(sweep.step_ti),
            step_a: sweep.step_a,
            dly1_ti: ms(sweep.dly1_ti),
            dly2_ti: ms(sweep.dly2_ti),
            dly3_ti: ms(sweep.dly3_ti),
        }
    }
}

/// Everything one request is built from.
pub struct RequestParts<'a> {
    pub axis: Axis,
    pub operation: Operation,
    pub samples: &'a Samples,
    pub sweep: &'a SweepConfig,
    pub metadata: &'a Metadata,
    pub identity: &'a ServiceConfig,
    pub source: &'a str,
    pub time: DateTime<Local>,
}

impl SolveRequest {
    pub fn new(parts: RequestParts<'_>) -> Self {
        let identity = parts.identity;
        let metadata = if parts.metadata.is_empty() {
            Value::from("N/A")
        } else {
            serde_json::to_value(parts.metadata).unwrap_or(Value::Null)
        };
        Self {
            action: "CALIBRATE",
            x_response: encode_samples(&parts.samples.x),
            y_response: encode_samples(&parts.samples.y),
            z_response: encode_samples(&parts.samples.z),
            axis: parts.axis,
            operation: parts.operation,
            metadata,
            access: Access {
                client_id: identity.org_id.clone(),
                org_id: identity.org_id.clone(),
                access_id: identity.access_id.clone(),
                machine_id: identity.machine_id.clone(),
                machine_name: identity.machine_name.clone(),
            },
            request: RequestInfo {
                request_time: parts.time.format(REQUEST_TIME_FORMAT).to_string(),
                client_version: CLIENT_VERSION,
                request_source: if parts.source.is_empty() {
                    UNKNOWN_SOURCE.to_string()
                } else {
                    parts.source.to_string()
                },
            },
            sweep_cfg: FirmwareSweep::from(parts.sweep),
            conditions: identity.conditions.clone(),
            printer: PrinterInfo {
                printer_make: identity.manufacturer_name.clone(),
                printer_model: identity.model_id.clone(),
                version: PRINTER_VERSION,
                manufacturer_name: String::new(),
            },
        }
    }

    /// The service expects the request document wrapped in a JSON string.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        let document = serde_json::to_string(self)?;
        serde_json::to_string(&document)
    }
}

/// Samples as little-endian `f32`s, base64 encoded.
pub fn encode_samples(samples: &[f64]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&v| (v as f32).to_le_bytes())
        .collect();
    STANDARD.encode(bytes)
}

/// What a successful reply carried.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceReply {
    Solved {
        resonance: Resonance,
        response: FrequencyResponse,
    },
    Verified {
        response: FrequencyResponse,
    },
}

#[derive(Deserialize)]
struct GuiData {
    bp: Vec<f64>,
    g: Vec<f64>,
}

impl From<GuiData> for FrequencyResponse {
    fn from(data: GuiData) -> Self {
        FrequencyResponse::new(data.bp, data.g)
    }
}

/// Interprets a response body. Nested documents arrive as JSON strings.
pub fn parse_reply(body: &str) -> Result<ServiceReply, ServiceError> {
    let unknown = || ServiceError::UnknownResponse(body.to_string());
    let reply: serde_json::Map<String, Value> =
        serde_json::from_str(body).map_err(|_| unknown())?;

    if let Some(exception) = reply.get("exception") {
        return Err(match exception.as_str() {
            Some("NoSignalError") => ServiceError::NoSignal,
            Some("SignalSyncError") => ServiceError::SignalSync,
            Some("NoQualifiedSolution") => ServiceError::NoQualifiedSolution,
            Some("NoVibrationDetected") => ServiceError::NoVibrationDetected,
            _ => unknown(),
        });
    }

    let nested = |key: &str| -> Option<Value> {
        match reply.get(key)? {
            Value::String(text) => serde_json::from_str(text).ok(),
            other => Some(other.clone()),
        }
    };
    let gui_data = || -> Result<FrequencyResponse, ServiceError> {
        let data = nested("gui_data").ok_or_else(unknown)?;
        let data: GuiData = serde_json::from_value(data).map_err(|_| unknown())?;
        Ok(data.into())
    };

    if reply.contains_key("solution") {
        let solution: [f64; 2] = nested("solution")
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(unknown)?;
        let [wc, zeta] = solution;
        return Ok(ServiceReply::Solved {
            resonance: Resonance { wc, zeta },
            response: gui_data()?,
        });
    }
    if reply.contains_key("verification") {
        return Ok(ServiceReply::Verified {
            response: gui_data()?,
        });
    }
    if reply.get("message").and_then(Value::as_str) == Some("Internal server error") {
        return Err(ServiceError::InternalServer);
    }
    Err(unknown())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sweep() -> SweepConfig {
        SweepConfig {
            f0: 5.0,
            f1: 90.0,
            dfdt: 4.0,
            a: 4000.0,
            step_ti: 0.05,
            step_a: 4000.0,
            dly1_ti: 0.5,
            dly2_ti: 1.0,
            dly3_ti: 1.0,
        }
    }

    fn request(metadata: &Metadata) -> SolveRequest {
        let samples = Samples {
            x: vec![1.0, -2.0],
            y: vec![0.5, 0.25],
            z: vec![0.0, 0.0],
        };
        let identity = ServiceConfig {
            org_id: "org".into(),
            access_id: "key".into(),
            machine_id: "m-1".into(),
            machine_name: "bench".into(),
            model_id: "mk4".into(),
            manufacturer_name: "acme".into(),
            conditions: "new belts".into(),
        };
        let time = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        SolveRequest::new(RequestParts {
            axis: Axis::Y,
            operation: Operation::Solve,
            samples: &samples,
            sweep: &sweep(),
            metadata,
            identity: &identity,
            source: "",
            time,
        })
    }

    #[test]
    fn samples_are_little_endian_f32() {
        let encoded = encode_samples(&[1.0, -2.0]);
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(bytes, [0, 0, 128, 63, 0, 0, 0, 192]);
    }

    #[test]
    fn request_document_layout() {
        let body = request(&Metadata::default()).to_body().unwrap();
        let document: String = serde_json::from_str(&body).unwrap();
        let value: Value = serde_json::from_str(&document).unwrap();

        assert_eq!(value["ACTION"], "CALIBRATE");
        assert_eq!(value["AXIS"], "y");
        assert_eq!(value["OPERATION"], "SOLVE");
        assert_eq!(value["METADATA"], "N/A");
        assert_eq!(value["ACCESS"]["CLIENT_ID"], "org");
        assert_eq!(value["ACCESS"]["MACHINE_ID"], "m-1");
        assert_eq!(value["REQUEST"]["REQUEST_TIME"], "07/03/2024_09:05:01");
        assert_eq!(value["REQUEST"]["RequestSource"], UNKNOWN_SOURCE);
        assert_eq!(value["SWEEP_CFG"]["step_ti"], 50.0);
        assert_eq!(value["SWEEP_CFG"]["dly1_ti"], 500.0);
        assert_eq!(value["SWEEP_CFG"]["f1"], 90.0);
        assert_eq!(value["CONDITIONS"], "new belts");
        assert_eq!(value["PRINTER"]["PRINTER_MAKE"], "acme");
        assert_eq!(value["PRINTER"]["PRINTER_MODEL"], "mk4");
        assert_eq!(value["XAXISRESPONSE"], encode_samples(&[1.0, -2.0]));
    }

    #[test]
    fn metadata_is_forwarded_when_present() {
        let mut metadata = Metadata::default();
        metadata.firmware = Some([("FIRMWARE_NAME".to_string(), "Marlin".to_string())].into());
        let value = serde_json::to_value(request(&metadata)).unwrap();
        assert_eq!(value["METADATA"]["FIRMWARE"]["FIRMWARE_NAME"], "Marlin");
    }

    #[test]
    fn parses_solution() {
        let body = r#"{"solution": "[219.9, 0.08]", "gui_data": "{\"bp\": [1.0, 2.0], \"g\": [3.0, 4.0]}"}"#;
        let reply = parse_reply(body).unwrap();
        assert_eq!(
            reply,
            ServiceReply::Solved {
                resonance: Resonance {
                    wc: 219.9,
                    zeta: 0.08
                },
                response: FrequencyResponse::new(vec![1.0, 2.0], vec![3.0, 4.0]),
            }
        );
    }

    #[test]
    fn parses_verification() {
        let body = r#"{"verification": "ok", "gui_data": {"bp": [1.0], "g": [0.5]}}"#;
        assert_eq!(
            parse_reply(body).unwrap(),
            ServiceReply::Verified {
                response: FrequencyResponse::new(vec![1.0], vec![0.5])
            }
        );
    }

    #[test]
    fn maps_service_exceptions() {
        let cases = [
            ("NoSignalError", ServiceError::NoSignal),
            ("SignalSyncError", ServiceError::SignalSync),
            ("NoQualifiedSolution", ServiceError::NoQualifiedSolution),
            ("NoVibrationDetected", ServiceError::NoVibrationDetected),
        ];
        for (name, expected) in cases {
            let body = format!(r#"{{"exception": "{name}"}}"#);
            assert_eq!(parse_reply(&body), Err(expected));
        }
        assert!(matches!(
            parse_reply(r#"{"exception": "Gremlins"}"#),
            Err(ServiceError::UnknownResponse(_))
        ));
    }

    #[test]
    fn internal_error_and_garbage() {
        assert_eq!(
            parse_reply(r#"{"message": "Internal server error"}"#),
            Err(ServiceError::InternalServer)
        );
        assert!(matches!(
            parse_reply(r#"{"message": "hello"}"#),
            Err(ServiceError::UnknownResponse(_))
        ));
        assert!(matches!(
            parse_reply("<html>"),
            Err(ServiceError::UnknownResponse(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"solution": "[1.0]", "gui_data": {"bp": [], "g": []}}"#),
            Err(ServiceError::UnknownResponse(_))
        ));
    }
}
