use anyhow::{Context, Result};
use chirpcal_core::{AnalyzerConfig, SweepConfig, shaper::MIN_EI2H_VTOL};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::accel::{AccelRange, AccelRate};

/// Main configuration for a calibration run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sweep excitation settings
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// State machine timing and retry policy
    #[serde(default)]
    pub fsm: FsmConfig,

    /// Sensor settings
    #[serde(default)]
    pub accelerometer: AccelerometerConfig,

    /// Simulated machine and sensor
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Analysis back-end and its tunables
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Connection to the firmware's line bridge
    #[serde(default)]
    pub machine: MachineConfig,

    /// Identity forwarded to the remote solving service
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Sweep settings. Times are in milliseconds as the firmware expects them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Home the axis and move it to its centre before sweeping
    #[serde(default = "default_true")]
    pub home_axis_before_calibration: bool,

    /// Chirp acceleration amplitude in mm/s²
    #[serde(default = "default_acceleration")]
    pub acceleration_amplitude: f64,

    /// Chirp start frequency in Hz
    #[serde(default = "default_starting_frequency")]
    pub starting_frequency: f64,

    /// Chirp sweep rate in Hz/s
    #[serde(default = "default_sweep_rate")]
    pub frequency_sweep_rate: f64,

    /// Lower the end frequency below the axis' mechanical limit
    pub end_frequency_override: Option<f64>,

    #[serde(default = "default_step_time_ms")]
    pub step_time_ms: f64,

    #[serde(default = "default_acceleration")]
    pub step_acceleration: f64,

    #[serde(default = "default_delay1_ms")]
    pub delay1_ms: f64,

    #[serde(default = "default_delay_ms")]
    pub delay2_ms: f64,

    #[serde(default = "default_delay_ms")]
    pub delay3_ms: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            home_axis_before_calibration: true,
            acceleration_amplitude: default_acceleration(),
            starting_frequency: default_starting_frequency(),
            frequency_sweep_rate: default_sweep_rate(),
            end_frequency_override: None,
            step_time_ms: default_step_time_ms(),
            step_acceleration: default_acceleration(),
            delay1_ms: default_delay1_ms(),
            delay2_ms: default_delay_ms(),
            delay3_ms: default_delay_ms(),
        }
    }
}

impl CalibrationConfig {
    /// Sweep for an axis with the given steps-per-unit. The end frequency is
    /// the highest one the axis can follow at the configured amplitude.
    pub fn sweep(&self, steps_per_unit: f64) -> SweepConfig {
        let a = self.acceleration_amplitude;
        let mut f1 = SweepConfig::max_end_frequency(a, steps_per_unit);
        if let Some(limit) = self.end_frequency_override {
            f1 = f1.min(limit);
        }
        SweepConfig {
            f0: self.starting_frequency,
            f1,
            dfdt: self.frequency_sweep_rate,
            a,
            step_ti: self.step_time_ms / 1000.0,
            step_a: self.step_acceleration,
            dly1_ti: self.delay1_ms / 1000.0,
            dly2_ti: self.delay2_ms / 1000.0,
            dly3_ti: self.delay3_ms / 1000.0,
        }
    }
}

/// State machine timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: f64,

    /// Settle time between starting acquisition and starting the sweep
    #[serde(default = "default_sweep_start_delay_secs")]
    pub sweep_start_delay_secs: f64,

    /// Overrun retries before a run is aborted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_axis_info_timeout_secs")]
    pub axis_info_timeout_secs: f64,

    /// Axis-info timeout after the operator had to approve extra homing
    #[serde(default = "default_homing_axis_info_timeout_secs")]
    pub homing_axis_info_timeout_secs: f64,

    #[serde(default = "default_center_timeout_secs")]
    pub center_timeout_secs: f64,

    /// Feed rate for the centring move in mm/min
    #[serde(default = "default_center_feed_rate")]
    pub center_feed_rate: u32,

    /// Stop acquisition after this long instead of waiting for the firmware
    pub simulated_sweep_secs: Option<f64>,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            sweep_start_delay_secs: default_sweep_start_delay_secs(),
            max_retries: default_max_retries(),
            axis_info_timeout_secs: default_axis_info_timeout_secs(),
            homing_axis_info_timeout_secs: default_homing_axis_info_timeout_secs(),
            center_timeout_secs: default_center_timeout_secs(),
            center_feed_rate: default_center_feed_rate(),
            simulated_sweep_secs: None,
        }
    }
}

impl FsmConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs_f64(self.tick_secs)
    }
}

/// Sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelerometerConfig {
    #[serde(default)]
    pub range: AccelRange,

    #[serde(default)]
    pub rate: AccelRate,

    /// Length of each self-test collection window
    #[serde(default = "default_self_test_window_ms")]
    pub self_test_window_ms: u64,

    /// Wait after enabling measurement before draining the FIFO
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Consecutive empty FIFO reads tolerated before the link counts as lost
    #[serde(default = "default_zero_fifo_limit")]
    pub zero_fifo_limit: u32,

    /// Down-sampled points kept for the live view
    #[serde(default = "default_live_view_samples")]
    pub live_view_samples: usize,

    /// Address of the pigpio daemon's socket interface
    #[serde(default = "default_pigpio_address")]
    pub pigpio_address: String,

    #[serde(default)]
    pub spi_channel: u32,

    #[serde(default = "default_spi_baud")]
    pub spi_baud: u32,
}

impl Default for AccelerometerConfig {
    fn default() -> Self {
        Self {
            range: AccelRange::default(),
            rate: AccelRate::default(),
            self_test_window_ms: default_self_test_window_ms(),
            settle_ms: default_settle_ms(),
            zero_fifo_limit: default_zero_fifo_limit(),
            live_view_samples: default_live_view_samples(),
            pigpio_address: default_pigpio_address(),
            spi_channel: 0,
            spi_baud: default_spi_baud(),
        }
    }
}

/// Simulated machine and sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Simulated time advances this many times faster than wall time
    #[serde(default = "default_speedup")]
    pub speedup: f64,

    #[serde(default = "default_resonance_hz")]
    pub resonance_hz: f64,

    #[serde(default = "default_damping")]
    pub damping: f64,

    /// Reported travel of each axis in mm
    #[serde(default = "default_axis_length")]
    pub axis_length: f64,

    #[serde(default = "default_steps_per_unit")]
    pub steps_per_unit: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            speedup: default_speedup(),
            resonance_hz: default_resonance_hz(),
            damping: default_damping(),
            axis_length: default_axis_length(),
            steps_per_unit: default_steps_per_unit(),
        }
    }
}

/// Where the recorded sweep gets solved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Local analyzer with manual peak adjustment
    #[default]
    Manual,
    /// Remote solving service
    Automatic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub mode: AnalysisMode,

    /// Vibration tolerance for the extra-insensitive shapers
    #[serde(default = "default_vtol")]
    pub vtol: f64,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::default(),
            vtol: default_vtol(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Line-oriented TCP bridge to the firmware's serial port
    #[serde(default = "default_machine_address")]
    pub address: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            address: default_machine_address(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub access_id: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub machine_name: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub manufacturer_name: String,
    /// Free-form notes about the machine's state, e.g. belt tension
    #[serde(default)]
    pub conditions: String,
}

fn default_true() -> bool {
    true
}

fn default_acceleration() -> f64 {
    4000.0
}

fn default_starting_frequency() -> f64 {
    5.0
}

fn default_sweep_rate() -> f64 {
    4.0
}

fn default_step_time_ms() -> f64 {
    50.0
}

fn default_delay1_ms() -> f64 {
    500.0
}

fn default_delay_ms() -> f64 {
    1000.0
}

fn default_tick_secs() -> f64 {
    0.25
}

fn default_sweep_start_delay_secs() -> f64 {
    0.5
}

fn default_max_retries() -> u32 {
    2
}

fn default_axis_info_timeout_secs() -> f64 {
    10.0
}

fn default_homing_axis_info_timeout_secs() -> f64 {
    45.0
}

fn default_center_timeout_secs() -> f64 {
    12.0
}

fn default_center_feed_rate() -> u32 {
    chirpcal_gcode::DEFAULT_FEED_RATE
}

fn default_self_test_window_ms() -> u64 {
    250
}

fn default_settle_ms() -> u64 {
    100
}

fn default_zero_fifo_limit() -> u32 {
    25
}

fn default_live_view_samples() -> usize {
    200
}

fn default_pigpio_address() -> String {
    "127.0.0.1:8888".to_string()
}

fn default_spi_baud() -> u32 {
    4_000_000
}

fn default_speedup() -> f64 {
    20.0
}

fn default_resonance_hz() -> f64 {
    35.0
}

fn default_damping() -> f64 {
    0.1
}

fn default_axis_length() -> f64 {
    255.0
}

fn default_steps_per_unit() -> f64 {
    80.0
}

fn default_vtol() -> f64 {
    0.05
}

fn default_machine_address() -> String {
    "127.0.0.1:8250".to_string()
}

impl Config {
    /// Load configuration from a file, auto-detecting TOML or JSON format
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content).or_else(|_| Self::from_json(&content)),
        }
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config as TOML")
    }

    /// Parse configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("failed to parse config as JSON")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let cal = &self.calibration;
        if !(cal.acceleration_amplitude > 0.0) {
            anyhow::bail!("calibration.acceleration_amplitude must be positive");
        }
        if !(cal.starting_frequency > 1.0) {
            anyhow::bail!("calibration.starting_frequency must be above 1 Hz");
        }
        if !(cal.frequency_sweep_rate > 0.0) {
            anyhow::bail!("calibration.frequency_sweep_rate must be positive");
        }
        if let Some(limit) = cal.end_frequency_override {
            if limit <= cal.starting_frequency {
                anyhow::bail!("calibration.end_frequency_override must exceed the starting frequency");
            }
        }
        if [cal.step_time_ms, cal.delay1_ms, cal.delay2_ms, cal.delay3_ms]
            .iter()
            .any(|&ms| ms < 0.0)
        {
            anyhow::bail!("calibration step and delay times cannot be negative");
        }

        if !(self.fsm.tick_secs > 0.0) {
            anyhow::bail!("fsm.tick_secs must be positive");
        }
        if self.fsm.center_feed_rate == 0 {
            anyhow::bail!("fsm.center_feed_rate cannot be zero");
        }

        if self.accelerometer.live_view_samples == 0 {
            anyhow::bail!("accelerometer.live_view_samples cannot be zero");
        }

        if self.simulation.enabled {
            if !(self.simulation.speedup > 0.0) {
                anyhow::bail!("simulation.speedup must be positive");
            }
            if !(self.simulation.damping > 0.0 && self.simulation.damping < 1.0) {
                anyhow::bail!("simulation.damping must be within (0, 1)");
            }
        }

        let vtol = self.analysis.vtol;
        if !(MIN_EI2H_VTOL..1.0).contains(&vtol) {
            anyhow::bail!("analysis.vtol must be within [{MIN_EI2H_VTOL}, 1)");
        }

        if self.analysis.mode == AnalysisMode::Automatic && self.service.machine_id.is_empty() {
            anyhow::bail!("service.machine_id is required in automatic mode");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[calibration]
home_axis_before_calibration = false
starting_frequency = 10
end_frequency_override = 60

[fsm]
max_retries = 3

[accelerometer]
range = "8g"
rate = 3200

[analysis]
mode = "automatic"

[analysis.analyzer]
min_inliers = 12

[service]
machine_id = "m-1"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert!(!config.calibration.home_axis_before_calibration);
        assert_eq!(config.calibration.starting_frequency, 10.0);
        assert_eq!(config.fsm.max_retries, 3);
        assert_eq!(config.accelerometer.range, AccelRange::G8);
        assert_eq!(config.accelerometer.rate, AccelRate::Hz3200);
        assert_eq!(config.analysis.mode, AnalysisMode::Automatic);
        assert_eq!(config.analysis.analyzer.min_inliers, 12);
        assert_eq!(config.analysis.analyzer.ransac_iterations, 200);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "calibration": { "acceleration_amplitude": 2000 },
            "simulation": { "enabled": true, "speedup": 50 },
            "machine": { "address": "10.0.0.2:9000" }
        }"#;

        let config = Config::from_json(json).unwrap();
        assert_eq!(config.calibration.acceleration_amplitude, 2000.0);
        assert!(config.simulation.enabled);
        assert_eq!(config.simulation.speedup, 50.0);
        assert_eq!(config.machine.address, "10.0.0.2:9000");
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.calibration.home_axis_before_calibration);
        assert_eq!(config.calibration.acceleration_amplitude, 4000.0);
        assert_eq!(config.fsm.tick_secs, 0.25);
        assert_eq!(config.fsm.max_retries, 2);
        assert_eq!(config.fsm.center_feed_rate, 6000);
        assert_eq!(config.accelerometer.rate, AccelRate::Hz1600);
        assert_eq!(config.accelerometer.pigpio_address, "127.0.0.1:8888");
        assert_eq!(config.analysis.mode, AnalysisMode::Manual);
        assert_eq!(config.analysis.vtol, 0.05);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.analysis.vtol = 0.001;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.mode = AnalysisMode::Automatic;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.calibration.end_frequency_override = Some(3.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sweep_from_calibration() {
        let mut cal = CalibrationConfig::default();
        let sweep = cal.sweep(80.0);
        assert_eq!(sweep.f1, 90.0);
        assert_eq!(sweep.step_ti, 0.05);
        assert_eq!(sweep.dly2_ti, 1.0);

        cal.end_frequency_override = Some(60.0);
        assert_eq!(cal.sweep(80.0).f1, 60.0);
    }

    #[test]
    fn test_from_file_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"fsm": {{"tick_secs": 0.1}}}}"#).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.fsm.tick_secs, 0.1);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[fsm]\ntick_secs = 0.5\n").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.fsm.tick_secs, 0.5);
    }
}
