use anyhow::Result;
use chirpcal::{
    Config,
    accel::{AccelError, Accelerometer, Adxl345, PigpioBus, SimulatedAccelerometer},
    session,
};
use tracing_subscriber::EnvFilter;

pub mod analyze;
pub mod calibrate;
pub mod self_test;
pub mod shaper;

/// Logs go to stderr so command output stays pipeable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &std::path::Path, simulate: bool) -> Result<Config> {
    let mut config = Config::from_file(path)?;
    config.validate()?;
    if simulate {
        config.simulation.enabled = true;
    }
    tracing::info!(
        config = %path.display(),
        simulate = config.simulation.enabled,
        "configuration loaded"
    );
    Ok(config)
}

fn open_accelerometer(config: &Config) -> Result<Box<dyn Accelerometer>> {
    if config.simulation.enabled {
        return Ok(Box::new(SimulatedAccelerometer::new(
            &config.accelerometer,
            &config.simulation,
        )));
    }
    let accel = &config.accelerometer;
    let bus = PigpioBus::open(&accel.pigpio_address, accel.spi_channel, accel.spi_baud)
        .map_err(|err| {
            let notice = session::bring_up_notice(&AccelError::from(err));
            anyhow::anyhow!("{}: {}", notice.title, notice.message)
        })?;
    Ok(Box::new(Adxl345::new(bus, accel)))
}
