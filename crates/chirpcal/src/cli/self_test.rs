use super::{init_tracing, load_config, open_accelerometer};
use anyhow::{Result, bail};
use chirpcal::accel::SelfTestOutcome;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct SelfTestArgs {
    /// Path to the configuration file (TOML or JSON).
    #[arg(long)]
    pub config: PathBuf,

    /// Test the simulated accelerometer instead of the hardware.
    #[arg(long)]
    pub simulate: bool,
}

impl SelfTestArgs {
    pub fn run(&self) -> Result<()> {
        init_tracing();
        let config = load_config(&self.config, self.simulate)?;
        let mut accelerometer = open_accelerometer(&config)?;

        match accelerometer.self_test()? {
            SelfTestOutcome::Pass => {
                println!("accelerometer self-test passed");
                Ok(())
            }
            SelfTestOutcome::Fail => bail!("accelerometer self-test failed, try another device"),
        }
    }
}
