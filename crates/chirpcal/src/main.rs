use anyhow::Result;
use clap::{Parser, Subcommand};

mod cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Calibrate(args) => args.run(),
        Command::SelfTest(args) => args.run(),
        Command::Analyze(args) => args.run(),
        Command::Shaper(args) => args.run(),
    }
}

#[derive(Parser)]
#[command(name = "chirpcal", about = "Resonance calibration for input shaping")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep an axis, identify its resonance and optionally apply a shaper.
    Calibrate(cli::calibrate::CalibrateArgs),
    /// Run the accelerometer's built-in self-test.
    SelfTest(cli::self_test::SelfTestArgs),
    /// Analyze a recorded sweep offline.
    Analyze(cli::analyze::AnalyzeArgs),
    /// Tabulate the frequency response of an input shaper.
    Shaper(cli::shaper::ShaperArgs),
}
