use anyhow::{Context, Result, bail};
use chirpcal::{Config, analysis::CalibrationError};
use chirpcal_core::{Analyzer, CalibrationSolution};
use clap::Args;
use std::{fs, path::PathBuf};

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to the configuration file (TOML or JSON).
    #[arg(long)]
    pub config: PathBuf,

    /// Recorded axis channel as little-endian f32 samples in mm/s².
    #[arg(long)]
    pub input: PathBuf,

    /// Steps per unit of the recorded axis, used to rebuild the sweep.
    #[arg(long)]
    pub steps_per_unit: f64,

    /// Override the identified peak frequency in Hz.
    #[arg(long)]
    pub peak_frequency: Option<f64>,

    /// Override the identified damping ratio.
    #[arg(long)]
    pub damping: Option<f64>,

    /// Print the full solution as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Damping assumed when a peak is picked by hand on an unresolved response.
const DEFAULT_DAMPING: f64 = 0.1;

impl AnalyzeArgs {
    pub fn run(&self) -> Result<()> {
        super::init_tracing();
        let config = Config::from_file(&self.config)?;
        config.validate()?;

        let bytes = fs::read(&self.input)
            .with_context(|| format!("failed to read {}", self.input.display()))?;
        if bytes.len() % 4 != 0 {
            bail!(
                "{} is not a sequence of f32 samples ({} bytes)",
                self.input.display(),
                bytes.len()
            );
        }
        let samples: Vec<f64> = bytes
            .chunks_exact(4)
            .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect();

        let sweep = config.calibration.sweep(self.steps_per_unit);
        let period = config.accelerometer.rate.sample_period();
        tracing::info!(samples = samples.len(), ?sweep, "analyzing recording");

        let analyzer = Analyzer::new(config.analysis.analyzer.clone());
        let mut solution = match analyzer.analyze(&samples, &sweep, period) {
            Ok(analysis) => {
                println!(
                    "trimmed {}..{} of {} samples, signal ratio {:.3}",
                    analysis.trimmed.start,
                    analysis.trimmed.end,
                    samples.len(),
                    analysis.signal_ratio
                );
                analysis.solution
            }
            Err(err) if self.peak_frequency.is_some() => {
                tracing::warn!(%err, "resonance not identified, using the given peak");
                let response = analyzer
                    .response(&samples, &sweep, period)
                    .map_err(CalibrationError::from)
                    .map_err(explain)?;
                CalibrationSolution::unresolved(response)
            }
            Err(err) => return Err(explain(err.into())),
        };

        if let Some(frequency) = self.peak_frequency {
            solution.set_peak_frequency(frequency, DEFAULT_DAMPING);
        }
        if let Some(damping) = self.damping {
            solution.set_damping(damping);
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&solution)?);
        } else if let Some(resonance) = solution.resonance {
            println!(
                "resonance {:.2} Hz, damping {:.4}",
                resonance.frequency_hz(),
                resonance.zeta
            );
        } else {
            println!("no resonance identified");
        }
        Ok(())
    }
}

fn explain(err: CalibrationError) -> anyhow::Error {
    let kind = err.kind();
    anyhow::Error::new(err).context(format!("{} {}", kind.title(), kind.message()))
}
