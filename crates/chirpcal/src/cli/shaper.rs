use anyhow::{Result, bail};
use chirpcal_core::{Shaper, ShaperKind, shaper::MIN_EI2H_VTOL};
use clap::Args;
use std::f64::consts::PI;

#[derive(Args)]
pub struct ShaperArgs {
    /// Shaper family.
    #[arg(long)]
    pub kind: ShaperKind,

    /// Resonance frequency in Hz.
    #[arg(long)]
    pub frequency: f64,

    /// Damping ratio of the resonance.
    #[arg(long)]
    pub damping: f64,

    /// Vibration tolerance for the EI families.
    #[arg(long, default_value_t = 0.05)]
    pub vtol: f64,

    /// Highest frequency to tabulate, in Hz.
    #[arg(long, default_value_t = 150.0)]
    pub max_frequency: f64,

    /// Tabulation step in Hz.
    #[arg(long, default_value_t = 5.0)]
    pub step: f64,
}

impl ShaperArgs {
    pub fn run(&self) -> Result<()> {
        if !(self.frequency > 0.0) {
            bail!("--frequency must be positive");
        }
        if !(0.0..1.0).contains(&self.damping) {
            bail!("--damping must be in [0, 1)");
        }
        if !(self.step > 0.0) {
            bail!("--step must be positive");
        }
        let vtol = if self.kind == ShaperKind::Ei2h {
            self.vtol.max(MIN_EI2H_VTOL)
        } else {
            self.vtol
        };

        let shaper = Shaper::new(self.kind, self.damping, vtol);
        let wc = 2.0 * PI * self.frequency;
        println!(
            "{} at {:.2} Hz, damping {:.4}, cutoff {:.2} Hz",
            self.kind.name(),
            self.frequency,
            self.damping,
            shaper.cutoff(wc) / (2.0 * PI)
        );
        let times = shaper.impulse_times(wc);
        for (t, a) in times.iter().zip(shaper.amplitudes()) {
            println!("  impulse {:>8.5} s  {a:.4}", t);
        }
        println!("{:>8}  {:>8}  {:>8}", "Hz", "gain", "dB");
        let mut f = self.step;
        while f <= self.max_frequency {
            let w = 2.0 * PI * f;
            println!(
                "{f:>8.1}  {:>8.4}  {:>8.2}",
                shaper.magnitude(w, wc),
                shaper.attenuation_db(w, wc)
            );
            f += self.step;
        }
        Ok(())
    }
}
