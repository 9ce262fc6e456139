use super::{init_tracing, load_config, open_accelerometer};
use anyhow::{Context, Result, anyhow, bail};
use chirpcal::{
    CommandSink, Config, Session,
    accel::{Channel, SelfTestOutcome},
    analysis::{AnalysisBackend, LocalAnalysis},
    config::AnalysisMode,
    fsm::{Calibrator, ChannelSink, Notice, NoticeLevel, PromptReply},
    machine::{MachineLink, SimulatedMachine},
};
use chirpcal_core::{Analyzer, Axis, CalibrationSolution, Shaper, ShaperKind};
use clap::Args;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    sync::{mpsc::UnboundedReceiver, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

#[derive(Args)]
pub struct CalibrateArgs {
    /// Path to the configuration file (TOML or JSON).
    #[arg(long)]
    pub config: PathBuf,

    /// Axis to calibrate.
    #[arg(long)]
    pub axis: Axis,

    /// Use the simulated machine and accelerometer.
    #[arg(long)]
    pub simulate: bool,

    /// Answer homing prompts with "proceed" instead of asking.
    #[arg(long)]
    pub yes: bool,

    /// Apply the chosen shaper and run a verification sweep.
    #[arg(long)]
    pub apply: bool,

    /// Shaper family to apply.
    #[arg(long, default_value = "zvd")]
    pub shaper: ShaperKind,

    /// Save the applied shaper to the machine's EEPROM.
    #[arg(long, requires = "apply")]
    pub save: bool,

    /// Directory to write the raw recording and the solution into.
    #[arg(long)]
    pub record: Option<PathBuf>,
}

impl CalibrateArgs {
    pub fn run(&self) -> Result<()> {
        init_tracing();
        let config = load_config(&self.config, self.simulate)?;
        let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
        let result = runtime.block_on(self.calibrate(config));
        // an unanswered prompt leaves a blocking stdin read behind
        runtime.shutdown_background();
        result
    }

    async fn calibrate(&self, config: Config) -> Result<()> {
        let backend: Box<dyn AnalysisBackend> = match config.analysis.mode {
            AnalysisMode::Manual => Box::new(LocalAnalysis::new(Analyzer::new(
                config.analysis.analyzer.clone(),
            ))),
            AnalysisMode::Automatic => {
                bail!("automatic analysis needs a solving-service client; use mode = \"manual\"")
            }
        };

        let mut link = if config.simulation.enabled {
            MachineLink::simulated(SimulatedMachine::new(&config.simulation))
        } else {
            MachineLink::connect(&config.machine.address).await?
        };
        let calibrator = Calibrator::new(
            config.fsm.clone(),
            config.calibration.clone(),
            ChannelSink(link.commands.clone()),
            open_accelerometer(&config)?,
            backend,
        );
        let mut session = Session::new(calibrator, config.analysis.vtol);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = cancel_tx.send(true);
            }
        });

        let result = self.drive(&mut session, &mut link, cancel_rx, &config).await;
        drop(session);
        link.shutdown(Duration::from_secs(2)).await;
        result
    }

    async fn drive(
        &self,
        session: &mut Session<ChannelSink>,
        link: &mut MachineLink,
        cancel: watch::Receiver<bool>,
        config: &Config,
    ) -> Result<()> {
        let outcome = session.connect()?;
        report(session);
        if outcome == SelfTestOutcome::Fail {
            bail!("accelerometer self-test failed");
        }

        session.calibrate(self.axis)?;
        self.wait(session, link, cancel.clone(), config).await?;
        let Some((axis, solution)) = session.solution() else {
            bail!("calibration of the {} axis did not produce a result", self.axis);
        };
        let solution = solution.clone();

        if let Some(dir) = &self.record {
            self.record(session, dir, axis, &solution)?;
        }
        let Some(resonance) = solution.resonance else {
            bail!("no resonance was identified on the {axis} axis");
        };
        println!(
            "{axis} axis: resonance {:.2} Hz, damping {:.4}",
            resonance.frequency_hz(),
            resonance.zeta
        );
        for kind in ShaperKind::ALL {
            let shaper = Shaper::new(kind, resonance.zeta, session.vtol());
            println!(
                "  {:<5} cutoff {:>6.2} Hz, {:>6.1} dB at resonance",
                kind.name(),
                shaper.cutoff(resonance.wc) / (2.0 * std::f64::consts::PI),
                shaper.attenuation_db(resonance.wc, resonance.wc)
            );
        }

        if !self.apply {
            return Ok(());
        }
        session.select_shaper(self.shaper)?;
        session.load_calibration()?;
        self.wait(session, link, cancel, config).await?;
        if !session.is_applied(axis) {
            bail!("verification of the {axis} axis failed");
        }
        println!("{} shaper applied to the {axis} axis", self.shaper.name());

        if self.save {
            session.save()?;
            report(session);
        }
        Ok(())
    }

    /// Ticks the session until the current run ends.
    async fn wait(
        &self,
        session: &mut Session<ChannelSink>,
        link: &mut MachineLink,
        mut cancel: watch::Receiver<bool>,
        config: &Config,
    ) -> Result<()> {
        run_until_idle(
            session,
            &mut link.lines,
            &mut cancel,
            config.fsm.tick(),
            self.yes,
            ask,
        )
        .await
    }

    fn record(
        &self,
        session: &Session<ChannelSink>,
        dir: &Path,
        axis: Axis,
        solution: &CalibrationSolution,
    ) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let samples = session.calibrator().accelerometer().samples();
        let raw: Vec<u8> = samples
            .channel(Channel::from(axis))
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect();
        let raw_path = dir.join(format!("sweep_{}.f32", axis.name()));
        fs::write(&raw_path, raw)
            .with_context(|| format!("failed to write {}", raw_path.display()))?;

        let solution_path = dir.join(format!("solution_{}.json", axis.name()));
        let json = serde_json::to_string_pretty(solution)?;
        fs::write(&solution_path, json)
            .with_context(|| format!("failed to write {}", solution_path.display()))?;

        println!(
            "recorded {} samples to {}",
            samples.len(),
            raw_path.display()
        );
        Ok(())
    }
}

/// Prints the notices raised since the last call.
fn report<S: CommandSink>(session: &mut Session<S>) {
    for Notice {
        level,
        title,
        message,
    } in session.take_notices()
    {
        let tag = match level {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "done",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        if message.is_empty() {
            println!("[{tag}] {title}");
        } else {
            println!("[{tag}] {title}: {message}");
        }
    }
}

/// Drives `session` until it goes idle. Operator answers arrive on their
/// own branch so ticking and cancellation continue while a prompt is open.
async fn run_until_idle<S: CommandSink>(
    session: &mut Session<S>,
    lines: &mut UnboundedReceiver<String>,
    cancel: &mut watch::Receiver<bool>,
    tick: Duration,
    yes: bool,
    mut ask: impl FnMut() -> Result<Answer>,
) -> Result<()> {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut answer: Option<Answer> = None;

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick();
                report(session);
                if let Some(prompt) = session.take_prompt() {
                    println!("{}: {}", prompt.title, prompt.message);
                    if yes {
                        session.respond_prompt(PromptReply::Proceed);
                    } else if answer.is_none() {
                        answer = Some(ask()?);
                    }
                }
                if !session.is_busy() {
                    break Ok(());
                }
            }
            joined = async {
                match answer.as_mut() {
                    Some(task) => task.await,
                    None => std::future::pending().await,
                }
            }, if answer.is_some() => {
                answer = None;
                session.respond_prompt(parse_reply(&joined??));
            }
            Some(line) = lines.recv() => session.handle_line(&line),
            Ok(()) = cancel.changed() => {
                if *cancel.borrow() {
                    session.abort();
                    report(session);
                    break Err(anyhow!("interrupted"));
                }
            }
        }
    };
    if let Some(task) = answer {
        task.abort();
    }
    result
}

/// A pending line of operator input.
type Answer = JoinHandle<io::Result<String>>;

fn ask() -> Result<Answer> {
    print!("proceed? [y/N] ");
    std::io::stdout().flush()?;
    Ok(tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    }))
}

fn parse_reply(answer: &str) -> PromptReply {
    match answer.trim() {
        "y" | "Y" | "yes" => PromptReply::Proceed,
        _ => PromptReply::Cancel,
    }
}
