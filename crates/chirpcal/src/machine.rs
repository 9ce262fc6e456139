//! Connections to the motion firmware.
//!
//! The firmware speaks a line protocol: one [`MachineCommand`] per line out,
//! free-form telemetry lines back. A [`MachineLink`] hides whether those
//! lines travel over a TCP bridge to the serial port or go to an in-process
//! [`SimulatedMachine`].

use crate::config::SimulationConfig;
use chirpcal_core::Axis;
use chirpcal_gcode::MachineCommand;
use std::{
    io,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

/// How often the simulated firmware checks for a finished sweep.
const SIMULATION_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect to the machine at {address}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Firmware stand-in that answers queries from configuration and reports
/// sweep completion once the sweep would have finished.
#[derive(Debug)]
pub struct SimulatedMachine {
    axis_length: f64,
    steps_per_unit: f64,
    speedup: f64,
    position: [f64; 2],
    sweep_deadline: Option<Instant>,
}

impl SimulatedMachine {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            axis_length: config.axis_length,
            steps_per_unit: config.steps_per_unit,
            speedup: config.speedup,
            position: [0.0; 2],
            sweep_deadline: None,
        }
    }

    pub fn position(&self, axis: Axis) -> f64 {
        self.position[axis.index()]
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep_deadline.is_some()
    }

    /// Applies one command and returns the lines the firmware would print.
    pub fn handle(&mut self, command: &MachineCommand, now: Instant) -> Vec<String> {
        let mut out = Vec::new();
        match command {
            MachineCommand::QueryAxisConfig => out.push(format!(
                "echo: M494 FTMCFG X_MAX_LENGTH:{len:.2} Y_MAX_LENGTH:{len:.2}",
                len = self.axis_length
            )),
            MachineCommand::QueryStepsPerUnit => out.push(format!(
                "echo: M92 X{spu:.2} Y{spu:.2} Z400.00 E93.00",
                spu = self.steps_per_unit
            )),
            MachineCommand::QueryPosition => out.push(format!(
                "X:{:.2} Y:{:.2} Z:10.00 E:0.00",
                self.position[0], self.position[1]
            )),
            MachineCommand::QueryFirmware => out.push(
                "FIRMWARE_NAME:Marlin SIMULATED SOURCE_CODE_URL:local PROTOCOL_VERSION:1.0 \
                 MACHINE_TYPE:Simulator EXTRUDER_COUNT:1"
                    .to_string(),
            ),
            MachineCommand::Home { axes } => {
                for letter in axes {
                    match letter {
                        'X' => self.position[0] = 0.0,
                        'Y' => self.position[1] = 0.0,
                        _ => {}
                    }
                }
            }
            MachineCommand::MoveTo { axis, position, .. } => {
                self.position[axis.index()] = *position as f64;
            }
            MachineCommand::StartSweep { sweep, .. } => {
                let secs = sweep.duration() / self.speedup;
                self.sweep_deadline = Some(now + Duration::from_secs_f64(secs.max(0.0)));
            }
            MachineCommand::AbortSweep => self.sweep_deadline = None,
            MachineCommand::DisableShaping { .. }
            | MachineCommand::SetShaper { .. }
            | MachineCommand::SaveSettings => {}
        }
        out.push("ok".to_string());
        out
    }

    /// Lines that become due without a command, i.e. sweep completion.
    pub fn poll(&mut self, now: Instant) -> Vec<String> {
        match self.sweep_deadline {
            Some(deadline) if now >= deadline => {
                self.sweep_deadline = None;
                vec!["echo:M494 profile ran to completion.".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Duplex line channel to the firmware.
pub struct MachineLink {
    pub commands: UnboundedSender<MachineCommand>,
    pub lines: UnboundedReceiver<String>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl MachineLink {
    /// Connects to a TCP bridge that forwards lines to the serial port.
    pub async fn connect(address: &str) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| LinkError::Connect {
                address: address.to_string(),
                source,
            })?;
        tracing::info!(address, "connected to machine");
        let (read, mut write) = stream.into_split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<MachineCommand>();
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("machine closed the connection");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(%err, "failed to read from machine");
                        break;
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let line = format!("{command}\n");
                if let Err(err) = write.write_all(line.as_bytes()).await {
                    tracing::error!(%err, %command, "failed to write to machine");
                    break;
                }
            }
        });

        Ok(Self {
            commands: command_tx,
            lines: line_rx,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Runs `machine` on a background task.
    pub fn simulated(mut machine: SimulatedMachine) -> Self {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<MachineCommand>();
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut poll = tokio::time::interval(SIMULATION_POLL);
            loop {
                let lines = tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(command) => {
                            tracing::debug!(%command, "simulated machine received");
                            machine.handle(&command, Instant::now())
                        }
                        None => break,
                    },
                    _ = poll.tick() => machine.poll(Instant::now()),
                };
                for line in lines {
                    if line_tx.send(line).is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            commands: command_tx,
            lines: line_rx,
            reader: None,
            writer: Some(task),
        }
    }
}

impl MachineLink {
    /// Waits for queued commands to be written, then closes the link.
    ///
    /// Every other sender of the command channel must already be dropped,
    /// otherwise this waits for `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        let reader = self.reader.take();
        let writer = self.writer.take();
        drop(self);
        if let Some(writer) = writer {
            if tokio::time::timeout(timeout, writer).await.is_err() {
                tracing::warn!("machine writer did not drain in time");
            }
        }
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl Drop for MachineLink {
    fn drop(&mut self) {
        for task in [&self.reader, &self.writer].into_iter().flatten() {
            task.abort();
        }
    }
}
