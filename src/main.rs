//! # QBPM Feedback Monitor Entry Point
//!
//! Polls a beam position monitor, logs every sample and, with feedback on,
//! keeps the vertical beam position on target by correcting the crystal pitch.
//!
//! Hardware access lives behind `SignalSource` / `ActuatorSink`. No hardware
//! adapter is built in, so this binary only runs with `--simulate`, driving the
//! simulated beamline, optionally with a slow vertical drift for the feedback
//! loop to chase.
//!
//! Feedback can be toggled at runtime by creating the trigger file
//! (`/tmp/qbpmfeedback.run` by default).

use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use log::{error, info};

use qbpm_feedback::{
    advanced::simulation::SimBeamline,
    component_a::sensor::Signal,
    monitor::{Command, Monitor},
    utils::config::MonitorConfig,
};

#[derive(Parser)]
#[command(name = "qbpm_monitor")]
#[command(about = "Beam position monitor with crystal pitch feedback", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run against the simulated beamline (required; no hardware adapter is built in)
    #[arg(long)]
    simulate: bool,
    /// Stop after this many seconds (runs until killed otherwise)
    #[arg(short, long)]
    duration: Option<f64>,
    /// Switch feedback on as soon as the first samples are in
    #[arg(long)]
    feedback: bool,
    /// Row log path, overriding the configuration
    #[arg(short, long)]
    log: Option<PathBuf>,
    /// Vertical drift of the simulated beam, in position units per second
    #[arg(long, default_value_t = 0.0)]
    drift_rate: f64,
    /// Amplitude of the simulated position noise
    #[arg(long, default_value_t = 0.0)]
    noise: f64,
    /// Seed of the simulated noise
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    if !cli.simulate {
        error!("no hardware adapter built in; run with --simulate");
        return ExitCode::FAILURE;
    }
    info!("=== QBPM MONITOR START ===");

    let mut config = match &cli.config {
        Some(path) => match MonitorConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => MonitorConfig::default(),
    };
    if let Some(path) = cli.log {
        config.log_path = Some(path);
    }

    let sim = SimBeamline::new(cli.seed).with_noise(cli.noise);
    let mut monitor = match Monitor::new(sim.qbpm(), sim.pitch_motor(), &config) {
        Ok(m) => m,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let commands = monitor.commands();

    let drift_handle = (cli.drift_rate != 0.0).then(|| {
        let sim = sim.clone();
        let running = running.clone();
        let rate = cli.drift_rate;
        thread::spawn(move || {
            let start = Instant::now();
            while running.load(Ordering::Acquire) {
                sim.set_drift(rate * start.elapsed().as_secs_f64());
                thread::sleep(Duration::from_millis(100));
            }
        })
    });

    let timer_handle = cli.duration.filter(|d| d.is_finite() && *d > 0.0).map(|secs| {
        let commands = commands.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(secs));
            info!("duration of {:.1} s reached", secs);
            let _ = commands.send(Command::Shutdown);
        })
    });

    let _ = commands.send(Command::TogglePolling);
    if cli.feedback {
        // let the filter see a few samples before locking the target
        let commands = commands.clone();
        let delay = 3.0 / config.frequency_hz.min(config.max_frequency_hz);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(delay));
            let _ = commands.send(Command::ToggleFeedback);
        });
    }

    monitor.run(&running);
    running.store(false, Ordering::Release);

    if let Some(h) = drift_handle {
        let _ = h.join();
    }
    if let Some(h) = timer_handle {
        let _ = h.join();
    }

    let store = monitor.store();
    info!(
        "samples={} moves={} pitch={:.9} {}={:.6} target={:.6}",
        monitor.samples(),
        monitor.controller().moves(),
        sim.pitch(),
        Signal::PosV.name(),
        store.latest_filtered(Signal::PosV).unwrap_or(f64::NAN),
        store.target(Signal::PosV).unwrap_or(f64::NAN),
    );
    info!("=== QBPM MONITOR FINISHED ===");
    ExitCode::SUCCESS
}
