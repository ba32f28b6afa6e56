//! monitor.rs
//! The driver: one iteration per call to [`Monitor::step_at`].
//!
//! Each iteration polls the external trigger, drains operator commands, and,
//! once per sample period while polling is on, samples the store, appends a
//! row to the log and runs one feedback tick. Nothing that goes wrong in an
//! iteration stops the loop: feedback faults switch feedback off, log faults
//! switch logging off.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crossbeam::channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::component_a::{
    history::{HistoryStore, unix_now},
    sensor::{Signal, SignalSource},
};
use crate::component_b::{
    actuator::ActuatorSink,
    controller::{FeedbackController, actuation_interval_for},
    feedback::TickOutcome,
};
use crate::error::{ConfigError, FeedbackError};
use crate::utils::{
    config::MonitorConfig,
    export::{LogRow, RowLogger, open_or_warn},
    trigger::{SentinelFileTrigger, Trigger},
};

/// Longest idle sleep between iterations of [`Monitor::run`].
const MAX_IDLE: Duration = Duration::from_millis(20);

/// Operator requests, applied at the start of the next iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TogglePolling,
    ToggleFeedback,
    Reset,
    SetBacklog(f64),
    SetFrequency(f64),
    SetSensitivity(u32),
    SetFilter(u32),
    SetTarget(Signal, f64),
    SetLogging(bool),
    Shutdown,
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Polling is off.
    Paused,
    /// Not yet a full sample period since the last sample.
    Waiting,
    Sampled(TickOutcome),
    /// Sampled, and the feedback tick switched feedback off.
    Tripped(FeedbackError),
}

pub struct Monitor<S: SignalSource, A: ActuatorSink> {
    store: HistoryStore<S>,
    controller: FeedbackController<A>,
    trigger: Option<Box<dyn Trigger + Send>>,
    logger: Option<RowLogger>,
    log_path: Option<PathBuf>,
    /// Actuation interval follows the filter strength unless configured.
    auto_interval: bool,
    commands: Receiver<Command>,
    sender: Sender<Command>,
    polling: bool,
    heartbeat: f64,
    last_summary: f64,
    samples: u64,
    shutdown: bool,
}

impl<S: SignalSource, A: ActuatorSink> Monitor<S, A> {
    /// Builds the store and controller from `config`. Polling starts off.
    ///
    /// A sentinel-file trigger is installed if `config.trigger_file` is set,
    /// and the row log is opened if `config.log_path` is set.
    pub fn new(source: S, actuator: A, config: &MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = HistoryStore::new(source, &config.history())?;
        let controller = FeedbackController::new(actuator, config.controller())?;
        let trigger = config
            .trigger_file
            .as_ref()
            .map(|p| Box::new(SentinelFileTrigger::new(p)) as Box<dyn Trigger + Send>);
        let logger = config.log_path.as_deref().and_then(open_or_warn);
        let (sender, commands) = unbounded();

        Ok(Self {
            store,
            controller,
            trigger,
            logger,
            log_path: config.log_path.clone(),
            auto_interval: config.actuation_interval.is_none(),
            commands,
            sender,
            polling: false,
            heartbeat: f64::NEG_INFINITY,
            last_summary: f64::NEG_INFINITY,
            samples: 0,
            shutdown: false,
        })
    }

    /// Replaces the trigger (or removes it with `None`).
    pub fn with_trigger(mut self, trigger: Option<Box<dyn Trigger + Send>>) -> Self {
        self.trigger = trigger;
        self
    }

    /// A handle for queueing commands from another thread.
    pub fn commands(&self) -> Sender<Command> {
        self.sender.clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn start_polling(&mut self) {
        if self.polling {
            return;
        }
        self.polling = true;
        self.heartbeat = f64::NEG_INFINITY;
        info!("[Monitor] polling started at {:.2} Hz", self.store.frequency());
    }

    /// Stopping polling also stops feedback.
    pub fn stop_polling(&mut self) {
        if !self.polling {
            return;
        }
        self.controller.disable(&mut self.store);
        self.polling = false;
        info!("[Monitor] polling stopped after {} samples", self.samples);
    }

    /// Refused while polling is off.
    pub fn enable_feedback(&mut self) -> Result<(), FeedbackError> {
        if !self.polling {
            warn!("[Monitor] feedback needs polling; request ignored");
            return Ok(());
        }
        self.controller.enable(&mut self.store)
    }

    pub fn disable_feedback(&mut self) {
        self.controller.disable(&mut self.store);
    }

    pub fn toggle_feedback(&mut self) {
        if self.controller.is_enabled() {
            self.disable_feedback();
        } else if let Err(e) = self.enable_feedback() {
            error!("[Monitor] feedback not started: {}", e);
        }
    }

    pub fn set_logging(&mut self, enabled: bool) {
        match (enabled, self.logger.is_some()) {
            (true, false) => match &self.log_path {
                Some(path) => self.logger = open_or_warn(path),
                None => warn!("[Monitor] no log path configured"),
            },
            (false, true) => {
                self.logger = None;
                info!("[Monitor] logging stopped");
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    pub fn step(&mut self) -> Step {
        self.step_at(unix_now())
    }

    pub fn step_at(&mut self, now: f64) -> Step {
        if self.trigger.as_mut().is_some_and(|t| t.poll()) {
            info!("[Monitor] trigger: toggling feedback");
            self.toggle_feedback();
        }

        self.drain_commands(now);

        if !(now - self.heartbeat > self.store.sample_period()) {
            return Step::Waiting;
        }
        if !self.polling {
            self.controller.disable(&mut self.store);
            return Step::Paused;
        }
        self.heartbeat = now;

        self.store.sample_at(now);
        self.samples += 1;
        self.write_row();
        self.log_summary(now);

        match self.controller.tick(&mut self.store) {
            Ok(outcome) => Step::Sampled(outcome),
            Err(e) => {
                error!("[Monitor] feedback stopped: {}", e);
                Step::Tripped(e)
            }
        }
    }

    /// Loops [`step`](Self::step) until `running` is cleared or a
    /// [`Command::Shutdown`] is received.
    pub fn run(&mut self, running: &AtomicBool) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        info!("[Monitor] running");

        while running.load(Ordering::Acquire) && !self.shutdown {
            let now = unix_now();
            self.step_at(now);

            let until_next = self.heartbeat + self.store.sample_period() - unix_now();
            let idle = if self.polling && until_next.is_finite() && until_next > 0.0 {
                Duration::from_secs_f64(until_next).min(MAX_IDLE)
            } else if self.polling {
                Duration::ZERO
            } else {
                MAX_IDLE
            };
            if !idle.is_zero() {
                sleeper.sleep(idle);
            }
        }

        self.stop_polling();
        info!("[Monitor] stopped");
    }

    fn drain_commands(&mut self, now: f64) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.apply(cmd, now),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply(&mut self, cmd: Command, now: f64) {
        info!("[Monitor] command {:?}", cmd);
        match cmd {
            Command::TogglePolling => {
                if self.polling {
                    self.stop_polling();
                } else {
                    self.start_polling();
                }
            }
            Command::ToggleFeedback => self.toggle_feedback(),
            Command::Reset => {
                self.store.reset_at(now);
            }
            Command::SetBacklog(seconds) => {
                if let Err(e) = self.store.change_backlog(seconds) {
                    error!("[Monitor] backlog unchanged: {}", e);
                }
            }
            Command::SetFrequency(hz) => {
                if let Err(e) = self.store.change_frequency(hz) {
                    error!("[Monitor] frequency unchanged: {}", e);
                }
            }
            Command::SetSensitivity(value) => self.store.set_sensitivity(value),
            Command::SetFilter(strength) => {
                self.store.set_filter_strength(strength);
                if self.auto_interval {
                    self.controller
                        .set_actuation_interval(actuation_interval_for(self.store.filter().strength()));
                }
            }
            Command::SetTarget(signal, value) => {
                if let Err(e) = self.store.set_target(signal, value) {
                    error!("[Monitor] target unchanged: {}", e);
                }
            }
            Command::SetLogging(enabled) => self.set_logging(enabled),
            Command::Shutdown => {
                self.shutdown = true;
                self.stop_polling();
            }
        }
    }

    fn write_row(&mut self) {
        let Some(logger) = self.logger.as_mut() else {
            return;
        };
        if let Err(e) = logger.append(&LogRow::latest(&self.store)) {
            error!("[Monitor] logging to {} stopped: {}", logger.path().display(), e);
            self.logger = None;
        }
    }

    fn log_summary(&mut self, now: f64) {
        if now - self.last_summary < self.store.backlog_seconds() {
            return;
        }
        if self.last_summary.is_finite() {
            for signal in [self.controller.config().axis, Signal::AvgCurrent] {
                if let Some(s) = self.store.summary(signal) {
                    info!(
                        "[Monitor] {} over {:.0} s: mean={:.6e} sd={:.3e} min={:.6e} max={:.6e} (n={})",
                        signal.name(),
                        self.store.backlog_seconds(),
                        s.mean,
                        s.std_dev,
                        s.min,
                        s.max,
                        s.count
                    );
                }
            }
        }
        self.last_summary = now;
    }

    // ------------------------------------------------------------------
    // Readout
    // ------------------------------------------------------------------

    pub fn store(&self) -> &HistoryStore<S> {
        &self.store
    }

    pub fn controller(&self) -> &FeedbackController<A> {
        &self.controller
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn feedback_enabled(&self) -> bool {
        self.controller.is_enabled()
    }

    pub fn is_logging(&self) -> bool {
        self.logger.is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}
