//! controller.rs
//! Closed-loop pitch correction driven by the smoothed beam position.
//!
//! Each tick compares the newest filtered value of the controlled axis with its
//! target. Outside the dead band a proportional correction is computed,
//! converted from a linear offset at the monitor to an angle at the crystal via
//! the lever distance. Moves are decimated: only every `actuation_interval`-th
//! tick may command the motor, so noise on single samples never drives it.
//!
//! Any refusal (too little intensity) or actuator failure switches the loop off.

use log::{debug, error, info, warn};

use crate::component_a::history::HistoryStore;
use crate::component_a::processor::DEFAULT_FILTER_STRENGTH;
use crate::component_a::sensor::{Signal, SignalSource};
use crate::component_b::actuator::{ActuatorSink, move_relative};
use crate::component_b::feedback::TickOutcome;
use crate::error::{ConfigError, FeedbackError};

pub const DEFAULT_CORRECTION_GAIN: f64 = 0.2;
/// Metres between crystal and position monitor.
pub const DEFAULT_LEVER_DISTANCE_M: f64 = 7.0;
/// Amperes.
pub const DEFAULT_LOW_INTENSITY_THRESHOLD: f64 = 5e-9;

/// Ticks between moves for a given filter strength: the heavier the
/// smoothing, the longer the filter needs to show the effect of a move.
pub fn actuation_interval_for(filter_strength: u32) -> u32 {
    (filter_strength / 20).max(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub axis: Signal,
    pub correction_gain: f64,
    pub lever_distance: f64,
    pub low_intensity_threshold: f64,
    pub actuation_interval: u32,
    /// Compute and log corrections without touching the actuator.
    pub dry_run: bool,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.axis.is_filtered() {
            return Err(ConfigError::InvalidParameter { what: "controlled axis must be a filtered signal" });
        }
        if !self.correction_gain.is_finite() {
            return Err(ConfigError::InvalidParameter { what: "correction gain must be finite" });
        }
        if !(self.lever_distance.is_finite() && self.lever_distance > 0.0) {
            return Err(ConfigError::InvalidParameter { what: "lever distance must be positive" });
        }
        if self.low_intensity_threshold.is_nan() {
            return Err(ConfigError::InvalidParameter { what: "low intensity threshold must not be NaN" });
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            axis: Signal::PosV,
            correction_gain: DEFAULT_CORRECTION_GAIN,
            lever_distance: DEFAULT_LEVER_DISTANCE_M,
            low_intensity_threshold: DEFAULT_LOW_INTENSITY_THRESHOLD,
            actuation_interval: actuation_interval_for(DEFAULT_FILTER_STRENGTH),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disabled,
    Enabled,
}

pub struct FeedbackController<A: ActuatorSink> {
    actuator: A,
    config: ControllerConfig,
    state: ControllerState,
    cycle_counter: u32,
    /// Backlash compensation in force when feedback started; read before
    /// the first real move if feedback started in dry run.
    backlash: Option<f64>,
    moves: u64,
}

impl<A: ActuatorSink> FeedbackController<A> {
    pub fn new(actuator: A, config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            actuator,
            config,
            state: ControllerState::Disabled,
            cycle_counter: 0,
            backlash: None,
            moves: 0,
        })
    }

    /// Disabled -> Enabled. Locks the store's targets onto the current
    /// filtered values and restarts the actuation cycle.
    ///
    /// The actuator's backlash setting is read here so the value restored
    /// after each move is the one in force when feedback started. In dry run
    /// it is read before the first real move instead.
    pub fn enable<S: SignalSource>(&mut self, store: &mut HistoryStore<S>) -> Result<(), FeedbackError> {
        if self.is_enabled() {
            return Ok(());
        }
        self.backlash = None;
        if !self.config.dry_run {
            self.backlash = Some(self.read_backlash()?);
        }

        for signal in Signal::FILTERED {
            match store.latest_filtered(signal) {
                Some(value) if value.is_finite() => {
                    if let Err(e) = store.set_target(signal, value) {
                        warn!("[Controller] target for {} not set: {}", signal.name(), e);
                    }
                }
                _ => warn!("[Controller] no valid {} to lock onto", signal.name()),
            }
        }
        store.set_feedback_enabled(true);
        self.state = ControllerState::Enabled;
        self.cycle_counter = 0;

        info!(
            "[Controller] feedback ON: target {}={:.6}, band ±{:.6}, every {} cycles{}",
            self.config.axis.name(),
            store.target(self.config.axis).unwrap_or(f64::NAN),
            store.dead_band().width(),
            self.config.actuation_interval,
            if self.config.dry_run { " (dry run)" } else { "" }
        );
        Ok(())
    }

    /// Enabled -> Disabled; the store's targets resume tracking the signal.
    pub fn disable<S: SignalSource>(&mut self, store: &mut HistoryStore<S>) {
        store.set_feedback_enabled(false);
        if self.is_enabled() {
            info!("[Controller] feedback OFF after {} moves", self.moves);
        }
        self.state = ControllerState::Disabled;
    }

    /// One control cycle. Must follow a `sample()` of the same store.
    pub fn tick<S: SignalSource>(&mut self, store: &mut HistoryStore<S>) -> Result<TickOutcome, FeedbackError> {
        if !self.is_enabled() {
            return Ok(TickOutcome::Idle);
        }

        let avg_current = store.latest_raw(Signal::AvgCurrent);
        let threshold = self.config.low_intensity_threshold;
        if !(avg_current >= threshold) {
            warn!("[Controller] intensity too low ({:e} < {:e})", avg_current, threshold);
            self.disable(store);
            return Err(FeedbackError::LowSignal { avg_current, threshold });
        }

        self.cycle_counter += 1;
        let due = self.cycle_counter >= self.config.actuation_interval;
        let cycle = self.cycle_counter;
        if due {
            self.cycle_counter = 0;
        }

        let axis = self.config.axis;
        let current = store.latest_filtered(axis).unwrap_or(f64::NAN);
        let target = store.target(axis).unwrap_or(f64::NAN);
        if !(current.is_finite() && target.is_finite()) {
            debug!("[Controller] {} unavailable, holding", axis.name());
            return Ok(TickOutcome::NoSignal);
        }

        let deviation = current - target;
        if store.dead_band().contains(current, target) {
            return Ok(TickOutcome::InBand { deviation });
        }

        let correction = self.correction(deviation);
        if !due {
            return Ok(TickOutcome::Pending { correction, cycle });
        }

        if self.config.dry_run {
            info!("[Controller] dry run: pitch correction {:.9}", correction);
            return Ok(TickOutcome::DryRun { correction });
        }

        let backlash = match self.backlash {
            Some(b) => b,
            None => match self.read_backlash() {
                Ok(b) => {
                    self.backlash = Some(b);
                    b
                }
                Err(e) => {
                    self.disable(store);
                    return Err(e);
                }
            },
        };

        match move_relative(&mut self.actuator, correction, backlash) {
            Ok((from, to)) => {
                self.moves += 1;
                info!("[Controller] moving pitch by {:.9}: {:.9} -> {:.9}", correction, from, to);
                Ok(TickOutcome::Moved { correction, from, to })
            }
            Err(e) => {
                error!("[Controller] correction abandoned: {}", e);
                self.disable(store);
                Err(FeedbackError::ActuatorWriteFailed(e))
            }
        }
    }

    fn read_backlash(&mut self) -> Result<f64, FeedbackError> {
        self.actuator.get_backlash_compensation().map_err(|e| {
            error!("[Controller] cannot read backlash compensation: {}", e);
            FeedbackError::ActuatorReadFailed(e)
        })
    }

    /// Angular correction for a linear deviation at the monitor.
    pub fn correction(&self, deviation: f64) -> f64 {
        -deviation * self.config.correction_gain / self.config.lever_distance
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ControllerState::Enabled
    }

    pub fn cycle_counter(&self) -> u32 {
        self.cycle_counter
    }

    pub fn actuation_interval(&self) -> u32 {
        self.config.actuation_interval
    }

    pub fn set_actuation_interval(&mut self, interval: u32) {
        self.config.actuation_interval = interval.max(1);
        self.cycle_counter = self.cycle_counter.min(self.config.actuation_interval);
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.config.dry_run = dry_run;
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn moves(&self) -> u64 {
        self.moves
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_a::history::HistoryConfig;
    use crate::component_a::processor::ExponentialFilter;
    use crate::component_a::sensor::Reading;
    use crate::error::ActuatorError;

    struct Fixed(Reading);

    impl SignalSource for Fixed {
        fn read(&mut self) -> Reading {
            self.0
        }
    }

    #[derive(Default)]
    struct Motor {
        position: f64,
        backlash: f64,
        position_writes: usize,
        fail: bool,
        fail_read: bool,
    }

    impl ActuatorSink for Motor {
        fn get_position(&mut self) -> Result<f64, ActuatorError> {
            Ok(self.position)
        }

        fn set_position(&mut self, position: f64) -> Result<(), ActuatorError> {
            if self.fail {
                return Err(ActuatorError::Write { attribute: "Position", reason: "device fault".into() });
            }
            self.position_writes += 1;
            self.position = position;
            Ok(())
        }

        fn get_backlash_compensation(&mut self) -> Result<f64, ActuatorError> {
            if self.fail_read {
                return Err(ActuatorError::Read { attribute: "StepBacklash", reason: "timeout".into() });
            }
            Ok(self.backlash)
        }

        fn set_backlash_compensation(&mut self, value: f64) -> Result<(), ActuatorError> {
            self.backlash = value;
            Ok(())
        }
    }

    fn reading(pos_v: f64, avg_current: f64) -> Reading {
        Reading { pos_h: 0.0, pos_v, avg_current, ring_current: 100.0 }
    }

    fn store_at(pos_v: f64) -> HistoryStore<Fixed> {
        let cfg = HistoryConfig {
            frequency_hz: 1.0,
            backlog_s: 10.0,
            max_frequency_hz: 10.0,
            box_length: 10,
            filter: ExponentialFilter::with_coefficient(1.0),
            ..HistoryConfig::default()
        };
        HistoryStore::new_at(Fixed(reading(pos_v, 1e-6)), &cfg, 0.0).unwrap()
    }

    fn controller(interval: u32) -> FeedbackController<Motor> {
        let cfg = ControllerConfig {
            actuation_interval: interval,
            low_intensity_threshold: 1e-9,
            ..ControllerConfig::default()
        };
        FeedbackController::new(Motor { backlash: 0.3, ..Default::default() }, cfg).unwrap()
    }

    fn cycle(store: &mut HistoryStore<Fixed>, ctl: &mut FeedbackController<Motor>, t: f64) -> Result<TickOutcome, FeedbackError> {
        store.sample_at(t);
        ctl.tick(store)
    }

    #[test]
    fn enable_locks_targets() {
        let mut store = store_at(0.25);
        let mut ctl = controller(3);
        store.sample_at(1.0);
        ctl.enable(&mut store).unwrap();

        assert!(ctl.is_enabled());
        assert!(store.feedback_enabled());
        assert_eq!(ctl.cycle_counter(), 0);
        assert_eq!(store.target(Signal::PosV), Some(0.25));

        store.source_mut().0 = reading(0.5, 1e-6);
        store.sample_at(2.0);
        assert_eq!(store.target(Signal::PosV), Some(0.25));

        ctl.disable(&mut store);
        assert!(!store.feedback_enabled());
        store.sample_at(3.0);
        assert_eq!(store.target(Signal::PosV), Some(0.5));
    }

    #[test]
    fn tick_while_disabled_is_idle() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        assert_eq!(cycle(&mut store, &mut ctl, 1.0), Ok(TickOutcome::Idle));
    }

    #[test]
    fn dead_band_holds() {
        let mut store = store_at(0.0);
        let mut ctl = controller(2);
        ctl.enable(&mut store).unwrap();
        let half = store.dead_band().width() * 0.9;
        store.source_mut().0 = reading(half, 1e-6);
        for k in 0..50 {
            let out = cycle(&mut store, &mut ctl, k as f64).unwrap();
            assert!(matches!(out, TickOutcome::InBand { .. }));
        }
        assert_eq!(ctl.actuator().position_writes, 0);
    }

    #[test]
    fn one_move_per_interval() {
        let mut store = store_at(0.0);
        let mut ctl = controller(4);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(0.01, 1e-6);

        let mut moved = Vec::new();
        for k in 1..=12 {
            if cycle(&mut store, &mut ctl, k as f64).unwrap().moved() {
                moved.push(k);
            }
        }
        assert_eq!(moved, vec![4, 8, 12]);
        assert_eq!(ctl.actuator().position_writes, 3);
        assert_eq!(ctl.moves(), 3);
    }

    #[test]
    fn correction_sign_and_scale() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(0.07, 1e-6);

        let out = cycle(&mut store, &mut ctl, 1.0).unwrap();
        let expected = -0.07 * DEFAULT_CORRECTION_GAIN / DEFAULT_LEVER_DISTANCE_M;
        match out {
            TickOutcome::Moved { correction, from, to } => {
                assert!((correction - expected).abs() < 1e-15);
                assert_eq!(from, 0.0);
                assert!((to - expected).abs() < 1e-15);
            }
            other => panic!("expected a move, got {:?}", other),
        }
        // backlash restored after the move
        assert_eq!(ctl.actuator().backlash, 0.3);
    }

    #[test]
    fn low_signal_disables_without_moving() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(0.5, 1e-10);

        let err = cycle(&mut store, &mut ctl, 1.0).unwrap_err();
        assert!(matches!(err, FeedbackError::LowSignal { .. }));
        assert_eq!(ctl.state(), ControllerState::Disabled);
        assert!(!store.feedback_enabled());
        assert_eq!(ctl.actuator().position_writes, 0);
    }

    #[test]
    fn missing_intensity_counts_as_low() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(0.5, f64::NAN);
        assert!(matches!(cycle(&mut store, &mut ctl, 1.0), Err(FeedbackError::LowSignal { .. })));
        assert!(!ctl.is_enabled());
    }

    #[test]
    fn missing_position_holds() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(f64::NAN, 1e-6);
        // filter holds the last value, so the loop sees no deviation
        assert!(matches!(cycle(&mut store, &mut ctl, 1.0), Ok(TickOutcome::InBand { .. })));
        assert!(ctl.is_enabled());
    }

    #[test]
    fn actuator_failure_disables() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.enable(&mut store).unwrap();
        ctl.actuator_mut().fail = true;
        store.source_mut().0 = reading(0.5, 1e-6);

        let err = cycle(&mut store, &mut ctl, 1.0).unwrap_err();
        assert!(matches!(err, FeedbackError::ActuatorWriteFailed(_)));
        assert!(!ctl.is_enabled());
        assert!(!store.feedback_enabled());
        assert_eq!(ctl.actuator().position, 0.0);
    }

    #[test]
    fn dry_run_never_writes() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.set_dry_run(true);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(0.5, 1e-6);
        for k in 0..5 {
            let out = cycle(&mut store, &mut ctl, k as f64).unwrap();
            assert!(matches!(out, TickOutcome::DryRun { .. }));
        }
        assert_eq!(ctl.actuator().position_writes, 0);
    }

    #[test]
    fn leaving_dry_run_keeps_backlash() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.set_dry_run(true);
        ctl.enable(&mut store).unwrap();
        store.source_mut().0 = reading(0.5, 1e-6);
        assert!(matches!(cycle(&mut store, &mut ctl, 1.0), Ok(TickOutcome::DryRun { .. })));

        ctl.set_dry_run(false);
        assert!(cycle(&mut store, &mut ctl, 2.0).unwrap().moved());
        assert_eq!(ctl.actuator().backlash, 0.3);
        assert_eq!(ctl.actuator().position_writes, 1);
    }

    #[test]
    fn backlash_read_failure_is_reported_as_read() {
        let mut store = store_at(0.0);
        let mut ctl = controller(1);
        ctl.actuator_mut().fail_read = true;
        let err = ctl.enable(&mut store).unwrap_err();
        assert!(matches!(err, FeedbackError::ActuatorReadFailed(ActuatorError::Read { .. })));
        assert!(!ctl.is_enabled());

        // dry run defers the read to the first real move
        ctl.set_dry_run(true);
        ctl.enable(&mut store).unwrap();
        ctl.set_dry_run(false);
        store.source_mut().0 = reading(0.5, 1e-6);
        assert!(matches!(cycle(&mut store, &mut ctl, 1.0), Err(FeedbackError::ActuatorReadFailed(_))));
        assert!(!ctl.is_enabled());
        assert!(!store.feedback_enabled());
        assert_eq!(ctl.actuator().position_writes, 0);
    }

    #[test]
    fn interval_from_filter_strength() {
        assert_eq!(actuation_interval_for(500), 25);
        assert_eq!(actuation_interval_for(10), 1);
        assert_eq!(actuation_interval_for(1000), 50);
    }

    #[test]
    fn invalid_geometry_rejected() {
        let cfg = ControllerConfig { lever_distance: 0.0, ..ControllerConfig::default() };
        assert!(FeedbackController::new(Motor::default(), cfg).is_err());
        let cfg = ControllerConfig { axis: Signal::RingCurrent, ..ControllerConfig::default() };
        assert!(FeedbackController::new(Motor::default(), cfg).is_err());
    }
}
