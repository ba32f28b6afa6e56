//! simulation.rs
//! A simulated beamline: a position monitor downstream of a pitch-driven crystal.
//!
//! The vertical beam position follows `pos_v = drift + lever * pitch + noise`,
//! so a pitch correction of `-deviation / lever` cancels a deviation exactly.
//! Sensor and motor share one state behind a mutex and may live on different
//! threads. Noise, intensity, dropouts and write failures can be changed while
//! the simulation runs.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::component_a::sensor::{Reading, SignalSource, value_or_nan};
use crate::component_b::actuator::ActuatorSink;
use crate::component_b::controller::DEFAULT_LEVER_DISTANCE_M;
use crate::error::{ActuatorError, SensorError};

pub const DEFAULT_INTENSITY_A: f64 = 2.5e-7;
pub const DEFAULT_RING_CURRENT_MA: f64 = 100.0;
pub const DEFAULT_BACKLASH: f64 = 1e-4;

/// Every write the simulated motor accepted, in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorWrite {
    Position(f64),
    Backlash(f64),
}

struct SimState {
    rng: StdRng,
    lever: f64,
    pitch: f64,
    backlash: f64,
    drift_v: f64,
    offset_h: f64,
    noise: f64,
    intensity: f64,
    ring_current: f64,
    dropout: f64,
    fail_writes: bool,
    reads: u64,
    writes: Vec<MotorWrite>,
}

impl SimState {
    fn jitter(&mut self) -> f64 {
        if self.noise > 0.0 {
            self.rng.random_range(-self.noise..self.noise)
        } else {
            0.0
        }
    }

    fn channel(&mut self, channel: &'static str, value: f64) -> Result<f64, SensorError> {
        if self.dropout > 0.0 && self.rng.random_bool(self.dropout.min(1.0)) {
            return Err(SensorError::Unavailable {
                channel,
                reason: "simulated dropout".into(),
            });
        }
        Ok(value)
    }
}

/// Shared handle on the simulated hardware.
#[derive(Clone)]
pub struct SimBeamline {
    state: Arc<Mutex<SimState>>,
}

impl SimBeamline {
    /// A quiet beamline: no noise, no drift, full intensity.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                rng: StdRng::seed_from_u64(seed),
                lever: DEFAULT_LEVER_DISTANCE_M,
                pitch: 0.0,
                backlash: DEFAULT_BACKLASH,
                drift_v: 0.0,
                offset_h: 0.0,
                noise: 0.0,
                intensity: DEFAULT_INTENSITY_A,
                ring_current: DEFAULT_RING_CURRENT_MA,
                dropout: 0.0,
                fail_writes: false,
                reads: 0,
                writes: Vec::new(),
            })),
        }
    }

    pub fn qbpm(&self) -> SimQbpm {
        SimQbpm { state: self.state.clone() }
    }

    pub fn pitch_motor(&self) -> SimPitchMotor {
        SimPitchMotor { state: self.state.clone() }
    }

    pub fn with_lever(self, lever: f64) -> Self {
        self.state.lock().lever = lever;
        self
    }

    pub fn with_noise(self, amplitude: f64) -> Self {
        self.set_noise(amplitude);
        self
    }

    pub fn set_noise(&self, amplitude: f64) {
        self.state.lock().noise = amplitude.abs();
    }

    /// Vertical beam offset independent of the crystal.
    pub fn set_drift(&self, drift: f64) {
        self.state.lock().drift_v = drift;
    }

    pub fn set_horizontal_offset(&self, offset: f64) {
        self.state.lock().offset_h = offset;
    }

    pub fn set_intensity(&self, amperes: f64) {
        self.state.lock().intensity = amperes;
    }

    pub fn set_ring_current(&self, milliamperes: f64) {
        self.state.lock().ring_current = milliamperes;
    }

    /// Probability in `[0, 1]` that any one channel read fails.
    pub fn set_dropout(&self, probability: f64) {
        self.state.lock().dropout = probability.clamp(0.0, 1.0);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn set_pitch(&self, pitch: f64) {
        self.state.lock().pitch = pitch;
    }

    pub fn pitch(&self) -> f64 {
        self.state.lock().pitch
    }

    pub fn backlash(&self) -> f64 {
        self.state.lock().backlash
    }

    /// Noise-free vertical position for the current pitch and drift.
    pub fn ideal_pos_v(&self) -> f64 {
        let s = self.state.lock();
        s.drift_v + s.lever * s.pitch
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    pub fn writes(&self) -> Vec<MotorWrite> {
        self.state.lock().writes.clone()
    }

    pub fn position_writes(&self) -> Vec<f64> {
        self.state
            .lock()
            .writes
            .iter()
            .filter_map(|w| match w {
                MotorWrite::Position(p) => Some(*p),
                MotorWrite::Backlash(_) => None,
            })
            .collect()
    }
}

/// Position monitor view of the beamline.
pub struct SimQbpm {
    state: Arc<Mutex<SimState>>,
}

impl SignalSource for SimQbpm {
    fn read(&mut self) -> Reading {
        let mut s = self.state.lock();
        s.reads += 1;

        let (noise_h, noise_v) = (s.jitter(), s.jitter());
        let pos_h = s.offset_h + noise_h;
        let pos_v = s.drift_v + s.lever * s.pitch + noise_v;
        let intensity = s.intensity;
        let ring_current = s.ring_current;

        Reading {
            pos_h: value_or_nan(s.channel("qbpm_x", pos_h)),
            pos_v: value_or_nan(s.channel("qbpm_z", pos_v)),
            avg_current: value_or_nan(s.channel("qbpm_avgcurr", intensity)),
            ring_current: value_or_nan(s.channel("petra_curr", ring_current)),
        }
    }
}

/// Crystal pitch motor view of the beamline.
pub struct SimPitchMotor {
    state: Arc<Mutex<SimState>>,
}

impl ActuatorSink for SimPitchMotor {
    fn get_position(&mut self) -> Result<f64, ActuatorError> {
        Ok(self.state.lock().pitch)
    }

    fn set_position(&mut self, position: f64) -> Result<(), ActuatorError> {
        let mut s = self.state.lock();
        if s.fail_writes {
            return Err(ActuatorError::Write {
                attribute: "Position",
                reason: "simulated motor fault".into(),
            });
        }
        debug!("[Sim] pitch {:.9} -> {:.9}", s.pitch, position);
        s.pitch = position;
        s.writes.push(MotorWrite::Position(position));
        Ok(())
    }

    fn get_backlash_compensation(&mut self) -> Result<f64, ActuatorError> {
        Ok(self.state.lock().backlash)
    }

    fn set_backlash_compensation(&mut self, value: f64) -> Result<(), ActuatorError> {
        let mut s = self.state.lock();
        if s.fail_writes {
            return Err(ActuatorError::Write {
                attribute: "StepBacklash",
                reason: "simulated motor fault".into(),
            });
        }
        s.backlash = value;
        s.writes.push(MotorWrite::Backlash(value));
        Ok(())
    }
}
