//! sensor.rs
//! Signal definitions and the acquisition seam.
//! - One `Reading` per poll: beam position (x/z), average diode current, ring current
//! - Failed fields arrive as NaN; a `SignalSource` never fails as a whole

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::SensorError;

/// The four monitored signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    PosH,
    PosV,
    AvgCurrent,
    RingCurrent,
}

impl Signal {
    pub const ALL: [Signal; 4] = [Signal::PosH, Signal::PosV, Signal::AvgCurrent, Signal::RingCurrent];

    /// Signals that carry filtered and target logs.
    pub const FILTERED: [Signal; 3] = [Signal::PosH, Signal::PosV, Signal::AvgCurrent];

    pub fn name(&self) -> &'static str {
        match self {
            Signal::PosH => "qbpm_x",
            Signal::PosV => "qbpm_z",
            Signal::AvgCurrent => "qbpm_avgcurr",
            Signal::RingCurrent => "petra_curr",
        }
    }

    pub fn is_filtered(&self) -> bool {
        !matches!(self, Signal::RingCurrent)
    }

    /// Slot of this signal in the per-signal log arrays.
    pub(crate) fn index(&self) -> usize {
        match self {
            Signal::PosH => 0,
            Signal::PosV => 1,
            Signal::AvgCurrent => 2,
            Signal::RingCurrent => 3,
        }
    }
}

/// One poll of the position monitor plus the storage ring current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub pos_h: f64,
    pub pos_v: f64,
    pub avg_current: f64,
    pub ring_current: f64,
}

impl Reading {
    /// A reading where every field failed.
    pub const UNAVAILABLE: Reading = Reading {
        pos_h: f64::NAN,
        pos_v: f64::NAN,
        avg_current: f64::NAN,
        ring_current: f64::NAN,
    };

    pub fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::PosH => self.pos_h,
            Signal::PosV => self.pos_v,
            Signal::AvgCurrent => self.avg_current,
            Signal::RingCurrent => self.ring_current,
        }
    }
}

/// Acquisition seam consumed by the history store.
///
/// Implementations own their device handles and retry policy. They must not
/// fail past this boundary: a field that could not be read is NaN.
pub trait SignalSource {
    fn read(&mut self) -> Reading;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn read(&mut self) -> Reading {
        (**self).read()
    }
}

/// Folds a per-field read result into the sample, degrading failures to NaN.
pub fn value_or_nan(result: Result<f64, SensorError>) -> f64 {
    match result {
        Ok(v) => v,
        Err(e) => {
            warn!("[Sensor] {}", e);
            f64::NAN
        }
    }
}
