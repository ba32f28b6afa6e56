//! Error types for the monitor.
//!
//! Nothing in here is allowed to terminate the driver loop: sensor errors are
//! folded into NaN samples, feedback errors switch the controller off, sink
//! errors switch the row logger off.

use thiserror::Error;

/// A single field of a sensor read failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("sensor channel '{channel}' unavailable: {reason}")]
    Unavailable { channel: &'static str, reason: String },
}

/// Failures reported by an [`ActuatorSink`](crate::component_b::actuator::ActuatorSink).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("failed to read actuator attribute '{attribute}': {reason}")]
    Read { attribute: &'static str, reason: String },

    #[error("failed to write actuator attribute '{attribute}': {reason}")]
    Write { attribute: &'static str, reason: String },

    #[error("refusing to command non-finite {what} ({value})")]
    NonFinite { what: &'static str, value: f64 },
}

/// Reasons a feedback tick forced the controller into `Disabled`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedbackError {
    #[error("average current {avg_current:e} below threshold {threshold:e}")]
    LowSignal { avg_current: f64, threshold: f64 },

    #[error("actuator failure: {0}")]
    ActuatorWriteFailed(#[from] ActuatorError),

    #[error("cannot read actuator: {0}")]
    ActuatorReadFailed(ActuatorError),
}

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid frequency {0} Hz (must be finite and positive)")]
    InvalidFrequency(f64),

    #[error("invalid backlog {0} s (must be finite)")]
    InvalidBacklog(f64),

    #[error("invalid parameter: {what}")]
    InvalidParameter { what: &'static str },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failures of the append-only row log.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("log file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log row encoding error: {0}")]
    Csv(#[from] csv::Error),
}
