//! Monitor configuration, loaded from TOML.
//!
//! Every key is optional; missing keys take the beamline defaults.
//!
//! ```toml
//! frequency_hz = 5.0
//! backlog_s = 120.0
//! filter_strength = 500
//! sensitivity = 10
//! lever_distance_m = 7.0
//! controlled_axis = "pos_v"
//! log_path = "qbpm_log.csv"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::component_a::{
    history::{
        DEFAULT_BACKLOG_S, DEFAULT_BOX_LENGTH, DEFAULT_FREQUENCY_HZ, DEFAULT_MAX_FREQUENCY_HZ, HistoryConfig, MAX_CAPACITY,
        bounded_capacity,
    },
    processor::{DEFAULT_BAND_FRACTION, DEFAULT_FILTER_STRENGTH, DEFAULT_SENSITIVITY, DeadBand, ExponentialFilter},
    sensor::Signal,
};
use crate::component_b::controller::{
    ControllerConfig, DEFAULT_CORRECTION_GAIN, DEFAULT_LEVER_DISTANCE_M, DEFAULT_LOW_INTENSITY_THRESHOLD,
    actuation_interval_for,
};
use crate::error::ConfigError;

pub const DEFAULT_TRIGGER_FILE: &str = "/tmp/qbpmfeedback.run";
pub const DEFAULT_LOG_FILE: &str = "qbpm_log.csv";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub frequency_hz: f64,
    pub backlog_s: f64,
    pub max_frequency_hz: f64,
    pub box_length: usize,
    pub filter_strength: u32,
    pub sensitivity: u32,
    pub band_fraction: f64,
    pub correction_gain: f64,
    pub lever_distance_m: f64,
    pub low_intensity_threshold: f64,
    /// Defaults to `filter_strength / 20`.
    pub actuation_interval: Option<u32>,
    pub controlled_axis: Signal,
    pub dry_run: bool,
    /// Row log; `None` disables it.
    pub log_path: Option<PathBuf>,
    /// Sentinel file toggling feedback; `None` disables the trigger.
    pub trigger_file: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            backlog_s: DEFAULT_BACKLOG_S,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY_HZ,
            box_length: DEFAULT_BOX_LENGTH,
            filter_strength: DEFAULT_FILTER_STRENGTH,
            sensitivity: DEFAULT_SENSITIVITY,
            band_fraction: DEFAULT_BAND_FRACTION,
            correction_gain: DEFAULT_CORRECTION_GAIN,
            lever_distance_m: DEFAULT_LEVER_DISTANCE_M,
            low_intensity_threshold: DEFAULT_LOW_INTENSITY_THRESHOLD,
            actuation_interval: None,
            controlled_axis: Signal::PosV,
            dry_run: false,
            log_path: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            trigger_file: Some(PathBuf::from(DEFAULT_TRIGGER_FILE)),
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: MonitorConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values that must never reach the buffer or control math.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(ConfigError::InvalidFrequency(self.frequency_hz));
        }
        if !(self.max_frequency_hz.is_finite() && self.max_frequency_hz > 0.0) {
            return Err(ConfigError::InvalidFrequency(self.max_frequency_hz));
        }
        if !self.backlog_s.is_finite() {
            return Err(ConfigError::InvalidBacklog(self.backlog_s));
        }
        bounded_capacity(self.backlog_s, self.frequency_hz.min(self.max_frequency_hz))?;
        if self.box_length > MAX_CAPACITY {
            return Err(ConfigError::InvalidParameter { what: "box_length exceeds the maximum capacity" });
        }
        if !(self.band_fraction.is_finite() && self.band_fraction >= 0.0) {
            return Err(ConfigError::InvalidParameter { what: "band_fraction must be finite and non-negative" });
        }
        self.controller().validate()
    }

    pub fn history(&self) -> HistoryConfig {
        HistoryConfig {
            frequency_hz: self.frequency_hz,
            backlog_s: self.backlog_s,
            max_frequency_hz: self.max_frequency_hz,
            box_length: self.box_length,
            filter: ExponentialFilter::new(self.filter_strength),
            dead_band: DeadBand::new(self.band_fraction, self.sensitivity),
            band_axis: self.controlled_axis,
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            axis: self.controlled_axis,
            correction_gain: self.correction_gain,
            lever_distance: self.lever_distance_m,
            low_intensity_threshold: self.low_intensity_threshold,
            actuation_interval: self
                .actuation_interval
                .unwrap_or_else(|| actuation_interval_for(self.filter_strength))
                .max(1),
            dry_run: self.dry_run,
        }
    }
}
