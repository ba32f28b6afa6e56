//! history.rs
//! Fixed-length rolling history of the monitored signals.
//!
//! Every log in a store (raw, filtered, target, band, timestamps) has exactly
//! `capacity` entries, index 0 oldest. A sample drops the oldest entry of each
//! log and appends a new one, so a store never grows or shrinks except through
//! `resize`, which touches all logs in one call.
//!
//! While feedback is off the target logs follow the filtered signal and the
//! scalar targets are refreshed from the newest filtered values, so switching
//! feedback on locks onto the present operating point.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::component_a::processor::{DeadBand, ExponentialFilter, WindowStats, window_stats};
use crate::component_a::sensor::{Reading, Signal, SignalSource};
use crate::error::ConfigError;

pub const DEFAULT_FREQUENCY_HZ: f64 = 5.0;
pub const DEFAULT_BACKLOG_S: f64 = 120.0;
/// Polling-rate ceiling of the reference hardware.
pub const DEFAULT_MAX_FREQUENCY_HZ: f64 = 6.0;
/// Minimum number of retained samples.
pub const DEFAULT_BOX_LENGTH: usize = 40;
/// Most samples a store will hold (about 27 h at 5 Hz).
pub const MAX_CAPACITY: usize = 500_000;

/// Unix time in seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Which of the three dead-band logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandLog {
    Width,
    Low,
    High,
}

impl BandLog {
    pub const ALL: [BandLog; 3] = [BandLog::Width, BandLog::Low, BandLog::High];

    fn index(&self) -> usize {
        match self {
            BandLog::Width => 0,
            BandLog::Low => 1,
            BandLog::High => 2,
        }
    }
}

/// A fixed-capacity log of `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingLog {
    data: VecDeque<f64>,
}

impl RollingLog {
    pub fn filled(len: usize, value: f64) -> Self {
        Self {
            data: std::iter::repeat_n(value, len).collect(),
        }
    }

    fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        Self {
            data: values.into_iter().collect(),
        }
    }

    /// Drops the oldest value and appends `value`.
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.data.pop_front();
        self.data.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Newest value (NaN for an empty log).
    pub fn last(&self) -> f64 {
        self.data.back().copied().unwrap_or(f64::NAN)
    }

    /// Oldest value (NaN for an empty log).
    pub fn first(&self) -> f64 {
        self.data.front().copied().unwrap_or(f64::NAN)
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.data.get(index).copied()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = f64> + ExactSizeIterator + '_ {
        self.data.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Grows by padding the front with the oldest value, or shrinks by
    /// dropping the oldest values.
    fn resize_front(&mut self, new_len: usize) {
        let old_len = self.data.len();
        if new_len > old_len {
            let pad = self.first();
            for _ in old_len..new_len {
                self.data.push_front(pad);
            }
        } else {
            self.data.drain(..old_len - new_len);
        }
    }

    fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }
}

/// Construction parameters of a [`HistoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryConfig {
    pub frequency_hz: f64,
    pub backlog_s: f64,
    pub max_frequency_hz: f64,
    pub box_length: usize,
    pub filter: ExponentialFilter,
    pub dead_band: DeadBand,
    /// Axis the dead-band logs are drawn around.
    pub band_axis: Signal,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            backlog_s: DEFAULT_BACKLOG_S,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY_HZ,
            box_length: DEFAULT_BOX_LENGTH,
            filter: ExponentialFilter::default(),
            dead_band: DeadBand::default(),
            band_axis: Signal::PosV,
        }
    }
}

/// Converts a backlog duration and rate into a number of samples.
pub fn capacity_for(backlog_s: f64, frequency_hz: f64) -> usize {
    // tolerate representation error so 120 s * 5 Hz is 600, not 601
    (backlog_s * frequency_hz - 1e-9).ceil().max(1.0) as usize
}

/// Like [`capacity_for`], but rejects backlogs above [`MAX_CAPACITY`] samples.
pub fn bounded_capacity(backlog_s: f64, frequency_hz: f64) -> Result<usize, ConfigError> {
    if !(backlog_s * frequency_hz <= MAX_CAPACITY as f64) {
        return Err(ConfigError::InvalidBacklog(backlog_s));
    }
    Ok(capacity_for(backlog_s, frequency_hz))
}

pub struct HistoryStore<S: SignalSource> {
    source: S,
    frequency: f64,
    sample_period: f64,
    backlog_seconds: f64,
    max_frequency: f64,
    min_window: usize,
    capacity: usize,
    raw: [RollingLog; 4],
    filtered: [RollingLog; 3],
    target: [RollingLog; 3],
    band: [RollingLog; 3],
    timestamps: RollingLog,
    filter: ExponentialFilter,
    dead_band: DeadBand,
    band_axis: Signal,
    feedback_enabled: bool,
    targets: [f64; 3],
}

impl<S: SignalSource> HistoryStore<S> {
    /// Builds a store and fills it from one fresh reading.
    pub fn new(source: S, config: &HistoryConfig) -> Result<Self, ConfigError> {
        Self::new_at(source, config, unix_now())
    }

    pub fn new_at(source: S, config: &HistoryConfig, now: f64) -> Result<Self, ConfigError> {
        if !(config.max_frequency_hz.is_finite() && config.max_frequency_hz > 0.0) {
            return Err(ConfigError::InvalidFrequency(config.max_frequency_hz));
        }
        let frequency = validate_frequency(config.frequency_hz)?.min(config.max_frequency_hz);
        if !config.backlog_s.is_finite() {
            return Err(ConfigError::InvalidBacklog(config.backlog_s));
        }
        if !config.band_axis.is_filtered() {
            return Err(ConfigError::InvalidParameter {
                what: "band axis must be a filtered signal",
            });
        }
        if config.box_length > MAX_CAPACITY {
            return Err(ConfigError::InvalidParameter {
                what: "box length exceeds the maximum capacity",
            });
        }
        let min_window = config.box_length.max(1);
        let backlog = config.backlog_s.max(min_backlog(min_window, frequency));
        let capacity = bounded_capacity(backlog, frequency)
            .map_err(|_| ConfigError::InvalidBacklog(config.backlog_s))?
            .max(min_window);

        let empty = || RollingLog::filled(capacity, f64::NAN);
        let mut store = Self {
            source,
            frequency,
            sample_period: 1.0 / frequency,
            backlog_seconds: backlog,
            max_frequency: config.max_frequency_hz,
            min_window,
            capacity,
            raw: std::array::from_fn(|_| empty()),
            filtered: std::array::from_fn(|_| empty()),
            target: std::array::from_fn(|_| empty()),
            band: std::array::from_fn(|_| empty()),
            timestamps: empty(),
            filter: config.filter,
            dead_band: config.dead_band,
            band_axis: config.band_axis,
            feedback_enabled: false,
            targets: [0.0; 3],
        };
        store.reset_at(now);
        info!(
            "[History] created: {} samples, {:.1} s at {:.2} Hz",
            store.capacity, store.backlog_seconds, store.frequency
        );
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Polls the source once and advances every log by one slot.
    pub fn sample(&mut self) -> Reading {
        self.sample_at(unix_now())
    }

    pub fn sample_at(&mut self, now: f64) -> Reading {
        let reading = self.source.read();

        for signal in Signal::ALL {
            self.raw[signal.index()].push(reading.get(signal));
        }

        for signal in Signal::FILTERED {
            let i = signal.index();
            let value = self.filter.step(self.raw[i].last(), self.filtered[i].last());
            self.filtered[i].push(value);

            let target = if self.feedback_enabled { self.targets[i] } else { value };
            self.target[i].push(target);
        }

        let band = if self.feedback_enabled {
            let width = self.dead_band.width();
            let centre = self.targets[self.band_axis.index()];
            [width, centre - width, centre + width]
        } else {
            [f64::NAN; 3]
        };
        for (log, value) in self.band.iter_mut().zip(band) {
            log.push(value);
        }

        if !self.feedback_enabled {
            for signal in Signal::FILTERED {
                let i = signal.index();
                self.targets[i] = self.filtered[i].last();
            }
        }

        self.timestamps.push(now);

        debug!(
            "[History] sample x={:.6} z={:.6} avg={:e} ring={:.3}",
            reading.pos_h, reading.pos_v, reading.avg_current, reading.ring_current
        );
        reading
    }

    /// Refills every log with one fresh reading and respaces the time base
    /// evenly over the backlog ending at now.
    pub fn reset(&mut self) -> Reading {
        self.reset_at(unix_now())
    }

    pub fn reset_at(&mut self, now: f64) -> Reading {
        let reading = self.source.read();
        for signal in Signal::ALL {
            let value = reading.get(signal);
            let i = signal.index();
            self.raw[i].fill(value);
            if signal.is_filtered() {
                self.filtered[i].fill(value);
                self.target[i].fill(value);
                if !self.feedback_enabled {
                    self.targets[i] = value;
                }
            }
        }
        for log in &mut self.band {
            log.fill(f64::NAN);
        }
        self.timestamps = RollingLog::from_values(linspace(
            now - self.backlog_seconds,
            now,
            self.capacity,
        ));
        info!("[History] logs reset to current values");
        reading
    }

    /// Changes the number of retained samples, keeping the newest data.
    ///
    /// Growing pads the front with each log's oldest value and extends the
    /// time base backwards at the current sample period. Requests are clamped
    /// to `[min window, MAX_CAPACITY]`. Returns the resulting capacity.
    pub fn resize(&mut self, new_capacity: usize) -> usize {
        let new_capacity = new_capacity.clamp(self.min_window, MAX_CAPACITY);
        if new_capacity == self.capacity {
            return self.capacity;
        }

        if new_capacity > self.capacity {
            let pad = new_capacity - self.capacity;
            let t0 = self.timestamps.first();
            let period = self.sample_period;
            for i in 0..pad {
                self.timestamps
                    .data
                    .push_front(t0 - (i + 1) as f64 * period);
            }
        } else {
            self.timestamps.resize_front(new_capacity);
        }

        for log in self
            .raw
            .iter_mut()
            .chain(self.filtered.iter_mut())
            .chain(self.target.iter_mut())
            .chain(self.band.iter_mut())
        {
            log.resize_front(new_capacity);
        }

        debug!("[History] resized {} -> {}", self.capacity, new_capacity);
        self.capacity = new_capacity;
        self.capacity
    }

    /// Sets the history duration, raised to the minimum that keeps the
    /// filter window populated. Returns the new capacity.
    pub fn change_backlog(&mut self, seconds: f64) -> Result<usize, ConfigError> {
        if !seconds.is_finite() {
            return Err(ConfigError::InvalidBacklog(seconds));
        }
        let backlog = seconds.max(self.min_backlog());
        let capacity = bounded_capacity(backlog, self.frequency).map_err(|_| ConfigError::InvalidBacklog(seconds))?;
        self.backlog_seconds = backlog;
        let capacity = self.resize(capacity);
        info!("[History] backlog {:.1} s -> {} samples", backlog, capacity);
        Ok(capacity)
    }

    /// Sets the polling rate, clamped to the hardware ceiling, and re-derives
    /// the capacity for the current backlog. Returns the applied rate.
    ///
    /// A rate that would push the current backlog past [`MAX_CAPACITY`]
    /// samples is rejected and nothing changes.
    pub fn change_frequency(&mut self, hz: f64) -> Result<f64, ConfigError> {
        let hz = validate_frequency(hz)?.min(self.max_frequency);
        let backlog = self.backlog_seconds.max(min_backlog(self.min_window, hz));
        bounded_capacity(backlog, hz).map_err(|_| ConfigError::InvalidFrequency(hz))?;
        self.frequency = hz;
        self.sample_period = 1.0 / hz;
        self.change_backlog(self.backlog_seconds)?;
        Ok(hz)
    }

    /// Sets the scalar target of a filtered signal.
    pub fn set_target(&mut self, signal: Signal, value: f64) -> Result<(), ConfigError> {
        if !signal.is_filtered() {
            return Err(ConfigError::InvalidParameter {
                what: "targets exist only for filtered signals",
            });
        }
        if !value.is_finite() {
            return Err(ConfigError::InvalidParameter {
                what: "target must be finite",
            });
        }
        if !self.feedback_enabled {
            debug!("[History] target for {} set while feedback is off; it will track the signal", signal.name());
        }
        self.targets[signal.index()] = value;
        Ok(())
    }

    pub fn set_feedback_enabled(&mut self, enabled: bool) {
        self.feedback_enabled = enabled;
    }

    pub fn set_filter(&mut self, filter: ExponentialFilter) {
        self.filter = filter;
    }

    pub fn set_filter_strength(&mut self, strength: u32) {
        self.filter = ExponentialFilter::new(strength);
    }

    pub fn set_sensitivity(&mut self, sensitivity: u32) {
        self.dead_band = self.dead_band.with_sensitivity(sensitivity);
    }

    // ------------------------------------------------------------------
    // Readout
    // ------------------------------------------------------------------

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_capacity(&self) -> usize {
        self.min_window
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn sample_period(&self) -> f64 {
        self.sample_period
    }

    pub fn backlog_seconds(&self) -> f64 {
        self.backlog_seconds
    }

    pub fn min_backlog(&self) -> f64 {
        min_backlog(self.min_window, self.frequency)
    }

    pub fn feedback_enabled(&self) -> bool {
        self.feedback_enabled
    }

    pub fn filter(&self) -> ExponentialFilter {
        self.filter
    }

    pub fn dead_band(&self) -> DeadBand {
        self.dead_band
    }

    pub fn band_axis(&self) -> Signal {
        self.band_axis
    }

    pub fn raw(&self, signal: Signal) -> &RollingLog {
        &self.raw[signal.index()]
    }

    pub fn filtered(&self, signal: Signal) -> Option<&RollingLog> {
        signal.is_filtered().then(|| &self.filtered[signal.index()])
    }

    pub fn target_log(&self, signal: Signal) -> Option<&RollingLog> {
        signal.is_filtered().then(|| &self.target[signal.index()])
    }

    pub fn band(&self, which: BandLog) -> &RollingLog {
        &self.band[which.index()]
    }

    pub fn timestamps(&self) -> &RollingLog {
        &self.timestamps
    }

    pub fn latest_raw(&self, signal: Signal) -> f64 {
        self.raw[signal.index()].last()
    }

    pub fn latest_filtered(&self, signal: Signal) -> Option<f64> {
        self.filtered(signal).map(RollingLog::last)
    }

    /// Scalar target of a filtered signal.
    pub fn target(&self, signal: Signal) -> Option<f64> {
        signal.is_filtered().then(|| self.targets[signal.index()])
    }

    pub fn latest_timestamp(&self) -> f64 {
        self.timestamps.last()
    }

    /// Statistics of the finite raw values currently retained.
    pub fn summary(&self, signal: Signal) -> Option<WindowStats> {
        window_stats(self.raw(signal).iter())
    }

    /// True when every log has exactly `capacity` entries.
    pub fn is_consistent(&self) -> bool {
        let cap = self.capacity;
        self.timestamps.len() == cap
            && self
                .raw
                .iter()
                .chain(&self.filtered)
                .chain(&self.target)
                .chain(&self.band)
                .all(|log| log.len() == cap)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

fn validate_frequency(hz: f64) -> Result<f64, ConfigError> {
    if hz.is_finite() && hz > 0.0 {
        Ok(hz)
    } else {
        Err(ConfigError::InvalidFrequency(hz))
    }
}

fn min_backlog(min_window: usize, frequency: f64) -> f64 {
    (min_window as f64 / frequency).ceil()
}

fn linspace(start: f64, end: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (end - start) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| if i + 1 == n { end } else { start + step * i as f64 })
}
