//! Processor: signal smoothing, the dead band and window statistics.
//!
//! Smoothing is a single-pole exponential low-pass:
//! `filtered[n] = raw[n] * a + filtered[n-1] * (1 - a)` with `a = 10^(-3 * strength / 1000)`.
//! Strength 1 barely smooths (a ≈ 0.993), strength 1000 smooths heavily (a = 0.001).
//!
//! A fixed-window moving average was considered and is not used; both filters
//! are not numerically interchangeable and only one policy is applied.

use average::{Estimate, Max, Min, Variance};

pub const MIN_FILTER_STRENGTH: u32 = 1;
pub const MAX_FILTER_STRENGTH: u32 = 1000;
pub const DEFAULT_FILTER_STRENGTH: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialFilter {
    strength: u32,
    a: f64,
}

impl ExponentialFilter {
    /// Strength is clamped to `[1, 1000]`.
    pub fn new(strength: u32) -> Self {
        let strength = strength.clamp(MIN_FILTER_STRENGTH, MAX_FILTER_STRENGTH);
        Self {
            strength,
            a: coefficient(strength),
        }
    }

    /// Filter with an explicit smoothing coefficient, `a` in `(0, 1]`.
    pub fn with_coefficient(a: f64) -> Self {
        let a = if a.is_finite() { a.clamp(f64::MIN_POSITIVE, 1.0) } else { 1.0 };
        let strength = (-(1000.0 / 3.0) * a.log10()).round() as u32;
        Self { strength, a }
    }

    pub fn strength(&self) -> u32 {
        self.strength
    }

    pub fn coefficient(&self) -> f64 {
        self.a
    }

    /// One filter step.
    ///
    /// A NaN raw value keeps the previous output; a NaN previous output
    /// restarts the filter from the raw value.
    #[inline]
    pub fn step(&self, raw: f64, previous: f64) -> f64 {
        match (raw.is_nan(), previous.is_nan()) {
            (true, _) => previous,
            (false, true) => raw,
            (false, false) => raw * self.a + previous * (1.0 - self.a),
        }
    }

    /// Upper bound on the number of steps for a constant input to come
    /// within `epsilon` of the input, starting `initial_error` away.
    pub fn settling_steps(&self, initial_error: f64, epsilon: f64) -> usize {
        let err = initial_error.abs();
        if err <= epsilon {
            return 0;
        }
        if self.a >= 1.0 {
            return 1;
        }
        if !(epsilon > 0.0) {
            return usize::MAX;
        }
        // 1 - a rounds to 1 for tiny a
        let decay = (-self.a).ln_1p();
        if decay == 0.0 {
            return usize::MAX;
        }
        // float-to-int casts saturate
        ((epsilon / err).ln() / decay).ceil().max(0.0) as usize
    }
}

impl Default for ExponentialFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_STRENGTH)
    }
}

pub fn coefficient(strength: u32) -> f64 {
    10f64.powf(-3.0 * f64::from(strength) / 1000.0)
}

/// Fraction of range used as the full-sensitivity half-width of the band.
pub const DEFAULT_BAND_FRACTION: f64 = 0.003;
pub const DEFAULT_SENSITIVITY: u32 = 10;
pub const MIN_SENSITIVITY: u32 = 1;
pub const MAX_SENSITIVITY: u32 = 100;

/// Tolerance band around a target: `half_width = fraction * sensitivity / 100`.
///
/// Fixed fraction of range; the band does not adapt to signal jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadBand {
    fraction: f64,
    sensitivity: u32,
}

impl DeadBand {
    /// Sensitivity is clamped to `[1, 100]`.
    pub fn new(fraction: f64, sensitivity: u32) -> Self {
        Self {
            fraction: fraction.abs(),
            sensitivity: sensitivity.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY),
        }
    }

    pub fn with_sensitivity(self, sensitivity: u32) -> Self {
        Self::new(self.fraction, sensitivity)
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn sensitivity(&self) -> u32 {
        self.sensitivity
    }

    /// Half-width of the band.
    pub fn width(&self) -> f64 {
        self.fraction * f64::from(self.sensitivity) / 100.0
    }

    /// Whether `value` lies inside `[target - width, target + width]`.
    pub fn contains(&self, value: f64, target: f64) -> bool {
        let w = self.width();
        value >= target - w && value <= target + w
    }
}

impl Default for DeadBand {
    fn default() -> Self {
        Self::new(DEFAULT_BAND_FRACTION, DEFAULT_SENSITIVITY)
    }
}

/// Summary of the finite values in a log window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Statistics over the finite entries of `values`; `None` if there are none.
pub fn window_stats<I: IntoIterator<Item = f64>>(values: I) -> Option<WindowStats> {
    let mut var = Variance::new();
    let mut min = Min::new();
    let mut max = Max::new();
    for v in values.into_iter().filter(|v| v.is_finite()) {
        var.add(v);
        min.add(v);
        max.add(v);
    }
    if var.is_empty() {
        return None;
    }
    Some(WindowStats {
        count: var.len(),
        mean: var.mean(),
        std_dev: if var.len() > 1 { var.sample_variance().sqrt() } else { 0.0 },
        min: min.min(),
        max: max.max(),
    })
}
