//! feedback.rs
//! Per-tick result of the feedback controller.

/// What one call to `FeedbackController::tick` did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Controller is disabled; nothing evaluated.
    Idle,
    /// Controlled value is unavailable (NaN); holding.
    NoSignal,
    /// Inside the dead band.
    InBand { deviation: f64 },
    /// Out of band, waiting for the actuation cycle.
    Pending { correction: f64, cycle: u32 },
    /// Correction written to the actuator.
    Moved { correction: f64, from: f64, to: f64 },
    /// Correction computed but not written (dry run).
    DryRun { correction: f64 },
}

impl TickOutcome {
    pub fn moved(&self) -> bool {
        matches!(self, TickOutcome::Moved { .. })
    }
}
