//! actuator.rs
//! The actuation seam: a rotary pitch motor with a backlash-compensation parameter.
//!
//! Device protocols, connection handling and retries live behind this trait.

use crate::error::ActuatorError;

pub trait ActuatorSink {
    /// Current position (angle, radians).
    fn get_position(&mut self) -> Result<f64, ActuatorError>;

    /// Commands an absolute position.
    fn set_position(&mut self, position: f64) -> Result<(), ActuatorError>;

    /// Current backlash-compensation setting.
    fn get_backlash_compensation(&mut self) -> Result<f64, ActuatorError>;

    fn set_backlash_compensation(&mut self, value: f64) -> Result<(), ActuatorError>;
}

impl<A: ActuatorSink + ?Sized> ActuatorSink for Box<A> {
    fn get_position(&mut self) -> Result<f64, ActuatorError> {
        (**self).get_position()
    }

    fn set_position(&mut self, position: f64) -> Result<(), ActuatorError> {
        (**self).set_position(position)
    }

    fn get_backlash_compensation(&mut self) -> Result<f64, ActuatorError> {
        (**self).get_backlash_compensation()
    }

    fn set_backlash_compensation(&mut self, value: f64) -> Result<(), ActuatorError> {
        (**self).set_backlash_compensation(value)
    }
}

/// Moves by `delta` with backlash compensation zeroed for the move and
/// restored to `backlash` afterwards. Returns `(from, to)`.
///
/// If the move itself fails, restoring the backlash value is still attempted;
/// the move error is the one reported.
pub fn move_relative<A: ActuatorSink + ?Sized>(
    actuator: &mut A,
    delta: f64,
    backlash: f64,
) -> Result<(f64, f64), ActuatorError> {
    if !delta.is_finite() {
        return Err(ActuatorError::NonFinite { what: "correction", value: delta });
    }
    let from = actuator.get_position()?;
    if !from.is_finite() {
        return Err(ActuatorError::NonFinite { what: "actuator position", value: from });
    }
    let to = from + delta;

    actuator.set_backlash_compensation(0.0)?;
    let moved = actuator.set_position(to);
    let restored = actuator.set_backlash_compensation(backlash);
    moved?;
    restored?;
    Ok((from, to))
}
