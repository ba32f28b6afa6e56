//! Beam position feedback for a monochromator crystal.
//!
//! A quadrant beam position monitor (QBPM) is polled at a fixed rate. Its
//! readings are smoothed and kept in rolling logs ([`component_a`]); while
//! feedback is on, deviations of the smoothed position from a locked target
//! are corrected by moving the crystal pitch ([`component_b`]). The
//! [`monitor::Monitor`] drives both.

pub mod advanced;
pub mod component_a;
pub mod component_b;
pub mod error;
pub mod monitor;
pub mod utils;
