// Component A: signal acquisition
// Reads the position monitor, smooths the signals and keeps the rolling
// history that the feedback loop and the row log work from.

pub mod sensor;
pub mod processor;
pub mod history;
