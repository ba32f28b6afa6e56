// Component B: actuator commander
// Compares the smoothed position with its target and corrects the crystal
// pitch through the actuator seam.

pub mod actuator;
pub mod controller;
pub mod feedback;
