// Simulated beamline for dry runs and tests.

pub mod simulation;
