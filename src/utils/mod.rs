// Configuration, the sample row log and external feedback triggers.

pub mod config;
pub mod export;
pub mod trigger;
