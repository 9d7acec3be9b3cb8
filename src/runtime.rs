//! Runtime glue that wires configs, cursor tracking, terminal status, telemetry,
//! and runner orchestration.

pub mod config;
pub mod progress;
pub mod runner;
pub mod status;
pub mod telemetry;
