//! Runtime glue that wires configuration, telemetry, the operations log,
//! reporting and runner orchestration around the simulator.

pub mod cleanup;
pub mod config;
pub mod loader;
pub mod operations;
pub mod report;
pub mod runner;
pub mod telemetry;
