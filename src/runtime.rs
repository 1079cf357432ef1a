//! Runtime glue that wires configuration, time, telemetry, fatal error
//! capture, and the top-level runner.

pub mod clock;
pub mod config;
pub mod fatal;
pub mod runner;
pub mod telemetry;
