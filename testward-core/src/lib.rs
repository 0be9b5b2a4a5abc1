//! Core functionality for testward
//!
//! Keeps the test suite of a Go project healthy without supervision:
//! source analysis, test generation, execution metrics and regression
//! detection, automated maintenance, and the orchestrator that runs all of
//! it on a schedule.

pub mod analysis;
pub mod automation;
pub mod config;
pub mod maintenance;
pub mod performance;
pub mod test_gen;

pub use automation::{InfraError, InfrastructureReport, InfrastructureStatus, SelfMaintainingTestInfrastructure};
pub use config::InfrastructureConfig;
