//! Background automation: health snapshots, scheduled tasks, maintenance
//! reports, and the orchestrator that runs them on their own cadences.

pub mod health;
pub mod orchestrator;
pub mod report;
pub mod scheduler;

pub use health::{HealthCheck, HealthChecker, HealthStatus, HealthThresholds};
pub use orchestrator::{InfrastructureStatus, SelfMaintainingTestInfrastructure};
pub use report::{InfrastructureReport, ReportGenerator, TrendAnalysis, TrendDirection};
pub use scheduler::{AutomationScheduler, ScheduledTask, TaskExecution, TaskType, calculate_next_run};

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Test infrastructure is already running")]
    AlreadyRunning,

    #[error("Test infrastructure is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, InfraError>;
