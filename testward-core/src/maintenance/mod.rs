//! Remediation of the test suite
//!
//! Maintenance edits tests on disk (parallelizing slow tests, removing tests
//! for functions that no longer exist, generating missing test files), tunes
//! how the suite is executed, and audits the project's module dependencies.
//! Every change is recorded as a [`MaintenanceAction`].

pub mod dependency;
pub mod maintainer;
pub mod optimizer;

pub use dependency::{
    Dependency, DependencyAnalyzer, DependencyConflict, DependencyError, DependencyReport, OutdatedDependency,
    Vulnerability,
};
pub use maintainer::TestMaintainer;
pub use optimizer::{OptimizationAction, OptimizationEngine, OptimizationResult, OptimizationRule, RuleMetric};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("Invalid condition for rule {rule}: {condition}")]
    InvalidCondition { rule: String, condition: String },

    #[error("Unknown metric in rule condition: {0}")]
    UnknownMetric(String),

    #[error("Duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("Analysis error: {0}")]
    Analysis(#[from] crate::analysis::AnalysisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Fix,
    Optimize,
    Cleanup,
    Update,
    Generate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Audit record of one maintenance operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceAction {
    pub id: String,
    pub action_type: ActionType,
    pub target: String,
    pub description: String,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Human-readable list of what changed
    pub changes: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MaintenanceAction {
    pub fn start(action_type: ActionType, target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_type,
            target: target.into(),
            description: description.into(),
            status: ActionStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            changes: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn complete(mut self) -> Self {
        self.status = ActionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = ActionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ActionStatus::Completed
    }
}
