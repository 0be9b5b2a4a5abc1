//! Test execution metrics: running the suite, rolling histories, baselines
//! and regression alerts.

pub mod monitor;
pub mod regression;
pub mod runner;

pub use monitor::{PerformanceMonitor, PerformanceSummary, SlowTest};
pub use regression::{RegressionAlert, RegressionDetector, RegressionType, Severity};
pub use runner::{ExecutionSettings, TestRunOutput, TestRunner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("No test command configured")]
    NoCommand,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Test command exceeded {0:?}")]
    TimedOut(Duration),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// One observed execution of one test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetric {
    pub test_name: String,
    pub suite: String,
    pub duration: Duration,
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub timestamp: DateTime<Utc>,
    pub passed: bool,
    pub error: Option<String>,
}

impl PerformanceMetric {
    /// Suite is the part of the name before the first `/`, else `default`
    pub fn new(test_name: impl Into<String>, duration: Duration, passed: bool, timestamp: DateTime<Utc>) -> Self {
        let test_name = test_name.into();
        let suite = match test_name.split_once('/') {
            Some((suite, _)) => suite.to_string(),
            None => "default".to_string(),
        };
        Self {
            test_name,
            suite,
            duration,
            memory_bytes: 0,
            cpu_percent: 0.0,
            timestamp,
            passed,
            error: None,
        }
    }
}

/// Historical envelope of a test's measurements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceBaseline {
    pub test_name: String,
    pub average_duration: Duration,
    pub max_duration: Duration,
    pub average_memory: u64,
    pub max_memory: u64,
    pub success_rate: f64,
    pub sample_size: usize,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceBaseline {
    /// `None` for an empty sample set
    pub fn from_samples(test_name: &str, samples: &[PerformanceMetric], now: DateTime<Utc>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len();
        let total: Duration = samples.iter().map(|m| m.duration).sum();
        let memory: u64 = samples.iter().map(|m| m.memory_bytes).sum();
        Some(Self {
            test_name: test_name.to_string(),
            average_duration: total / n as u32,
            max_duration: samples.iter().map(|m| m.duration).max().unwrap_or_default(),
            average_memory: memory / n as u64,
            max_memory: samples.iter().map(|m| m.memory_bytes).max().unwrap_or_default(),
            success_rate: samples.iter().filter(|m| m.passed).count() as f64 / n as f64,
            sample_size: n,
            last_updated: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_derivation() {
        let now = Utc::now();
        assert_eq!(PerformanceMetric::new("TestStore/get_missing", Duration::ZERO, true, now).suite, "TestStore");
        assert_eq!(PerformanceMetric::new("TestStore", Duration::ZERO, true, now).suite, "default");
    }

    #[test]
    fn test_baseline_from_samples() {
        let now = Utc::now();
        let samples = vec![
            PerformanceMetric::new("TestA", Duration::from_millis(100), true, now),
            PerformanceMetric::new("TestA", Duration::from_millis(300), false, now),
        ];
        let baseline = PerformanceBaseline::from_samples("TestA", &samples, now).unwrap();
        assert_eq!(baseline.average_duration, Duration::from_millis(200));
        assert_eq!(baseline.max_duration, Duration::from_millis(300));
        assert_eq!(baseline.success_rate, 0.5);
        assert!(PerformanceBaseline::from_samples("TestA", &[], now).is_none());
    }
}
