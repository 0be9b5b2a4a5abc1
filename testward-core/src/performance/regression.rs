//! Regression detection against historical baselines

use super::{PerformanceBaseline, PerformanceMetric};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RegressionType {
    Duration,
    Memory,
    SuccessRate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Band of a regression relative to the threshold: below 2x is low,
    /// below 4x medium, below 8x high, anything larger critical.
    pub fn from_percent(percent: f64, threshold: f64) -> Self {
        let ratio = if threshold > 0.0 { percent / threshold } else { f64::INFINITY };
        if ratio < 2.0 {
            Self::Low
        } else if ratio < 4.0 {
            Self::Medium
        } else if ratio < 8.0 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionAlert {
    pub test_name: String,
    pub regression_type: RegressionType,
    pub current_value: f64,
    pub baseline_value: f64,
    pub regression_percent: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolution: Option<String>,
}

pub struct RegressionDetector {
    threshold_percent: f64,
    min_samples: usize,
    alerts: RwLock<Vec<RegressionAlert>>,
}

impl RegressionDetector {
    pub fn new(threshold_percent: f64, min_samples: usize) -> Self {
        Self { threshold_percent, min_samples: min_samples.max(1), alerts: RwLock::new(Vec::new()) }
    }

    /// Compare the latest sample of each test to its stored baseline.
    /// Baselines built from fewer than `min_samples` runs are skipped, as are
    /// samples the baseline already contains. Returns only alerts raised by this call.
    pub async fn detect(
        &self,
        baselines: &HashMap<String, PerformanceBaseline>,
        latest: &[PerformanceMetric],
        now: DateTime<Utc>,
    ) -> Vec<RegressionAlert> {
        let mut candidates = Vec::new();

        for current in latest {
            let Some(baseline) = baselines.get(&current.test_name) else {
                continue;
            };
            if baseline.sample_size < self.min_samples || current.timestamp <= baseline.last_updated {
                continue;
            }
            let name = current.test_name.as_str();

            candidates.extend(self.compare(
                name,
                RegressionType::Duration,
                current.duration.as_secs_f64(),
                baseline.average_duration.as_secs_f64(),
                now,
            ));
            candidates.extend(self.compare(
                name,
                RegressionType::Memory,
                current.memory_bytes as f64,
                baseline.average_memory as f64,
                now,
            ));
            let current_success = if current.passed { 1.0 } else { 0.0 };
            candidates.extend(self.compare(name, RegressionType::SuccessRate, current_success, baseline.success_rate, now));
        }

        let mut alerts = self.alerts.write().await;
        let mut raised = Vec::new();
        for alert in candidates {
            let duplicate = alerts
                .iter()
                .any(|a| !a.resolved && a.test_name == alert.test_name && a.regression_type == alert.regression_type);
            if duplicate {
                continue;
            }
            warn!(
                "{:?} regression in {}: {:.1}% ({:?})",
                alert.regression_type, alert.test_name, alert.regression_percent, alert.severity
            );
            alerts.push(alert.clone());
            raised.push(alert);
        }
        raised
    }

    /// Increases are regressions for duration and memory, decreases for success rate
    fn compare(
        &self,
        test_name: &str,
        regression_type: RegressionType,
        current: f64,
        baseline: f64,
        now: DateTime<Utc>,
    ) -> Option<RegressionAlert> {
        if baseline <= 0.0 {
            return None;
        }
        let change = match regression_type {
            RegressionType::Duration | RegressionType::Memory => current - baseline,
            RegressionType::SuccessRate => baseline - current,
        };
        let percent = change / baseline * 100.0;
        if percent <= self.threshold_percent {
            return None;
        }
        Some(RegressionAlert {
            test_name: test_name.to_string(),
            regression_type,
            current_value: current,
            baseline_value: baseline,
            regression_percent: percent,
            severity: Severity::from_percent(percent, self.threshold_percent),
            detected_at: now,
            resolved: false,
            resolution: None,
        })
    }

    /// Mark the open alert for `(test, type)` resolved. Returns whether one was open.
    pub async fn resolve(&self, test_name: &str, regression_type: RegressionType, note: impl Into<String>) -> bool {
        let mut alerts = self.alerts.write().await;
        let open = alerts
            .iter_mut()
            .find(|a| !a.resolved && a.test_name == test_name && a.regression_type == regression_type);
        match open {
            Some(alert) => {
                alert.resolved = true;
                alert.resolution = Some(note.into());
                info!("Resolved {:?} regression in {}", regression_type, test_name);
                true
            }
            None => false,
        }
    }

    pub async fn alerts(&self) -> Vec<RegressionAlert> {
        self.alerts.read().await.clone()
    }

    pub async fn unresolved(&self) -> Vec<RegressionAlert> {
        self.alerts.read().await.iter().filter(|a| !a.resolved).cloned().collect()
    }
}
