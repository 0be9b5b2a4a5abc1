//! Point-in-time health snapshots of the test suite

use crate::config::InfrastructureConfig;
use crate::maintenance::DependencyReport;
use crate::performance::PerformanceSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Snapshots kept in history
pub const HEALTH_HISTORY_LIMIT: usize = 100;

/// More conflicts than this make dependency health critical
const CRITICAL_CONFLICTS: usize = 5;

pub const TEST_EXECUTION: &str = "test_execution";
pub const PERFORMANCE: &str = "performance";
pub const DEPENDENCIES: &str = "dependencies";

/// Ordered so that the worst status compares greatest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    pub timestamp: DateTime<Utc>,
    pub overall: HealthStatus,
    pub components: BTreeMap<String, HealthStatus>,
    pub issues: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    pub max_failure_rate: f64,
    pub max_test_duration: Duration,
}

impl From<&InfrastructureConfig> for HealthThresholds {
    fn from(config: &InfrastructureConfig) -> Self {
        Self { max_failure_rate: config.max_failure_rate, max_test_duration: config.max_test_duration() }
    }
}

/// Worst of the component statuses; healthy when there are none
pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> HealthStatus {
    statuses.into_iter().copied().max().unwrap_or(HealthStatus::Healthy)
}

pub struct HealthChecker {
    thresholds: HealthThresholds,
    history: RwLock<VecDeque<HealthCheck>>,
}

impl HealthChecker {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds, history: RwLock::new(VecDeque::new()) }
    }

    /// Evaluate every component and record the snapshot
    pub async fn check(
        &self,
        summary: &PerformanceSummary,
        dependencies: Option<&DependencyReport>,
        now: DateTime<Utc>,
    ) -> HealthCheck {
        let mut components = BTreeMap::new();
        let mut issues = Vec::new();
        let mut metrics = BTreeMap::new();

        components.insert(TEST_EXECUTION.to_string(), self.test_execution(summary, &mut issues));
        components.insert(PERFORMANCE.to_string(), self.performance(summary, &mut issues));
        components.insert(DEPENDENCIES.to_string(), dependency_health(dependencies, &mut issues));

        metrics.insert("total_tests".to_string(), summary.total_tests as f64);
        metrics.insert("failure_rate".to_string(), summary.failure_rate);
        metrics.insert("average_duration_secs".to_string(), summary.average_duration.as_secs_f64());
        metrics.insert("slow_tests".to_string(), summary.slow_test_count as f64);
        if let Some(report) = dependencies {
            metrics.insert("dependency_conflicts".to_string(), report.conflicts.len() as f64);
            metrics.insert("vulnerabilities".to_string(), report.vulnerabilities.len() as f64);
        }

        let overall = aggregate(components.values());
        let check = HealthCheck { timestamp: now, overall, components, issues, metrics };

        match overall {
            HealthStatus::Healthy => debug!("Health check: healthy"),
            _ => warn!("Health check {:?}: {:?}", overall, check.issues),
        }

        let mut history = self.history.write().await;
        history.push_back(check.clone());
        while history.len() > HEALTH_HISTORY_LIMIT {
            history.pop_front();
        }
        check
    }

    fn test_execution(&self, summary: &PerformanceSummary, issues: &mut Vec<String>) -> HealthStatus {
        let rate = summary.failure_rate;
        let max = self.thresholds.max_failure_rate;
        if rate > max {
            issues.push(format!("Critical: failure rate {:.1}% exceeds {:.1}%", rate * 100.0, max * 100.0));
            HealthStatus::Critical
        } else if rate > max / 2.0 {
            issues.push(format!("Warning: failure rate {:.1}% is above half the limit", rate * 100.0));
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    fn performance(&self, summary: &PerformanceSummary, issues: &mut Vec<String>) -> HealthStatus {
        let mean = summary.average_duration;
        let max = self.thresholds.max_test_duration;
        if mean > max {
            issues.push(format!("Critical: mean test duration {:.2?} exceeds {:.2?}", mean, max));
            HealthStatus::Critical
        } else if mean > max.mul_f64(0.8) {
            issues.push(format!("Warning: mean test duration {:.2?} is near the {:.2?} limit", mean, max));
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    pub async fn history(&self) -> Vec<HealthCheck> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<HealthCheck> {
        self.history.read().await.back().cloned()
    }
}

fn dependency_health(report: Option<&DependencyReport>, issues: &mut Vec<String>) -> HealthStatus {
    let Some(report) = report else {
        return HealthStatus::Healthy;
    };
    let conflicts = report.conflicts.len();
    let vulnerable = report.vulnerabilities.len();
    if vulnerable > 0 || conflicts > CRITICAL_CONFLICTS {
        issues.push(format!("Critical: {} dependency conflicts, {} vulnerable modules", conflicts, vulnerable));
        HealthStatus::Critical
    } else if conflicts > 0 {
        issues.push(format!("Warning: {} dependency conflicts", conflicts));
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::{DependencyConflict, Vulnerability};
    use proptest::prelude::*;

    fn checker() -> HealthChecker {
        HealthChecker::new(HealthThresholds { max_failure_rate: 0.1, max_test_duration: Duration::from_secs(30) })
    }

    fn summary(failure_rate: f64, mean_secs: u64) -> PerformanceSummary {
        let mut summary = PerformanceSummary::empty(Utc::now());
        summary.total_tests = 20;
        summary.failure_rate = failure_rate;
        summary.average_duration = Duration::from_secs(mean_secs);
        summary
    }

    fn report(conflicts: usize, vulnerable: bool) -> DependencyReport {
        DependencyReport {
            module: "example.com/app".to_string(),
            go_version: None,
            dependencies: Vec::new(),
            conflicts: (0..conflicts)
                .map(|i| DependencyConflict { module: format!("m{}", i), versions: Vec::new(), reason: String::new() })
                .collect(),
            outdated: Vec::new(),
            vulnerabilities: if vulnerable {
                vec![Vulnerability {
                    path: "m".to_string(),
                    version: "v1.0.0".to_string(),
                    fixed_in: "v1.0.1".to_string(),
                    advisory: "GO-1".to_string(),
                }]
            } else {
                Vec::new()
            },
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_component_thresholds() {
        let checker = checker();
        let healthy = checker.check(&summary(0.0, 1), None, Utc::now()).await;
        assert_eq!(healthy.overall, HealthStatus::Healthy);
        assert!(healthy.issues.is_empty());

        let warning = checker.check(&summary(0.06, 25), Some(&report(1, false)), Utc::now()).await;
        assert_eq!(warning.components[TEST_EXECUTION], HealthStatus::Warning);
        assert_eq!(warning.components[PERFORMANCE], HealthStatus::Warning);
        assert_eq!(warning.components[DEPENDENCIES], HealthStatus::Warning);
        assert_eq!(warning.overall, HealthStatus::Warning);

        let critical = checker.check(&summary(0.0, 1), Some(&report(0, true)), Utc::now()).await;
        assert_eq!(critical.components[TEST_EXECUTION], HealthStatus::Healthy);
        assert_eq!(critical.overall, HealthStatus::Critical);

        let conflicts = checker.check(&summary(0.0, 1), Some(&report(6, false)), Utc::now()).await;
        assert_eq!(conflicts.components[DEPENDENCIES], HealthStatus::Critical);
        assert_eq!(checker.latest().await, Some(conflicts));
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let checker = checker();
        for _ in 0..(HEALTH_HISTORY_LIMIT + 5) {
            checker.check(&summary(0.0, 1), None, Utc::now()).await;
        }
        assert_eq!(checker.history().await.len(), HEALTH_HISTORY_LIMIT);
    }

    fn status() -> impl Strategy<Value = HealthStatus> {
        prop_oneof![Just(HealthStatus::Healthy), Just(HealthStatus::Warning), Just(HealthStatus::Critical)]
    }

    proptest! {
        #[test]
        fn prop_aggregate_precedence(statuses in proptest::collection::vec(status(), 0..8)) {
            let overall = aggregate(statuses.iter());
            if statuses.contains(&HealthStatus::Critical) {
                prop_assert_eq!(overall, HealthStatus::Critical);
            } else if statuses.contains(&HealthStatus::Warning) {
                prop_assert_eq!(overall, HealthStatus::Warning);
            } else {
                prop_assert_eq!(overall, HealthStatus::Healthy);
            }
        }
    }
}
