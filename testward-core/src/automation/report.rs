//! Maintenance reports and trends across them

use crate::maintenance::{ActionStatus, DependencyReport, MaintenanceAction, OptimizationResult};
use crate::performance::{PerformanceSummary, RegressionAlert};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Reports kept in history
pub const REPORT_HISTORY_LIMIT: usize = 100;

/// Relative change over the window that still counts as stable
const STABLE_PERCENT: f64 = 5.0;

/// Fewest data points a trend is computed from
const MIN_TREND_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricTrend {
    pub direction: TrendDirection,
    /// Change per report
    pub slope: f64,
    /// Fitted change across the window relative to its mean
    pub change_percent: f64,
}

impl MetricTrend {
    fn unknown() -> Self {
        Self { direction: TrendDirection::Unknown, slope: 0.0, change_percent: 0.0 }
    }

    /// Trend of a metric where lower values are better
    fn lower_is_better(values: &[f64]) -> Self {
        if values.len() < MIN_TREND_POINTS {
            return Self::unknown();
        }
        let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        let (slope, _) = linear_regression(&x, values);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let change_percent = if mean > 0.0 { slope * (values.len() - 1) as f64 / mean * 100.0 } else { 0.0 };

        let direction = if change_percent.abs() < STABLE_PERCENT {
            TrendDirection::Stable
        } else if change_percent < 0.0 {
            TrendDirection::Improving
        } else {
            TrendDirection::Declining
        };
        Self { direction, slope, change_percent }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendAnalysis {
    pub average_duration: MetricTrend,
    pub failure_rate: MetricTrend,
    pub samples: usize,
}

/// Least-squares fit, returns `(slope, intercept)`
fn linear_regression(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;

    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
    let sum_x2: f64 = x.iter().map(|a| a * a).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return (0.0, sum_y / n);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    (slope, intercept)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureReport {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: PerformanceSummary,
    pub actions: Vec<MaintenanceAction>,
    /// Unresolved alerts at the time of the report
    pub alerts: Vec<RegressionAlert>,
    pub optimizations: Vec<OptimizationResult>,
    pub recommendations: Vec<String>,
    pub trend: TrendAnalysis,
    pub errors: Vec<String>,
    pub dependency_report: Option<DependencyReport>,
}

/// Everything one maintenance cycle produced
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub summary: PerformanceSummary,
    pub actions: Vec<MaintenanceAction>,
    pub alerts: Vec<RegressionAlert>,
    pub optimizations: Vec<OptimizationResult>,
    pub dependency_report: Option<DependencyReport>,
    pub errors: Vec<String>,
}

pub struct ReportGenerator {
    reports: RwLock<VecDeque<InfrastructureReport>>,
}

impl ReportGenerator {
    pub fn new() -> Self {
        Self { reports: RwLock::new(VecDeque::new()) }
    }

    /// Assemble, store and return the report for a cycle
    pub async fn generate(&self, outcome: CycleOutcome, now: DateTime<Utc>) -> InfrastructureReport {
        let mut reports = self.reports.write().await;

        let mut durations: Vec<f64> = reports.iter().map(|r| r.summary.average_duration.as_secs_f64()).collect();
        let mut failures: Vec<f64> = reports.iter().map(|r| r.summary.failure_rate).collect();
        durations.push(outcome.summary.average_duration.as_secs_f64());
        failures.push(outcome.summary.failure_rate);
        let trend = TrendAnalysis {
            average_duration: MetricTrend::lower_is_better(&durations),
            failure_rate: MetricTrend::lower_is_better(&failures),
            samples: durations.len(),
        };

        let recommendations = recommendations(&outcome, &trend);
        let report = InfrastructureReport {
            id: Uuid::new_v4().to_string(),
            generated_at: now,
            summary: outcome.summary,
            actions: outcome.actions,
            alerts: outcome.alerts,
            optimizations: outcome.optimizations,
            recommendations,
            trend,
            errors: outcome.errors,
            dependency_report: outcome.dependency_report,
        };
        info!(
            "Report {}: {} actions, {} open alerts, {} recommendations",
            report.id,
            report.actions.len(),
            report.alerts.len(),
            report.recommendations.len()
        );

        reports.push_back(report.clone());
        while reports.len() > REPORT_HISTORY_LIMIT {
            reports.pop_front();
        }
        report
    }

    pub async fn reports(&self) -> Vec<InfrastructureReport> {
        self.reports.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<InfrastructureReport> {
        self.reports.read().await.back().cloned()
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn recommendations(outcome: &CycleOutcome, trend: &TrendAnalysis) -> Vec<String> {
    let mut out = Vec::new();

    for alert in &outcome.alerts {
        out.push(format!(
            "Investigate {:?} regression in {}: {:.1}% worse than baseline ({:?})",
            alert.regression_type, alert.test_name, alert.regression_percent, alert.severity
        ));
    }
    for name in &outcome.summary.failing_test_names {
        out.push(format!("Fix failing test {}", name));
    }
    for slow in &outcome.summary.slowest_tests {
        out.push(format!("Speed up slow test {} ({:.2?})", slow.name, slow.duration));
    }
    for action in outcome.actions.iter().filter(|a| a.status == ActionStatus::Failed) {
        out.push(format!(
            "Maintenance of {} failed: {}",
            action.target,
            action.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if let Some(report) = &outcome.dependency_report {
        for conflict in &report.conflicts {
            out.push(format!("Resolve dependency conflict in {}: {}", conflict.module, conflict.reason));
        }
        for vulnerability in &report.vulnerabilities {
            out.push(format!(
                "Upgrade {} from {} to {} or later ({})",
                vulnerability.path, vulnerability.version, vulnerability.fixed_in, vulnerability.advisory
            ));
        }
        for outdated in &report.outdated {
            out.push(format!("Update {} ({} days old)", outdated.path, outdated.age_days));
        }
    }
    for error in &outcome.errors {
        out.push(format!("Resolve maintenance error: {}", error));
    }
    if trend.average_duration.direction == TrendDirection::Declining {
        out.push(format!(
            "Mean test duration is trending up ({:+.1}% across recent reports)",
            trend.average_duration.change_percent
        ));
    }
    if trend.failure_rate.direction == TrendDirection::Declining {
        out.push("Failure rate is trending up across recent reports".to_string());
    }
    out
}
