//! Rule-based tuning of how the suite is executed
//!
//! Rules are data: a condition over the latest [`PerformanceSummary`] and an
//! action that adjusts the [`ExecutionSettings`] the runner uses next time.
//! The effect of an application is measured on the following run and feeds
//! the rule's success rate.

use super::{MaintenanceError, Result};
use crate::performance::{ExecutionSettings, PerformanceSummary};
use chrono::{DateTime, Utc};
use regex_utils::rule_condition;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Worker count used when parallel execution is enabled
const DEFAULT_PARALLELISM: u32 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleMetric {
    TotalDuration,
    AverageDuration,
    MaxDuration,
    FailureRate,
    SlowTestCount,
    TotalTests,
}

impl RuleMetric {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "total_duration" => Some(Self::TotalDuration),
            "average_duration" => Some(Self::AverageDuration),
            "max_duration" => Some(Self::MaxDuration),
            "failure_rate" => Some(Self::FailureRate),
            "slow_test_count" => Some(Self::SlowTestCount),
            "total_tests" => Some(Self::TotalTests),
            _ => None,
        }
    }

    /// Durations in seconds, rates as fractions
    pub fn value(self, summary: &PerformanceSummary) -> f64 {
        match self {
            Self::TotalDuration => summary.total_duration.as_secs_f64(),
            Self::AverageDuration => summary.average_duration.as_secs_f64(),
            Self::MaxDuration => summary.max_duration.as_secs_f64(),
            Self::FailureRate => summary.failure_rate,
            Self::SlowTestCount => summary.slow_test_count as f64,
            Self::TotalTests => summary.total_tests as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ParsedCondition {
    metric: RuleMetric,
    op: Comparator,
    threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl ParsedCondition {
    fn parse(rule: &str, condition: &str) -> Result<Self> {
        let invalid = || MaintenanceError::InvalidCondition { rule: rule.to_string(), condition: condition.to_string() };
        let caps = rule_condition::CONDITION.captures(condition).ok_or_else(invalid)?;

        let metric = RuleMetric::parse(&caps[1]).ok_or_else(|| MaintenanceError::UnknownMetric(caps[1].to_string()))?;
        let op = match &caps[2] {
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            "==" => Comparator::Eq,
            _ => Comparator::Ne,
        };
        let value: f64 = caps[3].parse().map_err(|_| invalid())?;
        let threshold = match caps.get(4).map(|m| m.as_str()) {
            Some("ms") => value / 1000.0,
            Some("m") => value * 60.0,
            Some("%") => value / 100.0,
            _ => value,
        };
        Ok(Self { metric, op, threshold })
    }

    fn holds(&self, summary: &PerformanceSummary) -> bool {
        let value = self.metric.value(summary);
        match self.op {
            Comparator::Gt => value > self.threshold,
            Comparator::Ge => value >= self.threshold,
            Comparator::Lt => value < self.threshold,
            Comparator::Le => value <= self.threshold,
            Comparator::Eq => (value - self.threshold).abs() < f64::EPSILON,
            Comparator::Ne => (value - self.threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAction {
    EnableParallelExecution,
    EnableFailFast,
    EnableShortMode,
    IncreaseTimeout,
}

impl OptimizationAction {
    /// The metric an application of this action is expected to move
    pub fn target_metric(self) -> RuleMetric {
        match self {
            Self::IncreaseTimeout => RuleMetric::FailureRate,
            _ => RuleMetric::TotalDuration,
        }
    }

    /// Adjust `settings`; false when they already reflect the action
    fn apply(self, settings: &mut ExecutionSettings, summary: &PerformanceSummary) -> bool {
        match self {
            Self::EnableParallelExecution => {
                if settings.parallel.is_some() {
                    return false;
                }
                let workers = std::thread::available_parallelism()
                    .map(|n| n.get() as u32)
                    .unwrap_or(DEFAULT_PARALLELISM);
                settings.parallel = Some(workers.max(2));
                true
            }
            Self::EnableFailFast => !std::mem::replace(&mut settings.fail_fast, true),
            Self::EnableShortMode => !std::mem::replace(&mut settings.short, true),
            Self::IncreaseTimeout => {
                let wanted = (summary.max_duration * 2).max(Duration::from_secs(60));
                if settings.timeout.is_some_and(|current| current >= wanted) {
                    return false;
                }
                settings.timeout = Some(wanted);
                true
            }
        }
    }

    /// Expected value of the target metric after applying
    fn project(self, before: f64, settings: &ExecutionSettings, summary: &PerformanceSummary) -> f64 {
        match self {
            Self::EnableParallelExecution => {
                let workers = settings.parallel.unwrap_or(1).max(1) as f64;
                before / workers.min(summary.total_tests.max(1) as f64)
            }
            Self::EnableFailFast => before * (1.0 - summary.failure_rate),
            Self::EnableShortMode => {
                let slow: f64 = summary.slowest_tests.iter().map(|t| t.duration.as_secs_f64()).sum();
                (before - slow).max(0.0)
            }
            Self::IncreaseTimeout => before,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationRule {
    pub id: String,
    pub name: String,
    /// `<metric> <op> <value>[unit]`, e.g. `total_duration > 30s`
    pub condition: String,
    pub action: OptimizationAction,
    /// Higher runs first
    pub priority: u32,
    pub enabled: bool,
    /// Fraction of measured applications that improved the target metric
    pub success_rate: f64,
    pub applications: u32,
    #[serde(default)]
    pub measured: u32,
}

impl OptimizationRule {
    pub fn new(id: &str, name: &str, condition: &str, action: OptimizationAction, priority: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            condition: condition.to_string(),
            action,
            priority,
            enabled: true,
            success_rate: 0.0,
            applications: 0,
            measured: 0,
        }
    }
}

fn default_rules() -> Vec<OptimizationRule> {
    vec![
        OptimizationRule::new(
            "parallel-execution",
            "Enable parallel execution",
            "total_duration > 30s",
            OptimizationAction::EnableParallelExecution,
            100,
        ),
        OptimizationRule::new(
            "fail-fast",
            "Stop at the first failure",
            "failure_rate > 20%",
            OptimizationAction::EnableFailFast,
            80,
        ),
        OptimizationRule::new(
            "short-mode",
            "Skip long-running tests",
            "slow_test_count > 3",
            OptimizationAction::EnableShortMode,
            60,
        ),
        OptimizationRule::new(
            "increase-timeout",
            "Raise the test timeout",
            "max_duration > 60s",
            OptimizationAction::IncreaseTimeout,
            40,
        ),
    ]
}

/// One application of a rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationResult {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub action: OptimizationAction,
    pub metric: RuleMetric,
    pub before: f64,
    pub projected_after: f64,
    pub improvement_percent: f64,
    pub applied_at: DateTime<Utc>,
    /// Filled in by the run after the one that applied the rule
    pub measured_after: Option<f64>,
    pub measured_improvement_percent: Option<f64>,
}

fn improvement(before: f64, after: f64) -> f64 {
    if before > 0.0 { (before - after) / before * 100.0 } else { 0.0 }
}

#[derive(Debug, Default)]
struct OptimizerState {
    rules: Vec<OptimizationRule>,
    settings: ExecutionSettings,
    results: Vec<OptimizationResult>,
    /// Indices into `results` awaiting measurement
    pending: Vec<usize>,
}

pub struct OptimizationEngine {
    state: RwLock<OptimizerState>,
}

impl OptimizationEngine {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<OptimizationRule>) -> Self {
        let mut rules = rules;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { state: RwLock::new(OptimizerState { rules, ..Default::default() }) }
    }

    /// Register a rule after checking its condition parses
    pub async fn add_rule(&self, rule: OptimizationRule) -> Result<()> {
        ParsedCondition::parse(&rule.id, &rule.condition)?;
        let mut state = self.state.write().await;
        if state.rules.iter().any(|r| r.id == rule.id) {
            return Err(MaintenanceError::DuplicateRule(rule.id));
        }
        let position = state.rules.iter().position(|r| r.priority < rule.priority).unwrap_or(state.rules.len());
        state.rules.insert(position, rule);
        Ok(())
    }

    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut state = self.state.write().await;
        match state.rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Measure previous applications against `summary`, then apply every
    /// enabled rule whose condition holds. Returns this run's applications.
    pub async fn run_optimizations(&self, summary: &PerformanceSummary) -> Vec<OptimizationResult> {
        let mut state = self.state.write().await;
        let state = &mut *state;

        if summary.total_tests > 0 {
            for index in std::mem::take(&mut state.pending) {
                let Some(result) = state.results.get_mut(index) else { continue };
                let after = result.metric.value(summary);
                let measured = improvement(result.before, after);
                result.measured_after = Some(after);
                result.measured_improvement_percent = Some(measured);

                if let Some(rule) = state.rules.iter_mut().find(|r| r.id == result.rule_id) {
                    let success = if after < result.before { 1.0 } else { 0.0 };
                    rule.success_rate = (rule.success_rate * rule.measured as f64 + success) / (rule.measured + 1) as f64;
                    rule.measured += 1;
                    debug!("Rule {} measured {:.1}% improvement", rule.id, measured);
                }
            }
        }

        let mut applied = Vec::new();
        for rule in state.rules.iter_mut().filter(|r| r.enabled) {
            let condition = match ParsedCondition::parse(&rule.id, &rule.condition) {
                Ok(condition) => condition,
                Err(e) => {
                    warn!("Skipping rule: {}", e);
                    continue;
                }
            };
            if !condition.holds(summary) || !rule.action.apply(&mut state.settings, summary) {
                continue;
            }

            let metric = rule.action.target_metric();
            let before = metric.value(summary);
            let projected_after = rule.action.project(before, &state.settings, summary);
            rule.applications += 1;
            info!("Applied optimization rule {} ({})", rule.id, rule.condition);

            applied.push(OptimizationResult {
                id: Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                action: rule.action,
                metric,
                before,
                projected_after,
                improvement_percent: improvement(before, projected_after),
                applied_at: Utc::now(),
                measured_after: None,
                measured_improvement_percent: None,
            });
        }

        for result in &applied {
            state.pending.push(state.results.len());
            state.results.push(result.clone());
        }
        applied
    }

    /// Settings the runner should use next
    pub async fn settings(&self) -> ExecutionSettings {
        self.state.read().await.settings.clone()
    }

    pub async fn rules(&self) -> Vec<OptimizationRule> {
        self.state.read().await.rules.clone()
    }

    /// Every application so far, with measurements where available
    pub async fn results(&self) -> Vec<OptimizationResult> {
        self.state.read().await.results.clone()
    }
}

impl Default for OptimizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::SlowTest;

    fn summary(total_secs: u64, failure_rate: f64) -> PerformanceSummary {
        let mut summary = PerformanceSummary::empty(Utc::now());
        summary.total_tests = 10;
        summary.total_duration = Duration::from_secs(total_secs);
        summary.average_duration = Duration::from_secs(total_secs) / 10;
        summary.max_duration = Duration::from_secs(total_secs / 2);
        summary.failure_rate = failure_rate;
        summary
    }

    #[test]
    fn test_condition_units() {
        let condition = ParsedCondition::parse("r", "total_duration > 30s").unwrap();
        assert!(condition.holds(&summary(31, 0.0)));
        assert!(!condition.holds(&summary(30, 0.0)));

        let rate = ParsedCondition::parse("r", "failure_rate >= 20%").unwrap();
        assert_eq!(rate.threshold, 0.2);
        let minutes = ParsedCondition::parse("r", "max_duration > 2m").unwrap();
        assert_eq!(minutes.threshold, 120.0);

        assert!(matches!(
            ParsedCondition::parse("r", "duration is long"),
            Err(MaintenanceError::InvalidCondition { .. })
        ));
        assert!(matches!(ParsedCondition::parse("r", "coverage > 5"), Err(MaintenanceError::UnknownMetric(_))));
    }

    #[tokio::test]
    async fn test_parallel_rule_applies_once_and_is_measured() {
        let engine = OptimizationEngine::new();

        let applied = engine.run_optimizations(&summary(40, 0.0)).await;
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].rule_id, "parallel-execution");
        assert_eq!(applied[0].before, 40.0);
        assert!(applied[0].improvement_percent > 0.0);
        assert!(engine.settings().await.parallel.is_some());

        let second = engine.run_optimizations(&summary(20, 0.0)).await;
        assert!(second.is_empty());

        let results = engine.results().await;
        assert_eq!(results[0].measured_after, Some(20.0));
        assert_eq!(results[0].measured_improvement_percent, Some(50.0));
        let rule = engine.rules().await.into_iter().find(|r| r.id == "parallel-execution").unwrap();
        assert_eq!(rule.applications, 1);
        assert_eq!(rule.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_rules_run_in_priority_order() {
        let engine = OptimizationEngine::new();
        let mut slow = summary(120, 0.5);
        slow.slow_test_count = 4;
        slow.slowest_tests = vec![SlowTest { name: "TestBig".into(), duration: Duration::from_secs(50) }];

        let applied = engine.run_optimizations(&slow).await;
        let ids: Vec<&str> = applied.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["parallel-execution", "fail-fast", "short-mode"]);

        let settings = engine.settings().await;
        assert!(settings.fail_fast);
        assert!(settings.short);
        assert_eq!(applied[2].projected_after, 70.0);
    }

    #[tokio::test]
    async fn test_custom_rules_and_disable() {
        let engine = OptimizationEngine::with_rules(Vec::new());
        engine
            .add_rule(OptimizationRule::new("timeout", "Timeout", "max_duration > 10s", OptimizationAction::IncreaseTimeout, 1))
            .await
            .unwrap();
        let duplicate = OptimizationRule::new("timeout", "Again", "max_duration > 1s", OptimizationAction::IncreaseTimeout, 1);
        assert!(matches!(engine.add_rule(duplicate).await, Err(MaintenanceError::DuplicateRule(_))));

        assert!(engine.set_enabled("timeout", false).await);
        assert!(engine.run_optimizations(&summary(100, 0.0)).await.is_empty());

        engine.set_enabled("timeout", true).await;
        let applied = engine.run_optimizations(&summary(100, 0.0)).await;
        assert_eq!(applied.len(), 1);
        assert_eq!(engine.settings().await.timeout, Some(Duration::from_secs(100)));
    }
}
