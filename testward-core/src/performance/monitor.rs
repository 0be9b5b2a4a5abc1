//! Rolling per-test metric histories and summaries

use super::{PerformanceBaseline, PerformanceMetric};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Samples kept per test name
pub const HISTORY_WINDOW: usize = 100;

/// At most this many tests are listed as slowest
const SLOWEST_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowTest {
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub generated_at: DateTime<Utc>,
    pub total_tests: usize,
    pub passing_tests: usize,
    pub failing_tests: usize,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub max_duration: Duration,
    pub failure_rate: f64,
    pub slow_test_count: usize,
    /// Slowest tests above the slow threshold, longest first
    pub slowest_tests: Vec<SlowTest>,
    pub failing_test_names: Vec<String>,
}

impl PerformanceSummary {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            total_tests: 0,
            passing_tests: 0,
            failing_tests: 0,
            total_duration: Duration::ZERO,
            average_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            failure_rate: 0.0,
            slow_test_count: 0,
            slowest_tests: Vec::new(),
            failing_test_names: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    histories: HashMap<String, VecDeque<PerformanceMetric>>,
    baselines: HashMap<String, PerformanceBaseline>,
    last_baseline_update: Option<DateTime<Utc>>,
}

pub struct PerformanceMonitor {
    slow_threshold: Duration,
    baseline_interval: Duration,
    state: RwLock<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(slow_threshold: Duration, baseline_interval: Duration) -> Self {
        Self { slow_threshold, baseline_interval, state: RwLock::new(MonitorState::default()) }
    }

    /// Append metrics, dropping the oldest samples beyond the window
    pub async fn add_metrics(&self, metrics: Vec<PerformanceMetric>) {
        let mut state = self.state.write().await;
        for metric in metrics {
            let history = state.histories.entry(metric.test_name.clone()).or_default();
            history.push_back(metric);
            while history.len() > HISTORY_WINDOW {
                history.pop_front();
            }
        }
    }

    pub async fn generate_summary(&self) -> PerformanceSummary {
        let state = self.state.read().await;
        let latest: Vec<&PerformanceMetric> = state.histories.values().filter_map(|h| h.back()).collect();
        summarize(&latest, self.slow_threshold, Utc::now())
    }

    /// Recompute baselines when the update interval has passed, or always when `force` is set.
    /// Returns the number of baselines written.
    pub async fn update_baselines(&self, now: DateTime<Utc>, force: bool) -> usize {
        let mut state = self.state.write().await;
        let due = match state.last_baseline_update {
            None => true,
            Some(last) => (now - last).to_std().map(|elapsed| elapsed >= self.baseline_interval).unwrap_or(false),
        };
        if !due && !force {
            return 0;
        }

        let baselines: HashMap<String, PerformanceBaseline> = state
            .histories
            .iter()
            .filter_map(|(name, history)| {
                let samples: Vec<PerformanceMetric> = history.iter().cloned().collect();
                PerformanceBaseline::from_samples(name, &samples, now).map(|b| (name.clone(), b))
            })
            .collect();
        let updated = baselines.len();
        state.baselines = baselines;
        state.last_baseline_update = Some(now);
        debug!("Updated {} performance baselines", updated);
        updated
    }

    pub async fn baselines(&self) -> HashMap<String, PerformanceBaseline> {
        self.state.read().await.baselines.clone()
    }

    /// Most recent sample of every test, ordered by test name
    pub async fn latest_metrics(&self) -> Vec<PerformanceMetric> {
        let state = self.state.read().await;
        let mut latest: Vec<PerformanceMetric> = state.histories.values().filter_map(|h| h.back().cloned()).collect();
        latest.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        latest
    }

    pub async fn history_len(&self, test_name: &str) -> usize {
        self.state.read().await.histories.get(test_name).map_or(0, VecDeque::len)
    }
}

/// Summary over the latest metric of each test
pub fn summarize(latest: &[&PerformanceMetric], slow_threshold: Duration, now: DateTime<Utc>) -> PerformanceSummary {
    let mut summary = PerformanceSummary::empty(now);
    if latest.is_empty() {
        return summary;
    }

    summary.total_tests = latest.len();
    summary.passing_tests = latest.iter().filter(|m| m.passed).count();
    summary.failing_tests = summary.total_tests - summary.passing_tests;
    summary.total_duration = latest.iter().map(|m| m.duration).sum();
    summary.average_duration = summary.total_duration / summary.total_tests as u32;
    summary.max_duration = latest.iter().map(|m| m.duration).max().unwrap_or_default();
    summary.failure_rate = summary.failing_tests as f64 / summary.total_tests as f64;

    let mut failing: Vec<String> = latest.iter().filter(|m| !m.passed).map(|m| m.test_name.clone()).collect();
    failing.sort();
    summary.failing_test_names = failing;

    let mut slow: Vec<SlowTest> = latest
        .iter()
        .filter(|m| m.duration > slow_threshold)
        .map(|m| SlowTest { name: m.test_name.clone(), duration: m.duration })
        .collect();
    summary.slow_test_count = slow.len();
    slow.sort_by(|a, b| b.duration.cmp(&a.duration).then_with(|| a.name.cmp(&b.name)));
    slow.truncate(SLOWEST_LIMIT);
    summary.slowest_tests = slow;

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn metric(name: &str, millis: u64, passed: bool) -> PerformanceMetric {
        PerformanceMetric::new(name, Duration::from_millis(millis), passed, Utc::now())
    }

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(Duration::from_secs(1), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let monitor = monitor();
        let metrics = (0..150).map(|i| metric("TestA", i, true)).collect();
        monitor.add_metrics(metrics).await;

        assert_eq!(monitor.history_len("TestA").await, HISTORY_WINDOW);
        monitor.update_baselines(Utc::now(), true).await;
        let baseline = &monitor.baselines().await["TestA"];
        assert_eq!(baseline.sample_size, HISTORY_WINDOW);
        assert_eq!(baseline.max_duration, Duration::from_millis(149));
        assert_eq!(monitor.latest_metrics().await[0].duration, Duration::from_millis(149));
    }

    #[tokio::test]
    async fn test_summary_uses_latest_metric() {
        let monitor = monitor();
        monitor.add_metrics(vec![metric("TestA", 3000, false), metric("TestA", 200, true), metric("TestB", 1500, false)]).await;

        let summary = monitor.generate_summary().await;
        assert_eq!(summary.total_tests, 2);
        assert_eq!(summary.passing_tests, 1);
        assert_eq!(summary.failing_tests, 1);
        assert_eq!(summary.average_duration, Duration::from_millis(850));
        assert_eq!(summary.slowest_tests, vec![SlowTest { name: "TestB".into(), duration: Duration::from_millis(1500) }]);
        assert_eq!(summary.failing_test_names, vec!["TestB".to_string()]);
    }

    #[tokio::test]
    async fn test_baselines_follow_interval() {
        let monitor = monitor();
        monitor.add_metrics(vec![metric("TestA", 100, true)]).await;

        let now = Utc::now();
        assert_eq!(monitor.update_baselines(now, false).await, 1);
        monitor.add_metrics(vec![metric("TestA", 300, true)]).await;
        assert_eq!(monitor.update_baselines(now + chrono::Duration::minutes(5), false).await, 0);
        assert_eq!(monitor.baselines().await["TestA"].sample_size, 1);

        assert_eq!(monitor.update_baselines(now + chrono::Duration::hours(2), false).await, 1);
        assert_eq!(monitor.baselines().await["TestA"].average_duration, Duration::from_millis(200));
    }

    proptest! {
        #[test]
        fn prop_slowest_tests_sorted_capped_and_slow(durations in proptest::collection::vec(0u64..5000, 0..40)) {
            let metrics: Vec<PerformanceMetric> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| metric(&format!("Test{}", i), *d, true))
                .collect();
            let latest: Vec<&PerformanceMetric> = metrics.iter().collect();
            let summary = summarize(&latest, Duration::from_secs(1), Utc::now());

            prop_assert_eq!(summary.failing_tests, 0);
            prop_assert!(summary.slowest_tests.len() <= 5);
            prop_assert!(summary.slowest_tests.iter().all(|t| t.duration > Duration::from_secs(1)));
            prop_assert!(summary.slowest_tests.windows(2).all(|w| w[0].duration >= w[1].duration));
            let expected = durations.iter().filter(|d| **d > 1000).count().min(5);
            prop_assert_eq!(summary.slowest_tests.len(), expected);
        }
    }
}
