//! Runs the project's test command and turns its output into metrics

use super::{PerformanceMetric, Result, RunnerError};
use chrono::{DateTime, Utc};
use regex_utils::test_output::{self, Outcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runner flags chosen by the optimization engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSettings {
    /// `-parallel N`
    pub parallel: Option<u32>,
    /// `-failfast`
    pub fail_fast: bool,
    /// `-short`
    pub short: bool,
    /// `-timeout`
    pub timeout: Option<Duration>,
}

impl ExecutionSettings {
    /// Flags appended to a `go test` invocation
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(parallel) = self.parallel {
            flags.push("-parallel".to_string());
            flags.push(parallel.to_string());
        }
        if self.fail_fast {
            flags.push("-failfast".to_string());
        }
        if self.short {
            flags.push("-short".to_string());
        }
        if let Some(timeout) = self.timeout {
            flags.push("-timeout".to_string());
            flags.push(format!("{}s", timeout.as_secs().max(1)));
        }
        flags
    }
}

/// Outcome of one invocation of the test command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunOutput {
    pub metrics: Vec<PerformanceMetric>,
    pub skipped: usize,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub wall_time: Duration,
    pub stderr: String,
}

pub struct TestRunner {
    command: Vec<String>,
    project_root: PathBuf,
    hard_timeout: Option<Duration>,
}

impl TestRunner {
    pub fn new(command: Vec<String>, project_root: impl Into<PathBuf>) -> Self {
        Self { command, project_root: project_root.into(), hard_timeout: None }
    }

    /// Kill the command if it runs longer than `limit`
    pub fn with_hard_timeout(mut self, limit: Duration) -> Self {
        self.hard_timeout = Some(limit);
        self
    }

    fn is_go_test(&self) -> bool {
        let program = self.command.first().map(String::as_str).unwrap_or_default();
        program.rsplit('/').next() == Some("go") && self.command.get(1).map(String::as_str) == Some("test")
    }

    /// Run the suite. A non-zero exit is not an error: whatever the command
    /// printed is still parsed.
    pub async fn run(&self, settings: &ExecutionSettings) -> Result<TestRunOutput> {
        let (program, args) = self.command.split_first().ok_or(RunnerError::NoCommand)?;
        let mut args: Vec<String> = args.to_vec();
        if self.is_go_test() {
            args.extend(settings.flags());
        } else if *settings != ExecutionSettings::default() {
            debug!("Execution settings only apply to `go test`; running {} unchanged", program);
        }

        info!("Running tests: {} {}", program, args.join(" "));
        let start = Instant::now();

        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(&self.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.output();

        let output = match self.hard_timeout {
            Some(limit) => tokio::time::timeout(limit, child).await.map_err(|_| RunnerError::TimedOut(limit))?,
            None => child.await,
        }
        .map_err(|source| RunnerError::Spawn { program: program.clone(), source })?;

        let wall_time = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let (metrics, skipped) = parse_output(&stdout, Utc::now());

        if !output.status.success() {
            warn!(
                "Test command exited with {:?}; parsed {} results",
                output.status.code(),
                metrics.len()
            );
        }

        Ok(TestRunOutput {
            metrics,
            skipped,
            exit_code: output.status.code(),
            success: output.status.success(),
            wall_time,
            stderr,
        })
    }
}

/// Parse `go test -v` output into metrics and a count of skipped tests.
/// Benchmark lines become metrics in the `benchmark` suite with ns/op as
/// duration and B/op as memory.
pub fn parse_output(output: &str, timestamp: DateTime<Utc>) -> (Vec<PerformanceMetric>, usize) {
    let mut metrics = Vec::new();
    let mut skipped = 0;
    let mut last_failure: Vec<String> = Vec::new();

    for line in output.lines() {
        if let Some(result) = test_output::parse_line(line) {
            let duration = Duration::from_micros((result.seconds * 1_000_000.0).round() as u64);
            match result.outcome {
                Outcome::Skip => skipped += 1,
                Outcome::Pass => metrics.push(PerformanceMetric::new(result.name, duration, true, timestamp)),
                Outcome::Fail => {
                    let mut metric = PerformanceMetric::new(result.name, duration, false, timestamp);
                    if !last_failure.is_empty() {
                        metric.error = Some(last_failure.join("\n"));
                    }
                    metrics.push(metric);
                }
            }
            last_failure.clear();
        } else if let Some(bench) = test_output::parse_benchmark(line) {
            let mut metric = PerformanceMetric::new(
                bench.name,
                Duration::from_nanos(bench.ns_per_op.round() as u64),
                true,
                timestamp,
            );
            metric.suite = "benchmark".to_string();
            metric.memory_bytes = bench.bytes_per_op.map_or(0, |b| b.round() as u64);
            metrics.push(metric);
        } else if line.starts_with("    ") && line.trim_start().contains(".go:") {
            last_failure.push(line.trim().to_string());
        } else if line.starts_with("=== RUN") {
            last_failure.clear();
        }
    }

    (metrics, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_pass_and_fail() {
        let (metrics, skipped) = parse_output("--- PASS: TestExample (0.12s)\n--- FAIL: TestFailing (0.08s)\n", Utc::now());
        assert_eq!(skipped, 0);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].test_name, "TestExample");
        assert!(metrics[0].passed);
        assert_eq!(metrics[0].duration, Duration::from_millis(120));
        assert_eq!(metrics[1].test_name, "TestFailing");
        assert!(!metrics[1].passed);
        assert_eq!(metrics[1].duration, Duration::from_millis(80));
    }

    #[test]
    fn test_parse_subtests_skips_and_failure_detail() {
        let output = "=== RUN   TestCart\n\
                      === RUN   TestCart/empty\n\
                      \x20   cart_test.go:14: expected an error, got nil\n\
                      \x20   --- FAIL: TestCart/empty (0.00s)\n\
                      --- FAIL: TestCart (0.01s)\n\
                      --- SKIP: TestSlow (0.00s)\n\
                      BenchmarkAdd-8   1000000   1050 ns/op   64 B/op\n\
                      FAIL\n";
        let (metrics, skipped) = parse_output(output, Utc::now());
        assert_eq!(skipped, 1);
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].suite, "TestCart");
        assert_eq!(metrics[0].error.as_deref(), Some("cart_test.go:14: expected an error, got nil"));
        assert_eq!(metrics[1].suite, "default");
        assert_eq!(metrics[2].suite, "benchmark");
        assert_eq!(metrics[2].memory_bytes, 64);
        assert_eq!(metrics[2].duration, Duration::from_nanos(1050));
    }

    #[test]
    fn test_settings_flags() {
        let settings = ExecutionSettings {
            parallel: Some(8),
            fail_fast: true,
            short: false,
            timeout: Some(Duration::from_secs(120)),
        };
        assert_eq!(settings.flags(), vec!["-parallel", "8", "-failfast", "-timeout", "120s"]);
        assert!(ExecutionSettings::default().flags().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_yields_metrics() {
        let dir = TempDir::new().unwrap();
        let runner = TestRunner::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf '%s\\n' '--- PASS: TestOk (0.50s)' '--- FAIL: TestBad (0.25s)'; exit 1".to_string(),
            ],
            dir.path(),
        );
        let output = runner.run(&ExecutionSettings::default()).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.metrics.len(), 2);
        assert_eq!(output.metrics[1].duration, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let runner = TestRunner::new(Vec::new(), ".");
        assert!(matches!(runner.run(&ExecutionSettings::default()).await, Err(RunnerError::NoCommand)));
    }
}
