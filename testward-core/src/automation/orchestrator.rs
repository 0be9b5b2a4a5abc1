//! Lifecycle and background loops of the self-maintaining infrastructure

use super::health::{HealthCheck, HealthChecker, HealthThresholds};
use super::report::{CycleOutcome, InfrastructureReport, ReportGenerator};
use super::scheduler::{AutomationScheduler, ExecutionOutcome, ScheduledTask, TaskType};
use super::{InfraError, Result};
use crate::config::InfrastructureConfig;
use crate::maintenance::{DependencyAnalyzer, MaintenanceAction, OptimizationEngine, TestMaintainer};
use crate::performance::{
    PerformanceMonitor, PerformanceSummary, RegressionAlert, RegressionDetector, RegressionType, TestRunner,
};
use crate::test_gen::{GenerationResult, SynthesisConfig, TestSynthesizer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Cadence of the scheduler loop
const SCHEDULER_TICK: Duration = Duration::from_secs(60);

/// Snapshot returned by [`SelfMaintainingTestInfrastructure::get_current_status`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureStatus {
    pub running: bool,
    pub health: HealthCheck,
    pub summary: PerformanceSummary,
    pub unresolved_alerts: Vec<RegressionAlert>,
    pub scheduled_tasks: Vec<ScheduledTask>,
    pub last_report_at: Option<DateTime<Utc>>,
    pub maintenance_actions: usize,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

/// Components shared by the loops and the caller
struct Engine {
    config: InfrastructureConfig,
    runner: TestRunner,
    monitor: PerformanceMonitor,
    detector: RegressionDetector,
    maintainer: TestMaintainer,
    optimizer: OptimizationEngine,
    dependencies: DependencyAnalyzer,
    health: HealthChecker,
    scheduler: AutomationScheduler,
    reports: ReportGenerator,
    synthesizer: TestSynthesizer,
    /// Serializes work that edits the project's files
    file_work: Mutex<()>,
}

pub struct SelfMaintainingTestInfrastructure {
    engine: Arc<Engine>,
    lifecycle: Mutex<Lifecycle>,
}

impl SelfMaintainingTestInfrastructure {
    pub fn new(config: InfrastructureConfig) -> Result<Self> {
        config.validate()?;

        let runner = TestRunner::new(config.test_command.clone(), config.project_root.clone())
            .with_hard_timeout(config.maintenance_interval().max(config.max_test_duration() * 10));
        let engine = Engine {
            runner,
            monitor: PerformanceMonitor::new(config.slow_test_threshold(), config.baseline_update_interval()),
            detector: RegressionDetector::new(config.regression_threshold, config.min_baseline_samples),
            maintainer: TestMaintainer::new(&config),
            optimizer: OptimizationEngine::new(),
            dependencies: DependencyAnalyzer::new(
                config.project_root.clone(),
                config.stale_dependency_days,
                config.advisories.clone(),
            ),
            health: HealthChecker::new(HealthThresholds::from(&config)),
            scheduler: AutomationScheduler::with_tasks(AutomationScheduler::default_tasks(&config, Utc::now())),
            reports: ReportGenerator::new(),
            synthesizer: TestSynthesizer::new(SynthesisConfig::from(&config)),
            file_work: Mutex::new(()),
            config,
        };

        Ok(Self { engine: Arc::new(engine), lifecycle: Mutex::new(Lifecycle::default()) })
    }

    pub fn config(&self) -> &InfrastructureConfig {
        &self.engine.config
    }

    /// Spawn the maintenance, health and scheduler loops
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.cancel.is_some() {
            return Err(InfraError::AlreadyRunning);
        }

        let (cancel, signal) = watch::channel(false);
        let config = &self.engine.config;
        lifecycle.handles = vec![
            spawn_loop("maintenance", config.maintenance_interval(), self.engine.clone(), signal.clone(), |engine| async move {
                engine.run_cycle().await;
            }),
            spawn_loop("health", config.health_check_interval(), self.engine.clone(), signal.clone(), |engine| async move {
                engine.check_health().await;
            }),
            spawn_loop("scheduler", SCHEDULER_TICK, self.engine.clone(), signal, |engine| async move {
                engine.run_due_tasks().await;
            }),
        ];
        lifecycle.cancel = Some(cancel);

        info!("Started self-maintaining test infrastructure for {}", config.project_root.display());
        Ok(())
    }

    /// Signal the loops and wait for them. A cycle already in progress finishes first.
    /// The lifecycle lock is released before joining, so status calls stay responsive.
    pub async fn stop(&self) -> Result<()> {
        let handles = {
            let mut lifecycle = self.lifecycle.lock().await;
            let Some(cancel) = lifecycle.cancel.take() else {
                return Err(InfraError::NotRunning);
            };
            // receivers may already be gone if a loop exited on its own
            let _ = cancel.send(true);
            std::mem::take(&mut lifecycle.handles)
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background loop ended abnormally: {}", e);
            }
        }
        info!("Stopped self-maintaining test infrastructure");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.cancel.is_some()
    }

    /// Run one full maintenance cycle now
    pub async fn run_maintenance(&self) -> InfrastructureReport {
        self.engine.run_cycle().await
    }

    /// Take a fresh health snapshot and gather the current state
    pub async fn get_current_status(&self) -> InfrastructureStatus {
        let running = self.is_running().await;
        let health = self.engine.check_health().await;
        InfrastructureStatus {
            running,
            health,
            summary: self.engine.monitor.generate_summary().await,
            unresolved_alerts: self.engine.detector.unresolved().await,
            scheduled_tasks: self.engine.scheduler.tasks().await,
            last_report_at: self.engine.reports.latest().await.map(|r| r.generated_at),
            maintenance_actions: self.engine.maintainer.history().await.len(),
        }
    }

    /// Generate tests for a file or every source file below a directory
    pub async fn generate_tests(&self, path: &Path) -> GenerationResult {
        if path.is_dir() {
            self.engine.synthesizer.generate_for_dir(path).await
        } else {
            self.engine.synthesizer.generate_for_file(path).await
        }
    }

    pub async fn reports(&self) -> Vec<InfrastructureReport> {
        self.engine.reports.reports().await
    }

    pub async fn health_history(&self) -> Vec<HealthCheck> {
        self.engine.health.history().await
    }

    pub async fn maintenance_history(&self) -> Vec<MaintenanceAction> {
        self.engine.maintainer.history().await
    }

    pub async fn task_executions(&self) -> Vec<super::TaskExecution> {
        self.engine.scheduler.executions().await
    }
}

/// Run `tick` every `period` until cancelled. The first tick fires one
/// period after start; a tick in progress is never interrupted.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    engine: Arc<Engine>,
    mut cancel: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Engine>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        debug!("{} loop running every {:?}", name, period);

        loop {
            tokio::select! {
                _ = cancel.changed() => break,
                _ = ticker.tick() => {
                    if *cancel.borrow() {
                        break;
                    }
                    tick(engine.clone()).await;
                }
            }
        }
        debug!("{} loop stopped", name);
    })
}

impl Engine {
    /// Collect, detect, maintain, optimize, audit dependencies, report.
    /// Each stage consumes the previous stage's output.
    async fn run_cycle(&self) -> InfrastructureReport {
        info!("Starting maintenance cycle");
        let now = Utc::now();
        let mut errors = Vec::new();

        let settings = self.optimizer.settings().await;
        match self.runner.run(&settings).await {
            Ok(output) => {
                if output.metrics.is_empty() && !output.success {
                    let detail = output.stderr.lines().next().unwrap_or("no output").to_string();
                    errors.push(format!(
                        "test command exited with {:?} without reporting results: {}",
                        output.exit_code, detail
                    ));
                }
                self.monitor.add_metrics(output.metrics).await;
            }
            Err(e) => errors.push(format!("test run failed: {}", e)),
        }

        // compare against the baselines as they stood before this run
        let baselines = self.monitor.baselines().await;
        let latest = self.monitor.latest_metrics().await;
        let raised = self.detector.detect(&baselines, &latest, now).await;
        self.monitor.update_baselines(Utc::now(), false).await;
        let summary = self.monitor.generate_summary().await;

        let actions = {
            let _guard = self.file_work.lock().await;
            let mut actions = Vec::new();
            if self.config.auto_optimize_slow_tests {
                actions.extend(self.optimize_slow_tests(&summary).await);
            }
            if self.config.auto_cleanup_obsolete_tests {
                actions.extend(self.maintainer.cleanup_obsolete_tests().await);
            }
            if self.config.auto_generate_missing_tests {
                actions.extend(self.maintainer.generate_missing_tests().await);
            }
            actions
        };

        let optimizations = self.optimizer.run_optimizations(&summary).await;

        let dependency_report = match self.dependencies.analyze(now).await {
            Ok(report) => Some(report),
            Err(e) => {
                errors.push(format!("dependency analysis failed: {}", e));
                None
            }
        };

        let alerts = self.detector.unresolved().await;
        let report = self
            .reports
            .generate(
                CycleOutcome { summary, actions, alerts, optimizations, dependency_report, errors },
                Utc::now(),
            )
            .await;
        info!("Maintenance cycle finished: {} new alerts, {} errors", raised.len(), report.errors.len());
        report
    }

    /// Parallelize each slow test and resolve its duration alert when the file changed
    async fn optimize_slow_tests(&self, summary: &PerformanceSummary) -> Vec<MaintenanceAction> {
        let mut actions = Vec::new();
        for slow in summary.slowest_tests.iter().filter(|t| !t.name.starts_with("Benchmark")) {
            let action = self.maintainer.optimize_slow_test(&slow.name).await;
            if action.is_completed() && !action.changes.is_empty() && !self.config.dry_run {
                let note = format!("parallelized by maintenance action {}", action.id);
                self.detector.resolve(&slow.name, RegressionType::Duration, note).await;
            }
            actions.push(action);
        }
        actions
    }

    async fn check_health(&self) -> HealthCheck {
        let summary = self.monitor.generate_summary().await;
        let dependencies = self.dependencies.latest_report().await;
        self.health.check(&summary, dependencies.as_ref(), Utc::now()).await
    }

    async fn run_due_tasks(&self) {
        let queued = self.scheduler.tick(Utc::now()).await;
        if queued.is_empty() {
            return;
        }
        while let Some((execution, limit)) = self.scheduler.start_next(Utc::now()).await {
            let outcome = match tokio::time::timeout(limit, self.run_task(execution.task_type)).await {
                Ok(Ok(result)) => ExecutionOutcome::Completed(result),
                Ok(Err(e)) => ExecutionOutcome::Failed(e),
                Err(_) => {
                    warn!("Scheduled {:?} exceeded {:?}", execution.task_type, limit);
                    ExecutionOutcome::TimedOut
                }
            };
            self.scheduler.finish(&execution.id, outcome, Utc::now()).await;
        }
    }

    async fn run_task(&self, task_type: TaskType) -> std::result::Result<String, String> {
        let actions = match task_type {
            TaskType::FullMaintenance => {
                let report = self.run_cycle().await;
                return Ok(format!("report {}", report.id));
            }
            TaskType::DependencyScan => {
                return self
                    .dependencies
                    .analyze(Utc::now())
                    .await
                    .map(|r| format!("{} dependencies, {} conflicts", r.dependencies.len(), r.conflicts.len()))
                    .map_err(|e| e.to_string());
            }
            TaskType::OptimizeSlowTests => {
                let summary = self.monitor.generate_summary().await;
                let _guard = self.file_work.lock().await;
                self.optimize_slow_tests(&summary).await
            }
            TaskType::CleanupObsoleteTests => {
                let _guard = self.file_work.lock().await;
                self.maintainer.cleanup_obsolete_tests().await
            }
            TaskType::GenerateMissingTests => {
                let _guard = self.file_work.lock().await;
                self.maintainer.generate_missing_tests().await
            }
        };

        let failed: Vec<String> = actions
            .iter()
            .filter(|a| !a.is_completed())
            .map(|a| format!("{}: {}", a.target, a.error.as_deref().unwrap_or("failed")))
            .collect();
        if failed.is_empty() {
            Ok(format!("{} actions completed", actions.len()))
        } else {
            Err(failed.join("; "))
        }
    }
}
