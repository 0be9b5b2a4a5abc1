//! Recurring maintenance tasks

use crate::config::InfrastructureConfig;
use chrono::{DateTime, Utc};
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Executions kept in history
const EXECUTION_HISTORY_LIMIT: usize = 1000;

/// Next run time for a schedule keyword. Unknown keywords run hourly.
pub fn calculate_next_run(schedule: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    let hours = match schedule.trim().to_ascii_lowercase().as_str() {
        "hourly" => 1,
        "daily" => 24,
        "weekly" => 168,
        _ => 1,
    };
    from + chrono::Duration::hours(hours)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    OptimizeSlowTests,
    CleanupObsoleteTests,
    GenerateMissingTests,
    DependencyScan,
    FullMaintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    /// `hourly`, `daily` or `weekly`
    pub schedule: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    /// Higher fires first when several tasks are due
    pub priority: u32,
    pub max_duration: Duration,
}

impl ScheduledTask {
    pub fn new(name: &str, task_type: TaskType, schedule: &str, priority: u32, max_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            task_type,
            schedule: schedule.to_string(),
            enabled: true,
            last_run: None,
            next_run: calculate_next_run(schedule, now),
            priority,
            max_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub id: String,
    pub task_id: String,
    pub task_type: TaskType,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Task priority first, then first queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuePriority {
    priority: u32,
    sequence: Reverse<u64>,
}

impl Ord for QueuePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for QueuePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How a started execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(String),
    Failed(String),
    TimedOut,
}

#[derive(Debug, Default)]
struct SchedulerState {
    tasks: HashMap<String, ScheduledTask>,
    queue: PriorityQueue<String, QueuePriority>,
    executions: Vec<TaskExecution>,
    sequence: u64,
}

pub struct AutomationScheduler {
    state: RwLock<SchedulerState>,
}

impl AutomationScheduler {
    pub fn new() -> Self {
        Self { state: RwLock::new(SchedulerState::default()) }
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        let tasks = tasks.into_iter().map(|task| (task.id.clone(), task)).collect();
        Self { state: RwLock::new(SchedulerState { tasks, ..Default::default() }) }
    }

    /// Tasks implied by the configuration's automation flags
    pub fn default_tasks(config: &InfrastructureConfig, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let limit = config.maintenance_interval().max(Duration::from_secs(60));
        let mut tasks = Vec::new();
        if config.auto_optimize_slow_tests {
            tasks.push(ScheduledTask::new("optimize-slow-tests", TaskType::OptimizeSlowTests, "hourly", 30, limit, now));
        }
        if config.auto_generate_missing_tests {
            tasks.push(ScheduledTask::new("generate-missing-tests", TaskType::GenerateMissingTests, "daily", 20, limit, now));
        }
        if config.auto_cleanup_obsolete_tests {
            tasks.push(ScheduledTask::new("cleanup-obsolete-tests", TaskType::CleanupObsoleteTests, "weekly", 10, limit, now));
        }
        tasks.push(ScheduledTask::new("dependency-scan", TaskType::DependencyScan, "daily", 15, limit, now));
        tasks
    }

    pub async fn add_task(&self, task: ScheduledTask) -> String {
        debug!("Scheduling {} ({}), next run {}", task.name, task.schedule, task.next_run);
        let id = task.id.clone();
        self.state.write().await.tasks.insert(id.clone(), task);
        id
    }

    pub async fn set_enabled(&self, task_id: &str, enabled: bool) -> bool {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(task_id) {
            Some(task) => {
                task.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Queue one execution for every enabled task that is due and advance
    /// its next run. Returns the queued executions.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TaskExecution> {
        let mut state = self.state.write().await;
        let state = &mut *state;

        let mut due: Vec<&mut ScheduledTask> =
            state.tasks.values_mut().filter(|t| t.enabled && t.next_run <= now).collect();
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

        let mut queued = Vec::new();
        for task in due {
            task.last_run = Some(now);
            task.next_run = calculate_next_run(&task.schedule, now);

            let execution = TaskExecution {
                id: Uuid::new_v4().to_string(),
                task_id: task.id.clone(),
                task_type: task.task_type,
                queued_at: now,
                started_at: None,
                ended_at: None,
                status: ExecutionStatus::Queued,
                result: None,
                error: None,
            };
            state.sequence += 1;
            state
                .queue
                .push(execution.id.clone(), QueuePriority { priority: task.priority, sequence: Reverse(state.sequence) });
            info!("Queued scheduled task {}", task.name);
            state.executions.push(execution.clone());
            queued.push(execution);
        }

        if state.executions.len() > EXECUTION_HISTORY_LIMIT {
            let excess = state.executions.len() - EXECUTION_HISTORY_LIMIT;
            state.executions.drain(0..excess);
        }
        queued
    }

    /// Pop the highest-priority queued execution and mark it running.
    /// Returns it with its task's time limit.
    pub async fn start_next(&self, now: DateTime<Utc>) -> Option<(TaskExecution, Duration)> {
        let mut state = self.state.write().await;
        let (execution_id, _) = state.queue.pop()?;
        let limit = {
            let execution = state.executions.iter().find(|e| e.id == execution_id)?;
            state.tasks.get(&execution.task_id).map(|t| t.max_duration).unwrap_or(Duration::from_secs(3600))
        };
        let execution = state.executions.iter_mut().find(|e| e.id == execution_id)?;
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(now);
        Some((execution.clone(), limit))
    }

    pub async fn finish(&self, execution_id: &str, outcome: ExecutionOutcome, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        let Some(execution) = state.executions.iter_mut().find(|e| e.id == execution_id) else {
            return;
        };
        execution.ended_at = Some(now);
        match outcome {
            ExecutionOutcome::Completed(result) => {
                execution.status = ExecutionStatus::Completed;
                execution.result = Some(result);
            }
            ExecutionOutcome::Failed(error) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(error);
            }
            ExecutionOutcome::TimedOut => {
                execution.status = ExecutionStatus::TimedOut;
                execution.error = Some("exceeded max duration".to_string());
            }
        }
    }

    pub async fn tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.state.read().await.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        tasks
    }

    pub async fn executions(&self) -> Vec<TaskExecution> {
        self.state.read().await.executions.clone()
    }

    pub async fn queued(&self) -> usize {
        self.state.read().await.queue.len()
    }
}

impl Default for AutomationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_next_run_keywords() {
        let t = at(1_700_000_000);
        assert_eq!(calculate_next_run("hourly", t), t + chrono::Duration::hours(1));
        assert_eq!(calculate_next_run("daily", t), t + chrono::Duration::hours(24));
        assert_eq!(calculate_next_run("weekly", t), t + chrono::Duration::hours(168));
        assert_eq!(calculate_next_run("*/5 * * * *", t), t + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_due_tasks_fire_in_priority_order() {
        let scheduler = AutomationScheduler::new();
        let start = at(1_700_000_000);
        let limit = Duration::from_secs(60);
        scheduler.add_task(ScheduledTask::new("low", TaskType::DependencyScan, "hourly", 1, limit, start)).await;
        scheduler.add_task(ScheduledTask::new("high", TaskType::OptimizeSlowTests, "hourly", 9, limit, start)).await;
        scheduler.add_task(ScheduledTask::new("later", TaskType::CleanupObsoleteTests, "weekly", 5, limit, start)).await;

        assert!(scheduler.tick(start).await.is_empty());

        let now = start + chrono::Duration::hours(2);
        let queued = scheduler.tick(now).await;
        assert_eq!(queued.len(), 2);
        assert_eq!(scheduler.queued().await, 2);

        let (first, _) = scheduler.start_next(now).await.unwrap();
        assert_eq!(first.task_type, TaskType::OptimizeSlowTests);
        assert_eq!(first.status, ExecutionStatus::Running);
        scheduler.finish(&first.id, ExecutionOutcome::Completed("ok".into()), now).await;

        let (second, _) = scheduler.start_next(now).await.unwrap();
        assert_eq!(second.task_type, TaskType::DependencyScan);
        scheduler.finish(&second.id, ExecutionOutcome::TimedOut, now).await;
        assert!(scheduler.start_next(now).await.is_none());

        let executions = scheduler.executions().await;
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
        assert_eq!(executions[1].status, ExecutionStatus::TimedOut);

        let high = scheduler.tasks().await.into_iter().find(|t| t.name == "high").unwrap();
        assert_eq!(high.last_run, Some(now));
        assert_eq!(high.next_run, now + chrono::Duration::hours(1));
        assert!(scheduler.tick(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_tasks_do_not_fire() {
        let scheduler = AutomationScheduler::new();
        let start = at(0);
        let id = scheduler
            .add_task(ScheduledTask::new("scan", TaskType::DependencyScan, "daily", 1, Duration::from_secs(1), start))
            .await;
        assert!(scheduler.set_enabled(&id, false).await);
        assert!(scheduler.tick(start + chrono::Duration::days(2)).await.is_empty());
    }

    #[test]
    fn test_default_tasks_follow_flags() {
        let mut config = InfrastructureConfig::default();
        config.auto_cleanup_obsolete_tests = false;
        config.auto_generate_missing_tests = false;
        let tasks = AutomationScheduler::default_tasks(&config, at(0));
        let types: Vec<TaskType> = tasks.iter().map(|t| t.task_type).collect();
        assert_eq!(types, vec![TaskType::OptimizeSlowTests, TaskType::DependencyScan]);
    }

    proptest! {
        #[test]
        fn prop_next_run_arithmetic(secs in 0i64..4_000_000_000, schedule in "[a-z]{0,8}") {
            let t = at(secs);
            let expected = match schedule.as_str() {
                "daily" => 24,
                "weekly" => 168,
                _ => 1,
            };
            prop_assert_eq!(calculate_next_run(&schedule, t), t + chrono::Duration::hours(expected));
        }
    }
}
