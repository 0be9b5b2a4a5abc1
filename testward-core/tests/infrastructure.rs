use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use testward_core::maintenance::{ActionStatus, ActionType};
use testward_core::test_gen::frameworks::go::GENERATED_MARKER;
use testward_core::{InfraError, InfrastructureConfig, SelfMaintainingTestInfrastructure};

const GO_MOD: &str = "module example.com/calc\n\ngo 1.22\n\nrequire github.com/stretchr/testify v1.8.4\n";

const CALC: &str = r#"package calc

// Add returns the sum of a and b.
func Add(a, b int) int {
	return a + b
}
"#;

const SLOW_TEST: &str = r#"package calc

import (
	"testing"
	"time"
)

func TestSlow(t *testing.T) {
	time.Sleep(2 * time.Second)
}
"#;

const LEGACY_TEST: &str = r#"package calc

import "testing"

func TestRemoved_HappyPath_1(t *testing.T) {
	t.Log("target was deleted")
}
"#;

fn write_project(root: &Path) {
    fs::write(root.join("go.mod"), GO_MOD).unwrap();
    fs::write(root.join("calc.go"), CALC).unwrap();
    fs::write(root.join("slow_test.go"), SLOW_TEST).unwrap();
    fs::write(root.join("legacy_test.go"), LEGACY_TEST).unwrap();
}

fn fake_go_test(lines: &[&str]) -> Vec<String> {
    let quoted: Vec<String> = lines.iter().map(|line| format!("'{}'", line)).collect();
    vec!["sh".to_string(), "-c".to_string(), format!("printf '%s\\n' {}", quoted.join(" "))]
}

fn config(root: &Path) -> InfrastructureConfig {
    let mut config = InfrastructureConfig::for_project(root);
    config.test_command = fake_go_test(&["--- PASS: TestSlow (2.50s)", "--- PASS: TestAdd (0.01s)", "PASS"]);
    config.auto_cleanup_obsolete_tests = true;
    config
}

#[tokio::test]
async fn test_full_cycle_maintains_project() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_project(root);

    let infrastructure = SelfMaintainingTestInfrastructure::new(config(root)).unwrap();
    let report = infrastructure.run_maintenance().await;

    assert_eq!(report.summary.total_tests, 2);
    assert_eq!(report.summary.slow_test_count, 1);
    assert_eq!(report.summary.slowest_tests[0].name, "TestSlow");

    let optimize = report.actions.iter().find(|a| a.action_type == ActionType::Optimize).unwrap();
    assert_eq!(optimize.status, ActionStatus::Completed);
    assert!(fs::read_to_string(root.join("slow_test.go")).unwrap().contains("t.Parallel()"));

    let cleanup = report.actions.iter().find(|a| a.action_type == ActionType::Cleanup).unwrap();
    assert_eq!(cleanup.status, ActionStatus::Completed);
    assert!(!root.join("legacy_test.go").exists());

    let generated = fs::read_to_string(root.join("calc_test.go")).unwrap();
    assert!(generated.starts_with(GENERATED_MARKER));
    assert!(generated.contains("Add("));

    let dependencies = report.dependency_report.as_ref().unwrap();
    assert_eq!(dependencies.module, "example.com/calc");
    assert!(report.recommendations.iter().any(|r| r.contains("Speed up slow test TestSlow")));

    assert_eq!(infrastructure.maintenance_history().await.len(), report.actions.len());
}

#[tokio::test]
async fn test_dry_run_leaves_files_untouched() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_project(root);

    let mut config = config(root);
    config.dry_run = true;
    let infrastructure = SelfMaintainingTestInfrastructure::new(config).unwrap();
    let report = infrastructure.run_maintenance().await;

    assert!(report.actions.iter().any(|a| a.action_type == ActionType::Optimize && a.is_completed()));
    assert_eq!(fs::read_to_string(root.join("slow_test.go")).unwrap(), SLOW_TEST);
    assert!(root.join("legacy_test.go").exists());
    assert!(!root.join("calc_test.go").exists());
}

#[tokio::test]
async fn test_background_loops_produce_reports() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.maintenance_interval_secs = 1;
    config.health_check_interval_secs = 1;
    config.auto_generate_missing_tests = false;

    let infrastructure = SelfMaintainingTestInfrastructure::new(config).unwrap();
    infrastructure.start().await.unwrap();
    assert!(matches!(infrastructure.start().await, Err(InfraError::AlreadyRunning)));

    tokio::time::sleep(Duration::from_millis(1600)).await;
    infrastructure.stop().await.unwrap();
    assert!(!infrastructure.is_running().await);

    assert!(!infrastructure.reports().await.is_empty());
    assert!(!infrastructure.health_history().await.is_empty());
    assert!(matches!(infrastructure.stop().await, Err(InfraError::NotRunning)));
}
