//! Maintain command - one maintenance cycle on demand

use crate::cli::app::MaintainArgs;
use anyhow::Result;
use testward_core::{InfrastructureConfig, InfrastructureReport, SelfMaintainingTestInfrastructure};

pub async fn execute(config: InfrastructureConfig, args: MaintainArgs) -> Result<()> {
    let infrastructure = SelfMaintainingTestInfrastructure::new(config)?;
    let report = infrastructure.run_maintenance().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

pub fn print_report(report: &InfrastructureReport) {
    let summary = &report.summary;
    println!("Report {} ({})", report.id, report.generated_at.to_rfc3339());
    println!(
        "  Tests: {} passed, {} failed, mean {:.2?}, slowest {:.2?}",
        summary.passing_tests, summary.failing_tests, summary.average_duration, summary.max_duration
    );

    if !report.actions.is_empty() {
        println!("\n  Maintenance actions:");
        for action in &report.actions {
            println!("    {:?} {} [{:?}] {}", action.action_type, action.target, action.status, action.description);
        }
    }
    if !report.alerts.is_empty() {
        println!("\n  Open regressions:");
        for alert in &report.alerts {
            println!(
                "    {} {:?} +{:.1}% ({:?})",
                alert.test_name, alert.regression_type, alert.regression_percent, alert.severity
            );
        }
    }
    if !report.optimizations.is_empty() {
        println!("\n  Optimizations:");
        for result in &report.optimizations {
            println!("    {} ({:.1}% projected)", result.rule_name, result.improvement_percent);
        }
    }
    if !report.recommendations.is_empty() {
        println!("\n  Recommendations:");
        for recommendation in &report.recommendations {
            println!("    - {}", recommendation);
        }
    }
}
