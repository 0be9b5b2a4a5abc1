//! Status command

use crate::cli::app::StatusArgs;
use anyhow::Result;
use testward_core::{InfrastructureConfig, SelfMaintainingTestInfrastructure};

pub async fn execute(config: InfrastructureConfig, args: StatusArgs) -> Result<()> {
    let infrastructure = SelfMaintainingTestInfrastructure::new(config)?;
    let status = infrastructure.get_current_status().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Health: {:?}", status.health.overall);
    for (component, health) in &status.health.components {
        println!("  {:<16} {:?}", component, health);
    }
    for issue in &status.health.issues {
        println!("  ! {}", issue);
    }

    println!("\nScheduled tasks:");
    for task in &status.scheduled_tasks {
        println!(
            "  {:<28} {:<8} next {}{}",
            task.name,
            task.schedule,
            task.next_run.to_rfc3339(),
            if task.enabled { "" } else { " (disabled)" }
        );
    }
    Ok(())
}
