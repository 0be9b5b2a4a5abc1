//! Run command - background loops in the foreground until Ctrl-C

use super::maintain::print_report;
use anyhow::Result;
use testward_core::{InfrastructureConfig, SelfMaintainingTestInfrastructure};
use tracing::info;

pub async fn execute(config: InfrastructureConfig) -> Result<()> {
    let infrastructure = SelfMaintainingTestInfrastructure::new(config)?;

    // a first cycle up front; the loop's first tick is a full interval away
    let report = infrastructure.run_maintenance().await;
    print_report(&report);

    infrastructure.start().await?;
    info!(
        "Maintaining {} every {:?}; press Ctrl-C to stop",
        infrastructure.config().project_root.display(),
        infrastructure.config().maintenance_interval()
    );

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, waiting for running work to finish");
    infrastructure.stop().await?;

    let reports = infrastructure.reports().await;
    println!("Produced {} reports", reports.len());
    Ok(())
}
