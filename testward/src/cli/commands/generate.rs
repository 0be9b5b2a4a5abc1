//! Generate command - synthesize Go tests and write them next to their sources

use crate::cli::app::GenerateArgs;
use anyhow::{Context, Result};
use testward_core::{InfrastructureConfig, SelfMaintainingTestInfrastructure};
use tokio::fs;
use tracing::{info, warn};

pub async fn execute(config: InfrastructureConfig, args: GenerateArgs) -> Result<()> {
    let path = if args.path.is_relative() && !args.path.exists() {
        config.project_root.join(&args.path)
    } else {
        args.path.clone()
    };
    let infrastructure = SelfMaintainingTestInfrastructure::new(config)?;
    let result = infrastructure.generate_tests(&path).await;

    for error in &result.errors {
        warn!("{}", error);
    }

    let mut written = 0;
    for (file, content) in &result.files {
        if args.dry_run {
            println!("==> {} <==\n{}", file.display(), content);
            continue;
        }
        if file.exists() && !args.force {
            println!("Skipping {} (exists; pass --force to overwrite)", file.display());
            continue;
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await.with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(file, content).await.with_context(|| format!("Failed to write {}", file.display()))?;
        info!("Wrote {}", file.display());
        written += 1;
    }

    for suite in &result.suites {
        if suite.is_empty() {
            continue;
        }
        println!(
            "{}: {} tests, estimated coverage {:.0}% (target {:.0}%)",
            suite.source_file.display(),
            suite.test_cases.len(),
            suite.coverage.estimated_coverage,
            suite.coverage.target_coverage
        );
    }
    println!(
        "{} test cases, {} files {}, {} errors",
        result.test_count(),
        if args.dry_run { result.files.len() } else { written },
        if args.dry_run { "rendered" } else { "written" },
        result.errors.len()
    );
    Ok(())
}
