//! Init command - write a configuration file

use crate::cli::app::InitArgs;
use anyhow::{Result, bail};
use std::path::Path;
use testward_core::InfrastructureConfig;
use tracing::info;

pub fn execute(config: &InfrastructureConfig, path: &Path, args: InitArgs) -> Result<()> {
    if path.exists() && !args.force {
        bail!("{} already exists; pass --force to overwrite it", path.display());
    }

    // the file lives in the project root, so store the root relative to it
    let mut config = config.clone();
    if path.parent().is_some_and(|parent| parent == config.project_root) {
        config.project_root = ".".into();
    }
    config.save(path)?;

    info!("Wrote {}", path.display());
    println!("Created {}", path.display());
    Ok(())
}
