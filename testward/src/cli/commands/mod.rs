pub mod analyze;
pub mod generate;
pub mod init;
pub mod maintain;
pub mod run;
pub mod status;

use anyhow::Result;
use std::path::{Path, PathBuf};
use testward_core::InfrastructureConfig;
use tracing::debug;

pub const CONFIG_FILE: &str = "testward.toml";

/// Explicit `--config`, otherwise `testward.toml` in the project root
pub fn config_path(config: Option<&Path>, project: Option<&Path>) -> PathBuf {
    match config {
        Some(path) => path.to_path_buf(),
        None => project.unwrap_or(Path::new(".")).join(CONFIG_FILE),
    }
}

/// Load the config file when present; `--project` always wins over the file's root
pub fn load_config(path: &Path, project: Option<&Path>) -> Result<InfrastructureConfig> {
    let mut config = if path.is_file() {
        debug!("Loading configuration from {}", path.display());
        let mut config = InfrastructureConfig::from_file(path)?;
        if config.project_root.is_relative() {
            let base = path.parent().unwrap_or(Path::new("."));
            config.project_root = base.join(&config.project_root);
        }
        config
    } else {
        InfrastructureConfig::default()
    };

    if let Some(project) = project {
        config.project_root = project.to_path_buf();
    }
    Ok(config)
}
