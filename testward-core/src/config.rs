//! Engine configuration
//!
//! Loaded from TOML. Every field has a default so a partial file is enough;
//! intervals and durations are stored as whole seconds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange { field: &'static str, min: f64, max: f64, value: f64 },

    #[error("test_command must name a program")]
    EmptyCommand,

    #[error("advisory for {module} has an invalid fixed_in version: {version}")]
    InvalidAdvisory { module: String, version: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestingFramework {
    /// The standard library `testing` package
    #[default]
    #[serde(alias = "testing")]
    Standard,
    Testify,
}

/// Where generated test files are placed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestFileNaming {
    /// `<name>_test.go` next to the source
    #[default]
    Suffix,
    /// `test_<name>.go` next to the source
    Package,
    /// `tests/<name>_test.go` in its own package
    Parallel,
}

/// A known-vulnerable module version range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Advisory {
    pub module: String,
    /// First version that is no longer affected
    pub fixed_in: String,
    pub advisory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InfrastructureConfig {
    pub project_root: PathBuf,
    /// Program and arguments used to run the project's tests
    pub test_command: Vec<String>,

    pub maintenance_interval_secs: u64,
    pub health_check_interval_secs: u64,
    /// Mean test duration above which performance is critical
    pub max_test_duration_secs: u64,
    /// Fraction of failing tests, 0.0 to 1.0
    pub max_failure_rate: f64,
    /// Percent degradation that counts as a regression
    pub regression_threshold: f64,

    pub auto_optimize_slow_tests: bool,
    pub auto_cleanup_obsolete_tests: bool,
    pub auto_generate_missing_tests: bool,

    pub target_coverage: f64,
    pub testing_framework: TestingFramework,
    pub test_file_naming: TestFileNaming,

    /// Latest duration above which a test is reported as slow
    pub slow_test_threshold_ms: u64,
    pub baseline_update_interval_secs: u64,
    pub min_baseline_samples: usize,

    pub stale_dependency_days: i64,
    pub advisories: Vec<Advisory>,

    pub table_driven: bool,
    pub generate_benchmarks: bool,
    pub generate_examples: bool,
    /// Record maintenance changes without writing to disk
    pub dry_run: bool,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            test_command: vec!["go".into(), "test".into(), "-v".into(), "./...".into()],
            maintenance_interval_secs: 3600,
            health_check_interval_secs: 300,
            max_test_duration_secs: 30,
            max_failure_rate: 0.1,
            regression_threshold: 20.0,
            auto_optimize_slow_tests: true,
            auto_cleanup_obsolete_tests: false,
            auto_generate_missing_tests: true,
            target_coverage: 80.0,
            testing_framework: TestingFramework::Standard,
            test_file_naming: TestFileNaming::Suffix,
            slow_test_threshold_ms: 1000,
            baseline_update_interval_secs: 86400,
            min_baseline_samples: 3,
            stale_dependency_days: 365,
            advisories: Vec::new(),
            table_driven: true,
            generate_benchmarks: true,
            generate_examples: true,
            dry_run: false,
        }
    }
}

impl InfrastructureConfig {
    pub fn for_project(root: impl Into<PathBuf>) -> Self {
        Self { project_root: root.into(), ..Self::default() }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read testward config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse testward config")?;

        config.validate().context("Invalid testward config")?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize testward config")?;

        fs::write(path, content).context("Failed to write testward config file")?;

        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.test_command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ConfigError::EmptyCommand);
        }

        let positive = [
            ("maintenance_interval_secs", self.maintenance_interval_secs),
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("max_test_duration_secs", self.max_test_duration_secs),
            ("baseline_update_interval_secs", self.baseline_update_interval_secs),
        ];
        if let Some(&(field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.min_baseline_samples == 0 {
            return Err(ConfigError::Zero { field: "min_baseline_samples" });
        }

        let ranges = [
            ("max_failure_rate", self.max_failure_rate, 0.0, 1.0),
            ("regression_threshold", self.regression_threshold, f64::MIN_POSITIVE, 10_000.0),
            ("target_coverage", self.target_coverage, 0.0, 100.0),
        ];
        for (field, value, min, max) in ranges {
            if !(min..=max).contains(&value) {
                return Err(ConfigError::OutOfRange { field, min, max, value });
            }
        }

        for advisory in &self.advisories {
            if semver::Version::parse(advisory.fixed_in.trim_start_matches('v')).is_err() {
                return Err(ConfigError::InvalidAdvisory {
                    module: advisory.module.clone(),
                    version: advisory.fixed_in.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn max_test_duration(&self) -> Duration {
        Duration::from_secs(self.max_test_duration_secs)
    }

    pub fn slow_test_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_test_threshold_ms)
    }

    pub fn baseline_update_interval(&self) -> Duration {
        Duration::from_secs(self.baseline_update_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = InfrastructureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slow_test_threshold(), Duration::from_secs(1));
        assert_eq!(config.test_command.join(" "), "go test -v ./...");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: InfrastructureConfig = toml::from_str(
            r#"
            max_failure_rate = 0.25
            testing_framework = "testify"
            test_file_naming = "parallel"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_failure_rate, 0.25);
        assert_eq!(config.testing_framework, TestingFramework::Testify);
        assert_eq!(config.test_file_naming, TestFileNaming::Parallel);
        assert_eq!(config.health_check_interval_secs, 300);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = InfrastructureConfig { max_failure_rate: 1.5, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "max_failure_rate", .. })));

        let config = InfrastructureConfig { health_check_interval_secs: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero { field: "health_check_interval_secs" }));

        let config = InfrastructureConfig { test_command: Vec::new(), ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::EmptyCommand));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".testward/config.toml");

        let mut config = InfrastructureConfig::for_project(dir.path());
        config.advisories.push(Advisory {
            module: "golang.org/x/net".to_string(),
            fixed_in: "v0.17.0".to_string(),
            advisory: "GO-2023-2102".to_string(),
        });
        config.save(&path).unwrap();

        let loaded = InfrastructureConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
