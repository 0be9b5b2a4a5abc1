//! go.mod auditing: conflicts, stale pseudo-versions and known advisories

use crate::analysis::go::GoSource;
use crate::analysis::model::SourceModel;
use crate::config::Advisory;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex_utils::gomod;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("No go.mod in {0}")]
    MissingGoMod(PathBuf),

    #[error("go.mod has no module directive")]
    NoModule,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DependencyError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub path: String,
    pub version: String,
    pub indirect: bool,
    /// Imported only from `_test.go` files
    pub test_only: bool,
    pub replaced_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyConflict {
    pub module: String,
    pub versions: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutdatedDependency {
    pub path: String,
    pub version: String,
    pub published: DateTime<Utc>,
    pub age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub path: String,
    pub version: String,
    pub fixed_in: String,
    pub advisory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyReport {
    pub module: String,
    pub go_version: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub conflicts: Vec<DependencyConflict>,
    pub outdated: Vec<OutdatedDependency>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
struct Requirement {
    path: String,
    version: String,
    indirect: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Replacement {
    old: String,
    old_version: Option<String>,
    new: String,
    new_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct GoMod {
    module: String,
    go_version: Option<String>,
    requirements: Vec<Requirement>,
    replacements: Vec<Replacement>,
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    None,
    Require,
    Replace,
    Other,
}

fn parse_go_mod(content: &str) -> Result<GoMod> {
    let mut go_mod = GoMod::default();
    let mut block = Block::None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if block != Block::None {
            if line == ")" {
                block = Block::None;
                continue;
            }
        } else if let Some(rest) = line.strip_suffix('(').map(str::trim) {
            block = match rest {
                "require" => Block::Require,
                "replace" => Block::Replace,
                _ => Block::Other,
            };
            continue;
        }

        let kind = match block {
            Block::None => line.split_whitespace().next().unwrap_or_default(),
            Block::Require => "require",
            Block::Replace => "replace",
            Block::Other => continue,
        };
        match kind {
            "module" => {
                if let Some(caps) = gomod::MODULE.captures(line) {
                    go_mod.module = caps[1].trim_matches('"').to_string();
                }
            }
            "go" => go_mod.go_version = gomod::GO_VERSION.captures(line).map(|caps| caps[1].to_string()),
            "require" => {
                if let Some(caps) = gomod::REQUIREMENT.captures(line) {
                    go_mod.requirements.push(Requirement {
                        path: caps[1].to_string(),
                        version: caps[2].to_string(),
                        indirect: caps.get(3).is_some(),
                    });
                }
            }
            "replace" => {
                if let Some(caps) = gomod::REPLACEMENT.captures(line) {
                    go_mod.replacements.push(Replacement {
                        old: caps[1].to_string(),
                        old_version: caps.get(2).map(|m| m.as_str().to_string()),
                        new: caps[3].to_string(),
                        new_version: caps.get(4).map(|m| m.as_str().to_string()),
                    });
                }
            }
            _ => {}
        }
    }

    if go_mod.module.is_empty() {
        return Err(DependencyError::NoModule);
    }
    Ok(go_mod)
}

/// Commit time encoded in a pseudo-version
fn pseudo_version_time(version: &str) -> Option<DateTime<Utc>> {
    let caps = gomod::PSEUDO_VERSION.captures(version)?;
    NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S").ok().map(|t| t.and_utc())
}

fn parse_semver(version: &str) -> Option<semver::Version> {
    let version = version.trim_start_matches('v');
    let version = version.strip_suffix("+incompatible").unwrap_or(version);
    semver::Version::parse(version).ok()
}

fn conflicts(go_mod: &GoMod) -> Vec<DependencyConflict> {
    let mut found = Vec::new();

    let mut versions: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for requirement in &go_mod.requirements {
        versions.entry(&requirement.path).or_default().insert(&requirement.version);
    }
    for (path, set) in &versions {
        if set.len() > 1 {
            found.push(DependencyConflict {
                module: path.to_string(),
                versions: set.iter().map(|v| v.to_string()).collect(),
                reason: "required at more than one version".to_string(),
            });
        }
    }

    for replacement in &go_mod.replacements {
        let (Some(pinned), Some(set)) = (&replacement.old_version, versions.get(replacement.old.as_str())) else {
            continue;
        };
        if !set.contains(pinned.as_str()) {
            let mut listed: Vec<String> = set.iter().map(|v| v.to_string()).collect();
            listed.push(pinned.clone());
            found.push(DependencyConflict {
                module: replacement.old.clone(),
                versions: listed,
                reason: format!("replace directive pins {} which is not the required version", pinned),
            });
        }
    }

    let mut majors: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
    for path in versions.keys() {
        let (base, major) = gomod::major_version(path);
        majors.entry(base).or_default().insert(major);
    }
    for (base, set) in majors {
        if set.len() > 1 {
            found.push(DependencyConflict {
                module: base,
                versions: set.iter().map(|m| format!("v{}", m)).collect(),
                reason: "multiple major versions in the build".to_string(),
            });
        }
    }

    found
}

pub struct DependencyAnalyzer {
    project_root: PathBuf,
    stale_after_days: i64,
    advisories: Vec<Advisory>,
    latest: RwLock<Option<DependencyReport>>,
}

impl DependencyAnalyzer {
    pub fn new(project_root: impl Into<PathBuf>, stale_after_days: i64, advisories: Vec<Advisory>) -> Self {
        Self { project_root: project_root.into(), stale_after_days, advisories, latest: RwLock::new(None) }
    }

    /// Audit the project's go.mod and keep the result as the latest report
    pub async fn analyze(&self, now: DateTime<Utc>) -> Result<DependencyReport> {
        let path = self.project_root.join("go.mod");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DependencyError::MissingGoMod(self.project_root.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let go_mod = parse_go_mod(&content)?;
        let (test_imports, code_imports) = imports_by_kind(&self.project_root).await;

        let imported = |set: &HashSet<String>, module: &str| {
            set.iter().any(|import| import == module || import.starts_with(&format!("{}/", module)))
        };

        let dependencies: Vec<Dependency> = go_mod
            .requirements
            .iter()
            .map(|r| Dependency {
                path: r.path.clone(),
                version: r.version.clone(),
                indirect: r.indirect,
                test_only: imported(&test_imports, &r.path) && !imported(&code_imports, &r.path),
                replaced_by: go_mod.replacements.iter().find(|rep| rep.old == r.path).map(|rep| match &rep.new_version {
                    Some(version) => format!("{} {}", rep.new, version),
                    None => rep.new.clone(),
                }),
            })
            .collect();

        let outdated: Vec<OutdatedDependency> = go_mod
            .requirements
            .iter()
            .filter_map(|r| {
                let published = pseudo_version_time(&r.version)?;
                let age_days = (now - published).num_days();
                (age_days > self.stale_after_days).then(|| OutdatedDependency {
                    path: r.path.clone(),
                    version: r.version.clone(),
                    published,
                    age_days,
                })
            })
            .collect();

        let vulnerabilities = self.vulnerabilities(&go_mod.requirements);

        let report = DependencyReport {
            module: go_mod.module.clone(),
            go_version: go_mod.go_version.clone(),
            dependencies,
            conflicts: conflicts(&go_mod),
            outdated,
            vulnerabilities,
            analyzed_at: now,
        };
        info!(
            "Analyzed {} dependencies: {} conflicts, {} outdated, {} vulnerable",
            report.dependencies.len(),
            report.conflicts.len(),
            report.outdated.len(),
            report.vulnerabilities.len()
        );

        *self.latest.write().await = Some(report.clone());
        Ok(report)
    }

    fn vulnerabilities(&self, requirements: &[Requirement]) -> Vec<Vulnerability> {
        let mut found = Vec::new();
        for advisory in &self.advisories {
            let Some(fixed) = parse_semver(&advisory.fixed_in) else {
                warn!("Ignoring advisory for {} with version {}", advisory.module, advisory.fixed_in);
                continue;
            };
            for requirement in requirements.iter().filter(|r| r.path == advisory.module) {
                match parse_semver(&requirement.version) {
                    Some(current) if current < fixed => found.push(Vulnerability {
                        path: requirement.path.clone(),
                        version: requirement.version.clone(),
                        fixed_in: advisory.fixed_in.clone(),
                        advisory: advisory.advisory.clone(),
                    }),
                    Some(_) => {}
                    None => debug!("Cannot compare version {} of {}", requirement.version, requirement.path),
                }
            }
        }
        found
    }

    pub async fn latest_report(&self) -> Option<DependencyReport> {
        self.latest.read().await.clone()
    }
}

/// Import paths used by test files and by other files
async fn imports_by_kind(root: &Path) -> (HashSet<String>, HashSet<String>) {
    let files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name.starts_with('.') || name == "vendor" || name == "testdata")
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(".go"))
        .map(|entry| entry.into_path())
        .collect();

    let mut test = HashSet::new();
    let mut code = HashSet::new();
    for path in files {
        let Ok(content) = tokio::fs::read_to_string(&path).await else { continue };
        let Ok(model) = GoSource::parse(&path, &content) else {
            debug!("Skipping imports of unparsable {}", path.display());
            continue;
        };
        let is_test = path.file_name().is_some_and(|n| n.to_string_lossy().ends_with("_test.go"));
        let target = if is_test { &mut test } else { &mut code };
        target.extend(model.imports().into_iter().map(|(_, import)| import));
    }
    (test, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GO_MOD: &str = r#"module example.com/shop

go 1.22

require (
	github.com/stretchr/testify v1.8.4
	github.com/google/uuid v1.3.0
	golang.org/x/exp v0.0.0-20200101000000-abcdef123456 // indirect
	github.com/acme/sdk v1.2.0
	github.com/acme/sdk/v2 v2.0.1
)

require github.com/pkg/errors v0.9.1

replace github.com/google/uuid v1.2.0 => ../uuid
"#;

    #[test]
    fn test_parse_go_mod() {
        let go_mod = parse_go_mod(GO_MOD).unwrap();
        assert_eq!(go_mod.module, "example.com/shop");
        assert_eq!(go_mod.go_version.as_deref(), Some("1.22"));
        assert_eq!(go_mod.requirements.len(), 6);
        assert!(go_mod.requirements[2].indirect);
        assert_eq!(go_mod.requirements[5].path, "github.com/pkg/errors");
        assert_eq!(go_mod.replacements[0].new, "../uuid");
        assert!(matches!(parse_go_mod("go 1.21\n"), Err(DependencyError::NoModule)));
    }

    #[test]
    fn test_conflicts() {
        let found = conflicts(&parse_go_mod(GO_MOD).unwrap());
        let modules: Vec<&str> = found.iter().map(|c| c.module.as_str()).collect();
        assert_eq!(modules, vec!["github.com/google/uuid", "github.com/acme/sdk"]);
        assert_eq!(found[1].versions, vec!["v1".to_string(), "v2".to_string()]);
    }

    #[tokio::test]
    async fn test_analyze_project() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("go.mod"), GO_MOD).await.unwrap();
        tokio::fs::write(
            dir.path().join("shop.go"),
            "package shop\n\nimport \"github.com/google/uuid\"\n\nfunc ID() string { return uuid.NewString() }\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("shop_test.go"),
            "package shop\n\nimport (\n\t\"testing\"\n\t\"github.com/stretchr/testify/assert\"\n)\n\nfunc TestID(t *testing.T) { assert.NotEmpty(t, ID()) }\n",
        )
        .await
        .unwrap();

        let advisories = vec![Advisory {
            module: "github.com/pkg/errors".to_string(),
            fixed_in: "v0.9.2".to_string(),
            advisory: "GO-0000-0001".to_string(),
        }];
        let analyzer = DependencyAnalyzer::new(dir.path(), 365, advisories);
        let now = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let report = analyzer.analyze(now).await.unwrap();

        let testify = report.dependencies.iter().find(|d| d.path == "github.com/stretchr/testify").unwrap();
        assert!(testify.test_only);
        let uuid = report.dependencies.iter().find(|d| d.path == "github.com/google/uuid").unwrap();
        assert!(!uuid.test_only);
        assert_eq!(uuid.replaced_by.as_deref(), Some("../uuid"));

        assert_eq!(report.outdated.len(), 1);
        assert_eq!(report.outdated[0].path, "golang.org/x/exp");
        assert_eq!(report.vulnerabilities.len(), 1);
        assert_eq!(report.vulnerabilities[0].fixed_in, "v0.9.2");
        assert_eq!(analyzer.latest_report().await, Some(report));
    }

    #[tokio::test]
    async fn test_missing_go_mod() {
        let dir = TempDir::new().unwrap();
        let analyzer = DependencyAnalyzer::new(dir.path(), 365, Vec::new());
        assert!(matches!(analyzer.analyze(Utc::now()).await, Err(DependencyError::MissingGoMod(_))));
        assert!(analyzer.latest_report().await.is_none());
    }
}
