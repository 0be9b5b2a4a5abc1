//! Edits the project's test files and keeps an audit trail of every change

use super::{ActionType, MaintenanceAction, Result};
use crate::analysis::go::GoSource;
use crate::analysis::model::{FunctionSignature, SourceModel};
use crate::analysis::SourceAnalyzer;
use crate::config::InfrastructureConfig;
use crate::test_gen::frameworks::go::GENERATED_MARKER;
use crate::test_gen::generator::{find_module, go_sources};
use crate::test_gen::{SynthesisConfig, TestSynthesizer};
use regex_utils::generated_test;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Prefixes of functions the Go toolchain runs from test files
const TEST_PREFIXES: &[&str] = &["Test", "Benchmark", "Example", "Fuzz"];

/// Calls on `*testing.T` that panic once the test is parallel
const PARALLEL_UNSAFE: &[&str] = &["Setenv", "Chdir"];

enum ParallelOutcome {
    Inserted { file: PathBuf },
    AlreadyParallel { file: PathBuf },
    Unsafe { file: PathBuf, reason: String },
    NotFound,
}

pub struct TestMaintainer {
    project_root: PathBuf,
    dry_run: bool,
    analyzer: SourceAnalyzer,
    synthesizer: TestSynthesizer,
    history: RwLock<Vec<MaintenanceAction>>,
}

impl TestMaintainer {
    pub fn new(config: &InfrastructureConfig) -> Self {
        Self {
            project_root: config.project_root.clone(),
            dry_run: config.dry_run,
            analyzer: SourceAnalyzer::new(),
            synthesizer: TestSynthesizer::new(SynthesisConfig::from(config)),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Insert `t.Parallel()` at the top of a slow test. Subtest names
    /// resolve to their top-level test function.
    pub async fn optimize_slow_test(&self, test_name: &str) -> MaintenanceAction {
        let function = test_name.split('/').next().unwrap_or(test_name);
        let action = MaintenanceAction::start(
            ActionType::Optimize,
            test_name,
            format!("Run {} in parallel with other tests", function),
        );

        let action = match self.parallelize(function).await {
            Ok(ParallelOutcome::Inserted { file }) => {
                let mut action = action.with_metadata("file", file.display().to_string());
                action.changes.push(format!("{}: added t.Parallel() to {}", file.display(), function));
                info!("Parallelized slow test {}", function);
                action.complete()
            }
            Ok(ParallelOutcome::AlreadyParallel { file }) => {
                debug!("{} already runs in parallel", function);
                action
                    .with_metadata("file", file.display().to_string())
                    .with_metadata("already_parallel", true)
                    .complete()
            }
            Ok(ParallelOutcome::Unsafe { file, reason }) => {
                action.with_metadata("file", file.display().to_string()).fail(reason)
            }
            Ok(ParallelOutcome::NotFound) => action.fail(format!("no test function {} found", function)),
            Err(e) => action.fail(e.to_string()),
        };

        self.record(vec![action.clone()]).await;
        action
    }

    async fn parallelize(&self, function: &str) -> Result<ParallelOutcome> {
        let needle = format!("func {}(", function);
        for path in test_files(&self.project_root) {
            let content = tokio::fs::read_to_string(&path).await?;
            if !content.contains(&needle) {
                continue;
            }
            let model = match GoSource::parse(&path, &content) {
                Ok(model) => model,
                Err(e) => {
                    warn!("Cannot parse {}: {}", path.display(), e);
                    continue;
                }
            };
            let Some(signature) = model.functions().into_iter().find(|f| is_test_function(f, function)) else {
                continue;
            };

            let param = match signature.params[0].name.as_deref() {
                Some(name) if name != "_" => name.to_string(),
                _ => {
                    return Ok(ParallelOutcome::Unsafe {
                        file: path,
                        reason: format!("{} does not name its *testing.T parameter", function),
                    });
                }
            };
            let body = model.body(&signature);
            if body.as_ref().is_some_and(|b| b.calls(&format!("{}.Parallel", param))) {
                return Ok(ParallelOutcome::AlreadyParallel { file: path });
            }
            if let Some(call) = PARALLEL_UNSAFE
                .iter()
                .find(|call| body.as_ref().is_some_and(|b| b.calls(&format!("{}.{}", param, call))))
            {
                return Ok(ParallelOutcome::Unsafe {
                    file: path,
                    reason: format!("{} calls {}.{}, which panics in parallel tests", function, param, call),
                });
            }
            let Some(offset) = signature.body_start else {
                return Ok(ParallelOutcome::NotFound);
            };

            if !self.dry_run {
                let mut updated = String::with_capacity(content.len() + 16);
                updated.push_str(&content[..offset]);
                updated.push_str(&format!("\n\t{}.Parallel()", param));
                updated.push_str(&content[offset..]);
                tokio::fs::write(&path, updated).await?;
            }
            return Ok(ParallelOutcome::Inserted { file: path });
        }
        Ok(ParallelOutcome::NotFound)
    }

    /// Remove tests whose target function no longer exists. Only generated
    /// files and generated per-case names are touched; a file left with no
    /// test functions is deleted.
    pub async fn cleanup_obsolete_tests(&self) -> Vec<MaintenanceAction> {
        let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for path in test_files(&self.project_root) {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            by_dir.entry(dir).or_default().push(path);
        }

        let mut actions = Vec::new();
        for (dir, files) in by_dir {
            let package_dir = if dir.file_name().is_some_and(|name| name == "tests") {
                dir.parent().map(Path::to_path_buf).unwrap_or_else(|| dir.clone())
            } else {
                dir.clone()
            };

            let targets = match self.declared_targets(&package_dir).await {
                Ok(Some(targets)) => targets,
                Ok(None) => {
                    debug!("No package sources for {}; leaving its tests alone", dir.display());
                    continue;
                }
                Err(e) => {
                    let action = MaintenanceAction::start(
                        ActionType::Cleanup,
                        dir.display().to_string(),
                        "Remove tests of deleted functions",
                    );
                    actions.push(action.fail(format!("cannot analyze package sources: {}", e)));
                    continue;
                }
            };

            for file in files {
                if let Some(action) = self.cleanup_file(&file, &targets).await {
                    actions.push(action);
                }
            }
        }

        self.record(actions.clone()).await;
        actions
    }

    /// Test targets declared by the non-test sources of one directory, or
    /// `None` when it holds no sources.
    async fn declared_targets(&self, dir: &Path) -> Result<Option<HashSet<String>>> {
        let mut sources = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_file() && name.ends_with(".go") && !is_test_file_name(&name) {
                sources.push(path);
            }
        }
        if sources.is_empty() {
            return Ok(None);
        }

        let mut targets = HashSet::new();
        for path in sources {
            let analysis = self.analyzer.analyze_file(&path).await?;
            targets.extend(analysis.declared_targets);
        }
        Ok(Some(targets))
    }

    async fn cleanup_file(&self, path: &Path, targets: &HashSet<String>) -> Option<MaintenanceAction> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        let model = match GoSource::parse(path, &content) {
            Ok(model) => model,
            Err(e) => {
                warn!("Skipping cleanup of {}: {}", path.display(), e);
                return None;
            }
        };
        let generated = content.starts_with(GENERATED_MARKER);

        let functions = model.functions();
        let (obsolete, kept): (Vec<&FunctionSignature>, Vec<&FunctionSignature>) =
            functions.iter().partition(|f| {
                f.receiver.is_none()
                    && obsolete_target(&f.name, generated).is_some_and(|target| !targets.contains(&target))
            });
        if obsolete.is_empty() {
            return None;
        }

        let mut action = MaintenanceAction::start(
            ActionType::Cleanup,
            path.display().to_string(),
            "Remove tests of deleted functions",
        )
        .with_metadata("dry_run", self.dry_run);
        for function in &obsolete {
            action.changes.push(format!("removed {} (its target no longer exists)", function.name));
        }

        let still_tests = kept.iter().any(|f| TEST_PREFIXES.iter().any(|p| f.name.starts_with(p)));
        let outcome = if still_tests {
            let mut spans: Vec<(usize, usize)> = obsolete.iter().map(|f| f.span).collect();
            spans.sort_by(|a, b| b.0.cmp(&a.0));
            let mut updated = content.clone();
            for (start, end) in spans {
                let end = skip_newlines(&updated, end);
                updated.replace_range(start..end, "");
            }
            let (updated, pruned) = prune_imports(&updated, &model.imports());
            for path in pruned {
                action.changes.push(format!("removed unused import \"{}\"", path));
            }
            if self.dry_run {
                Ok(())
            } else {
                tokio::fs::write(path, updated).await
            }
        } else {
            action.changes.push(format!("deleted {}", path.display()));
            if self.dry_run {
                Ok(())
            } else {
                tokio::fs::remove_file(path).await
            }
        };

        Some(match outcome {
            Ok(()) => {
                info!("Removed {} obsolete tests from {}", obsolete.len(), path.display());
                action.complete()
            }
            Err(e) => action.fail(e.to_string()),
        })
    }

    /// Write a generated test file for every source file that has none
    pub async fn generate_missing_tests(&self) -> Vec<MaintenanceAction> {
        let module = find_module(&self.project_root).await;
        let mut actions = Vec::new();

        for source in go_sources(&self.project_root) {
            if has_test_file(&source, &self.synthesizer.output_path(&source)) {
                continue;
            }
            let action = MaintenanceAction::start(
                ActionType::Generate,
                source.display().to_string(),
                format!("Generate tests for {}", source.display()),
            )
            .with_metadata("dry_run", self.dry_run);

            let analysis = match self.analyzer.analyze_file(&source).await {
                Ok(analysis) => analysis,
                Err(e) => {
                    actions.push(action.fail(e.to_string()));
                    continue;
                }
            };
            let result = self.synthesizer.generate_for_analysis(&analysis, module.as_ref());
            if result.files.is_empty() {
                if !result.errors.is_empty() {
                    actions.push(action.fail(result.errors.join("; ")));
                }
                continue;
            }

            let mut action = action.with_metadata("test_cases", result.test_count());
            if !result.errors.is_empty() {
                action = action.with_metadata("errors", result.errors.clone());
            }
            let mut failure = None;
            for (path, content) in &result.files {
                if !self.dry_run {
                    if let Err(e) = write_file(path, content).await {
                        failure = Some(format!("{}: {}", path.display(), e));
                        break;
                    }
                }
                action.changes.push(format!("created {}", path.display()));
            }
            actions.push(match failure {
                Some(error) => action.fail(error),
                None => action.complete(),
            });
        }

        if !actions.is_empty() {
            info!("Generated tests for {} source files", actions.iter().filter(|a| a.is_completed()).count());
        }
        self.record(actions.clone()).await;
        actions
    }

    async fn record(&self, actions: Vec<MaintenanceAction>) {
        if actions.is_empty() {
            return;
        }
        self.history.write().await.extend(actions);
    }

    /// Every action taken so far, oldest first
    pub async fn history(&self) -> Vec<MaintenanceAction> {
        self.history.read().await.clone()
    }
}

fn is_test_file_name(name: &str) -> bool {
    name.ends_with("_test.go") || (name.starts_with("test_") && name.ends_with(".go"))
}

fn is_test_function(signature: &FunctionSignature, name: &str) -> bool {
    signature.name == name
        && signature.receiver.is_none()
        && signature.params.len() == 1
        && signature.params[0].type_name == "*testing.T"
}

/// Target a test function exercises, when it follows the generator's naming
fn obsolete_target(name: &str, generated_file: bool) -> Option<String> {
    if let Some(target) = generated_test::target_of(name) {
        return Some(target);
    }
    if !generated_file {
        return None;
    }
    ["Test", "Benchmark", "Example"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .filter(|target| !target.is_empty())
        .map(str::to_string)
}

fn has_test_file(source: &Path, configured: &Path) -> bool {
    let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let sibling = source.with_file_name(format!("{}_test.go", stem));
    sibling.exists() || configured.exists()
}

async fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

fn skip_newlines(content: &str, from: usize) -> usize {
    let rest = &content[from..];
    from + (rest.len() - rest.trim_start_matches('\n').len()).min(2)
}

/// Drop imports no longer referenced outside the import declarations.
/// Returns the new text and the removed paths.
fn prune_imports(content: &str, imports: &[(String, String)]) -> (String, Vec<String>) {
    let is_import_line = |line: &str, local: &str, path: &str| {
        let line = line.trim();
        let line = line.strip_prefix("import").map(str::trim).unwrap_or(line);
        let quoted = format!("\"{}\"", path);
        line == quoted || line == format!("{} {}", local, quoted)
    };

    let mut unused = Vec::new();
    for (local, path) in imports {
        if local == "_" || local == "." {
            continue;
        }
        let qualifier = format!("{}.", local);
        let referenced = content
            .lines()
            .filter(|line| !is_import_line(line, local, path))
            .any(|line| line.contains(&qualifier));
        if !referenced {
            unused.push((local.clone(), path.clone()));
        }
    }
    if unused.is_empty() {
        return (content.to_string(), Vec::new());
    }

    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if unused.iter().any(|(local, path)| is_import_line(line, local, path)) {
            continue;
        }
        out.push_str(line);
    }
    (out, unused.into_iter().map(|(_, path)| path).collect())
}

/// `_test.go` and `test_*.go` files below `root`
fn test_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name.starts_with('.') || name == "vendor" || name == "testdata")
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_test_file_name(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::ActionStatus;
    use tempfile::TempDir;

    const SOURCE: &str = "package shop\n\nfunc Add(a, b int) int {\n\treturn a + b\n}\n";

    const SLOW_TEST: &str = "package shop\n\nimport \"testing\"\n\nfunc TestSlow(t *testing.T) {\n\tif Add(1, 2) != 3 {\n\t\tt.Fatal(\"bad sum\")\n\t}\n}\n";

    fn maintainer(root: &Path, dry_run: bool) -> TestMaintainer {
        let mut config = InfrastructureConfig::for_project(root);
        config.dry_run = dry_run;
        TestMaintainer::new(&config)
    }

    async fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(path, content).await.unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_optimize_inserts_parallel_once() {
        let dir = project(&[("shop.go", SOURCE), ("shop_test.go", SLOW_TEST)]).await;
        let maintainer = maintainer(dir.path(), false);

        let action = maintainer.optimize_slow_test("TestSlow/subcase").await;
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.changes.len(), 1);
        let content = tokio::fs::read_to_string(dir.path().join("shop_test.go")).await.unwrap();
        assert!(content.contains("func TestSlow(t *testing.T) {\n\tt.Parallel()\n\tif Add(1, 2) != 3 {"));

        let again = maintainer.optimize_slow_test("TestSlow").await;
        assert_eq!(again.status, ActionStatus::Completed);
        assert!(again.changes.is_empty());
        assert_eq!(again.metadata["already_parallel"], true);
        assert_eq!(maintainer.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_optimize_refuses_setenv_and_missing_tests() {
        let setenv = "package shop\n\nimport \"testing\"\n\nfunc TestEnv(t *testing.T) {\n\tt.Setenv(\"MODE\", \"x\")\n}\n";
        let dir = project(&[("shop.go", SOURCE), ("env_test.go", setenv)]).await;
        let maintainer = maintainer(dir.path(), false);

        let action = maintainer.optimize_slow_test("TestEnv").await;
        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error.unwrap().contains("t.Setenv"));

        let missing = maintainer.optimize_slow_test("TestGone").await;
        assert_eq!(missing.status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_files_untouched() {
        let dir = project(&[("shop.go", SOURCE), ("shop_test.go", SLOW_TEST)]).await;
        let action = maintainer(dir.path(), true).optimize_slow_test("TestSlow").await;
        assert!(action.is_completed());
        assert_eq!(action.changes.len(), 1);
        let content = tokio::fs::read_to_string(dir.path().join("shop_test.go")).await.unwrap();
        assert_eq!(content, SLOW_TEST);
    }

    #[tokio::test]
    async fn test_cleanup_removes_obsolete_generated_tests() {
        let generated = format!(
            "{} from shop.go. Review before relying on it.\n\npackage shop\n\nimport (\n\t\"errors\"\n\t\"testing\"\n)\n\n\
             func TestAdd_HappyPath_1(t *testing.T) {{\n\t_ = Add(1, 2)\n}}\n\n\
             func TestRemoved_Error_1(t *testing.T) {{\n\tvar err error = errors.New(\"x\")\n\t_ = err\n}}\n",
            GENERATED_MARKER
        );
        let orphan = format!(
            "{} from old.go. Review before relying on it.\n\npackage shop\n\nimport \"testing\"\n\nfunc TestGone(t *testing.T) {{\n}}\n",
            GENERATED_MARKER
        );
        let handwritten = "package shop\n\nimport \"testing\"\n\nfunc TestIntegration(t *testing.T) {\n}\n";
        let dir = project(&[
            ("shop.go", SOURCE),
            ("shop_test.go", generated.as_str()),
            ("old_test.go", orphan.as_str()),
            ("integration_test.go", handwritten),
        ])
        .await;

        let actions = maintainer(dir.path(), false).cleanup_obsolete_tests().await;
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(MaintenanceAction::is_completed));

        let content = tokio::fs::read_to_string(dir.path().join("shop_test.go")).await.unwrap();
        assert!(content.contains("func TestAdd_HappyPath_1"));
        assert!(!content.contains("TestRemoved"));
        assert!(!content.contains("\"errors\""));
        assert!(content.contains("\"testing\""));
        assert!(!dir.path().join("old_test.go").exists());
        assert!(dir.path().join("integration_test.go").exists());
    }

    #[tokio::test]
    async fn test_generate_missing_tests_is_idempotent() {
        let source = "package shop\n\nimport \"errors\"\n\nfunc Parse(s string) (int, error) {\n\tif s == \"\" {\n\t\treturn 0, errors.New(\"empty input\")\n\t}\n\treturn len(s), nil\n}\n";
        let dir = project(&[("go.mod", "module example.com/shop\n"), ("parse.go", source)]).await;
        let maintainer = maintainer(dir.path(), false);

        let actions = maintainer.generate_missing_tests().await;
        assert_eq!(actions.len(), 1);
        assert!(actions[0].is_completed());
        let content = tokio::fs::read_to_string(dir.path().join("parse_test.go")).await.unwrap();
        assert!(content.starts_with(GENERATED_MARKER));
        assert!(content.contains("empty input"));

        assert!(maintainer.generate_missing_tests().await.is_empty());
    }

    #[test]
    fn test_prune_imports_keeps_referenced() {
        let content = "package a\n\nimport (\n\t\"fmt\"\n\tstr \"strings\"\n)\n\nfunc X() { fmt.Println() }\n";
        let imports = vec![("fmt".to_string(), "fmt".to_string()), ("str".to_string(), "strings".to_string())];
        let (pruned, removed) = prune_imports(content, &imports);
        assert_eq!(removed, vec!["strings".to_string()]);
        assert!(pruned.contains("\"fmt\""));
        assert!(!pruned.contains("strings"));
    }
}
