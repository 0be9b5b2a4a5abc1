//! Test synthesizer: function analyses in, suites and rendered files out

use super::coverage::CoverageEstimator;
use super::frameworks::go::{NO_PANIC_HELPER, receiver_setup};
use super::frameworks::{FrameworkRegistry, GoTestRenderer, RenderTarget};
use super::{
    Assertion, Benchmark, ExampleScaffold, GenerationError, Result, TableRow, TargetSignature, TestCase,
    TestKind, TestSuite,
};
use crate::analysis::{Expectation, FileAnalysis, FunctionAnalysis, PathDescriptor, SourceAnalyzer};
use crate::config::{InfrastructureConfig, TestFileNaming, TestingFramework};
use regex_utils::gomod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Complexity above which a benchmark is generated
const BENCHMARK_COMPLEXITY: u32 = 3;

/// Attached to every case whose target has non-error outputs
pub const PLACEHOLDER_NOTE: &str =
    "outputs are not compared against expected values; nilable ones are only checked for nil";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub table_driven: bool,
    pub generate_benchmarks: bool,
    pub generate_examples: bool,
    pub framework: TestingFramework,
    pub naming: TestFileNaming,
    pub target_coverage: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            table_driven: true,
            generate_benchmarks: true,
            generate_examples: true,
            framework: TestingFramework::Standard,
            naming: TestFileNaming::Suffix,
            target_coverage: 80.0,
        }
    }
}

impl From<&InfrastructureConfig> for SynthesisConfig {
    fn from(config: &InfrastructureConfig) -> Self {
        Self {
            table_driven: config.table_driven,
            generate_benchmarks: config.generate_benchmarks,
            generate_examples: config.generate_examples,
            framework: config.testing_framework,
            naming: config.test_file_naming,
            target_coverage: config.target_coverage,
        }
    }
}

/// Generated files plus everything that went wrong on the way
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub files: BTreeMap<PathBuf, String>,
    pub suites: Vec<TestSuite>,
    pub errors: Vec<String>,
}

impl GenerationResult {
    pub fn merge(&mut self, other: GenerationResult) {
        self.files.extend(other.files);
        self.suites.extend(other.suites);
        self.errors.extend(other.errors);
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|s| s.test_cases.len()).sum()
    }
}

/// The Go module enclosing a source file
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub root: PathBuf,
    pub path: String,
}

pub struct TestSynthesizer {
    config: SynthesisConfig,
    analyzer: SourceAnalyzer,
    registry: FrameworkRegistry,
}

impl TestSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config, analyzer: SourceAnalyzer::new(), registry: FrameworkRegistry::new() }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Build a suite for one analyzed file. Functions that cannot be
    /// synthesized are reported in the returned error list.
    pub fn synthesize(&self, file: &FileAnalysis) -> (TestSuite, Vec<String>) {
        let mut suite = TestSuite::new(&file.package, &file.path);
        let mut errors = Vec::new();
        let mut all_cases = Vec::new();

        for function in &file.functions {
            let cases = match self.cases_for(function) {
                Ok(cases) => cases,
                Err(e) => {
                    warn!("Skipping {}: {}", function.name, e);
                    errors.push(format!("{}: {}", file.path.display(), e));
                    continue;
                }
            };
            if cases.is_empty() {
                debug!("No paths derived for {}", function.name);
                continue;
            }

            for param in function.parameters.iter().filter(|p| p.is_interface) {
                suite.mocks.push(format!("{}.{} ({})", function.test_target(), param.name, param.type_name));
            }
            if self.config.generate_benchmarks && wants_benchmark(function) {
                suite.benchmarks.push(Benchmark {
                    name: format!("Benchmark{}", function.test_target()),
                    signature: signature_of(function),
                    inputs: cases[0].inputs.clone(),
                });
            }
            if self.config.generate_examples && function.exported {
                suite.examples.push(ExampleScaffold {
                    name: format!("Example{}", function.test_target()),
                    signature: signature_of(function),
                    inputs: cases[0].inputs.clone(),
                });
            }

            all_cases.extend(cases.iter().cloned());
            if self.config.table_driven && cases.len() > 1 {
                suite.test_cases.push(fold_table_driven(function, cases));
            } else {
                suite.test_cases.extend(cases);
            }
        }

        let unit_no_panic = |c: &TestCase| c.kind == TestKind::Unit && c.assertions.contains(&Assertion::NoPanic);
        if suite.test_cases.iter().any(unit_no_panic) {
            suite.helpers.push(NO_PANIC_HELPER.to_string());
        }

        suite.coverage = CoverageEstimator::new(self.config.target_coverage).estimate(&file.functions, &all_cases);
        (suite, errors)
    }

    /// One case per happy path, error path and edge case
    pub fn cases_for(&self, function: &FunctionAnalysis) -> Result<Vec<TestCase>> {
        let generic_receiver = function.receiver.as_deref().is_some_and(|r| r.contains('['));
        if function.type_parameters || generic_receiver {
            return Err(GenerationError::Generic(function.name.clone()));
        }

        let target = function.test_target();
        let groups = [
            ("HappyPath", &function.happy_paths),
            ("Error", &function.error_paths),
            ("EdgeCase", &function.edge_cases),
        ];

        let mut cases = Vec::new();
        for (label, paths) in groups {
            for (i, path) in paths.iter().enumerate() {
                cases.push(self.case_for(function, &target, format!("Test{}_{}_{}", target, label, i + 1), path));
            }
        }
        Ok(cases)
    }

    fn case_for(&self, function: &FunctionAnalysis, target: &str, name: String, path: &PathDescriptor) -> TestCase {
        let mut assertions = Vec::new();
        let mut expected_outputs = Vec::new();
        let mut comments = vec![path.description.clone()];

        match &path.expectation {
            Expectation::Success => {
                for (i, ret) in function.returns.iter().enumerate() {
                    if ret.is_error() && i + 1 == function.returns.len() {
                        assertions.push(Assertion::NoError);
                        expected_outputs.push("nil error".to_string());
                    } else if ret.nilable {
                        assertions.push(Assertion::NotNil { output: i });
                        expected_outputs.push(format!("non-nil {}", ret.type_name));
                    } else {
                        expected_outputs.push(format!("any {}", ret.type_name));
                    }
                }
            }
            Expectation::Error { contains } => {
                assertions.push(Assertion::ErrorReturned);
                expected_outputs.push("non-nil error".to_string());
                if let Some(text) = contains {
                    assertions.push(Assertion::ErrorContains(text.clone()));
                    expected_outputs.push(format!("error containing {:?}", text));
                }
            }
            Expectation::NoPanic => {
                assertions.push(Assertion::NoPanic);
                expected_outputs.push("returns without panicking".to_string());
            }
        }

        if function.returns.iter().any(|r| !r.is_error()) {
            comments.push(PLACEHOLDER_NOTE.to_string());
        }

        let inputs = function
            .parameters
            .iter()
            .map(|p| {
                let value = path
                    .bindings
                    .get(&p.name)
                    .cloned()
                    .unwrap_or_else(|| p.type_info().representative_value());
                (p.name.clone(), value)
            })
            .collect();

        TestCase {
            name,
            target: target.to_string(),
            kind: TestKind::Unit,
            signature: signature_of(function),
            inputs,
            expected_outputs,
            setup: function.receiver.as_deref().map(receiver_setup).into_iter().collect(),
            teardown: Vec::new(),
            assertions,
            comments,
            complexity: 1,
            rows: Vec::new(),
        }
    }

    /// Render a suite into file text
    pub fn render(&self, suite: &TestSuite, target: &RenderTarget) -> String {
        let adapter = self
            .registry
            .for_framework(self.config.framework)
            .or_else(|| self.registry.get_adapter("testing"));
        match adapter {
            Some(adapter) => GoTestRenderer::new(adapter).render(suite, target),
            None => String::new(),
        }
    }

    /// Where the test file for `source` goes under the configured naming
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let dir = source.parent().unwrap_or_else(|| Path::new(""));
        let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("generated");
        match self.config.naming {
            TestFileNaming::Suffix => dir.join(format!("{}_test.go", stem)),
            TestFileNaming::Package => dir.join(format!("test_{}.go", stem)),
            TestFileNaming::Parallel => dir.join("tests").join(format!("{}_test.go", stem)),
        }
    }

    fn render_target(&self, analysis: &FileAnalysis, module: Option<&ModuleInfo>) -> std::result::Result<RenderTarget, String> {
        if self.config.naming != TestFileNaming::Parallel {
            return Ok(RenderTarget::same_package(&analysis.package, analysis.imports.clone()));
        }
        let module = module.ok_or_else(|| {
            format!("{}: no go.mod found; cannot import the package from tests/", analysis.path.display())
        })?;
        let dir = analysis.path.parent().unwrap_or_else(|| Path::new(""));
        let relative = dir.strip_prefix(&module.root).unwrap_or(Path::new(""));
        let mut import_path = module.path.clone();
        for component in relative.components() {
            import_path.push('/');
            import_path.push_str(&component.as_os_str().to_string_lossy());
        }
        Ok(RenderTarget {
            package: format!("{}_test", analysis.package),
            qualifier: Some(analysis.package.clone()),
            import_path: Some(import_path),
            source_imports: analysis.imports.clone(),
            declared_types: analysis.type_names.clone(),
        })
    }

    /// Synthesize and render one already-analyzed file
    pub fn generate_for_analysis(&self, analysis: &FileAnalysis, module: Option<&ModuleInfo>) -> GenerationResult {
        let mut result = GenerationResult::default();
        let (suite, errors) = self.synthesize(analysis);
        result.errors.extend(errors);

        if suite.is_empty() {
            result.suites.push(suite);
            return result;
        }
        match self.render_target(analysis, module) {
            Ok(target) => {
                let content = self.render(&suite, &target);
                result.files.insert(self.output_path(&analysis.path), content);
            }
            Err(e) => result.errors.push(e),
        }
        result.suites.push(suite);
        result
    }

    pub async fn generate_for_file(&self, path: &Path) -> GenerationResult {
        match self.analyzer.analyze_file(path).await {
            Ok(analysis) => {
                let module = find_module(path).await;
                self.generate_for_analysis(&analysis, module.as_ref())
            }
            Err(e) => GenerationResult { errors: vec![e.to_string()], ..Default::default() },
        }
    }

    /// Generate tests for every non-test Go file below `dir`
    pub async fn generate_for_dir(&self, dir: &Path) -> GenerationResult {
        let mut result = GenerationResult::default();
        let sources = go_sources(dir);
        let module = find_module(dir).await;

        for (path, analysis) in self.analyzer.analyze_files(&sources).await {
            match analysis {
                Ok(analysis) => result.merge(self.generate_for_analysis(&analysis, module.as_ref())),
                Err(e) => result.errors.push(format!("{}: {}", path.display(), e)),
            }
        }

        info!(
            "Generated {} test files ({} cases) with {} errors",
            result.files.len(),
            result.test_count(),
            result.errors.len()
        );
        result
    }
}

/// Fold several cases of one function into a single table-driven case
pub fn fold_table_driven(function: &FunctionAnalysis, cases: Vec<TestCase>) -> TestCase {
    let target = function.test_target();
    let prefix = format!("Test{}_", target);
    let count = cases.len() as u32;

    let rows: Vec<TableRow> = cases
        .iter()
        .map(|case| TableRow {
            name: case.name.strip_prefix(&prefix).unwrap_or(&case.name).to_string(),
            inputs: case.inputs.clone(),
            assertions: case.assertions.clone(),
            comment: case.comments.first().cloned().unwrap_or_default(),
        })
        .collect();

    let mut expected_outputs: Vec<String> = Vec::new();
    for case in &cases {
        for output in &case.expected_outputs {
            if !expected_outputs.contains(output) {
                expected_outputs.push(output.clone());
            }
        }
    }

    let mut comments = vec![format!("{} scenarios derived from {}", count, function.name)];
    if cases.iter().any(|c| c.comments.iter().any(|n| n == PLACEHOLDER_NOTE)) {
        comments.push(PLACEHOLDER_NOTE.to_string());
    }

    TestCase {
        name: format!("Test{}", target),
        target,
        kind: TestKind::TableDriven,
        signature: signature_of(function),
        inputs: Vec::new(),
        expected_outputs,
        setup: cases.first().map(|c| c.setup.clone()).unwrap_or_default(),
        teardown: Vec::new(),
        assertions: Vec::new(),
        comments,
        complexity: count,
        rows,
    }
}

fn wants_benchmark(function: &FunctionAnalysis) -> bool {
    function.complexity > BENCHMARK_COMPLEXITY || function.name.to_lowercase().contains("process")
}

fn signature_of(function: &FunctionAnalysis) -> TargetSignature {
    TargetSignature {
        function: function.name.clone(),
        receiver: function.receiver.clone(),
        params: function.parameters.clone(),
        returns: function.returns.clone(),
    }
}

/// Non-test `.go` files, skipping vendored, hidden and generated test directories
pub fn go_sources(dir: &Path) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !(name.starts_with('.') || name == "vendor" || name == "testdata" || (entry.file_type().is_dir() && name == "tests"))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            name.ends_with(".go") && !name.ends_with("_test.go") && !name.starts_with("test_")
        })
        .collect();
    sources.sort();
    sources
}

/// Locate the nearest go.mod at or above `start`
pub async fn find_module(start: &Path) -> Option<ModuleInfo> {
    let is_dir = tokio::fs::metadata(start).await.is_ok_and(|m| m.is_dir());
    let mut current = if is_dir { Some(start) } else { start.parent() };
    while let Some(dir) = current {
        let candidate = dir.join("go.mod");
        if let Ok(content) = tokio::fs::read_to_string(&candidate).await {
            let path = content
                .lines()
                .find_map(|line| gomod::MODULE.captures(line.trim()).map(|caps| caps[1].to_string()))?;
            return Some(ModuleInfo { root: dir.to_path_buf(), path });
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SOURCE: &str = r#"package shop

import (
	"errors"
	"strings"
)

type Cart struct{ items []string }

// AddItem adds an item to the cart.
func (c *Cart) AddItem(name string) error {
	if name == "" {
		return errors.New("item name required")
	}
	c.items = append(c.items, strings.TrimSpace(name))
	return nil
}

func ProcessOrder(qty int) int {
	return qty * 2
}

func Map[T any](values []T) []T {
	return values
}
"#;

    fn analysis() -> FileAnalysis {
        SourceAnalyzer::new().analyze_source(Path::new("shop/cart.go"), SOURCE).unwrap()
    }

    fn synthesizer(table_driven: bool) -> TestSynthesizer {
        TestSynthesizer::new(SynthesisConfig { table_driven, ..Default::default() })
    }

    #[test]
    fn test_case_names_and_assertions() {
        let analysis = analysis();
        let cases = synthesizer(false).cases_for(&analysis.functions[0]).unwrap();
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names[0], "TestCart_AddItem_HappyPath_1");
        assert!(names.contains(&"TestCart_AddItem_Error_1"));

        let error_case = cases.iter().find(|c| c.name == "TestCart_AddItem_Error_1").unwrap();
        assert_eq!(
            error_case.assertions,
            vec![Assertion::ErrorReturned, Assertion::ErrorContains("item name required".to_string())]
        );
        assert_eq!(error_case.inputs, vec![("name".to_string(), "\"\"".to_string())]);
        assert_eq!(error_case.setup, vec!["recv := new(Cart)".to_string()]);
    }

    #[test]
    fn test_table_driven_folding() {
        let analysis = analysis();
        let add_item = &analysis.functions[0];
        let individual = synthesizer(false).cases_for(add_item).unwrap();
        assert!(individual.len() > 1);

        let (suite, _) = synthesizer(true).synthesize(&analysis);
        let folded: Vec<&TestCase> = suite.test_cases.iter().filter(|c| c.target == "Cart_AddItem").collect();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].name, "TestCart_AddItem");
        assert_eq!(folded[0].kind, TestKind::TableDriven);
        assert_eq!(folded[0].complexity, individual.len() as u32);
        assert_eq!(folded[0].rows[0].name, "HappyPath_1");
    }

    #[test]
    fn test_success_assertions_follow_output_types() {
        let source = r#"package stats

func Count() (int, error) {
	return 1, nil
}

func Names() ([]string, error) {
	return []string{"a"}, nil
}

func Flush() error {
	return nil
}
"#;
        let analysis = SourceAnalyzer::new().analyze_source(Path::new("stats/stats.go"), source).unwrap();
        let happy = |i: usize| synthesizer(false).cases_for(&analysis.functions[i]).unwrap().remove(0);

        let count = happy(0);
        assert_eq!(count.name, "TestCount_HappyPath_1");
        assert_eq!(count.assertions, vec![Assertion::NoError]);
        assert_eq!(count.expected_outputs, vec!["any int".to_string(), "nil error".to_string()]);
        assert!(count.comments.iter().any(|c| c == PLACEHOLDER_NOTE));

        let names = happy(1);
        assert_eq!(names.assertions, vec![Assertion::NotNil { output: 0 }, Assertion::NoError]);
        assert!(names.comments.iter().any(|c| c == PLACEHOLDER_NOTE));

        let flush = happy(2);
        assert_eq!(flush.assertions, vec![Assertion::NoError]);
        assert!(!flush.comments.iter().any(|c| c == PLACEHOLDER_NOTE));
    }

    #[test]
    fn test_edge_cases_pull_in_panic_helper() {
        let source = "package list\n\nfunc Head(items []string) string {\n\treturn items[0]\n}\n";
        let analysis = SourceAnalyzer::new().analyze_source(Path::new("list/list.go"), source).unwrap();

        let (suite, _) = synthesizer(false).synthesize(&analysis);
        assert!(suite.test_cases.iter().any(|c| c.assertions == vec![Assertion::NoPanic]));
        assert_eq!(suite.helpers, vec![NO_PANIC_HELPER.to_string()]);

        let (folded, _) = synthesizer(true).synthesize(&analysis);
        assert!(folded.helpers.is_empty());
    }

    #[test]
    fn test_three_cases_fold_into_one() {
        let analysis = analysis();
        let function = &analysis.functions[0];
        let cases: Vec<TestCase> = synthesizer(false).cases_for(function).unwrap().into_iter().take(3).collect();
        let folded = fold_table_driven(function, cases);
        assert_eq!(folded.complexity, 3);
        assert_eq!(folded.rows.len(), 3);
    }

    #[test]
    fn test_benchmarks_examples_and_generic_errors() {
        let (suite, errors) = synthesizer(true).synthesize(&analysis());
        let benchmarks: Vec<&str> = suite.benchmarks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(benchmarks, vec!["BenchmarkProcessOrder"]);
        let examples: Vec<&str> = suite.examples.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(examples, vec!["ExampleCart_AddItem", "ExampleProcessOrder"]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Map"));
    }

    #[test]
    fn test_output_paths_follow_naming() {
        let source = Path::new("pkg/cart.go");
        let with = |naming| TestSynthesizer::new(SynthesisConfig { naming, ..Default::default() }).output_path(source);
        assert_eq!(with(TestFileNaming::Suffix), PathBuf::from("pkg/cart_test.go"));
        assert_eq!(with(TestFileNaming::Package), PathBuf::from("pkg/test_cart.go"));
        assert_eq!(with(TestFileNaming::Parallel), PathBuf::from("pkg/tests/cart_test.go"));
    }

    #[tokio::test]
    async fn test_generate_for_dir() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("go.mod"), "module example.com/shop\n\ngo 1.22\n").await.unwrap();
        tokio::fs::write(dir.path().join("cart.go"), SOURCE).await.unwrap();
        tokio::fs::write(dir.path().join("broken.go"), "package shop\nfunc (").await.unwrap();

        let result = synthesizer(true).generate_for_dir(dir.path()).await;
        let content = result.files.get(&dir.path().join("cart_test.go")).unwrap();
        assert!(content.contains("func TestCart_AddItem(t *testing.T)"));
        assert!(content.contains("recv := new(Cart)"));
        assert!(content.contains("func BenchmarkProcessOrder(b *testing.B)"));
        assert!(result.errors.iter().any(|e| e.contains("broken.go")));
        assert!(result.errors.iter().any(|e| e.contains("Map")));
    }

    #[tokio::test]
    async fn test_find_module_from_file_or_dir() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("shop");
        tokio::fs::create_dir_all(&pkg).await.unwrap();
        tokio::fs::write(dir.path().join("go.mod"), "module example.com/app\n").await.unwrap();
        tokio::fs::write(pkg.join("cart.go"), SOURCE).await.unwrap();

        let from_file = find_module(&pkg.join("cart.go")).await.unwrap();
        let from_dir = find_module(&pkg).await.unwrap();
        assert_eq!(from_file.root, dir.path());
        assert_eq!(from_file.path, "example.com/app");
        assert_eq!(from_dir.root, dir.path());
        assert_eq!(find_module(dir.path()).await.unwrap().root, dir.path());
    }

    #[tokio::test]
    async fn test_parallel_naming_imports_module_package() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("shop");
        tokio::fs::create_dir_all(&pkg).await.unwrap();
        tokio::fs::write(dir.path().join("go.mod"), "module example.com/app\n").await.unwrap();
        tokio::fs::write(pkg.join("cart.go"), SOURCE).await.unwrap();

        let synthesizer = TestSynthesizer::new(SynthesisConfig { naming: TestFileNaming::Parallel, ..Default::default() });
        let result = synthesizer.generate_for_file(&pkg.join("cart.go")).await;
        let content = result.files.get(&pkg.join("tests").join("cart_test.go")).unwrap();
        assert!(content.contains("package shop_test"));
        assert!(content.contains("\"example.com/app/shop\""));
        assert!(content.contains("recv := new(shop.Cart)"));
        assert!(content.contains("shop.ProcessOrder("));
    }
}
