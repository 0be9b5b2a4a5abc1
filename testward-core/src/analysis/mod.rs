//! Static analysis of Go sources
//!
//! Parses files into a [`SourceModel`], then derives one [`FunctionAnalysis`]
//! per exported function: classified parameters and results, complexity,
//! dependencies, and the happy, error and edge paths later turned into tests.

pub mod go;
pub mod model;
pub mod paths;
pub mod types;

pub use go::GoSource;
pub use model::{ControlFlowNode, FunctionSignature, SourceModel};
pub use types::{TypeInfo, TypeKind};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to parse {path}:{line}: {message}")]
    Parse { path: PathBuf, line: usize, message: String },

    #[error("Parser initialization failed: {0}")]
    ParserInit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Classified parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub type_name: String,
    pub is_pointer: bool,
    pub is_slice: bool,
    pub is_map: bool,
    pub is_interface: bool,
    pub variadic: bool,
    pub nilable: bool,
}

impl ParameterInfo {
    /// Variadic parameters are stored with their slice type
    pub fn new(name: impl Into<String>, type_name: &str, variadic: bool) -> Self {
        let written = if variadic { format!("...{}", type_name) } else { type_name.to_string() };
        let info = TypeInfo::classify(&written);
        Self {
            name: name.into(),
            is_pointer: info.is_pointer(),
            is_slice: info.is_slice(),
            is_map: info.is_map(),
            is_interface: info.is_interface(),
            nilable: info.is_nilable(),
            type_name: info.raw,
            variadic,
        }
    }

    pub fn type_info(&self) -> TypeInfo {
        TypeInfo::classify(&self.type_name)
    }
}

/// Classified result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReturnInfo {
    pub type_name: String,
    pub is_pointer: bool,
    pub is_slice: bool,
    pub is_map: bool,
    pub is_interface: bool,
    pub nilable: bool,
}

impl ReturnInfo {
    pub fn new(type_name: &str) -> Self {
        let info = TypeInfo::classify(type_name);
        Self {
            is_pointer: info.is_pointer(),
            is_slice: info.is_slice(),
            is_map: info.is_map(),
            is_interface: info.is_interface(),
            nilable: info.is_nilable(),
            type_name: info.raw,
        }
    }

    pub fn is_error(&self) -> bool {
        self.type_name == "error"
    }
}

/// What a generated test should check for a path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Expectation {
    Success,
    Error { contains: Option<String> },
    NoPanic,
}

/// One execution path through a function and the inputs that reach it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathDescriptor {
    pub description: String,
    pub condition: Option<String>,
    /// Parameter name to Go expression
    pub bindings: HashMap<String, String>,
    pub expectation: Expectation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionAnalysis {
    pub name: String,
    pub file: PathBuf,
    pub package: String,
    pub exported: bool,
    pub is_method: bool,
    pub receiver: Option<String>,
    pub parameters: Vec<ParameterInfo>,
    pub returns: Vec<ReturnInfo>,
    pub dependencies: Vec<String>,
    pub complexity: u32,
    pub documentation: String,
    pub happy_paths: Vec<PathDescriptor>,
    pub error_paths: Vec<PathDescriptor>,
    pub edge_cases: Vec<PathDescriptor>,
    pub type_parameters: bool,
    pub start_line: usize,
    pub end_line: usize,
}

impl FunctionAnalysis {
    /// `Fn` for functions, `Recv_Method` for methods
    pub fn test_target(&self) -> String {
        match &self.receiver {
            Some(receiver) => format!("{}_{}", receiver_base(receiver), self.name),
            None => self.name.clone(),
        }
    }

    pub fn returns_error(&self) -> bool {
        self.returns.last().is_some_and(ReturnInfo::is_error)
    }

    pub fn path_count(&self) -> usize {
        self.happy_paths.len() + self.error_paths.len() + self.edge_cases.len()
    }
}

/// Receiver type without pointer or type arguments: `*Store[T]` becomes `Store`
pub fn receiver_base(receiver: &str) -> &str {
    let trimmed = receiver.trim_start_matches('*');
    trimmed.split('[').next().unwrap_or(trimmed)
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

/// Exported, not `init`, and not itself a test, benchmark or example
pub fn should_generate_tests_for(name: &str) -> bool {
    is_exported(name)
        && name != "init"
        && !["Test", "Benchmark", "Example"].iter().any(|prefix| name.starts_with(prefix))
}

/// Everything learned from one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub package: String,
    pub imports: Vec<(String, String)>,
    pub functions: Vec<FunctionAnalysis>,
    /// Test targets of every declared function, eligible or not
    pub declared_targets: Vec<String>,
    pub type_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceAnalyzer;

impl SourceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze every eligible function of a parsed model
    pub fn analyze_model(&self, model: &dyn SourceModel, file: &Path) -> Vec<FunctionAnalysis> {
        let imports = model.imports();
        model
            .functions()
            .into_iter()
            .filter(|signature| should_generate_tests_for(&signature.name))
            .map(|signature| self.analyze_function(model, &signature, file, &imports))
            .collect()
    }

    fn analyze_function(
        &self,
        model: &dyn SourceModel,
        signature: &FunctionSignature,
        file: &Path,
        imports: &[(String, String)],
    ) -> FunctionAnalysis {
        let parameters: Vec<ParameterInfo> = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let name = match param.name.as_deref() {
                    Some(name) if name != "_" => name.to_string(),
                    _ => format!("arg{}", i),
                };
                ParameterInfo::new(name, &param.type_name, param.variadic)
            })
            .collect();
        let returns: Vec<ReturnInfo> = signature.results.iter().map(|r| ReturnInfo::new(&r.type_name)).collect();
        let returns_error = returns.last().is_some_and(ReturnInfo::is_error);

        let body = model.body(signature);
        let derived = paths::derive(&parameters, returns_error, body.as_ref());
        let complexity = body.as_ref().map(paths::complexity).unwrap_or(1);
        let dependencies = body.as_ref().map(|b| paths::dependencies(b, imports)).unwrap_or_default();

        debug!(
            "Analyzed {} (complexity {}, {} paths)",
            signature.name,
            complexity,
            derived.happy.len() + derived.error.len() + derived.edge.len()
        );

        FunctionAnalysis {
            name: signature.name.clone(),
            file: file.to_path_buf(),
            package: model.package_name().to_string(),
            exported: is_exported(&signature.name),
            is_method: signature.is_method(),
            receiver: signature.receiver.as_ref().map(|r| r.type_name.clone()),
            parameters,
            returns,
            dependencies,
            complexity,
            documentation: signature.doc.clone(),
            happy_paths: derived.happy,
            error_paths: derived.error,
            edge_cases: derived.edge,
            type_parameters: signature.type_parameters,
            start_line: signature.start_line,
            end_line: signature.end_line,
        }
    }

    /// Parse and analyze source text
    pub fn analyze_source(&self, path: &Path, source: &str) -> Result<FileAnalysis> {
        let model = GoSource::parse(path, source)?;
        let declared_targets = model
            .functions()
            .iter()
            .map(|f| match &f.receiver {
                Some(receiver) => format!("{}_{}", receiver_base(&receiver.type_name), f.name),
                None => f.name.clone(),
            })
            .collect();

        Ok(FileAnalysis {
            path: path.to_path_buf(),
            package: model.package_name().to_string(),
            imports: model.imports(),
            functions: self.analyze_model(&model, path),
            declared_targets,
            type_names: model.type_names(),
        })
    }

    pub async fn analyze_file(&self, path: &Path) -> Result<FileAnalysis> {
        let source = tokio::fs::read_to_string(path).await?;
        self.analyze_source(path, &source)
    }

    /// Analyze each file independently; one file's failure never affects another
    pub async fn analyze_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<FileAnalysis>)> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = self.analyze_file(path).await;
            if let Err(e) = &result {
                warn!("Skipping {}: {}", path.display(), e);
            }
            results.push((path.clone(), result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const SOURCE: &str = r#"package calc

import "errors"

func init() {}

func helper(x int) int { return x }

// Divide divides a by b.
func Divide(a, b int) (int, error) {
	if b == 0 {
		return 0, errors.New("division by zero")
	}
	return a / b, nil
}

func TestLooksLikeATest() {}

type Acc struct{ total int }

func (a *Acc) Add(n int) {
	a.total += n
}
"#;

    #[test]
    fn test_only_eligible_functions_are_analyzed() {
        let analysis = SourceAnalyzer::new().analyze_source(Path::new("calc.go"), SOURCE).unwrap();
        let names: Vec<&str> = analysis.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Divide", "Add"]);
        assert!(analysis.declared_targets.contains(&"helper".to_string()));
        assert!(analysis.declared_targets.contains(&"Acc_Add".to_string()));
    }

    #[test]
    fn test_function_analysis_contents() {
        let analysis = SourceAnalyzer::new().analyze_source(Path::new("calc.go"), SOURCE).unwrap();
        let divide = &analysis.functions[0];
        assert_eq!(divide.package, "calc");
        assert_eq!(divide.parameters.len(), 2);
        assert_eq!(divide.parameters[1].name, "b");
        assert!(divide.returns_error());
        assert!(divide.returns[1].nilable);
        assert_eq!(divide.complexity, 2);
        assert_eq!(divide.documentation, "Divide divides a by b.");
        assert_eq!(divide.error_paths.len(), 1);
        assert_eq!(divide.error_paths[0].bindings["b"], "0");
        assert_eq!(divide.happy_paths[0].bindings["b"], "1");

        let add = &analysis.functions[1];
        assert!(add.is_method);
        assert_eq!(add.test_target(), "Acc_Add");
        assert_eq!(add.complexity, 1);
    }

    #[tokio::test]
    async fn test_parse_error_is_scoped_to_its_file() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.go");
        let bad = dir.path().join("bad.go");
        tokio::fs::write(&good, SOURCE).await.unwrap();
        tokio::fs::write(&bad, "package calc\nfunc Broken( {\n").await.unwrap();

        let results = SourceAnalyzer::new().analyze_files(&[bad.clone(), good.clone()]).await;
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Err(AnalysisError::Parse { .. })));
        assert_eq!(results[1].1.as_ref().unwrap().functions.len(), 2);
    }

    #[test]
    fn test_receiver_base() {
        assert_eq!(receiver_base("*Store"), "Store");
        assert_eq!(receiver_base("Cache[K, V]"), "Cache");
    }

    proptest! {
        #[test]
        fn prop_test_artifacts_are_never_targets(
            prefix in prop_oneof![Just("Test"), Just("Benchmark"), Just("Example")],
            rest in "[A-Za-z0-9_]{0,12}",
        ) {
            let name = format!("{}{}", prefix, rest);
            prop_assert!(!should_generate_tests_for(&name));
        }

        #[test]
        fn prop_unexported_are_never_targets(name in "[a-z_][A-Za-z0-9_]{0,12}") {
            prop_assert!(!should_generate_tests_for(&name));
        }
    }

    #[test]
    fn test_init_is_never_a_target() {
        assert!(!should_generate_tests_for("init"));
        assert!(should_generate_tests_for("Process"));
    }
}
