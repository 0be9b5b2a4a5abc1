//! Test synthesis from function analyses
//!
//! Turns the paths found by the analyzer into Go test cases, folds them into
//! table-driven tests, estimates coverage and renders whole `_test.go` files.
//! Generated assertions are scaffolds: nilable outputs other than errors are
//! only checked for being non-nil, and value outputs are not checked at all.

pub mod coverage;
pub mod frameworks;
pub mod generator;

pub use coverage::{CoverageAnalysis, CoverageEstimator};
pub use generator::{GenerationResult, SynthesisConfig, TestSynthesizer};

use crate::analysis::{ParameterInfo, ReturnInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0} has type parameters; generic instantiation is not supported")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TestKind {
    Unit,
    TableDriven,
    Integration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Assertion {
    ErrorReturned,
    ErrorContains(String),
    NoError,
    /// Heuristic placeholder: the output at this position is not nil
    NotNil { output: usize },
    NoPanic,
}

/// What the rendered call looks like
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSignature {
    pub function: String,
    pub receiver: Option<String>,
    pub params: Vec<ParameterInfo>,
    pub returns: Vec<ReturnInfo>,
}

impl TargetSignature {
    pub fn returns_error(&self) -> bool {
        self.returns.last().is_some_and(ReturnInfo::is_error)
    }
}

/// One scenario of a table-driven test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRow {
    pub name: String,
    pub inputs: Vec<(String, String)>,
    pub assertions: Vec<Assertion>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub name: String,
    /// `Fn` or `Recv_Method`
    pub target: String,
    pub kind: TestKind,
    pub signature: TargetSignature,
    /// Parameter name to Go expression, in parameter order
    pub inputs: Vec<(String, String)>,
    pub expected_outputs: Vec<String>,
    pub setup: Vec<String>,
    pub teardown: Vec<String>,
    pub assertions: Vec<Assertion>,
    pub comments: Vec<String>,
    pub complexity: u32,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Benchmark {
    pub name: String,
    pub signature: TargetSignature,
    pub inputs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExampleScaffold {
    pub name: String,
    pub signature: TargetSignature,
    pub inputs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub package: String,
    pub source_file: PathBuf,
    pub test_cases: Vec<TestCase>,
    /// Go helper declarations shared by the suite's tests, rendered verbatim
    pub helpers: Vec<String>,
    /// Parameters of interface type that need a hand-written fake
    pub mocks: Vec<String>,
    pub benchmarks: Vec<Benchmark>,
    pub examples: Vec<ExampleScaffold>,
    pub coverage: CoverageAnalysis,
}

impl TestSuite {
    pub fn new(package: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        Self {
            package: package.into(),
            source_file: source_file.into(),
            test_cases: Vec::new(),
            helpers: Vec::new(),
            mocks: Vec::new(),
            benchmarks: Vec::new(),
            examples: Vec::new(),
            coverage: CoverageAnalysis::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty() && self.benchmarks.is_empty() && self.examples.is_empty()
    }
}
