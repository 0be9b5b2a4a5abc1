//! Coverage estimation over synthesized cases

use super::{Assertion, TestCase};
use crate::analysis::FunctionAnalysis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complexity above which a function is always reported as a critical path
const CRITICAL_COMPLEXITY: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageGap {
    pub function: String,
    pub complexity: u32,
    pub cases: u32,
    pub coverage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageAnalysis {
    pub estimated_coverage: f64,
    pub target_coverage: f64,
    pub meets_target: bool,
    /// `file:start-end` of functions without any case
    pub uncovered_lines: Vec<String>,
    pub critical_paths: Vec<String>,
    pub gaps: Vec<CoverageGap>,
}

impl Default for CoverageAnalysis {
    fn default() -> Self {
        Self {
            estimated_coverage: 100.0,
            target_coverage: 0.0,
            meets_target: true,
            uncovered_lines: Vec::new(),
            critical_paths: Vec::new(),
            gaps: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    cases: u32,
    error_cases: u32,
}

pub struct CoverageEstimator {
    target: f64,
}

impl CoverageEstimator {
    pub fn new(target: f64) -> Self {
        Self { target }
    }

    /// Each function contributes its complexity, scaled by how many of its
    /// paths have a case. Table-driven cases count every folded row.
    pub fn estimate(&self, functions: &[FunctionAnalysis], cases: &[TestCase]) -> CoverageAnalysis {
        let mut tallies: HashMap<&str, Tally> = HashMap::new();
        for case in cases {
            let tally = tallies.entry(case.target.as_str()).or_default();
            tally.cases += case.complexity;
            let is_error = |assertions: &[Assertion]| assertions.contains(&Assertion::ErrorReturned);
            tally.error_cases += if case.rows.is_empty() {
                u32::from(is_error(&case.assertions))
            } else {
                case.rows.iter().filter(|row| is_error(&row.assertions)).count() as u32
            };
        }

        let mut analysis = CoverageAnalysis { target_coverage: self.target, ..Default::default() };
        let mut weighted = 0.0;
        let mut total = 0.0;

        for function in functions {
            let target = function.test_target();
            let complexity = function.complexity.max(1);
            let (count, error_count) = tallies
                .get(target.as_str())
                .map(|t| (t.cases, t.error_cases))
                .unwrap_or((0, 0));

            let ratio = (count as f64 / complexity as f64).min(1.0);
            weighted += complexity as f64 * ratio;
            total += complexity as f64;

            if ratio < 1.0 {
                analysis.gaps.push(CoverageGap {
                    function: target.clone(),
                    complexity,
                    cases: count,
                    coverage: ratio * 100.0,
                });
            }
            if count == 0 {
                analysis.uncovered_lines.push(format!(
                    "{}:{}-{}",
                    function.file.display(),
                    function.start_line,
                    function.end_line
                ));
            }
            if complexity > CRITICAL_COMPLEXITY {
                analysis.critical_paths.push(format!("{} (complexity {})", target, complexity));
            } else if !function.error_paths.is_empty() && error_count == 0 {
                analysis.critical_paths.push(format!("{} (error paths untested)", target));
            }
        }

        if total > 0.0 {
            analysis.estimated_coverage = (100.0 * weighted / total).min(100.0);
        }
        analysis.meets_target = analysis.estimated_coverage >= self.target;
        analysis
    }
}
