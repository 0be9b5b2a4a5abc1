//! Regex utilities for testward
//! Extracted to a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns for `go test -v` output
pub mod test_output {
    use super::*;

    pub static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*--- (PASS|FAIL|SKIP): (\S+) \(([0-9]+(?:\.[0-9]+)?)s\)")
            .expect("Invalid regex pattern")
    });

    /// Outcome reported on a result line
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Outcome {
        Pass,
        Fail,
        Skip,
    }

    /// A single parsed `--- PASS: name (0.12s)` line
    #[derive(Debug, Clone, PartialEq)]
    pub struct ResultLine {
        pub outcome: Outcome,
        pub name: String,
        pub seconds: f64,
    }

    pub static BENCHMARK_LINE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(Benchmark\S+?)(?:-\d+)?\s+(\d+)\s+([0-9]+(?:\.[0-9]+)?) ns/op(?:\s+([0-9]+(?:\.[0-9]+)?) B/op)?")
            .expect("Invalid regex pattern")
    });

    /// A `BenchmarkX-8  1000  1234 ns/op  56 B/op` line
    #[derive(Debug, Clone, PartialEq)]
    pub struct BenchmarkLine {
        pub name: String,
        pub iterations: u64,
        pub ns_per_op: f64,
        pub bytes_per_op: Option<f64>,
    }

    pub fn parse_benchmark(line: &str) -> Option<BenchmarkLine> {
        let caps = BENCHMARK_LINE.captures(line.trim_start())?;
        Some(BenchmarkLine {
            name: caps.get(1)?.as_str().to_string(),
            iterations: caps.get(2)?.as_str().parse().ok()?,
            ns_per_op: caps.get(3)?.as_str().parse().ok()?,
            bytes_per_op: caps.get(4).and_then(|m| m.as_str().parse().ok()),
        })
    }

    /// Parse one line of runner output
    pub fn parse_line(line: &str) -> Option<ResultLine> {
        let caps = RESULT_LINE.captures(line)?;
        let outcome = match caps.get(1)?.as_str() {
            "PASS" => Outcome::Pass,
            "FAIL" => Outcome::Fail,
            _ => Outcome::Skip,
        };
        let seconds = caps.get(3)?.as_str().parse().ok()?;

        Some(ResultLine { outcome, name: caps.get(2)?.as_str().to_string(), seconds })
    }
}

/// go.mod directive patterns
pub mod gomod {
    use super::*;

    pub static MODULE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^module\s+(\S+)").expect("Invalid regex pattern"));

    pub static GO_VERSION: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^go\s+(\S+)").expect("Invalid regex pattern"));

    /// `path version [// indirect]`, with or without a leading `require`
    pub static REQUIREMENT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:require\s+)?(\S+)\s+(v\S+)(\s*//\s*indirect)?")
            .expect("Invalid regex pattern")
    });

    /// `old [version] => new [version]`, with or without a leading `replace`
    pub static REPLACEMENT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:replace\s+)?(\S+)(?:\s+(v\S+))?\s+=>\s+(\S+)(?:\s+(v\S+))?")
            .expect("Invalid regex pattern")
    });

    /// Timestamp segment of a pseudo-version such as `v0.0.0-20190101120000-abcdef123456`
    pub static PSEUDO_VERSION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"[-.](\d{14})-[0-9a-f]{12}(?:\+incompatible)?$").expect("Invalid regex pattern")
    });

    /// Major version suffix of a module path, e.g. `github.com/a/b/v2`
    pub static MAJOR_SUFFIX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(.+)/v(\d+)$").expect("Invalid regex pattern"));

    /// Split a module path into its base path and major version
    pub fn major_version(path: &str) -> (String, u64) {
        match MAJOR_SUFFIX.captures(path) {
            Some(caps) => {
                let major = caps[2].parse().unwrap_or(1);
                (caps[1].to_string(), major)
            }
            None => (path.to_string(), 1),
        }
    }
}

/// Optimization rule condition grammar: `<metric> <op> <value>[unit]`
pub mod rule_condition {
    use super::*;

    pub static CONDITION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*([a-z_]+)\s*(>=|<=|==|!=|>|<)\s*([0-9]+(?:\.[0-9]+)?)\s*(ms|s|m|%)?\s*$")
            .expect("Invalid regex pattern")
    });
}

/// Names of tests emitted by the generator
pub mod generated_test {
    use super::*;

    pub static CASE_NAME: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^Test([A-Za-z0-9]+(?:_[A-Za-z0-9]+)?)_(?:HappyPath|Error|EdgeCase)_\d+$")
            .expect("Invalid regex pattern")
    });

    /// Recover the target of a generated per-case test name
    pub fn target_of(test_name: &str) -> Option<String> {
        CASE_NAME.captures(test_name).map(|caps| caps[1].to_string())
    }
}
