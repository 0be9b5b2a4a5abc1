//! Test framework adapters for rendering Go test files

pub mod go;

use crate::config::TestingFramework;
use crate::test_gen::Assertion;

pub use go::{GoTestRenderer, RenderTarget};

/// Framework-specific assertion syntax. Every argument is a Go expression.
pub trait TestFrameworkAdapter: Send + Sync {
    fn framework_name(&self) -> &str;

    /// Import paths every file rendered for this framework may need
    fn imports(&self) -> Vec<&'static str>;

    fn assert_error(&self, err: &str) -> String;

    fn assert_error_contains(&self, err: &str, substring: &str) -> String;

    fn assert_no_error(&self, err: &str) -> String;

    /// Heuristic stand-in for an equality check on a nilable output
    fn assert_not_nil(&self, value: &str) -> String;

    /// Generate assertion code given the local names of the call's outputs
    fn generate_assertion(&self, assertion: &Assertion, outputs: &[String]) -> Option<String> {
        match assertion {
            Assertion::ErrorReturned => Some(self.assert_error("err")),
            Assertion::ErrorContains(text) => {
                Some(self.assert_error_contains("err", &format!("\"{}\"", codegen::escape_string(text))))
            }
            Assertion::NoError => Some(self.assert_no_error("err")),
            Assertion::NotNil { output } => outputs.get(*output).map(|name| self.assert_not_nil(name)),
            Assertion::NoPanic => None,
        }
    }
}

/// The standard library `testing` package
pub struct StandardAdapter;

impl TestFrameworkAdapter for StandardAdapter {
    fn framework_name(&self) -> &str {
        "testing"
    }

    fn imports(&self) -> Vec<&'static str> {
        vec!["strings", "testing"]
    }

    fn assert_error(&self, err: &str) -> String {
        format!("if {err} == nil {{\n\tt.Fatal(\"expected an error, got nil\")\n}}")
    }

    fn assert_error_contains(&self, err: &str, substring: &str) -> String {
        format!(
            "if !strings.Contains({err}.Error(), {substring}) {{\n\tt.Errorf(\"error %q does not contain %q\", {err}.Error(), {substring})\n}}"
        )
    }

    fn assert_no_error(&self, err: &str) -> String {
        format!("if {err} != nil {{\n\tt.Fatalf(\"unexpected error: %v\", {err})\n}}")
    }

    fn assert_not_nil(&self, value: &str) -> String {
        format!("if {value} == nil {{\n\tt.Error(\"expected {value} to be non-nil\")\n}}")
    }
}

/// github.com/stretchr/testify
pub struct TestifyAdapter;

impl TestFrameworkAdapter for TestifyAdapter {
    fn framework_name(&self) -> &str {
        "testify"
    }

    fn imports(&self) -> Vec<&'static str> {
        vec!["testing", "github.com/stretchr/testify/assert", "github.com/stretchr/testify/require"]
    }

    fn assert_error(&self, err: &str) -> String {
        format!("require.Error(t, {err})")
    }

    fn assert_error_contains(&self, err: &str, substring: &str) -> String {
        format!("assert.ErrorContains(t, {err}, {substring})")
    }

    fn assert_no_error(&self, err: &str) -> String {
        format!("require.NoError(t, {err})")
    }

    fn assert_not_nil(&self, value: &str) -> String {
        format!("assert.NotNil(t, {value})")
    }
}

/// Registry of available framework adapters
pub struct FrameworkRegistry {
    adapters: Vec<Box<dyn TestFrameworkAdapter>>,
}

impl FrameworkRegistry {
    pub fn new() -> Self {
        Self { adapters: vec![Box::new(StandardAdapter), Box::new(TestifyAdapter)] }
    }

    /// Get adapter by framework name
    pub fn get_adapter(&self, name: &str) -> Option<&dyn TestFrameworkAdapter> {
        self.adapters
            .iter()
            .find(|a| a.framework_name().eq_ignore_ascii_case(name))
            .map(|a| a.as_ref())
    }

    pub fn for_framework(&self, framework: TestingFramework) -> Option<&dyn TestFrameworkAdapter> {
        match framework {
            TestingFramework::Standard => self.get_adapter("testing"),
            TestingFramework::Testify => self.get_adapter("testify"),
        }
    }

    pub fn list_frameworks(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.framework_name().to_string()).collect()
    }
}

impl Default for FrameworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper functions for code generation
pub mod codegen {
    /// Indent every non-empty line by `tabs` tabs
    pub fn indent(code: &str, tabs: usize) -> String {
        let prefix = "\t".repeat(tabs);
        code.lines()
            .map(|line| if line.is_empty() { line.to_string() } else { format!("{}{}", prefix, line) })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Escape text for a Go interpreted string literal
    pub fn escape_string(s: &str) -> String {
        s.replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t")
    }

    const RESERVED: &[&str] = &[
        "t", "b", "tt", "tests", "err", "recv", "name", "wantErr", "errContains", "checkOutputs", "testing",
        "strings", "assert", "require", "i",
    ];

    /// Local name for a parameter that cannot clash with generated identifiers
    pub fn local_name(param: &str) -> String {
        if RESERVED.contains(&param) { format!("{}Value", param) } else { param.to_string() }
    }

    /// Prefix every standalone occurrence of one of `types` with `package.`
    pub fn qualify(expr: &str, types: &[String], package: &str) -> String {
        let mut out = String::with_capacity(expr.len());
        let mut chars = expr.char_indices().peekable();
        let mut in_string = false;
        let mut previous: Option<char> = None;

        while let Some((start, c)) = chars.next() {
            if c == '"' && previous != Some('\\') {
                in_string = !in_string;
            }
            if in_string || !(c.is_alphabetic() || c == '_') || previous.is_some_and(|p| p == '.' || p.is_alphanumeric() || p == '_') {
                out.push(c);
                previous = Some(c);
                continue;
            }
            let mut end = start + c.len_utf8();
            while let Some(&(i, next)) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    end = i + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let word = &expr[start..end];
            if types.iter().any(|t| t == word) {
                out.push_str(package);
                out.push('.');
            }
            out.push_str(word);
            previous = word.chars().last();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_registry() {
        let registry = FrameworkRegistry::new();
        assert_eq!(registry.list_frameworks(), vec!["testing".to_string(), "testify".to_string()]);
        assert!(registry.get_adapter("TESTIFY").is_some());
        assert_eq!(
            registry.for_framework(TestingFramework::Standard).map(|a| a.framework_name().to_string()),
            Some("testing".to_string())
        );
    }

    #[test]
    fn test_assertions_per_framework() {
        let outputs = vec!["got".to_string()];
        let testify = TestifyAdapter;
        assert_eq!(
            testify.generate_assertion(&Assertion::ErrorContains("bad \"id\"".into()), &outputs).unwrap(),
            "assert.ErrorContains(t, err, \"bad \\\"id\\\"\")"
        );
        assert_eq!(testify.generate_assertion(&Assertion::NotNil { output: 0 }, &outputs).unwrap(), "assert.NotNil(t, got)");
        assert!(StandardAdapter.generate_assertion(&Assertion::NoPanic, &outputs).is_none());
        assert!(StandardAdapter.generate_assertion(&Assertion::NotNil { output: 3 }, &outputs).is_none());
    }

    #[test]
    fn test_qualify_types() {
        let types = vec!["Account".to_string()];
        assert_eq!(codegen::qualify("new(Account)", &types, "bank"), "new(bank.Account)");
        assert_eq!(codegen::qualify("[]*Account{}", &types, "bank"), "[]*bank.Account{}");
        assert_eq!(codegen::qualify("other.Account", &types, "bank"), "other.Account");
        assert_eq!(codegen::qualify("\"Account\"", &types, "bank"), "\"Account\"");
        assert_eq!(codegen::qualify("MyAccount", &types, "bank"), "MyAccount");
    }

    #[test]
    fn test_local_names() {
        assert_eq!(codegen::local_name("t"), "tValue");
        assert_eq!(codegen::local_name("amount"), "amount");
    }
}
