//! Go source rendering for synthesized suites

use super::TestFrameworkAdapter;
use super::codegen::{escape_string, indent, local_name, qualify};
use crate::analysis::ParameterInfo;
use crate::test_gen::{Assertion, TargetSignature, TestCase, TestKind, TestSuite};

/// First line of every file the generator writes
pub const GENERATED_MARKER: &str = "// Code generated by testward";

/// Shared helper that turns a panic in the code under test into a failure
pub const NO_PANIC_HELPER: &str = "// assertNoPanic fails the test if call panics.
func assertNoPanic(t *testing.T, call func()) {
	t.Helper()
	defer func() {
		if r := recover(); r != nil {
			t.Fatalf(\"unexpected panic: %v\", r)
		}
	}()
	call()
}";

/// Where the rendered file lives relative to the code under test
#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    /// Package clause of the generated file
    pub package: String,
    /// Set when the file is in its own package: the source package's name
    pub qualifier: Option<String>,
    /// Import path of the source package, for external test packages
    pub import_path: Option<String>,
    /// Imports of the source file as `(local name, path)`
    pub source_imports: Vec<(String, String)>,
    /// Types declared in the source package
    pub declared_types: Vec<String>,
}

impl RenderTarget {
    pub fn same_package(package: &str, source_imports: Vec<(String, String)>) -> Self {
        Self { package: package.to_string(), source_imports, ..Default::default() }
    }

    fn qualify(&self, expr: &str) -> String {
        match &self.qualifier {
            Some(package) => qualify(expr, &self.declared_types, package),
            None => expr.to_string(),
        }
    }
}

pub struct GoTestRenderer<'a> {
    adapter: &'a dyn TestFrameworkAdapter,
}

impl<'a> GoTestRenderer<'a> {
    pub fn new(adapter: &'a dyn TestFrameworkAdapter) -> Self {
        Self { adapter }
    }

    /// Render a full `_test.go` file
    pub fn render(&self, suite: &TestSuite, target: &RenderTarget) -> String {
        let mut sections: Vec<String> = Vec::new();

        if !suite.mocks.is_empty() {
            let mut note = String::from("// These parameters are interfaces and are passed placeholder values;\n// replace them with fakes:\n");
            for mock in &suite.mocks {
                note.push_str(&format!("//   - {}\n", mock));
            }
            sections.push(note.trim_end().to_string());
        }
        sections.extend(suite.helpers.iter().cloned());
        let guard_panics = suite.helpers.iter().any(|h| h == NO_PANIC_HELPER);
        for case in &suite.test_cases {
            sections.push(match case.kind {
                TestKind::TableDriven => self.render_table(case, target),
                TestKind::Unit | TestKind::Integration => self.render_case(case, target, guard_panics),
            });
        }
        for benchmark in &suite.benchmarks {
            sections.push(self.render_benchmark(&benchmark.name, &benchmark.signature, &benchmark.inputs, target));
        }
        for example in &suite.examples {
            sections.push(self.render_example(&example.name, &example.signature, &example.inputs, target));
        }

        let body = sections.join("\n\n");
        let imports = self.imports_for(&body, target);

        let mut file = format!("{} from {}. Review before relying on it.\n\npackage {}\n", GENERATED_MARKER, suite.source_file.display(), target.package);
        if !imports.is_empty() {
            file.push_str("\nimport (\n");
            for (alias, path) in &imports {
                match alias {
                    Some(alias) => file.push_str(&format!("\t{} \"{}\"\n", alias, path)),
                    None => file.push_str(&format!("\t\"{}\"\n", path)),
                }
            }
            file.push_str(")\n");
        }
        file.push('\n');
        file.push_str(&body);
        file.push('\n');
        file
    }

    fn imports_for(&self, body: &str, target: &RenderTarget) -> Vec<(Option<String>, String)> {
        let mut candidates: Vec<(String, Option<String>, String)> = Vec::new();
        for path in ["errors", "fmt", "strings"].into_iter().chain(self.adapter.imports()) {
            let local = path.rsplit('/').next().unwrap_or(path).to_string();
            candidates.push((local, None, path.to_string()));
        }
        for (local, path) in &target.source_imports {
            let default_local = crate::analysis::go::import_local_name(path);
            let alias = (local != &default_local).then(|| local.clone());
            candidates.push((local.clone(), alias, path.clone()));
        }
        if let (Some(qualifier), Some(path)) = (&target.qualifier, &target.import_path) {
            let default_local = crate::analysis::go::import_local_name(path);
            let alias = (qualifier != &default_local).then(|| qualifier.clone());
            candidates.push((qualifier.clone(), alias, path.clone()));
        }

        let mut imports: Vec<(Option<String>, String)> = Vec::new();
        for (local, alias, path) in candidates {
            if local == "_" || local == "." || imports.iter().any(|(_, p)| p == &path) {
                continue;
            }
            if references(body, &local) {
                imports.push((alias, path));
            }
        }
        imports.sort_by(|a, b| {
            let std_a = !a.1.contains('.');
            let std_b = !b.1.contains('.');
            std_b.cmp(&std_a).then_with(|| a.1.cmp(&b.1))
        });
        imports
    }

    fn callee(&self, signature: &TargetSignature, target: &RenderTarget) -> String {
        match (&signature.receiver, &target.qualifier) {
            (Some(_), _) => format!("recv.{}", signature.function),
            (None, Some(package)) => format!("{}.{}", package, signature.function),
            (None, None) => signature.function.clone(),
        }
    }

    fn arguments(&self, params: &[ParameterInfo], prefix: &str) -> String {
        params
            .iter()
            .map(|p| {
                let name = format!("{}{}", prefix, local_name(&p.name));
                if p.variadic { format!("{}...", name) } else { name }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn declarations(&self, params: &[ParameterInfo], inputs: &[(String, String)], target: &RenderTarget) -> Vec<String> {
        params
            .iter()
            .map(|param| {
                let value = inputs
                    .iter()
                    .find(|(name, _)| name == &param.name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_else(|| param.type_info().zero_value());
                format!(
                    "var {} {} = {}",
                    local_name(&param.name),
                    target.qualify(&param.type_name),
                    target.qualify(&value)
                )
            })
            .collect()
    }

    /// `lhs := call`, `_ = call` or a bare call when nothing is returned
    fn call_statement(&self, outputs: &[String], call: String) -> String {
        if outputs.is_empty() {
            call
        } else if outputs.iter().all(|o| o == "_") {
            format!("{} = {}", outputs.join(", "), call)
        } else {
            format!("{} := {}", outputs.join(", "), call)
        }
    }

    fn output_names(&self, signature: &TargetSignature, assertions: &[Assertion]) -> Vec<String> {
        let last = signature.returns.len().saturating_sub(1);
        let named = signature.returns.len() > 1;
        signature
            .returns
            .iter()
            .enumerate()
            .map(|(i, ret)| {
                let needs_err = assertions.iter().any(|a| {
                    matches!(a, Assertion::ErrorReturned | Assertion::ErrorContains(_) | Assertion::NoError)
                });
                if i == last && ret.is_error() {
                    if needs_err { "err".to_string() } else { "_".to_string() }
                } else if assertions.contains(&Assertion::NotNil { output: i }) {
                    if named { format!("got{}", i) } else { "got".to_string() }
                } else {
                    "_".to_string()
                }
            })
            .collect()
    }

    fn render_case(&self, case: &TestCase, target: &RenderTarget, guard_panics: bool) -> String {
        let mut lines: Vec<String> = case.comments.iter().map(|c| format!("// {}", c.replace('\n', " "))).collect();
        lines.extend(case.setup.iter().map(|s| target.qualify(s)));
        lines.extend(self.declarations(&case.signature.params, &case.inputs, target));

        let outputs = self.output_names(&case.signature, &case.assertions);
        let call = format!("{}({})", self.callee(&case.signature, target), self.arguments(&case.signature.params, ""));
        let statement = self.call_statement(&outputs, call);
        if guard_panics && case.assertions.contains(&Assertion::NoPanic) {
            lines.push(format!("assertNoPanic(t, func() {{\n\t{}\n}})", statement));
        } else {
            lines.push(statement);
        }

        for assertion in &case.assertions {
            if let Some(code) = self.adapter.generate_assertion(assertion, &outputs) {
                lines.push(code);
            }
        }
        lines.extend(case.teardown.iter().cloned());

        format!("func {}(t *testing.T) {{\n{}\n}}", case.name, indent(&lines.join("\n"), 1))
    }

    fn render_table(&self, case: &TestCase, target: &RenderTarget) -> String {
        let signature = &case.signature;
        let all_assertions: Vec<Assertion> = case.rows.iter().flat_map(|r| r.assertions.iter().cloned()).collect();
        let mut outputs = self.output_names(signature, &all_assertions);
        if signature.returns_error() {
            if let Some(last) = outputs.last_mut() {
                *last = "err".to_string();
            }
        }

        let mut fields = vec!["name string".to_string()];
        fields.extend(
            signature
                .params
                .iter()
                .map(|p| format!("{} {}", local_name(&p.name), target.qualify(&p.type_name))),
        );
        fields.extend(["wantErr bool".to_string(), "errContains string".to_string(), "checkOutputs bool".to_string()]);

        let mut rows = Vec::new();
        for row in &case.rows {
            let mut entries = vec![format!("name: \"{}\",", escape_string(&row.name))];
            for param in &signature.params {
                if let Some((_, value)) = row.inputs.iter().find(|(name, _)| name == &param.name) {
                    entries.push(format!("{}: {},", local_name(&param.name), target.qualify(value)));
                }
            }
            for assertion in &row.assertions {
                match assertion {
                    Assertion::ErrorReturned => entries.push("wantErr: true,".to_string()),
                    Assertion::ErrorContains(text) => entries.push(format!("errContains: \"{}\",", escape_string(text))),
                    Assertion::NoError | Assertion::NotNil { .. } if !entries.iter().any(|e| e.starts_with("checkOutputs")) => {
                        entries.push("checkOutputs: true,".to_string())
                    }
                    _ => {}
                }
            }
            let comment = if row.comment.is_empty() { String::new() } else { format!("// {}\n", row.comment.replace('\n', " ")) };
            rows.push(format!("{}{{\n{}\n}},", comment, indent(&entries.join("\n"), 1)));
        }

        let mut run: Vec<String> = case.setup.iter().map(|s| target.qualify(s)).collect();
        let call = format!("{}({})", self.callee(signature, target), self.arguments(&signature.params, "tt."));
        run.push(self.call_statement(&outputs, call));

        if signature.returns_error() {
            let mut checks = vec![self.adapter.assert_error("err")];
            checks.push(format!(
                "if tt.errContains != \"\" {{\n{}\n}}",
                indent(&self.adapter.assert_error_contains("err", "tt.errContains"), 1)
            ));
            checks.push("return".to_string());
            run.push(format!("if tt.wantErr {{\n{}\n}}", indent(&checks.join("\n"), 1)));
        }

        let mut output_checks = Vec::new();
        if signature.returns_error() {
            output_checks.push(self.adapter.assert_no_error("err"));
        }
        for (i, name) in outputs.iter().enumerate() {
            if name != "_" && name != "err" {
                if let Some(code) = self.adapter.generate_assertion(&Assertion::NotNil { output: i }, &outputs) {
                    output_checks.push(code);
                }
            }
        }
        if !output_checks.is_empty() {
            run.push("if !tt.checkOutputs {\n\treturn\n}".to_string());
            run.extend(output_checks);
        }
        run.extend(case.teardown.iter().cloned());

        let mut lines: Vec<String> = case.comments.iter().map(|c| format!("// {}", c.replace('\n', " "))).collect();
        lines.push(format!(
            "tests := []struct {{\n{}\n}}{{\n{}\n}}",
            indent(&fields.join("\n"), 1),
            indent(&rows.join("\n"), 1)
        ));
        lines.push(format!(
            "for _, tt := range tests {{\n\tt.Run(tt.name, func(t *testing.T) {{\n{}\n\t}})\n}}",
            indent(&run.join("\n"), 2)
        ));

        format!("func {}(t *testing.T) {{\n{}\n}}", case.name, indent(&lines.join("\n"), 1))
    }

    fn setup_for(&self, signature: &TargetSignature) -> Option<String> {
        signature.receiver.as_deref().map(receiver_setup)
    }

    fn discard_call(&self, signature: &TargetSignature, target: &RenderTarget) -> String {
        let outputs = vec!["_".to_string(); signature.returns.len()];
        let call = format!("{}({})", self.callee(signature, target), self.arguments(&signature.params, ""));
        self.call_statement(&outputs, call)
    }

    fn render_benchmark(&self, name: &str, signature: &TargetSignature, inputs: &[(String, String)], target: &RenderTarget) -> String {
        let mut lines: Vec<String> = self.setup_for(signature).map(|s| target.qualify(&s)).into_iter().collect();
        lines.extend(self.declarations(&signature.params, inputs, target));
        lines.push("b.ResetTimer()".to_string());
        lines.push(format!("for i := 0; i < b.N; i++ {{\n\t{}\n}}", self.discard_call(signature, target)));
        format!("func {}(b *testing.B) {{\n{}\n}}", name, indent(&lines.join("\n"), 1))
    }

    fn render_example(&self, name: &str, signature: &TargetSignature, inputs: &[(String, String)], target: &RenderTarget) -> String {
        let mut lines: Vec<String> = self.setup_for(signature).map(|s| target.qualify(&s)).into_iter().collect();
        lines.extend(self.declarations(&signature.params, inputs, target));
        lines.push(self.discard_call(signature, target));
        format!("func {}() {{\n{}\n}}", name, indent(&lines.join("\n"), 1))
    }
}

/// Statement that declares `recv` as a zero receiver of the given type
pub fn receiver_setup(receiver: &str) -> String {
    let base = crate::analysis::receiver_base(receiver);
    if receiver.starts_with('*') { format!("recv := new({})", base) } else { format!("var recv {}", base) }
}

/// Whether `body` uses `qualifier.` as a package selector
fn references(body: &str, qualifier: &str) -> bool {
    let needle = format!("{}.", qualifier);
    body.match_indices(&needle).any(|(i, _)| {
        body[..i]
            .chars()
            .last()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '"'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ReturnInfo;
    use crate::test_gen::frameworks::{StandardAdapter, TestifyAdapter};
    use crate::test_gen::{Benchmark, TableRow};

    fn signature() -> TargetSignature {
        TargetSignature {
            function: "Parse".to_string(),
            receiver: None,
            params: vec![ParameterInfo::new("data", "string", false), ParameterInfo::new("t", "int", false)],
            returns: vec![ReturnInfo::new("*Doc"), ReturnInfo::new("error")],
        }
    }

    fn unit_case(name: &str, assertions: Vec<Assertion>) -> TestCase {
        TestCase {
            name: name.to_string(),
            target: "Parse".to_string(),
            kind: TestKind::Unit,
            signature: signature(),
            inputs: vec![("data".to_string(), "\"\"".to_string()), ("t".to_string(), "1".to_string())],
            expected_outputs: Vec::new(),
            setup: Vec::new(),
            teardown: Vec::new(),
            assertions,
            comments: vec!["returns an error when data == \"\"".to_string()],
            complexity: 1,
            rows: Vec::new(),
        }
    }

    #[test]
    fn test_render_error_case_standard() {
        let mut suite = TestSuite::new("doc", "doc.go");
        suite.test_cases.push(unit_case(
            "TestParse_Error_1",
            vec![Assertion::ErrorReturned, Assertion::ErrorContains("empty input".to_string())],
        ));

        let file = GoTestRenderer::new(&StandardAdapter).render(&suite, &RenderTarget::same_package("doc", Vec::new()));
        assert!(file.starts_with(GENERATED_MARKER));
        assert!(file.contains("package doc\n"));
        assert!(file.contains("\t\"strings\"\n\t\"testing\"\n"));
        assert!(file.contains("func TestParse_Error_1(t *testing.T) {"));
        assert!(file.contains("\tvar tValue int = 1\n"));
        assert!(file.contains("\t_, err := Parse(data, tValue)\n"));
        assert!(file.contains("strings.Contains(err.Error(), \"empty input\")"));
        assert!(!file.contains("\"errors\""));
    }

    #[test]
    fn test_render_table_testify() {
        let mut case = unit_case("TestParse", Vec::new());
        case.kind = TestKind::TableDriven;
        case.complexity = 2;
        case.rows = vec![
            TableRow {
                name: "HappyPath_1".to_string(),
                inputs: vec![("data".to_string(), "\"example\"".to_string()), ("t".to_string(), "0".to_string())],
                assertions: vec![Assertion::NoError, Assertion::NotNil { output: 0 }],
                comment: String::new(),
            },
            TableRow {
                name: "Error_1".to_string(),
                inputs: vec![("data".to_string(), "\"\"".to_string()), ("t".to_string(), "0".to_string())],
                assertions: vec![Assertion::ErrorReturned, Assertion::ErrorContains("empty".to_string())],
                comment: "data == \"\"".to_string(),
            },
        ];
        let mut suite = TestSuite::new("doc", "doc.go");
        suite.test_cases.push(case);

        let file = GoTestRenderer::new(&TestifyAdapter).render(&suite, &RenderTarget::same_package("doc", Vec::new()));
        assert!(file.contains("\"github.com/stretchr/testify/assert\""));
        assert!(file.contains("\"github.com/stretchr/testify/require\""));
        assert!(file.contains("got0, err := Parse(tt.data, tt.tValue)"));
        assert!(file.contains("wantErr: true,"));
        assert!(file.contains("errContains: \"empty\","));
        assert!(file.contains("checkOutputs: true,"));
        assert!(file.contains("assert.NotNil(t, got0)"));
        assert!(file.contains("assert.ErrorContains(t, err, tt.errContains)"));
    }

    #[test]
    fn test_no_panic_cases_use_helper() {
        let mut suite = TestSuite::new("doc", "doc.go");
        suite.test_cases.push(unit_case("TestParse_EdgeCase_1", vec![Assertion::NoPanic]));
        let target = RenderTarget::same_package("doc", Vec::new());

        let bare = GoTestRenderer::new(&StandardAdapter).render(&suite, &target);
        assert!(bare.contains("\t_, _ = Parse(data, tValue)\n"));
        assert!(!bare.contains("assertNoPanic"));

        suite.helpers.push(NO_PANIC_HELPER.to_string());
        let file = GoTestRenderer::new(&StandardAdapter).render(&suite, &target);
        assert!(file.contains("func assertNoPanic(t *testing.T, call func()) {"));
        assert!(file.contains("\tassertNoPanic(t, func() {\n\t\t_, _ = Parse(data, tValue)\n\t})\n"));
        assert!(!file.contains("\"strings\""));
    }

    #[test]
    fn test_render_external_package() {
        let mut suite = TestSuite::new("bank", "bank/account.go");
        let signature = TargetSignature {
            function: "Open".to_string(),
            receiver: None,
            params: vec![ParameterInfo::new("owner", "*Account", false)],
            returns: vec![ReturnInfo::new("error")],
        };
        suite.benchmarks.push(Benchmark {
            name: "BenchmarkOpen".to_string(),
            signature,
            inputs: vec![("owner".to_string(), "new(Account)".to_string())],
        });
        let target = RenderTarget {
            package: "bank_test".to_string(),
            qualifier: Some("bank".to_string()),
            import_path: Some("example.com/app/bank".to_string()),
            source_imports: Vec::new(),
            declared_types: vec!["Account".to_string()],
        };

        let file = GoTestRenderer::new(&StandardAdapter).render(&suite, &target);
        assert!(file.contains("package bank_test\n"));
        assert!(file.contains("\"example.com/app/bank\""));
        assert!(file.contains("var owner *bank.Account = new(bank.Account)"));
        assert!(file.contains("_ = bank.Open(owner)"));
    }

    #[test]
    fn test_receiver_setup() {
        assert_eq!(receiver_setup("*Store"), "recv := new(Store)");
        assert_eq!(receiver_setup("Store"), "var recv Store");
    }

    #[test]
    fn test_references_ignores_suffixes() {
        assert!(references("x := strings.Repeat(\"a\", 2)", "strings"));
        assert!(!references("x := mystrings.Repeat(\"a\", 2)", "strings"));
    }
}
