//! Control-flow walks over lowered function bodies: complexity, dependency
//! extraction and happy/error/edge path derivation.
//!
//! Error paths come from guards: an `if` whose consequence returns a non-nil
//! value in the error result. Each guard's condition is turned into parameter
//! bindings that satisfy it. The happy path binds parameters so that every
//! guard is violated.

use super::model::{CompareOp, Comparison, Condition, Connective, ControlFlowNode, ReturnValue, SwitchKind};
use super::{Expectation, ParameterInfo, PathDescriptor};
use std::collections::HashMap;
use tracing::trace;

/// Cyclomatic complexity: 1, plus one per branch, loop, switch and case clause
pub fn complexity(body: &ControlFlowNode) -> u32 {
    let mut score = 1;
    body.walk(&mut |node| match node {
        ControlFlowNode::If { .. } | ControlFlowNode::Loop { .. } => score += 1,
        ControlFlowNode::Switch { cases, .. } => score += 1 + cases.len() as u32,
        _ => {}
    });
    score
}

/// Import paths of packages whose members the body calls
pub fn dependencies(body: &ControlFlowNode, imports: &[(String, String)]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    body.walk(&mut |node| {
        let ControlFlowNode::Call { callee } = node else {
            return;
        };
        let Some((qualifier, _)) = callee.split_once('.') else {
            return;
        };
        let import = imports
            .iter()
            .find(|(local, _)| local == qualifier && local != "_" && local != ".");
        if let Some((_, path)) = import {
            if !found.contains(path) {
                found.push(path.clone());
            }
        }
    });
    found
}

/// Paths derived for one function
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    pub happy: Vec<PathDescriptor>,
    pub error: Vec<PathDescriptor>,
    pub edge: Vec<PathDescriptor>,
}

/// Derive paths for a function body. A missing body yields no paths.
pub fn derive(params: &[ParameterInfo], returns_error: bool, body: Option<&ControlFlowNode>) -> PathSet {
    let Some(body) = body else {
        return PathSet::default();
    };
    let binder = Binder { params };

    let guards = if returns_error { error_guards(body) } else { Vec::new() };
    let base = binder.happy_bindings(&guards);

    let mut paths = PathSet::default();

    if has_success_return(body, returns_error) {
        paths.happy.push(PathDescriptor {
            description: "succeeds when no guard rejects its inputs".to_string(),
            condition: None,
            bindings: base.clone(),
            expectation: Expectation::Success,
        });
    }
    paths.happy.extend(binder.switch_paths(body, &base));

    for (condition, message) in &guards {
        let bindings = binder.satisfy(condition);
        if bindings.is_empty() {
            trace!("Guard `{}` does not constrain any parameter", condition.text);
            continue;
        }
        let mut merged = base.clone();
        merged.extend(bindings);
        paths.error.push(PathDescriptor {
            description: format!("returns an error when {}", condition.text),
            condition: Some(condition.text.clone()),
            bindings: merged,
            expectation: Expectation::Error { contains: message.clone() },
        });
    }

    paths.edge = binder.edge_paths(body, &base, &paths);
    paths
}

/// Guards whose consequence directly returns an error in the last position
fn error_guards(body: &ControlFlowNode) -> Vec<(Condition, Option<String>)> {
    let mut guards = Vec::new();
    body.walk(&mut |node| {
        let ControlFlowNode::If { condition, then, .. } = node else {
            return;
        };
        let message = then.statements().iter().find_map(|statement| match statement {
            ControlFlowNode::Return(values) => match values.last() {
                Some(ReturnValue::Error { message }) => Some(message.clone()),
                _ => None,
            },
            _ => None,
        });
        if let Some(message) = message {
            guards.push((condition.clone(), message));
        }
    });
    guards
}

fn has_success_return(body: &ControlFlowNode, returns_error: bool) -> bool {
    let mut returns = 0;
    let mut successes = 0;
    body.walk(&mut |node| {
        if let ControlFlowNode::Return(values) = node {
            returns += 1;
            if !returns_error || !matches!(values.last(), Some(ReturnValue::Error { .. })) {
                successes += 1;
            }
        }
    });
    successes > 0 || (returns == 0 && !returns_error)
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Nil,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Literal {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text {
            "nil" => return Some(Self::Nil),
            "true" => return Some(Self::Bool(true)),
            "false" => return Some(Self::Bool(false)),
            _ => {}
        }
        if text.starts_with('"') || text.starts_with('`') {
            return Some(Self::Str(text.to_string()));
        }
        let digits = text.replace('_', "");
        if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            return i64::from_str_radix(hex, 16).ok().map(Self::Int);
        }
        if let Ok(value) = digits.parse::<i64>() {
            return Some(Self::Int(value));
        }
        digits.parse::<f64>().ok().filter(|v| v.is_finite()).map(Self::Float)
    }
}

fn is_literal(text: &str) -> bool {
    Literal::parse(text).is_some_and(|literal| literal != Literal::Nil)
        || (text.starts_with('\'') && text.ends_with('\''))
}

/// A comparison normalized to `<parameter operand> op <literal>`
struct Constraint<'p> {
    param: &'p ParameterInfo,
    length: bool,
    op: CompareOp,
    literal: Literal,
}

struct Binder<'p> {
    params: &'p [ParameterInfo],
}

impl<'p> Binder<'p> {
    fn operand(&self, text: &str) -> Option<(&'p ParameterInfo, bool)> {
        let text = text.trim();
        let (name, length) = match text.strip_prefix("len(").and_then(|s| s.strip_suffix(')')) {
            Some(inner) => (inner.trim(), true),
            None => (text, false),
        };
        self.params.iter().find(|p| p.name == name).map(|p| (p, length))
    }

    fn constraint(&self, comparison: &Comparison) -> Option<Constraint<'p>> {
        if let (Some((param, length)), Some(literal)) = (self.operand(&comparison.left), Literal::parse(&comparison.right)) {
            return Some(Constraint { param, length, op: comparison.op, literal });
        }
        if let (Some((param, length)), Some(literal)) = (self.operand(&comparison.right), Literal::parse(&comparison.left)) {
            return Some(Constraint { param, length, op: comparison.op.flip(), literal });
        }
        None
    }

    /// A Go expression for the parameter that makes `op literal` hold
    fn bind(&self, comparison: &Comparison, holds: bool) -> Option<(String, String)> {
        let constraint = self.constraint(comparison)?;
        let op = if holds { constraint.op } else { constraint.op.negate() };
        let ty = constraint.param.type_info();

        let value = if constraint.length {
            let Literal::Int(k) = constraint.literal else {
                return None;
            };
            let len = match op {
                CompareOp::Eq | CompareOp::Le | CompareOp::Ge => k,
                CompareOp::Ne => i64::from(k == 0),
                CompareOp::Lt => k.checked_sub(1)?,
                CompareOp::Gt => k.checked_add(1)?,
            };
            if len < 0 {
                return None;
            }
            (if len == 0 { ty.empty_value() } else { ty.value_of_len(len as u64) })?
        } else {
            match (&constraint.literal, op) {
                (Literal::Nil, CompareOp::Eq) => "nil".to_string(),
                (Literal::Nil, CompareOp::Ne) => ty.non_nil_value()?,
                (Literal::Nil, _) => return None,
                (Literal::Int(k), op) => shift_int(*k, op)?.to_string(),
                (Literal::Float(x), op) => shift(*x, op),
                (Literal::Str(raw), CompareOp::Eq) => raw.clone(),
                (Literal::Str(raw), CompareOp::Ne) => {
                    if raw.len() <= 2 { "\"x\"".to_string() } else { "\"\"".to_string() }
                }
                (Literal::Str(_), _) => return None,
                (Literal::Bool(b), CompareOp::Eq) => b.to_string(),
                (Literal::Bool(b), CompareOp::Ne) => (!b).to_string(),
                (Literal::Bool(_), _) => return None,
            }
        };

        Some((constraint.param.name.clone(), value))
    }

    fn satisfy(&self, condition: &Condition) -> HashMap<String, String> {
        match condition.connective {
            Connective::Any => condition
                .comparisons
                .iter()
                .find_map(|c| self.bind(c, true))
                .into_iter()
                .collect(),
            Connective::All => condition.comparisons.iter().filter_map(|c| self.bind(c, true)).collect(),
        }
    }

    fn violate(&self, condition: &Condition) -> HashMap<String, String> {
        match condition.connective {
            Connective::Any => condition.comparisons.iter().filter_map(|c| self.bind(c, false)).collect(),
            Connective::All => condition
                .comparisons
                .iter()
                .find_map(|c| self.bind(c, false))
                .into_iter()
                .collect(),
        }
    }

    fn happy_bindings(&self, guards: &[(Condition, Option<String>)]) -> HashMap<String, String> {
        let mut bindings = HashMap::new();
        for (condition, _) in guards {
            for (name, value) in self.violate(condition) {
                bindings.entry(name).or_insert(value);
            }
        }
        for param in self.params {
            bindings
                .entry(param.name.clone())
                .or_insert_with(|| param.type_info().representative_value());
        }
        bindings
    }

    fn switch_paths(&self, body: &ControlFlowNode, base: &HashMap<String, String>) -> Vec<PathDescriptor> {
        let mut paths = Vec::new();
        body.walk(&mut |node| {
            let ControlFlowNode::Switch { kind: SwitchKind::Expression, subject: Some(subject), cases } = node else {
                return;
            };
            let Some(param) = self.params.iter().find(|p| &p.name == subject) else {
                return;
            };
            for case in cases.iter().filter(|c| !c.is_default && !returns_error_value(&c.body)) {
                let Some(value) = case.values.iter().find(|v| is_literal(v)) else {
                    continue;
                };
                let mut bindings = base.clone();
                bindings.insert(param.name.clone(), value.clone());
                paths.push(PathDescriptor {
                    description: format!("handles {} == {}", param.name, value),
                    condition: Some(format!("case {}", case.values.join(", "))),
                    bindings,
                    expectation: Expectation::Success,
                });
            }
        });
        paths
    }

    fn edge_paths(&self, body: &ControlFlowNode, base: &HashMap<String, String>, derived: &PathSet) -> Vec<PathDescriptor> {
        let mut comparisons = Vec::new();
        body.walk(&mut |node| {
            if let ControlFlowNode::If { condition, .. } = node {
                comparisons.extend(condition.comparisons.iter());
            }
        });

        let used = |name: &str, value: &str| {
            derived
                .happy
                .iter()
                .chain(derived.error.iter())
                .any(|path| path.bindings.get(name).is_some_and(|v| v == value))
        };

        let mut candidates: Vec<(String, String, String)> = Vec::new();
        for comparison in &comparisons {
            let Some(constraint) = self.constraint(comparison) else {
                continue;
            };
            if constraint.length || !constraint.param.type_info().is_numeric() {
                continue;
            }
            // integer neighbours past the ends of i64 are dropped
            let values: Vec<String> = match constraint.literal {
                Literal::Int(k) => [k.checked_sub(1), Some(k), k.checked_add(1)]
                    .into_iter()
                    .flatten()
                    .map(|v| v.to_string())
                    .collect(),
                Literal::Float(x) => [x - 1.0, x, x + 1.0].into_iter().map(render_number).collect(),
                _ => continue,
            };
            for value in values {
                candidates.push((constraint.param.name.clone(), value, format!("boundary of {}", comparison_text(comparison))));
            }
        }

        let guarded = |param: &ParameterInfo, nil: bool| {
            comparisons.iter().any(|c| {
                self.constraint(c).is_some_and(|constraint| {
                    constraint.param.name == param.name
                        && if nil {
                            constraint.literal == Literal::Nil
                        } else {
                            constraint.length || matches!(constraint.literal, Literal::Str(_))
                        }
                })
            })
        };

        for param in self.params {
            let ty = param.type_info();
            if ty.is_nilable() && !guarded(param, true) {
                candidates.push((param.name.clone(), "nil".to_string(), format!("nil {}", param.name)));
            }
            if (ty.is_string() || ty.is_slice()) && !guarded(param, false) {
                if let Some(empty) = ty.empty_value() {
                    candidates.push((param.name.clone(), empty, format!("empty {}", param.name)));
                }
            }
        }

        let mut seen: Vec<(String, String)> = Vec::new();
        let mut paths = Vec::new();
        for (name, value, description) in candidates {
            let key = (name.clone(), value.clone());
            if used(&name, &value) || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            let mut bindings = base.clone();
            bindings.insert(name, value);
            paths.push(PathDescriptor {
                description,
                condition: None,
                bindings,
                expectation: Expectation::NoPanic,
            });
        }
        paths
    }
}

fn returns_error_value(body: &ControlFlowNode) -> bool {
    let mut found = false;
    body.walk(&mut |node| {
        if let ControlFlowNode::Return(values) = node {
            found |= matches!(values.last(), Some(ReturnValue::Error { .. }));
        }
    });
    found
}

fn comparison_text(comparison: &Comparison) -> String {
    let op = match comparison.op {
        CompareOp::Eq => "==",
        CompareOp::Ne => "!=",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
    };
    format!("{} {} {}", comparison.left, op, comparison.right)
}

/// A number on the side of `boundary` where `op boundary` holds
fn shift(boundary: f64, op: CompareOp) -> String {
    let value = match op {
        CompareOp::Eq | CompareOp::Le | CompareOp::Ge => boundary,
        CompareOp::Ne | CompareOp::Gt => boundary + 1.0,
        CompareOp::Lt => boundary - 1.0,
    };
    render_number(value)
}

/// `None` when the value satisfying `op` does not fit in an `i64`
fn shift_int(boundary: i64, op: CompareOp) -> Option<i64> {
    match op {
        CompareOp::Eq | CompareOp::Le | CompareOp::Ge => Some(boundary),
        CompareOp::Ne | CompareOp::Gt => boundary.checked_add(1),
        CompareOp::Lt => boundary.checked_sub(1),
    }
}

fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::go::GoSource;
    use crate::analysis::model::SourceModel;
    use std::path::Path;

    fn body_of(source: &str) -> (Vec<ParameterInfo>, ControlFlowNode) {
        let model = GoSource::parse(Path::new("x.go"), source).unwrap();
        let function = model.functions().remove(0);
        let params = function
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| ParameterInfo::new(p.name.clone().unwrap_or(format!("arg{}", i)), &p.type_name, p.variadic))
            .collect();
        (params, model.body(&function).unwrap())
    }

    #[test]
    fn test_straight_line_complexity_is_one() {
        let (_, body) = body_of("package x\nfunc F(a int) int {\n\tb := a + 1\n\treturn b\n}\n");
        assert_eq!(complexity(&body), 1);
    }

    #[test]
    fn test_each_if_adds_one() {
        let (_, one) = body_of("package x\nfunc F(a int) int {\n\tif a > 0 {\n\t\treturn 1\n\t}\n\treturn 0\n}\n");
        let (_, two) = body_of(
            "package x\nfunc F(a int) int {\n\tif a > 0 {\n\t\treturn 1\n\t}\n\tif a < -5 {\n\t\treturn 2\n\t}\n\treturn 0\n}\n",
        );
        assert_eq!(complexity(&one), 2);
        assert_eq!(complexity(&two), 3);
    }

    #[test]
    fn test_switch_adds_one_plus_cases() {
        let (_, body) = body_of(
            "package x\nfunc F(a int) string {\n\tswitch a {\n\tcase 1:\n\t\treturn \"one\"\n\tcase 2:\n\t\treturn \"two\"\n\tdefault:\n\t\treturn \"many\"\n\t}\n}\n",
        );
        assert_eq!(complexity(&body), 1 + 1 + 3);
    }

    #[test]
    fn test_error_guard_bindings() {
        let (params, body) = body_of(
            r#"package x
import "errors"
func Withdraw(amount int, account *Account) (int, error) {
	if account == nil {
		return 0, errors.New("no account")
	}
	if amount <= 0 {
		return 0, errors.New("amount must be positive")
	}
	return amount, nil
}
"#,
        );
        let paths = derive(&params, true, Some(&body));
        assert_eq!(paths.happy.len(), 1);
        assert_eq!(paths.error.len(), 2);

        let happy = &paths.happy[0].bindings;
        assert_eq!(happy["account"], "new(Account)");
        assert_eq!(happy["amount"], "1");

        assert_eq!(paths.error[0].bindings["account"], "nil");
        assert_eq!(
            paths.error[1].expectation,
            Expectation::Error { contains: Some("amount must be positive".to_string()) }
        );
        assert_eq!(paths.error[1].bindings["amount"], "0");
        assert_eq!(paths.error[1].bindings["account"], "new(Account)");
    }

    #[test]
    fn test_guards_at_int64_limits() {
        let (params, body) = body_of(
            r#"package x
import "errors"
func Clamp(x int64) (int64, error) {
	if x < -9223372036854775808 {
		return 0, errors.New("below range")
	}
	if x > 9223372036854775807 {
		return 0, errors.New("above range")
	}
	return x, nil
}
"#,
        );
        let paths = derive(&params, true, Some(&body));

        // neither guard can be satisfied by an int64
        assert!(paths.error.is_empty());
        assert_eq!(paths.happy[0].bindings["x"], "-9223372036854775808");

        let mut edges: Vec<&str> = paths.edge.iter().map(|p| p.bindings["x"].as_str()).collect();
        edges.sort();
        assert_eq!(edges, vec!["-9223372036854775807", "9223372036854775806", "9223372036854775807"]);
    }

    #[test]
    fn test_length_guard_and_edges() {
        let (params, body) = body_of(
            r#"package x
import "fmt"
func Join(parts []string, sep string) (string, error) {
	if len(parts) == 0 {
		return "", fmt.Errorf("nothing to join: %d", len(parts))
	}
	return sep, nil
}
"#,
        );
        let paths = derive(&params, true, Some(&body));
        assert_eq!(paths.error[0].bindings["parts"], "[]string{}");
        assert_eq!(paths.error[0].expectation, Expectation::Error { contains: Some("nothing to join:".to_string()) });
        assert_eq!(paths.happy[0].bindings["parts"], "make([]string, 1)");

        let edges: Vec<&String> = paths.edge.iter().map(|p| &p.description).collect();
        assert!(edges.contains(&&"empty sep".to_string()));
        assert!(!edges.iter().any(|d| d.as_str() == "empty parts"));
    }

    #[test]
    fn test_switch_cases_become_happy_paths() {
        let (params, body) = body_of(
            "package x\nfunc Label(code int) string {\n\tswitch code {\n\tcase 200:\n\t\treturn \"ok\"\n\tcase 404:\n\t\treturn \"missing\"\n\tdefault:\n\t\treturn \"other\"\n\t}\n}\n",
        );
        let paths = derive(&params, false, Some(&body));
        let values: Vec<&str> = paths.happy.iter().map(|p| p.bindings["code"].as_str()).collect();
        assert!(values.contains(&"200"));
        assert!(values.contains(&"404"));
    }

    #[test]
    fn test_missing_body_has_no_paths() {
        let paths = derive(&[], true, None);
        assert!(paths.happy.is_empty() && paths.error.is_empty() && paths.edge.is_empty());
    }

    #[test]
    fn test_dependencies_resolve_import_paths() {
        let source = "package x\nimport (\n\t\"strings\"\n\tjs \"encoding/json\"\n)\nfunc F(s string) bool {\n\t_, _ = js.Marshal(s)\n\treturn strings.HasPrefix(s, \"a\")\n}\n";
        let model = GoSource::parse(Path::new("x.go"), source).unwrap();
        let function = model.functions().remove(0);
        let body = model.body(&function).unwrap();
        assert_eq!(dependencies(&body, &model.imports()), vec!["encoding/json".to_string(), "strings".to_string()]);
    }
}
