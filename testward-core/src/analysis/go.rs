//! Go source model backed by tree-sitter

use super::model::{
    CompareOp, Comparison, Condition, Connective, ControlFlowNode, FunctionSignature, Param,
    Receiver, ResultSlot, ReturnValue, SourceModel, SwitchCase, SwitchKind,
};
use super::{AnalysisError, Result};
use std::path::Path;
use tracing::trace;
use tree_sitter::{Node, Parser};

/// Constructors whose result is always a non-nil error
const ERROR_CONSTRUCTORS: &[&str] = &["errors.New", "fmt.Errorf", "errors.Errorf", "errors.Wrap", "errors.Wrapf"];

/// A parsed Go file lowered into the language-neutral model
#[derive(Debug, Clone)]
pub struct GoSource {
    package: String,
    imports: Vec<(String, String)>,
    functions: Vec<FunctionSignature>,
    bodies: Vec<Option<ControlFlowNode>>,
    types: Vec<String>,
}

impl GoSource {
    /// Parse Go source text. Any syntax error rejects the whole file.
    pub fn parse(path: &Path, source: &str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| AnalysisError::ParserInit(e.to_string()))?;

        let tree = parser.parse(source, None).ok_or_else(|| AnalysisError::Parse {
            path: path.to_path_buf(),
            line: 0,
            message: "parser produced no tree".to_string(),
        })?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(0);
            return Err(AnalysisError::Parse {
                path: path.to_path_buf(),
                line,
                message: "syntax error".to_string(),
            });
        }

        let lowering = Lowering { source: source.as_bytes() };
        let mut model = GoSource {
            package: String::new(),
            imports: Vec::new(),
            functions: Vec::new(),
            bodies: Vec::new(),
            types: Vec::new(),
        };

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "package_clause" => {
                    if let Some(name) = child.named_child(0) {
                        model.package = lowering.text(name).to_string();
                    }
                }
                "import_declaration" => lowering.imports(child, &mut model.imports),
                "function_declaration" | "method_declaration" => {
                    let index = model.functions.len();
                    let signature = lowering.signature(child, index);
                    let body = child.child_by_field_name("body").map(|body| lowering.block(body));
                    trace!("Lowered function {} from {:?}", signature.name, path);
                    model.functions.push(signature);
                    model.bodies.push(body);
                }
                "type_declaration" => {
                    let mut type_cursor = child.walk();
                    for spec in child.named_children(&mut type_cursor) {
                        if let Some(name) = spec.child_by_field_name("name") {
                            model.types.push(lowering.text(name).to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(model)
    }
}

impl SourceModel for GoSource {
    fn package_name(&self) -> &str {
        &self.package
    }

    fn imports(&self) -> Vec<(String, String)> {
        self.imports.clone()
    }

    fn functions(&self) -> Vec<FunctionSignature> {
        self.functions.clone()
    }

    fn body(&self, function: &FunctionSignature) -> Option<ControlFlowNode> {
        self.bodies.get(function.index).cloned().flatten()
    }

    fn type_names(&self) -> Vec<String> {
        self.types.clone()
    }
}

fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().filter(|child| child.has_error()).find_map(first_error_line)
}

/// Default local name of an import path: the last segment, skipping `/vN`
/// major suffixes and `.vN` gopkg.in suffixes.
pub fn import_local_name(path: &str) -> String {
    let mut segments = path.rsplit('/');
    let last = segments.next().unwrap_or(path);
    let is_major = |s: &str| s.len() > 1 && s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit());
    let base = if is_major(last) { segments.next().unwrap_or(last) } else { last };
    match base.rsplit_once('.') {
        Some((name, suffix)) if is_major(suffix) => name.to_string(),
        _ => base.to_string(),
    }
}

fn unquote(literal: &str) -> Option<String> {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| literal.strip_prefix('`').and_then(|s| s.strip_suffix('`')))?;
    Some(inner.replace("\\\"", "\"").replace("\\\\", "\\"))
}

struct Lowering<'s> {
    source: &'s [u8],
}

impl<'s> Lowering<'s> {
    fn text(&self, node: Node) -> &'s str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    fn named_children<'t>(&self, node: Node<'t>) -> Vec<Node<'t>> {
        let mut cursor = node.walk();
        let children = node.named_children(&mut cursor).collect();
        children
    }

    fn imports(&self, declaration: Node, imports: &mut Vec<(String, String)>) {
        for child in self.named_children(declaration) {
            match child.kind() {
                "import_spec" => self.import_spec(child, imports),
                "import_spec_list" => {
                    for spec in self.named_children(child) {
                        if spec.kind() == "import_spec" {
                            self.import_spec(spec, imports);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn import_spec(&self, spec: Node, imports: &mut Vec<(String, String)>) {
        let Some(path) = spec.child_by_field_name("path").and_then(|p| unquote(self.text(p))) else {
            return;
        };
        let local = match spec.child_by_field_name("name") {
            Some(name) => self.text(name).to_string(),
            None => import_local_name(&path),
        };
        imports.push((local, path));
    }

    fn signature(&self, declaration: Node, index: usize) -> FunctionSignature {
        let name = declaration
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();

        let receiver = declaration.child_by_field_name("receiver").and_then(|list| {
            self.params(list).into_iter().next().map(|param| Receiver {
                name: param.name,
                type_name: param.type_name,
            })
        });

        let params = declaration
            .child_by_field_name("parameters")
            .map(|list| self.params(list))
            .unwrap_or_default();

        let results = match declaration.child_by_field_name("result") {
            Some(result) if result.kind() == "parameter_list" => self
                .params(result)
                .into_iter()
                .map(|p| ResultSlot { name: p.name, type_name: p.type_name })
                .collect(),
            Some(result) => vec![ResultSlot { name: None, type_name: self.text(result).to_string() }],
            None => Vec::new(),
        };

        let (doc, span_start) = self.doc_comment(declaration);
        let body_start = declaration.child_by_field_name("body").map(|body| body.start_byte() + 1);

        FunctionSignature {
            index,
            name,
            receiver,
            params,
            results,
            type_parameters: declaration.child_by_field_name("type_parameters").is_some(),
            doc,
            start_line: declaration.start_position().row + 1,
            end_line: declaration.end_position().row + 1,
            span: (span_start, declaration.end_byte()),
            body_start,
        }
    }

    /// Leading `//` comment lines directly above a declaration
    fn doc_comment(&self, declaration: Node) -> (String, usize) {
        let mut lines = Vec::new();
        let mut start = declaration.start_byte();
        let mut expected_row = declaration.start_position().row;
        let mut current = declaration.prev_sibling();

        while let Some(node) = current {
            if node.kind() != "comment" || node.end_position().row + 1 != expected_row {
                break;
            }
            let text = self.text(node);
            lines.push(text.trim_start_matches("//").trim_start_matches("/*").trim_end_matches("*/").trim().to_string());
            start = node.start_byte();
            expected_row = node.start_position().row;
            current = node.prev_sibling();
        }

        lines.reverse();
        (lines.join("\n"), start)
    }

    fn params(&self, list: Node) -> Vec<Param> {
        let mut params = Vec::new();
        for declaration in self.named_children(list) {
            let variadic = declaration.kind() == "variadic_parameter_declaration";
            if declaration.kind() != "parameter_declaration" && !variadic {
                continue;
            }
            let type_name = declaration
                .child_by_field_name("type")
                .map(|t| self.text(t).to_string())
                .unwrap_or_default();

            let mut cursor = declaration.walk();
            let names: Vec<String> = declaration
                .children_by_field_name("name", &mut cursor)
                .map(|n| self.text(n).to_string())
                .collect();

            if names.is_empty() {
                params.push(Param { name: None, type_name, variadic });
            } else {
                for name in names {
                    params.push(Param { name: Some(name), type_name: type_name.clone(), variadic });
                }
            }
        }
        params
    }

    /// Lower a block, flattening any statement list wrapper
    fn block(&self, block: Node) -> ControlFlowNode {
        let mut statements = Vec::new();
        self.statements_into(block, &mut statements);
        ControlFlowNode::Block(statements)
    }

    fn statements_into(&self, container: Node, out: &mut Vec<ControlFlowNode>) {
        for child in self.named_children(container) {
            match child.kind() {
                "statement_list" => self.statements_into(child, out),
                "comment" => {}
                _ => self.statement(child, out),
            }
        }
    }

    fn statement(&self, node: Node, out: &mut Vec<ControlFlowNode>) {
        match node.kind() {
            "block" => out.push(self.block(node)),
            "if_statement" => {
                if let Some(initializer) = node.child_by_field_name("initializer") {
                    self.expression_effects(initializer, out);
                }
                if let Some(condition) = node.child_by_field_name("condition") {
                    self.expression_effects(condition, out);
                }
                out.push(self.if_statement(node));
            }
            "for_statement" => {
                for child in self.named_children(node) {
                    if child.kind() != "block" {
                        self.expression_effects(child, out);
                    }
                }
                let body = node
                    .child_by_field_name("body")
                    .map(|b| self.block(b))
                    .unwrap_or(ControlFlowNode::Block(Vec::new()));
                out.push(ControlFlowNode::Loop { body: Box::new(body) });
            }
            "expression_switch_statement" | "type_switch_statement" | "select_statement" => {
                out.push(self.switch(node));
            }
            "return_statement" => {
                let values = self
                    .named_children(node)
                    .into_iter()
                    .flat_map(|child| {
                        if child.kind() == "expression_list" {
                            self.named_children(child)
                        } else {
                            vec![child]
                        }
                    })
                    .collect::<Vec<_>>();
                for value in &values {
                    self.expression_effects(*value, out);
                }
                out.push(ControlFlowNode::Return(values.into_iter().map(|v| self.return_value(v)).collect()));
            }
            "labeled_statement" => {
                for child in self.named_children(node) {
                    if child.kind() != "label_name" {
                        self.statement(child, out);
                    }
                }
            }
            _ => {
                self.expression_effects(node, out);
                out.push(ControlFlowNode::Statement);
            }
        }
    }

    fn if_statement(&self, node: Node) -> ControlFlowNode {
        let condition = node
            .child_by_field_name("condition")
            .map(|c| self.condition(c))
            .unwrap_or(Condition { text: String::new(), comparisons: Vec::new(), connective: Connective::All });

        let then = node
            .child_by_field_name("consequence")
            .map(|b| self.block(b))
            .unwrap_or(ControlFlowNode::Block(Vec::new()));

        let otherwise = node.child_by_field_name("alternative").map(|alt| {
            let mut lowered = Vec::new();
            self.statement(alt, &mut lowered);
            Box::new(match lowered.len() {
                1 => lowered.remove(0),
                _ => ControlFlowNode::Block(lowered),
            })
        });

        ControlFlowNode::If { condition, then: Box::new(then), otherwise }
    }

    fn switch(&self, node: Node) -> ControlFlowNode {
        let kind = match node.kind() {
            "type_switch_statement" => SwitchKind::Type,
            "select_statement" => SwitchKind::Select,
            _ => SwitchKind::Expression,
        };
        let subject = node.child_by_field_name("value").map(|v| self.text(v).trim().to_string());

        let mut cases = Vec::new();
        for child in self.named_children(node) {
            let (values, is_default) = match child.kind() {
                "expression_case" => (
                    child
                        .child_by_field_name("value")
                        .map(|list| self.named_children(list).into_iter().map(|v| self.text(v).to_string()).collect())
                        .unwrap_or_default(),
                    false,
                ),
                "type_case" => {
                    let mut cursor = child.walk();
                    let types = child
                        .children_by_field_name("type", &mut cursor)
                        .map(|t| self.text(t).to_string())
                        .collect();
                    (types, false)
                }
                "communication_case" => (
                    child.child_by_field_name("communication").map(|c| vec![self.text(c).to_string()]).unwrap_or_default(),
                    false,
                ),
                "default_case" => (Vec::new(), true),
                _ => continue,
            };

            let mut statements = Vec::new();
            for statement in self.named_children(child) {
                let is_label = ["value", "type", "communication"]
                    .iter()
                    .any(|field| child.child_by_field_name(field).is_some_and(|f| f.id() == statement.id()));
                if is_label || statement.kind() == "comment" {
                    continue;
                }
                if statement.kind() == "statement_list" {
                    self.statements_into(statement, &mut statements);
                } else if kind != SwitchKind::Type || !is_type_node(statement.kind()) {
                    self.statement(statement, &mut statements);
                }
            }

            cases.push(SwitchCase { values, is_default, body: ControlFlowNode::Block(statements) });
        }

        ControlFlowNode::Switch { kind, subject, cases }
    }

    fn condition(&self, expression: Node) -> Condition {
        let mut comparisons = Vec::new();
        let connective = match expression.child_by_field_name("operator").map(|op| self.text(op)) {
            Some("||") => Connective::Any,
            _ => Connective::All,
        };
        self.comparisons(expression, &mut comparisons);
        Condition { text: self.text(expression).to_string(), comparisons, connective }
    }

    fn comparisons(&self, expression: Node, out: &mut Vec<Comparison>) {
        match expression.kind() {
            "parenthesized_expression" => {
                for child in self.named_children(expression) {
                    self.comparisons(child, out);
                }
            }
            "binary_expression" => {
                let operator = expression.child_by_field_name("operator").map(|op| self.text(op)).unwrap_or_default();
                let left = expression.child_by_field_name("left");
                let right = expression.child_by_field_name("right");
                if operator == "&&" || operator == "||" {
                    for side in [left, right].into_iter().flatten() {
                        self.comparisons(side, out);
                    }
                } else if let (Some(op), Some(left), Some(right)) = (CompareOp::parse(operator), left, right) {
                    out.push(Comparison {
                        left: self.text(left).trim().to_string(),
                        op,
                        right: self.text(right).trim().to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    fn return_value(&self, value: Node) -> ReturnValue {
        match value.kind() {
            "nil" => ReturnValue::Nil,
            "call_expression" => {
                let callee = value.child_by_field_name("function").map(|f| self.text(f)).unwrap_or_default();
                if ERROR_CONSTRUCTORS.contains(&callee) {
                    ReturnValue::Error { message: self.error_message(callee, value) }
                } else {
                    ReturnValue::Expr(self.text(value).to_string())
                }
            }
            "identifier" | "selector_expression" => {
                let text = self.text(value);
                let last = text.rsplit('.').next().unwrap_or(text);
                if last == "err" || last.starts_with("Err") || last.starts_with("err") {
                    ReturnValue::Error { message: None }
                } else {
                    ReturnValue::Expr(text.to_string())
                }
            }
            _ => ReturnValue::Expr(self.text(value).to_string()),
        }
    }

    /// Literal part of an error constructor's message that must appear in `err.Error()`
    fn error_message(&self, callee: &str, call: Node) -> Option<String> {
        let arguments = call.child_by_field_name("arguments")?;
        let message_index = if callee.starts_with("errors.Wrap") { 1 } else { 0 };
        let literal = self.named_children(arguments).into_iter().nth(message_index)?;
        if !matches!(literal.kind(), "interpreted_string_literal" | "raw_string_literal") {
            return None;
        }
        let message = unquote(self.text(literal))?;
        let stable = match message.find('%') {
            Some(position) => message[..position].trim_end().to_string(),
            None => message,
        };
        (!stable.is_empty()).then_some(stable)
    }

    /// Calls and closure bodies reachable from an expression or simple statement
    fn expression_effects(&self, node: Node, out: &mut Vec<ControlFlowNode>) {
        match node.kind() {
            "func_literal" => {
                if let Some(body) = node.child_by_field_name("body") {
                    out.push(self.block(body));
                }
                return;
            }
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    out.push(ControlFlowNode::Call { callee: self.text(function).to_string() });
                }
            }
            _ => {}
        }
        for child in self.named_children(node) {
            self.expression_effects(child, out);
        }
    }
}

fn is_type_node(kind: &str) -> bool {
    kind.ends_with("_type") || kind == "type_identifier" || kind == "qualified_type"
}
