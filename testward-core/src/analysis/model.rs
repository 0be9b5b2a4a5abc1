//! Language-neutral view of a parsed source file
//!
//! Analysis and synthesis only ever see these types. A parser for a concrete
//! language implements [`SourceModel`] by lowering its syntax tree into
//! [`FunctionSignature`]s and [`ControlFlowNode`] bodies.

use serde::{Deserialize, Serialize};

/// A parsed source file
pub trait SourceModel {
    fn package_name(&self) -> &str;

    /// Imported packages as `(local name, import path)`
    fn imports(&self) -> Vec<(String, String)>;

    /// Every function and method declared at top level
    fn functions(&self) -> Vec<FunctionSignature>;

    /// Lowered body of a function, `None` for declarations without a body
    fn body(&self, function: &FunctionSignature) -> Option<ControlFlowNode>;

    /// Names of declared types
    fn type_names(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receiver {
    pub name: Option<String>,
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub type_name: String,
    pub variadic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSlot {
    pub name: Option<String>,
    pub type_name: String,
}

/// Signature and location of a declared function
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionSignature {
    pub index: usize,
    pub name: String,
    pub receiver: Option<Receiver>,
    pub params: Vec<Param>,
    pub results: Vec<ResultSlot>,
    pub type_parameters: bool,
    pub doc: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Byte span of the declaration, including its leading doc comment
    pub span: (usize, usize),
    /// Byte offset just inside the opening brace of the body
    pub body_start: Option<usize>,
}

impl FunctionSignature {
    pub fn is_method(&self) -> bool {
        self.receiver.is_some()
    }
}

/// Comparison operator in a branch condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    /// The operator that holds exactly when this one does not
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
        }
    }

    /// The operator with its operands swapped (`a < b` becomes `b > a`)
    pub fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comparison {
    pub left: String,
    pub op: CompareOp,
    pub right: String,
}

/// How the comparisons of a condition combine at the top level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Connective {
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub text: String,
    pub comparisons: Vec<Comparison>,
    pub connective: Connective,
}

/// Classified value in a return statement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ReturnValue {
    Nil,
    /// A freshly constructed or sentinel error, with its literal message when known
    Error { message: Option<String> },
    Expr(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SwitchKind {
    Expression,
    Type,
    Select,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<String>,
    pub is_default: bool,
    pub body: ControlFlowNode,
}

/// Lowered control flow of a function body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlFlowNode {
    Block(Vec<ControlFlowNode>),
    If {
        condition: Condition,
        then: Box<ControlFlowNode>,
        otherwise: Option<Box<ControlFlowNode>>,
    },
    Loop {
        body: Box<ControlFlowNode>,
    },
    Switch {
        kind: SwitchKind,
        subject: Option<String>,
        cases: Vec<SwitchCase>,
    },
    Return(Vec<ReturnValue>),
    Call {
        callee: String,
    },
    Statement,
}

impl ControlFlowNode {
    /// Visit this node and every node below it, depth first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ControlFlowNode)) {
        visit(self);
        match self {
            Self::Block(children) => children.iter().for_each(|child| child.walk(visit)),
            Self::If { then, otherwise, .. } => {
                then.walk(visit);
                if let Some(otherwise) = otherwise {
                    otherwise.walk(visit);
                }
            }
            Self::Loop { body } => body.walk(visit),
            Self::Switch { cases, .. } => cases.iter().for_each(|case| case.body.walk(visit)),
            Self::Return(_) | Self::Call { .. } | Self::Statement => {}
        }
    }

    /// Statements directly inside this node when it is a block
    pub fn statements(&self) -> &[ControlFlowNode] {
        match self {
            Self::Block(children) => children,
            other => std::slice::from_ref(other),
        }
    }

    /// Whether a call to `callee` appears anywhere below this node
    pub fn calls(&self, callee: &str) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if let Self::Call { callee: name } = node {
                found |= name == callee;
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_algebra() {
        for op in [CompareOp::Eq, CompareOp::Ne, CompareOp::Lt, CompareOp::Le, CompareOp::Gt, CompareOp::Ge] {
            assert_eq!(op.negate().negate(), op);
            assert_eq!(op.flip().flip(), op);
        }
        assert_eq!(CompareOp::Lt.negate(), CompareOp::Ge);
        assert_eq!(CompareOp::Lt.flip(), CompareOp::Gt);
        assert_eq!(CompareOp::parse("<="), Some(CompareOp::Le));
        assert_eq!(CompareOp::parse("&&"), None);
    }

    #[test]
    fn test_walk_reaches_nested_calls() {
        let body = ControlFlowNode::Block(vec![ControlFlowNode::Loop {
            body: Box::new(ControlFlowNode::Block(vec![ControlFlowNode::Call {
                callee: "t.Parallel".to_string(),
            }])),
        }]);
        assert!(body.calls("t.Parallel"));
        assert!(!body.calls("t.Helper"));
    }
}
