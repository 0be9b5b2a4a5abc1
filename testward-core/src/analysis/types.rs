//! Classification of Go type expressions

use serde::{Deserialize, Serialize};

/// Structural kind of a type expression
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Pointer,
    Slice,
    Array,
    Map,
    Interface,
    Channel,
    Function,
    Named,
}

const NUMERIC_TYPES: &[&str] = &[
    "int", "int8", "int16", "int32", "int64", "uint", "uint8", "uint16", "uint32", "uint64",
    "uintptr", "float32", "float64", "complex64", "complex128", "byte", "rune",
];

/// A classified type expression
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeInfo {
    pub raw: String,
    pub kind: TypeKind,
}

impl TypeInfo {
    /// Classify a type as written in source. A variadic `...T` is treated as `[]T`.
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        let normalized = match trimmed.strip_prefix("...") {
            Some(inner) => format!("[]{}", inner.trim()),
            None => trimmed.to_string(),
        };
        let kind = Self::kind_of(&normalized);
        Self { raw: normalized, kind }
    }

    fn kind_of(ty: &str) -> TypeKind {
        let ty = ty.trim_start_matches('(').trim_end_matches(')');
        if ty.starts_with('*') {
            TypeKind::Pointer
        } else if ty.starts_with("[]") {
            TypeKind::Slice
        } else if ty.starts_with('[') {
            TypeKind::Array
        } else if ty.starts_with("map[") {
            TypeKind::Map
        } else if ty.starts_with("interface") || ty == "any" {
            TypeKind::Interface
        } else if ty.starts_with("chan") || ty.starts_with("<-chan") {
            TypeKind::Channel
        } else if ty.starts_with("func") {
            TypeKind::Function
        } else {
            TypeKind::Named
        }
    }

    pub fn is_pointer(&self) -> bool {
        self.kind == TypeKind::Pointer
    }

    pub fn is_slice(&self) -> bool {
        self.kind == TypeKind::Slice
    }

    pub fn is_map(&self) -> bool {
        self.kind == TypeKind::Map
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn is_error(&self) -> bool {
        self.raw == "error"
    }

    /// Pointers, slices, maps, interfaces and the built-in `error` can be nil.
    /// Every other named or value type cannot.
    pub fn is_nilable(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer | TypeKind::Slice | TypeKind::Map | TypeKind::Interface)
            || self.is_error()
    }

    pub fn is_string(&self) -> bool {
        self.raw == "string"
    }

    pub fn is_bool(&self) -> bool {
        self.raw == "bool"
    }

    pub fn is_numeric(&self) -> bool {
        NUMERIC_TYPES.contains(&self.raw.as_str())
    }

    pub fn is_float(&self) -> bool {
        matches!(self.raw.as_str(), "float32" | "float64")
    }

    /// Element type of a pointer or slice
    pub fn element(&self) -> Option<&str> {
        match self.kind {
            TypeKind::Pointer => self.raw.strip_prefix('*'),
            TypeKind::Slice => self.raw.strip_prefix("[]"),
            _ => None,
        }
    }

    /// Go expression for the zero value of this type
    pub fn zero_value(&self) -> String {
        match self.kind {
            TypeKind::Pointer
            | TypeKind::Slice
            | TypeKind::Map
            | TypeKind::Interface
            | TypeKind::Channel
            | TypeKind::Function => "nil".to_string(),
            TypeKind::Array => format!("{}{{}}", self.raw),
            TypeKind::Named => {
                if self.is_error() {
                    "nil".to_string()
                } else if self.is_string() {
                    "\"\"".to_string()
                } else if self.is_bool() {
                    "false".to_string()
                } else if self.is_numeric() {
                    "0".to_string()
                } else {
                    format!("*new({})", self.raw)
                }
            }
        }
    }

    /// Go expression for a value that is known not to be nil, when one can be built
    pub fn non_nil_value(&self) -> Option<String> {
        match self.kind {
            TypeKind::Pointer => self.element().map(|inner| format!("new({})", inner)),
            TypeKind::Slice => Some(format!("make({}, 1)", self.raw)),
            TypeKind::Map => Some(format!("make({})", self.raw)),
            TypeKind::Channel => Some(format!("make({})", self.raw)),
            TypeKind::Interface => Some("struct{}{}".to_string()),
            TypeKind::Function => None,
            TypeKind::Array => Some(self.zero_value()),
            TypeKind::Named if self.is_error() => Some("errors.New(\"testward\")".to_string()),
            TypeKind::Named => Some(self.zero_value()),
        }
    }

    /// Go expression for an empty but non-nil value of a string, slice or map
    pub fn empty_value(&self) -> Option<String> {
        match self.kind {
            TypeKind::Slice | TypeKind::Map => Some(format!("{}{{}}", self.raw)),
            TypeKind::Named if self.is_string() => Some("\"\"".to_string()),
            _ => None,
        }
    }

    /// Go expression for a value of length `len`, for strings and slices
    pub fn value_of_len(&self, len: u64) -> Option<String> {
        match self.kind {
            TypeKind::Slice => Some(format!("make({}, {})", self.raw, len)),
            TypeKind::Named if self.is_string() => {
                if len == 0 {
                    Some("\"\"".to_string())
                } else {
                    Some(format!("strings.Repeat(\"a\", {})", len))
                }
            }
            _ => None,
        }
    }

    /// Value used for a parameter when nothing in the body constrains it
    pub fn representative_value(&self) -> String {
        if self.is_string() {
            return "\"example\"".to_string();
        }
        if self.is_nilable() && !self.is_error() {
            if let Some(value) = self.non_nil_value() {
                return value;
            }
        }
        self.zero_value()
    }
}
