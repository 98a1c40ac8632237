//! Typed QTI values and variables.
//!
//! Null follows QTI rules: an absent value, an empty string and an empty
//! container are all null. Equality is QTI equality: `multiple` containers
//! compare as multisets, `pair` ignores member order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::definition::VariableDeclaration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseType {
    Identifier,
    Boolean,
    Integer,
    Float,
    String,
    Point,
    Pair,
    DirectedPair,
    Duration,
    File,
    Uri,
}

impl BaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Point => "point",
            Self::Pair => "pair",
            Self::DirectedPair => "directedPair",
            Self::Duration => "duration",
            Self::File => "file",
            Self::Uri => "uri",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let base = match name {
            "identifier" => Self::Identifier,
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "float" => Self::Float,
            "string" => Self::String,
            "point" => Self::Point,
            "pair" => Self::Pair,
            "directedPair" => Self::DirectedPair,
            "duration" => Self::Duration,
            "file" => Self::File,
            "uri" => Self::Uri,
            _ => return None,
        };
        Some(base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    Multiple,
    Ordered,
}

/// Uploaded file payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValue {
    #[serde(default)]
    pub name: Option<String>,
    pub mime: String,
    pub data: String,
}

/// Mime type the client uses for a file interaction that holds no upload yet.
pub const FILE_PLACEHOLDER_MIME: &str = "qti/x-file-placeholder";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scalar {
    Identifier(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Point([i64; 2]),
    Pair([String; 2]),
    DirectedPair([String; 2]),
    /// Seconds.
    Duration(f64),
    File(FileValue),
    Uri(String),
}

impl Scalar {
    pub fn base_type(&self) -> BaseType {
        match self {
            Self::Identifier(_) => BaseType::Identifier,
            Self::Boolean(_) => BaseType::Boolean,
            Self::Integer(_) => BaseType::Integer,
            Self::Float(_) => BaseType::Float,
            Self::String(_) => BaseType::String,
            Self::Point(_) => BaseType::Point,
            Self::Pair(_) => BaseType::Pair,
            Self::DirectedPair(_) => BaseType::DirectedPair,
            Self::Duration(_) => BaseType::Duration,
            Self::File(_) => BaseType::File,
            Self::Uri(_) => BaseType::Uri,
        }
    }

    fn qti_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pair([a1, b1]), Self::Pair([a2, b2])) => {
                (a1 == a2 && b1 == b2) || (a1 == b2 && b1 == a2)
            }
            _ => self == other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Single(Scalar),
    Multiple(Vec<Scalar>),
    Ordered(Vec<Scalar>),
}

impl Value {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::Single(_) => Cardinality::Single,
            Self::Multiple(_) => Cardinality::Multiple,
            Self::Ordered(_) => Cardinality::Ordered,
        }
    }

    pub fn qti_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Single(a), Self::Single(b)) => a.qti_eq(b),
            (Self::Ordered(a), Self::Ordered(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.qti_eq(y))
            }
            (Self::Multiple(a), Self::Multiple(b)) => multiset_eq(a, b),
            _ => false,
        }
    }

    /// Single file value carrying the placeholder mime type.
    pub fn is_file_placeholder(&self) -> bool {
        matches!(self, Self::Single(Scalar::File(file)) if file.mime == FILE_PLACEHOLDER_MIME)
    }
}

fn multiset_eq(a: &[Scalar], b: &[Scalar]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|left| {
        let found = b
            .iter()
            .enumerate()
            .find(|(idx, right)| !used[*idx] && left.qti_eq(right))
            .map(|(idx, _)| idx);
        match found {
            Some(idx) => {
                used[idx] = true;
                true
            }
            None => false,
        }
    })
}

/// QTI null test.
pub fn is_null(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Single(Scalar::String(s))) => s.is_empty(),
        Some(Value::Multiple(items) | Value::Ordered(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// QTI equality where two nulls are equal and null never equals a value.
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (is_null(a), is_null(b)) {
        (true, true) => true,
        (false, false) => match (a, b) {
            (Some(a), Some(b)) => a.qti_eq(b),
            _ => false,
        },
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Response,
    Outcome,
    Trace,
}

/// Typed variable with its declared default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub identifier: String,
    pub kind: VariableKind,
    pub cardinality: Cardinality,
    pub base_type: BaseType,
    pub value: Option<Value>,
    #[serde(default)]
    pub default: Option<Value>,
}

impl Variable {
    pub fn from_declaration(decl: &VariableDeclaration, kind: VariableKind) -> Self {
        Self {
            identifier: decl.identifier.clone(),
            kind,
            cardinality: decl.cardinality,
            base_type: decl.base_type,
            value: decl.default_value.clone(),
            default: decl.default_value.clone(),
        }
    }

    /// Single-cardinality string variable, used for client-supplied trace/outcome/response values.
    pub fn single_string(identifier: &str, kind: VariableKind, value: String) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            cardinality: Cardinality::Single,
            base_type: BaseType::String,
            value: Some(Value::Single(Scalar::String(value))),
            default: None,
        }
    }

    pub fn integer(identifier: &str, kind: VariableKind, value: i64) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            cardinality: Cardinality::Single,
            base_type: BaseType::Integer,
            value: Some(Value::Single(Scalar::Integer(value))),
            default: None,
        }
    }

    pub fn is_null(&self) -> bool {
        is_null(self.value.as_ref())
    }

    pub fn equals_default(&self) -> bool {
        values_equal(self.value.as_ref(), self.default.as_ref())
    }
}

/// Variables of one item or test, keyed by identifier.
pub type VariableSet = BTreeMap<String, Variable>;
