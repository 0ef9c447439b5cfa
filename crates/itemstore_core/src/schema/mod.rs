//! Schema registry: kinds, attribute definitions and index declarations.
//!
//! # Responsibility
//! - Describe the shape of every item kind before any item is stored.
//! - Resolve inheritance, reference targets and inverse attributes once, at
//!   load time, so runtime lookups are plain map reads.
//!
//! # Invariants
//! - Unknown kind or attribute names fail fast with a `SchemaError`.
//! - A built `Schema` is immutable and shared through `Arc`.

use crate::model::value::ValueType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod kind;
pub mod loader;
pub mod pim;
pub mod registry;

pub use kind::{AttrDef, AttrDefs, Cardinality, DeletePolicy, Kind};
pub use loader::{AttrDocument, IndexDocument, KindDocument, SchemaDocument};
pub use registry::{IndexDef, Schema, SchemaBuilder};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Interned handle of a kind inside one `Schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindId(pub(crate) u32);

impl KindId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Schema definition and lookup errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    UnknownKind(String),
    UnknownAttribute {
        kind: String,
        attribute: String,
    },
    DuplicateKind(String),
    DuplicateAttribute {
        kind: String,
        attribute: String,
    },
    DuplicateIndex(String),
    InvalidIndex {
        index: String,
        message: String,
    },
    InvalidName(String),
    UnknownSuperKind {
        kind: String,
        super_kind: String,
    },
    InheritanceCycle(String),
    InvalidAttribute {
        kind: String,
        attribute: String,
        message: String,
    },
    InverseMismatch {
        kind: String,
        attribute: String,
        message: String,
    },
    /// A reference operation named a plain value attribute.
    NotAReference {
        kind: String,
        attribute: String,
    },
    /// A value operation named a reference attribute.
    NotAValue {
        kind: String,
        attribute: String,
    },
    TypeMismatch {
        attribute: String,
        expected: ValueType,
        found: &'static str,
    },
    CardinalityMismatch {
        attribute: String,
        expected: Cardinality,
        found: &'static str,
    },
    MissingRequired {
        kind: String,
        attribute: String,
    },
    InvalidDocument(String),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKind(path) => write!(f, "unknown kind `{path}`"),
            Self::UnknownAttribute { kind, attribute } => {
                write!(f, "kind `{kind}` has no attribute `{attribute}`")
            }
            Self::DuplicateKind(path) => write!(f, "kind `{path}` is defined twice"),
            Self::DuplicateAttribute { kind, attribute } => {
                write!(f, "attribute `{attribute}` is defined twice on kind `{kind}`")
            }
            Self::DuplicateIndex(name) => write!(f, "index `{name}` is defined twice"),
            Self::InvalidIndex { index, message } => {
                write!(f, "index `{index}` is invalid: {message}")
            }
            Self::InvalidName(name) => write!(f, "invalid schema name `{name}`"),
            Self::UnknownSuperKind { kind, super_kind } => {
                write!(f, "kind `{kind}` names unknown super-kind `{super_kind}`")
            }
            Self::InheritanceCycle(path) => {
                write!(f, "kind `{path}` inherits from itself")
            }
            Self::InvalidAttribute {
                kind,
                attribute,
                message,
            } => write!(f, "attribute `{kind}.{attribute}` is invalid: {message}"),
            Self::InverseMismatch {
                kind,
                attribute,
                message,
            } => write!(
                f,
                "reference `{kind}.{attribute}` has no matching inverse: {message}"
            ),
            Self::NotAReference { kind, attribute } => {
                write!(f, "attribute `{kind}.{attribute}` is not a reference")
            }
            Self::NotAValue { kind, attribute } => {
                write!(f, "attribute `{kind}.{attribute}` is a reference, not a value")
            }
            Self::TypeMismatch {
                attribute,
                expected,
                found,
            } => write!(
                f,
                "attribute `{attribute}` expects {expected} values, got {found}"
            ),
            Self::CardinalityMismatch {
                attribute,
                expected,
                found,
            } => write!(
                f,
                "attribute `{attribute}` has {expected} cardinality, got {found}"
            ),
            Self::MissingRequired { kind, attribute } => {
                write!(f, "required attribute `{kind}.{attribute}` has no value")
            }
            Self::InvalidDocument(message) => write!(f, "invalid schema document: {message}"),
        }
    }
}

impl Error for SchemaError {}

pub(crate) fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::is_valid_identifier;

    #[test]
    fn identifiers_reject_separators_and_leading_digits() {
        assert!(is_valid_identifier("displayName"));
        assert!(is_valid_identifier("_hidden"));
        assert!(!is_valid_identifier("9lives"));
        assert!(!is_valid_identifier("pim/Event"));
        assert!(!is_valid_identifier(""));
    }
}
