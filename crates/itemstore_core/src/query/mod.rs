//! Queries over the items visible in a view.
//!
//! # Responsibility
//! - Represent queries as data (`QueryPlan`, `Query`, `Predicate`).
//! - Plan each source onto an index when one covers it, else a kind scan.
//! - Parse the textual query language and run full-text searches.
//!
//! # Invariants
//! - Predicates over a kind source are validated against the kind's schema
//!   before any item is read.
//! - Results are deterministic for a given view version.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod parser;
pub mod plan;
pub mod predicate;
pub mod search;

pub use parser::parse_query;
pub use plan::{execute, explain, AccessPath, ItemRef, Query, QueryPlan, QuerySource};
pub use predicate::{CompareOp, Operand, Predicate};
pub use search::{SearchHit, SearchQuery};

/// Query construction and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    Parse {
        query: String,
        message: String,
    },
    /// `$n` has no matching parameter.
    UnboundParameter(usize),
    InvalidParameter {
        index: usize,
        message: String,
    },
    InvalidRegex {
        pattern: String,
        message: String,
    },
    /// The full-text expression was rejected by FTS5.
    InvalidSearch {
        query: String,
        message: String,
    },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { query, message } => write!(f, "cannot parse query `{query}`: {message}"),
            Self::UnboundParameter(index) => write!(f, "query parameter ${index} is not bound"),
            Self::InvalidParameter { index, message } => {
                write!(f, "query parameter ${index} is invalid: {message}")
            }
            Self::InvalidRegex { pattern, message } => {
                write!(f, "invalid pattern `{pattern}`: {message}")
            }
            Self::InvalidSearch { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
        }
    }
}

impl Error for QueryError {}
