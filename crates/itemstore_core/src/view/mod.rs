//! Views: isolated working contexts over the repository.
//!
//! # Responsibility
//! - Cache items loaded at the view's version and hold uncommitted changes.
//! - Keep names, indexes and reference collections consistent on every
//!   mutation.
//! - Recycle views through `ViewPool`.
//!
//! # Invariants
//! - Every operation on a closed view fails with `ViewError::Closed`.
//! - Changes made in one view are invisible to others until commit and
//!   refresh.

use crate::model::item::ItemId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod index;
pub mod pool;
mod relations;
mod repository_view;

pub use index::Index;
pub use pool::{PooledView, ViewPool};
pub use repository_view::RepositoryView;

/// View state and item placement errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    Closed(String),
    ItemNotFound(ItemId),
    /// `parent` (`None` = roots) already has a child with this name.
    DuplicateName {
        parent: Option<ItemId>,
        name: String,
    },
    InvalidName(String),
    /// Non-recursive delete of an item that has children.
    HasChildren(ItemId),
    MoveIntoDescendant {
        item: ItemId,
        target: ItemId,
    },
    UnknownIndex(String),
    /// Membership of a kind-bound index is maintained by the view alone.
    ManagedIndex(String),
    /// Items changed by another commit while this view holds changes on them.
    VersionConflict {
        view: String,
        items: Vec<ItemId>,
    },
}

impl Display for ViewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(view) => write!(f, "view `{view}` is closed"),
            Self::ItemNotFound(id) => write!(f, "item not found: {id}"),
            Self::DuplicateName { parent, name } => match parent {
                Some(parent) => write!(f, "item {parent} already has a child named `{name}`"),
                None => write!(f, "a root item named `{name}` already exists"),
            },
            Self::InvalidName(name) => write!(f, "invalid item name `{name}`"),
            Self::HasChildren(id) => {
                write!(f, "item {id} has children; delete it recursively")
            }
            Self::MoveIntoDescendant { item, target } => {
                write!(f, "cannot move item {item} under its descendant {target}")
            }
            Self::UnknownIndex(name) => write!(f, "unknown index `{name}`"),
            Self::ManagedIndex(name) => {
                write!(f, "index `{name}` is maintained for its kind")
            }
            Self::VersionConflict { view, items } => write!(
                f,
                "view `{view}` conflicts with newer commits on {} item(s)",
                items.len()
            ),
        }
    }
}

impl Error for ViewError {}
