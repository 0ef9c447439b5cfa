//! Bidirectional reference collection owned by one item attribute.
//!
//! # Responsibility
//! - Hold the ordered member set of one reference attribute.
//! - Remember the inverse attribute name so the view can update the other
//!   side of every relation through a single code path.
//!
//! # Invariants
//! - Members are unique; insertion order is preserved.
//! - An alias names at most one member and is dropped with that member.
//! - Only the owning view mutates a `RefDict`; callers read it.

use crate::model::item::ItemId;
use std::collections::{BTreeMap, HashSet};

/// Named reference collection between one owner item and its referents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefDict {
    owner: ItemId,
    name: String,
    other_name: String,
    members: Vec<ItemId>,
    lookup: HashSet<ItemId>,
    aliases: BTreeMap<String, ItemId>,
}

impl RefDict {
    /// Creates an empty collection bound to `owner.name` with inverse
    /// attribute `other_name` on the referenced items.
    pub fn new(owner: ItemId, name: impl Into<String>, other_name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
            other_name: other_name.into(),
            members: Vec::new(),
            lookup: HashSet::new(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> ItemId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute on the referenced items that points back at the owner.
    pub fn other_name(&self) -> &str {
        &self.other_name
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.lookup.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn first(&self) -> Option<ItemId> {
        self.members.first().copied()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.members.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<ItemId> {
        self.members.clone()
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<ItemId> {
        self.aliases.get(alias).copied()
    }

    pub fn alias_of(&self, id: ItemId) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, member)| **member == id)
            .map(|(alias, _)| alias.as_str())
    }

    /// Inserts `id`; returns `false` when it was already a member.
    ///
    /// An alias already naming another member is moved to `id`.
    pub(crate) fn insert(&mut self, id: ItemId, alias: Option<String>) -> bool {
        let inserted = self.lookup.insert(id);
        if inserted {
            self.members.push(id);
        }
        if let Some(alias) = alias {
            self.aliases.retain(|_, member| *member != id);
            self.aliases.insert(alias, id);
        }
        inserted
    }

    /// Removes `id`; returns `false` when it was not a member.
    pub(crate) fn remove(&mut self, id: ItemId) -> bool {
        if !self.lookup.remove(&id) {
            return false;
        }
        self.members.retain(|member| *member != id);
        self.aliases.retain(|_, member| *member != id);
        true
    }
}
