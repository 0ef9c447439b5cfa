//! Named membership sets over items.
//!
//! # Invariants
//! - Set semantics: adding a member twice keeps one entry.
//! - Membership tests are hashed lookups.
//! - `pending` holds exactly the members whose state differs from the
//!   committed base the view last loaded, committed or rebased onto.
//! - An index ordered by an attribute caches its sort keys; any membership
//!   change drops the cache.

use crate::model::item::ItemId;
use crate::model::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Sort key of one member: its attribute value (or default), then its id.
pub(crate) type IndexKey = (Option<Value>, ItemId);

/// One index as seen by a view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Index {
    name: String,
    members: HashSet<ItemId>,
    pending: BTreeMap<ItemId, bool>,
    attribute: Option<String>,
    descending: bool,
    order: Option<Vec<IndexKey>>,
}

impl Index {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Index holding committed `members`, with nothing pending.
    pub(crate) fn loaded(name: impl Into<String>, members: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            members: members.into_iter().collect(),
            ..Self::new(name)
        }
    }

    /// Orders members by `attribute` instead of by id.
    pub(crate) fn ordered_by(mut self, attribute: impl Into<String>, descending: bool) -> Self {
        self.attribute = Some(attribute.into());
        self.descending = descending;
        self.order = None;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute the members are ordered by, if any.
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// Adds `id`; returns `false` if it already was a member.
    pub fn add_item(&mut self, id: ItemId) -> bool {
        let added = self.members.insert(id);
        if added {
            self.order = None;
            if self.pending.remove(&id).is_none() {
                self.pending.insert(id, true);
            }
        }
        added
    }

    /// Removes `id`; a non-member is left alone and `false` is returned.
    pub fn remove_item(&mut self, id: ItemId) -> bool {
        let removed = self.members.remove(&id);
        if removed {
            self.order = None;
            if self.pending.remove(&id).is_none() {
                self.pending.insert(id, false);
            }
        }
        removed
    }

    pub fn has_item(&self, id: ItemId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in id order.
    pub fn members(&self) -> Vec<ItemId> {
        let mut members: Vec<ItemId> = self.members.iter().copied().collect();
        members.sort_unstable();
        members
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = (ItemId, bool)> + '_ {
        self.pending.iter().map(|(id, member)| (*id, *member))
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Replaces the committed base with `members` and replays pending changes.
    ///
    /// Pending entries the new base already agrees with are dropped.
    pub(crate) fn rebase(&mut self, members: impl IntoIterator<Item = ItemId>) {
        let base: HashSet<ItemId> = members.into_iter().collect();
        self.pending
            .retain(|id, member| *member != base.contains(id));
        self.members = base;
        for (id, member) in &self.pending {
            if *member {
                self.members.insert(*id);
            } else {
                self.members.remove(id);
            }
        }
        self.order = None;
    }

    /// Whether members still need sort keys before positional access.
    pub(crate) fn needs_order(&self) -> bool {
        self.attribute.is_some() && self.order.is_none()
    }

    pub(crate) fn set_order(&mut self, mut keys: Vec<IndexKey>) {
        keys.sort_by(key_cmp);
        self.order = Some(keys);
    }

    pub(crate) fn invalidate_order(&mut self) {
        self.order = None;
    }

    /// Members in index order; `None` while sort keys are missing.
    pub(crate) fn ordered(&self) -> Option<Vec<ItemId>> {
        if self.attribute.is_none() {
            return Some(self.members());
        }
        let mut ids: Vec<ItemId> = self.order.as_ref()?.iter().map(|(_, id)| *id).collect();
        if self.descending {
            ids.reverse();
        }
        Some(ids)
    }

    /// Members whose key lies within every inclusive bound, in index order.
    ///
    /// Without an upper bound, members lacking a value are left out.
    pub(crate) fn key_range(&self, lower: &[Value], upper: &[Value]) -> Option<Vec<ItemId>> {
        let keys = self.order.as_ref()?;
        let start = lower
            .iter()
            .map(|bound| keys.partition_point(|(key, _)| bound_cmp(key, bound) == Ordering::Less))
            .max()
            .unwrap_or(0);
        let end = upper
            .iter()
            .map(|bound| {
                keys.partition_point(|(key, _)| bound_cmp(key, bound) != Ordering::Greater)
            })
            .min()
            .unwrap_or_else(|| keys.partition_point(|(key, _)| key.is_some()));

        let mut ids: Vec<ItemId> = if start < end {
            keys[start..end].iter().map(|(_, id)| *id).collect()
        } else {
            Vec::new()
        };
        if self.descending {
            ids.reverse();
        }
        Some(ids)
    }
}

/// Missing values sort after every value; ties fall back to the id.
fn key_cmp(a: &IndexKey, b: &IndexKey) -> Ordering {
    let by_value = match (&a.0, &b.0) {
        (Some(left), Some(right)) => left.sort_cmp(right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_value.then_with(|| a.1.cmp(&b.1))
}

fn bound_cmp(key: &Option<Value>, bound: &Value) -> Ordering {
    key.as_ref()
        .map_or(Ordering::Greater, |key| key.sort_cmp(bound))
}
