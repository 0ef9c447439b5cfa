//! Two-sided reference upkeep for `RepositoryView`.
//!
//! # Invariants
//! - Every relation change goes through `apply_edge`, which updates the owner
//!   side and the inverse side together.
//! - Planning (loading items, schema and kind checks, displaced members)
//!   finishes before `apply_edge` runs, and `apply_edge` cannot fail.

use crate::model::item::{Item, ItemId};
use crate::repo::{RefError, RepoResult};
use crate::schema::{AttrDef, Cardinality, SchemaError};
use crate::view::repository_view::RepositoryView;
use std::sync::Arc;

/// One relation: `owner.attribute` holds `target`, `target.inverse` holds
/// `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) owner: ItemId,
    pub(crate) attribute: String,
    pub(crate) target: ItemId,
    pub(crate) inverse: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EdgeOp {
    /// Attach, optionally naming the target on the owner side.
    Attach(Option<String>),
    Detach,
}

/// Validated attach: the new edge plus single-valued edges it displaces.
struct AttachPlan {
    edge: Edge,
    displaced: Vec<Edge>,
}

impl RepositoryView {
    /// Adds `target` to `owner.attribute` and `owner` to the inverse.
    ///
    /// Returns `false` when the relation already existed. On a single-valued
    /// side the previous member is detached first.
    ///
    /// # Errors
    /// - `SchemaError::UnknownAttribute` / `SchemaError::NotAReference`.
    /// - `RefError::DanglingReference` when `target` is missing or deleted.
    /// - `RefError::KindMismatch` when `target` is not of the target kind.
    /// - `RefError::MissingInverse` when its kind lacks the inverse.
    pub fn add_ref(&mut self, owner: ItemId, attribute: &str, target: ItemId) -> RepoResult<bool> {
        self.attach(owner, attribute, target, None)
    }

    /// Like `add_ref`, naming `target` by `alias` within `owner.attribute`.
    pub fn add_ref_with_alias(
        &mut self,
        owner: ItemId,
        attribute: &str,
        target: ItemId,
        alias: &str,
    ) -> RepoResult<bool> {
        self.attach(owner, attribute, target, Some(alias.to_string()))
    }

    /// Removes the relation on both sides; `false` if it did not exist.
    pub fn remove_ref(
        &mut self,
        owner: ItemId,
        attribute: &str,
        target: ItemId,
    ) -> RepoResult<bool> {
        self.ensure_open()?;
        let def = self.reference_def(owner, attribute)?;
        if !self.holds(owner, attribute, target) {
            return Ok(false);
        }
        self.load(target)?;
        self.apply_edge(&edge_for(owner, &def, target), EdgeOp::Detach);
        Ok(true)
    }

    pub fn contains_ref(
        &mut self,
        owner: ItemId,
        attribute: &str,
        target: ItemId,
    ) -> RepoResult<bool> {
        self.ensure_open()?;
        self.reference_def(owner, attribute)?;
        Ok(self.holds(owner, attribute, target))
    }

    /// Members of `owner.attribute` in insertion order.
    pub fn refs(&mut self, owner: ItemId, attribute: &str) -> RepoResult<Vec<ItemId>> {
        self.ensure_open()?;
        self.reference_def(owner, attribute)?;
        Ok(self
            .live_item(owner)?
            .refs(attribute)
            .map(|dict| dict.to_vec())
            .unwrap_or_default())
    }

    /// Member of `owner.attribute` registered under `alias`.
    pub fn ref_by_alias(
        &mut self,
        owner: ItemId,
        attribute: &str,
        alias: &str,
    ) -> RepoResult<Option<ItemId>> {
        self.ensure_open()?;
        self.reference_def(owner, attribute)?;
        Ok(self
            .live_item(owner)?
            .refs(attribute)
            .and_then(|dict| dict.get_by_alias(alias)))
    }

    /// Points a single-valued reference at `target`, or clears it.
    pub fn set_ref(
        &mut self,
        owner: ItemId,
        attribute: &str,
        target: Option<ItemId>,
    ) -> RepoResult<()> {
        self.ensure_open()?;
        let def = self.reference_def(owner, attribute)?;
        if def.cardinality != Cardinality::Single {
            return Err(SchemaError::CardinalityMismatch {
                attribute: def.name,
                expected: def.cardinality,
                found: "single value",
            }
            .into());
        }
        match target {
            Some(target) => self.attach(owner, attribute, target, None).map(|_| ()),
            None => self.clear_refs(owner, attribute).map(|_| ()),
        }
    }

    /// Detaches every member of `owner.attribute`; returns how many.
    pub fn clear_refs(&mut self, owner: ItemId, attribute: &str) -> RepoResult<usize> {
        self.ensure_open()?;
        let def = self.reference_def(owner, attribute)?;
        let members = self
            .live_item(owner)?
            .refs(attribute)
            .map(|dict| dict.to_vec())
            .unwrap_or_default();
        for member in &members {
            self.load(*member)?;
        }
        for member in &members {
            self.apply_edge(&edge_for(owner, &def, *member), EdgeOp::Detach);
        }
        Ok(members.len())
    }

    fn attach(
        &mut self,
        owner: ItemId,
        attribute: &str,
        target: ItemId,
        alias: Option<String>,
    ) -> RepoResult<bool> {
        self.ensure_open()?;
        let plan = self.plan_attach(owner, attribute, target)?;
        let existed = self.holds(owner, attribute, target);
        if existed && alias.is_none() {
            return Ok(false);
        }
        for displaced in &plan.displaced {
            self.apply_edge(displaced, EdgeOp::Detach);
        }
        self.apply_edge(&plan.edge, EdgeOp::Attach(alias));
        Ok(!existed)
    }

    fn plan_attach(
        &mut self,
        owner: ItemId,
        attribute: &str,
        target: ItemId,
    ) -> RepoResult<AttachPlan> {
        let def = self.reference_def(owner, attribute)?;
        if !self.load(target)? {
            return Err(RefError::DanglingReference {
                owner,
                attribute: attribute.to_string(),
                target,
            }
            .into());
        }

        let schema = Arc::clone(self.schema());
        let target_item = self.live_item(target)?;
        let target_kind = schema.kind(target_item.kind());
        let expected = def.target_kind.as_deref().unwrap_or_default();
        if !target_kind.is_kind_of(schema.kind_id(expected)?) {
            return Err(RefError::KindMismatch {
                attribute: attribute.to_string(),
                expected: expected.to_string(),
                found: target_kind.path().to_string(),
            }
            .into());
        }
        let edge = edge_for(owner, &def, target);
        let inverse_def = target_kind
            .attr_defs()
            .get(&edge.inverse)
            .filter(|inverse| inverse.is_reference())
            .ok_or_else(|| RefError::MissingInverse {
                kind: target_kind.path().to_string(),
                attribute: attribute.to_string(),
                other_name: edge.inverse.clone(),
            })?;
        let displaced_owner = if inverse_def.cardinality == Cardinality::Single {
            target_item
                .refs(&edge.inverse)
                .and_then(|dict| dict.first())
                .filter(|current| *current != owner)
        } else {
            None
        };

        let mut displaced = Vec::new();
        if def.cardinality == Cardinality::Single {
            let current = self
                .live_item(owner)?
                .refs(attribute)
                .and_then(|dict| dict.first())
                .filter(|current| *current != target);
            if let Some(current) = current {
                self.load(current)?;
                displaced.push(edge_for(owner, &def, current));
            }
        }
        if let Some(current) = displaced_owner {
            self.load(current)?;
            displaced.push(Edge {
                owner: current,
                ..edge.clone()
            });
        }

        Ok(AttachPlan { edge, displaced })
    }

    /// Applies one relation change to both sides. Items that are not cached
    /// and live are skipped.
    pub(crate) fn apply_edge(&mut self, edge: &Edge, op: EdgeOp) {
        match op {
            EdgeOp::Attach(alias) => {
                if let Some(owner) = self.live_cached_mut(edge.owner) {
                    owner.attach_ref(&edge.attribute, &edge.inverse, edge.target, alias);
                }
                if let Some(target) = self.live_cached_mut(edge.target) {
                    target.attach_ref(&edge.inverse, &edge.attribute, edge.owner, None);
                }
            }
            EdgeOp::Detach => {
                if let Some(owner) = self.live_cached_mut(edge.owner) {
                    owner.detach_ref(&edge.attribute, edge.target);
                }
                if let Some(target) = self.live_cached_mut(edge.target) {
                    target.detach_ref(&edge.inverse, edge.owner);
                }
            }
        }
    }

    fn live_cached_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id).filter(|item| !item.is_deleted())
    }

    fn holds(&self, owner: ItemId, attribute: &str, target: ItemId) -> bool {
        self.items
            .get(&owner)
            .and_then(|item| item.refs(attribute))
            .is_some_and(|dict| dict.contains(target))
    }

    /// Reference definition of `attribute` on the live item `owner`.
    fn reference_def(&mut self, owner: ItemId, attribute: &str) -> RepoResult<AttrDef> {
        let kind = self.live_item(owner)?.kind();
        let kind = self.schema().kind(kind);
        let def = kind.get_attr_def(attribute)?;
        if !def.is_reference() {
            return Err(SchemaError::NotAReference {
                kind: kind.path().to_string(),
                attribute: attribute.to_string(),
            }
            .into());
        }
        Ok(def.clone())
    }
}

fn edge_for(owner: ItemId, def: &AttrDef, target: ItemId) -> Edge {
    Edge {
        owner,
        attribute: def.name.clone(),
        target,
        inverse: def.other_name.clone().unwrap_or_default(),
    }
}
