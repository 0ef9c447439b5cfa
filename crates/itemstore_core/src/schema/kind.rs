//! Kind and attribute definitions.
//!
//! # Responsibility
//! - Describe one class of items: placement in the schema tree, meta-kind,
//!   super-kinds and the `AttrDefs` collection.
//! - Validate candidate values against an attribute definition.
//!
//! # Invariants
//! - A `Kind` owns its `AttrDefs` from construction on.
//! - `AttrDefs` keys are unique across own and inherited definitions; own
//!   definitions shadow nothing because duplicates are rejected at build time.

use crate::model::value::{Value, ValueType};
use crate::schema::{KindId, SchemaError, SchemaResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// How many values one attribute holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    Single,
    List,
    Dict,
}

impl Display for Cardinality {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Single => "single",
            Self::List => "list",
            Self::Dict => "dict",
        };
        f.write_str(label)
    }
}

/// What happens to referenced items when the referencing item is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Only the relation is removed.
    #[default]
    Remove,
    /// Referenced items left without any relation are deleted too.
    Cascade,
}

/// Definition of one attribute in a kind's `AttrDefs`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDef {
    pub name: String,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    pub required: bool,
    /// Returned by reads when no value is stored.
    pub default: Option<Value>,
    /// Kind path that referenced items must be of (reference attributes).
    pub target_kind: Option<String>,
    /// Inverse attribute on the referenced kind (reference attributes).
    pub other_name: Option<String>,
    pub delete_policy: DeletePolicy,
}

impl AttrDef {
    /// Declares a single-valued attribute of `value_type`.
    pub fn value(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            cardinality: Cardinality::Single,
            required: false,
            default: None,
            target_kind: None,
            other_name: None,
            delete_policy: DeletePolicy::Remove,
        }
    }

    /// Declares a single-valued reference to `target_kind` whose inverse is
    /// `other_name` on the target.
    pub fn reference(
        name: impl Into<String>,
        target_kind: impl Into<String>,
        other_name: impl Into<String>,
    ) -> Self {
        Self {
            target_kind: Some(target_kind.into()),
            other_name: Some(other_name.into()),
            ..Self::value(name, ValueType::Ref)
        }
    }

    pub fn list(mut self) -> Self {
        self.cardinality = Cardinality::List;
        self
    }

    pub fn dict(mut self) -> Self {
        self.cardinality = Cardinality::Dict;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn cascade(mut self) -> Self {
        self.delete_policy = DeletePolicy::Cascade;
        self
    }

    pub fn is_reference(&self) -> bool {
        self.value_type == ValueType::Ref
    }

    /// Checks a whole attribute value (honouring cardinality).
    pub fn check_value(&self, value: &Value) -> SchemaResult<()> {
        match (self.cardinality, value) {
            (Cardinality::Single, value) => self.check_element(value),
            (Cardinality::List, Value::List(values)) => {
                values.iter().try_for_each(|value| self.check_element(value))
            }
            (Cardinality::Dict, Value::Dict(values)) => values
                .values()
                .try_for_each(|value| self.check_element(value)),
            (expected, other) => Err(SchemaError::CardinalityMismatch {
                attribute: self.name.clone(),
                expected,
                found: other.type_name(),
            }),
        }
    }

    /// Checks one element of a list/dict attribute (or a single value).
    pub fn check_element(&self, value: &Value) -> SchemaResult<()> {
        if value.conforms_to(self.value_type) {
            return Ok(());
        }
        Err(SchemaError::TypeMismatch {
            attribute: self.name.clone(),
            expected: self.value_type,
            found: value.type_name(),
        })
    }
}

/// The attribute definitions reachable from one kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttrDefs {
    own: BTreeMap<String, AttrDef>,
    inherited: BTreeMap<String, (KindId, AttrDef)>,
}

impl AttrDefs {
    pub fn get(&self, name: &str) -> Option<&AttrDef> {
        self.own
            .get(name)
            .or_else(|| self.inherited.get(name).map(|(_, def)| def))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.own.contains_key(name) || self.inherited.contains_key(name)
    }

    /// Definitions declared on this kind itself.
    pub fn own(&self) -> impl Iterator<Item = &AttrDef> {
        self.own.values()
    }

    /// Every reachable definition, own first, each group sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &AttrDef> {
        self.own
            .values()
            .chain(self.inherited.values().map(|(_, def)| def))
    }

    pub fn len(&self) -> usize {
        self.own.len() + self.inherited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.own.is_empty() && self.inherited.is_empty()
    }

    /// Kind that declared `name`, if it was inherited.
    pub fn inherited_from(&self, name: &str) -> Option<KindId> {
        self.inherited.get(name).map(|(kind, _)| *kind)
    }

    pub(crate) fn insert_own(&mut self, kind_path: &str, def: AttrDef) -> SchemaResult<()> {
        if self.own.contains_key(&def.name) {
            return Err(SchemaError::DuplicateAttribute {
                kind: kind_path.to_string(),
                attribute: def.name,
            });
        }
        self.own.insert(def.name.clone(), def);
        Ok(())
    }

    /// Inherits `def` unless a definition with that name is already reachable.
    pub(crate) fn inherit(&mut self, from: KindId, def: &AttrDef) {
        if !self.contains(&def.name) {
            self.inherited.insert(def.name.clone(), (from, def.clone()));
        }
    }
}

/// Schema descriptor for one class of items.
#[derive(Debug, Clone, PartialEq)]
pub struct Kind {
    id: KindId,
    name: String,
    parent: Option<String>,
    path: String,
    meta_kind: KindId,
    super_kinds: Vec<KindId>,
    ancestors: Vec<KindId>,
    attr_defs: AttrDefs,
}

impl Kind {
    /// Places a kind named `name` under schema `parent` with meta-kind
    /// `meta_kind`. The kind starts with an empty `AttrDefs` collection.
    pub fn new(id: KindId, name: impl Into<String>, parent: Option<&str>, meta_kind: KindId) -> Self {
        let name = name.into();
        let path = match parent {
            Some(parent) => format!("{parent}/{name}"),
            None => name.clone(),
        };
        Self {
            id,
            name,
            parent: parent.map(str::to_string),
            path,
            meta_kind,
            super_kinds: Vec::new(),
            ancestors: Vec::new(),
            attr_defs: AttrDefs::default(),
        }
    }

    pub fn id(&self) -> KindId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema placement, e.g. `pim` for `pim/Event`.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Kind of this kind.
    pub fn meta_kind(&self) -> KindId {
        self.meta_kind
    }

    pub fn super_kinds(&self) -> &[KindId] {
        &self.super_kinds
    }

    /// Transitive super-kinds in resolution order.
    pub fn ancestors(&self) -> &[KindId] {
        &self.ancestors
    }

    pub fn attr_defs(&self) -> &AttrDefs {
        &self.attr_defs
    }

    /// Resolves `name` through own and inherited definitions.
    ///
    /// # Errors
    /// - `SchemaError::UnknownAttribute` when no definition is reachable.
    pub fn get_attr_def(&self, name: &str) -> SchemaResult<&AttrDef> {
        self.attr_defs
            .get(name)
            .ok_or_else(|| SchemaError::UnknownAttribute {
                kind: self.path.clone(),
                attribute: name.to_string(),
            })
    }

    pub fn has_attr_def(&self, name: &str) -> bool {
        self.attr_defs.contains(name)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attr_defs.iter().map(|def| def.name.as_str())
    }

    /// Strict sub-kind test; a kind is not its own sub-kind.
    pub fn is_sub_kind_of(&self, other: KindId) -> bool {
        self.ancestors.contains(&other)
    }

    /// `self` is `other` or one of its sub-kinds.
    pub fn is_kind_of(&self, other: KindId) -> bool {
        self.id == other || self.is_sub_kind_of(other)
    }

    pub(crate) fn attr_defs_mut(&mut self) -> &mut AttrDefs {
        &mut self.attr_defs
    }

    pub(crate) fn set_super_kinds(&mut self, super_kinds: Vec<KindId>) {
        self.super_kinds = super_kinds;
    }

    pub(crate) fn set_ancestors(&mut self, ancestors: Vec<KindId>) {
        self.ancestors = ancestors;
    }
}
