//! Schema builder and the resolved, immutable schema registry.
//!
//! # Responsibility
//! - Collect kind/attribute/index declarations.
//! - Resolve super-kinds, flatten inherited attributes and validate every
//!   reference/inverse pair in `SchemaBuilder::build`.
//!
//! # Invariants
//! - `core/Item` is the root super-kind; `core/Kind` is the meta-kind of
//!   every kind, itself included.
//! - Every reference attribute's inverse exists on the target kind and
//!   points back at the declaring kind's attribute.

use crate::model::value::ValueType;
use crate::schema::kind::{AttrDef, Cardinality, Kind};
use crate::schema::{is_valid_identifier, KindId, SchemaError, SchemaResult};
use std::collections::{BTreeMap, HashMap};

/// Root super-kind of every item kind.
pub const ITEM_KIND_PATH: &str = "core/Item";
/// Meta-kind shared by all kinds.
pub const KIND_KIND_PATH: &str = "core/Kind";

/// Declared index: a named membership set, optionally maintained for a kind
/// and ordered by one of its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    /// Items of this kind are added on creation by the owning view.
    pub kind: Option<String>,
    /// Whether sub-kinds of `kind` are covered too.
    pub recursive: bool,
    /// Single-valued attribute of `kind` ordering the members.
    pub attribute: Option<String>,
    pub descending: bool,
    kind_id: Option<KindId>,
}

impl IndexDef {
    /// Index whose membership is managed explicitly by callers.
    pub fn manual(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            recursive: false,
            attribute: None,
            descending: false,
            kind_id: None,
        }
    }

    /// Index maintained for every item of `kind` and its sub-kinds.
    pub fn for_kind(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
            recursive: true,
            attribute: None,
            descending: false,
            kind_id: None,
        }
    }

    /// Kind-bound index ordered by `attribute` of that kind.
    pub fn by_attribute(
        name: impl Into<String>,
        kind: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..Self::for_kind(name, kind)
        }
    }

    /// Reverses the attribute order.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Restricts a kind-bound index to exactly its kind.
    pub fn exact(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Resolved kind binding; set once the schema is built.
    pub fn kind_id(&self) -> Option<KindId> {
        self.kind_id
    }
}

#[derive(Debug, Clone)]
struct KindDecl {
    path: String,
    super_kinds: Vec<String>,
    attributes: Vec<AttrDef>,
}

/// Collects declarations; `build` validates and resolves them.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    kinds: Vec<KindDecl>,
    indexes: Vec<IndexDef>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// Starts from the core bootstrap kinds.
    pub fn new() -> Self {
        Self {
            kinds: vec![
                KindDecl {
                    path: ITEM_KIND_PATH.to_string(),
                    super_kinds: Vec::new(),
                    attributes: Vec::new(),
                },
                KindDecl {
                    path: KIND_KIND_PATH.to_string(),
                    super_kinds: vec![ITEM_KIND_PATH.to_string()],
                    attributes: Vec::new(),
                },
            ],
            indexes: Vec::new(),
        }
    }

    /// Declares a kind. An empty `super_kinds` list means `core/Item`.
    pub fn kind(mut self, path: &str, super_kinds: &[&str], attributes: Vec<AttrDef>) -> Self {
        let super_kinds = if super_kinds.is_empty() {
            vec![ITEM_KIND_PATH.to_string()]
        } else {
            super_kinds.iter().map(|kind| kind.to_string()).collect()
        };
        self.kinds.push(KindDecl {
            path: path.to_string(),
            super_kinds,
            attributes,
        });
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Resolves all declarations into an immutable schema.
    ///
    /// # Errors
    /// - Invalid or duplicate names, unknown super-kinds, inheritance cycles.
    /// - Reference attributes without a valid target kind or inverse.
    /// - Defaults that do not fit their attribute definition.
    /// - Indexes bound to unknown kinds, or declared twice.
    pub fn build(self) -> SchemaResult<Schema> {
        let kind_kind = KindId(1);
        let mut kinds = Vec::with_capacity(self.kinds.len());
        let mut by_path = HashMap::new();

        for (position, decl) in self.kinds.iter().enumerate() {
            let (parent, name) = split_kind_path(&decl.path)?;
            let id = KindId(position as u32);
            if by_path.insert(decl.path.clone(), id).is_some() {
                return Err(SchemaError::DuplicateKind(decl.path.clone()));
            }

            let mut kind = Kind::new(id, name, parent, kind_kind);
            for attribute in &decl.attributes {
                validate_attr_decl(&decl.path, attribute)?;
                kind.attr_defs_mut()
                    .insert_own(&decl.path, attribute.clone())?;
            }
            kinds.push(kind);
        }

        for (position, decl) in self.kinds.iter().enumerate() {
            let mut super_ids = Vec::with_capacity(decl.super_kinds.len());
            for super_kind in &decl.super_kinds {
                let super_id =
                    by_path
                        .get(super_kind)
                        .copied()
                        .ok_or_else(|| SchemaError::UnknownSuperKind {
                            kind: decl.path.clone(),
                            super_kind: super_kind.clone(),
                        })?;
                super_ids.push(super_id);
            }
            kinds[position].set_super_kinds(super_ids);
        }

        for position in 0..kinds.len() {
            let ancestors = resolve_ancestors(&kinds, KindId(position as u32))?;
            let inherited: Vec<(KindId, AttrDef)> = ancestors
                .iter()
                .flat_map(|ancestor| {
                    kinds[ancestor.index()]
                        .attr_defs()
                        .own()
                        .map(move |def| (*ancestor, def.clone()))
                })
                .collect();
            let kind = &mut kinds[position];
            for (from, def) in &inherited {
                kind.attr_defs_mut().inherit(*from, def);
            }
            kind.set_ancestors(ancestors);
        }

        let mut schema = Schema {
            kinds,
            by_path,
            indexes: BTreeMap::new(),
        };

        for kind in &schema.kinds {
            for def in kind.attr_defs().own() {
                if def.is_reference() {
                    schema.validate_reference(kind, def)?;
                }
            }
        }

        for mut index in self.indexes {
            if !is_valid_index_name(&index.name) {
                return Err(SchemaError::InvalidName(index.name));
            }
            if let Some(path) = index.kind.as_deref() {
                index.kind_id = Some(schema.kind_id(path)?);
            }
            schema.validate_index_attribute(&index)?;
            if schema.indexes.contains_key(&index.name) {
                return Err(SchemaError::DuplicateIndex(index.name));
            }
            schema.indexes.insert(index.name.clone(), index);
        }

        Ok(schema)
    }
}

/// Resolved schema: interned kinds plus index declarations.
#[derive(Debug, Clone)]
pub struct Schema {
    kinds: Vec<Kind>,
    by_path: HashMap<String, KindId>,
    indexes: BTreeMap<String, IndexDef>,
}

impl Schema {
    /// Schema holding only the core bootstrap kinds.
    pub fn core() -> SchemaResult<Self> {
        SchemaBuilder::new().build()
    }

    /// Returns the kind for an id minted by this schema.
    ///
    /// Ids are only produced by this schema, so the lookup cannot miss for
    /// ids obtained from it or from items loaded through it.
    pub fn kind(&self, id: KindId) -> &Kind {
        &self.kinds[id.index()]
    }

    pub fn kind_id(&self, path: &str) -> SchemaResult<KindId> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| SchemaError::UnknownKind(path.to_string()))
    }

    pub fn kind_by_path(&self, path: &str) -> SchemaResult<&Kind> {
        self.kind_id(path).map(|id| self.kind(id))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.kinds.iter()
    }

    /// `kind` is `ancestor` or inherits from it.
    pub fn is_kind_of(&self, kind: KindId, ancestor: KindId) -> bool {
        self.kind(kind).is_kind_of(ancestor)
    }

    /// `kind` itself, plus every kind inheriting from it when `recursive`.
    pub fn kinds_covered_by(&self, kind: KindId, recursive: bool) -> Vec<KindId> {
        if !recursive {
            return vec![kind];
        }
        self.kinds
            .iter()
            .filter(|candidate| candidate.is_kind_of(kind))
            .map(Kind::id)
            .collect()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.get(name)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.values()
    }

    /// Kind-bound indexes that a new item of `kind` must join.
    pub fn indexes_for_kind(&self, kind: KindId) -> impl Iterator<Item = &IndexDef> + '_ {
        self.indexes.values().filter(move |index| match index.kind_id {
            Some(bound) if index.recursive => self.is_kind_of(kind, bound),
            Some(bound) => bound == kind,
            None => false,
        })
    }

    /// Index holding exactly the items a kind scan over `kind` would find.
    ///
    /// Unordered indexes win over attribute-ordered ones; ties go to the
    /// first name.
    pub fn index_covering(&self, kind: KindId, recursive: bool) -> Option<&IndexDef> {
        let mut covering = self.indexes_covering(kind, recursive);
        let first = covering.next()?;
        if first.attribute.is_none() {
            return Some(first);
        }
        covering
            .find(|index| index.attribute.is_none())
            .or(Some(first))
    }

    /// Attribute-ordered indexes covering a kind scan over `kind`, by name.
    pub fn attribute_indexes_covering(
        &self,
        kind: KindId,
        recursive: bool,
    ) -> impl Iterator<Item = &IndexDef> + '_ {
        self.indexes_covering(kind, recursive)
            .filter(|index| index.attribute.is_some())
    }

    fn indexes_covering(
        &self,
        kind: KindId,
        recursive: bool,
    ) -> impl Iterator<Item = &IndexDef> + '_ {
        let has_sub_kinds = self
            .kinds
            .iter()
            .any(|candidate| candidate.is_sub_kind_of(kind));
        self.indexes.values().filter(move |index| {
            index.kind_id == Some(kind) && (index.recursive == recursive || !has_sub_kinds)
        })
    }

    /// An ordering attribute must be a single value attribute of the bound
    /// kind.
    fn validate_index_attribute(&self, index: &IndexDef) -> SchemaResult<()> {
        let Some(attribute) = index.attribute.as_deref() else {
            return Ok(());
        };
        let Some(kind) = index.kind_id else {
            return Err(SchemaError::InvalidIndex {
                index: index.name.clone(),
                message: format!("ordering by `{attribute}` needs a kind binding"),
            });
        };
        let kind = self.kind(kind);
        let def = kind.get_attr_def(attribute)?;
        if def.is_reference() {
            return Err(SchemaError::NotAValue {
                kind: kind.path().to_string(),
                attribute: attribute.to_string(),
            });
        }
        if def.cardinality != Cardinality::Single {
            return Err(SchemaError::InvalidIndex {
                index: index.name.clone(),
                message: format!("`{attribute}` holds a {} value", def.cardinality),
            });
        }
        Ok(())
    }

    fn validate_reference(&self, kind: &Kind, def: &AttrDef) -> SchemaResult<()> {
        let mismatch = |message: String| SchemaError::InverseMismatch {
            kind: kind.path().to_string(),
            attribute: def.name.clone(),
            message,
        };

        let target_path = def
            .target_kind
            .as_deref()
            .ok_or_else(|| mismatch("reference declares no target kind".to_string()))?;
        let other_name = def
            .other_name
            .as_deref()
            .ok_or_else(|| mismatch("reference declares no inverse attribute".to_string()))?;
        let target = self.kind_by_path(target_path)?;

        let inverse = target.get_attr_def(other_name).map_err(|_| {
            mismatch(format!(
                "target kind `{target_path}` has no attribute `{other_name}`"
            ))
        })?;
        if !inverse.is_reference() {
            return Err(mismatch(format!(
                "`{target_path}.{other_name}` is not a reference"
            )));
        }
        if inverse.other_name.as_deref() != Some(def.name.as_str()) {
            return Err(mismatch(format!(
                "`{target_path}.{other_name}` does not name `{}` as its inverse",
                def.name
            )));
        }
        let back_target = inverse
            .target_kind
            .as_deref()
            .map(|path| self.kind_id(path))
            .transpose()?;
        match back_target {
            Some(back) if kind.is_kind_of(back) => Ok(()),
            _ => Err(mismatch(format!(
                "`{target_path}.{other_name}` does not target `{}`",
                kind.path()
            ))),
        }
    }
}

fn split_kind_path(path: &str) -> SchemaResult<(Option<&str>, &str)> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|segment| !is_valid_identifier(segment)) {
        return Err(SchemaError::InvalidName(path.to_string()));
    }
    match path.rsplit_once('/') {
        Some((parent, name)) => Ok((Some(parent), name)),
        None => Ok((None, path)),
    }
}

fn is_valid_index_name(name: &str) -> bool {
    name.split('.').all(is_valid_identifier)
}

fn validate_attr_decl(kind_path: &str, def: &AttrDef) -> SchemaResult<()> {
    if !is_valid_identifier(&def.name) {
        return Err(SchemaError::InvalidName(format!("{kind_path}.{}", def.name)));
    }
    let invalid = |message: &str| SchemaError::InvalidAttribute {
        kind: kind_path.to_string(),
        attribute: def.name.clone(),
        message: message.to_string(),
    };

    if def.value_type == ValueType::Ref {
        if def.cardinality == Cardinality::Dict {
            return Err(invalid("references support single or list cardinality"));
        }
        if def.default.is_some() {
            return Err(invalid("references cannot declare a default value"));
        }
        return Ok(());
    }

    if def.target_kind.is_some() || def.other_name.is_some() {
        return Err(invalid("only references declare a target kind or inverse"));
    }
    if let Some(default) = def.default.as_ref() {
        def.check_value(default)?;
    }
    Ok(())
}

/// Depth-first, declaration-ordered transitive super-kinds of `start`.
fn resolve_ancestors(kinds: &[Kind], start: KindId) -> SchemaResult<Vec<KindId>> {
    let mut ancestors = Vec::new();
    let mut trail = vec![start];
    collect_ancestors(kinds, start, &mut trail, &mut ancestors)?;
    Ok(ancestors)
}

fn collect_ancestors(
    kinds: &[Kind],
    current: KindId,
    trail: &mut Vec<KindId>,
    ancestors: &mut Vec<KindId>,
) -> SchemaResult<()> {
    for super_kind in kinds[current.index()].super_kinds() {
        if trail.contains(super_kind) {
            return Err(SchemaError::InheritanceCycle(
                kinds[trail[0].index()].path().to_string(),
            ));
        }
        if !ancestors.contains(super_kind) {
            ancestors.push(*super_kind);
        }
        trail.push(*super_kind);
        collect_ancestors(kinds, *super_kind, trail, ancestors)?;
        trail.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{IndexDef, SchemaBuilder, ITEM_KIND_PATH, KIND_KIND_PATH};
    use crate::model::value::ValueType;
    use crate::schema::{AttrDef, SchemaError};

    fn contact_event_builder() -> SchemaBuilder {
        SchemaBuilder::new()
            .kind(
                "pim/Contact",
                &[],
                vec![
                    AttrDef::value("email", ValueType::String),
                    AttrDef::reference("events", "pim/Event", "attendees").list(),
                ],
            )
            .kind(
                "pim/Event",
                &[],
                vec![
                    AttrDef::value("title", ValueType::String).required(),
                    AttrDef::reference("attendees", "pim/Contact", "events").list(),
                ],
            )
    }

    #[test]
    fn core_kinds_are_self_describing() {
        let schema = SchemaBuilder::new().build().unwrap();
        let kind_kind = schema.kind_by_path(KIND_KIND_PATH).unwrap();
        assert_eq!(kind_kind.meta_kind(), kind_kind.id());
        assert!(kind_kind.is_sub_kind_of(schema.kind_id(ITEM_KIND_PATH).unwrap()));
    }

    #[test]
    fn inherited_attributes_resolve_through_super_kinds() {
        let schema = contact_event_builder()
            .kind(
                "pim/Meeting",
                &["pim/Event"],
                vec![AttrDef::value("room", ValueType::String)],
            )
            .build()
            .unwrap();

        let meeting = schema.kind_by_path("pim/Meeting").unwrap();
        let event = schema.kind_id("pim/Event").unwrap();
        assert!(meeting.get_attr_def("title").unwrap().required);
        assert_eq!(meeting.attr_defs().inherited_from("title"), Some(event));
        assert!(meeting.is_sub_kind_of(event));
        assert!(meeting.get_attr_def("location").is_err());
    }

    #[test]
    fn inheritance_cycles_are_rejected() {
        let err = SchemaBuilder::new()
            .kind("a/A", &["a/B"], vec![])
            .kind("a/B", &["a/A"], vec![])
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InheritanceCycle(_)));
    }

    #[test]
    fn reference_without_matching_inverse_is_rejected() {
        let err = SchemaBuilder::new()
            .kind("pim/Contact", &[], vec![])
            .kind(
                "pim/Event",
                &[],
                vec![AttrDef::reference("attendees", "pim/Contact", "events").list()],
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InverseMismatch { .. }));
    }

    #[test]
    fn index_covering_prefers_kind_bound_indexes() {
        let schema = contact_event_builder()
            .index(IndexDef::for_kind("events", "pim/Event"))
            .index(IndexDef::manual("starred"))
            .build()
            .unwrap();
        let event = schema.kind_id("pim/Event").unwrap();
        let contact = schema.kind_id("pim/Contact").unwrap();

        assert_eq!(
            schema.index_covering(event, true).map(|index| index.name.as_str()),
            Some("events")
        );
        assert!(schema.index_covering(contact, true).is_none());
        assert_eq!(schema.indexes_for_kind(event).count(), 1);
    }

    #[test]
    fn index_covering_ties_resolve_by_name_and_skip_ordered_indexes() {
        let schema = contact_event_builder()
            .index(IndexDef::by_attribute("agenda", "pim/Event", "title"))
            .index(IndexDef::for_kind("events_b", "pim/Event"))
            .index(IndexDef::for_kind("events_a", "pim/Event"))
            .build()
            .unwrap();
        let event = schema.kind_id("pim/Event").unwrap();

        assert_eq!(
            schema.index_covering(event, true).map(|index| index.name.as_str()),
            Some("events_a")
        );
        let ordered: Vec<&str> = schema
            .attribute_indexes_covering(event, true)
            .map(|index| index.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["agenda"]);
    }

    #[test]
    fn ordering_attribute_must_be_a_single_value() {
        let unbound = contact_event_builder()
            .index(IndexDef {
                attribute: Some("title".to_string()),
                ..IndexDef::manual("loose")
            })
            .build()
            .unwrap_err();
        assert!(matches!(unbound, SchemaError::InvalidIndex { .. }));

        let reference = contact_event_builder()
            .index(IndexDef::by_attribute("by_attendee", "pim/Event", "attendees"))
            .build()
            .unwrap_err();
        assert!(matches!(reference, SchemaError::NotAValue { .. }));

        let missing = contact_event_builder()
            .index(IndexDef::by_attribute("by_room", "pim/Event", "room"))
            .build()
            .unwrap_err();
        assert!(matches!(missing, SchemaError::UnknownAttribute { .. }));

        let list = SchemaBuilder::new()
            .kind(
                "pim/Note",
                &[],
                vec![AttrDef::value("tags", ValueType::String).list()],
            )
            .index(IndexDef::by_attribute("by_tag", "pim/Note", "tags"))
            .build()
            .unwrap_err();
        assert!(matches!(list, SchemaError::InvalidIndex { .. }));
    }

    #[test]
    fn duplicate_kind_and_unknown_index_kind_fail() {
        let duplicate = SchemaBuilder::new()
            .kind("pim/Note", &[], vec![])
            .kind("pim/Note", &[], vec![])
            .build()
            .unwrap_err();
        assert_eq!(duplicate, SchemaError::DuplicateKind("pim/Note".to_string()));

        let unknown = SchemaBuilder::new()
            .index(IndexDef::for_kind("events", "pim/Event"))
            .build()
            .unwrap_err();
        assert_eq!(unknown, SchemaError::UnknownKind("pim/Event".to_string()));
    }
}
