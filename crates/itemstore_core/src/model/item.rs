//! Item domain model.
//!
//! # Responsibility
//! - Define the persistent entity shared by every kind (contact, note, event,
//!   mail): identity, placement, kind, values and reference collections.
//! - Track per-view lifecycle state (new, clean, dirty, deleted).
//!
//! # Invariants
//! - `id` is stable and never reused for another item.
//! - `kind` is fixed at creation time.
//! - Items are mutated only through the owning `RepositoryView`, which keeps
//!   names unique per parent and reference collections two-sided.

use crate::model::ref_dict::RefDict;
use crate::model::value::Value;
use crate::schema::KindId;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stable identifier of an item.
pub type ItemId = Uuid;

/// Committed repository version. `0` is the empty repository.
pub type Version = u64;

/// Lifecycle of an item inside one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Created in this view, never committed.
    New,
    /// Matches the committed row the view loaded.
    Clean,
    /// Committed before, changed in this view.
    Dirty,
    /// Committed before, deleted in this view.
    Deleted,
}

/// One persistent domain object as seen by a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    id: ItemId,
    name: String,
    parent: Option<ItemId>,
    kind: KindId,
    values: BTreeMap<String, Value>,
    refs: BTreeMap<String, RefDict>,
    version: Version,
    status: ItemStatus,
}

impl Item {
    pub(crate) fn new(id: ItemId, kind: KindId, parent: Option<ItemId>, name: String) -> Self {
        Self {
            id,
            name,
            parent,
            kind,
            values: BTreeMap::new(),
            refs: BTreeMap::new(),
            version: 0,
            status: ItemStatus::New,
        }
    }

    pub(crate) fn from_committed(
        id: ItemId,
        kind: KindId,
        parent: Option<ItemId>,
        name: String,
        values: BTreeMap<String, Value>,
        refs: BTreeMap<String, RefDict>,
        version: Version,
    ) -> Self {
        Self {
            id,
            name,
            parent,
            kind,
            values,
            refs,
            version,
            status: ItemStatus::Clean,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent item; `None` for repository roots.
    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn kind(&self) -> KindId {
        self.kind
    }

    /// Version of the committed row this item was loaded from (`0` if new).
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn is_new(&self) -> bool {
        self.status == ItemStatus::New
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ItemStatus::Deleted
    }

    /// Whether this item carries changes that `commit` would write.
    pub fn is_pending(&self) -> bool {
        self.status != ItemStatus::Clean
    }

    /// Raw stored value, without schema defaults.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn refs(&self, name: &str) -> Option<&RefDict> {
        self.refs.get(name)
    }

    pub fn ref_dicts(&self) -> impl Iterator<Item = &RefDict> {
        self.refs.values()
    }

    /// Text fed to the full-text index: the name plus every string value.
    pub fn text_body(&self) -> String {
        let mut fragments = vec![self.name.as_str()];
        for value in self.values.values() {
            value.collect_text(&mut fragments);
        }
        fragments.join("\n")
    }

    pub(crate) fn set_value(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
        self.touch();
    }

    pub(crate) fn remove_value(&mut self, name: &str) -> Option<Value> {
        let removed = self.values.remove(name);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub(crate) fn value_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.touch();
        self.values.get_mut(name)
    }

    /// Adds `id` to the collection `name`, creating the collection on first
    /// use. Returns `false` when `id` already was a member.
    pub(crate) fn attach_ref(
        &mut self,
        name: &str,
        other_name: &str,
        id: ItemId,
        alias: Option<String>,
    ) -> bool {
        self.touch();
        let owner = self.id;
        self.refs
            .entry(name.to_string())
            .or_insert_with(|| RefDict::new(owner, name, other_name))
            .insert(id, alias)
    }

    /// Removes `id` from the collection `name`; untouched if it is absent.
    pub(crate) fn detach_ref(&mut self, name: &str, id: ItemId) -> bool {
        let removed = self
            .refs
            .get_mut(name)
            .is_some_and(|dict| dict.remove(id));
        if removed {
            self.touch();
        }
        removed
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
        self.touch();
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ItemId>) {
        self.parent = parent;
        self.touch();
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.values.clear();
        self.refs.clear();
        self.status = ItemStatus::Deleted;
    }

    pub(crate) fn mark_committed(&mut self, version: Version) {
        self.version = version;
        self.status = ItemStatus::Clean;
    }

    fn touch(&mut self) {
        if self.status == ItemStatus::Clean {
            self.status = ItemStatus::Dirty;
        }
    }
}
