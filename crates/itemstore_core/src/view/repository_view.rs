//! `RepositoryView`: item access, mutation, commit, cancel and refresh.

use crate::model::item::{Item, ItemId, Version};
use crate::model::value::Value;
use crate::query::search::{search_committed, SearchHit, SearchQuery};
use crate::query::{execute, explain, parse_query, AccessPath, QueryPlan};
use crate::repo::{ItemStore, RefError, RepoError, RepoResult, Repository};
use crate::schema::{AttrDef, Cardinality, DeletePolicy, KindId, Schema, SchemaError};
use crate::view::index::{Index, IndexKey};
use crate::view::relations::{Edge, EdgeOp};
use crate::view::ViewError;
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Isolated working context pinned to one committed repository version.
#[derive(Debug)]
pub struct RepositoryView {
    name: String,
    repo: Arc<Repository>,
    schema: Arc<Schema>,
    version: Version,
    open: bool,
    pub(super) items: HashMap<ItemId, Item>,
    indexes: HashMap<String, Index>,
}

struct CommitOutcome {
    version: Version,
    changed_items: Vec<ItemId>,
    changed_indexes: Vec<String>,
}

impl RepositoryView {
    pub(crate) fn new(name: String, repo: Arc<Repository>, version: Version) -> Self {
        let schema = Arc::clone(repo.schema());
        debug!("event=view_open module=view status=ok view={name} version={version}");
        Self {
            name,
            repo,
            schema,
            version,
            open: true,
            items: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Committed version this view reads at.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Whether `commit` would write anything.
    pub fn has_pending_changes(&self) -> bool {
        self.items.values().any(Item::is_pending) || self.indexes.values().any(Index::is_dirty)
    }

    /// Number of items with uncommitted changes.
    pub fn pending_count(&self) -> usize {
        self.items.values().filter(|item| item.is_pending()).count()
    }

    // ---- items -------------------------------------------------------

    /// Creates an item of `kind` under `parent` (`None` = a root).
    ///
    /// The item joins every index bound to its kind.
    ///
    /// # Errors
    /// - `SchemaError::UnknownKind`, `ViewError::InvalidName`,
    ///   `ViewError::ItemNotFound` for a missing parent,
    ///   `ViewError::DuplicateName`.
    pub fn create_item(
        &mut self,
        kind: &str,
        parent: Option<ItemId>,
        name: &str,
    ) -> RepoResult<ItemId> {
        self.ensure_open()?;
        let kind_id = self.schema.kind_id(kind)?;
        validate_name(name)?;
        if let Some(parent) = parent {
            self.live_item(parent)?;
        }
        self.ensure_unique_name(parent, name, None)?;

        let bound: Vec<String> = self
            .schema
            .indexes_for_kind(kind_id)
            .map(|index| index.name.clone())
            .collect();
        for index in &bound {
            self.load_index(index)?;
        }

        let id = Uuid::new_v4();
        self.items
            .insert(id, Item::new(id, kind_id, parent, name.to_string()));
        for index in &bound {
            if let Some(index) = self.indexes.get_mut(index) {
                index.add_item(id);
            }
        }
        debug!(
            "event=item_create module=view status=ok view={} kind={kind} indexes={}",
            self.name,
            bound.len()
        );
        Ok(id)
    }

    /// Live item `id`, loading it on first access.
    pub fn item(&mut self, id: ItemId) -> RepoResult<&Item> {
        self.ensure_open()?;
        self.live_item(id)
    }

    /// Like `item`, but a missing or deleted item is `None`.
    pub fn get_item(&mut self, id: ItemId) -> RepoResult<Option<&Item>> {
        self.ensure_open()?;
        if self.load(id)? {
            Ok(self.items.get(&id))
        } else {
            Ok(None)
        }
    }

    /// Live children of `parent` (`None` = roots), ordered by name.
    pub fn children(&mut self, parent: Option<ItemId>) -> RepoResult<Vec<ItemId>> {
        self.ensure_open()?;
        if let Some(parent) = parent {
            self.live_item(parent)?;
        }
        Ok(self
            .named_children(parent)?
            .into_iter()
            .map(|(_, id)| id)
            .collect())
    }

    pub fn roots(&mut self) -> RepoResult<Vec<ItemId>> {
        self.children(None)
    }

    /// Resolves a `/`-separated name path from the roots.
    pub fn find_path(&mut self, path: &str) -> RepoResult<Option<ItemId>> {
        self.ensure_open()?;
        let mut current = None;
        let mut found_any = false;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            let next = self
                .named_children(current)?
                .into_iter()
                .find(|(name, _)| name == segment)
                .map(|(_, id)| id);
            match next {
                Some(id) => current = Some(id),
                None => return Ok(None),
            }
            found_any = true;
        }
        Ok(if found_any { current } else { None })
    }

    /// Absolute name path of `id`, e.g. `/inbox/welcome`.
    pub fn item_path(&mut self, id: ItemId) -> RepoResult<String> {
        self.ensure_open()?;
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(next) = current {
            let item = self.live_item(next)?;
            names.push(item.name().to_string());
            current = item.parent();
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    pub fn rename_item(&mut self, id: ItemId, name: &str) -> RepoResult<()> {
        self.ensure_open()?;
        validate_name(name)?;
        let item = self.live_item(id)?;
        if item.name() == name {
            return Ok(());
        }
        let parent = item.parent();
        self.ensure_unique_name(parent, name, Some(id))?;
        self.live_item_mut(id)?.set_name(name.to_string());
        Ok(())
    }

    /// Re-parents `id` under `parent` (`None` = make it a root).
    ///
    /// # Errors
    /// - `ViewError::MoveIntoDescendant` when `parent` is `id` or lies below it.
    /// - `ViewError::DuplicateName` when the new parent has a same-named child.
    pub fn move_item(&mut self, id: ItemId, parent: Option<ItemId>) -> RepoResult<()> {
        self.ensure_open()?;
        let item = self.live_item(id)?;
        if item.parent() == parent {
            return Ok(());
        }
        let name = item.name().to_string();

        let mut ancestor = parent;
        while let Some(next) = ancestor {
            if next == id {
                return Err(ViewError::MoveIntoDescendant {
                    item: id,
                    target: parent.unwrap_or(next),
                }
                .into());
            }
            ancestor = self.live_item(next)?.parent();
        }

        self.ensure_unique_name(parent, &name, Some(id))?;
        self.live_item_mut(id)?.set_parent(parent);
        Ok(())
    }

    /// Deletes `id`.
    ///
    /// With `recursive`, children are deleted too; otherwise an item with
    /// children is refused. Relations are removed on both sides. Referents of
    /// `cascade` attributes left without any relation are deleted as well.
    pub fn delete_item(&mut self, id: ItemId, recursive: bool) -> RepoResult<()> {
        self.ensure_open()?;
        self.live_item(id)?;
        if !recursive && !self.named_children(Some(id))?.is_empty() {
            return Err(ViewError::HasChildren(id).into());
        }

        let doomed = self.plan_deletion(id)?;
        let declared: Vec<String> = self
            .schema
            .indexes()
            .map(|index| index.name.clone())
            .collect();
        for index in &declared {
            self.load_index(index)?;
        }

        self.apply_deletion(&doomed);
        debug!(
            "event=item_delete module=view status=ok view={} items={}",
            self.name,
            doomed.len()
        );
        Ok(())
    }

    /// Whether `id` is of kind `kind` or one of its sub-kinds.
    pub fn is_item_of(&mut self, id: ItemId, kind: &str) -> RepoResult<bool> {
        self.ensure_open()?;
        let ancestor = self.schema.kind_id(kind)?;
        let item_kind = self.live_item(id)?.kind();
        Ok(self.schema.is_kind_of(item_kind, ancestor))
    }

    // ---- values ------------------------------------------------------

    /// Replaces the whole value of `attribute`.
    pub fn set_value(
        &mut self,
        id: ItemId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> RepoResult<()> {
        self.ensure_open()?;
        let def = self.value_def(id, attribute)?;
        let value = value.into();
        def.check_value(&value)?;
        self.live_item_mut(id)?.set_value(attribute, value);
        self.reorder_indexes(id, attribute);
        Ok(())
    }

    /// Stored value of `attribute`, or its declared default.
    pub fn get_value(&mut self, id: ItemId, attribute: &str) -> RepoResult<Option<Value>> {
        self.ensure_open()?;
        let def = self.value_def(id, attribute)?;
        let stored = self.live_item(id)?.value(attribute).cloned();
        Ok(stored.or(def.default))
    }

    /// Appends one element to a list attribute.
    pub fn add_value(
        &mut self,
        id: ItemId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> RepoResult<()> {
        self.ensure_open()?;
        let def = self.value_def(id, attribute)?;
        require_cardinality(&def, Cardinality::List)?;
        let value = value.into();
        def.check_element(&value)?;

        let item = self.live_item_mut(id)?;
        if let Some(Value::List(values)) = item.value_mut(attribute) {
            values.push(value);
        } else {
            item.set_value(attribute, Value::List(vec![value]));
        }
        self.reorder_indexes(id, attribute);
        Ok(())
    }

    /// Sets `key` in a dict attribute.
    pub fn set_dict_value(
        &mut self,
        id: ItemId,
        attribute: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> RepoResult<()> {
        self.ensure_open()?;
        let def = self.value_def(id, attribute)?;
        require_cardinality(&def, Cardinality::Dict)?;
        let value = value.into();
        def.check_element(&value)?;

        let item = self.live_item_mut(id)?;
        if let Some(Value::Dict(values)) = item.value_mut(attribute) {
            values.insert(key.to_string(), value);
        } else {
            let values = [(key.to_string(), value)].into_iter().collect();
            item.set_value(attribute, Value::Dict(values));
        }
        self.reorder_indexes(id, attribute);
        Ok(())
    }

    /// Removes the stored value; returns `false` when none was stored.
    pub fn remove_value(&mut self, id: ItemId, attribute: &str) -> RepoResult<bool> {
        self.ensure_open()?;
        self.value_def(id, attribute)?;
        let removed = self.live_item_mut(id)?.remove_value(attribute).is_some();
        if removed {
            self.reorder_indexes(id, attribute);
        }
        Ok(removed)
    }

    /// Whether a value is stored (defaults do not count).
    pub fn has_value(&mut self, id: ItemId, attribute: &str) -> RepoResult<bool> {
        self.ensure_open()?;
        self.value_def(id, attribute)?;
        Ok(self.live_item(id)?.value(attribute).is_some())
    }

    // ---- indexes -----------------------------------------------------

    /// Adds a live item to a manual index; `false` if already a member.
    ///
    /// # Errors
    /// - `ViewError::UnknownIndex` for undeclared names.
    /// - `ViewError::ManagedIndex` for indexes bound to a kind.
    pub fn index_add(&mut self, index: &str, id: ItemId) -> RepoResult<bool> {
        self.ensure_open()?;
        self.ensure_manual(index)?;
        self.live_item(id)?;
        Ok(self.index_mut(index)?.add_item(id))
    }

    /// Removes `id` from a manual index; `false` if it was not a member.
    pub fn index_remove(&mut self, index: &str, id: ItemId) -> RepoResult<bool> {
        self.ensure_open()?;
        self.ensure_manual(index)?;
        Ok(self.index_mut(index)?.remove_item(id))
    }

    pub fn index_has(&mut self, index: &str, id: ItemId) -> RepoResult<bool> {
        self.ensure_open()?;
        Ok(self.index_mut(index)?.has_item(id))
    }

    /// Members of `index` in id order.
    pub fn index_members(&mut self, index: &str) -> RepoResult<Vec<ItemId>> {
        self.ensure_open()?;
        Ok(self.index_mut(index)?.members())
    }

    pub fn index_len(&mut self, index: &str) -> RepoResult<usize> {
        self.ensure_open()?;
        Ok(self.index_mut(index)?.len())
    }

    /// Members of `index` in index order: by the ordering attribute when one
    /// is declared (missing values last, ties by id), by id otherwise.
    pub fn index_ordered(&mut self, index: &str) -> RepoResult<Vec<ItemId>> {
        self.ensure_open()?;
        self.ordered_members(index)
    }

    /// Member at `position` in index order.
    pub fn index_get(&mut self, index: &str, position: usize) -> RepoResult<Option<ItemId>> {
        self.ensure_open()?;
        Ok(self.ordered_members(index)?.get(position).copied())
    }

    pub fn index_first(&mut self, index: &str) -> RepoResult<Option<ItemId>> {
        self.index_get(index, 0)
    }

    pub fn index_last(&mut self, index: &str) -> RepoResult<Option<ItemId>> {
        self.ensure_open()?;
        Ok(self.ordered_members(index)?.last().copied())
    }

    /// Position of `id` in index order; `None` for non-members.
    pub fn index_position(&mut self, index: &str, id: ItemId) -> RepoResult<Option<usize>> {
        self.ensure_open()?;
        Ok(self
            .ordered_members(index)?
            .iter()
            .position(|member| *member == id))
    }

    /// Member following `id` in index order.
    pub fn index_next(&mut self, index: &str, id: ItemId) -> RepoResult<Option<ItemId>> {
        self.ensure_open()?;
        let ordered = self.ordered_members(index)?;
        Ok(ordered
            .iter()
            .position(|member| *member == id)
            .and_then(|position| ordered.get(position + 1))
            .copied())
    }

    /// Member preceding `id` in index order.
    pub fn index_previous(&mut self, index: &str, id: ItemId) -> RepoResult<Option<ItemId>> {
        self.ensure_open()?;
        let ordered = self.ordered_members(index)?;
        Ok(ordered
            .iter()
            .position(|member| *member == id)
            .and_then(|position| position.checked_sub(1))
            .and_then(|position| ordered.get(position))
            .copied())
    }

    // ---- queries -----------------------------------------------------

    /// Runs `plan` with positional parameters (`$1` is `params[0]`).
    pub fn run_query(&mut self, plan: &QueryPlan, params: &[Value]) -> RepoResult<Vec<ItemId>> {
        self.ensure_open()?;
        execute(self, plan, params)
    }

    /// Parses and runs a textual query.
    pub fn query(&mut self, text: &str, params: &[Value]) -> RepoResult<Vec<ItemId>> {
        let plan = parse_query(text)?;
        self.run_query(&plan, params)
    }

    /// Access paths `run_query` would use, one per `for` clause.
    pub fn explain(&self, plan: &QueryPlan, params: &[Value]) -> RepoResult<Vec<AccessPath>> {
        self.ensure_open()?;
        explain(&self.schema, plan, params)
    }

    /// Full-text search over text committed at this view's version.
    pub fn search(&self, query: &SearchQuery) -> RepoResult<Vec<SearchHit>> {
        self.ensure_open()?;
        let version = self.version;
        self.repo
            .with_connection(|conn| search_committed(conn, query, version))
    }

    /// `search` for plain text across every kind.
    pub fn search_items(&self, text: &str, limit: u32) -> RepoResult<Vec<SearchHit>> {
        self.search(&SearchQuery::new(text).with_limit(limit))
    }

    // ---- lifecycle ---------------------------------------------------

    /// Validates every pending item.
    ///
    /// # Errors
    /// - `SchemaError::MissingRequired` for required attributes with neither
    ///   a stored value nor a default.
    /// - `SchemaError::UnknownAttribute`, type and cardinality mismatches for
    ///   stored values.
    /// - `RefError::DanglingReference` and `RefError::OneSided` for broken
    ///   relations.
    pub fn check(&mut self) -> RepoResult<()> {
        self.ensure_open()?;
        let mut pending: Vec<ItemId> = self
            .items
            .values()
            .filter(|item| item.is_pending() && !item.is_deleted())
            .map(Item::id)
            .collect();
        pending.sort_unstable();
        for id in pending {
            self.check_item(id)?;
        }
        Ok(())
    }

    /// Discards every uncommitted change.
    pub fn cancel(&mut self) -> RepoResult<()> {
        self.ensure_open()?;
        let discarded = self.pending_count();
        self.items.retain(|_, item| !item.is_pending());
        self.indexes.retain(|_, index| !index.is_dirty());
        self.indexes.values_mut().for_each(Index::invalidate_order);
        info!(
            "event=view_cancel module=view status=ok view={} version={} discarded={discarded}",
            self.name, self.version
        );
        Ok(())
    }

    /// Moves the view to the latest committed version.
    ///
    /// Cached items and indexes changed by other commits are evicted. Pending
    /// index changes are replayed on top of the newer membership.
    ///
    /// # Errors
    /// - `ViewError::VersionConflict` when another commit changed an item this
    ///   view has pending changes on, or deleted an item this view adds to an
    ///   index. The view is left unchanged.
    pub fn refresh(&mut self) -> RepoResult<Version> {
        self.ensure_open()?;
        let started_at = Instant::now();
        let base = self.version;
        let (latest, changed_items, changed_indexes, conflicts) =
            self.repo.with_store(|store| {
                let latest = store.current_version()?;
                if latest <= base {
                    return Ok((latest, Vec::new(), Vec::new(), Vec::new()));
                }
                let changed_items = store.changed_items(base, latest)?;
                let changed_indexes = store.changed_indexes(base, latest)?;
                let conflicts = self.conflicts_with(store, &changed_items, latest)?;
                Ok((latest, changed_items, changed_indexes, conflicts))
            })?;
        if latest <= base {
            return Ok(base);
        }

        if !conflicts.is_empty() {
            warn!(
                "event=view_refresh module=view status=conflict view={} version={base} latest={latest} conflicts={}",
                self.name,
                conflicts.len()
            );
            return Err(ViewError::VersionConflict {
                view: self.name.clone(),
                items: conflicts,
            }
            .into());
        }

        let mut rebased = Vec::new();
        for name in &changed_indexes {
            if self.indexes.get(name).is_some_and(Index::is_dirty) {
                let members = self
                    .repo
                    .with_store(|store| store.index_members(name, latest))?;
                rebased.push((name.clone(), members));
            }
        }

        for id in &changed_items {
            self.items.remove(id);
        }
        self.indexes
            .retain(|name, index| index.is_dirty() || !changed_indexes.contains(name));
        for (name, members) in rebased {
            if let Some(index) = self.indexes.get_mut(&name) {
                index.rebase(members);
            }
        }
        self.indexes.values_mut().for_each(Index::invalidate_order);
        self.version = latest;

        info!(
            "event=view_refresh module=view status=ok view={} from={base} to={latest} evicted={} duration_ms={}",
            self.name,
            changed_items.len(),
            started_at.elapsed().as_millis()
        );
        Ok(latest)
    }

    /// Writes all pending changes as a new repository version.
    ///
    /// Returns the new version, or the current one when nothing is pending.
    /// Changes committed by other views meanwhile become visible afterwards.
    ///
    /// # Errors
    /// - Any `check` failure.
    /// - `ViewError::VersionConflict` when another commit changed an item this
    ///   view has pending changes on, or deleted an item this view adds to an
    ///   index.
    /// - `ViewError::DuplicateName` when another commit took a name this view
    ///   assigns.
    pub fn commit(&mut self) -> RepoResult<Version> {
        self.ensure_open()?;
        let started_at = Instant::now();

        let mut pending: Vec<ItemId> = self
            .items
            .values()
            .filter(|item| item.is_pending())
            .map(Item::id)
            .collect();
        pending.sort_unstable();
        let index_ops: Vec<(String, ItemId, bool)> = self
            .indexes
            .values()
            .flat_map(|index| {
                index
                    .pending()
                    .map(move |(id, member)| (index.name().to_string(), id, member))
            })
            .collect();
        if pending.is_empty() && index_ops.is_empty() {
            return Ok(self.version);
        }

        if let Err(err) = self.check() {
            error!(
                "event=view_commit module=view status=error view={} error_code=check_failed error={err}",
                self.name
            );
            return Err(err);
        }

        let outcome = self.write_pending(&pending, &index_ops);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    "event=view_commit module=view status=error view={} version={} duration_ms={} error={err}",
                    self.name,
                    self.version,
                    started_at.elapsed().as_millis()
                );
                return Err(err);
            }
        };

        for id in &pending {
            let deleted = self.items.get(id).map(Item::is_deleted);
            match deleted {
                Some(true) => {
                    self.items.remove(id);
                }
                Some(false) => {
                    if let Some(item) = self.items.get_mut(id) {
                        item.mark_committed(outcome.version);
                    }
                }
                None => {}
            }
        }
        for id in &outcome.changed_items {
            self.items.remove(id);
        }
        for index in self.indexes.values_mut() {
            index.clear_pending();
            index.invalidate_order();
        }
        self.indexes
            .retain(|name, _| !outcome.changed_indexes.contains(name));
        self.version = outcome.version;

        info!(
            "event=view_commit module=view status=ok view={} version={} items={} index_entries={} duration_ms={}",
            self.name,
            outcome.version,
            pending.len(),
            index_ops.len(),
            started_at.elapsed().as_millis()
        );
        Ok(outcome.version)
    }

    /// Closes the view, discarding pending changes. Idempotent.
    pub fn close(&mut self) {
        if self.open {
            debug!(
                "event=view_close module=view status=ok view={} discarded={}",
                self.name,
                self.pending_count()
            );
        }
        self.open = false;
        self.items.clear();
        self.indexes.clear();
    }

    // ---- internals ---------------------------------------------------

    pub(crate) fn ensure_open(&self) -> RepoResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(ViewError::Closed(self.name.clone()).into())
        }
    }

    /// Makes sure `id` is cached; returns whether it is live.
    pub(super) fn load(&mut self, id: ItemId) -> RepoResult<bool> {
        if let Some(item) = self.items.get(&id) {
            return Ok(!item.is_deleted());
        }
        let version = self.version;
        match self.repo.with_store(|store| store.load_item(id, version))? {
            Some(item) => {
                self.items.insert(id, item);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn live_item(&mut self, id: ItemId) -> RepoResult<&Item> {
        if !self.load(id)? {
            return Err(ViewError::ItemNotFound(id).into());
        }
        self.items
            .get(&id)
            .ok_or_else(|| ViewError::ItemNotFound(id).into())
    }

    fn live_item_mut(&mut self, id: ItemId) -> RepoResult<&mut Item> {
        if !self.load(id)? {
            return Err(ViewError::ItemNotFound(id).into());
        }
        self.items
            .get_mut(&id)
            .ok_or_else(|| ViewError::ItemNotFound(id).into())
    }

    /// Live items of the given kinds visible in this view, in id order.
    pub(crate) fn kind_scan(&mut self, kinds: &[KindId]) -> RepoResult<Vec<ItemId>> {
        let schema = Arc::clone(&self.schema);
        let paths: Vec<&str> = kinds.iter().map(|kind| schema.kind(*kind).path()).collect();
        let version = self.version;
        let stored = self
            .repo
            .with_store(|store| store.item_ids_of_kinds(&paths, version))?;

        let mut ids: BTreeSet<ItemId> = stored
            .into_iter()
            .filter(|id| self.items.get(id).map_or(true, |item| !item.is_deleted()))
            .collect();
        ids.extend(
            self.items
                .values()
                .filter(|item| item.is_new() && kinds.contains(&item.kind()))
                .map(Item::id),
        );
        Ok(ids.into_iter().collect())
    }

    pub(crate) fn load_index(&mut self, name: &str) -> RepoResult<()> {
        if self.indexes.contains_key(name) {
            return Ok(());
        }
        let Some(def) = self.schema.index(name) else {
            return Err(ViewError::UnknownIndex(name.to_string()).into());
        };
        let ordering = def.attribute.clone().map(|attribute| (attribute, def.descending));
        let version = self.version;
        let members = self
            .repo
            .with_store(|store| store.index_members(name, version))?;
        let mut index = Index::loaded(name, members);
        if let Some((attribute, descending)) = ordering {
            index = index.ordered_by(attribute, descending);
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    fn ensure_manual(&self, name: &str) -> RepoResult<()> {
        match self.schema.index(name) {
            None => Err(ViewError::UnknownIndex(name.to_string()).into()),
            Some(def) if def.kind_id().is_some() => {
                Err(ViewError::ManagedIndex(name.to_string()).into())
            }
            Some(_) => Ok(()),
        }
    }

    /// Drops cached sort keys of indexes ordered by `attribute` that hold `id`.
    fn reorder_indexes(&mut self, id: ItemId, attribute: &str) {
        for index in self.indexes.values_mut() {
            if index.attribute() == Some(attribute) && index.has_item(id) {
                index.invalidate_order();
            }
        }
    }

    /// Loads `name` and computes sort keys for its members if missing.
    fn ensure_order(&mut self, name: &str) -> RepoResult<()> {
        self.load_index(name)?;
        let (attribute, members) = match self.indexes.get(name) {
            Some(index) if index.needs_order() => match index.attribute() {
                Some(attribute) => (attribute.to_string(), index.members()),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        let schema = Arc::clone(&self.schema);
        let mut keys: Vec<IndexKey> = Vec::with_capacity(members.len());
        for id in members {
            if !self.load(id)? {
                continue;
            }
            let Some(item) = self.items.get(&id) else {
                continue;
            };
            let key = item.value(&attribute).cloned().or_else(|| {
                schema
                    .kind(item.kind())
                    .attr_defs()
                    .get(&attribute)
                    .and_then(|def| def.default.clone())
            });
            keys.push((key, id));
        }
        if let Some(index) = self.indexes.get_mut(name) {
            index.set_order(keys);
        }
        Ok(())
    }

    fn ordered_members(&mut self, name: &str) -> RepoResult<Vec<ItemId>> {
        self.ensure_order(name)?;
        let index = self.index_mut(name)?;
        Ok(index.ordered().unwrap_or_else(|| index.members()))
    }

    /// Members of an attribute-ordered index whose key lies within every
    /// inclusive bound, in index order.
    pub(crate) fn index_range(
        &mut self,
        name: &str,
        lower: &[Value],
        upper: &[Value],
    ) -> RepoResult<Vec<ItemId>> {
        self.ensure_order(name)?;
        let index = self.index_mut(name)?;
        Ok(index
            .key_range(lower, upper)
            .unwrap_or_else(|| index.members()))
    }

    fn index_mut(&mut self, name: &str) -> RepoResult<&mut Index> {
        self.load_index(name)?;
        self.indexes
            .get_mut(name)
            .ok_or_else(|| ViewError::UnknownIndex(name.to_string()).into())
    }

    /// Live children of `parent` as `(name, id)`, sorted by name.
    fn named_children(&mut self, parent: Option<ItemId>) -> RepoResult<Vec<(String, ItemId)>> {
        let version = self.version;
        let stored = self
            .repo
            .with_store(|store| store.child_ids(parent, version))?;

        let mut ids: BTreeSet<ItemId> = stored
            .into_iter()
            .filter(|id| {
                self.items
                    .get(id)
                    .map_or(true, |item| !item.is_deleted() && item.parent() == parent)
            })
            .collect();
        ids.extend(
            self.items
                .values()
                .filter(|item| item.is_pending() && !item.is_deleted() && item.parent() == parent)
                .map(Item::id),
        );

        let mut named = Vec::with_capacity(ids.len());
        for id in ids {
            named.push((self.live_item(id)?.name().to_string(), id));
        }
        named.sort();
        Ok(named)
    }

    fn ensure_unique_name(
        &mut self,
        parent: Option<ItemId>,
        name: &str,
        except: Option<ItemId>,
    ) -> RepoResult<()> {
        let taken = self
            .named_children(parent)?
            .into_iter()
            .any(|(existing, id)| existing == name && Some(id) != except);
        if taken {
            return Err(ViewError::DuplicateName {
                parent,
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn value_def(&mut self, id: ItemId, attribute: &str) -> RepoResult<AttrDef> {
        let kind = self.live_item(id)?.kind();
        let kind = self.schema.kind(kind);
        let def = kind.get_attr_def(attribute)?;
        if def.is_reference() {
            return Err(SchemaError::NotAValue {
                kind: kind.path().to_string(),
                attribute: attribute.to_string(),
            }
            .into());
        }
        Ok(def.clone())
    }

    fn check_item(&mut self, id: ItemId) -> RepoResult<()> {
        let schema = Arc::clone(&self.schema);
        let item = self.live_item(id)?;
        let kind = schema.kind(item.kind());

        for (name, value) in item.values() {
            let def = kind.get_attr_def(name)?;
            def.check_value(value)?;
        }
        for def in kind.attr_defs().iter().filter(|def| def.required) {
            let present = if def.is_reference() {
                item.refs(&def.name).is_some_and(|dict| !dict.is_empty())
            } else {
                item.value(&def.name).is_some() || def.default.is_some()
            };
            if !present {
                return Err(SchemaError::MissingRequired {
                    kind: kind.path().to_string(),
                    attribute: def.name.clone(),
                }
                .into());
            }
        }

        let edges: Vec<(String, String, ItemId)> = item
            .ref_dicts()
            .flat_map(|dict| {
                dict.iter().map(move |target| {
                    (dict.name().to_string(), dict.other_name().to_string(), target)
                })
            })
            .collect();
        for (attribute, other_name, target) in edges {
            if !self.load(target)? {
                return Err(RefError::DanglingReference {
                    owner: id,
                    attribute,
                    target,
                }
                .into());
            }
            let two_sided = self
                .items
                .get(&target)
                .and_then(|item| item.refs(&other_name))
                .is_some_and(|dict| dict.contains(id));
            if !two_sided {
                return Err(RefError::OneSided {
                    owner: id,
                    attribute,
                    target,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Items changed at `latest` that this view cannot merge: its own pending
    /// items, and items it adds to an index that are gone at `latest`.
    fn conflicts_with(
        &self,
        store: &dyn ItemStore,
        changed_items: &[ItemId],
        latest: Version,
    ) -> RepoResult<Vec<ItemId>> {
        let mut conflicts: BTreeSet<ItemId> = changed_items
            .iter()
            .copied()
            .filter(|id| self.items.get(id).is_some_and(Item::is_pending))
            .collect();

        let changed: HashSet<ItemId> = changed_items.iter().copied().collect();
        let joined: BTreeSet<ItemId> = self
            .indexes
            .values()
            .flat_map(|index| index.pending())
            .filter(|(id, member)| *member && changed.contains(id))
            .map(|(id, _)| id)
            .collect();
        for id in joined {
            if !conflicts.contains(&id) && store.load_item(id, latest)?.is_none() {
                conflicts.insert(id);
            }
        }
        Ok(conflicts.into_iter().collect())
    }

    fn write_pending(
        &self,
        pending: &[ItemId],
        index_ops: &[(String, ItemId, bool)],
    ) -> RepoResult<CommitOutcome> {
        let base = self.version;
        self.repo.with_transaction(|store| {
            let latest = store.current_version()?;
            let (changed_items, changed_indexes) = if latest > base {
                (
                    store.changed_items(base, latest)?,
                    store.changed_indexes(base, latest)?,
                )
            } else {
                (Vec::new(), Vec::new())
            };

            let conflicts = self.conflicts_with(store, &changed_items, latest)?;
            if !conflicts.is_empty() {
                return Err(ViewError::VersionConflict {
                    view: self.name.clone(),
                    items: conflicts,
                }
                .into());
            }

            let version = latest + 1;
            for item in pending.iter().filter_map(|id| self.items.get(id)) {
                if !item.is_deleted() {
                    self.ensure_name_free_at(store, item, latest)?;
                }
                store.write_item(item, version)?;
            }
            for (index, id, member) in index_ops {
                store.write_index_entry(index, *id, *member, version)?;
            }
            store.set_current_version(version)?;

            Ok(CommitOutcome {
                version,
                changed_items,
                changed_indexes,
            })
        })
    }

    /// Rejects `item` when a committed sibling at `latest` holds its name and
    /// this view does not move that sibling away.
    fn ensure_name_free_at(
        &self,
        store: &dyn ItemStore,
        item: &Item,
        latest: Version,
    ) -> RepoResult<()> {
        for other in store.child_ids_named(item.parent(), item.name(), latest)? {
            if other == item.id() {
                continue;
            }
            let moved_away = self.items.get(&other).is_some_and(|sibling| {
                sibling.is_pending()
                    && (sibling.is_deleted()
                        || sibling.parent() != item.parent()
                        || sibling.name() != item.name())
            });
            if !moved_away {
                return Err(ViewError::DuplicateName {
                    parent: item.parent(),
                    name: item.name().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Collects `root`, its subtree and orphaned cascade referents, loading
    /// everything the deletion will touch.
    fn plan_deletion(&mut self, root: ItemId) -> RepoResult<Vec<ItemId>> {
        let schema = Arc::clone(&self.schema);
        let mut doomed = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = vec![root];

        loop {
            while let Some(next) = queue.pop() {
                if !seen.insert(next) {
                    continue;
                }
                doomed.push(next);
                for (_, child) in self.named_children(Some(next))? {
                    queue.push(child);
                }
                let referents: Vec<ItemId> = self
                    .live_item(next)?
                    .ref_dicts()
                    .flat_map(|dict| dict.iter())
                    .collect();
                for referent in referents {
                    self.load(referent)?;
                }
            }

            let mut orphaned = Vec::new();
            for id in &doomed {
                let Some(item) = self.items.get(id) else {
                    continue;
                };
                let kind = schema.kind(item.kind());
                for dict in item.ref_dicts() {
                    let cascades = kind
                        .attr_defs()
                        .get(dict.name())
                        .is_some_and(|def| def.delete_policy == DeletePolicy::Cascade);
                    if !cascades {
                        continue;
                    }
                    for referent in dict.iter().filter(|referent| !seen.contains(referent)) {
                        let unreferenced = self.items.get(&referent).is_some_and(|target| {
                            !target.is_deleted()
                                && target
                                    .ref_dicts()
                                    .flat_map(|dict| dict.iter())
                                    .all(|other| seen.contains(&other))
                        });
                        if unreferenced {
                            orphaned.push(referent);
                        }
                    }
                }
            }
            if orphaned.is_empty() {
                return Ok(doomed);
            }
            queue.extend(orphaned);
        }
    }

    fn apply_deletion(&mut self, doomed: &[ItemId]) {
        for id in doomed {
            let edges: Vec<Edge> = match self.items.get(id) {
                Some(item) => item
                    .ref_dicts()
                    .flat_map(|dict| {
                        dict.iter().map(move |target| Edge {
                            owner: *id,
                            attribute: dict.name().to_string(),
                            target,
                            inverse: dict.other_name().to_string(),
                        })
                    })
                    .collect(),
                None => continue,
            };
            for edge in &edges {
                self.apply_edge(edge, EdgeOp::Detach);
            }
        }

        for id in doomed {
            for index in self.indexes.values_mut() {
                index.remove_item(*id);
            }
            let is_new = self.items.get(id).map(Item::is_new);
            match is_new {
                Some(true) => {
                    self.items.remove(id);
                }
                Some(false) => {
                    if let Some(item) = self.items.get_mut(id) {
                        item.mark_deleted();
                    }
                }
                None => {}
            }
        }
    }
}

fn validate_name(name: &str) -> RepoResult<()> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(ViewError::InvalidName(name.to_string()).into());
    }
    Ok(())
}

fn require_cardinality(def: &AttrDef, expected: Cardinality) -> RepoResult<()> {
    if def.cardinality == expected {
        return Ok(());
    }
    Err(RepoError::Schema(SchemaError::CardinalityMismatch {
        attribute: def.name.clone(),
        expected: def.cardinality,
        found: match expected {
            Cardinality::Single => "single value",
            Cardinality::List => "list element",
            Cardinality::Dict => "dict entry",
        },
    }))
}
