//! Versioned item storage contract and SQLite implementation.
//!
//! # Responsibility
//! - Read items, children and index membership as of a given version.
//! - Append committed item versions, tombstones and index entries.
//!
//! # Invariants
//! - Rows are append-only; the visible row of an item at version `V` is its
//!   newest row with `version <= V`.
//! - Every live committed row has exactly one `item_text` row sharing its
//!   rowid.
//! - Decoding rejects unknown kinds and attributes instead of masking them.

use crate::model::item::{Item, ItemId, Version};
use crate::model::ref_dict::RefDict;
use crate::model::value::Value;
use crate::repo::{RepoError, RepoResult};
use crate::schema::{IndexDef, Schema};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) const VISIBLE_ITEMS_CTE: &str = "WITH visible AS (
    SELECT iv.rowid AS row_id, iv.*
    FROM item_versions iv
    WHERE iv.version = (
        SELECT MAX(latest.version)
        FROM item_versions latest
        WHERE latest.uuid = iv.uuid
          AND latest.version <= ?1
    )
)";

/// JSON payload column of `item_versions`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ItemPayload {
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default)]
    refs: BTreeMap<String, Vec<RefEntry>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefEntry {
    uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
}

/// Kind binding an index was last filled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBinding {
    pub kind: Option<String>,
    pub recursive: bool,
}

impl From<&IndexDef> for IndexBinding {
    fn from(def: &IndexDef) -> Self {
        Self {
            kind: def.kind.clone(),
            recursive: def.recursive,
        }
    }
}

/// Storage operations used by views.
pub trait ItemStore {
    fn current_version(&self) -> RepoResult<Version>;
    fn set_current_version(&self, version: Version) -> RepoResult<()>;
    /// Visible, non-deleted item at `at`.
    fn load_item(&self, id: ItemId, at: Version) -> RepoResult<Option<Item>>;
    /// Live children of `parent` (`None` = roots) at `at`, in id order.
    fn child_ids(&self, parent: Option<ItemId>, at: Version) -> RepoResult<Vec<ItemId>>;
    /// Live children of `parent` named `name` at `at`.
    fn child_ids_named(
        &self,
        parent: Option<ItemId>,
        name: &str,
        at: Version,
    ) -> RepoResult<Vec<ItemId>>;
    /// Live items whose kind path is in `kinds`, in id order.
    fn item_ids_of_kinds(&self, kinds: &[&str], at: Version) -> RepoResult<Vec<ItemId>>;
    /// Members of `index` at `at`, in id order.
    fn index_members(&self, index: &str, at: Version) -> RepoResult<Vec<ItemId>>;
    /// Items with a row in `(after, upto]`.
    fn changed_items(&self, after: Version, upto: Version) -> RepoResult<Vec<ItemId>>;
    /// Indexes with an entry in `(after, upto]`.
    fn changed_indexes(&self, after: Version, upto: Version) -> RepoResult<Vec<String>>;
    /// Appends the row for `item` (a tombstone if deleted) at `version`.
    fn write_item(&self, item: &Item, version: Version) -> RepoResult<()>;
    fn write_index_entry(
        &self,
        index: &str,
        id: ItemId,
        is_member: bool,
        version: Version,
    ) -> RepoResult<()>;
    fn index_binding(&self, index: &str) -> RepoResult<Option<IndexBinding>>;
    fn record_index_binding(&self, index: &str, binding: &IndexBinding) -> RepoResult<()>;
}

/// SQLite-backed item store bound to one connection or transaction.
pub struct SqliteItemStore<'conn> {
    conn: &'conn Connection,
    schema: &'conn Schema,
}

impl<'conn> SqliteItemStore<'conn> {
    pub fn new(conn: &'conn Connection, schema: &'conn Schema) -> Self {
        Self { conn, schema }
    }

    fn query_ids(&self, sql: &str, bind_values: Vec<SqlValue>) -> RepoResult<Vec<ItemId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_uuid(&text, "uuid")?);
        }
        Ok(ids)
    }

    fn decode_item(&self, row: &Row<'_>) -> RepoResult<Item> {
        let id = parse_uuid(&row.get::<_, String>("uuid")?, "uuid")?;
        let parent = row
            .get::<_, Option<String>>("parent_uuid")?
            .map(|text| parse_uuid(&text, "parent_uuid"))
            .transpose()?;
        let kind_path: String = row.get("kind")?;
        let kind_id = self.schema.kind_id(&kind_path).map_err(|_| {
            RepoError::InvalidData(format!("unknown kind `{kind_path}` for item {id}"))
        })?;
        let kind = self.schema.kind(kind_id);

        let payload_text: String = row.get("payload")?;
        let payload: ItemPayload = serde_json::from_str(&payload_text).map_err(|err| {
            RepoError::InvalidData(format!("invalid payload for item {id}: {err}"))
        })?;

        let mut refs = BTreeMap::new();
        for (attribute, entries) in payload.refs {
            let other_name = kind
                .attr_defs()
                .get(&attribute)
                .and_then(|def| def.other_name.clone())
                .ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "item {id} stores references under unknown attribute `{attribute}`"
                    ))
                })?;
            let mut dict = RefDict::new(id, attribute.as_str(), other_name);
            for entry in entries {
                dict.insert(entry.uuid, entry.alias);
            }
            refs.insert(attribute, dict);
        }

        let version = row.get::<_, i64>("version")?;
        Ok(Item::from_committed(
            id,
            kind_id,
            parent,
            row.get("name")?,
            payload.values,
            refs,
            version_from_db(version)?,
        ))
    }
}

impl ItemStore for SqliteItemStore<'_> {
    fn current_version(&self) -> RepoResult<Version> {
        let version: i64 = self.conn.query_row(
            "SELECT value FROM repository_meta WHERE key = 'version';",
            [],
            |row| row.get(0),
        )?;
        version_from_db(version)
    }

    fn set_current_version(&self, version: Version) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE repository_meta SET value = ?1 WHERE key = 'version';",
            params![version_to_db(version)],
        )?;
        Ok(())
    }

    fn load_item(&self, id: ItemId, at: Version) -> RepoResult<Option<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VISIBLE_ITEMS_CTE}
             SELECT uuid, version, parent_uuid, name, kind, payload
             FROM visible
             WHERE uuid = ?2 AND is_deleted = 0;"
        ))?;
        let mut rows = stmt.query(params![version_to_db(at), id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(self.decode_item(row)?)),
            None => Ok(None),
        }
    }

    fn child_ids(&self, parent: Option<ItemId>, at: Version) -> RepoResult<Vec<ItemId>> {
        self.query_ids(
            &format!(
                "{VISIBLE_ITEMS_CTE}
                 SELECT uuid FROM visible
                 WHERE is_deleted = 0 AND parent_uuid IS ?2
                 ORDER BY uuid;"
            ),
            vec![
                SqlValue::Integer(version_to_db(at)),
                parent.map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
            ],
        )
    }

    fn child_ids_named(
        &self,
        parent: Option<ItemId>,
        name: &str,
        at: Version,
    ) -> RepoResult<Vec<ItemId>> {
        self.query_ids(
            &format!(
                "{VISIBLE_ITEMS_CTE}
                 SELECT uuid FROM visible
                 WHERE is_deleted = 0 AND parent_uuid IS ?2 AND name = ?3
                 ORDER BY uuid;"
            ),
            vec![
                SqlValue::Integer(version_to_db(at)),
                parent.map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
                SqlValue::Text(name.to_string()),
            ],
        )
    }

    fn item_ids_of_kinds(&self, kinds: &[&str], at: Version) -> RepoResult<Vec<ItemId>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let mut bind_values = vec![SqlValue::Integer(version_to_db(at))];
        bind_values.extend(kinds.iter().map(|kind| SqlValue::Text(kind.to_string())));
        self.query_ids(
            &format!(
                "{VISIBLE_ITEMS_CTE}
                 SELECT uuid FROM visible
                 WHERE is_deleted = 0 AND kind IN ({placeholders})
                 ORDER BY uuid;"
            ),
            bind_values,
        )
    }

    fn index_members(&self, index: &str, at: Version) -> RepoResult<Vec<ItemId>> {
        self.query_ids(
            "SELECT e.uuid
             FROM index_entries e
             WHERE e.index_name = ?2
               AND e.is_member = 1
               AND e.version = (
                   SELECT MAX(latest.version)
                   FROM index_entries latest
                   WHERE latest.index_name = e.index_name
                     AND latest.uuid = e.uuid
                     AND latest.version <= ?1
               )
             ORDER BY e.uuid;",
            vec![
                SqlValue::Integer(version_to_db(at)),
                SqlValue::Text(index.to_string()),
            ],
        )
    }

    fn changed_items(&self, after: Version, upto: Version) -> RepoResult<Vec<ItemId>> {
        self.query_ids(
            "SELECT DISTINCT uuid FROM item_versions
             WHERE version > ?1 AND version <= ?2
             ORDER BY uuid;",
            vec![
                SqlValue::Integer(version_to_db(after)),
                SqlValue::Integer(version_to_db(upto)),
            ],
        )
    }

    fn changed_indexes(&self, after: Version, upto: Version) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT index_name FROM index_entries
             WHERE version > ?1 AND version <= ?2
             ORDER BY index_name;",
        )?;
        let names = stmt
            .query_map(
                params![version_to_db(after), version_to_db(upto)],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn write_item(&self, item: &Item, version: Version) -> RepoResult<()> {
        let payload = if item.is_deleted() {
            ItemPayload::default()
        } else {
            ItemPayload {
                values: item.values().clone(),
                refs: item
                    .ref_dicts()
                    .filter(|dict| !dict.is_empty())
                    .map(|dict| {
                        let entries = dict
                            .iter()
                            .map(|uuid| RefEntry {
                                uuid,
                                alias: dict.alias_of(uuid).map(str::to_string),
                            })
                            .collect();
                        (dict.name().to_string(), entries)
                    })
                    .collect(),
            }
        };
        let payload_text = serde_json::to_string(&payload).map_err(|err| {
            RepoError::InvalidData(format!("cannot encode item {}: {err}", item.id()))
        })?;

        self.conn.execute(
            "INSERT INTO item_versions (
                uuid,
                version,
                parent_uuid,
                name,
                kind,
                payload,
                is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                item.id().to_string(),
                version_to_db(version),
                item.parent().map(|id| id.to_string()),
                item.name(),
                self.schema.kind(item.kind()).path(),
                payload_text,
                i64::from(item.is_deleted()),
            ],
        )?;

        if !item.is_deleted() {
            self.conn.execute(
                "INSERT INTO item_text (rowid, body) VALUES (?1, ?2);",
                params![self.conn.last_insert_rowid(), item.text_body()],
            )?;
        }
        Ok(())
    }

    fn write_index_entry(
        &self,
        index: &str,
        id: ItemId,
        is_member: bool,
        version: Version,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO index_entries (index_name, uuid, version, is_member)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                index,
                id.to_string(),
                version_to_db(version),
                i64::from(is_member)
            ],
        )?;
        Ok(())
    }

    fn index_binding(&self, index: &str) -> RepoResult<Option<IndexBinding>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, recursive FROM declared_indexes WHERE name = ?1;")?;
        let mut rows = stmt.query(params![index])?;
        match rows.next()? {
            Some(row) => Ok(Some(IndexBinding {
                kind: row.get(0)?,
                recursive: row.get::<_, i64>(1)? != 0,
            })),
            None => Ok(None),
        }
    }

    fn record_index_binding(&self, index: &str, binding: &IndexBinding) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO declared_indexes (name, kind, recursive)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET
                 kind = excluded.kind,
                 recursive = excluded.recursive;",
            params![index, binding.kind, i64::from(binding.recursive)],
        )?;
        Ok(())
    }
}

pub(crate) fn version_to_db(version: Version) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

pub(crate) fn version_from_db(value: i64) -> RepoResult<Version> {
    Version::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("negative repository version `{value}`")))
}

pub(crate) fn parse_uuid(text: &str, column: &str) -> RepoResult<ItemId> {
    Uuid::parse_str(text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{text}` in {column}")))
}
