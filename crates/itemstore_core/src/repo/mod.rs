//! Repository: the shared owner of the database connection and schema.
//!
//! # Responsibility
//! - Open the backing SQLite database and hand out `RepositoryView`s.
//! - Serialize all storage access through one connection lock.
//! - Define the umbrella `RepoError` returned by view and repository APIs.
//!
//! # Invariants
//! - Views never touch SQLite directly; they go through `with_store` or
//!   `with_transaction`.
//! - The committed version counter only changes inside a write transaction.

use crate::config::{ConfigError, RepositoryConfig};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::logging::init_logging;
use crate::model::item::{ItemId, Version};
use crate::query::QueryError;
use crate::schema::{Schema, SchemaError};
use crate::view::{RepositoryView, ViewError};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

pub mod store;

pub use store::{IndexBinding, ItemStore, SqliteItemStore};

pub type RepoResult<T> = Result<T, RepoError>;

/// Violations of two-sided reference consistency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefError {
    /// The referenced item does not exist or is deleted.
    DanglingReference {
        owner: ItemId,
        attribute: String,
        target: ItemId,
    },
    /// The referenced item is not of the attribute's target kind.
    KindMismatch {
        attribute: String,
        expected: String,
        found: String,
    },
    /// The referenced item's kind lacks the inverse attribute.
    MissingInverse {
        kind: String,
        attribute: String,
        other_name: String,
    },
    /// `owner.attribute` holds `target`, but the inverse side does not.
    OneSided {
        owner: ItemId,
        attribute: String,
        target: ItemId,
    },
}

impl Display for RefError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingReference {
                owner,
                attribute,
                target,
            } => write!(f, "{owner}.{attribute} references missing item {target}"),
            Self::KindMismatch {
                attribute,
                expected,
                found,
            } => write!(
                f,
                "attribute `{attribute}` references `{expected}` items, got `{found}`"
            ),
            Self::MissingInverse {
                kind,
                attribute,
                other_name,
            } => write!(
                f,
                "kind `{kind}` has no inverse `{other_name}` for attribute `{attribute}`"
            ),
            Self::OneSided {
                owner,
                attribute,
                target,
            } => write!(
                f,
                "{owner}.{attribute} references {target} without the inverse relation"
            ),
        }
    }
}

impl Error for RefError {}

/// Umbrella error for repository, view and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Schema(SchemaError),
    Ref(RefError),
    View(ViewError),
    Query(QueryError),
    Config(ConfigError),
    Logging(String),
    /// A stored row could not be decoded.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Ref(err) => write!(f, "{err}"),
            Self::View(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(message) => write!(f, "logging setup failed: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted item data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Ref(err) => Some(err),
            Self::View(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Logging(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for RepoError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<RefError> for RepoError {
    fn from(value: RefError) -> Self {
        Self::Ref(value)
    }
}

impl From<ViewError> for RepoError {
    fn from(value: ViewError) -> Self {
        Self::View(value)
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Shared repository handle. Views hold an `Arc` to it.
pub struct Repository {
    conn: Mutex<Connection>,
    schema: Arc<Schema>,
    location: String,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Opens (or creates) the repository described by `config`.
    ///
    /// Starts file logging first when `config.logging` is set.
    ///
    /// # Errors
    /// - `RepoError::Config` for settings rejected by `validate`.
    /// - `RepoError::Logging` when the logger cannot start.
    /// - `RepoError::Db` when opening or migrating the database fails, or
    ///   when refilling kind-bound indexes does.
    pub fn open(config: &RepositoryConfig, schema: Schema) -> RepoResult<Arc<Self>> {
        config.validate()?;
        if let Some(logging) = &config.logging {
            init_logging(logging).map_err(RepoError::Logging)?;
        }

        let (conn, location) = match &config.db_path {
            Some(path) => (
                open_db(path, config.busy_timeout_ms)?,
                path.display().to_string(),
            ),
            None => (open_db_in_memory()?, ":memory:".to_string()),
        };
        Self::from_connection(conn, schema, location)
    }

    /// Opens a fresh in-memory repository.
    pub fn open_in_memory(schema: Schema) -> RepoResult<Arc<Self>> {
        let conn = open_db_in_memory()?;
        Self::from_connection(conn, schema, ":memory:".to_string())
    }

    fn from_connection(
        conn: Connection,
        schema: Schema,
        location: String,
    ) -> RepoResult<Arc<Self>> {
        let repo = Self {
            conn: Mutex::new(conn),
            schema: Arc::new(schema),
            location,
        };
        repo.fill_declared_indexes()?;
        info!(
            "event=repository_open module=repo status=ok location={} kinds={}",
            repo.location,
            repo.schema.kinds().count()
        );
        Ok(Arc::new(repo))
    }

    /// Brings kind-bound indexes in line with the schema being opened.
    ///
    /// An index whose kind binding is new or changed since the last open is
    /// refilled from the items of its kinds. Entries are written as one new
    /// committed version, and only when membership actually changes.
    fn fill_declared_indexes(&self) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.with_transaction(|store| {
            let latest = store.current_version()?;
            let version = latest + 1;
            let mut refilled = 0usize;
            let mut entries = 0usize;

            for def in self.schema.indexes() {
                let binding = IndexBinding::from(def);
                if store.index_binding(&def.name)?.as_ref() == Some(&binding) {
                    continue;
                }
                if let Some(kind) = def.kind_id() {
                    let kinds: Vec<&str> = self
                        .schema
                        .kinds_covered_by(kind, def.recursive)
                        .into_iter()
                        .map(|kind| self.schema.kind(kind).path())
                        .collect();
                    let wanted: BTreeSet<ItemId> =
                        store.item_ids_of_kinds(&kinds, latest)?.into_iter().collect();
                    let present: BTreeSet<ItemId> =
                        store.index_members(&def.name, latest)?.into_iter().collect();
                    for id in wanted.difference(&present) {
                        store.write_index_entry(&def.name, *id, true, version)?;
                        entries += 1;
                    }
                    for id in present.difference(&wanted) {
                        store.write_index_entry(&def.name, *id, false, version)?;
                        entries += 1;
                    }
                    refilled += 1;
                }
                store.record_index_binding(&def.name, &binding)?;
            }

            if entries > 0 {
                store.set_current_version(version)?;
            }
            Ok((refilled, entries))
        });

        match result {
            Ok((refilled, entries)) => {
                if refilled > 0 {
                    info!(
                        "event=index_backfill module=repo status=ok indexes={refilled} entries={entries} duration_ms={}",
                        started_at.elapsed().as_millis()
                    );
                }
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=index_backfill module=repo status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Database path, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Latest committed repository version.
    pub fn current_version(&self) -> RepoResult<Version> {
        self.with_store(|store| store.current_version())
    }

    /// Opens a view pinned to the latest committed version.
    pub fn create_view(self: &Arc<Self>, name: impl Into<String>) -> RepoResult<RepositoryView> {
        let version = self.current_version()?;
        Ok(RepositoryView::new(name.into(), Arc::clone(self), version))
    }

    /// Runs `f` against the store outside any explicit transaction.
    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&SqliteItemStore<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let conn = self.lock()?;
        f(&SqliteItemStore::new(&conn, &self.schema))
    }

    /// Runs `f` inside an IMMEDIATE transaction, committing on `Ok`.
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&SqliteItemStore<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&SqliteItemStore::new(&tx, &self.schema))?;
        tx.commit()?;
        Ok(result)
    }

    /// Runs `f` with the raw connection, for read-only queries.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> RepoResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RepoError::Db(DbError::LockPoisoned))
    }
}
