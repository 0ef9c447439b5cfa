//! Item repository schema, one migration per table family.
//!
//! | Version | Tables |
//! |---------|--------|
//! | 1 | `repository_meta` (committed version counter), `item_versions` (append-only item rows and tombstones) |
//! | 2 | `index_entries` (versioned index membership) |
//! | 3 | `item_text` (FTS5 text sharing rowids with `item_versions`) |
//! | 4 | `declared_indexes` (kind binding each index was last filled for) |
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - Pending migrations run in one transaction; a failure applies none.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "item_versions",
        sql: include_str!("0001_item_versions.sql"),
    },
    Migration {
        version: 2,
        name: "index_entries",
        sql: include_str!("0002_index_entries.sql"),
    },
    Migration {
        version: 3,
        name: "item_text",
        sql: include_str!("0003_item_text.sql"),
    },
    Migration {
        version: 4,
        name: "declared_indexes",
        sql: include_str!("0004_declared_indexes.sql"),
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings the repository tables up to `latest_version`.
///
/// # Errors
/// - `DbError::UnsupportedSchemaVersion` for a database written by a newer
///   binary.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS
        .iter()
        .filter(|migration| migration.version > current_version)
    {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            migration.version, migration.name
        );
    }
    tx.commit()?;

    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
