use itemstore_core::db::migrations::latest_version;
use itemstore_core::db::{open_db, open_db_in_memory, DbError, DEFAULT_BUSY_TIMEOUT_MS};
use rusqlite::Connection;

#[test]
fn in_memory_database_is_fully_migrated() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "repository_meta");
    assert_table_exists(&conn, "item_versions");
    assert_table_exists(&conn, "index_entries");
    assert_table_exists(&conn, "item_text");
    assert_table_exists(&conn, "declared_indexes");
}

#[test]
fn fresh_database_starts_at_version_zero() {
    let conn = open_db_in_memory().unwrap();
    let version: i64 = conn
        .query_row(
            "SELECT value FROM repository_meta WHERE key = 'version';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, 0);
}

#[test]
fn reopening_a_file_database_keeps_its_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.db");

    let first = open_db(&path, DEFAULT_BUSY_TIMEOUT_MS).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_db(&path, DEFAULT_BUSY_TIMEOUT_MS).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    assert_table_exists(&second, "item_versions");
}

#[test]
fn newer_schema_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path, DEFAULT_BUSY_TIMEOUT_MS).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
