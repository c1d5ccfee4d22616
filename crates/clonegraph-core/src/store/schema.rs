//! SQLite schema DDL and migration framework for [`SqliteStore`].
//!
//! Records of every model share one table; their fields live in a JSON
//! column and are queried with `json_extract`. Many-to-many associations
//! live in `record_links`, keyed by the symmetric link key.
//!
//! [`SqliteStore`]: crate::store::sqlite::SqliteStore

use rusqlite::{params, Connection};
use tracing::info;

use crate::errors::CloneResult;

/// Version the migrations below bring a database to.
pub const SCHEMA_VERSION: i32 = 3;

/// Core DDL statements: 4 CREATE TABLE + 3 CREATE INDEX.
///
/// All of them use `IF NOT EXISTS`; replaying them on an existing store
/// changes nothing.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (4) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model TEXT NOT NULL,
        fields_json TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS record_links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        link_key TEXT NOT NULL,
        left_id INTEGER NOT NULL REFERENCES records(id),
        right_id INTEGER NOT NULL REFERENCES records(id),
        UNIQUE(link_key, left_id, right_id)
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (3) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_records_model ON records(model, id);",
    "CREATE INDEX IF NOT EXISTS idx_links_left ON record_links(link_key, left_id);",
    "CREATE INDEX IF NOT EXISTS idx_links_right ON record_links(link_key, right_id);",
];

type MigrationStep = fn(&Connection) -> CloneResult<()>;

/// `(target version, step)` in ascending order.
const MIGRATIONS: &[(i32, MigrationStep)] = &[
    (1, baseline),
    (2, add_records_updated_at),
    (3, index_links_by_right),
];

/// Apply the DDL and run pending migrations.
pub fn init_schema(conn: &Connection) -> CloneResult<()> {
    conn.execute_batch(&SCHEMA_STATEMENTS.join("\n"))?;
    migrate_schema(conn)
}

// ─── Migrations ─────────────────────────────────────────────────────────────

/// Bring the store from its recorded version up to [`SCHEMA_VERSION`].
///
/// Every step runs under its own SAVEPOINT: a failing step is undone, logged
/// to `migration_history` as failed, and its error returned. Steps that
/// already succeeded stay applied.
pub fn migrate_schema(conn: &Connection) -> CloneResult<()> {
    let start = get_schema_version(conn);
    for &(target, step) in MIGRATIONS.iter().filter(|(v, _)| *v > start) {
        let from = target - 1;
        conn.execute_batch("SAVEPOINT clonegraph_migrate_step;")?;
        let outcome = step(conn)
            .and_then(|_| set_schema_version(conn, target))
            .and_then(|_| record_migration_step(conn, from, target, "success", None));

        if let Err(e) = outcome {
            let _ = conn.execute_batch(
                "ROLLBACK TO SAVEPOINT clonegraph_migrate_step; \
                 RELEASE SAVEPOINT clonegraph_migrate_step;",
            );
            let _ = record_migration_step(conn, from, target, "failed", Some(&e.to_string()));
            return Err(e);
        }
        conn.execute_batch("RELEASE SAVEPOINT clonegraph_migrate_step;")?;
        info!(from, to = target, "store schema migrated");
    }
    Ok(())
}

/// Version recorded in `store_meta`, or 0 for a store that has none.
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> CloneResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from: i32,
    to: i32,
    status: &str,
    error: Option<&str>,
) -> CloneResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        params![from, to, status, error],
    )?;
    Ok(())
}

// ─── Steps ──────────────────────────────────────────────────────────────────

/// v1: the tables as first shipped.
fn baseline(_conn: &Connection) -> CloneResult<()> {
    Ok(())
}

/// v2: `updated_at` on records created before it existed.
fn add_records_updated_at(conn: &Connection) -> CloneResult<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(records);")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .collect();
    if !columns.iter().any(|c| c == "updated_at") {
        conn.execute_batch("ALTER TABLE records ADD COLUMN updated_at TEXT;")?;
    }
    Ok(())
}

/// v3: many-to-many lookups from the right-hand side.
fn index_links_by_right(conn: &Connection) -> CloneResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_links_right ON record_links(link_key, right_id);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_cover_every_version() {
        assert_eq!(SCHEMA_STATEMENTS.len(), 7);
        let targets: Vec<i32> = MIGRATIONS.iter().map(|(v, _)| *v).collect();
        assert_eq!(targets, (1..=SCHEMA_VERSION).collect::<Vec<_>>());
    }

    #[test]
    fn fresh_store_records_each_step() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }

    #[test]
    fn init_twice_is_harmless() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn v1_records_gain_updated_at() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE store_meta (key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE records (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 model TEXT NOT NULL,
                 fields_json TEXT NOT NULL,
                 created_at TEXT DEFAULT CURRENT_TIMESTAMP
             );
             INSERT INTO store_meta(key, value) VALUES ('schema_version', '1');",
        )
        .unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO records(model, fields_json, updated_at) VALUES ('A', '{}', 'now');",
            [],
        )
        .unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }
}
