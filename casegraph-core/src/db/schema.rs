//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Imported event log
    r#"
    -- ============================================
    -- LAYER 1: Imported graph files
    -- ============================================

    CREATE TABLE IF NOT EXISTS source_files (
        path             TEXT PRIMARY KEY,
        content_hash     TEXT NOT NULL,
        size_bytes       INTEGER NOT NULL,
        imported_at      DATETIME NOT NULL,
        event_count      INTEGER NOT NULL,
        edge_count       INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        track_id         TEXT NOT NULL,
        activity_id      INTEGER NOT NULL,
        event_name       TEXT NOT NULL,
        start_time       DATETIME NOT NULL,
        finish_time      DATETIME NOT NULL,
        resource         TEXT,

        -- Lineage
        source_path      TEXT NOT NULL REFERENCES source_files(path) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS edges (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        track_id         TEXT NOT NULL,
        node1            INTEGER NOT NULL,
        node2            INTEGER NOT NULL,
        event_name       TEXT,

        -- Lineage
        source_path      TEXT NOT NULL REFERENCES source_files(path) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_events_case ON events(track_id, activity_id);
    CREATE INDEX IF NOT EXISTS idx_events_source ON events(source_path);
    CREATE INDEX IF NOT EXISTS idx_edges_case ON edges(track_id);
    CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_path);
    "#,
    // Version 2: Derived tables
    r#"
    -- ============================================
    -- LAYER 2: Derived (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS prefix_rows (
        seq              INTEGER PRIMARY KEY,
        e_v              TEXT NOT NULL,
        node1            INTEGER,
        node2            INTEGER,
        prefix_id        TEXT,
        track_id         TEXT,
        event_name       TEXT,
        start_time       DATETIME,
        finish_time      DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_prefix_rows_prefix ON prefix_rows(prefix_id);

    CREATE TABLE IF NOT EXISTS timeline (
        seq              INTEGER PRIMARY KEY,
        track_id         TEXT NOT NULL,
        activity_id      INTEGER NOT NULL,
        effective_start  DATETIME NOT NULL,
        effective_finish DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_timeline_case ON timeline(track_id, activity_id);

    CREATE TABLE IF NOT EXISTS runs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        kind             TEXT NOT NULL,
        started_at       DATETIME NOT NULL,
        finished_at      DATETIME NOT NULL,
        case_count       INTEGER NOT NULL,
        row_count        INTEGER NOT NULL,
        skipped_count    INTEGER NOT NULL,
        digest           TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_runs_kind ON runs(kind, id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "source_files",
            "events",
            "edges",
            "prefix_rows",
            "timeline",
            "runs",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_events_reference_source_files() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        let fk_list: Vec<String> = conn
            .prepare("PRAGMA foreign_key_list(events)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(2))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(
            fk_list.iter().any(|table| table == "source_files"),
            "events should reference source_files"
        );
    }
}
