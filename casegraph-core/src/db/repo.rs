//! Database repository layer
//!
//! Provides query and insert operations for imported graphs and derived
//! tables.

use crate::error::{Error, Result};
use crate::format::{format_timestamp, parse_timestamp};
use crate::graph::{CaseGraph, GraphSource};
use crate::prefix::PrefixTable;
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // SourceFile operations
    // ============================================

    /// Get a source file by path
    pub fn get_source_file(&self, path: &str) -> Result<Option<SourceFile>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM source_files WHERE path = ?",
            [path],
            Self::row_to_source_file,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All imported source files, by path
    pub fn list_source_files(&self) -> Result<Vec<SourceFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM source_files ORDER BY path")?;
        let files = stmt
            .query_map([], Self::row_to_source_file)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    fn row_to_source_file(row: &Row) -> rusqlite::Result<SourceFile> {
        let path: String = row.get("path")?;
        Ok(SourceFile {
            path: PathBuf::from(path),
            content_hash: row.get("content_hash")?,
            size_bytes: row.get::<_, i64>("size_bytes")? as u64,
            imported_at: timestamp_column(row, "imported_at")?,
            event_count: row.get::<_, i64>("event_count")? as usize,
            edge_count: row.get::<_, i64>("edge_count")? as usize,
        })
    }

    /// Store one parsed graph file, replacing its previous events and edges.
    pub fn import_graph(&self, source: &SourceFile, events: &[Event], edges: &[Edge]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let path = source.path.to_string_lossy().to_string();

        tx.execute(
            r#"
            INSERT INTO source_files (path, content_hash, size_bytes, imported_at, event_count, edge_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size_bytes = excluded.size_bytes,
                imported_at = excluded.imported_at,
                event_count = excluded.event_count,
                edge_count = excluded.edge_count
            "#,
            params![
                path,
                source.content_hash,
                source.size_bytes as i64,
                format_timestamp(source.imported_at),
                source.event_count as i64,
                source.edge_count as i64,
            ],
        )?;
        tx.execute("DELETE FROM events WHERE source_path = ?", [&path])?;
        tx.execute("DELETE FROM edges WHERE source_path = ?", [&path])?;

        {
            let mut insert_event = tx.prepare(
                r#"
                INSERT INTO events (track_id, activity_id, event_name, start_time, finish_time, resource, source_path)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for event in events {
                insert_event.execute(params![
                    event.track_id,
                    event.activity_id,
                    event.event_name,
                    format_timestamp(event.start_time),
                    format_timestamp(event.finish_time),
                    event.resource,
                    path,
                ])?;
            }

            let mut insert_edge = tx.prepare(
                r#"
                INSERT INTO edges (track_id, node1, node2, event_name, source_path)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for edge in edges {
                insert_edge.execute(params![
                    edge.track_id,
                    edge.node1,
                    edge.node2,
                    edge.event_name,
                    path,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Number of stored events
    pub fn count_events(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
        Ok(Event {
            activity_id: row.get("activity_id")?,
            event_name: row.get("event_name")?,
            track_id: row.get("track_id")?,
            start_time: timestamp_column(row, "start_time")?,
            finish_time: timestamp_column(row, "finish_time")?,
            resource: row.get("resource")?,
        })
    }

    fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
        Ok(Edge {
            track_id: row.get("track_id")?,
            node1: row.get("node1")?,
            node2: row.get("node2")?,
            event_name: row.get("event_name")?,
        })
    }

    // ============================================
    // Prefix table operations
    // ============================================

    /// Replace the stored prefix table.
    pub fn replace_prefix_rows(&self, table: &PrefixTable) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM prefix_rows", [])?;

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO prefix_rows (seq, e_v, node1, node2, prefix_id, track_id, event_name, start_time, finish_time)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (seq, row) in table.rows().iter().enumerate() {
                insert.execute(params![
                    seq as i64,
                    row.e_v.as_str(),
                    row.node1,
                    row.node2,
                    row.prefix_id,
                    row.track_id,
                    row.event_name,
                    row.start_time.map(format_timestamp),
                    row.finish_time.map(format_timestamp),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(rows = table.rows().len(), "Stored prefix table");
        Ok(())
    }

    /// Load the stored prefix table in emission order.
    pub fn load_prefix_table(&self) -> Result<PrefixTable> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM prefix_rows ORDER BY seq")?;
        let rows = stmt
            .query_map([], Self::row_to_prefix_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(PrefixTable::from_rows(rows))
    }

    fn row_to_prefix_row(row: &Row) -> rusqlite::Result<PrefixRow> {
        let e_v: String = row.get("e_v")?;
        Ok(PrefixRow {
            e_v: e_v
                .parse()
                .map_err(|e: String| conversion_error(row, "e_v", e.into()))?,
            node1: row.get("node1")?,
            node2: row.get("node2")?,
            prefix_id: row.get("prefix_id")?,
            track_id: row.get("track_id")?,
            event_name: row.get("event_name")?,
            start_time: optional_timestamp_column(row, "start_time")?,
            finish_time: optional_timestamp_column(row, "finish_time")?,
        })
    }

    // ============================================
    // Timeline operations
    // ============================================

    /// Replace the stored reconciled timeline.
    pub fn replace_timeline(&self, timeline: &[TimelineEntry]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM timeline", [])?;

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO timeline (seq, track_id, activity_id, effective_start, effective_finish)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for (seq, entry) in timeline.iter().enumerate() {
                insert.execute(params![
                    seq as i64,
                    entry.track_id,
                    entry.activity_id,
                    format_timestamp(entry.effective_start),
                    format_timestamp(entry.effective_finish),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(rows = timeline.len(), "Stored timeline");
        Ok(())
    }

    /// Load the stored timeline in emission order.
    pub fn load_timeline(&self) -> Result<Vec<TimelineEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM timeline ORDER BY seq")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TimelineEntry {
                    track_id: row.get("track_id")?,
                    activity_id: row.get("activity_id")?,
                    effective_start: timestamp_column(row, "effective_start")?,
                    effective_finish: timestamp_column(row, "effective_finish")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ============================================
    // Run operations
    // ============================================

    /// Record a finished derivation run, returning its id.
    pub fn record_run(&self, run: &RunRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO runs (kind, started_at, finished_at, case_count, row_count, skipped_count, digest)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                run.kind.as_str(),
                format_timestamp(run.started_at),
                format_timestamp(run.finished_at),
                run.cases as i64,
                run.rows as i64,
                run.skipped as i64,
                run.digest,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent run of a kind
    pub fn latest_run(&self, kind: RunKind) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM runs WHERE kind = ? ORDER BY id DESC LIMIT 1",
            [kind.as_str()],
            Self::row_to_run,
        )
        .optional()
        .map_err(Error::from)
    }

    fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
        let kind: String = row.get("kind")?;
        Ok(RunRecord {
            kind: kind
                .parse()
                .map_err(|e: String| conversion_error(row, "kind", e.into()))?,
            started_at: timestamp_column(row, "started_at")?,
            finished_at: timestamp_column(row, "finished_at")?,
            cases: row.get::<_, i64>("case_count")? as usize,
            rows: row.get::<_, i64>("row_count")? as usize,
            skipped: row.get::<_, i64>("skipped_count")? as usize,
            digest: row.get("digest")?,
        })
    }
}

impl GraphSource for Database {
    fn track_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT track_id FROM events GROUP BY track_id ORDER BY MIN(id)")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn load_case(&self, track_id: &str) -> Result<CaseGraph> {
        let (events, edges) = {
            let conn = self.conn.lock().unwrap();
            let events = conn
                .prepare("SELECT * FROM events WHERE track_id = ? ORDER BY activity_id, id")?
                .query_map([track_id], Self::row_to_event)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let edges = conn
                .prepare("SELECT * FROM edges WHERE track_id = ? ORDER BY node1, node2")?
                .query_map([track_id], Self::row_to_edge)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            (events, edges)
        };
        CaseGraph::new(track_id, events, edges)
    }
}

fn conversion_error(
    row: &Row,
    column: &str,
    err: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err)
}

fn timestamp_column(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(column)?;
    parse_timestamp(&text).map_err(|e| conversion_error(row, column, Box::new(e)))
}

fn optional_timestamp_column(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(column)?;
    text.filter(|t| !t.is_empty())
        .map(|t| parse_timestamp(&t).map_err(|e| conversion_error(row, column, Box::new(e))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::PrefixBuilder;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn source(path: &str, hash: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(path),
            content_hash: hash.to_string(),
            size_bytes: 10,
            imported_at: at(0),
            event_count: 0,
            edge_count: 0,
        }
    }

    fn chain_events(track: &str, len: u32) -> (Vec<Event>, Vec<Edge>) {
        let events = (1..=len)
            .map(|i| {
                let name = if i == 1 { "START".to_string() } else { format!("A{}", i) };
                Event::instant(track, i, name, at(i as i64 * 10))
            })
            .collect();
        let edges = (1..len).map(|i| Edge::new(track, i, i + 1)).collect();
        (events, edges)
    }

    #[test]
    fn test_import_and_load_case() {
        let db = setup_db();
        let (events, edges) = chain_events("T1", 3);
        db.import_graph(&source("a.g", "h1"), &events, &edges).unwrap();

        assert_eq!(db.track_ids().unwrap(), vec!["T1"]);
        let case = db.load_case("T1").unwrap();
        assert_eq!(case.len(), 3);
        assert_eq!(case.successors(2), &[3]);
        assert_eq!(case.event(3).unwrap().finish_time, at(30));
    }

    #[test]
    fn test_missing_case() {
        let db = setup_db();
        assert!(matches!(db.load_case("nope"), Err(Error::MissingCase(_))));
    }

    #[test]
    fn test_reimport_replaces_file_contents() {
        let db = setup_db();
        let (events, edges) = chain_events("T1", 3);
        db.import_graph(&source("a.g", "h1"), &events, &edges).unwrap();
        let (events, edges) = chain_events("T2", 2);
        db.import_graph(&source("a.g", "h2"), &events, &edges).unwrap();

        assert_eq!(db.track_ids().unwrap(), vec!["T2"]);
        assert_eq!(db.count_events().unwrap(), 2);
        assert_eq!(db.get_source_file("a.g").unwrap().unwrap().content_hash, "h2");
        assert_eq!(db.list_source_files().unwrap().len(), 1);
    }

    #[test]
    fn test_cases_from_several_files() {
        let db = setup_db();
        let (events, edges) = chain_events("B", 2);
        db.import_graph(&source("b.g", "hb"), &events, &edges).unwrap();
        let (events, edges) = chain_events("A", 2);
        db.import_graph(&source("a.g", "ha"), &events, &edges).unwrap();

        // First appearance order, not alphabetical
        assert_eq!(db.track_ids().unwrap(), vec!["B", "A"]);
    }

    #[test]
    fn test_prefix_table_round_trip() {
        let db = setup_db();
        let (events, edges) = chain_events("T1", 4);
        let case = CaseGraph::new("T1", events, edges).unwrap();
        let mut table = PrefixTable::new();
        table.extend(PrefixBuilder::new().build_case(&case).unwrap());

        db.replace_prefix_rows(&table).unwrap();
        let loaded = db.load_prefix_table().unwrap();

        assert_eq!(loaded.rows(), table.rows());
        assert_eq!(loaded.digest(), table.digest());
        assert!(loaded.contains("T1_3"));
    }

    #[test]
    fn test_timeline_replace() {
        let db = setup_db();
        let entry = |id: u32| TimelineEntry {
            track_id: "T1".to_string(),
            activity_id: id,
            effective_start: at(0),
            effective_finish: at(id as i64),
        };
        db.replace_timeline(&[entry(1), entry(2)]).unwrap();
        db.replace_timeline(&[entry(1)]).unwrap();

        assert_eq!(db.load_timeline().unwrap(), vec![entry(1)]);
    }

    #[test]
    fn test_latest_run() {
        let db = setup_db();
        assert!(db.latest_run(RunKind::Prefixes).unwrap().is_none());

        let mut run = RunRecord {
            kind: RunKind::Prefixes,
            started_at: at(0),
            finished_at: at(1),
            cases: 2,
            rows: 10,
            skipped: 1,
            digest: Some("abc".to_string()),
        };
        db.record_run(&run).unwrap();
        run.rows = 12;
        db.record_run(&run).unwrap();

        let latest = db.latest_run(RunKind::Prefixes).unwrap().unwrap();
        assert_eq!(latest, run);
        assert!(db.latest_run(RunKind::Timeline).unwrap().is_none());
    }
}
