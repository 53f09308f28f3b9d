//! Flat-file writers for derived tables
//!
//! Both tables are written as comma-separated text with a header line.
//! Fields containing a comma, quote or line break are quoted, with embedded
//! quotes doubled. Unused columns are left empty.

use crate::active::ActivePrefix;
use crate::error::Result;
use crate::format::{format_timestamp, format_timestamp_opt};
use crate::prefix::PrefixTable;
use crate::types::{PrefixRow, TimelineEntry};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Header of the prefix table file.
pub const PREFIX_HEADER: &str = "e_v,node1,node2,prefix_id,track_id,event_name,start_time,finish_time";

/// Header of the reconciled timeline file.
pub const TIMELINE_HEADER: &str = "track_id,index,start_time_prefix,finish_time_last_activity";

/// Render one prefix table row, without a line terminator.
pub fn prefix_record(row: &PrefixRow) -> String {
    let fields = [
        row.e_v.as_str().to_string(),
        opt(row.node1),
        opt(row.node2),
        field(row.prefix_id.as_deref().unwrap_or_default()),
        field(row.track_id.as_deref().unwrap_or_default()),
        field(row.event_name.as_deref().unwrap_or_default()),
        format_timestamp_opt(row.start_time),
        format_timestamp_opt(row.finish_time),
    ];
    fields.join(",")
}

/// Render one timeline row, without a line terminator.
pub fn timeline_record(entry: &TimelineEntry) -> String {
    format!(
        "{},{},{},{}",
        field(&entry.track_id),
        entry.activity_id,
        format_timestamp(entry.effective_start),
        format_timestamp(entry.effective_finish)
    )
}

/// Write the prefix table to `path`, replacing any previous file.
pub fn write_prefix_table(path: &Path, table: &PrefixTable) -> Result<()> {
    write_lines(path, PREFIX_HEADER, table.rows().iter().map(prefix_record))?;
    tracing::info!(
        path = %path.display(),
        rows = table.rows().len(),
        prefixes = table.prefix_count(),
        "Wrote prefix table"
    );
    Ok(())
}

/// Write the reconciled timeline to `path`, replacing any previous file.
pub fn write_timeline(path: &Path, timeline: &[TimelineEntry]) -> Result<()> {
    write_lines(path, TIMELINE_HEADER, timeline.iter().map(timeline_record))?;
    tracing::info!(path = %path.display(), rows = timeline.len(), "Wrote timeline");
    Ok(())
}

/// Write the prefixes of active cases as a filtered prefix table.
///
/// Cases that had already reached their last event have no prefix and are
/// left out.
pub fn write_active_prefixes(path: &Path, active: &[ActivePrefix]) -> Result<()> {
    let in_progress: Vec<&ActivePrefix> = active.iter().filter(|a| a.is_in_progress()).collect();
    let rows = in_progress
        .iter()
        .flat_map(|a| std::iter::once(PrefixRow::separator()).chain(a.rows.iter().cloned()));
    write_lines(path, PREFIX_HEADER, rows.map(|row| prefix_record(&row)))?;
    tracing::info!(
        path = %path.display(),
        prefixes = in_progress.len(),
        "Wrote active prefixes"
    );
    Ok(())
}

/// Render active prefixes as pretty-printed JSON.
pub fn active_json(active: &[ActivePrefix]) -> Result<String> {
    Ok(serde_json::to_string_pretty(active)?)
}

fn write_lines(path: &Path, header: &str, lines: impl Iterator<Item = String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", header)?;
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

fn opt(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn field(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, RowKind};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn event(name: &str) -> Event {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();
        Event::instant("T1", 2, name, at)
    }

    #[test]
    fn test_vertex_record() {
        let row = PrefixRow::node(RowKind::Vertex, "T1_2", &event("A"));
        assert_eq!(
            prefix_record(&row),
            "v,2,,T1_2,T1,A,2024-01-01T09:30:00Z,2024-01-01T09:30:00Z"
        );
    }

    #[test]
    fn test_edge_and_separator_records() {
        let edge = PrefixRow::edge("T1_2", "T1", 1, 2, "START__A".to_string());
        assert_eq!(prefix_record(&edge), "e,1,2,T1_2,T1,START__A,,");
        assert_eq!(prefix_record(&PrefixRow::separator()), "XP,,,,,,,");
    }

    #[test]
    fn test_quoting() {
        let row = PrefixRow::node(RowKind::Label, "T1_1", &event("say \"hi\", then go"));
        assert!(prefix_record(&row).contains("\"say \"\"hi\"\", then go\""));
    }

    #[test]
    fn test_write_timeline_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("timeline.csv");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = vec![TimelineEntry {
            track_id: "T1".to_string(),
            activity_id: 1,
            effective_start: at,
            effective_finish: at,
        }];

        write_timeline(&path, &rows).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], TIMELINE_HEADER);
        assert_eq!(lines[1], "T1,1,2024-01-01T00:00:00Z,2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_active_json() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let active = vec![ActivePrefix {
            record: crate::types::ActiveCaseRecord {
                track_id: "T1".to_string(),
                activity_id: 2,
                prefix_id: "T1_2".to_string(),
                effective_finish: at,
            },
            rows: vec![PrefixRow::separator()],
        }];

        let json: serde_json::Value = serde_json::from_str(&active_json(&active).unwrap()).unwrap();
        assert_eq!(json[0]["record"]["prefix_id"], "T1_2");
        assert_eq!(json[0]["rows"][0]["e_v"], "XP");
    }

    #[test]
    fn test_write_active_prefixes_skips_completed_cases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("active.csv");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = |track: &str, id: u32| crate::types::ActiveCaseRecord {
            track_id: track.to_string(),
            activity_id: id,
            prefix_id: crate::types::prefix_id(track, id),
            effective_finish: at,
        };
        let active = vec![
            ActivePrefix {
                record: record("T1", 2),
                rows: vec![PrefixRow::node(RowKind::Vertex, "T1_2", &event("A"))],
            },
            ActivePrefix {
                record: record("T2", 3),
                rows: Vec::new(),
            },
        ];

        write_active_prefixes(&path, &active).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "XP,,,,,,,");
        assert!(lines[2].contains("T1_2"));
        assert!(!content.contains("T2"));
    }

    #[test]
    fn test_write_prefix_table_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefixes.csv");
        let table = PrefixTable::from_rows(vec![
            PrefixRow::separator(),
            PrefixRow::node(RowKind::Vertex, "T1_1", &event("START")),
        ]);

        write_prefix_table(&path, &table).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with(PREFIX_HEADER));
    }
}
