//! Core domain types for casegraph
//!
//! These types describe one event log as a set of per-case activity graphs and
//! the tables derived from it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Case / track** | One process instance; all events sharing a `track_id` |
//! | **Event** | One executed activity, positioned by its 1-based `activity_id` |
//! | **Edge** | A directly-follows relation between two events of the same case |
//! | **Fork** | An event with more than one outgoing edge (parallel branches start) |
//! | **Join** | A successor of a fork's branches, where parallel work hands off |
//! | **Prefix** | The first `k` events of a case plus the edge(s) among them |
//! | **Timeline** | Effective start/finish per event after fork/join reconciliation |
//!
//! Raw timestamps are kept on [`Event`]; reconciled ones live on
//! [`TimelineEntry`] so the two are never confused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reserved name of the first event of every case.
pub const START_EVENT: &str = "START";

/// Separator between the two endpoint names of an edge label.
pub const EDGE_LABEL_SEPARATOR: &str = "__";

// ============================================
// Event log
// ============================================

/// One executed activity inside a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 1-based position within the case
    pub activity_id: u32,
    /// Activity name; `START` marks the case's first event
    pub event_name: String,
    /// Case identifier
    pub track_id: String,
    /// Recorded start
    pub start_time: DateTime<Utc>,
    /// Recorded finish
    pub finish_time: DateTime<Utc>,
    /// Optional resource label
    pub resource: Option<String>,
}

impl Event {
    /// Create an event whose start and finish are the same instant.
    ///
    /// Graph files carry a single timestamp per vertex.
    pub fn instant(
        track_id: impl Into<String>,
        activity_id: u32,
        event_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            activity_id,
            event_name: event_name.into(),
            track_id: track_id.into(),
            start_time: at,
            finish_time: at,
            resource: None,
        }
    }

    /// Whether this is the case's first event.
    pub fn is_start(&self) -> bool {
        self.activity_id == 1
    }
}

/// A directly-follows relation between two events of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Case identifier
    pub track_id: String,
    /// Activity id of the predecessor
    pub node1: u32,
    /// Activity id of the successor
    pub node2: u32,
    /// Label carried by the source, typically `A__B`
    pub event_name: Option<String>,
}

impl Edge {
    pub fn new(track_id: impl Into<String>, node1: u32, node2: u32) -> Self {
        Self {
            track_id: track_id.into(),
            node1,
            node2,
            event_name: None,
        }
    }
}

/// An imported input file, fingerprinted by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Canonical path at import time (primary key)
    pub path: PathBuf,
    /// SHA-256 of the file content and any companion graph file, hex-encoded
    pub content_hash: String,
    pub size_bytes: u64,
    pub imported_at: DateTime<Utc>,
    /// Events accepted from this file
    pub event_count: usize,
    /// Edges accepted from this file
    pub edge_count: usize,
}

// ============================================
// Prefix table
// ============================================

/// Build the identifier of a case's prefix of length `k`.
pub fn prefix_id(track_id: &str, k: u32) -> String {
    format!("{}_{}", track_id, k)
}

/// Kind tag (`e_v` column) of a flattened prefix table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowKind {
    /// Prefix vertex
    #[serde(rename = "v")]
    Vertex,
    /// Prefix edge
    #[serde(rename = "e")]
    Edge,
    /// Successor label
    #[serde(rename = "l")]
    Label,
    /// Separator preceding each prefix
    #[serde(rename = "XP")]
    Separator,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Vertex => "v",
            RowKind::Edge => "e",
            RowKind::Label => "l",
            RowKind::Separator => "XP",
        }
    }
}

impl std::fmt::Display for RowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v" => Ok(RowKind::Vertex),
            "e" => Ok(RowKind::Edge),
            "l" => Ok(RowKind::Label),
            "XP" => Ok(RowKind::Separator),
            _ => Err(format!("unknown row kind: {}", s)),
        }
    }
}

/// One row of the flattened prefix table.
///
/// Columns unused by a row kind stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRow {
    pub e_v: RowKind,
    pub node1: Option<u32>,
    pub node2: Option<u32>,
    pub prefix_id: Option<String>,
    pub track_id: Option<String>,
    pub event_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl PrefixRow {
    /// The `XP` row written before each prefix.
    pub fn separator() -> Self {
        Self {
            e_v: RowKind::Separator,
            node1: None,
            node2: None,
            prefix_id: None,
            track_id: None,
            event_name: None,
            start_time: None,
            finish_time: None,
        }
    }

    /// A vertex or label row for `event` inside prefix `prefix_id`.
    pub fn node(kind: RowKind, prefix_id: &str, event: &Event) -> Self {
        Self {
            e_v: kind,
            node1: Some(event.activity_id),
            node2: None,
            prefix_id: Some(prefix_id.to_string()),
            track_id: Some(event.track_id.clone()),
            event_name: Some(event.event_name.clone()),
            start_time: Some(event.start_time),
            finish_time: Some(event.finish_time),
        }
    }

    /// An edge row with its derived `from__to` label.
    pub fn edge(prefix_id: &str, track_id: &str, node1: u32, node2: u32, label: String) -> Self {
        Self {
            e_v: RowKind::Edge,
            node1: Some(node1),
            node2: Some(node2),
            prefix_id: Some(prefix_id.to_string()),
            track_id: Some(track_id.to_string()),
            event_name: Some(label),
            start_time: None,
            finish_time: None,
        }
    }
}

// ============================================
// Timeline
// ============================================

/// Reconciled active window of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub track_id: String,
    pub activity_id: u32,
    pub effective_start: DateTime<Utc>,
    pub effective_finish: DateTime<Utc>,
}

/// A case found active in a query window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCaseRecord {
    pub track_id: String,
    /// Highest activity reached inside the window
    pub activity_id: u32,
    /// Identifier of the maximal active prefix
    pub prefix_id: String,
    /// Effective finish of the selected activity
    pub effective_finish: DateTime<Utc>,
}

// ============================================
// Runs
// ============================================

/// Which derivation a run performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Prefixes,
    Timeline,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Prefixes => "prefixes",
            RunKind::Timeline => "timeline",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefixes" => Ok(RunKind::Prefixes),
            "timeline" => Ok(RunKind::Timeline),
            _ => Err(format!("unknown run kind: {}", s)),
        }
    }
}

/// Summary of one derivation run, as stored in the `runs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Cases that contributed rows
    pub cases: usize,
    /// Rows written
    pub rows: usize,
    /// Cases skipped for structural errors
    pub skipped: usize,
    /// SHA-256 of the written table, when one is computed
    pub digest: Option<String>,
}
