//! Ingestion layer for graph files and event logs
//!
//! Inputs are parsed into events and edges, either held in memory as a
//! [`GraphLog`] or imported into the [`Database`].
//!
//! Two input kinds are read:
//! - graph files (`v`/`e` lines), carrying events and edges
//! - event logs (`.csv` rows), carrying events with their own start, finish
//!   and resource. The edges of `orders.csv` come from the companion graph
//!   file `orders.g` when one exists; that graph file is then read only as
//!   part of the log and its vertex lines only place edges in their case.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   Graph files   │ ──► │ IngestCoordinator│ ──► │    Database     │
//! │ (v / e lines)   │     │                  │     │ (events, edges) │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                      ┌──────────────────┐
//!                      │ GraphFileParser  │
//!                      │ EventLogParser   │
//!                      └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use casegraph_core::{Config, Database};
//! use casegraph_core::ingest::IngestCoordinator;
//!
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//! let result = IngestCoordinator::new(&db).import_all(&["data/*.g".to_string()])?;
//! println!("Imported {} events from {} files", result.events_inserted, result.files_imported);
//! ```

mod event_log;
mod parser;

pub use event_log::EventLogParser;
pub use parser::{content_hash, GraphFileParser, ParseResult};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::graph::{CaseGraph, GraphSource};
use crate::types::{Edge, Event, SourceFile};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================
// Input files
// ============================================

/// Whether `path` names a comma-separated event log.
pub fn is_event_log(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// The graph file holding the edges of an event log, if present.
pub fn companion_graph(event_log: &Path) -> Option<PathBuf> {
    let graph = event_log.with_extension("g");
    graph.is_file().then_some(graph)
}

/// The file an input is read through.
///
/// A graph file with an event log of the same name beside it is read as that
/// log's companion, so both resolve to the log.
pub fn primary_input(path: &Path) -> PathBuf {
    if !is_event_log(path) {
        let event_log = path.with_extension("csv");
        if event_log.is_file() {
            return event_log;
        }
    }
    path.to_path_buf()
}

/// Read and parse one input file.
pub fn parse_input(path: &Path) -> Result<ParseResult> {
    let result = InputText::read(path)?.parse();

    tracing::debug!(
        path = %path.display(),
        events = result.events.len(),
        edges = result.edges.len(),
        rejected = result.errors.len(),
        "Parsed input file"
    );

    Ok(result)
}

/// Raw content of one input file.
struct InputText {
    text: String,
    event_log: bool,
    /// Content of the event log's companion graph file
    companion: Option<String>,
}

impl InputText {
    fn read(path: &Path) -> Result<Self> {
        let event_log = is_event_log(path);
        let companion = match event_log.then(|| companion_graph(path)).flatten() {
            Some(graph) => Some(read_text(&graph)?),
            None => None,
        };
        Ok(Self {
            text: read_text(path)?,
            event_log,
            companion,
        })
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn size_bytes(&self) -> u64 {
        (self.text.len() + self.companion.as_ref().map_or(0, String::len)) as u64
    }

    /// Hash over the file and its companion, so editing either reimports.
    fn content_hash(&self) -> String {
        match &self.companion {
            Some(graph) => content_hash(&format!("{}\0{}", self.text, graph)),
            None => content_hash(&self.text),
        }
    }

    fn parse(&self) -> ParseResult {
        if !self.event_log {
            return GraphFileParser::new().parse_str(&self.text);
        }

        let mut result = EventLogParser::new().parse_str(&self.text);
        if let Some(graph) = &self.companion {
            let graph = GraphFileParser::new().parse_str(graph);
            result.edges = graph.edges;
            result
                .errors
                .extend(graph.errors.into_iter().map(|e| match e {
                    Error::MalformedLine { line, message } => Error::MalformedLine {
                        line,
                        message: format!("in companion graph file: {}", message),
                    },
                    other => other,
                }));
        }
        result.content_hash = self.content_hash();
        result
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })
}

// ============================================
// In-memory source
// ============================================

/// Parsed graph files held in memory.
///
/// Cases are listed in order of first appearance.
#[derive(Debug, Default)]
pub struct GraphLog {
    order: Vec<String>,
    cases: HashMap<String, (Vec<Event>, Vec<Edge>)>,
    rejected: Vec<Error>,
}

impl GraphLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse graph file content into a log.
    pub fn parse(text: &str) -> Self {
        let mut log = Self::new();
        log.add(GraphFileParser::new().parse_str(text));
        log
    }

    /// Read and parse several input files into one log.
    ///
    /// An event log and its companion graph file are read once, whichever
    /// of the two is named.
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut log = Self::new();
        let mut seen = HashSet::new();
        for path in paths {
            let input = primary_input(path);
            if seen.insert(input.clone()) {
                log.add(parse_input(&input)?);
            }
        }
        Ok(log)
    }

    /// Merge one parse result into the log.
    pub fn add(&mut self, result: ParseResult) {
        for event in result.events {
            self.case_mut(&event.track_id).0.push(event);
        }
        for edge in result.edges {
            self.case_mut(&edge.track_id).1.push(edge);
        }
        self.rejected.extend(result.errors);
    }

    /// Lines rejected while parsing.
    pub fn rejected(&self) -> &[Error] {
        &self.rejected
    }

    pub fn event_count(&self) -> usize {
        self.cases.values().map(|(events, _)| events.len()).sum()
    }

    fn case_mut(&mut self, track_id: &str) -> &mut (Vec<Event>, Vec<Edge>) {
        if !self.cases.contains_key(track_id) {
            self.order.push(track_id.to_string());
        }
        self.cases.entry(track_id.to_string()).or_default()
    }
}

impl GraphSource for GraphLog {
    fn track_ids(&self) -> Result<Vec<String>> {
        Ok(self.order.clone())
    }

    fn load_case(&self, track_id: &str) -> Result<CaseGraph> {
        let (events, edges) = self
            .cases
            .get(track_id)
            .ok_or_else(|| Error::MissingCase(track_id.to_string()))?;
        CaseGraph::new(track_id, events.clone(), edges.clone())
    }
}

// ============================================
// Database import
// ============================================

/// Result of importing a set of input files.
#[derive(Debug, Default)]
pub struct ImportResult {
    /// Number of files parsed and stored
    pub files_imported: usize,
    /// Number of files skipped (unchanged or empty)
    pub files_skipped: usize,
    /// Number of events stored
    pub events_inserted: usize,
    /// Number of edges stored
    pub edges_inserted: usize,
    /// Errors encountered (file path → error message)
    pub errors: Vec<(PathBuf, String)>,
    /// Rejected lines and unmatched patterns
    pub warnings: Vec<String>,
}

/// Result of importing a single file.
#[derive(Debug)]
pub struct FileImportResult {
    pub path: PathBuf,
    pub events: usize,
    pub edges: usize,
    /// Rejected lines, prefixed with the file path
    pub warnings: Vec<String>,
    /// Reason the file was skipped (if skipped)
    pub skip_reason: Option<SkipReason>,
}

/// Reason a file was skipped during import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Content hash matches the last import
    Unchanged { content_hash: String },
    /// File is empty
    EmptyFile,
}

/// Imports input files into the database, skipping unchanged content.
pub struct IngestCoordinator<'a> {
    db: &'a Database,
}

impl<'a> IngestCoordinator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Import every file matched by `patterns`.
    pub fn import_all(&self, patterns: &[String]) -> Result<ImportResult> {
        self.import_all_with_progress(patterns, |_, _, _| {})
    }

    /// Import every file matched by `patterns` with a progress callback.
    ///
    /// The callback receives `(current_file_index, total_files, file_path)`
    /// before each file is processed.
    pub fn import_all_with_progress<F>(
        &self,
        patterns: &[String],
        mut on_progress: F,
    ) -> Result<ImportResult>
    where
        F: FnMut(usize, usize, &Path),
    {
        let mut result = ImportResult::default();
        let mut files = Vec::new();
        for pattern in patterns {
            let matched = discover_files(pattern)?;
            if matched.is_empty() {
                tracing::warn!(pattern = %pattern, "Pattern matched no files");
                result.warnings.push(format!("{}: matched no files", pattern));
            }
            files.extend(matched.iter().map(|path| primary_input(path)));
        }
        files.sort();
        files.dedup();

        let total = files.len();
        for (i, path) in files.iter().enumerate() {
            on_progress(i, total, path);

            match self.import_file(path) {
                Ok(file_result) => Self::update_result(&mut result, file_result),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Import failed");
                    result.errors.push((path.clone(), e.to_string()));
                }
            }
        }

        Ok(result)
    }

    fn update_result(result: &mut ImportResult, file_result: FileImportResult) {
        match &file_result.skip_reason {
            None => {
                result.files_imported += 1;
                result.events_inserted += file_result.events;
                result.edges_inserted += file_result.edges;
            }
            Some(reason) => {
                result.files_skipped += 1;
                tracing::debug!(
                    path = %file_result.path.display(),
                    reason = ?reason,
                    "File skipped"
                );
            }
        }
        result.warnings.extend(file_result.warnings);
    }

    /// Import one file, replacing whatever it contributed before.
    ///
    /// Files are keyed by canonical path, so every spelling of one file
    /// shares its stored content.
    pub fn import_file(&self, path: &Path) -> Result<FileImportResult> {
        let canonical = fs::canonicalize(primary_input(path))?;
        let path = canonical.as_path();
        let input = InputText::read(path)?;
        let key = path.to_string_lossy();

        let skipped = |reason| FileImportResult {
            path: path.to_path_buf(),
            events: 0,
            edges: 0,
            warnings: Vec::new(),
            skip_reason: Some(reason),
        };

        if input.is_blank() {
            return Ok(skipped(SkipReason::EmptyFile));
        }

        let hash = input.content_hash();
        if let Some(existing) = self.db.get_source_file(&key)? {
            if existing.content_hash == hash {
                return Ok(skipped(SkipReason::Unchanged { content_hash: hash }));
            }
        }

        let parsed = input.parse();
        let warnings = parsed
            .warnings()
            .into_iter()
            .map(|w| format!("{}: {}", path.display(), w))
            .collect();

        let source = SourceFile {
            path: path.to_path_buf(),
            content_hash: parsed.content_hash.clone(),
            size_bytes: input.size_bytes(),
            imported_at: Utc::now(),
            event_count: parsed.events.len(),
            edge_count: parsed.edges.len(),
        };
        self.db.import_graph(&source, &parsed.events, &parsed.edges)?;

        tracing::info!(
            path = %path.display(),
            events = source.event_count,
            edges = source.edge_count,
            rejected = parsed.errors.len(),
            "Imported input file"
        );

        Ok(FileImportResult {
            path: path.to_path_buf(),
            events: source.event_count,
            edges: source.edge_count,
            warnings,
            skip_reason: None,
        })
    }
}

/// Expand one path or glob pattern into regular files, sorted.
pub fn discover_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern)
        .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))?;

    let mut files: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
    files.sort();
    Ok(files)
}
