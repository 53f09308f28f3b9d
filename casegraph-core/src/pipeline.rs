//! Batch derivation over every case of a source
//!
//! Each run walks the source's cases in order and derives one table. A case
//! that fails with a structural error ([`Error::is_case_error`](crate::Error::is_case_error)) is logged,
//! recorded in the run result and skipped; the batch continues. Any other
//! error aborts the run.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use casegraph_core::pipeline;
//! use casegraph_core::prefix::PrefixBuilder;
//!
//! let run = pipeline::build_prefix_table(&db, &PrefixBuilder::new())?;
//! run.persist(&db, &config.output.prefix_path())?;
//! ```

use crate::db::Database;
use crate::error::Result;
use crate::export;
use crate::graph::{CaseGraph, GraphSource};
use crate::prefix::{PrefixBuilder, PrefixTable};
use crate::timeline::TimelineReconciler;
use crate::types::{RunKind, RunRecord, TimelineEntry};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Result of building the prefix table.
#[derive(Debug)]
pub struct PrefixRunResult {
    pub table: PrefixTable,
    /// Cases that contributed to the table
    pub cases_processed: usize,
    /// Skipped cases (track id → error message)
    pub skipped: Vec<(String, String)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PrefixRunResult {
    pub fn run_record(&self) -> RunRecord {
        RunRecord {
            kind: RunKind::Prefixes,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cases: self.cases_processed,
            rows: self.table.rows().len(),
            skipped: self.skipped.len(),
            digest: Some(self.table.digest()),
        }
    }

    /// Store the table, write it to `path` and record the run.
    pub fn persist(&self, db: &Database, path: &Path) -> Result<RunRecord> {
        db.replace_prefix_rows(&self.table)?;
        export::write_prefix_table(path, &self.table)?;
        let record = self.run_record();
        db.record_run(&record)?;
        Ok(record)
    }
}

/// Result of reconciling the timeline.
#[derive(Debug)]
pub struct TimelineRunResult {
    pub timeline: Vec<TimelineEntry>,
    /// Cases that contributed to the timeline
    pub cases_processed: usize,
    /// Skipped cases (track id → error message)
    pub skipped: Vec<(String, String)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TimelineRunResult {
    pub fn run_record(&self) -> RunRecord {
        RunRecord {
            kind: RunKind::Timeline,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cases: self.cases_processed,
            rows: self.timeline.len(),
            skipped: self.skipped.len(),
            digest: Some(timeline_digest(&self.timeline)),
        }
    }

    /// Store the timeline, write it to `path` and record the run.
    pub fn persist(&self, db: &Database, path: &Path) -> Result<RunRecord> {
        db.replace_timeline(&self.timeline)?;
        export::write_timeline(path, &self.timeline)?;
        let record = self.run_record();
        db.record_run(&record)?;
        Ok(record)
    }
}

/// SHA-256 of the timeline's flat-file rendering.
pub fn timeline_digest(timeline: &[TimelineEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in timeline {
        hasher.update(export::timeline_record(entry).as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Build the prefix table for every case of `source`.
pub fn build_prefix_table<S>(source: &S, builder: &PrefixBuilder) -> Result<PrefixRunResult>
where
    S: GraphSource + ?Sized,
{
    build_prefix_table_with_progress(source, builder, |_, _, _| {})
}

/// Build the prefix table with a progress callback.
///
/// The callback receives `(current_case_index, total_cases, track_id)` before
/// each case is processed.
pub fn build_prefix_table_with_progress<S, F>(
    source: &S,
    builder: &PrefixBuilder,
    on_progress: F,
) -> Result<PrefixRunResult>
where
    S: GraphSource + ?Sized,
    F: FnMut(usize, usize, &str),
{
    let started_at = Utc::now();
    let mut table = PrefixTable::new();

    let (cases_processed, skipped) = for_each_case(source, on_progress, |case| {
        table.extend(builder.build_case(case)?);
        Ok(())
    })?;

    tracing::info!(
        cases = cases_processed,
        skipped = skipped.len(),
        prefixes = table.prefix_count(),
        "Prefix table built"
    );

    Ok(PrefixRunResult {
        table,
        cases_processed,
        skipped,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Reconcile the timeline for every case of `source`.
pub fn reconcile_timeline<S>(source: &S) -> Result<TimelineRunResult>
where
    S: GraphSource + ?Sized,
{
    reconcile_timeline_with_progress(source, |_, _, _| {})
}

/// Reconcile the timeline with a progress callback.
pub fn reconcile_timeline_with_progress<S, F>(source: &S, on_progress: F) -> Result<TimelineRunResult>
where
    S: GraphSource + ?Sized,
    F: FnMut(usize, usize, &str),
{
    let started_at = Utc::now();
    let reconciler = TimelineReconciler::new();
    let mut timeline = Vec::new();

    let (cases_processed, skipped) = for_each_case(source, on_progress, |case| {
        timeline.extend(reconciler.reconcile(case)?);
        Ok(())
    })?;

    tracing::info!(
        cases = cases_processed,
        skipped = skipped.len(),
        rows = timeline.len(),
        "Timeline reconciled"
    );

    Ok(TimelineRunResult {
        timeline,
        cases_processed,
        skipped,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Load and process each case, skipping those with structural errors.
///
/// The whole case is derived before anything is kept, so a skipped case
/// never leaves partial rows behind.
fn for_each_case<S, F, P>(
    source: &S,
    mut on_progress: P,
    mut derive: F,
) -> Result<(usize, Vec<(String, String)>)>
where
    S: GraphSource + ?Sized,
    F: FnMut(&CaseGraph) -> Result<()>,
    P: FnMut(usize, usize, &str),
{
    let track_ids = source.track_ids()?;
    let total = track_ids.len();
    let mut processed = 0;
    let mut skipped = Vec::new();

    for (i, track_id) in track_ids.iter().enumerate() {
        on_progress(i, total, track_id);

        match source.load_case(track_id).and_then(|case| derive(&case)) {
            Ok(()) => processed += 1,
            Err(e) if e.is_case_error() => {
                tracing::warn!(track_id = %track_id, error = %e, "Skipping case");
                skipped.push((track_id.clone(), e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }

    Ok((processed, skipped))
}
