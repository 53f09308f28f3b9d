//! Active-case index
//!
//! Answers, for a reference window `[query_start, query_finish]`, which cases
//! were in flight and how far each had progressed. The index is a view over
//! the reconciled timeline: nothing it returns is stored as authoritative
//! state.
//!
//! Per case, the rows passing the [`WindowFilter`] are reduced to the one with
//! the latest effective finish (ties go to the higher activity id). That row's
//! activity id names the case's maximal active prefix.

use crate::error::{Error, Result};
use crate::format::format_timestamp;
use crate::prefix::PrefixTable;
use crate::types::{prefix_id, ActiveCaseRecord, PrefixRow, TimelineEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How timeline rows are matched against a query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFilter {
    /// Only the finish bound applies: `effective_finish <= query_finish`.
    ///
    /// Matches historical output, where the start comparison accepted every
    /// row.
    #[default]
    Inclusive,
    /// Windows must intersect: `effective_start <= query_finish` and
    /// `effective_finish >= query_start`.
    Overlap,
}

impl WindowFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowFilter::Inclusive => "inclusive",
            WindowFilter::Overlap => "overlap",
        }
    }

    fn matches(&self, row: &TimelineEntry, start: DateTime<Utc>, finish: DateTime<Utc>) -> bool {
        match self {
            WindowFilter::Inclusive => row.effective_finish <= finish,
            WindowFilter::Overlap => row.effective_start <= finish && row.effective_finish >= start,
        }
    }
}

impl std::fmt::Display for WindowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WindowFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inclusive" => Ok(WindowFilter::Inclusive),
            "overlap" => Ok(WindowFilter::Overlap),
            _ => Err(format!(
                "unknown window filter '{}' (expected inclusive or overlap)",
                s
            )),
        }
    }
}

/// Query view over a reconciled timeline.
#[derive(Debug, Clone, Copy)]
pub struct ActiveCaseIndex<'a> {
    timeline: &'a [TimelineEntry],
    filter: WindowFilter,
}

impl<'a> ActiveCaseIndex<'a> {
    pub fn new(timeline: &'a [TimelineEntry]) -> Self {
        Self {
            timeline,
            filter: WindowFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: WindowFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Maximal active record per case, sorted by track id.
    ///
    /// Cases with no qualifying row are absent from the result.
    pub fn query(
        &self,
        query_start: DateTime<Utc>,
        query_finish: DateTime<Utc>,
    ) -> Result<Vec<ActiveCaseRecord>> {
        if query_start > query_finish {
            return Err(Error::InvalidWindow(format!(
                "start {} is after finish {}",
                format_timestamp(query_start),
                format_timestamp(query_finish)
            )));
        }

        let mut best: BTreeMap<&str, &TimelineEntry> = BTreeMap::new();
        for row in self.timeline {
            if !self.filter.matches(row, query_start, query_finish) {
                continue;
            }
            best.entry(row.track_id.as_str())
                .and_modify(|current| {
                    if (row.effective_finish, row.activity_id)
                        > (current.effective_finish, current.activity_id)
                    {
                        *current = row;
                    }
                })
                .or_insert(row);
        }

        tracing::debug!(
            filter = %self.filter,
            rows = self.timeline.len(),
            cases = best.len(),
            "Active-case query evaluated"
        );

        Ok(best
            .into_values()
            .map(|row| ActiveCaseRecord {
                track_id: row.track_id.clone(),
                activity_id: row.activity_id,
                prefix_id: prefix_id(&row.track_id, row.activity_id),
                effective_finish: row.effective_finish,
            })
            .collect())
    }
}

/// An active case together with its prefix rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivePrefix {
    pub record: ActiveCaseRecord,
    /// Rows of the maximal prefix; empty when the case had already reached
    /// its last event, which has no prefix of its own
    pub rows: Vec<PrefixRow>,
}

impl ActivePrefix {
    /// Whether the case was still in progress at the window's end.
    pub fn is_in_progress(&self) -> bool {
        !self.rows.is_empty()
    }
}

/// Join active records against the prefix table.
pub fn maximal_prefixes(records: Vec<ActiveCaseRecord>, table: &PrefixTable) -> Vec<ActivePrefix> {
    records
        .into_iter()
        .map(|record| {
            let rows = table
                .get(&record.prefix_id)
                .map(|rows| rows.to_vec())
                .unwrap_or_default();
            ActivePrefix { record, rows }
        })
        .collect()
}
