//! Prefix builder
//!
//! For a case and a length `k` (`1 <= k < size`), the prefix is the sub-graph
//! induced by the events with `activity_id <= k`, plus a label row for the
//! event at `k + 1` when an edge reaches it from inside the prefix.
//!
//! ## Flattened layout
//!
//! Each prefix is emitted as:
//!
//! ```text
//! XP                                  separator
//! v  1  .  T_2  T  START  ...         vertices, ascending activity id
//! v  2  .  T_2  T  A      ...
//! e  1  2  T_2  T  START__A           edges, labelled from their endpoints
//! l  3  .  T_2  T  B      ...         successor label
//! ```
//!
//! Vertices always precede edges so an edge label can be read off rows that
//! are already present.
//!
//! ## Incremental construction
//!
//! [`PrefixBuilder::build_case`] walks `k` upward over the case arena. Edges
//! are pre-sorted by their larger endpoint so the induced edge set for `k` is
//! a slice, not a rescan.

use crate::error::{Error, Result};
use crate::export;
use crate::graph::CaseGraph;
use crate::types::{prefix_id, Edge, PrefixRow, RowKind, EDGE_LABEL_SEPARATOR};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ops::Range;

/// One prefix of one case, without its separator row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub prefix_id: String,
    pub track_id: String,
    /// Number of events in the prefix
    pub length: u32,
    /// `v` rows, then `e` rows, then `l` rows
    pub rows: Vec<PrefixRow>,
}

impl Prefix {
    /// Activity ids of the prefix's vertex rows.
    pub fn vertex_ids(&self) -> Vec<u32> {
        self.rows_of(RowKind::Vertex)
            .filter_map(|r| r.node1)
            .collect()
    }

    /// Rows of one kind.
    pub fn rows_of(&self, kind: RowKind) -> impl Iterator<Item = &PrefixRow> {
        self.rows.iter().filter(move |r| r.e_v == kind)
    }
}

/// Builds prefixes from case graphs.
#[derive(Debug, Clone, Default)]
pub struct PrefixBuilder {
    max_length: Option<u32>,
}

impl PrefixBuilder {
    /// Create a builder producing every prefix length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder that stops at prefixes of `max_length` events.
    pub fn with_max_length(max_length: Option<u32>) -> Self {
        Self { max_length }
    }

    /// Build every prefix of a case, shortest first.
    ///
    /// Fails with [`Error::AmbiguousEdgeLabel`] before emitting anything if
    /// any edge endpoint names more than one event; the case then contributes
    /// no rows at all.
    pub fn build_case(&self, case: &CaseGraph) -> Result<Vec<Prefix>> {
        let labels = EdgeLabels::resolve(case, case.edges())?;
        let by_reach = edges_by_reach(case.edges());

        let mut prefixes = Vec::new();
        for k in self.lengths(case) {
            let reach = by_reach.partition_point(|e| e.node1.max(e.node2) <= k);
            if let Some(prefix) = assemble(case, k, &by_reach[..reach], &labels) {
                prefixes.push(prefix);
            }
        }

        tracing::debug!(
            track_id = case.track_id(),
            prefixes = prefixes.len(),
            "Built case prefixes"
        );

        Ok(prefixes)
    }

    /// Build the prefix of length `k` alone.
    ///
    /// Returns `Ok(None)` when `k` is out of range or when the case does not
    /// hold exactly `k` events up to position `k`.
    pub fn build(&self, case: &CaseGraph, k: u32) -> Result<Option<Prefix>> {
        if !self.lengths(case).contains(&k) {
            return Ok(None);
        }
        let induced: Vec<&Edge> = edges_by_reach(case.edges())
            .into_iter()
            .filter(|e| e.node1.max(e.node2) <= k)
            .collect();
        let labels = EdgeLabels::resolve(case, induced.iter().copied())?;
        Ok(assemble(case, k, &induced, &labels))
    }

    fn lengths(&self, case: &CaseGraph) -> Range<u32> {
        let upper = case.len().saturating_sub(1);
        let upper = self.max_length.map_or(upper, |max| upper.min(max));
        1..upper + 1
    }
}

/// Edge endpoint names, resolved once per case.
struct EdgeLabels<'a> {
    names: HashMap<u32, &'a str>,
}

impl<'a> EdgeLabels<'a> {
    fn resolve<'e>(case: &'a CaseGraph, edges: impl IntoIterator<Item = &'e Edge>) -> Result<Self> {
        let mut names = HashMap::new();
        for edge in edges {
            for endpoint in [edge.node1, edge.node2] {
                if names.contains_key(&endpoint) {
                    continue;
                }
                let candidates = case.events_at(endpoint);
                if candidates.len() != 1 {
                    return Err(Error::AmbiguousEdgeLabel {
                        track_id: case.track_id().to_string(),
                        activity_id: endpoint,
                        candidates: candidates.len(),
                    });
                }
                names.insert(endpoint, candidates[0].event_name.as_str());
            }
        }
        Ok(Self { names })
    }

    fn label(&self, edge: &Edge) -> String {
        let name = |id: u32| self.names.get(&id).copied().unwrap_or_default();
        format!(
            "{}{}{}",
            name(edge.node1),
            EDGE_LABEL_SEPARATOR,
            name(edge.node2)
        )
    }
}

/// Edges ordered by the position at which they enter a prefix.
fn edges_by_reach(edges: &[Edge]) -> Vec<&Edge> {
    let mut sorted: Vec<&Edge> = edges.iter().collect();
    sorted.sort_by_key(|e| (e.node1.max(e.node2), e.node1, e.node2));
    sorted
}

fn assemble(case: &CaseGraph, k: u32, induced: &[&Edge], labels: &EdgeLabels) -> Option<Prefix> {
    let count = case.count_up_to(k);
    if count != k as usize {
        tracing::debug!(
            track_id = case.track_id(),
            k,
            count,
            "Induced node count differs from prefix length, skipping"
        );
        return None;
    }

    let track_id = case.track_id();
    let pid = prefix_id(track_id, k);
    let mut rows = Vec::with_capacity(count + induced.len() + 1);

    for node in &case.nodes()[..count] {
        rows.push(PrefixRow::node(RowKind::Vertex, &pid, node));
    }

    for edge in induced {
        rows.push(PrefixRow::edge(
            &pid,
            track_id,
            edge.node1,
            edge.node2,
            labels.label(edge),
        ));
    }

    let next = k + 1;
    if case.predecessors(next).iter().any(|&p| p <= k) {
        for successor in case.events_at(next) {
            rows.push(PrefixRow::node(RowKind::Label, &pid, successor));
        }
    } else {
        tracing::debug!(track_id, k, "No edge reaches the successor, prefix has no label");
    }

    Some(Prefix {
        prefix_id: pid,
        track_id: track_id.to_string(),
        length: k,
        rows,
    })
}

/// The flattened prefix table accumulated over a run.
///
/// Rows are append-only; each prefix is preceded by one `XP` row.
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    rows: Vec<PrefixRow>,
    /// prefix_id -> row range excluding the separator
    index: HashMap<String, Range<usize>>,
}

impl PrefixTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from previously flattened rows.
    pub fn from_rows(rows: Vec<PrefixRow>) -> Self {
        let mut index: HashMap<String, Range<usize>> = HashMap::new();
        let mut current: Option<(String, usize)> = None;

        for (i, row) in rows.iter().enumerate() {
            if row.e_v == RowKind::Separator {
                if let Some((pid, begin)) = current.take() {
                    index.insert(pid, begin..i);
                }
                continue;
            }
            if current.is_none() {
                if let Some(pid) = &row.prefix_id {
                    current = Some((pid.clone(), i));
                }
            }
        }
        if let Some((pid, begin)) = current {
            index.insert(pid, begin..rows.len());
        }

        Self { rows, index }
    }

    /// Append one prefix after a separator row.
    pub fn push(&mut self, prefix: Prefix) {
        self.rows.push(PrefixRow::separator());
        let begin = self.rows.len();
        self.rows.extend(prefix.rows);
        self.index.insert(prefix.prefix_id, begin..self.rows.len());
    }

    /// Append all prefixes of one case.
    pub fn extend(&mut self, prefixes: impl IntoIterator<Item = Prefix>) {
        for prefix in prefixes {
            self.push(prefix);
        }
    }

    /// All rows, separators included.
    pub fn rows(&self) -> &[PrefixRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<PrefixRow> {
        self.rows
    }

    /// Number of prefixes in the table.
    pub fn prefix_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, prefix_id: &str) -> bool {
        self.index.contains_key(prefix_id)
    }

    /// Rows of one prefix, without its separator.
    pub fn get(&self, prefix_id: &str) -> Option<&[PrefixRow]> {
        self.index
            .get(prefix_id)
            .map(|range| &self.rows[range.clone()])
    }

    /// SHA-256 of the table's flat-file rendering.
    ///
    /// Equal digests mean byte-identical prefix files.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for row in &self.rows {
            hasher.update(export::prefix_record(row).as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
