//! Event graph model
//!
//! A [`CaseGraph`] holds one case as an arena of events sorted by
//! `activity_id` plus directly-follows adjacency lists keyed by activity id.
//! Every derived table (prefixes, reconciled timeline) is computed from this
//! representation, so lookups by position never rescan the log.
//!
//! ## Validation
//!
//! Construction checks that:
//! - at least one event carries the track id ([`Error::MissingCase`])
//! - the distinct activity ids are exactly `1..=n` ([`Error::InconsistentGraph`])
//! - every edge endpoint is one of those ids ([`Error::InconsistentGraph`])
//!
//! Duplicate activity ids are kept as-is. They make edge labels ambiguous and
//! are reported by the prefix builder, which is the only consumer that needs
//! a unique name per position.

use crate::error::{Error, Result};
use crate::types::{Edge, Event};

/// Anything that can hand out validated case graphs.
///
/// Implemented by the parsed graph file ([`GraphLog`](crate::ingest::GraphLog))
/// and by the SQLite store ([`Database`](crate::db::Database)).
pub trait GraphSource {
    /// All case ids, in a stable order.
    fn track_ids(&self) -> Result<Vec<String>>;

    /// Materialize one case.
    ///
    /// Fails with [`Error::MissingCase`] when no event carries `track_id`
    /// and with [`Error::InconsistentGraph`] when the events and edges do not
    /// form a valid case.
    fn load_case(&self, track_id: &str) -> Result<CaseGraph>;
}

/// One case as a validated directed graph.
#[derive(Debug, Clone)]
pub struct CaseGraph {
    track_id: String,
    /// Events sorted by activity id; duplicates stay adjacent
    nodes: Vec<Event>,
    /// Distinct edges sorted by (node1, node2)
    edges: Vec<Edge>,
    /// Arena indices per activity id (slot `id - 1`)
    by_id: Vec<Vec<usize>>,
    /// Successor activity ids per activity id (slot `id - 1`)
    outgoing: Vec<Vec<u32>>,
    /// Predecessor activity ids per activity id (slot `id - 1`)
    incoming: Vec<Vec<u32>>,
}

impl CaseGraph {
    /// Build and validate a case from its events and edges.
    pub fn new(track_id: &str, mut nodes: Vec<Event>, mut edges: Vec<Edge>) -> Result<Self> {
        nodes.retain(|n| n.track_id == track_id);
        if nodes.is_empty() {
            return Err(Error::MissingCase(track_id.to_string()));
        }
        nodes.sort_by_key(|n| n.activity_id);

        let mut by_id: Vec<Vec<usize>> = Vec::new();
        for (idx, node) in nodes.iter().enumerate() {
            let expected = by_id.len() as u32 + 1;
            let repeats_previous =
                node.activity_id > 0 && node.activity_id.checked_add(1) == Some(expected);
            if node.activity_id == expected {
                by_id.push(vec![idx]);
            } else if let Some(slot) = by_id.last_mut().filter(|_| repeats_previous) {
                slot.push(idx);
            } else {
                return Err(Error::inconsistent(
                    track_id,
                    format!(
                        "activity ids are not contiguous from 1: expected {}, found {}",
                        expected, node.activity_id
                    ),
                ));
            }
        }

        let size = by_id.len() as u32;
        edges.retain(|e| e.track_id == track_id);
        for edge in &edges {
            for endpoint in [edge.node1, edge.node2] {
                if endpoint == 0 || endpoint > size {
                    return Err(Error::inconsistent(
                        track_id,
                        format!(
                            "edge {} -> {} references unknown activity {}",
                            edge.node1, edge.node2, endpoint
                        ),
                    ));
                }
            }
            if edge.node1 == edge.node2 {
                return Err(Error::inconsistent(
                    track_id,
                    format!("self-loop on activity {}", edge.node1),
                ));
            }
        }
        edges.sort_by_key(|e| (e.node1, e.node2));
        edges.dedup_by_key(|e| (e.node1, e.node2));

        let mut outgoing = vec![Vec::new(); size as usize];
        let mut incoming = vec![Vec::new(); size as usize];
        for edge in &edges {
            outgoing[(edge.node1 - 1) as usize].push(edge.node2);
            incoming[(edge.node2 - 1) as usize].push(edge.node1);
        }

        tracing::trace!(
            track_id,
            nodes = nodes.len(),
            edges = edges.len(),
            "Case graph loaded"
        );

        Ok(Self {
            track_id: track_id.to_string(),
            nodes,
            edges,
            by_id,
            outgoing,
            incoming,
        })
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Number of distinct activities (the highest activity id).
    pub fn len(&self) -> u32 {
        self.by_id.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All events, sorted by activity id.
    pub fn nodes(&self) -> &[Event] {
        &self.nodes
    }

    /// All distinct edges, sorted by (node1, node2).
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Arena positions (indices into [`Self::nodes`]) of the events at `activity_id`.
    pub fn indices_at(&self, activity_id: u32) -> &[usize] {
        self.slot(&self.by_id, activity_id)
    }

    /// Every event recorded at `activity_id` (more than one means a duplicate).
    pub fn events_at(&self, activity_id: u32) -> Vec<&Event> {
        self.indices_at(activity_id)
            .iter()
            .map(|&idx| &self.nodes[idx])
            .collect()
    }

    /// The first event recorded at `activity_id`.
    pub fn event(&self, activity_id: u32) -> Option<&Event> {
        self.slot(&self.by_id, activity_id)
            .first()
            .map(|&idx| &self.nodes[idx])
    }

    /// The `START` event.
    pub fn start(&self) -> Option<&Event> {
        self.event(1)
    }

    /// Number of events whose activity id is at most `k`.
    pub fn count_up_to(&self, k: u32) -> usize {
        self.nodes.partition_point(|n| n.activity_id <= k)
    }

    /// Activity ids directly following `activity_id`.
    pub fn successors(&self, activity_id: u32) -> &[u32] {
        self.slot(&self.outgoing, activity_id)
    }

    /// Activity ids directly preceding `activity_id`.
    pub fn predecessors(&self, activity_id: u32) -> &[u32] {
        self.slot(&self.incoming, activity_id)
    }

    /// Activity ids with more than one outgoing edge, ascending.
    pub fn forks(&self) -> Vec<u32> {
        (1..=self.len())
            .filter(|&id| self.successors(id).len() > 1)
            .collect()
    }

    /// Whether the case has no parallel branches.
    pub fn is_sequential(&self) -> bool {
        self.outgoing.iter().all(|s| s.len() <= 1) && self.incoming.iter().all(|p| p.len() <= 1)
    }

    fn slot<'a, T>(&self, table: &'a [Vec<T>], activity_id: u32) -> &'a [T] {
        activity_id
            .checked_sub(1)
            .and_then(|i| table.get(i as usize))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn event(track: &str, id: u32, name: &str) -> Event {
        Event::instant(track, id, name, at(id as i64))
    }

    fn fork_case() -> CaseGraph {
        let nodes = vec![
            event("t2", 1, "START"),
            event("t2", 2, "A"),
            event("t2", 3, "B"),
            event("t2", 4, "C"),
            event("t2", 5, "D"),
        ];
        let edges = vec![
            Edge::new("t2", 1, 2),
            Edge::new("t2", 2, 3),
            Edge::new("t2", 2, 4),
            Edge::new("t2", 3, 5),
            Edge::new("t2", 4, 5),
        ];
        CaseGraph::new("t2", nodes, edges).unwrap()
    }

    #[test]
    fn test_adjacency() {
        let case = fork_case();
        assert_eq!(case.len(), 5);
        assert_eq!(case.successors(2), &[3, 4]);
        assert_eq!(case.predecessors(5), &[3, 4]);
        assert_eq!(case.forks(), vec![2]);
        assert!(!case.is_sequential());
        assert_eq!(case.start().unwrap().event_name, "START");
        assert!(case.successors(0).is_empty());
        assert!(case.successors(99).is_empty());
    }

    #[test]
    fn test_nodes_sorted_regardless_of_input_order() {
        let nodes = vec![event("t", 3, "B"), event("t", 1, "START"), event("t", 2, "A")];
        let edges = vec![Edge::new("t", 2, 3), Edge::new("t", 1, 2)];
        let case = CaseGraph::new("t", nodes, edges).unwrap();

        let ids: Vec<u32> = case.nodes().iter().map(|n| n.activity_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(case.edges()[0].node1, 1);
        assert!(case.is_sequential());
    }

    #[test]
    fn test_missing_case() {
        let err = CaseGraph::new("nope", vec![event("t", 1, "START")], vec![]).unwrap_err();
        assert!(matches!(err, Error::MissingCase(ref id) if id == "nope"));
    }

    #[test]
    fn test_gap_in_activity_ids() {
        let nodes = vec![event("caseA", 1, "START"), event("caseA", 3, "B")];
        let err = CaseGraph::new("caseA", nodes, vec![]).unwrap_err();
        assert!(matches!(err, Error::InconsistentGraph { .. }));
    }

    #[test]
    fn test_ids_must_start_at_one() {
        let nodes = vec![event("t", 2, "A"), event("t", 3, "B")];
        assert!(matches!(
            CaseGraph::new("t", nodes, vec![]),
            Err(Error::InconsistentGraph { .. })
        ));
    }

    #[test]
    fn test_largest_activity_id_is_rejected() {
        let nodes = vec![event("big", u32::MAX, "A")];
        assert!(matches!(
            CaseGraph::new("big", nodes, vec![]),
            Err(Error::InconsistentGraph { .. })
        ));

        let nodes = vec![event("big", 1, "START"), event("big", u32::MAX, "A")];
        assert!(matches!(
            CaseGraph::new("big", nodes, vec![]),
            Err(Error::InconsistentGraph { .. })
        ));
    }

    #[test]
    fn test_edge_to_unknown_activity() {
        let nodes = vec![event("t", 1, "START"), event("t", 2, "A")];
        let edges = vec![Edge::new("t", 2, 7)];
        let err = CaseGraph::new("t", nodes, edges).unwrap_err();
        match err {
            Error::InconsistentGraph { message, .. } => assert!(message.contains('7')),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let nodes = vec![event("t", 1, "START"), event("t", 2, "A")];
        let edges = vec![Edge::new("t", 1, 2), Edge::new("t", 1, 2)];
        let case = CaseGraph::new("t", nodes, edges).unwrap();
        assert_eq!(case.edges().len(), 1);
        assert_eq!(case.successors(1), &[2]);
    }

    #[test]
    fn test_duplicate_activity_ids_are_kept() {
        let nodes = vec![
            event("t", 1, "START"),
            event("t", 2, "A"),
            event("t", 2, "A2"),
            event("t", 3, "B"),
        ];
        let case = CaseGraph::new("t", nodes, vec![]).unwrap();
        assert_eq!(case.len(), 3);
        assert_eq!(case.events_at(2).len(), 2);
        assert_eq!(case.count_up_to(2), 3);
        assert_eq!(case.count_up_to(1), 1);
    }
}
