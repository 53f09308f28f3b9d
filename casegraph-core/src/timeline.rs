//! Timeline reconciler
//!
//! Raw timestamps only say when each event finished. For time-window queries
//! every event needs an active window `[effective_start, effective_finish]`,
//! which this module derives per case:
//!
//! 1. `effective_finish` starts out as the recorded finish.
//! 2. `effective_start` is the recorded finish of the previous event in
//!    activity order, so a sequential case reads as one chain.
//! 3. At every fork (an event with several outgoing edges), processed in
//!    ascending activity order:
//!    - the fork's finish becomes the earliest start among its join targets
//!      (the successors of its branches); branches without a successor do not
//!      take part
//!    - every branch starts at the fork's corrected finish
//! 4. `START` begins and ends at its own timestamp. When it forks, its
//!    finish is kept and its branches start at that timestamp.
//!
//! A row whose finish would precede its start is raised to its start, so
//! every window is well formed.
//!
//! A fork none of whose branches continues is rejected with
//! [`Error::OrphanFork`]; there is nothing to measure its duration against.

use crate::error::{Error, Result};
use crate::graph::CaseGraph;
use crate::types::TimelineEntry;
use chrono::{DateTime, Utc};

/// Derives effective start/finish windows for the events of a case.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineReconciler;

impl TimelineReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Reconcile one case, one entry per event in activity order.
    pub fn reconcile(&self, case: &CaseGraph) -> Result<Vec<TimelineEntry>> {
        let nodes = case.nodes();

        let mut finish: Vec<DateTime<Utc>> = nodes.iter().map(|n| n.finish_time).collect();
        let mut start: Vec<DateTime<Utc>> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                if i == 0 || node.is_start() {
                    node.finish_time
                } else {
                    nodes[i - 1].finish_time
                }
            })
            .collect();

        for fork in case.forks() {
            let branches = case.successors(fork);

            let join_start = branches
                .iter()
                .flat_map(|&branch| case.successors(branch))
                .flat_map(|&target| case.indices_at(target))
                .map(|&i| start[i])
                .min()
                .ok_or_else(|| Error::OrphanFork {
                    track_id: case.track_id().to_string(),
                    activity_id: fork,
                })?;

            let mut fork_finish = join_start;
            for &i in case.indices_at(fork) {
                if !nodes[i].is_start() {
                    finish[i] = join_start.max(start[i]);
                }
                fork_finish = finish[i];
            }

            for &branch in branches {
                for &i in case.indices_at(branch) {
                    start[i] = fork_finish;
                }
            }

            tracing::trace!(
                track_id = case.track_id(),
                fork,
                branches = branches.len(),
                %fork_finish,
                "Fork reconciled"
            );
        }

        Ok(nodes
            .iter()
            .zip(start.into_iter().zip(finish))
            .map(|(node, (effective_start, effective_finish))| TimelineEntry {
                track_id: node.track_id.clone(),
                activity_id: node.activity_id,
                effective_start,
                effective_finish: effective_finish.max(effective_start),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Edge, Event};
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    /// Events finishing at the given minutes, named after their position.
    fn case(track: &str, finishes: &[i64], edges: &[(u32, u32)]) -> CaseGraph {
        let nodes = finishes
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                let name = if i == 0 {
                    "START".to_string()
                } else {
                    format!("A{}", i + 1)
                };
                Event::instant(track, i as u32 + 1, name, at(m))
            })
            .collect();
        let edges = edges
            .iter()
            .map(|&(a, b)| Edge::new(track, a, b))
            .collect();
        CaseGraph::new(track, nodes, edges).unwrap()
    }

    fn entry(timeline: &[TimelineEntry], id: u32) -> &TimelineEntry {
        timeline.iter().find(|e| e.activity_id == id).unwrap()
    }

    #[test]
    fn test_chain_uses_previous_finish() {
        let chain = case("T1", &[0, 10, 25], &[(1, 2), (2, 3)]);
        let timeline = TimelineReconciler::new().reconcile(&chain).unwrap();

        assert_eq!(timeline.len(), 3);
        assert_eq!(entry(&timeline, 1).effective_start, at(0));
        assert_eq!(entry(&timeline, 1).effective_finish, at(0));
        assert_eq!(entry(&timeline, 2).effective_start, at(0));
        assert_eq!(entry(&timeline, 2).effective_finish, at(10));
        assert_eq!(entry(&timeline, 3).effective_start, at(10));
        assert_eq!(entry(&timeline, 3).effective_finish, at(25));
    }

    #[test]
    fn test_fork_finish_is_minimum_join_start() {
        // 2 forks into 3 and 4, which rejoin at 5; branch 3 finishes first
        let forked = case(
            "T2",
            &[0, 10, 20, 30, 40],
            &[(1, 2), (2, 3), (2, 4), (3, 5), (4, 5)],
        );
        let timeline = TimelineReconciler::new().reconcile(&forked).unwrap();

        let fork = entry(&timeline, 2);
        let b3 = entry(&timeline, 3);
        let b4 = entry(&timeline, 4);
        let join = entry(&timeline, 5);

        assert_eq!(fork.effective_finish, join.effective_start);
        assert_eq!(b3.effective_start, fork.effective_finish);
        assert_eq!(b4.effective_start, fork.effective_finish);
        // 5 starts at the recorded finish of 4
        assert_eq!(fork.effective_finish, at(30));
    }

    #[test]
    fn test_branch_without_successor_is_excluded_from_minimum() {
        // 2 forks into 3 (dead end) and 4 -> 5
        let forked = case(
            "T3",
            &[0, 10, 15, 20, 30],
            &[(1, 2), (2, 3), (2, 4), (4, 5)],
        );
        let timeline = TimelineReconciler::new().reconcile(&forked).unwrap();

        // Only 5's start (the finish of 4) counts
        assert_eq!(entry(&timeline, 2).effective_finish, at(20));
        assert_eq!(entry(&timeline, 3).effective_start, at(20));
        assert_eq!(entry(&timeline, 4).effective_start, at(20));
    }

    #[test]
    fn test_orphan_fork() {
        let forked = case("T4", &[0, 10, 20, 30], &[(1, 2), (2, 3), (2, 4)]);
        let err = TimelineReconciler::new().reconcile(&forked).unwrap_err();
        assert!(matches!(
            err,
            Error::OrphanFork {
                activity_id: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_windows_are_well_formed() {
        let forked = case(
            "T5",
            &[0, 10, 20, 30, 40, 45, 50],
            &[(1, 2), (2, 3), (2, 4), (3, 5), (4, 5), (5, 6), (5, 7)],
        );
        // Fork at 5 without continuation is an orphan; drop that tail
        assert!(TimelineReconciler::new().reconcile(&forked).is_err());

        let forked = case(
            "T5",
            &[0, 10, 20, 30, 40],
            &[(1, 2), (2, 3), (2, 4), (3, 5), (4, 5)],
        );
        for row in TimelineReconciler::new().reconcile(&forked).unwrap() {
            assert!(
                row.effective_finish >= row.effective_start,
                "row {} finishes before it starts",
                row.activity_id
            );
        }
    }

    #[test]
    fn test_nested_forks() {
        // 1 -> 2 forks into 3 and 4; 3 forks into 5 and 6; all rejoin at 7
        let nested = case(
            "T6",
            &[0, 5, 10, 15, 20, 25, 30],
            &[
                (1, 2),
                (2, 3),
                (2, 4),
                (3, 5),
                (3, 6),
                (4, 7),
                (5, 7),
                (6, 7),
            ],
        );
        let timeline = TimelineReconciler::new().reconcile(&nested).unwrap();

        let outer = entry(&timeline, 2);
        let inner = entry(&timeline, 3);
        assert_eq!(inner.effective_start, outer.effective_finish);
        assert_eq!(entry(&timeline, 5).effective_start, inner.effective_finish);
        assert_eq!(entry(&timeline, 6).effective_start, inner.effective_finish);
        for row in &timeline {
            assert!(row.effective_finish >= row.effective_start);
        }
    }

    #[test]
    fn test_start_event_is_a_point() {
        let chain = case("T7", &[3, 10], &[(1, 2)]);
        let timeline = TimelineReconciler::new().reconcile(&chain).unwrap();
        let start = entry(&timeline, 1);
        assert_eq!(start.effective_start, start.effective_finish);
        assert_eq!(start.effective_start, at(3));
    }

    #[test]
    fn test_start_fork_stays_a_point() {
        // START forks into 2 and 3, which rejoin at 4
        let forked = case("T8", &[0, 10, 20, 30], &[(1, 2), (1, 3), (2, 4), (3, 4)]);
        let timeline = TimelineReconciler::new().reconcile(&forked).unwrap();

        let start = entry(&timeline, 1);
        assert_eq!(start.effective_start, at(0));
        assert_eq!(start.effective_finish, at(0));
        assert_eq!(entry(&timeline, 2).effective_start, at(0));
        assert_eq!(entry(&timeline, 3).effective_start, at(0));
        assert_eq!(entry(&timeline, 4).effective_start, at(20));
    }
}
