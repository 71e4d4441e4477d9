//! Dual-pass shortest-path search.
//!
//! One graph, two cost functions: pass A weighs edges by distance, pass B by
//! the blended safety cost from the request's [`EdgeOverlay`].
//!
//! Labels are compared lexicographically on `(cost, hops)`, so among paths
//! with equal weight the one with fewer edges wins. Remaining ties keep the
//! label discovered first; since edge iteration order is fixed at graph build
//! time, results are stable across runs.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use petgraph::graph::{EdgeIndex, NodeIndex};

use crate::error::RouteError;
use crate::graph::{NavigationGraph, RoadEdge};
use crate::overlay::EdgeOverlay;

/// How many settled nodes between deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
    pub cost: f64,
}

impl Path {
    pub fn is_trivial(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Label {
    cost: f64,
    hops: u32,
}

impl Label {
    fn cmp_key(&self, other: &Label) -> Ordering {
        self.cost.total_cmp(&other.cost).then(self.hops.cmp(&other.hops))
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    label: Label,
    order: u64,
    node: NodeIndex,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label.cmp_key(&other.label).then(self.order.cmp(&other.order))
    }
}

/// Dijkstra from `from` to `to` under `weight`.
///
/// Fails with `NoRoute` when `to` is unreachable, `Timeout` when `deadline`
/// passes, and `Internal` if `weight` yields a negative or non-finite value.
pub fn shortest_path<F>(
    graph: &NavigationGraph,
    from: NodeIndex,
    to: NodeIndex,
    deadline: Instant,
    mut weight: F,
) -> Result<Path, RouteError>
where
    F: FnMut(EdgeIndex, &RoadEdge) -> f64,
{
    if from == to {
        return Ok(Path {
            nodes: vec![from],
            edges: vec![],
            cost: 0.0,
        });
    }

    let n = graph.node_count();
    let mut best: Vec<Option<Label>> = vec![None; n];
    let mut prev_edge: Vec<Option<(EdgeIndex, NodeIndex)>> = vec![None; n];
    let mut settled = vec![false; n];

    let mut order = 0u64;
    let mut heap = BinaryHeap::new();
    best[from.index()] = Some(Label { cost: 0.0, hops: 0 });
    heap.push(Reverse(QueueEntry {
        label: Label { cost: 0.0, hops: 0 },
        order,
        node: from,
    }));

    let mut pops = 0usize;
    while let Some(Reverse(QueueEntry { label, node, .. })) = heap.pop() {
        if settled[node.index()] {
            continue;
        }
        settled[node.index()] = true;

        if node == to {
            return Ok(reconstruct(&prev_edge, from, to, label.cost));
        }

        pops += 1;
        if pops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            return Err(RouteError::Timeout);
        }

        for (edge, target, data) in graph.neighbors(node) {
            if settled[target.index()] {
                continue;
            }
            let w = weight(edge, data);
            if !(w.is_finite() && w >= 0.0) {
                return Err(RouteError::Internal(format!(
                    "edge {} produced invalid weight {w}",
                    edge.index()
                )));
            }

            let candidate = Label {
                cost: label.cost + w,
                hops: label.hops + 1,
            };
            let improves = match &best[target.index()] {
                None => true,
                Some(current) => candidate.cmp_key(current) == Ordering::Less,
            };
            if improves {
                order += 1;
                best[target.index()] = Some(candidate);
                prev_edge[target.index()] = Some((edge, node));
                heap.push(Reverse(QueueEntry {
                    label: candidate,
                    order,
                    node: target,
                }));
            }
        }
    }

    Err(RouteError::NoRoute(format!(
        "no path connects node {} to node {}",
        from.index(),
        to.index()
    )))
}

fn reconstruct(prev_edge: &[Option<(EdgeIndex, NodeIndex)>], from: NodeIndex, to: NodeIndex, cost: f64) -> Path {
    let mut nodes = vec![to];
    let mut edges = Vec::new();
    let mut cur = to;
    while cur != from {
        let Some((edge, parent)) = prev_edge[cur.index()] else {
            break;
        };
        edges.push(edge);
        nodes.push(parent);
        cur = parent;
    }
    nodes.reverse();
    edges.reverse();
    Path { nodes, edges, cost }
}

/// Result of the two search passes over the same snapped endpoints.
#[derive(Debug, Clone)]
pub struct DualPath {
    pub shortest: Path,
    pub safest: Path,
}

pub fn dual_path(
    graph: &NavigationGraph,
    overlay: &mut EdgeOverlay<'_>,
    from: NodeIndex,
    to: NodeIndex,
    deadline: Instant,
) -> Result<DualPath, RouteError> {
    let shortest = shortest_path(graph, from, to, deadline, |_, edge| edge.distance_m)?;
    let safest = shortest_path(graph, from, to, deadline, |edge, _| overlay.blended_cost(edge))?;
    Ok(DualPath { shortest, safest })
}
