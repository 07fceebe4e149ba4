//! Generalized dijkstra algorithm over an arbitrary [`Weight`].

use std::{cmp::Ordering, collections::BinaryHeap};

use petgraph::visit::{VisitMap, Visitable};

use super::{NodeId, NodeList, Topology};
use crate::{
    error::Error,
    flow::HostAddr,
    weight::{Weight, WeightCalc},
};

/// Compute the lowest-weight path from `source` to `target`, including both endpoints.
///
/// Edges are weighted by `calc`, and path weights are accumulated with [`Weight::combine`]. A node
/// that can only be reached with a non-viable weight is never expanded. Hosts other than `source`
/// are never used as transit nodes. Among paths of equal weight, the one found first wins.
pub fn shortest_path<W, C>(
    topo: &Topology,
    source: NodeId,
    target: NodeId,
    calc: &C,
) -> Result<Vec<NodeId>, Error>
where
    W: Weight,
    C: WeightCalc<W>,
{
    for n in [source, target] {
        if !topo.contains(n) {
            return Err(Error::UnknownNode(n));
        }
    }

    let mut visited = topo.graph.visit_map();
    let mut scores: NodeList<W> = NodeList::from_fn(&topo.graph, |_| W::non_viable());
    let mut prev: NodeList<Option<NodeId>> = NodeList::from_fn(&topo.graph, |_| None);
    let mut visit_next = BinaryHeap::new();
    scores[source] = W::initial();
    visit_next.push(MinScored(W::initial(), source));

    while let Some(MinScored(node_score, node)) = visit_next.pop() {
        if visited.is_visited(&node) {
            continue;
        }
        visited.visit(node);
        if node == target {
            break;
        }
        if node != source && topo.is_host(node) {
            continue;
        }
        for next in topo.graph.neighbors(node) {
            if visited.is_visited(&next) {
                continue;
            }
            let next_score = node_score.combine(&calc.edge_weight(node, next)?)?;
            if next_score.is_non_viable() {
                continue;
            }
            if next_score < scores[next] {
                scores[next] = next_score;
                prev[next] = Some(node);
                visit_next.push(MinScored(next_score, next));
            }
        }
    }

    if scores[target].is_non_viable() {
        return Err(Error::NoPathFound {
            from: source,
            to: target,
        });
    }

    let mut path = vec![target];
    let mut cur = target;
    while let Some(p) = prev[cur] {
        path.push(p);
        cur = p;
    }
    path.reverse();
    Ok(path)
}

/// Compute the lowest-weight path between two host-layer addresses. The addresses are first
/// resolved to their host vertices, which are part of the returned path.
pub fn shortest_path_between<W, C>(
    topo: &Topology,
    source: &HostAddr,
    target: &HostAddr,
    calc: &C,
) -> Result<Vec<NodeId>, Error>
where
    W: Weight,
    C: WeightCalc<W>,
{
    let source = topo.host_node(source)?;
    let target = topo.host_node(target)?;
    shortest_path(topo, source, target, calc)
}

/// `MinScored<K, T>` holds a score `K` and a scored object `T` in
/// a pair for use with a `BinaryHeap`.
///
/// `MinScored` compares in reverse order by the score, so that we can
/// use `BinaryHeap` as a min-heap to extract the score-value pair with the
/// least score.
#[derive(Copy, Clone, Debug)]
pub struct MinScored<K, T>(pub K, pub T);

impl<K: Ord, T> PartialEq for MinScored<K, T> {
    #[inline]
    fn eq(&self, other: &MinScored<K, T>) -> bool {
        self.0 == other.0
    }
}

impl<K: Ord, T> Eq for MinScored<K, T> {}

impl<K: Ord, T> PartialOrd for MinScored<K, T> {
    #[inline]
    fn partial_cmp(&self, other: &MinScored<K, T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for MinScored<K, T> {
    #[inline]
    fn cmp(&self, other: &MinScored<K, T>) -> Ordering {
        other.0.cmp(&self.0)
    }
}
