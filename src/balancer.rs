//! Partial path rerouting.
//!
//! A rebalance pass looks at every switch that carries flows and currently violates its energy
//! budget. For each flow through such a switch, only the violating segment of the installed path
//! is replaced: the segment reaches from the nearest non-violating switch before the violating
//! one to the nearest non-violating switch after it. The replacement must not revisit any node
//! outside of that segment.

use std::fmt::Display;

use log::{debug, info, warn};

use crate::{
    algorithms::{shortest_path, NodeId, Topology},
    error::Error,
    flow::Flow,
    rules::{delete_instructions, install_instructions, send_all, DpctlFormatter, RuleChannel},
    state::FlowTable,
    weight::{Excluding, Weight, WeightCalc},
};

/// Summary of a single rebalance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Switches that carry flows and violate their budget.
    pub violating: usize,
    /// Flows looked at.
    pub examined: usize,
    /// Flows that were moved to a new segment.
    pub rerouted: usize,
    /// Flows whose best segment is the installed one.
    pub unchanged: usize,
    /// Flows that were evicted or moved off the switch earlier in the pass.
    pub skipped: usize,
    /// Flows for which no replacement could be computed.
    pub failed: usize,
}

impl Display for RebalanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} violating switches, {} flows: {} rerouted, {} unchanged, {} skipped, {} failed",
            self.violating, self.examined, self.rerouted, self.unchanged, self.skipped, self.failed
        )
    }
}

/// What happened to a single flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Rerouted,
    Unchanged,
    Skipped,
}

/// Bounds of the segment that must be replaced around the violating node at index `i`.
///
/// Scans backwards from `i - 1` down to index 1, and forwards from `i + 1` up to the second to
/// last index, for the first node that does not violate. If there is none, the segment extends to
/// the end of the path.
pub fn segment_bounds<F>(path: &[NodeId], i: usize, violates: F) -> (usize, usize)
where
    F: Fn(NodeId) -> bool,
{
    let last = path.len().saturating_sub(1);
    let src = (1..i).rev().find(|j| !violates(path[*j])).unwrap_or(0);
    let dst = (i + 1..last).find(|j| !violates(path[*j])).unwrap_or(last);
    (src, dst)
}

/// Run a single rebalance pass over all flows in `table`, using the weights of `calc`.
///
/// The flows of all violating switches are collected before any of them is moved. A flow that no
/// longer traverses the switch when its turn comes is skipped. A flow that fails to reroute is
/// logged and left on its path, and the pass continues with the next flow.
pub fn rebalance<W, C>(
    topo: &Topology,
    table: &mut FlowTable,
    calc: &C,
    formatter: &DpctlFormatter,
    channel: &mut dyn RuleChannel,
) -> RebalanceReport
where
    W: Weight,
    C: WeightCalc<W>,
{
    let mut report = RebalanceReport::default();

    let work: Vec<(NodeId, Vec<Flow>)> = table
        .loaded_nodes()
        .into_iter()
        .filter(|n| calc.node_weight(*n).violates())
        .map(|n| (n, table.flows_through(n).copied().collect()))
        .collect();
    report.violating = work.len();

    for (v, flows) in work {
        debug!("{} violates its budget, carrying {} flows", topo.name(v), flows.len());
        for flow in flows {
            report.examined += 1;
            match reroute(topo, table, calc, formatter, channel, &flow, v) {
                Ok(Outcome::Rerouted) => report.rerouted += 1,
                Ok(Outcome::Unchanged) => report.unchanged += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!("Cannot reroute {flow} around {}: {e}", topo.name(v));
                    report.failed += 1;
                }
            }
        }
    }

    report
}

fn reroute<W, C>(
    topo: &Topology,
    table: &mut FlowTable,
    calc: &C,
    formatter: &DpctlFormatter,
    channel: &mut dyn RuleChannel,
    flow: &Flow,
    v: NodeId,
) -> Result<Outcome, Error>
where
    W: Weight,
    C: WeightCalc<W>,
{
    let Some(old) = table.lookup(flow) else {
        return Ok(Outcome::Skipped);
    };
    let Some(i) = old.iter().position(|n| *n == v) else {
        return Ok(Outcome::Skipped);
    };
    let old = old.to_vec();

    let (src, dst) = segment_bounds(&old, i, |n| calc.node_weight(n).violates());
    let excluded = old[..src].iter().chain(&old[dst + 1..]).copied();
    let segment =
        shortest_path::<W, _>(topo, old[src], old[dst], &Excluding::new(calc, excluded))?;

    let old_segment = &old[src..=dst];
    if segment == old_segment {
        return Ok(Outcome::Unchanged);
    }

    let removed: Vec<NodeId> = old_segment
        .iter()
        .filter(|n| !segment.contains(n))
        .copied()
        .collect();
    let installs = install_instructions(topo, &segment, flow)?;
    let deletes = delete_instructions(topo, &removed, flow)?;

    let mut path = Vec::with_capacity(old.len() - old_segment.len() + segment.len());
    path.extend_from_slice(&old[..src]);
    path.extend_from_slice(&segment);
    path.extend_from_slice(&old[dst + 1..]);

    info!(
        "Reroute {flow}: {} -> {}",
        topo.fmt_path(&old),
        topo.fmt_path(&path)
    );
    send_all(channel, formatter, installs.iter().chain(deletes.iter()));
    table.replace(*flow, path);

    Ok(Outcome::Rerouted)
}
