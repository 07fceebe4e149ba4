//! Weight calculators: turn a snapshot of the network state into node and edge weights.

use std::time::Duration;

use fixedbitset::FixedBitSet;
use log::{error, warn};

use super::{Bandwidth, CpuUsage, FlexWeight, HopCount, Weight};
use crate::{
    algorithms::{NodeId, NodeList, Topology},
    energy::EnergyTracker,
    error::Error,
    forecast::ForecastSource,
    telemetry::Telemetry,
};

/// Produces the weight of any node or edge. A calculator is built from a snapshot and never
/// changes afterwards.
pub trait WeightCalc<W: Weight> {
    /// Weight of a single node.
    fn node_weight(&self, n: NodeId) -> W;

    /// Weight of traversing the edge between `a` and `b`.
    fn edge_weight(&self, a: NodeId, b: NodeId) -> Result<W, Error>;
}

/// Calculator with all node weights computed up front. The weight of an edge is the combination
/// of both endpoint weights and one hop.
#[derive(Debug, Clone)]
pub struct SnapshotCalc<W> {
    nodes: NodeList<W>,
    hop: W,
}

impl<W: Weight> SnapshotCalc<W> {
    /// Compute the weight of each node in `topo` by calling `f`.
    pub fn from_fn<F: FnMut(NodeId) -> W>(topo: &Topology, hop: W, f: F) -> Self {
        Self {
            nodes: NodeList::from_fn(&topo.graph, f),
            hop,
        }
    }
}

impl<W: Weight> WeightCalc<W> for SnapshotCalc<W> {
    fn node_weight(&self, n: NodeId) -> W {
        self.nodes.get(n).copied().unwrap_or_else(W::non_viable)
    }

    fn edge_weight(&self, a: NodeId, b: NodeId) -> Result<W, Error> {
        self.node_weight(a).combine(&self.node_weight(b))?.combine(&self.hop)
    }
}

/// Wraps a calculator and forces a set of nodes to be non-viable.
#[derive(Debug, Clone)]
pub struct Excluding<'a, C> {
    inner: &'a C,
    excluded: FixedBitSet,
}

impl<'a, C> Excluding<'a, C> {
    /// Exclude all `nodes` from `inner`.
    pub fn new<I: IntoIterator<Item = NodeId>>(inner: &'a C, nodes: I) -> Self {
        let mut excluded = FixedBitSet::default();
        for n in nodes {
            excluded.grow(n.index() + 1);
            excluded.insert(n.index());
        }
        Self { inner, excluded }
    }

    /// Returns `true` if `n` is excluded.
    pub fn is_excluded(&self, n: NodeId) -> bool {
        self.excluded.contains(n.index())
    }
}

impl<W: Weight, C: WeightCalc<W>> WeightCalc<W> for Excluding<'_, C> {
    fn node_weight(&self, n: NodeId) -> W {
        if self.is_excluded(n) {
            W::non_viable()
        } else {
            self.inner.node_weight(n)
        }
    }

    fn edge_weight(&self, a: NodeId, b: NodeId) -> Result<W, Error> {
        if self.is_excluded(a) || self.is_excluded(b) {
            Ok(W::non_viable())
        } else {
            self.inner.edge_weight(a, b)
        }
    }
}

/// Read-only view of the network state at the start of a decision.
#[derive(Clone, Copy)]
pub struct Snapshot<'a> {
    /// The topology
    pub topo: &'a Topology,
    /// Live switch telemetry
    pub telemetry: &'a dyn Telemetry,
    /// Energy samples of all registered switches
    pub energy: &'a EnergyTracker,
    /// Energy budget forecast
    pub forecast: &'a dyn ForecastSource,
    /// Current simulation time
    pub now: Duration,
}

impl std::fmt::Debug for Snapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("now", &self.now).finish()
    }
}

/// Selects the metric a controller routes on.
pub trait WeightModel: std::fmt::Debug {
    /// The weight type
    type Weight: Weight;

    /// The weight added for each traversed edge.
    fn hop(&self) -> Self::Weight;

    /// Weight of a single node in the given snapshot.
    fn node_weight(&self, snapshot: &Snapshot<'_>, n: NodeId) -> Self::Weight;

    /// Build a calculator for the snapshot.
    fn calculator(&self, snapshot: &Snapshot<'_>) -> SnapshotCalc<Self::Weight> {
        SnapshotCalc::from_fn(snapshot.topo, self.hop(), |n| self.node_weight(snapshot, n))
    }
}

/// Route on the number of hops.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hops;

impl WeightModel for Hops {
    type Weight = HopCount;

    fn hop(&self) -> HopCount {
        HopCount(1)
    }

    fn node_weight(&self, _: &Snapshot<'_>, _: NodeId) -> HopCount {
        HopCount::initial()
    }
}

/// Route on the sum of CPU utilization of the traversed switches.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuLoad;

impl WeightModel for CpuLoad {
    type Weight = CpuUsage;

    fn hop(&self) -> CpuUsage {
        CpuUsage::initial()
    }

    fn node_weight(&self, s: &Snapshot<'_>, n: NodeId) -> CpuUsage {
        if s.topo.is_switch(n) {
            CpuUsage::new(s.telemetry.cpu_utilization(n))
        } else {
            CpuUsage::initial()
        }
    }
}

/// Route on the sum of the forwarding load of the traversed switches.
#[derive(Debug, Default, Clone, Copy)]
pub struct BandwidthLoad;

impl WeightModel for BandwidthLoad {
    type Weight = Bandwidth;

    fn hop(&self) -> Bandwidth {
        Bandwidth::initial()
    }

    fn node_weight(&self, s: &Snapshot<'_>, n: NodeId) -> Bandwidth {
        if s.topo.is_switch(n) {
            Bandwidth(s.telemetry.cpu_load(n))
        } else {
            Bandwidth::initial()
        }
    }
}

/// Route around switches that exceed their energy budget, then on hops and utilization.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnergyFlex;

impl WeightModel for EnergyFlex {
    type Weight = FlexWeight;

    fn hop(&self) -> FlexWeight {
        FlexWeight::new(0.0, 0, 1)
    }

    fn node_weight(&self, s: &Snapshot<'_>, n: NodeId) -> FlexWeight {
        if !s.topo.is_switch(n) {
            return FlexWeight::initial();
        }
        let margin = match s.energy.margin(s.topo, n, s.telemetry, s.forecast, s.now) {
            Ok(margin) => margin,
            Err(e @ Error::NotInitialized(_)) => {
                debug_assert!(false, "{e}");
                error!("{e}; assuming a margin of 0");
                0.0
            }
            Err(e) => {
                warn!("{e}; assuming a margin of 0");
                0.0
            }
        };
        FlexWeight::node(s.telemetry.cpu_utilization(n), margin < 0.0)
    }
}
