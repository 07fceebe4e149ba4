//! Module to represent the physical network as an arena of hosts and switches.

use std::{borrow::Borrow, collections::HashMap, net::Ipv4Addr};

use bimap::BiHashMap;
use itertools::Itertools;
use petgraph::prelude::*;

use crate::{
    error::Error,
    flow::{HostAddr, MacAddr},
};

/// The topology type for representing networks as graphs.
pub type TopologyType = u16;
/// The ID of a node within the graph.
pub type NodeId = NodeIndex<TopologyType>;
/// The ID of an edge within the graph.
pub type EdgeId = EdgeIndex<TopologyType>;

/// A host only originates and terminates flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Name of the host
    pub name: String,
    /// IPv4 address of the host, if it has an IP stack.
    pub ip: Option<Ipv4Addr>,
    /// Hardware address of the host.
    pub mac: MacAddr,
}

/// An OpenFlow switch, addressed by its datapath id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    /// Registered name, also used as the device id of the energy forecast.
    pub name: String,
    /// Datapath id
    pub dpid: u64,
}

/// The role of a vertex in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// An end host
    Host(Host),
    /// A forwarding switch
    Switch(Switch),
}

impl NodeKind {
    /// Name of the node, regardless of its role.
    pub fn name(&self) -> &str {
        match self {
            NodeKind::Host(h) => &h.name,
            NodeKind::Switch(s) => &s.name,
        }
    }
}

/// An undirected link. `ports[0]` is the port number on the edge source, `ports[1]` the one on
/// the edge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    ports: [u32; 2],
}

/// Physical topology, represented as an undirected graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// The topology, stored as an undirected graph.
    pub graph: Graph<NodeKind, Link, Undirected, TopologyType>,
    dpids: BiHashMap<u64, NodeId>,
    addrs: HashMap<HostAddr, NodeId>,
    next_port: HashMap<NodeId, u32>,
}

impl std::ops::Deref for Topology {
    type Target = Graph<NodeKind, Link, Undirected, TopologyType>;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host. The host becomes reachable both by its IP address (if any) and by its MAC
    /// address.
    pub fn add_host(
        &mut self,
        name: impl Into<String>,
        ip: Option<Ipv4Addr>,
        mac: MacAddr,
    ) -> NodeId {
        let id = self.graph.add_node(NodeKind::Host(Host {
            name: name.into(),
            ip,
            mac,
        }));
        if let Some(ip) = ip {
            self.addrs.insert(HostAddr::Ip(ip), id);
        }
        self.addrs.insert(HostAddr::Mac(mac), id);
        id
    }

    /// Add a switch with the given datapath id.
    pub fn add_switch(&mut self, name: impl Into<String>, dpid: u64) -> NodeId {
        let id = self.graph.add_node(NodeKind::Switch(Switch {
            name: name.into(),
            dpid,
        }));
        self.dpids.insert(dpid, id);
        id
    }

    /// Connect `a` and `b`. Port numbers are assigned on each node in the order in which links are
    /// added, starting at 1.
    pub fn add_link(&mut self, a: NodeId, b: NodeId) -> EdgeId {
        let pa = self.alloc_port(a);
        let pb = self.alloc_port(b);
        self.graph.add_edge(a, b, Link { ports: [pa, pb] })
    }

    /// Add all links from the iterator
    pub fn add_links_from<I: IntoIterator<Item = (NodeId, NodeId)>>(&mut self, links: I) {
        for (a, b) in links {
            self.add_link(a, b);
        }
    }

    fn alloc_port(&mut self, n: NodeId) -> u32 {
        let p = self.next_port.entry(n).or_insert(1);
        let port = *p;
        *p += 1;
        port
    }

    /// Check whether the node exists.
    pub fn contains(&self, n: impl Borrow<NodeId>) -> bool {
        self.graph.node_weight(*n.borrow()).is_some()
    }

    /// Check whether the node is a switch.
    pub fn is_switch(&self, n: impl Borrow<NodeId>) -> bool {
        matches!(self.graph.node_weight(*n.borrow()), Some(NodeKind::Switch(_)))
    }

    /// Check whether the node is a host.
    pub fn is_host(&self, n: impl Borrow<NodeId>) -> bool {
        matches!(self.graph.node_weight(*n.borrow()), Some(NodeKind::Host(_)))
    }

    /// Get the switch data of a node, if it is a switch.
    pub fn switch(&self, n: impl Borrow<NodeId>) -> Option<&Switch> {
        match self.graph.node_weight(*n.borrow()) {
            Some(NodeKind::Switch(s)) => Some(s),
            _ => None,
        }
    }

    /// Get the host data of a node, if it is a host.
    pub fn host(&self, n: impl Borrow<NodeId>) -> Option<&Host> {
        match self.graph.node_weight(*n.borrow()) {
            Some(NodeKind::Host(h)) => Some(h),
            _ => None,
        }
    }

    /// Name of the node (used for logging)
    pub fn name(&self, n: impl Borrow<NodeId>) -> &str {
        self.graph.node_weight(*n.borrow()).map(NodeKind::name).unwrap_or("?")
    }

    /// Datapath id of a switch node.
    pub fn dpid(&self, n: impl Borrow<NodeId>) -> Option<u64> {
        self.dpids.get_by_right(n.borrow()).copied()
    }

    /// Lookup the switch node from its datapath id.
    pub fn node_by_dpid(&self, dpid: u64) -> Result<NodeId, Error> {
        self.dpids.get_by_left(&dpid).copied().ok_or(Error::UnknownSwitch(dpid))
    }

    /// Iterate over all switches, in node order.
    pub fn switches(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices().filter(|n| self.is_switch(n))
    }

    /// Iterate over all hosts, in node order.
    pub fn hosts(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices().filter(|n| self.is_host(n))
    }

    /// All neighbors of `n`.
    pub fn neighbors_of(&self, n: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.neighbors(n)
    }

    /// Resolve a host-layer address to the host vertex carrying it.
    pub fn host_node(&self, addr: impl Borrow<HostAddr>) -> Result<NodeId, Error> {
        let addr = addr.borrow();
        self.addrs
            .get(addr)
            .copied()
            .ok_or_else(|| Error::UnresolvedAddress(addr.to_string()))
    }

    /// Resolve a host-layer address to the node the host is directly connected to.
    pub fn attachment(&self, addr: impl Borrow<HostAddr>) -> Result<NodeId, Error> {
        let addr = addr.borrow();
        let host = self.host_node(addr)?;
        self.graph
            .neighbors(host)
            .next()
            .ok_or_else(|| Error::UnresolvedAddress(addr.to_string()))
    }

    /// The port on `from` that connects to `to`.
    pub fn port_towards(&self, from: NodeId, to: NodeId) -> Option<u32> {
        let e = self.graph.find_edge(from, to)?;
        let (src, _) = self.graph.edge_endpoints(e)?;
        let link = self.graph.edge_weight(e)?;
        Some(if src == from {
            link.ports[0]
        } else {
            link.ports[1]
        })
    }

    /// Hosts directly attached to `switch`, along with the port on the switch.
    pub fn attached_hosts(&self, switch: NodeId) -> Vec<(NodeId, u32)> {
        self.graph
            .neighbors(switch)
            .filter(|n| self.is_host(n))
            .filter_map(|h| self.port_towards(switch, h).map(|p| (h, p)))
            .sorted()
            .collect()
    }

    /// Check that consecutive nodes of the path are adjacent.
    pub fn is_path(&self, path: &[NodeId]) -> bool {
        path.iter().tuple_windows().all(|(a, b)| self.graph.find_edge(*a, *b).is_some())
    }

    /// Format a path as a list of node names.
    pub fn fmt_path(&self, path: &[NodeId]) -> String {
        format!("[{}]", path.iter().map(|n| self.name(n)).join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ports_and_attachment() {
        let mut topo = Topology::new();
        let h0 = topo.add_host("h0", Some(Ipv4Addr::new(10, 0, 0, 1)), MacAddr::from(1));
        let s0 = topo.add_switch("s0", 0x10);
        let s1 = topo.add_switch("s1", 0x11);
        topo.add_link(h0, s0);
        topo.add_link(s0, s1);

        assert_eq!(topo.port_towards(s0, h0), Some(1));
        assert_eq!(topo.port_towards(s0, s1), Some(2));
        assert_eq!(topo.port_towards(s1, s0), Some(1));
        assert_eq!(topo.port_towards(h0, s1), None);

        let ip = HostAddr::Ip(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(topo.host_node(ip).unwrap(), h0);
        assert_eq!(topo.attachment(ip).unwrap(), s0);
        assert_eq!(topo.attachment(HostAddr::Mac(MacAddr::from(1))).unwrap(), s0);
        assert!(topo.attachment(HostAddr::Mac(MacAddr::from(2))).is_err());

        assert_eq!(topo.node_by_dpid(0x11).unwrap(), s1);
        assert_eq!(topo.dpid(s0), Some(0x10));
        assert_eq!(topo.attached_hosts(s0), vec![(h0, 1)]);
        assert!(topo.is_path(&[h0, s0, s1]));
        assert!(!topo.is_path(&[h0, s1]));
    }
}
