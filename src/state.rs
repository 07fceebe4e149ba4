//! Flow state: the installed path of every flow, cross-indexed by the nodes that carry it.
//!
//! A flow appears in the set of node `n` if and only if `n` is an interior node (neither the
//! first nor the last) of the flow's installed path. Every mutation restores this before it
//! returns, and debug builds check it.

use std::collections::{BTreeSet, HashMap, HashSet};

use itertools::Itertools;

use crate::{algorithms::NodeId, error::Error, flow::Flow};

/// Interior nodes of a path.
fn interior(path: &[NodeId]) -> &[NodeId] {
    if path.len() <= 2 {
        &[]
    } else {
        &path[1..path.len() - 1]
    }
}

/// Flow table with the per-node flow index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowTable {
    paths: HashMap<Flow, Vec<NodeId>>,
    by_node: HashMap<NodeId, BTreeSet<Flow>>,
}

impl FlowTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flows
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if no flow is installed.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Store the switch-only path of a new flow. Installing a flow that already exists replaces its
    /// path.
    pub fn install(&mut self, flow: Flow, path: Vec<NodeId>) {
        self.replace(flow, path);
    }

    /// The installed path of the flow.
    pub fn lookup(&self, flow: &Flow) -> Option<&[NodeId]> {
        self.paths.get(flow).map(Vec::as_slice)
    }

    /// Returns `true` if the flow is installed.
    pub fn contains(&self, flow: &Flow) -> bool {
        self.paths.contains_key(flow)
    }

    /// Remove the flow from the table and from every node that carried it. Returns the path it
    /// had.
    pub fn evict(&mut self, flow: &Flow) -> Option<Vec<NodeId>> {
        let path = self.paths.remove(flow)?;
        for n in interior(&path) {
            self.unindex(*n, flow);
        }
        self.debug_check();
        Some(path)
    }

    /// Set the path of a flow, and move the flow between the node sets according to the interior
    /// nodes of the old and the new path. Returns the old path.
    pub fn replace(&mut self, flow: Flow, path: Vec<NodeId>) -> Option<Vec<NodeId>> {
        let new: HashSet<NodeId> = interior(&path).iter().copied().collect();
        let old = self.paths.insert(flow, path);
        if let Some(old) = old.as_ref() {
            for n in interior(old) {
                if !new.contains(n) {
                    self.unindex(*n, &flow);
                }
            }
        }
        for n in new {
            self.by_node.entry(n).or_default().insert(flow);
        }
        self.debug_check();
        old
    }

    fn unindex(&mut self, n: NodeId, flow: &Flow) {
        if let Some(set) = self.by_node.get_mut(&n) {
            set.remove(flow);
            if set.is_empty() {
                self.by_node.remove(&n);
            }
        }
    }

    /// Flows routed through `n` as an interior node, in flow order.
    pub fn flows_through(&self, n: NodeId) -> impl Iterator<Item = &Flow> + '_ {
        self.by_node.get(&n).into_iter().flatten()
    }

    /// Nodes carrying at least one flow, sorted.
    pub fn loaded_nodes(&self) -> Vec<NodeId> {
        self.by_node.keys().copied().sorted().collect()
    }

    /// Iterate over all flows and their paths.
    pub fn iter(&self) -> impl Iterator<Item = (&Flow, &[NodeId])> + '_ {
        self.paths.iter().map(|(f, p)| (f, p.as_slice()))
    }

    /// Verify that the node index matches the interior nodes of all paths.
    pub fn check_invariant(&self) -> Result<(), Error> {
        for (flow, path) in self.paths.iter() {
            for n in interior(path) {
                if !self.by_node.get(n).is_some_and(|s| s.contains(flow)) {
                    return Err(Error::InvariantViolation(format!(
                        "{flow} traverses {n:?} but is not indexed there"
                    )));
                }
            }
        }
        for (n, flows) in self.by_node.iter() {
            if flows.is_empty() {
                return Err(Error::InvariantViolation(format!("empty flow set at {n:?}")));
            }
            for flow in flows {
                let on_path = self
                    .paths
                    .get(flow)
                    .is_some_and(|p| interior(p).contains(n));
                if !on_path {
                    return Err(Error::InvariantViolation(format!(
                        "{flow} is indexed at {n:?} but does not traverse it"
                    )));
                }
            }
        }
        Ok(())
    }

    #[inline]
    fn debug_check(&self) {
        debug_assert!(
            self.check_invariant().is_ok(),
            "{:?}",
            self.check_invariant()
        );
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use proptest::prelude::*;

    use super::*;
    use crate::flow::HeaderFields;

    fn flow(port: u16) -> Flow {
        let ip = |x| Ipv4Addr::new(10, 0, 0, x);
        Flow::extract(&HeaderFields::tcp(ip(1), ip(2), port, 80)).unwrap()
    }

    fn n(i: u16) -> NodeId {
        NodeId::new(i as usize)
    }

    #[test]
    fn round_trip() {
        let mut t = FlowTable::new();
        let f = flow(1);
        let p = vec![n(0), n(1), n(2), n(3)];
        t.install(f, p.clone());
        assert_eq!(t.lookup(&f), Some(p.as_slice()));
        assert_eq!(t.flows_through(n(1)).collect::<Vec<_>>(), vec![&f]);
        assert_eq!(t.flows_through(n(0)).count(), 0);
        assert_eq!(t.flows_through(n(3)).count(), 0);
        assert_eq!(t.loaded_nodes(), vec![n(1), n(2)]);

        assert_eq!(t.evict(&f), Some(p));
        assert_eq!(t.lookup(&f), None);
        assert!(t.loaded_nodes().is_empty());
        assert!(t.is_empty());
        assert_eq!(t.evict(&f), None);
    }

    #[test]
    fn short_paths_have_no_interior() {
        let mut t = FlowTable::new();
        t.install(flow(1), vec![n(4)]);
        t.install(flow(2), vec![n(4), n(5)]);
        assert_eq!(t.len(), 2);
        assert!(t.loaded_nodes().is_empty());
        t.check_invariant().unwrap();
    }

    #[test]
    fn splice() {
        // [S, A, B, C, D] -> [S, A, X, D]
        let (s, a, b, c, d, x) = (n(0), n(1), n(2), n(3), n(4), n(5));
        let mut t = FlowTable::new();
        let f = flow(1);
        t.install(f, vec![s, a, b, c, d]);
        let old = t.replace(f, vec![s, a, x, d]);
        assert_eq!(old, Some(vec![s, a, b, c, d]));
        assert_eq!(t.lookup(&f), Some([s, a, x, d].as_slice()));
        assert_eq!(t.flows_through(b).count(), 0);
        assert_eq!(t.flows_through(c).count(), 0);
        assert_eq!(t.flows_through(x).collect::<Vec<_>>(), vec![&f]);
        assert_eq!(t.flows_through(a).collect::<Vec<_>>(), vec![&f]);
        // the old interior node becomes an endpoint
        t.replace(f, vec![a, x, d]);
        assert_eq!(t.flows_through(a).count(), 0);
        t.check_invariant().unwrap();
    }

    #[test]
    fn detects_violation() {
        let mut t = FlowTable::new();
        t.install(flow(1), vec![n(0), n(1), n(2)]);
        t.by_node.entry(n(7)).or_default().insert(flow(1));
        assert!(matches!(t.check_invariant(), Err(Error::InvariantViolation(_))));
        t.by_node.remove(&n(7));
        t.by_node.remove(&n(1));
        assert!(matches!(t.check_invariant(), Err(Error::InvariantViolation(_))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Install(u16, Vec<u16>),
        Evict(u16),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..8u16, proptest::collection::vec(0..12u16, 0..7)).prop_map(|(f, p)| Op::Install(f, p)),
            (0..8u16).prop_map(Op::Evict),
        ]
    }

    proptest! {
        #[test]
        fn invariant_holds(ops in proptest::collection::vec(op(), 0..50)) {
            let mut t = FlowTable::new();
            for op in ops {
                match op {
                    Op::Install(f, p) => {
                        let p: Vec<NodeId> = p.into_iter().map(n).collect();
                        t.replace(flow(f), p.clone());
                        prop_assert_eq!(t.lookup(&flow(f)), Some(p.as_slice()));
                    }
                    Op::Evict(f) => {
                        t.evict(&flow(f));
                        prop_assert!(t.lookup(&flow(f)).is_none());
                        for node in t.loaded_nodes() {
                            prop_assert!(t.flows_through(node).all(|x| *x != flow(f)));
                        }
                    }
                }
                prop_assert!(t.check_invariant().is_ok());
            }
        }
    }
}
