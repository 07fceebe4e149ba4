//! Graph algorithms on the [`Topology`] of the controller.

use std::{borrow::Borrow, marker::PhantomData};

use petgraph::{prelude::*, stable_graph::IndexType, EdgeType};

pub mod dijkstra;
pub mod topology;

pub use dijkstra::{shortest_path, MinScored};
pub use topology::{EdgeId, Host, Link, NodeId, NodeKind, Switch, Topology, TopologyType};

/// Dense per-node storage, indexed by [`NodeIndex`].
#[derive(Clone, Debug, PartialEq)]
pub struct NodeList<T, Ix = TopologyType> {
    d: Vec<T>,
    ix: PhantomData<Ix>,
}

impl<I, T, Ix> std::ops::Index<I> for NodeList<T, Ix>
where
    I: Borrow<NodeIndex<Ix>>,
    Ix: IndexType,
{
    type Output = T;

    fn index(&self, idx: I) -> &Self::Output {
        &self.d[idx.borrow().index()]
    }
}

impl<I, T, Ix> std::ops::IndexMut<I> for NodeList<T, Ix>
where
    I: Borrow<NodeIndex<Ix>>,
    Ix: IndexType,
{
    fn index_mut(&mut self, idx: I) -> &mut Self::Output {
        &mut self.d[idx.borrow().index()]
    }
}

impl<T, Ix: IndexType> NodeList<T, Ix> {
    /// Build the list by evaluating `f` on every node of `graph`.
    pub fn from_fn<N, E, D, F>(graph: &Graph<N, E, D, Ix>, f: F) -> Self
    where
        D: EdgeType,
        F: FnMut(NodeIndex<Ix>) -> T,
    {
        Self {
            d: graph.node_indices().map(f).collect(),
            ix: PhantomData,
        }
    }

    /// Value of a node, `None` if the node is not part of the graph.
    pub fn get(&self, idx: impl Borrow<NodeIndex<Ix>>) -> Option<&T> {
        self.d.get(idx.borrow().index())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.d.len()
    }

    /// `true` for a graph without nodes.
    pub fn is_empty(&self) -> bool {
        self.d.is_empty()
    }
}
