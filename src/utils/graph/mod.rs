//! Generic directed-graph abstractions.
//!
//! Both control-flow graphs and the call graph are exposed to the algorithms in
//! [`algorithms`] through the [`Successors`] trait. Nodes are dense indices
//! wrapped in [`NodeId`]; implementations may leave holes (removed blocks) as
//! long as a removed node reports no successors.

use std::fmt;

pub mod algorithms;

/// A strongly-typed node index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a node identifier from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index of this node.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Basic graph properties.
pub trait GraphBase {
    /// Upper bound of node indices in this graph.
    fn node_count(&self) -> usize;

    /// Iterates over all node identifiers.
    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.node_count()).map(NodeId::new)
    }
}

/// Forward edge traversal.
pub trait Successors: GraphBase {
    /// Iterates over the targets of the outgoing edges of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A plain adjacency-list graph.
///
/// Used where a graph is built once from some other structure (call graphs,
/// condensations) and then only queried.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    edges: Vec<Vec<NodeId>>,
}

impl AdjacencyGraph {
    /// Creates a graph with `node_count` nodes and no edges.
    #[must_use]
    pub fn with_nodes(node_count: usize) -> Self {
        Self {
            edges: vec![Vec::new(); node_count],
        }
    }

    /// Adds an edge unless it already exists.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let targets = &mut self.edges[from.index()];
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    /// Number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }
}

impl GraphBase for AdjacencyGraph {
    fn node_count(&self) -> usize {
        self.edges.len()
    }
}

impl Successors for AdjacencyGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.edges
            .get(node.index())
            .into_iter()
            .flat_map(|targets| targets.iter().copied())
    }
}
