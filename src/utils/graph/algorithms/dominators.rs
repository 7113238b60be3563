//! Dominator trees.
//!
//! A node `d` dominates `n` if every path from the entry to `n` passes
//! through `d`. The tree is computed with the iterative algorithm of Cooper,
//! Harvey and Kennedy, which converges in a couple of rounds on reducible
//! control flow and needs nothing beyond a reverse postorder.

use crate::utils::graph::{
    algorithms::reverse_postorder,
    NodeId, Successors,
};

/// Immediate-dominator relation of a rooted graph.
///
/// Nodes not reachable from the entry have no dominator and are dominated by
/// nothing.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    idom: Vec<Option<NodeId>>,
    order: Vec<usize>,
}

impl DominatorTree {
    /// The root of the tree.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns true if `node` is reachable from the entry.
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.idom.get(node.index()).is_some_and(Option::is_some)
    }

    /// Immediate dominator of `node`; `None` for the entry and unreachable nodes.
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            return None;
        }
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns true if `a` dominates `b`. Every reachable node dominates itself.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Returns true if `a` dominates `b` and `a != b`.
    #[inline]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Children of `node` in the dominator tree, in reverse postorder.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self
            .idom
            .iter()
            .enumerate()
            .filter(|&(index, idom)| index != self.entry.index() && *idom == Some(node))
            .map(|(index, _)| NodeId::new(index))
            .collect();
        children.sort_by_key(|child| self.order[child.index()]);
        children
    }

    /// Reachable nodes in a preorder walk of the tree.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(node) = stack.pop() {
            result.push(node);
            let mut children = self.children(node);
            children.reverse();
            stack.extend(children);
        }
        result
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
pub fn compute_dominators<G: Successors>(graph: &G, entry: NodeId) -> DominatorTree {
    let node_count = graph.node_count();
    let rpo = reverse_postorder(graph, entry);

    let mut order = vec![usize::MAX; node_count];
    for (position, node) in rpo.iter().enumerate() {
        order[node.index()] = position;
    }

    let mut predecessors = vec![Vec::new(); node_count];
    for &node in &rpo {
        for successor in graph.successors(node) {
            if successor.index() < node_count {
                predecessors[successor.index()].push(node);
            }
        }
    }

    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    if entry.index() < node_count {
        idom[entry.index()] = Some(entry);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for &pred in &predecessors[node.index()] {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &order, pred, current),
                });
            }
            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    DominatorTree { entry, idom, order }
}

fn intersect(idom: &[Option<NodeId>], order: &[usize], a: NodeId, b: NodeId) -> NodeId {
    let mut finger_a = a;
    let mut finger_b = b;
    while finger_a != finger_b {
        while order[finger_a.index()] > order[finger_b.index()] {
            match idom[finger_a.index()] {
                Some(parent) => finger_a = parent,
                None => return finger_b,
            }
        }
        while order[finger_b.index()] > order[finger_a.index()] {
            match idom[finger_b.index()] {
                Some(parent) => finger_b = parent,
                None => return finger_a,
            }
        }
    }
    finger_a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::AdjacencyGraph;

    fn graph(nodes: usize, edges: &[(usize, usize)]) -> AdjacencyGraph {
        let mut graph = AdjacencyGraph::with_nodes(nodes);
        for &(from, to) in edges {
            graph.add_edge(NodeId::new(from), NodeId::new(to));
        }
        graph
    }

    #[test]
    fn test_diamond() {
        let g = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let tree = compute_dominators(&g, NodeId::new(0));
        assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(0)));
        assert!(!tree.dominates(NodeId::new(1), NodeId::new(3)));
        assert!(tree.dominates(NodeId::new(0), NodeId::new(3)));
        assert!(tree.dominates(NodeId::new(2), NodeId::new(2)));
        assert!(!tree.strictly_dominates(NodeId::new(2), NodeId::new(2)));
    }

    #[test]
    fn test_loop() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let g = graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let tree = compute_dominators(&g, NodeId::new(0));
        assert_eq!(tree.immediate_dominator(NodeId::new(2)), Some(NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(2)));
        assert_eq!(
            tree.preorder(),
            vec![NodeId::new(0), NodeId::new(1), NodeId::new(2), NodeId::new(3)]
        );
    }

    #[test]
    fn test_unreachable_node() {
        let g = graph(3, &[(0, 1), (2, 1)]);
        let tree = compute_dominators(&g, NodeId::new(0));
        assert!(!tree.is_reachable(NodeId::new(2)));
        assert!(!tree.dominates(NodeId::new(2), NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(1)), Some(NodeId::new(0)));
    }
}
