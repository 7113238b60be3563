//! Depth-first orderings.
//!
//! All traversals are iterative so that deep graphs (long chains of blocks
//! after aggressive inlining) cannot overflow the stack.

use crate::utils::graph::{NodeId, Successors};

/// Nodes reachable from `start`, in depth-first postorder.
///
/// Successors are visited in the order the graph yields them.
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut order = Vec::with_capacity(node_count);
    let mut stack: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

    visited[start.index()] = true;
    stack.push((start, graph.successors(start).collect()));

    while let Some((node, pending)) = stack.last_mut() {
        let node = *node;
        // Pop from the front to preserve the successor order.
        if pending.is_empty() {
            order.push(node);
            stack.pop();
            continue;
        }
        let next = pending.remove(0);
        if next.index() < node_count && !visited[next.index()] {
            visited[next.index()] = true;
            let successors = graph.successors(next).collect();
            stack.push((next, successors));
        }
    }

    order
}

/// Nodes reachable from `start`, in reverse postorder.
///
/// Every node appears before its successors, except along back edges.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}

/// Reachability bitmap indexed by node.
pub fn reachable<G: Successors>(graph: &G, start: NodeId) -> Vec<bool> {
    let mut seen = vec![false; graph.node_count()];
    if start.index() >= seen.len() {
        return seen;
    }
    let mut work = vec![start];
    seen[start.index()] = true;
    while let Some(node) = work.pop() {
        for next in graph.successors(node) {
            if next.index() < seen.len() && !seen[next.index()] {
                seen[next.index()] = true;
                work.push(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::AdjacencyGraph;

    fn diamond() -> AdjacencyGraph {
        let mut graph = AdjacencyGraph::with_nodes(5);
        graph.add_edge(NodeId::new(0), NodeId::new(1));
        graph.add_edge(NodeId::new(0), NodeId::new(2));
        graph.add_edge(NodeId::new(1), NodeId::new(3));
        graph.add_edge(NodeId::new(2), NodeId::new(3));
        graph
    }

    #[test]
    fn test_reverse_postorder_diamond() {
        let order = reverse_postorder(&diamond(), NodeId::new(0));
        assert_eq!(order.first(), Some(&NodeId::new(0)));
        assert_eq!(order.last(), Some(&NodeId::new(3)));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_unreachable_nodes_are_skipped() {
        let graph = diamond();
        let seen = reachable(&graph, NodeId::new(0));
        assert!(seen[3]);
        assert!(!seen[4]);
        assert!(!postorder(&graph, NodeId::new(0)).contains(&NodeId::new(4)));
    }

    #[test]
    fn test_loop_terminates() {
        let mut graph = AdjacencyGraph::with_nodes(3);
        graph.add_edge(NodeId::new(0), NodeId::new(1));
        graph.add_edge(NodeId::new(1), NodeId::new(2));
        graph.add_edge(NodeId::new(2), NodeId::new(1));
        let order = reverse_postorder(&graph, NodeId::new(0));
        assert_eq!(order, vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
    }
}
