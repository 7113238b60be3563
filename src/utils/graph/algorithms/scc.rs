//! Strongly connected components (Tarjan's algorithm).
//!
//! Components are produced in reverse topological order of the condensation:
//! a component is emitted only after every component it can reach. The call
//! graph relies on this to process callees before their callers.

use std::collections::HashSet;

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of `graph`.
///
/// Every node appears in exactly one component. Components are ordered so
/// that edges only point to components earlier in the result.
pub fn strongly_connected_components<G: Successors>(graph: &G) -> Vec<Vec<NodeId>> {
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);
    for node in graph.node_ids() {
        if state.index[node.index()].is_none() {
            state.visit(graph, node);
        }
    }
    state.components
}

/// Maps each node to its component and lists the edges between components.
///
/// Returns `(node_to_component, edges)` where every edge `(from, to)` joins
/// two different components and appears once.
pub fn condensation<G: Successors>(
    graph: &G,
    components: &[Vec<NodeId>],
) -> (Vec<usize>, Vec<(usize, usize)>) {
    let mut node_to_component = vec![0; graph.node_count()];
    for (component, nodes) in components.iter().enumerate() {
        for node in nodes {
            node_to_component[node.index()] = component;
        }
    }

    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for node in graph.node_ids() {
        let from = node_to_component[node.index()];
        for successor in graph.successors(node) {
            let to = node_to_component[successor.index()];
            if from != to && seen.insert((from, to)) {
                edges.push((from, to));
            }
        }
    }
    (node_to_component, edges)
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    next_index: usize,
    components: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(node_count: usize) -> Self {
        Self {
            index: vec![None; node_count],
            lowlink: vec![0; node_count],
            on_stack: vec![false; node_count],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn enter(&mut self, node: NodeId) {
        self.index[node.index()] = Some(self.next_index);
        self.lowlink[node.index()] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node.index()] = true;
    }

    /// Iterative version of the classic recursive `strongconnect`.
    fn visit<G: Successors>(&mut self, graph: &G, root: NodeId) {
        let mut frames: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();
        self.enter(root);
        frames.push((root, graph.successors(root).collect(), 0));

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            if frame.2 < frame.1.len() {
                let next = frame.1[frame.2];
                frame.2 += 1;
                match self.index[next.index()] {
                    None => {
                        self.enter(next);
                        frames.push((next, graph.successors(next).collect(), 0));
                    }
                    Some(index) if self.on_stack[next.index()] => {
                        self.lowlink[node.index()] = self.lowlink[node.index()].min(index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(parent) = frames.last() {
                let parent = parent.0;
                self.lowlink[parent.index()] =
                    self.lowlink[parent.index()].min(self.lowlink[node.index()]);
            }

            if Some(self.lowlink[node.index()]) == self.index[node.index()] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack[member.index()] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }
}
