//! Call graph of the methods being optimized.
//!
//! The call graph decides the order of the whole-program optimization. Its
//! strongly connected components are grouped into layers: a component is
//! placed one layer above the highest layer of any component it calls. All
//! methods of a layer can then be optimized in parallel, and the callees of a
//! method are always finalized in an earlier layer than the method itself,
//! except inside a recursive cycle.
//!
//! Virtual calls contribute an edge to the referenced method and to every
//! overriding implementation (class hierarchy analysis).

use std::{collections::HashMap, fmt};

use crate::{
    program::{MethodId, Program},
    utils::graph::{
        algorithms::{condensation, strongly_connected_components},
        AdjacencyGraph, NodeId, Successors,
    },
};

/// Aggregate numbers about a call graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallGraphStats {
    /// Number of methods in the graph.
    pub method_count: usize,
    /// Number of distinct caller-callee edges.
    pub edge_count: usize,
    /// Number of layers.
    pub layer_count: usize,
    /// Number of methods in the widest layer.
    pub widest_layer: usize,
    /// Number of methods that take part in recursion.
    pub recursive_methods: usize,
}

impl fmt::Display for CallGraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} methods, {} edges, {} layers (widest {}), {} recursive",
            self.method_count,
            self.edge_count,
            self.layer_count,
            self.widest_layer,
            self.recursive_methods
        )
    }
}

/// Call graph with its processing layers.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    methods: Vec<MethodId>,
    graph: AdjacencyGraph,
    components: Vec<Vec<NodeId>>,
    layers: Vec<Vec<MethodId>>,
}

impl CallGraph {
    /// Builds the call graph over every live method that still has input code.
    ///
    /// Methods whose code is already finalized, and calls to methods outside
    /// the graph (library methods), add no nodes.
    #[must_use]
    pub fn build(program: &Program) -> Self {
        let methods: Vec<MethodId> = program
            .method_ids()
            .into_iter()
            .filter(|&m| program.code(m).is_some_and(|code| !code.is_finalized()))
            .collect();
        Self::build_for(program, methods)
    }

    /// Builds the call graph restricted to `methods`.
    #[must_use]
    pub fn build_for(program: &Program, methods: Vec<MethodId>) -> Self {
        let node_of: HashMap<MethodId, NodeId> = methods
            .iter()
            .enumerate()
            .map(|(index, &method)| (method, NodeId::new(index)))
            .collect();

        let mut graph = AdjacencyGraph::with_nodes(methods.len());
        for (index, &caller) in methods.iter().enumerate() {
            let Some(code) = program.code(caller) else {
                continue;
            };
            for callee in code.invoked_methods(caller, program) {
                let mut targets = program.overriders(callee);
                targets.push(callee);
                for target in targets {
                    if let Some(&node) = node_of.get(&target) {
                        graph.add_edge(NodeId::new(index), node);
                    }
                }
            }
        }

        let components = strongly_connected_components(&graph);
        let (_, edges) = condensation(&graph, &components);

        // Components come callees first, so every callee layer is known
        // before its callers are visited.
        let mut callees_of: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
        for (from, to) in edges {
            callees_of[from].push(to);
        }
        let mut layer_of = vec![0usize; components.len()];
        for component in 0..components.len() {
            layer_of[component] = callees_of[component]
                .iter()
                .map(|&callee| layer_of[callee] + 1)
                .max()
                .unwrap_or(0);
        }

        let layer_count = layer_of.iter().copied().max().map_or(0, |max| max + 1);
        let mut layers: Vec<Vec<MethodId>> = vec![Vec::new(); layer_count];
        for (component, nodes) in components.iter().enumerate() {
            layers[layer_of[component]].extend(nodes.iter().map(|node| methods[node.index()]));
        }
        for layer in &mut layers {
            layer.sort_unstable();
        }

        Self {
            methods,
            graph,
            components,
            layers,
        }
    }

    /// Layers in processing order; each layer only calls into earlier layers
    /// or into itself.
    #[must_use]
    pub fn layers(&self) -> &[Vec<MethodId>] {
        &self.layers
    }

    /// Number of methods in the graph.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Returns true if the graph has no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Methods called by `caller` that are part of the graph.
    #[must_use]
    pub fn callees(&self, caller: MethodId) -> Vec<MethodId> {
        let Some(index) = self.methods.iter().position(|&m| m == caller) else {
            return Vec::new();
        };
        self.graph
            .successors(NodeId::new(index))
            .map(|node| self.methods[node.index()])
            .collect()
    }

    /// Methods that call themselves directly or through a cycle, sorted.
    #[must_use]
    pub fn recursive_methods(&self) -> Vec<MethodId> {
        let mut recursive: Vec<MethodId> = self
            .components
            .iter()
            .filter(|nodes| match nodes.as_slice() {
                [single] => self.graph.successors(*single).any(|s| s == *single),
                _ => true,
            })
            .flatten()
            .map(|node| self.methods[node.index()])
            .collect();
        recursive.sort_unstable();
        recursive
    }

    /// Returns statistics about the call graph.
    #[must_use]
    pub fn stats(&self) -> CallGraphStats {
        CallGraphStats {
            method_count: self.methods.len(),
            edge_count: self.graph.edge_count(),
            layer_count: self.layers.len(),
            widest_layer: self.layers.iter().map(Vec::len).max().unwrap_or(0),
            recursive_methods: self.recursive_methods().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{InvokeKind, IrBuilder},
        program::{Class, ClassId, Code, Method},
    };

    fn body(method: MethodId, calls: &[MethodId]) -> Code {
        let mut b = IrBuilder::new(method);
        for &callee in calls {
            b.invoke(InvokeKind::Static, callee, &[], None);
        }
        b.ret(None);
        Code::from_ir(b.finish())
    }

    fn declare(program: &Program, class: ClassId, name: &str) -> MethodId {
        program.add_method(Method::new_static(class, name, Vec::new(), None))
    }

    #[test]
    fn test_layers_put_callees_first() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Main"));
        let leaf = declare(&program, class, "leaf");
        let middle = declare(&program, class, "middle");
        let top = declare(&program, class, "top");
        let other = declare(&program, class, "other");
        program.set_code(leaf, body(leaf, &[]));
        program.set_code(middle, body(middle, &[leaf]));
        program.set_code(top, body(top, &[middle, leaf]));
        program.set_code(other, body(other, &[leaf]));

        let graph = CallGraph::build(&program);
        assert_eq!(
            graph.layers(),
            &[vec![leaf], vec![middle, other], vec![top]]
        );
        assert_eq!(graph.stats().edge_count, 4);
        assert!(graph.recursive_methods().is_empty());
    }

    #[test]
    fn test_cycle_shares_a_layer() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Main"));
        let even = declare(&program, class, "even");
        let odd = declare(&program, class, "odd");
        let main = declare(&program, class, "main");
        program.set_code(even, body(even, &[odd]));
        program.set_code(odd, body(odd, &[even]));
        program.set_code(main, body(main, &[even]));
        declare(&program, class, "bodyless");

        let graph = CallGraph::build(&program);
        assert_eq!(graph.method_count(), 3);
        assert_eq!(graph.layers(), &[vec![even, odd], vec![main]]);
        assert_eq!(graph.recursive_methods(), vec![even, odd]);
        assert_eq!(graph.callees(main), vec![even]);
    }
}
