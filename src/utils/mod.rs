//! Shared utilities.
//!
//! [`graph`] holds the directed-graph abstraction used by both the control
//! flow of a method and the call graph, plus the dominator, SCC and
//! traversal algorithms over it.

pub mod graph;
