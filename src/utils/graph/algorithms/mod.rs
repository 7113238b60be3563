//! Graph algorithms used by the optimizer.
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | Reverse postorder | O(V + E) | Forward data flow, block layout |
//! | Dominators | O(V + E) per round | SSA verification, value numbering |
//! | SCC | O(V + E) | Call graph layering |

mod dominators;
mod scc;
mod traversal;

pub use dominators::{compute_dominators, DominatorTree};
pub use scc::{condensation, strongly_connected_components};
pub use traversal::{postorder, reachable, reverse_postorder};
