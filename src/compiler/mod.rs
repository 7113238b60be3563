//! Per-method optimization pipeline and whole-program driver.
//!
//! # Architecture
//!
//! ```text
//! IrConverter::optimize
//!   ├─ CallGraph layers          callees before callers, parallel per layer
//!   │    └─ process(method)
//!   │         ├─ PassScheduler   fixed-order rewrite steps on SSA IR
//!   │         └─ finalize        facts, constraint, output code, snapshot
//!   ├─ layer barrier             publish staged snapshots
//!   ├─ double inline             revisit callers with late callee IR
//!   ├─ collaborator finalize
//!   ├─ outliner phase 2          synthesize outline class, rewrite callers
//!   └─ remove inlined methods    unreferenced and not kept
//! ```
//!
//! [`CompilerContext`] holds the state shared by all workers: the event log,
//! published and staged IR snapshots, inlining bookkeeping and outline
//! candidates. [`MethodContext`] is the per-method view handed to each
//! [`IrPass`].

mod classinliner;
mod collaborators;
mod context;
mod converter;
mod events;
mod inliner;
pub mod outliner;
mod pass;
pub mod passes;
mod scheduler;

pub use classinliner::{is_class_eligible, ClassInlineRejection, ClassInliner};
pub use collaborators::{CodeRewriter, CollaboratorPass, Collaborators, HookPoint};
pub use context::CompilerContext;
pub use converter::IrConverter;
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use inliner::{evaluate, inline_call, InlinePlan, InlineRejection, Inliner};
pub use pass::{InlineMode, IrPass, MethodContext};
pub use scheduler::PassScheduler;
