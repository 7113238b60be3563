//! Built-in IR optimization passes.
//!
//! Each pass operates on SSA form of one method and records its changes to
//! the shared [`EventLog`](crate::compiler::EventLog). The converter runs
//! them in a fixed order; see [`IrConverter`](crate::compiler::IrConverter).
//!
//! ## Value passes
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`ConstantPropagation`] | Sparse conditional constant propagation |
//! | [`MemberValuePropagation`] | Replaces reads of members with known values |
//! | [`AssertionsDisabler`] | Compiles out assertion checks |
//! | [`CommonSubexpressionEliminator`] | Reuses dominating pure computations |
//! | [`RedundantFieldLoadEliminator`] | Reuses known field contents |
//! | [`ConstantCanonicalizer`] | Shares one definition per constant |
//!
//! ## Control-flow passes
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`IfSimplifier`] | Folds decided branches |
//! | [`SwitchRewriter`] | Simplifies switches |
//! | [`NeverReturnsPruner`] | Cuts code after calls that always throw |
//! | [`DeadCodeRemover`] | Removes unreachable and unused code |
//!
//! ## Call and type passes
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`Devirtualizer`] | Binds dynamic calls with one target |
//! | [`MoveResultRewriter`] | Forwards returned arguments |
//! | [`LibraryCallRewriter`] | Rewrites well-known runtime calls |
//! | [`CastRemover`] | Removes proven casts and type tests |
//! | [`NonNullInserter`] / [`NonNullRemover`] | Tracks dereferenced values |
//!
//! ## Utility
//!
//! [`facts`] computes the per-method facts stored after finalization.

mod calls;
mod canonicalize;
mod constants;
mod cse;
mod deadcode;
pub mod facts;
mod fieldloads;
mod members;
mod nonnull;
mod simplify;

pub use calls::{Devirtualizer, LibraryCallRewriter, MoveResultRewriter, NeverReturnsPruner};
pub use canonicalize::{ConstantCanonicalizer, DebugLocalSimplifier, LiveRangeShortener};
pub use constants::ConstantPropagation;
pub use cse::CommonSubexpressionEliminator;
pub use deadcode::{constant_values, eliminate_dead_code, DeadCodeRemover, DeadCodeStats};
pub use fieldloads::RedundantFieldLoadEliminator;
pub use members::{AssertionsDisabler, ClassInitializerDefaults, MemberValuePropagation};
pub use nonnull::{NonNullInserter, NonNullRemover};
pub use simplify::{invert_conditionals, CastRemover, IfSimplifier, SwitchRewriter};
