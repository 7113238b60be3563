//! Finalized method bodies.
//!
//! After the pipeline a method leaves SSA form in one of two shapes:
//!
//! - [`RegisterCode`]: three-address code over numbered registers, produced
//!   by the [`regalloc`](crate::regalloc) linear-scan allocator for register
//!   based targets.
//! - [`StackCode`]: operand-stack code over local slots for class-file
//!   targets, produced by [`StackCode::lower`].
//!
//! Both keep the block layout chosen by block tracing; branch targets refer
//! to block labels rather than offsets.

mod register;
mod stack;

pub use register::{Register, RegisterBlock, RegisterCode, RegisterInstruction, RegisterOp};
pub use stack::{StackBlock, StackCode, StackInstruction};
