//! SSA intermediate representation.
//!
//! Each method body is held in an [`IrCode`]: a control-flow graph of
//! [`BasicBlock`]s whose instructions define [`ValueId`]s at most once. Phis
//! sit at block entry and name their incoming edge explicitly. There are no
//! exceptional edges; instructions that may throw simply end the method's
//! execution when they do.
//!
//! # Key Components
//!
//! - [`Op`] / [`Instruction`] - The closed instruction set
//! - [`IrCode`] - Block and value arenas with CFG utilities
//! - [`IrBuilder`] - Fluent construction for front ends and tests
//! - [`verify_ssa`] - Structural checks run between passes

mod builder;
mod code;
mod instruction;
mod value;
mod verify;

pub use builder::IrBuilder;
pub use code::{BasicBlock, BlockId, DefSite, IrCode, Phi, PhiOperand, UseMap, UseSite};
pub use instruction::{
    BinaryOp, IfCond, Instruction, InvokeKind, NumericType, Op, Position, UnaryOp,
};
pub use value::{Constant, Nullability, ValueData, ValueId, ValueType};
pub use verify::verify_ssa;
