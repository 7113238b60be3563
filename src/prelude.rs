//! # bytescope Prelude
//!
//! The most commonly used types, for glob import:
//!
//! ```rust
//! use bytescope::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all bytescope operations
pub use crate::Error;

/// The result type used throughout bytescope
pub use crate::Result;

/// Optimizer configuration
pub use crate::config::{MethodFilter, OptimizerConfig, OutlineOptions, OutputFormat, PlatformWorkarounds};

// ================================================================================================
// Program Model
// ================================================================================================

/// Classes, methods, fields and their code
pub use crate::program::{
    Class, ClassFlags, ClassId, Code, Constraint, Field, FieldFlags, FieldId, Method, MethodFlags,
    MethodId, OptimizationInfo, Program,
};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// SSA form and its construction
pub use crate::ir::{
    BinaryOp, BlockId, Constant, IfCond, InvokeKind, IrBuilder, IrCode, Op, ValueId, ValueType,
};

// ================================================================================================
// Pipeline
// ================================================================================================

/// Whole-program driver and its state
pub use crate::compiler::{
    CodeRewriter, Collaborators, CompilerContext, DerivedStats, EventKind, EventLog, HookPoint,
    IrConverter, IrPass, MethodContext,
};

/// Register allocation and finalized code
pub use crate::{
    output::{RegisterCode, StackCode},
    regalloc::RegisterAllocator,
};
