// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # bytescope
//!
//! The core of an ahead-of-time bytecode optimizer. Method bodies are lifted
//! into an SSA intermediate representation, rewritten by a fixed pipeline of
//! optimization passes, and lowered again into register-allocated or
//! stack-machine code.
//!
//! ## Features
//!
//! - **Layered whole-program optimization** - Callees are optimized before
//!   their callers; each layer of the call graph is processed in parallel
//! - **Inlining** - Size- and constraint-driven inlining with nullable
//!   receiver guards and a second round for late callees
//! - **Class inlining** - Short-lived instances of eligible classes are
//!   dissolved into their fields
//! - **Outlining** - Repeated arithmetic sequences move into a synthesized
//!   class shared by all callers
//! - **Linear-scan register allocation** - With parallel phi moves, range
//!   calls and a peephole pass on the result
//!
//! ## Architecture
//!
//! - [`program`] - Classes, methods, fields, their code and per-method facts
//! - [`ir`] - The SSA representation, builder and verifier
//! - [`callgraph`] - Call graph and its bottom-up layering
//! - [`compiler`] - Pass pipeline, inliners, outliner and the [`IrConverter`]
//! - [`regalloc`] - Linear-scan register allocation and peephole optimization
//! - [`output`] - The finalized code forms
//! - [`config`] - Options and platform workarounds
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bytescope::prelude::*;
//!
//! let program = Program::with_runtime_library();
//! // ... register classes, methods and their code ...
//! let converter = IrConverter::new(&program, OptimizerConfig::release());
//! let stats = converter.optimize()?;
//! println!("{}", stats.summary());
//! # Ok::<(), bytescope::Error>(())
//! ```
//!
//! Logging goes through [`tracing`]; install any subscriber to observe layer
//! progress, per-method spans and register allocation results.

#[macro_use]
pub(crate) mod error;

pub mod prelude;

pub mod callgraph;
pub mod compiler;
pub mod config;
pub mod ir;
pub mod output;
pub mod program;
pub mod regalloc;
pub mod utils;

/// The error type of every fallible operation in this crate.
pub use error::Error;

/// `Result<T, Error>`.
pub use error::Result;

/// The whole-program and per-method optimization driver.
pub use compiler::IrConverter;

/// Options controlling the optimizer.
pub use config::OptimizerConfig;
