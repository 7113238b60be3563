//! Pass trait for IR transformations.
//!
//! Every step of the per-method pipeline implements [`IrPass`]. The converter
//! drives passes in a fixed order, checks `should_run`, and verifies SSA form
//! after each pass that reports a change when verification is enabled.

use crate::{
    compiler::{context::CompilerContext, events::EventLog},
    config::OptimizerConfig,
    ir::IrCode,
    program::{Method, MethodFlags, MethodId, Program},
    Result,
};

/// Which inlining round a method is processed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum InlineMode {
    /// First visit in call-graph order; unavailable callees are recorded.
    Normal,
    /// The deferred round over callers that met unavailable callees.
    DoubleInline,
}

/// Everything a pass may consult while rewriting one method.
#[derive(Clone, Copy)]
pub struct MethodContext<'a> {
    /// The program being compiled.
    pub program: &'a Program,
    /// The optimizer configuration.
    pub config: &'a OptimizerConfig,
    /// State shared across all workers.
    pub compiler: &'a CompilerContext,
    /// The method being rewritten.
    pub method: MethodId,
    /// The current inlining round.
    pub mode: InlineMode,
}

impl<'a> MethodContext<'a> {
    /// Creates a context for `method` in the normal round.
    #[must_use]
    pub fn new(
        program: &'a Program,
        config: &'a OptimizerConfig,
        compiler: &'a CompilerContext,
        method: MethodId,
    ) -> Self {
        Self {
            program,
            config,
            compiler,
            method,
            mode: InlineMode::Normal,
        }
    }

    /// Returns a copy for the given inlining round.
    #[must_use]
    pub fn with_mode(mut self, mode: InlineMode) -> Self {
        self.mode = mode;
        self
    }

    /// The declaration of the method being rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownMethod`] if the method is not registered.
    pub fn declaration(&self) -> Result<&'a Method> {
        self.program.method(self.method)
    }

    /// Returns true if the method observes object reachability (finalizer
    /// guards, weak references); such methods keep allocations and strings.
    #[must_use]
    pub fn is_reachability_sensitive(&self) -> bool {
        self.program
            .method(self.method)
            .is_ok_and(|m| m.flags.contains(MethodFlags::REACHABILITY_SENSITIVE))
    }

    /// The shared event log.
    #[must_use]
    pub fn events(&self) -> &'a EventLog {
        &self.compiler.events
    }
}

/// A transformation over the IR of one method.
pub trait IrPass: Send + Sync {
    /// Unique name for logging and error reports.
    fn name(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> &'static str {
        ""
    }

    /// Should this pass run on the method of `ctx`?
    fn should_run(&self, _ctx: &MethodContext<'_>) -> bool {
        true
    }

    /// Rewrites `code`; returns true if anything changed.
    ///
    /// Events are recorded to `ctx.events()`.
    ///
    /// # Errors
    ///
    /// Returns an error only for broken internal invariants.
    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool>;

    /// Returns true if the pass keeps the code in SSA form.
    fn preserves_ssa(&self) -> bool {
        true
    }
}
