//! Pass scheduler for the per-method rewrite pipeline.
//!
//! The `PassScheduler` owns the ordered list of [`IrPass`] steps that
//! [`IrConverter`](crate::compiler::IrConverter) runs over every method. The
//! order is fixed; each pass decides through [`IrPass::should_run`] whether it
//! applies to the current method and configuration.

use std::sync::Arc;

use crate::{
    compiler::{
        classinliner::ClassInliner,
        collaborators::{CollaboratorPass, Collaborators, HookPoint},
        events::EventKind,
        inliner::Inliner,
        outliner::OutlineCandidateCollector,
        pass::{IrPass, MethodContext},
        passes::{
            invert_conditionals, AssertionsDisabler, CastRemover, ClassInitializerDefaults,
            CommonSubexpressionEliminator, ConstantCanonicalizer, ConstantPropagation,
            DeadCodeRemover, DebugLocalSimplifier, Devirtualizer, IfSimplifier,
            LibraryCallRewriter, LiveRangeShortener, MemberValuePropagation, MoveResultRewriter,
            NeverReturnsPruner, NonNullInserter, NonNullRemover, RedundantFieldLoadEliminator,
            SwitchRewriter,
        },
    },
    ir::{verify_ssa, IrCode},
    Result,
};

/// Swaps the targets of every conditional branch.
///
/// Only scheduled when the testing hook asks for it.
struct ConditionalInverter;

impl IrPass for ConditionalInverter {
    fn name(&self) -> &'static str {
        "conditional-inversion"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        ctx.config.testing.invert_conditionals
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let inverted = invert_conditionals(code);
        if inverted > 0 {
            ctx.events()
                .record(EventKind::Info)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("inverted {inverted} conditionals"));
        }
        Ok(inverted > 0)
    }
}

/// Runs the rewrite steps of one method in their fixed order.
pub struct PassScheduler {
    passes: Vec<Box<dyn IrPass>>,
}

impl PassScheduler {
    /// Creates the standard pipeline with `collaborators` at their hook points.
    #[must_use]
    pub fn new(collaborators: &Arc<Collaborators>) -> Self {
        let hook = |point: HookPoint| -> Box<dyn IrPass> {
            Box::new(CollaboratorPass::new(point, Arc::clone(collaborators)))
        };

        let passes: Vec<Box<dyn IrPass>> = vec![
            hook(HookPoint::StringInitWorkaround),
            Box::new(DebugLocalSimplifier),
            hook(HookPoint::LensRewriting),
            hook(HookPoint::IdentifierNameDecoupling),
            Box::new(MemberValuePropagation),
            hook(HookPoint::SwitchMapRemoval),
            Box::new(AssertionsDisabler),
            Box::new(NonNullInserter),
            Box::new(Inliner),
            Box::new(Devirtualizer),
            Box::new(CastRemover),
            Box::new(LibraryCallRewriter),
            Box::new(CommonSubexpressionEliminator),
            Box::new(MoveResultRewriter),
            Box::new(ConstantPropagation),
            Box::new(SwitchRewriter),
            Box::new(NeverReturnsPruner),
            Box::new(IfSimplifier),
            Box::new(ConditionalInverter),
            Box::new(RedundantFieldLoadEliminator),
            Box::new(NonNullRemover),
            Box::new(ClassInitializerDefaults),
            Box::new(DeadCodeRemover),
            hook(HookPoint::TryWithResourcesDesugaring),
            hook(HookPoint::StringConcatDesugaring),
            hook(HookPoint::LambdaDesugaring),
            hook(HookPoint::InterfaceMethodDesugaring),
            Box::new(ClassInliner),
            hook(HookPoint::LambdaMerging),
            Box::new(OutlineCandidateCollector),
            Box::new(ConstantCanonicalizer),
            Box::new(LiveRangeShortener),
        ];

        Self { passes }
    }

    /// Creates a scheduler over an explicit pass list.
    #[must_use]
    pub fn with_passes(passes: Vec<Box<dyn IrPass>>) -> Self {
        Self { passes }
    }

    /// Names of the scheduled passes, in order.
    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    /// Runs every applicable pass over `code`.
    ///
    /// Returns the number of passes that changed the code.
    ///
    /// # Errors
    ///
    /// Propagates pass errors, and returns [`crate::Error::InvalidSsa`] when
    /// SSA verification is enabled and a pass leaves broken SSA behind.
    pub fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<usize> {
        let mut changed = 0;
        for pass in &self.passes {
            if !pass.should_run(ctx) {
                continue;
            }

            let span = tracing::trace_span!("pass", name = pass.name(), method = %ctx.method);
            let _guard = span.enter();

            if pass.run(code, ctx)? {
                changed += 1;
                if ctx.config.verify_ssa && pass.preserves_ssa() {
                    verify_ssa(code, pass.name())?;
                }
            }
        }
        Ok(changed)
    }
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(&Arc::new(Collaborators::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::context::CompilerContext,
        config::OptimizerConfig,
        ir::{BinaryOp, IrBuilder, Op},
        program::{MethodId, Program},
        Error,
    };

    struct Recording {
        name: &'static str,
        changes: bool,
    }

    impl IrPass for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&self, _code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
            ctx.events()
                .record(EventKind::Info)
                .method(ctx.method)
                .pass(self.name)
                .message("ran");
            Ok(self.changes)
        }
    }

    /// Breaks SSA by making an instruction use an undefined value.
    struct Breaking;

    impl IrPass for Breaking {
        fn name(&self) -> &'static str {
            "breaking"
        }

        fn run(&self, code: &mut IrCode, _ctx: &MethodContext<'_>) -> Result<bool> {
            let dangling = crate::ir::ValueId(9999);
            let entry = code.entry;
            if let Some(block) = code.block_mut(entry) {
                for instruction in &mut block.instructions {
                    if let Op::Return { value } = &mut instruction.op {
                        *value = Some(dangling);
                    }
                }
            }
            Ok(true)
        }
    }

    fn simple_code() -> IrCode {
        let mut b = IrBuilder::new(MethodId(0));
        let one = b.const_int(1);
        let two = b.const_int(2);
        let sum = b.binary(BinaryOp::Add, one, two);
        b.ret(Some(sum));
        b.finish()
    }

    #[test]
    fn test_standard_order() {
        let scheduler = PassScheduler::default();
        let names: Vec<_> = scheduler.pass_names().collect();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();

        assert_eq!(names[0], "string-init-workaround");
        assert!(position("inlining") < position("devirtualization"));
        assert!(position("constant-propagation") < position("if-simplification"));
        assert!(position("dead-code-elimination") < position("class-inlining"));
        assert!(position("class-inlining") < position("lambda-merging"));
        assert_eq!(names.last(), Some(&"live-range-shortening"));
    }

    #[test]
    fn test_run_counts_changes() {
        let scheduler = PassScheduler::with_passes(vec![
            Box::new(Recording {
                name: "first",
                changes: true,
            }),
            Box::new(Recording {
                name: "second",
                changes: false,
            }),
        ]);
        let program = Program::new();
        let config = OptimizerConfig::default().with_verify_ssa(false);
        let compiler = CompilerContext::new();
        let ctx = MethodContext::new(&program, &config, &compiler, MethodId(0));

        let mut code = simple_code();
        assert_eq!(scheduler.run(&mut code, &ctx).unwrap(), 1);
        assert_eq!(compiler.events.len(), 2);
    }

    #[test]
    fn test_broken_ssa_is_reported_with_pass_name() {
        let scheduler = PassScheduler::with_passes(vec![Box::new(Breaking)]);
        let program = Program::new();
        let config = OptimizerConfig::default().with_verify_ssa(true);
        let compiler = CompilerContext::new();
        let ctx = MethodContext::new(&program, &config, &compiler, MethodId(0));

        let mut code = simple_code();
        match scheduler.run(&mut code, &ctx) {
            Err(Error::InvalidSsa { pass, .. }) => assert_eq!(pass, "breaking"),
            other => panic!("expected invalid SSA, got {other:?}"),
        }
    }
}
