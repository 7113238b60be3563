//! Extension points for rewriters owned by the surrounding compiler.
//!
//! Several steps of the per-method pipeline belong to components outside the
//! optimizer core: desugaring, lambda merging, identifier-name handling and
//! platform workarounds. The core only fixes *when* they run. Each component
//! implements [`CodeRewriter`] for one [`HookPoint`] and is registered in a
//! [`Collaborators`] set handed to the converter.
//!
//! Rewriters may also take part in the finalization that follows phase 1 of
//! whole-program optimization, for example to synthesize lambda classes.

use std::{fmt, sync::Arc};

use crate::{
    compiler::pass::{IrPass, MethodContext},
    ir::IrCode,
    program::Program,
    Result,
};

/// Pipeline position of a collaborator rewriter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum HookPoint {
    /// Rewrites direct `String.<init>` calls on targets with the string-init bug.
    StringInitWorkaround,
    /// Applies member renamings and signature changes; skipped once a method was processed.
    LensRewriting,
    /// Decouples strings that name identifiers from the identifiers.
    IdentifierNameDecoupling,
    /// Replaces synthetic enum switch maps by direct ordinal switches.
    SwitchMapRemoval,
    /// Desugars try-with-resources suppression handling.
    TryWithResourcesDesugaring,
    /// Rewrites string concatenation bootstraps.
    StringConcatDesugaring,
    /// Replaces lambda bootstraps by synthesized classes.
    LambdaDesugaring,
    /// Moves default and static interface methods to companion classes.
    InterfaceMethodDesugaring,
    /// Merges lambda classes of the same shape.
    LambdaMerging,
}

impl HookPoint {
    /// Returns true if rewriters of this point run for the method of `ctx`.
    #[must_use]
    pub fn is_enabled(self, ctx: &MethodContext<'_>) -> bool {
        match self {
            Self::StringInitWorkaround => ctx.config.platform.string_init_bug,
            Self::LensRewriting => !ctx.program.info(ctx.method).is_processed(),
            _ => true,
        }
    }
}

/// A method rewriter provided by a component outside the optimizer core.
pub trait CodeRewriter: Send + Sync {
    /// Name for logs and error reports.
    fn name(&self) -> &'static str;

    /// The pipeline position of this rewriter.
    fn hook(&self) -> HookPoint;

    /// Rewrites `code`; returns true if anything changed.
    ///
    /// # Errors
    ///
    /// Errors abort the compilation.
    fn rewrite(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool>;

    /// Runs once after phase 1 of whole-program optimization.
    ///
    /// # Errors
    ///
    /// Errors abort the compilation.
    fn finalize(&self, _program: &Program) -> Result<()> {
        Ok(())
    }
}

/// The registered collaborator rewriters.
#[derive(Clone, Default)]
pub struct Collaborators {
    rewriters: Vec<Arc<dyn CodeRewriter>>,
}

impl Collaborators {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rewriter; rewriters of one hook point run in registration order.
    #[must_use]
    pub fn with(mut self, rewriter: Arc<dyn CodeRewriter>) -> Self {
        self.rewriters.push(rewriter);
        self
    }

    /// Returns true if no rewriter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rewriters.is_empty()
    }

    /// Returns true if some rewriter is registered for `point`.
    #[must_use]
    pub fn has(&self, point: HookPoint) -> bool {
        self.rewriters.iter().any(|r| r.hook() == point)
    }

    /// Runs the rewriters of `point`; returns true if any changed the code.
    ///
    /// # Errors
    ///
    /// Propagates the first rewriter error.
    pub fn run(&self, point: HookPoint, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let mut changed = false;
        for rewriter in self.rewriters.iter().filter(|r| r.hook() == point) {
            if rewriter.rewrite(code, ctx)? {
                tracing::trace!(rewriter = rewriter.name(), method = %ctx.method, "collaborator rewrote");
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Runs the finalization of every rewriter, in hook order.
    ///
    /// # Errors
    ///
    /// Propagates the first rewriter error.
    pub fn finalize(&self, program: &Program) -> Result<()> {
        let mut ordered: Vec<&Arc<dyn CodeRewriter>> = self.rewriters.iter().collect();
        ordered.sort_by_key(|r| r.hook() as u8);
        for rewriter in ordered {
            rewriter.finalize(program)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rewriters.iter().map(|r| r.name()))
            .finish()
    }
}

/// Runs the collaborators of one hook point as a pipeline step.
pub struct CollaboratorPass {
    point: HookPoint,
    collaborators: Arc<Collaborators>,
}

impl CollaboratorPass {
    /// Creates the step for `point`.
    #[must_use]
    pub fn new(point: HookPoint, collaborators: Arc<Collaborators>) -> Self {
        Self {
            point,
            collaborators,
        }
    }
}

impl IrPass for CollaboratorPass {
    fn name(&self) -> &'static str {
        self.point.into()
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        self.collaborators.has(self.point) && self.point.is_enabled(ctx)
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        self.collaborators.run(self.point, code, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use strum::IntoEnumIterator;

    use super::*;
    use crate::{
        compiler::context::CompilerContext,
        config::{OptimizerConfig, PlatformWorkarounds},
        program::MethodId,
    };

    struct Counting {
        point: HookPoint,
        calls: AtomicUsize,
    }

    impl CodeRewriter for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn hook(&self) -> HookPoint {
            self.point
        }

        fn rewrite(&self, _code: &mut IrCode, _ctx: &MethodContext<'_>) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
    }

    #[test]
    fn test_hook_points_have_distinct_names() {
        let names: Vec<&'static str> = HookPoint::iter().map(Into::into).collect();
        assert_eq!(names.len(), 9);
        assert_eq!(names[0], "string-init-workaround");
        assert_eq!(HookPoint::LambdaMerging.to_string(), "lambda-merging");
    }

    #[test]
    fn test_string_init_hook_follows_platform() {
        let rewriter = Arc::new(Counting {
            point: HookPoint::StringInitWorkaround,
            calls: AtomicUsize::new(0),
        });
        let collaborators = Arc::new(Collaborators::new().with(rewriter.clone()));
        let pass = CollaboratorPass::new(HookPoint::StringInitWorkaround, collaborators);

        let program = Program::new();
        let compiler = CompilerContext::new();
        let plain = OptimizerConfig::default();
        let ctx = MethodContext::new(&program, &plain, &compiler, MethodId(0));
        assert!(!pass.should_run(&ctx));

        let buggy = OptimizerConfig::default().with_platform(PlatformWorkarounds {
            string_init_bug: true,
            ..PlatformWorkarounds::default()
        });
        let ctx = MethodContext::new(&program, &buggy, &compiler, MethodId(0));
        assert!(pass.should_run(&ctx));
        let mut code = IrCode::new(MethodId(0));
        assert!(!pass.run(&mut code, &ctx).unwrap());
        assert_eq!(rewriter.calls.load(Ordering::Relaxed), 1);
    }
}
