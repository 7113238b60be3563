//! The IR converter: per-method pipeline and whole-program optimization.
//!
//! [`IrConverter`] owns the [`CompilerContext`] of one compilation and drives
//! every method through the [`PassScheduler`], then finalizes it into the
//! configured output form.
//!
//! # Whole-program optimization
//!
//! [`IrConverter::optimize`] processes the call graph layer by layer, callees
//! before callers. Methods of one layer run in parallel; their optimized IR
//! and computed facts are staged and only published at the layer barrier, so
//! no decision ever observes a half-finished layer. Callers that met a callee without
//! published IR are processed again once everything is published. The
//! outliner then rewrites repeated arithmetic sequences, and methods that
//! were inlined everywhere and are no longer referenced are removed.
//!
//! # Examples
//!
//! ```rust,ignore
//! use bytescope::{compiler::IrConverter, OptimizerConfig, program::Program};
//!
//! let program = Program::with_runtime_library();
//! // ... register classes and methods ...
//! let converter = IrConverter::new(&program, OptimizerConfig::release());
//! let stats = converter.optimize()?;
//! println!("{}", stats.summary());
//! ```

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    callgraph::CallGraph,
    compiler::{
        collaborators::Collaborators,
        context::CompilerContext,
        events::{DerivedStats, EventKind, EventLog},
        outliner,
        pass::{InlineMode, MethodContext},
        passes::{eliminate_dead_code, facts, MoveResultRewriter},
        scheduler::PassScheduler,
    },
    config::{OptimizerConfig, OutputFormat},
    ir::{verify_ssa, Constant, IrCode, Op},
    output::StackCode,
    program::{Code, Constraint, MethodFlags, MethodId, OptimizationInfo, Program},
    regalloc::RegisterAllocator,
    Result,
};

/// Converts and optimizes the methods of one [`Program`].
pub struct IrConverter<'p> {
    program: &'p Program,
    config: OptimizerConfig,
    compiler: CompilerContext,
    collaborators: Arc<Collaborators>,
    scheduler: PassScheduler,
    /// Facts of finalized methods, installed together with their snapshots.
    staged_info: DashMap<MethodId, (OptimizationInfo, Constraint)>,
}

impl<'p> IrConverter<'p> {
    /// Creates a converter without collaborator rewriters.
    #[must_use]
    pub fn new(program: &'p Program, config: OptimizerConfig) -> Self {
        let collaborators = Arc::new(Collaborators::new());
        let scheduler = PassScheduler::new(&collaborators);
        Self {
            program,
            config,
            compiler: CompilerContext::new(),
            collaborators,
            scheduler,
            staged_info: DashMap::new(),
        }
    }

    /// Installs collaborator rewriters at their hook points.
    #[must_use]
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Arc::new(collaborators);
        self.scheduler = PassScheduler::new(&self.collaborators);
        self
    }

    /// The shared state of this compilation.
    #[must_use]
    pub fn context(&self) -> &CompilerContext {
        &self.compiler
    }

    /// The event log of this compilation.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.compiler.events
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimizes the whole program.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for an invalid configuration, and
    /// aborts on the first internal error of any method.
    pub fn optimize(&self) -> Result<DerivedStats> {
        self.config.validate()?;

        let graph = CallGraph::build(self.program);
        tracing::info!(stats = %graph.stats(), "call graph built");

        for (index, layer) in graph.layers().iter().enumerate() {
            let span = tracing::debug_span!("layer", index, methods = layer.len());
            let _guard = span.enter();

            layer
                .par_iter()
                .try_for_each(|&method| self.process(method, InlineMode::Normal, &self.config))?;
            let published = self.publish();

            self.compiler
                .events
                .record(EventKind::LayerCompleted)
                .message(format!("layer {index}: {} methods, {published} published", layer.len()));
            if let Some(hook) = &self.config.testing.after_layer {
                hook(index, layer);
            }
        }

        let callers = self.compiler.take_double_inline_callers();
        if !callers.is_empty() {
            tracing::debug!(callers = callers.len(), "double inlining");
            callers
                .par_iter()
                .try_for_each(|&method| self.process(method, InlineMode::DoubleInline, &self.config))?;
            self.publish();
        }

        self.collaborators.finalize(self.program)?;

        if self.config.outlining_enabled() {
            self.outline()?;
        }

        self.remove_inlined_methods();
        self.program.clear_processed();

        let stats = DerivedStats::from_log(&self.compiler.events).with_time(self.compiler.elapsed());
        tracing::info!("{}", stats.summary());
        Ok(stats)
    }

    /// Converts every method without inlining, class inlining or outlining.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for an invalid configuration, and
    /// aborts on the first internal error of any method.
    pub fn convert(&self) -> Result<DerivedStats> {
        self.config.validate()?;

        let mut config = self.config.clone();
        config.enable_inlining = false;
        config.enable_class_inlining = false;
        config.outline.enabled = false;

        let methods: Vec<MethodId> = self
            .program
            .method_ids()
            .into_iter()
            .filter(|&m| self.program.code(m).is_some_and(|code| !code.is_finalized()))
            .collect();
        methods
            .par_iter()
            .try_for_each(|&method| self.process(method, InlineMode::Normal, &config))?;
        self.publish();
        self.program.clear_processed();

        Ok(DerivedStats::from_log(&self.compiler.events).with_time(self.compiler.elapsed()))
    }

    /// Rewrites and finalizes a single method, publishing its optimized IR.
    ///
    /// # Errors
    ///
    /// Returns the first internal error raised while rewriting the method.
    pub fn process_method(&self, method: MethodId) -> Result<()> {
        self.process(method, InlineMode::Normal, &self.config)?;
        self.publish();
        Ok(())
    }

    fn skip(&self, method: MethodId, reason: &str) {
        self.program.mark_processed(method, Constraint::Never);
        self.compiler
            .events
            .record(EventKind::MethodSkipped)
            .method(method)
            .message(reason);
    }

    fn process(&self, method: MethodId, mode: InlineMode, config: &OptimizerConfig) -> Result<()> {
        if !config.method_filter.accepts(self.program, method) {
            self.skip(method, "excluded by method filter");
            return Ok(());
        }
        if config.skip_ir {
            self.skip(method, "IR processing disabled");
            return Ok(());
        }

        let code = match mode {
            InlineMode::Normal => self
                .program
                .code(method)
                .and_then(|code| code.build_ir(method, self.program)),
            InlineMode::DoubleInline => self
                .compiler
                .optimized_code(method)
                .map(|code| IrCode::clone(&code)),
        };
        let Some(mut code) = code else {
            self.skip(method, "no IR available");
            return Ok(());
        };

        let span = tracing::debug_span!("method", %method, %mode);
        let _guard = span.enter();

        let ctx = MethodContext::new(self.program, config, &self.compiler, method).with_mode(mode);
        let changed = self.scheduler.run(&mut code, &ctx)?;
        tracing::trace!(changed, "pipeline finished");

        self.finalize_ir(code, &ctx)
    }

    /// Records the facts of `code`, emits the output form and stages the
    /// snapshot for inlining into later layers.
    fn finalize_ir(&self, code: IrCode, ctx: &MethodContext<'_>) -> Result<()> {
        let method = ctx.method;
        let program = self.program;

        let info = facts::compute(&code, program, method);
        let constraint = facts::compute_constraint(&code, program, method, ctx.config);

        for (_, _, instr) in code.instructions() {
            if let Op::Const(Constant::String(value)) = &instr.op {
                self.compiler.update_highest_sorting_string(value);
            }
        }

        let output = match ctx.config.output {
            OutputFormat::Stack => Code::Stack(Arc::new(StackCode::lower(&code, program)?)),
            OutputFormat::Register => {
                let allocated = RegisterAllocator::new(program, ctx.config).allocate(&code)?;
                ctx.events()
                    .record(EventKind::RegistersAllocated)
                    .method(method)
                    .message(format!("{} registers", allocated.registers));
                Code::Register(Arc::new(allocated))
            }
        };
        program.set_code(method, output);
        self.staged_info.insert(method, (info, constraint));

        ctx.events()
            .record(EventKind::CodeFinalized)
            .method(method)
            .message(format!("{} as {}", constraint, ctx.config.output));
        self.compiler.stage_snapshot(method, code);
        Ok(())
    }

    /// Installs the staged facts and snapshots of every finalized method.
    fn publish(&self) -> usize {
        let staged: Vec<MethodId> = self.staged_info.iter().map(|entry| *entry.key()).collect();
        for method in staged {
            if let Some((method, (info, constraint))) = self.staged_info.remove(&method) {
                self.program.update_info(method, |existing| {
                    *existing = info;
                    existing.processed = Some(constraint);
                });
            }
        }
        self.compiler.publish_pending()
    }

    /// Outliner phase 2: synthesizes the outline class and rewrites callers.
    fn outline(&self) -> Result<usize> {
        let options = &self.config.outline;
        let selected = outliner::select(&self.compiler, options);
        let Some(plan) = outliner::build_outline_class(self.program, &self.compiler, selected) else {
            return Ok(0);
        };

        let mut methods: Vec<MethodId> = plan.methods.values().copied().collect();
        methods.sort_unstable();
        methods
            .par_iter()
            .try_for_each(|&method| self.process(method, InlineMode::Normal, &self.config))?;
        self.publish();

        let rewritten: usize = plan
            .callers
            .par_iter()
            .map(|&caller| -> Result<usize> {
                let Some(snapshot) = self.compiler.optimized_code(caller) else {
                    return Ok(0);
                };
                let mut code = IrCode::clone(&snapshot);
                let sites = outliner::apply_plan(&mut code, &plan, options);
                if sites == 0 {
                    return Ok(0);
                }

                let ctx = MethodContext::new(self.program, &self.config, &self.compiler, caller);
                MoveResultRewriter::apply(&mut code, self.program);
                eliminate_dead_code(&mut code, self.program, self.config.debug);
                if self.config.verify_ssa {
                    verify_ssa(&code, "outlining")?;
                }
                ctx.events()
                    .record(EventKind::Outlined)
                    .method(caller)
                    .message(format!("{sites} sequences outlined"));
                self.finalize_ir(code, &ctx)?;
                Ok(sites)
            })
            .sum::<Result<usize>>()?;
        self.publish();
        Ok(rewritten)
    }

    /// Removes methods that were inlined and are no longer referenced, until
    /// nothing more can be removed.
    fn remove_inlined_methods(&self) -> usize {
        let program = self.program;
        let mut removed = 0;
        loop {
            let mut referenced: HashSet<MethodId> = HashSet::new();
            for method in program.method_ids() {
                let Some(code) = program.code(method) else {
                    continue;
                };
                for callee in code.invoked_methods(method, program) {
                    referenced.insert(callee);
                    referenced.extend(program.overriders(callee));
                }
            }

            let mut removable: Vec<MethodId> = self
                .compiler
                .inlined_methods
                .iter()
                .map(|entry| *entry)
                .filter(|&method| {
                    program.is_live(method)
                        && !referenced.contains(&method)
                        && program
                            .method(method)
                            .is_ok_and(|m| !m.flags.contains(MethodFlags::KEEP))
                })
                .collect();
            if removable.is_empty() {
                break;
            }
            removable.sort_unstable();
            for method in removable {
                program.remove_method(method);
                self.compiler
                    .events
                    .record(EventKind::MethodRemoved)
                    .method(method)
                    .message(program.describe(method));
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        config::{LayerHook, MethodFilter, TestingHooks},
        ir::{BinaryOp, InvokeKind, IrBuilder, ValueType},
        program::{Class, Method},
    };

    /// `static int f() { return 1 + 2; }` and `static int g() { return f(); }`.
    fn program() -> (Program, MethodId, MethodId) {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Main"));
        let f = program.add_method(Method::new_static(class, "f", Vec::new(), Some(ValueType::Int)));
        let g = program.add_method(Method::new_static(class, "g", Vec::new(), Some(ValueType::Int)));

        let mut b = IrBuilder::new(f);
        let one = b.const_int(1);
        let two = b.const_int(2);
        let sum = b.binary(BinaryOp::Add, one, two);
        b.ret(Some(sum));
        program.set_code(f, Code::from_ir(b.finish()));

        let mut b = IrBuilder::new(g);
        let result = b.invoke(InvokeKind::Static, f, &[], Some(ValueType::Int));
        b.ret(result);
        program.set_code(g, Code::from_ir(b.finish()));
        (program, f, g)
    }

    #[test]
    fn test_process_method_finalizes_and_publishes() {
        let (program, f, _) = program();
        let converter = IrConverter::new(&program, OptimizerConfig::default());
        converter.process_method(f).unwrap();

        let code = program.code(f).unwrap();
        assert!(code.is_finalized());
        assert!(code.as_register().is_some());
        assert_eq!(program.info(f).returns_constant, Some(Constant::Int(3)));
        assert_eq!(program.info(f).processed, Some(Constraint::Always));
        assert!(converter.context().optimized_code(f).is_some());
        assert!(converter.events().has(EventKind::CodeFinalized));
    }

    #[test]
    fn test_filtered_method_is_skipped() {
        let (program, f, _) = program();
        let config = OptimizerConfig::default()
            .with_method_filter(MethodFilter::Names(vec!["app.Main.g".to_string()]));
        let converter = IrConverter::new(&program, config);
        converter.process_method(f).unwrap();

        assert!(!program.code(f).unwrap().is_finalized());
        assert_eq!(program.info(f).processed, Some(Constraint::Never));
        assert_eq!(converter.events().count_kind(EventKind::MethodSkipped), 1);
    }

    #[test]
    fn test_layers_run_callees_first() {
        let (program, f, g) = program();
        let seen: Arc<Mutex<Vec<Vec<MethodId>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let hook: LayerHook = Arc::new(move |_: usize, layer: &[MethodId]| {
            sink.lock().unwrap().push(layer.to_vec());
        });
        let config = OptimizerConfig::default().with_testing(TestingHooks {
            after_layer: Some(hook),
            ..TestingHooks::default()
        });

        let converter = IrConverter::new(&program, config);
        converter.optimize().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![f], vec![g]]);
        assert_eq!(converter.events().count_kind(EventKind::LayerCompleted), 2);
        assert!(!program.info(g).is_processed());
    }

    #[test]
    fn test_convert_keeps_calls() {
        let (program, f, g) = program();
        let converter = IrConverter::new(&program, OptimizerConfig::default());
        converter.convert().unwrap();

        let code = program.code(g).unwrap();
        assert_eq!(code.invoked_methods(g, &program), vec![f]);
        assert!(program.is_live(f));
        assert!(!converter.context().was_inlined(f));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (program, _, _) = program();
        let config = OptimizerConfig::default().with_inlining(true, 0);
        let converter = IrConverter::new(&program, config);
        assert!(matches!(converter.optimize(), Err(crate::Error::Config(_))));
    }
}
