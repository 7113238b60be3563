//! Outlining of repeated arithmetic sequences.
//!
//! Outlining runs in two phases around the main optimization:
//!
//! 1. While methods are optimized, [`OutlineCandidateCollector`] records the
//!    [`OutlineShape`] of every straight-line arithmetic sequence it finds.
//! 2. After all methods are finalized, shapes seen at least
//!    `outline.threshold` times become static methods of one synthesized
//!    class, and every occurrence is replaced by a call.
//!
//! A sequence qualifies when it is a run of consecutive non-throwing
//! arithmetic instructions in one block whose intermediate results are only
//! read inside the run. Only the last result leaves the sequence.

use std::collections::{BTreeMap, HashMap};

use crate::{
    compiler::{
        context::CompilerContext,
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    config::OutlineOptions,
    ir::{
        BinaryOp, BlockId, Instruction, InvokeKind, IrBuilder, IrCode, NumericType, Op, UnaryOp,
        UseMap, UseSite, ValueId, ValueType,
    },
    program::{known, Class, ClassFlags, ClassId, Code, Method, MethodFlags, MethodId, Program},
    Result,
};

/// Base name of the synthesized outline class.
pub const OUTLINE_CLASS: &str = "bytescope.Outline";

/// An operand of one outlined step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    /// The n-th distinct input of the sequence.
    Input(usize),
    /// The result of an earlier step.
    Step(usize),
}

/// One instruction of an outlined sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    /// Two-operand arithmetic.
    Binary {
        /// The operation.
        op: BinaryOp,
        /// Operand width.
        ty: NumericType,
        /// Left operand.
        left: Operand,
        /// Right operand.
        right: Operand,
    },
    /// One-operand arithmetic.
    Unary {
        /// The operation.
        op: UnaryOp,
        /// Operand width.
        ty: NumericType,
        /// The operand.
        operand: Operand,
    },
}

impl Step {
    const fn ty(self) -> NumericType {
        match self {
            Self::Binary { ty, .. } | Self::Unary { ty, .. } => ty,
        }
    }
}

/// The structure of an outlinable sequence, independent of concrete values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutlineShape {
    inputs: Vec<ValueType>,
    steps: Vec<Step>,
}

impl OutlineShape {
    /// Types of the sequence inputs in first-use order.
    #[must_use]
    pub fn inputs(&self) -> &[ValueType] {
        &self.inputs
    }

    /// Number of instructions in the sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true for a shape without steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Type of the value the sequence produces.
    #[must_use]
    pub fn result_type(&self) -> ValueType {
        self.steps
            .last()
            .map_or(ValueType::Int, |step| step.ty().value_type())
    }

    /// Builds the body of the static method computing this shape.
    #[must_use]
    pub fn build(&self, method: MethodId) -> IrCode {
        let mut b = IrBuilder::new(method);
        let inputs: Vec<ValueId> = self.inputs.iter().map(|ty| b.argument(*ty)).collect();
        let mut results: Vec<ValueId> = Vec::with_capacity(self.steps.len());
        let resolve = |operand: Operand, results: &[ValueId]| match operand {
            Operand::Input(n) => inputs[n],
            Operand::Step(n) => results[n],
        };
        for step in &self.steps {
            let value = match *step {
                Step::Binary {
                    op, left, right, ..
                } => {
                    let left = resolve(left, &results);
                    let right = resolve(right, &results);
                    b.binary(op, left, right)
                }
                Step::Unary { op, operand, .. } => {
                    let operand = resolve(operand, &results);
                    b.unary(op, operand)
                }
            };
            results.push(value);
        }
        b.ret(results.last().copied());
        b.finish()
    }
}

/// One occurrence of a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineSite {
    /// The block holding the sequence.
    pub block: BlockId,
    /// Index of the first instruction.
    pub start: usize,
    /// Index one past the last instruction.
    pub end: usize,
    /// The values feeding the sequence, in shape input order.
    pub inputs: Vec<ValueId>,
    /// The sequence structure.
    pub shape: OutlineShape,
}

fn is_outlinable(code: &IrCode, instr: &Instruction) -> bool {
    let named = instr
        .dest
        .is_some_and(|dest| code.value(dest).local.is_some());
    !named
        && match &instr.op {
            Op::Binary { op, .. } => !op.is_division(),
            Op::Unary { .. } => true,
            _ => false,
        }
}

fn operand(value: ValueId, steps: &HashMap<ValueId, usize>, inputs: &mut Vec<ValueId>) -> Operand {
    if let Some(&step) = steps.get(&value) {
        return Operand::Step(step);
    }
    match inputs.iter().position(|input| *input == value) {
        Some(n) => Operand::Input(n),
        None => {
            inputs.push(value);
            Operand::Input(inputs.len() - 1)
        }
    }
}

fn site(
    code: &IrCode,
    uses: &UseMap,
    block: BlockId,
    window: &[Instruction],
    start: usize,
    options: &OutlineOptions,
) -> Option<OutlineSite> {
    let end = start + window.len();
    let mut step_of: HashMap<ValueId, usize> = HashMap::new();
    let mut inputs = Vec::new();
    let mut steps = Vec::with_capacity(window.len());
    for (n, instr) in window.iter().enumerate() {
        let step = match instr.op {
            Op::Binary {
                op,
                ty,
                left,
                right,
            } => Step::Binary {
                op,
                ty,
                left: operand(left, &step_of, &mut inputs),
                right: operand(right, &step_of, &mut inputs),
            },
            Op::Unary { op, ty, operand: o } => Step::Unary {
                op,
                ty,
                operand: operand(o, &step_of, &mut inputs),
            },
            _ => return None,
        };
        steps.push(step);
        step_of.insert(instr.dest?, n);
    }
    if inputs.len() > options.max_arguments {
        return None;
    }
    let contained = window[..window.len().saturating_sub(1)]
        .iter()
        .filter_map(|instr| instr.dest)
        .all(|dest| {
            uses.sites(dest).iter().all(|site| {
                matches!(*site, UseSite::Instruction { block: b, index }
                    if b == block && index >= start && index < end)
            })
        });
    if !contained {
        return None;
    }
    Some(OutlineSite {
        block,
        start,
        end,
        shape: OutlineShape {
            inputs: inputs.iter().map(|v| code.value(*v).ty).collect(),
            steps,
        },
        inputs,
    })
}

/// Finds non-overlapping outlinable sequences, longest first from each start.
#[must_use]
pub fn find_sites(code: &IrCode, options: &OutlineOptions) -> Vec<OutlineSite> {
    let uses = code.uses();
    let mut sites = Vec::new();
    for block in code.block_ids() {
        let Some(b) = code.block(block) else {
            continue;
        };
        let instructions = &b.instructions;
        let mut start = 0;
        while start < instructions.len() {
            let run = instructions[start..]
                .iter()
                .take_while(|instr| is_outlinable(code, instr))
                .count();
            if run < options.min_size {
                start += run.max(1);
                continue;
            }
            let longest = run.min(options.max_size);
            let found = (options.min_size..=longest).rev().find_map(|len| {
                site(code, &uses, block, &instructions[start..start + len], start, options)
            });
            match found {
                Some(found) => {
                    start = found.end;
                    sites.push(found);
                }
                None => start += 1,
            }
        }
    }
    sites
}

/// Records the outline candidates of each optimized method.
pub struct OutlineCandidateCollector;

impl IrPass for OutlineCandidateCollector {
    fn name(&self) -> &'static str {
        "outline-candidate-collection"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        ctx.config.outlining_enabled()
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        for found in find_sites(code, &ctx.config.outline) {
            ctx.compiler.add_outline_candidate(found.shape, ctx.method);
        }
        Ok(false)
    }
}

/// The synthesized outline class and the methods to rewrite.
#[derive(Debug, Clone)]
pub struct OutlinePlan {
    /// The synthesized class.
    pub class: ClassId,
    /// The outline method computing each selected shape.
    pub methods: HashMap<OutlineShape, MethodId>,
    /// Methods containing at least one selected shape, sorted.
    pub callers: Vec<MethodId>,
}

/// Picks the shapes seen at least `options.threshold` times, in shape order.
#[must_use]
pub fn select(compiler: &CompilerContext, options: &OutlineOptions) -> BTreeMap<OutlineShape, Vec<MethodId>> {
    compiler
        .outline_candidates
        .iter()
        .filter(|entry| entry.value().len() >= options.threshold.max(1))
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect()
}

/// Synthesizes the outline class for `selected`; `None` when nothing was selected.
pub fn build_outline_class(
    program: &Program,
    compiler: &CompilerContext,
    selected: BTreeMap<OutlineShape, Vec<MethodId>>,
) -> Option<OutlinePlan> {
    if selected.is_empty() {
        return None;
    }
    let name = program.unique_class_name(OUTLINE_CLASS);
    let mut declaration =
        Class::new(&name).with_flags(ClassFlags::SYNTHETIC | ClassFlags::FINAL);
    if let Some(object) = program.find_class(known::OBJECT) {
        declaration = declaration.with_superclass(object);
    }
    let class = program.add_class(declaration);

    let mut methods = HashMap::with_capacity(selected.len());
    let mut callers = Vec::new();
    for (n, (shape, occurrences)) in selected.into_iter().enumerate() {
        let signature = Method::new_static(
            class,
            &format!("outline{n}"),
            shape.inputs().to_vec(),
            Some(shape.result_type()),
        )
        .with_flags(MethodFlags::SYNTHETIC | MethodFlags::PUBLIC);
        let method = program.add_method(signature);
        program.set_code(method, Code::from_ir(shape.build(method)));
        callers.extend(occurrences);
        methods.insert(shape, method);
    }
    callers.sort_unstable();
    callers.dedup();

    compiler
        .events
        .record(EventKind::OutlineClassSynthesized)
        .message(format!("{name} with {} methods", methods.len()));
    tracing::debug!(class = %name, methods = methods.len(), "synthesized outline class");
    Some(OutlinePlan {
        class,
        methods,
        callers,
    })
}

/// Replaces every selected sequence in `code` by a call; returns the number of sites.
pub fn apply_plan(code: &mut IrCode, plan: &OutlinePlan, options: &OutlineOptions) -> usize {
    let sites: Vec<(OutlineSite, MethodId)> = find_sites(code, options)
        .into_iter()
        .filter_map(|found| {
            let method = *plan.methods.get(&found.shape)?;
            Some((found, method))
        })
        .collect();
    for (found, method) in sites.iter().rev() {
        let Some(b) = code.block_mut(found.block) else {
            continue;
        };
        let last = found.end - 1;
        let call = Op::Invoke {
            kind: InvokeKind::Static,
            method: *method,
            args: found.inputs.clone(),
        };
        b.instructions[last].op = call;
        b.instructions.drain(found.start..last);
    }
    sites.len()
}
