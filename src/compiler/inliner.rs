//! Method inlining.
//!
//! The inliner replaces call sites with copies of the callee's optimized body.
//! Callees are processed before their callers (see [`crate::callgraph`]), so
//! the body spliced in is the callee's final IR snapshot, not its input code.
//!
//! # Eligibility
//!
//! A call site is inlined only if every gate passes; the first failing gate
//! is recorded as an [`EventKind::InlineRejected`] event:
//!
//! 1. The call has a single possible target
//! 2. The target is not the caller and not already on the inline chain
//! 3. An optimized snapshot of the target exists; if it does not yet (the
//!    target is in the caller's cycle) the caller is scheduled for a second
//!    inlining round
//! 4. The target is not reachability sensitive, synchronized, native,
//!    abstract or a class initializer
//! 5. The target's [`Constraint`](crate::program::Constraint) admits the
//!    caller's class
//! 6. `caller - 1 + callee` stays within the instruction limit
//! 7. A maybe-null receiver is only accepted when nullable-receiver inlining
//!    is enabled; an explicit null check is inserted unless the callee
//!    dereferences its receiver before any other effect
//!
//! # Splicing
//!
//! The call block is split after the call. Callee blocks and values are
//! copied with fresh ids, arguments become the call operands, returns become
//! jumps to the continuation and the result is either the single returned
//! value or a phi in the continuation. Every copied position gains the call
//! site as its outermost frame.

use std::{collections::HashMap, sync::Arc};

use crate::{
    compiler::{
        events::EventKind,
        pass::{InlineMode, IrPass, MethodContext},
    },
    ir::{BlockId, Instruction, IrCode, Nullability, Op, Phi, PhiOperand, ValueId},
    program::{MethodFlags, MethodId},
    Result,
};

/// Why a call site was not inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InlineRejection {
    /// The call may reach more than one method.
    NoSingleTarget,
    /// Inlining would recurse.
    Recursive,
    /// No optimized body of the target exists yet.
    Unavailable,
    /// The target observes reachability.
    ReachabilitySensitive,
    /// The target holds a monitor.
    Synchronized,
    /// The target has no bytecode body.
    NoBody,
    /// The target is a class initializer.
    ClassInitializer,
    /// The target's constraint excludes the caller's class.
    Constraint,
    /// The combined size exceeds the instruction limit.
    Budget,
    /// The receiver may be null and nullable-receiver inlining is disabled.
    NullableReceiver,
}

/// An accepted call site.
#[derive(Debug, Clone)]
pub struct InlinePlan {
    /// The resolved target.
    pub target: MethodId,
    /// The target's optimized body.
    pub callee: Arc<IrCode>,
    /// Whether an explicit receiver null check must precede the body.
    pub null_check: bool,
}

/// Decides whether the call at `index` of `block` may be inlined.
///
/// # Errors
///
/// Returns the first failing gate.
pub fn evaluate(
    code: &IrCode,
    block: BlockId,
    index: usize,
    ctx: &MethodContext<'_>,
) -> std::result::Result<InlinePlan, InlineRejection> {
    let program = ctx.program;
    let Some(instr) = code.block(block).and_then(|b| b.instructions.get(index)) else {
        return Err(InlineRejection::NoSingleTarget);
    };
    let Op::Invoke { kind, method, args } = &instr.op else {
        return Err(InlineRejection::NoSingleTarget);
    };
    let target = program
        .single_target(*kind, *method)
        .ok_or(InlineRejection::NoSingleTarget)?;
    if target == ctx.method || instr.position.has_frame(target) {
        return Err(InlineRejection::Recursive);
    }
    let declaration = program
        .method(target)
        .map_err(|_| InlineRejection::NoSingleTarget)?;
    if declaration.flags.contains(MethodFlags::REACHABILITY_SENSITIVE) {
        return Err(InlineRejection::ReachabilitySensitive);
    }
    if declaration.flags.contains(MethodFlags::SYNCHRONIZED) {
        return Err(InlineRejection::Synchronized);
    }
    if declaration.is_abstract() {
        return Err(InlineRejection::NoBody);
    }
    if declaration.is_class_initializer() {
        return Err(InlineRejection::ClassInitializer);
    }

    let Some(callee) = ctx.compiler.optimized_code(target) else {
        if ctx.mode == InlineMode::Normal
            && program.code(target).is_some()
            && ctx.compiler.request_double_inline(ctx.method)
        {
            ctx.events()
                .record(EventKind::DoubleInlineScheduled)
                .method(ctx.method)
                .pass("inlining")
                .message(format!("waiting for {}", program.describe(target)));
        }
        return Err(InlineRejection::Unavailable);
    };
    if callee.invoked_methods().contains(&ctx.method) {
        return Err(InlineRejection::Recursive);
    }
    if callee.block(callee.entry).is_some_and(|b| !b.phis.is_empty()) {
        return Err(InlineRejection::NoBody);
    }

    let info = program.info(target);
    let caller_holder = ctx
        .declaration()
        .map_err(|_| InlineRejection::Constraint)?
        .holder;
    let admitted = info
        .constraint()
        .allows(declaration.holder, caller_holder, || {
            program.is_subtype(caller_holder, declaration.holder)
        });
    if !admitted {
        return Err(InlineRejection::Constraint);
    }

    let mut null_check = false;
    if kind.has_receiver() && !declaration.is_static() {
        let receiver_may_be_null = args
            .first()
            .is_some_and(|r| code.value(*r).nullability != Nullability::NotNull);
        if receiver_may_be_null {
            if !ctx.config.enable_inlining_of_invokes_with_nullable_receivers {
                return Err(InlineRejection::NullableReceiver);
            }
            null_check = !info.checks_null_receiver_before_side_effect;
        }
    }

    let combined = code.size_estimate().saturating_sub(1) + info.size + usize::from(null_check);
    if combined > ctx.config.inlining_instruction_limit {
        return Err(InlineRejection::Budget);
    }

    Ok(InlinePlan {
        target,
        callee,
        null_check,
    })
}

/// Replaces the call at `index` of `block` with a copy of `callee`.
///
/// Returns the continuation block, or `None` if the site is not a call or
/// the callee's entry block has phis.
pub fn inline_call(
    code: &mut IrCode,
    block: BlockId,
    index: usize,
    callee: &IrCode,
    null_check: bool,
) -> Option<BlockId> {
    let call = code.block(block)?.instructions.get(index)?.clone();
    let Op::Invoke { args, .. } = &call.op else {
        return None;
    };
    if callee.block(callee.entry).is_some_and(|b| !b.phis.is_empty()) {
        return None;
    }
    let call_site = call.position.clone();

    let continuation = code.split_block(block, index + 1)?;
    if let Some(b) = code.block_mut(block) {
        b.instructions.truncate(index);
        if null_check {
            if let Some(&receiver) = args.first() {
                b.instructions.push(
                    Instruction::new(Op::NullCheck { value: receiver }, None).at(call_site.clone()),
                );
            }
        }
    }

    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for id in callee.block_ids() {
        block_map.insert(id, code.add_block());
    }
    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    for (position, argument) in callee.arguments().into_iter().enumerate() {
        if let Some(&operand) = args.get(position) {
            value_map.insert(argument, operand);
        }
    }
    for id in callee.block_ids() {
        let Some(b) = callee.block(id) else {
            continue;
        };
        let defined = b
            .phis
            .iter()
            .map(|phi| phi.dest)
            .chain(b.instructions.iter().filter_map(|i| i.dest));
        for value in defined {
            if !value_map.contains_key(&value) {
                let fresh = code.new_value(callee.value(value).clone());
                value_map.insert(value, fresh);
            }
        }
    }
    let map_value = |value: ValueId| value_map.get(&value).copied().unwrap_or(value);
    let map_block = |id: BlockId| block_map.get(&id).copied().unwrap_or(id);

    let mut returns: Vec<(BlockId, Option<ValueId>)> = Vec::new();
    for id in callee.block_ids() {
        let Some(source) = callee.block(id) else {
            continue;
        };
        let target = map_block(id);
        let phis: Vec<Phi> = source
            .phis
            .iter()
            .map(|phi| Phi {
                dest: map_value(phi.dest),
                operands: phi
                    .operands
                    .iter()
                    .map(|o| PhiOperand {
                        value: map_value(o.value),
                        predecessor: map_block(o.predecessor),
                    })
                    .collect(),
            })
            .collect();
        let mut instructions = Vec::with_capacity(source.instructions.len());
        for instr in &source.instructions {
            if matches!(instr.op, Op::Argument { .. }) {
                continue;
            }
            let position = instr.position.with_outermost_caller(&call_site);
            if let Op::Return { value } = instr.op {
                returns.push((target, value.map(map_value)));
                instructions
                    .push(Instruction::new(Op::Goto { target: continuation }, None).at(position));
                continue;
            }
            let mut op = instr.op.clone();
            op.for_each_use_mut(|v| *v = map_value(*v));
            op.for_each_target_mut(|b| *b = map_block(*b));
            instructions.push(Instruction::new(op, instr.dest.map(map_value)).at(position));
        }
        if let Some(b) = code.block_mut(target) {
            b.phis = phis;
            b.instructions = instructions;
        }
    }

    let entry = map_block(callee.entry);
    if let Some(b) = code.block_mut(block) {
        b.instructions
            .push(Instruction::new(Op::Goto { target: entry }, None).at(call_site));
    }

    if let Some(dest) = call.dest {
        let values: Vec<(BlockId, ValueId)> = returns
            .iter()
            .filter_map(|(b, v)| v.map(|v| (*b, v)))
            .collect();
        match values.as_slice() {
            [] => {}
            [(_, single)] if returns.len() == 1 => {
                code.replace_all_uses(dest, *single);
            }
            _ => {
                if let Some(b) = code.block_mut(continuation) {
                    b.phis.push(Phi {
                        dest,
                        operands: values
                            .iter()
                            .map(|&(predecessor, value)| PhiOperand { value, predecessor })
                            .collect(),
                    });
                }
            }
        }
    }
    if returns.is_empty() {
        code.remove_unreachable_blocks();
    }
    Some(continuation)
}

/// Inlining pass.
pub struct Inliner;

impl Inliner {
    /// Inlines every eligible call site; returns the number of inlined calls.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible for symmetry with other passes.
    pub fn apply(code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<usize> {
        let sites: Vec<(BlockId, usize)> = code
            .instructions()
            .filter(|(_, _, instr)| matches!(instr.op, Op::Invoke { .. }))
            .map(|(block, index, _)| (block, index))
            .collect();

        let mut inlined = 0;
        for &(block, index) in sites.iter().rev() {
            match evaluate(code, block, index, ctx) {
                Ok(plan) => {
                    if inline_call(code, block, index, &plan.callee, plan.null_check).is_some() {
                        ctx.compiler.mark_inlined(plan.target);
                        ctx.events()
                            .record(EventKind::MethodInlined)
                            .method(ctx.method)
                            .pass("inlining")
                            .message(format!(
                                "inlined {} ({} instructions{})",
                                ctx.program.describe(plan.target),
                                plan.callee.size_estimate(),
                                if plan.null_check { ", null check" } else { "" }
                            ));
                        inlined += 1;
                    }
                }
                Err(reason) => {
                    ctx.events()
                        .record(EventKind::InlineRejected)
                        .at(ctx.method, index)
                        .pass("inlining")
                        .message(reason.to_string());
                }
            }
        }
        if inlined > 0 {
            code.remove_trivial_phis();
        }
        Ok(inlined)
    }
}

impl IrPass for Inliner {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn description(&self) -> &'static str {
        "Replaces call sites with optimized callee bodies"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        ctx.config.inlining_enabled()
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        Ok(Self::apply(code, ctx)? > 0)
    }
}
