//! Call-site rewrites driven by the class hierarchy and callee facts.
//!
//! - [`Devirtualizer`]: binds virtual and interface calls with a unique target
//! - [`MoveResultRewriter`]: forwards arguments of callees returning them
//! - [`LibraryCallRewriter`]: replaces well-known runtime calls with IR
//!   operations (`Long.compare`, `Objects.requireNonNull`, constant
//!   `String.length` and `String.isEmpty`)
//! - [`NeverReturnsPruner`]: cuts code following calls that always throw

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
        passes::deadcode::constant_values,
    },
    ir::{
        BlockId, Constant, Instruction, InvokeKind, IrCode, Nullability, Op, ValueData, ValueId,
        ValueType,
    },
    program::{known, ClassId, MethodId, Program},
    Result,
};

/// Resolves the method a dynamic call on a receiver of static class `class` reaches.
fn resolve_on_class(program: &Program, class: ClassId, method: MethodId) -> Option<MethodId> {
    let target = program.lookup_virtual(class, method)?;
    let overridden_below = program.overriders(target).into_iter().any(|o| {
        program
            .method(o)
            .is_ok_and(|m| m.holder != class && program.is_subtype(m.holder, class))
    });
    (!overridden_below).then_some(target)
}

/// Devirtualization pass.
pub struct Devirtualizer;

impl Devirtualizer {
    /// Rebinds dynamic calls; returns the number of rewritten calls.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let mut rewrites = Vec::new();
        for (block, index, instr) in code.instructions() {
            let Op::Invoke { kind, method, args } = &instr.op else {
                continue;
            };
            if !kind.is_dynamic() {
                continue;
            }
            let receiver_class = args.first().and_then(|r| code.value(*r).class);
            let target = program
                .single_target(*kind, *method)
                .or_else(|| receiver_class.and_then(|c| resolve_on_class(program, c, *method)));
            if let Some(target) = target {
                if target != *method || *kind == InvokeKind::Interface {
                    rewrites.push((block, index, target));
                }
            }
        }
        for &(block, index, target) in &rewrites {
            if let Some(Instruction {
                op: Op::Invoke { kind, method, .. },
                ..
            }) = code.block_mut(block).and_then(|b| b.instructions.get_mut(index))
            {
                *kind = InvokeKind::Virtual;
                *method = target;
            }
        }
        rewrites.len()
    }
}

impl IrPass for Devirtualizer {
    fn name(&self) -> &'static str {
        "devirtualization"
    }

    fn description(&self) -> &'static str {
        "Binds dynamic calls that can reach only one implementation"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let count = Self::apply(code, ctx.program);
        if count > 0 {
            ctx.events()
                .record(EventKind::Devirtualized)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("devirtualized {count} calls"));
        }
        Ok(count > 0)
    }
}

/// Rewrites uses of call results that are known to be an argument.
pub struct MoveResultRewriter;

impl MoveResultRewriter {
    /// Returns the number of forwarded call results.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let mut forwards = Vec::new();
        for (block, index, instr) in code.instructions() {
            let (Op::Invoke { kind, method, args }, Some(dest)) = (&instr.op, instr.dest) else {
                continue;
            };
            let Some(target) = program.single_target(*kind, *method) else {
                continue;
            };
            if let Some(argument) = program
                .info(target)
                .returns_argument
                .and_then(|i| args.get(i).copied())
            {
                if code.value(argument).ty == code.value(dest).ty {
                    forwards.push((block, index, dest, argument));
                }
            }
        }
        for &(block, index, dest, argument) in &forwards {
            if let Some(instr) = code
                .block_mut(block)
                .and_then(|b| b.instructions.get_mut(index))
            {
                instr.dest = None;
            }
            code.replace_all_uses(dest, argument);
        }
        forwards.len()
    }
}

impl IrPass for MoveResultRewriter {
    fn name(&self) -> &'static str {
        "move-result-rewriting"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let count = Self::apply(code, ctx.program);
        if count > 0 {
            ctx.events()
                .record(EventKind::MoveResultRewritten)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("forwarded {count} call results"));
        }
        Ok(count > 0)
    }
}

/// Replaces well-known library calls with equivalent IR.
pub struct LibraryCallRewriter;

impl LibraryCallRewriter {
    /// Returns the number of rewritten calls.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let constants = constant_values(code);
        let mut rewrites: Vec<(BlockId, usize, Op, Option<(ValueId, ValueId)>)> = Vec::new();

        for (block, index, instr) in code.instructions() {
            let Op::Invoke { method, args, .. } = &instr.op else {
                continue;
            };
            let method = *method;
            match args.as_slice() {
                [left, right] if program.is_method(method, known::LONG, "compare") => {
                    rewrites.push((
                        block,
                        index,
                        Op::Cmp {
                            left: *left,
                            right: *right,
                        },
                        None,
                    ));
                }
                [value] if program.is_method(method, known::OBJECTS, "requireNonNull") => {
                    rewrites.push((
                        block,
                        index,
                        Op::NullCheck { value: *value },
                        instr.dest.map(|dest| (dest, *value)),
                    ));
                }
                [receiver] => {
                    let Some(text) = constants.get(receiver).and_then(Constant::as_str) else {
                        continue;
                    };
                    let folded = if program.is_method(method, known::STRING, "length") {
                        text.encode_utf16().count()
                    } else if program.is_method(method, known::STRING, "isEmpty") {
                        usize::from(text.is_empty())
                    } else {
                        continue;
                    };
                    let Ok(folded) = i32::try_from(folded) else {
                        continue;
                    };
                    rewrites.push((block, index, Op::Const(Constant::Int(folded)), None));
                }
                _ => {}
            }
        }

        for (block, index, op, alias) in &rewrites {
            if let Some(instr) = code
                .block_mut(*block)
                .and_then(|b| b.instructions.get_mut(*index))
            {
                instr.op = op.clone();
                if alias.is_some() {
                    instr.dest = None;
                }
            }
            if let Some((dest, value)) = alias {
                code.replace_all_uses(*dest, *value);
            }
        }
        rewrites.len()
    }
}

impl IrPass for LibraryCallRewriter {
    fn name(&self) -> &'static str {
        "library-call-rewriting"
    }

    fn description(&self) -> &'static str {
        "Replaces well-known runtime calls with IR operations"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let count = Self::apply(code, ctx.program);
        if count > 0 {
            ctx.events()
                .record(EventKind::ConstantFolded)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("rewrote {count} library calls"));
        }
        Ok(count > 0)
    }
}

/// Removes the code after calls whose target never returns normally.
pub struct NeverReturnsPruner;

impl NeverReturnsPruner {
    /// Returns the number of pruned call sites.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let mut sites = Vec::new();
        for block in code.block_ids() {
            let Some(b) = code.block(block) else {
                continue;
            };
            for (index, instr) in b.instructions.iter().enumerate() {
                let Op::Invoke { kind, method, .. } = &instr.op else {
                    continue;
                };
                let never_returns = program
                    .single_target(*kind, *method)
                    .is_some_and(|t| program.info(t).never_returns_normally);
                if !never_returns {
                    continue;
                }
                let already_pruned = match &b.instructions[index + 1..] {
                    [Instruction {
                        op: Op::Throw { .. },
                        ..
                    }] => true,
                    [Instruction {
                        op: Op::Const(Constant::Null),
                        ..
                    }, Instruction {
                        op: Op::Throw { .. },
                        ..
                    }] => true,
                    _ => false,
                };
                if !already_pruned {
                    sites.push((block, index, instr.position.clone()));
                }
                break;
            }
        }

        for (block, index, position) in &sites {
            let null = code.new_value(
                ValueData::new(ValueType::Reference).with_nullability(Nullability::Null),
            );
            let Some(b) = code.block_mut(*block) else {
                continue;
            };
            let successors = b.successors();
            b.instructions.truncate(index + 1);
            b.instructions.push(
                Instruction::new(Op::Const(Constant::Null), Some(null)).at(position.clone()),
            );
            b.instructions
                .push(Instruction::new(Op::Throw { exception: null }, None).at(position.clone()));
            for successor in successors {
                if let Some(succ) = code.block_mut(successor) {
                    for phi in &mut succ.phis {
                        phi.operands.retain(|o| o.predecessor != *block);
                    }
                }
            }
        }
        if !sites.is_empty() {
            code.remove_unreachable_blocks();
            code.remove_trivial_phis();
        }
        sites.len()
    }
}

impl IrPass for NeverReturnsPruner {
    fn name(&self) -> &'static str {
        "never-returns-pruning"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let count = Self::apply(code, ctx.program);
        if count > 0 {
            ctx.events()
                .record(EventKind::InstructionRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("pruned code after {count} non-returning calls"));
        }
        Ok(count > 0)
    }
}
