//! Dead code elimination pass.
//!
//! This pass removes:
//!
//! 1. **Unreachable blocks**: blocks no path from the entry reaches
//! 2. **Dead instructions**: definitions whose result is unused and whose
//!    execution has no observable effect
//! 3. **Dead phis**: phis only kept alive by other dead phis (cycles included)
//! 4. **Redundant null checks**: checks of values already known to be non-null
//!
//! The pass iterates until no more code can be removed, since removing one
//! instruction frequently makes its operands dead.

use std::collections::{HashMap, HashSet};

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    ir::{BlockId, Constant, DefSite, IrCode, Nullability, Op, ValueId},
    program::Program,
    Result,
};

/// Maximum iterations for the fixed-point loop.
const MAX_ITERATIONS: usize = 100;

/// Counts of removed code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadCodeStats {
    /// Removed instructions.
    pub instructions: usize,
    /// Removed phis.
    pub phis: usize,
    /// Removed blocks.
    pub blocks: usize,
}

impl DeadCodeStats {
    /// Returns true if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions == 0 && self.phis == 0 && self.blocks == 0
    }
}

/// Maps every value defined by a `Const` instruction to its constant.
#[must_use]
pub fn constant_values(code: &IrCode) -> HashMap<ValueId, Constant> {
    code.instructions()
        .filter_map(|(_, _, instr)| match (&instr.op, instr.dest) {
            (Op::Const(constant), Some(dest)) => Some((dest, constant.clone())),
            _ => None,
        })
        .collect()
}

/// Returns true if executing `op` can be skipped when its result is unused.
pub(crate) fn is_removable(
    code: &IrCode,
    op: &Op,
    constants: &HashMap<ValueId, Constant>,
    program: &Program,
) -> bool {
    let not_null = |value: ValueId| {
        code.try_value(value)
            .is_some_and(|data| data.nullability == Nullability::NotNull)
    };
    match op {
        Op::Argument { .. } => false,
        Op::NullCheck { value } => not_null(*value),
        Op::Invoke { kind, method, args } => {
            let Some(target) = program.single_target(*kind, *method) else {
                return false;
            };
            let receiver_ok = !kind.has_receiver() || args.first().is_some_and(|r| not_null(*r));
            receiver_ok && program.info(target).side_effect_free
        }
        _ if op.has_side_effects() => false,
        Op::Binary { op, right, .. } if op.is_division() => constants
            .get(right)
            .and_then(Constant::as_i64)
            .is_some_and(|divisor| divisor != 0),
        Op::NewInstance { class } => {
            !program.has_clinit_side_effects(*class) && !program.declares_finalizer(*class)
        }
        Op::NewArray { size } => constants
            .get(size)
            .and_then(Constant::as_i64)
            .is_some_and(|size| size >= 0),
        Op::ArrayLength { array } => not_null(*array),
        Op::InstanceGet { object, .. } => not_null(*object),
        Op::StaticGet { field } => program
            .field(*field)
            .is_ok_and(|f| !program.has_clinit_side_effects(f.holder)),
        Op::CheckCast { value, .. } => matches!(constants.get(value), Some(Constant::Null)),
        _ => !op.may_throw(),
    }
}

/// Removes unreachable blocks, dead instructions and dead phis.
///
/// With `keep_locals` set, definitions of named source locals survive so a
/// debugger can still observe them.
pub fn eliminate_dead_code(code: &mut IrCode, program: &Program, keep_locals: bool) -> DeadCodeStats {
    let mut stats = DeadCodeStats {
        blocks: code.remove_unreachable_blocks(),
        ..DeadCodeStats::default()
    };

    for _ in 0..MAX_ITERATIONS {
        let (instructions, phis) = sweep(code, program, keep_locals);
        stats.instructions += instructions;
        stats.phis += phis;
        if instructions == 0 && phis == 0 {
            break;
        }
    }
    stats
}

/// One mark-and-sweep round; returns removed (instructions, phis).
fn sweep(code: &mut IrCode, program: &Program, keep_locals: bool) -> (usize, usize) {
    let constants = constant_values(code);
    let definitions = code.definitions();

    // Roots are instructions that must execute regardless of their result.
    let mut removable: HashSet<(BlockId, usize)> = HashSet::new();
    let mut work: Vec<ValueId> = Vec::new();
    for (block, index, instr) in code.instructions() {
        let named = keep_locals
            && instr
                .dest
                .is_some_and(|dest| code.value(dest).local.is_some());
        if !named
            && !instr.op.is_terminator()
            && is_removable(code, &instr.op, &constants, program)
        {
            removable.insert((block, index));
        } else {
            work.extend(instr.op.uses());
        }
    }
    if keep_locals {
        for block in code.block_ids() {
            if let Some(b) = code.block(block) {
                work.extend(
                    b.phis
                        .iter()
                        .filter(|phi| code.value(phi.dest).local.is_some())
                        .map(|phi| phi.dest),
                );
            }
        }
    }

    let mut live: HashSet<ValueId> = HashSet::new();
    while let Some(value) = work.pop() {
        if !live.insert(value) {
            continue;
        }
        match definitions.get(&value) {
            Some(DefSite::Instruction { block, index }) => {
                if let Some(instr) = code.block(*block).and_then(|b| b.instructions.get(*index)) {
                    work.extend(instr.op.uses());
                }
            }
            Some(DefSite::Phi { block, index }) => {
                if let Some(phi) = code.block(*block).and_then(|b| b.phis.get(*index)) {
                    work.extend(phi.operands.iter().map(|o| o.value));
                }
            }
            None => {}
        }
    }

    let mut removed_instructions = 0;
    let mut removed_phis = 0;
    for block in code.block_ids() {
        let Some(b) = code.block_mut(block) else {
            continue;
        };
        let before = b.phis.len();
        b.phis.retain(|phi| live.contains(&phi.dest));
        removed_phis += before - b.phis.len();

        let mut index = 0;
        b.instructions.retain(|instr| {
            let keep = !removable.contains(&(block, index))
                || instr.dest.is_some_and(|dest| live.contains(&dest));
            index += 1;
            if !keep {
                removed_instructions += 1;
            }
            keep
        });
    }
    (removed_instructions, removed_phis)
}

/// Dead code elimination pass.
pub struct DeadCodeRemover;

impl IrPass for DeadCodeRemover {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn description(&self) -> &'static str {
        "Eliminates unreachable code and unused definitions"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let stats = eliminate_dead_code(code, ctx.program, ctx.config.debug);
        if stats.is_empty() {
            return Ok(false);
        }
        let events = ctx.events();
        if stats.instructions > 0 {
            events
                .record(EventKind::InstructionRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("removed {} dead instructions", stats.instructions));
        }
        if stats.phis > 0 {
            events
                .record(EventKind::PhiSimplified)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("removed {} dead phis", stats.phis));
        }
        if stats.blocks > 0 {
            events
                .record(EventKind::BlockRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("removed {} unreachable blocks", stats.blocks));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{verify_ssa, BinaryOp, IfCond, IrBuilder, ValueType},
        program::MethodId,
    };

    #[test]
    fn test_removes_unused_arithmetic_chain() {
        let program = Program::new();
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let one = b.const_int(1);
        let sum = b.binary(BinaryOp::Add, x, one);
        let _twice = b.binary(BinaryOp::Mul, sum, sum);
        b.ret(Some(x));
        let mut code = b.finish();

        let stats = eliminate_dead_code(&mut code, &program, false);
        assert_eq!(stats.instructions, 3);
        assert_eq!(code.size_estimate(), 1);
        assert_eq!(code.arguments(), vec![x]);
        verify_ssa(&code, "test").unwrap();
    }

    #[test]
    fn test_keeps_division_by_unknown_divisor() {
        let program = Program::new();
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let y = b.argument(ValueType::Int);
        let _quotient = b.binary(BinaryOp::Div, x, y);
        let two = b.const_int(2);
        let _safe = b.binary(BinaryOp::Div, x, two);
        b.ret(None);
        let mut code = b.finish();

        let stats = eliminate_dead_code(&mut code, &program, false);
        assert_eq!(stats.instructions, 2);
        assert!(code
            .instructions()
            .any(|(_, _, i)| matches!(i.op, Op::Binary { right, .. } if right == y)));
    }

    #[test]
    fn test_removes_dead_phi_cycle() {
        let program = Program::new();
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let header = b.new_block();
        let body = b.new_block();
        let exit = b.new_block();
        let entry = b.current_block();
        b.goto(header);

        b.switch_to(header);
        let phi = b.phi(ValueType::Int, &[(entry, x)]);
        b.if_zero(IfCond::Eq, x, exit, body);

        b.switch_to(body);
        let one = b.const_int(1);
        let next = b.binary(BinaryOp::Add, phi, one);
        b.goto(header);

        b.switch_to(exit);
        b.ret(None);
        let mut code = b.finish();
        if let Some(block) = code.block_mut(header) {
            block.phis[0].operands.push(crate::ir::PhiOperand {
                value: next,
                predecessor: body,
            });
        }

        let stats = eliminate_dead_code(&mut code, &program, false);
        assert_eq!(stats.phis, 1);
        assert_eq!(stats.instructions, 2);
        verify_ssa(&code, "test").unwrap();
    }

    #[test]
    fn test_keeps_named_locals_in_debug() {
        let program = Program::new();
        let mut b = IrBuilder::new(MethodId(0));
        let c = b.const_int(4);
        b.named(c, "count");
        b.ret(None);
        let mut code = b.finish();

        assert_eq!(eliminate_dead_code(&mut code.clone(), &program, true).instructions, 0);
        assert_eq!(eliminate_dead_code(&mut code, &program, false).instructions, 1);
    }
}
