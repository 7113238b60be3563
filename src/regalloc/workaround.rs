//! Workaround for runtimes that mislink a long add or subtract at the start
//! of a block.
//!
//! Affected runtimes may place the first machine instruction of such a block
//! in a prologue that is skipped when the block is entered by a jump. If the
//! first materializing instruction of a block that is only entered by jumps
//! is a long add or subtract, a forced constant definition and a forced user
//! of it are placed in front.

use std::collections::HashMap;

use crate::ir::{BinaryOp, BlockId, Instruction, IrCode, NumericType, Op, ValueData, ValueType};

/// Returns true for instructions that always produce machine code.
fn is_materializing(op: &Op) -> bool {
    !matches!(op, Op::DebugPosition | Op::Move { .. }) && !is_possibly_elided_long_operation(op)
}

/// Long multiply and divide may be folded into their users by the runtime.
fn is_possibly_elided_long_operation(op: &Op) -> bool {
    matches!(
        op,
        Op::Binary {
            op: BinaryOp::Mul | BinaryOp::Div,
            ty: NumericType::Long,
            ..
        }
    )
}

fn needs_fix(op: &Op) -> bool {
    matches!(
        op,
        Op::Binary {
            op: BinaryOp::Add | BinaryOp::Sub,
            ty: NumericType::Long,
            ..
        }
    )
}

/// Inserts the forced definition/user pair where needed.
///
/// `order` is the traced block layout, used to find blocks entered by
/// fallthrough. Returns the number of blocks fixed.
pub fn materialize_before_long_operations(code: &mut IrCode, order: &[BlockId]) -> usize {
    let layout: HashMap<BlockId, usize> = order.iter().enumerate().map(|(i, &b)| (b, i)).collect();
    let predecessors = code.predecessors();

    let mut targets = Vec::new();
    for &id in order {
        let Some(block) = code.block(id) else {
            continue;
        };
        let Some((index, first)) = block
            .instructions
            .iter()
            .enumerate()
            .find(|(_, instr)| is_materializing(&instr.op))
        else {
            continue;
        };
        if !needs_fix(&first.op) {
            continue;
        }

        let entered_by_fallthrough = predecessors[id.index()].iter().any(|&pred| {
            let follows = layout
                .get(&pred)
                .is_some_and(|&p| order.get(p + 1) == Some(&id));
            let falls = code
                .block(pred)
                .and_then(|b| b.terminator())
                .is_some_and(|t| match &t.op {
                    Op::Goto { target } => *target == id,
                    Op::If { else_target, .. } => *else_target == id,
                    Op::Switch { default, .. } => *default == id,
                    _ => false,
                });
            follows && falls
        });
        if !entered_by_fallthrough {
            targets.push((id, index, first.position.clone()));
        }
    }

    for (id, index, position) in &targets {
        let (id, index) = (*id, *index);
        let fix = code.new_value(ValueData::new(ValueType::Int));
        if let Some(block) = code.block_mut(id) {
            block.instructions.insert(
                index,
                Instruction::new(Op::AlwaysMaterializingUser { value: fix }, None).at(position.clone()),
            );
            block.instructions.insert(
                index,
                Instruction::new(Op::AlwaysMaterializingDefinition, Some(fix)).at(position.clone()),
            );
        }
    }
    targets.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{IfCond, IrBuilder},
        program::MethodId,
    };

    #[test]
    fn test_jump_target_gets_forced_definition() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Long);
        let flag = b.argument(ValueType::Int);
        let then_block = b.new_block();
        let else_block = b.new_block();
        b.if_zero(IfCond::Eq, flag, then_block, else_block);
        b.switch_to(then_block);
        let doubled = b.binary(BinaryOp::Add, x, x);
        b.ret(Some(doubled));
        b.switch_to(else_block);
        b.ret(Some(x));
        let mut code = b.finish();

        let order = vec![code.entry, else_block, then_block];
        assert_eq!(materialize_before_long_operations(&mut code, &order), 1);
        let block = code.block(then_block).unwrap();
        assert!(matches!(block.instructions[0].op, Op::AlwaysMaterializingDefinition));
        assert!(matches!(block.instructions[1].op, Op::AlwaysMaterializingUser { .. }));
    }

    #[test]
    fn test_fallthrough_block_is_left_alone() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Long);
        let flag = b.argument(ValueType::Int);
        let then_block = b.new_block();
        let else_block = b.new_block();
        b.if_zero(IfCond::Eq, flag, then_block, else_block);
        b.switch_to(then_block);
        b.ret(Some(x));
        b.switch_to(else_block);
        let doubled = b.binary(BinaryOp::Sub, x, x);
        b.ret(Some(doubled));
        let mut code = b.finish();

        let order = vec![code.entry, else_block, then_block];
        assert_eq!(materialize_before_long_operations(&mut code, &order), 0);
    }
}
