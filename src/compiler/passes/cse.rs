//! Common subexpression elimination over the dominator tree.
//!
//! Pure computations are keyed by their operation with operands resolved
//! through earlier replacements and commutative operands ordered. A
//! computation is reused only if its definition dominates the duplicate.

use std::collections::HashMap;

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    ir::{BlockId, IrCode, Op, ValueId},
    Result,
};

fn normalized(op: &Op, replacements: &HashMap<ValueId, ValueId>) -> Op {
    let mut key = op.clone();
    key.for_each_use_mut(|value| {
        if let Some(replacement) = replacements.get(value) {
            *value = *replacement;
        }
    });
    if let Op::Binary {
        op, left, right, ..
    } = &mut key
    {
        if op.is_commutative() && *left > *right {
            std::mem::swap(left, right);
        }
    }
    key
}

/// Reuses dominating computations of the same pure expression.
pub struct CommonSubexpressionEliminator;

impl CommonSubexpressionEliminator {
    /// Returns the number of eliminated computations.
    ///
    /// With `keep_locals` set, named values are never replaced.
    pub fn apply(code: &mut IrCode, keep_locals: bool) -> usize {
        let dominators = code.dominators();
        let mut available: HashMap<Op, Vec<(BlockId, ValueId)>> = HashMap::new();
        let mut replacements: HashMap<ValueId, ValueId> = HashMap::new();
        let mut removals: Vec<(BlockId, usize)> = Vec::new();

        for node in dominators.preorder() {
            let block = BlockId(node.index());
            let Some(b) = code.block(block) else {
                continue;
            };
            for (index, instr) in b.instructions.iter().enumerate() {
                let Some(dest) = instr.dest else {
                    continue;
                };
                if !instr.op.is_pure_computation() {
                    continue;
                }
                let key = normalized(&instr.op, &replacements);
                let named = keep_locals && code.value(dest).local.is_some();
                let existing = available.get(&key).and_then(|candidates| {
                    candidates
                        .iter()
                        .find(|(def_block, value)| {
                            dominators.dominates(def_block.node(), block.node())
                                && code.value(*value).ty == code.value(dest).ty
                        })
                        .map(|(_, value)| *value)
                });
                match existing {
                    Some(value) if !named => {
                        replacements.insert(dest, value);
                        removals.push((block, index));
                    }
                    _ => available.entry(key).or_default().push((block, dest)),
                }
            }
        }

        for &(block, index) in removals.iter().rev() {
            if let Some(b) = code.block_mut(block) {
                b.instructions.remove(index);
            }
        }
        for (&old, &new) in &replacements {
            code.replace_all_uses(old, new);
        }
        removals.len()
    }
}

impl IrPass for CommonSubexpressionEliminator {
    fn name(&self) -> &'static str {
        "common-subexpression-elimination"
    }

    fn description(&self) -> &'static str {
        "Reuses dominating computations of identical pure expressions"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let eliminated = Self::apply(code, ctx.config.debug);
        if eliminated > 0 {
            ctx.events()
                .record(EventKind::ExpressionReused)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("reused {eliminated} expressions"));
        }
        Ok(eliminated > 0)
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
    fn test_commutative_duplicates_are_reused() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let y = b.argument(ValueType::Int);
        let first = b.binary(BinaryOp::Add, x, y);
        let second = b.binary(BinaryOp::Add, y, x);
        let product = b.binary(BinaryOp::Mul, first, second);
        b.ret(Some(product));
        let mut code = b.finish();

        assert_eq!(CommonSubexpressionEliminator::apply(&mut code, false), 1);
        let multiply = code.defining_instruction(product).unwrap();
        assert_eq!(multiply.op.uses(), vec![first, first]);
        verify_ssa(&code, "cse").unwrap();
    }

    #[test]
    fn test_non_dominating_computation_is_not_reused() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let left = b.new_block();
        let right = b.new_block();
        let join = b.new_block();
        b.if_zero(IfCond::Eq, x, left, right);

        b.switch_to(left);
        let a = b.unary(crate::ir::UnaryOp::Neg, x);
        b.goto(join);

        b.switch_to(right);
        b.goto(join);

        b.switch_to(join);
        let c = b.unary(crate::ir::UnaryOp::Neg, x);
        let merged = b.phi(ValueType::Int, &[(left, a), (right, x)]);
        let sum = b.binary(BinaryOp::Add, merged, c);
        b.ret(Some(sum));
        let mut code = b.finish();

        assert_eq!(CommonSubexpressionEliminator::apply(&mut code, false), 0);
    }
}
