//! Non-null tracking.
//!
//! [`NonNullInserter`] places `v' = non-null v` after every instruction that
//! dereferences a maybe-null `v` and redirects the uses dominated by that
//! point to `v'`. Later passes then see the stronger fact on `v'`: null tests
//! fold, null checks disappear and calls on `v'` may be removed or inlined
//! without a guard.
//!
//! [`NonNullRemover`] strips the markers again before lowering.

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    ir::{BlockId, Instruction, IrCode, Nullability, Op, ValueId, ValueType},
    utils::graph::algorithms::DominatorTree,
    Result,
};

/// Redirects uses of `old` dominated by instruction `index` of `block` to `new`.
fn replace_dominated_uses(
    code: &mut IrCode,
    dominators: &DominatorTree,
    block: BlockId,
    index: usize,
    old: ValueId,
    new: ValueId,
) -> usize {
    let mut replaced = 0;
    for other in code.block_ids() {
        let strictly_dominated = dominators.strictly_dominates(block.node(), other.node());
        let Some(b) = code.block_mut(other) else {
            continue;
        };
        for phi in &mut b.phis {
            for operand in &mut phi.operands {
                if operand.value == old
                    && dominators.dominates(block.node(), operand.predecessor.node())
                {
                    operand.value = new;
                    replaced += 1;
                }
            }
        }
        let start = if other == block {
            index + 1
        } else if strictly_dominated {
            0
        } else {
            continue;
        };
        for instr in b.instructions.iter_mut().skip(start) {
            if instr.op.replace_use(old, new) {
                replaced += 1;
            }
        }
    }
    replaced
}

/// Inserts non-null markers after dereferences.
pub struct NonNullInserter;

impl NonNullInserter {
    /// Returns the number of inserted markers.
    pub fn apply(code: &mut IrCode) -> usize {
        let dominators = code.dominators();
        let mut inserted = 0;

        for node in dominators.preorder() {
            let block = BlockId(node.index());
            let mut index = 0;
            loop {
                let Some(instr) = code.block(block).and_then(|b| b.instructions.get(index)) else {
                    break;
                };
                let candidate = instr.op.dereferenced().filter(|value| {
                    code.try_value(*value).is_some_and(|data| {
                        data.ty == ValueType::Reference && data.nullability != Nullability::NotNull
                    })
                });
                let Some(value) = candidate else {
                    index += 1;
                    continue;
                };
                let position = instr.position.clone();

                let mut data = code.value(value).clone().with_nullability(Nullability::NotNull);
                data.local = None;
                let marker = code.new_value(data);
                if let Some(b) = code.block_mut(block) {
                    b.instructions.insert(
                        index + 1,
                        Instruction::new(Op::NonNull { value }, Some(marker)).at(position),
                    );
                }
                if replace_dominated_uses(code, &dominators, block, index + 1, value, marker) > 0 {
                    inserted += 1;
                    index += 2;
                } else if let Some(b) = code.block_mut(block) {
                    b.instructions.remove(index + 1);
                    index += 1;
                }
            }
        }
        inserted
    }
}

impl IrPass for NonNullInserter {
    fn name(&self) -> &'static str {
        "non-null-insertion"
    }

    fn description(&self) -> &'static str {
        "Marks values as non-null after they are dereferenced"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let inserted = Self::apply(code);
        if inserted > 0 {
            ctx.events()
                .record(EventKind::NonNullInserted)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("inserted {inserted} non-null markers"));
        }
        Ok(inserted > 0)
    }
}

/// Removes non-null markers, redirecting their uses to the original value.
pub struct NonNullRemover;

impl NonNullRemover {
    /// Returns the number of removed markers.
    pub fn apply(code: &mut IrCode) -> usize {
        let mut aliases = Vec::new();
        for block in code.block_ids() {
            let Some(b) = code.block_mut(block) else {
                continue;
            };
            b.instructions.retain(|instr| match (&instr.op, instr.dest) {
                (Op::NonNull { value }, Some(dest)) => {
                    aliases.push((dest, *value));
                    false
                }
                _ => true,
            });
        }
        for &(dest, value) in &aliases {
            code.replace_all_uses(dest, value);
        }
        aliases.len()
    }
}

impl IrPass for NonNullRemover {
    fn name(&self) -> &'static str {
        "non-null-removal"
    }

    fn run(&self, code: &mut IrCode, _ctx: &MethodContext<'_>) -> Result<bool> {
        Ok(Self::apply(code) > 0)
    }
}
