//! Cleanup of lowered register code.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::BlockId,
    output::{RegisterBlock, RegisterInstruction, RegisterOp},
};

/// Rounds of goto collapsing and move elimination after allocation.
pub const PEEPHOLE_PASSES: usize = 2;

/// Runs [`PEEPHOLE_PASSES`] rounds of cleanup and a final goto collapse.
///
/// Returns the number of instructions and blocks removed.
pub fn optimize(blocks: &mut Vec<RegisterBlock>) -> usize {
    let mut removed = 0;
    for _ in 0..PEEPHOLE_PASSES {
        removed += collapse_trivial_gotos(blocks);
        removed += remove_redundant_moves(blocks);
    }
    removed + collapse_trivial_gotos(blocks)
}

/// Retargets branches past blocks that only jump, drops jumps to the next
/// block in layout, and removes blocks nothing reaches.
pub fn collapse_trivial_gotos(blocks: &mut Vec<RegisterBlock>) -> usize {
    let mut trivial: HashMap<BlockId, BlockId> = HashMap::new();
    for (i, block) in blocks.iter().enumerate() {
        match block.instructions.as_slice() {
            [only] => {
                if let RegisterOp::Goto { target } = only.op {
                    trivial.insert(block.label, target);
                }
            }
            [] => {
                if let Some(next) = blocks.get(i + 1) {
                    trivial.insert(block.label, next.label);
                }
            }
            _ => {}
        }
    }

    let resolve = |start: BlockId| {
        let mut current = start;
        let mut seen = HashSet::new();
        while let Some(&next) = trivial.get(&current) {
            if !seen.insert(current) || next == current {
                break;
            }
            current = next;
        }
        current
    };

    let mut removed = 0;
    for block in blocks.iter_mut() {
        for instr in &mut block.instructions {
            instr.op.for_each_target_mut(|target| *target = resolve(*target));
        }
    }

    for i in 0..blocks.len() {
        let next = blocks.get(i + 1).map(|b| b.label);
        let block = &mut blocks[i];
        if let Some(last) = block.instructions.last() {
            if matches!(last.op, RegisterOp::Goto { target } if Some(target) == next) {
                block.instructions.pop();
                removed += 1;
            }
        }
    }

    let reachable = reachable_blocks(blocks);
    let before = blocks.len();
    let mut index = 0;
    let last = before.saturating_sub(1);
    blocks.retain(|block| {
        let keep = reachable.contains(&block.label)
            && (!block.instructions.is_empty() || index == last);
        index += 1;
        keep
    });
    removed + (before - blocks.len())
}

fn reachable_blocks(blocks: &[RegisterBlock]) -> HashSet<BlockId> {
    let position: HashMap<BlockId, usize> =
        blocks.iter().enumerate().map(|(i, b)| (b.label, i)).collect();
    let mut reachable = HashSet::new();
    let mut worklist: Vec<usize> = if blocks.is_empty() { Vec::new() } else { vec![0] };

    while let Some(i) = worklist.pop() {
        let block = &blocks[i];
        if !reachable.insert(block.label) {
            continue;
        }
        for instr in &block.instructions {
            for target in instr.op.targets() {
                if let Some(&j) = position.get(&target) {
                    worklist.push(j);
                }
            }
        }
        if block.falls_through() && i + 1 < blocks.len() {
            worklist.push(i + 1);
        }
    }
    reachable
}

/// Removes moves into the source register and moves that copy a value
/// straight back after the previous instruction copied it.
pub fn remove_redundant_moves(blocks: &mut [RegisterBlock]) -> usize {
    let mut removed = 0;
    for block in blocks {
        let before = block.instructions.len();
        block
            .instructions
            .retain(|i| !matches!(i.op, RegisterOp::Move { dest, src, .. } if dest == src));

        let mut kept: Vec<RegisterInstruction> = Vec::with_capacity(block.instructions.len());
        for instr in block.instructions.drain(..) {
            let redundant = match (kept.last().map(|k| &k.op), &instr.op) {
                (
                    Some(RegisterOp::Move {
                        dest: d1,
                        src: s1,
                        ty: t1,
                    }),
                    RegisterOp::Move {
                        dest: d2,
                        src: s2,
                        ty: t2,
                    },
                ) => t1 == t2 && ((d1 == s2 && s1 == d2) || (d1 == d2 && s1 == s2)),
                _ => false,
            };
            if !redundant {
                kept.push(instr);
            }
        }
        block.instructions = kept;
        removed += before - block.instructions.len();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Constant, ValueType},
        output::Register,
    };

    fn block(label: usize, ops: Vec<RegisterOp>) -> RegisterBlock {
        RegisterBlock {
            label: BlockId(label),
            instructions: ops.into_iter().map(RegisterInstruction::new).collect(),
        }
    }

    #[test]
    fn test_goto_chain_collapses() {
        let mut blocks = vec![
            block(0, vec![RegisterOp::Goto { target: BlockId(2) }]),
            block(1, vec![RegisterOp::Return { value: None }]),
            block(2, vec![RegisterOp::Goto { target: BlockId(1) }]),
        ];
        assert!(optimize(&mut blocks) > 0);

        // the entry now falls into the return and the trampoline is gone
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].label, BlockId(1));
        assert_eq!(blocks[0].instructions[0].op, RegisterOp::Return { value: None });
    }

    #[test]
    fn test_move_back_is_removed() {
        let mut blocks = vec![block(
            0,
            vec![
                RegisterOp::Const {
                    dest: Register(1),
                    value: Constant::Int(4),
                },
                RegisterOp::Move {
                    dest: Register(0),
                    src: Register(1),
                    ty: ValueType::Int,
                },
                RegisterOp::Move {
                    dest: Register(1),
                    src: Register(0),
                    ty: ValueType::Int,
                },
                RegisterOp::Move {
                    dest: Register(2),
                    src: Register(2),
                    ty: ValueType::Int,
                },
                RegisterOp::Return {
                    value: Some(Register(0)),
                },
            ],
        )];
        assert_eq!(remove_redundant_moves(&mut blocks), 2);
        assert_eq!(blocks[0].instructions.len(), 3);
    }
}
