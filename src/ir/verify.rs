//! Structural SSA verification.
//!
//! Run between pipeline steps when [`crate::OptimizerConfig::verify_ssa`] is
//! set. Only blocks reachable from the entry are checked; passes are allowed
//! to leave dead blocks behind for a later cleanup.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{code::DefSite, BlockId, IrCode, Op, ValueId},
    Error, Result,
};

/// Checks that `code` is well-formed SSA.
///
/// # Errors
///
/// Returns [`Error::InvalidSsa`] naming `pass` and the first violation found:
/// a value defined twice, a use without definition, a use not dominated by
/// its definition, a block without exactly one trailing terminator, a phi
/// whose operands do not match the block's predecessors, or an entry block
/// with predecessors.
pub fn verify_ssa(code: &IrCode, pass: &str) -> Result<()> {
    let fail = |message: String| Error::InvalidSsa {
        method: code.method,
        pass: pass.to_string(),
        message,
    };

    let rpo = code.reverse_postorder();
    let live: HashSet<BlockId> = rpo.iter().copied().collect();
    let predecessors = code.predecessors();
    let dominators = code.dominators();

    if !predecessors[code.entry.index()].is_empty() {
        return Err(fail(format!("entry block {} has predecessors", code.entry)));
    }

    let mut definitions: HashMap<ValueId, DefSite> = HashMap::new();
    for &id in &rpo {
        let Some(block) = code.block(id) else {
            return Err(fail(format!("reachable block {id} was removed")));
        };
        let mut define = |value: ValueId, site: DefSite| {
            if value.index() >= code.value_count() {
                return Err(fail(format!("{value} was never allocated")));
            }
            if definitions.insert(value, site).is_some() {
                return Err(fail(format!("{value} is defined more than once")));
            }
            Ok(())
        };
        for (index, phi) in block.phis.iter().enumerate() {
            define(phi.dest, DefSite::Phi { block: id, index })?;
        }
        for (index, instr) in block.instructions.iter().enumerate() {
            if let Some(dest) = instr.dest {
                define(dest, DefSite::Instruction { block: id, index })?;
            }
        }
    }

    for &id in &rpo {
        let Some(block) = code.block(id) else {
            continue;
        };

        let Some(last) = block.instructions.last() else {
            return Err(fail(format!("block {id} is empty")));
        };
        if !last.op.is_terminator() {
            return Err(fail(format!("block {id} does not end in a terminator")));
        }
        if let Some(position) = block.instructions[..block.instructions.len() - 1]
            .iter()
            .position(|instr| instr.op.is_terminator())
        {
            return Err(fail(format!(
                "block {id} has a terminator before its end at {position}"
            )));
        }
        for successor in last.op.successors() {
            if code.block(successor).is_none() {
                return Err(fail(format!("block {id} jumps to removed block {successor}")));
            }
        }

        let mut expected: Vec<BlockId> = predecessors[id.index()]
            .iter()
            .copied()
            .filter(|pred| live.contains(pred))
            .collect();
        expected.sort();
        for phi in &block.phis {
            let mut actual: Vec<BlockId> = phi.operands.iter().map(|o| o.predecessor).collect();
            actual.sort();
            if actual != expected {
                return Err(fail(format!(
                    "phi {} in {id} has operands for {actual:?}, predecessors are {expected:?}",
                    phi.dest
                )));
            }
            for operand in &phi.operands {
                let Some(def) = definitions.get(&operand.value) else {
                    return Err(fail(format!(
                        "phi {} reads undefined {}",
                        phi.dest, operand.value
                    )));
                };
                if !dominators.dominates(def.block().node(), operand.predecessor.node()) {
                    return Err(fail(format!(
                        "{} does not dominate edge {} -> {id}",
                        operand.value, operand.predecessor
                    )));
                }
            }
        }

        for (index, instr) in block.instructions.iter().enumerate() {
            if matches!(instr.op, Op::Argument { .. }) && id != code.entry {
                return Err(fail(format!("argument {instr} outside the entry block")));
            }
            for value in instr.op.uses() {
                let Some(def) = definitions.get(&value) else {
                    return Err(fail(format!("{instr} in {id} reads undefined {value}")));
                };
                let dominated = match *def {
                    DefSite::Phi { block, .. } => dominators.dominates(block.node(), id.node()),
                    DefSite::Instruction {
                        block,
                        index: def_index,
                    } => {
                        if block == id {
                            def_index < index
                        } else {
                            dominators.strictly_dominates(block.node(), id.node())
                        }
                    }
                };
                if !dominated {
                    return Err(fail(format!(
                        "{value} does not dominate its use in {instr} ({id})"
                    )));
                }
            }
        }
    }

    Ok(())
}
