//! Out-of-SSA lowering to register instructions.

use crate::{
    ir::{BlockId, Constant, Instruction, IrCode, Op, ValueId, ValueType},
    output::{Register, RegisterBlock, RegisterInstruction, RegisterOp},
    regalloc::{linear_scan::Allocation, MAX_NON_RANGE_WORDS},
    Result,
};

/// One copy of a parallel assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMove {
    dest: Register,
    src: Register,
    ty: ValueType,
}

impl PendingMove {
    fn width(&self) -> u32 {
        self.ty.width() as u32
    }

    fn writes_into(&self, other: &PendingMove) -> bool {
        self.dest.0 < other.src.0 + other.width() && other.src.0 < self.dest.0 + self.width()
    }
}

/// Orders the copies of one parallel assignment.
///
/// A copy is emitted once no other pending copy still reads its destination.
/// When only cycles remain, every remaining source is saved to the scratch
/// area first. Returns the copies and the scratch slots used.
fn sequence_moves(mut pending: Vec<PendingMove>, scratch: Register) -> (Vec<RegisterOp>, u32) {
    pending.retain(|m| m.dest != m.src);
    let mut out = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = (0..pending.len()).find(|&i| {
            pending
                .iter()
                .enumerate()
                .all(|(j, other)| i == j || !pending[i].writes_into(other))
        });
        match ready {
            Some(i) => {
                let m = pending.remove(i);
                out.push(RegisterOp::Move {
                    dest: m.dest,
                    src: m.src,
                    ty: m.ty,
                });
            }
            None => {
                let mut offset = 0;
                for m in &mut pending {
                    let saved = scratch.offset(offset);
                    out.push(RegisterOp::Move {
                        dest: saved,
                        src: m.src,
                        ty: m.ty,
                    });
                    m.src = saved;
                    offset += m.width();
                }
                for m in pending.drain(..) {
                    out.push(RegisterOp::Move {
                        dest: m.dest,
                        src: m.src,
                        ty: m.ty,
                    });
                }
                return (out, offset);
            }
        }
    }
    (out, 0)
}

struct Lowering<'a> {
    code: &'a IrCode,
    allocation: &'a Allocation,
}

impl Lowering<'_> {
    fn reg(&self, value: ValueId) -> Result<Register> {
        self.allocation
            .register(value)
            .ok_or_else(|| internal_error!("{} has no register in {}", value, self.code.method))
    }

    fn ty(&self, value: ValueId) -> ValueType {
        self.code.value(value).ty
    }

    /// The copies on the edge out of `from`.
    fn phi_moves(&self, from: BlockId, successors: &[BlockId]) -> Result<Vec<PendingMove>> {
        let mut moves = Vec::new();
        let mut seen = Vec::new();
        for &successor in successors {
            if seen.contains(&successor) {
                continue;
            }
            seen.push(successor);
            let Some(block) = self.code.block(successor) else {
                continue;
            };
            for phi in &block.phis {
                if let Some(operand) = phi.operand_for(from) {
                    moves.push(PendingMove {
                        dest: self.reg(phi.dest)?,
                        src: self.reg(operand)?,
                        ty: self.ty(phi.dest),
                    });
                }
            }
        }
        Ok(moves)
    }

    fn lower_instruction(&self, instr: &Instruction, out: &mut Vec<RegisterInstruction>) -> Result<()> {
        let position = &instr.position;
        let push = |out: &mut Vec<RegisterInstruction>, op: RegisterOp| {
            out.push(RegisterInstruction::new(op).at(position.clone()));
        };
        let dest = || {
            instr
                .dest
                .ok_or_else(|| internal_error!("{} has no result", instr.op))
                .and_then(|d| self.reg(d))
        };

        let op = match &instr.op {
            Op::Argument { .. } | Op::DebugPosition | Op::AlwaysMaterializingUser { .. } => {
                return Ok(())
            }
            Op::AlwaysMaterializingDefinition => RegisterOp::Const {
                dest: dest()?,
                value: Constant::Int(0),
            },
            Op::Const(value) => RegisterOp::Const {
                dest: dest()?,
                value: value.clone(),
            },
            Op::Binary {
                op,
                ty,
                left,
                right,
            } => RegisterOp::Binary {
                op: *op,
                ty: *ty,
                dest: dest()?,
                left: self.reg(*left)?,
                right: self.reg(*right)?,
            },
            Op::Unary { op, ty, operand } => RegisterOp::Unary {
                op: *op,
                ty: *ty,
                dest: dest()?,
                operand: self.reg(*operand)?,
            },
            Op::Cmp { left, right } => RegisterOp::Cmp {
                dest: dest()?,
                left: self.reg(*left)?,
                right: self.reg(*right)?,
            },
            Op::Convert { from, to, operand } => RegisterOp::Convert {
                from: *from,
                to: *to,
                dest: dest()?,
                operand: self.reg(*operand)?,
            },
            Op::Move { src } | Op::NonNull { value: src } => RegisterOp::Move {
                dest: dest()?,
                src: self.reg(*src)?,
                ty: self.ty(*src),
            },
            Op::NewInstance { class } => RegisterOp::NewInstance {
                dest: dest()?,
                class: *class,
            },
            Op::NewArray { size } => RegisterOp::NewArray {
                dest: dest()?,
                size: self.reg(*size)?,
            },
            Op::ArrayLength { array } => RegisterOp::ArrayLength {
                dest: dest()?,
                array: self.reg(*array)?,
            },
            Op::ArrayGet { array, index } => RegisterOp::ArrayGet {
                dest: dest()?,
                array: self.reg(*array)?,
                index: self.reg(*index)?,
            },
            Op::ArrayPut {
                array,
                index,
                value,
            } => RegisterOp::ArrayPut {
                array: self.reg(*array)?,
                index: self.reg(*index)?,
                value: self.reg(*value)?,
            },
            Op::InstanceGet { field, object } => RegisterOp::InstanceGet {
                dest: dest()?,
                field: *field,
                object: self.reg(*object)?,
            },
            Op::InstancePut {
                field,
                object,
                value,
            } => RegisterOp::InstancePut {
                field: *field,
                object: self.reg(*object)?,
                value: self.reg(*value)?,
            },
            Op::StaticGet { field } => RegisterOp::StaticGet {
                dest: dest()?,
                field: *field,
            },
            Op::StaticPut { field, value } => RegisterOp::StaticPut {
                field: *field,
                value: self.reg(*value)?,
            },
            Op::Invoke { kind, method, args } => {
                let words: usize = args.iter().map(|a| self.ty(*a).width()).sum();
                RegisterOp::Invoke {
                    kind: *kind,
                    method: *method,
                    args: args.iter().map(|a| self.reg(*a)).collect::<Result<_>>()?,
                    range: words > MAX_NON_RANGE_WORDS,
                    result: instr.dest.map(|d| self.reg(d)).transpose()?,
                }
            }
            Op::CheckCast { value, class } => {
                let register = dest()?;
                let src = self.reg(*value)?;
                if register != src {
                    push(
                        out,
                        RegisterOp::Move {
                            dest: register,
                            src,
                            ty: ValueType::Reference,
                        },
                    );
                }
                RegisterOp::CheckCast {
                    register,
                    class: *class,
                }
            }
            Op::InstanceOf { value, class } => RegisterOp::InstanceOf {
                dest: dest()?,
                value: self.reg(*value)?,
                class: *class,
            },
            Op::NullCheck { value } => RegisterOp::NullCheck {
                value: self.reg(*value)?,
            },
            Op::Goto { target } => RegisterOp::Goto { target: *target },
            Op::If {
                cond,
                left,
                right,
                then_target,
                else_target,
            } => {
                push(
                    out,
                    RegisterOp::If {
                        cond: *cond,
                        left: self.reg(*left)?,
                        right: right.map(|r| self.reg(r)).transpose()?,
                        target: *then_target,
                    },
                );
                RegisterOp::Goto {
                    target: *else_target,
                }
            }
            Op::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                push(
                    out,
                    RegisterOp::Switch {
                        value: self.reg(*value)?,
                        keys: keys.clone(),
                        targets: targets.clone(),
                    },
                );
                RegisterOp::Goto { target: *default }
            }
            Op::Return { value } => RegisterOp::Return {
                value: value.map(|v| self.reg(v)).transpose()?,
            },
            Op::Throw { exception } => RegisterOp::Throw {
                exception: self.reg(*exception)?,
            },
        };
        push(out, op);
        Ok(())
    }
}

/// Scratch slots the phi copies of `code` need under `allocation`.
///
/// # Errors
///
/// Returns an internal error if a value involved in a copy has no register.
pub fn scratch_words(code: &IrCode, order: &[BlockId], allocation: &Allocation) -> Result<u32> {
    let lowering = Lowering { code, allocation };
    let mut words = 0;
    for &id in order {
        let Some(terminator) = code.block(id).and_then(|b| b.terminator()) else {
            continue;
        };
        let moves = lowering.phi_moves(id, &terminator.op.successors())?;
        let (_, used) = sequence_moves(moves, allocation.scratch_base());
        words = words.max(used);
    }
    Ok(words)
}

/// Lowers `code` to register blocks in `order`.
///
/// Phi copies are sequenced in front of the terminator of each predecessor.
///
/// # Errors
///
/// Returns an internal error if a value has no register.
pub fn lower(code: &IrCode, order: &[BlockId], allocation: &Allocation) -> Result<Vec<RegisterBlock>> {
    let lowering = Lowering { code, allocation };
    let mut blocks = Vec::with_capacity(order.len());

    for &id in order {
        let Some(block) = code.block(id) else {
            continue;
        };
        let mut out = Vec::with_capacity(block.instructions.len());
        for instr in &block.instructions {
            if instr.op.is_terminator() {
                let moves = lowering.phi_moves(id, &instr.op.successors())?;
                let (copies, _) = sequence_moves(moves, allocation.scratch_base());
                out.extend(
                    copies
                        .into_iter()
                        .map(|op| RegisterInstruction::new(op).at(instr.position.clone())),
                );
            }
            lowering.lower_instruction(instr, &mut out)?;
        }
        blocks.push(RegisterBlock {
            label: id,
            instructions: out,
        });
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(dest: u32, src: u32) -> PendingMove {
        PendingMove {
            dest: Register(dest),
            src: Register(src),
            ty: ValueType::Int,
        }
    }

    #[test]
    fn test_chain_is_ordered() {
        // r1 <- r0, r2 <- r1: the read of r1 must happen first
        let (ops, scratch) = sequence_moves(vec![mv(1, 0), mv(2, 1)], Register(10));
        assert_eq!(scratch, 0);
        assert_eq!(
            ops,
            vec![
                RegisterOp::Move {
                    dest: Register(2),
                    src: Register(1),
                    ty: ValueType::Int
                },
                RegisterOp::Move {
                    dest: Register(1),
                    src: Register(0),
                    ty: ValueType::Int
                },
            ]
        );
    }

    #[test]
    fn test_swap_uses_scratch() {
        let (ops, scratch) = sequence_moves(vec![mv(0, 1), mv(1, 0)], Register(5));
        assert_eq!(scratch, 2);
        assert_eq!(ops.len(), 4);
        // simulate
        let mut regs = [10, 11, 0, 0, 0, 0, 0];
        for op in ops {
            if let RegisterOp::Move { dest, src, .. } = op {
                regs[dest.0 as usize] = regs[src.0 as usize];
            }
        }
        assert_eq!(regs[0], 11);
        assert_eq!(regs[1], 10);
    }

    #[test]
    fn test_identity_moves_are_dropped() {
        let (ops, scratch) = sequence_moves(vec![mv(3, 3)], Register(5));
        assert!(ops.is_empty());
        assert_eq!(scratch, 0);
    }
}
