//! Local control-flow and type-check simplifications.
//!
//! - [`IfSimplifier`]: folds branches decided by constants, identical
//!   operands or non-null facts, and canonicalizes compares against zero
//! - [`CastRemover`]: drops casts and type tests proven by known classes
//! - [`SwitchRewriter`]: removes cases jumping to the default target and
//!   turns tiny switches into branches

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
        passes::{constants::evaluate_if, deadcode::constant_values},
    },
    ir::{BlockId, Constant, IfCond, Instruction, IrCode, Nullability, Op, ValueData, ValueType},
    program::Program,
    Result,
};

/// The condition that holds for `(b, a)` exactly when `cond` holds for `(a, b)`.
fn mirrored(cond: IfCond) -> IfCond {
    match cond {
        IfCond::Eq | IfCond::Ne => cond,
        IfCond::Lt => IfCond::Gt,
        IfCond::Gt => IfCond::Lt,
        IfCond::Le => IfCond::Ge,
        IfCond::Ge => IfCond::Le,
    }
}

/// Replaces the terminator of `block` with a goto to `taken`, dropping the
/// phi operands of the abandoned edge.
pub(crate) fn fold_branch(code: &mut IrCode, block: BlockId, taken: BlockId) {
    let Some(terminator) = code.block_mut(block).and_then(|b| b.terminator_mut()) else {
        return;
    };
    let abandoned: Vec<BlockId> = terminator
        .op
        .successors()
        .into_iter()
        .filter(|s| *s != taken)
        .collect();
    terminator.op = Op::Goto { target: taken };
    for successor in abandoned {
        if let Some(succ) = code.block_mut(successor) {
            for phi in &mut succ.phis {
                phi.operands.retain(|o| o.predecessor != block);
            }
        }
    }
}

/// Branch simplification pass.
pub struct IfSimplifier;

impl IfSimplifier {
    /// Simplifies every conditional branch; returns the number of changes.
    pub fn apply(code: &mut IrCode) -> usize {
        let constants = constant_values(code);
        let mut changes = 0;
        let mut folds = Vec::new();

        for block in code.block_ids() {
            let decided = {
                let Some(terminator) = code.block(block).and_then(|b| b.terminator()) else {
                    continue;
                };
                let Op::If {
                    cond,
                    left,
                    right,
                    then_target,
                    else_target,
                } = &terminator.op
                else {
                    continue;
                };
                let (cond, left, right, then_target, else_target) =
                    (*cond, *left, *right, *then_target, *else_target);

                if then_target == else_target {
                    Some(then_target)
                } else {
                    let outcome = match right {
                        Some(r) if r == left => Some(cond.reflexive()),
                        Some(r) => match (constants.get(&left), constants.get(&r)) {
                            (Some(l), Some(rc)) => evaluate_if(cond, l, Some(rc)),
                            _ => None,
                        },
                        None => match constants.get(&left) {
                            Some(l) => evaluate_if(cond, l, None),
                            None => {
                                let data = code.value(left);
                                let known_not_null = data.ty == ValueType::Reference
                                    && data.nullability == Nullability::NotNull;
                                match cond {
                                    IfCond::Eq if known_not_null => Some(false),
                                    IfCond::Ne if known_not_null => Some(true),
                                    _ => None,
                                }
                            }
                        },
                    };
                    outcome.map(|taken| if taken { then_target } else { else_target })
                }
            };
            if let Some(taken) = decided {
                folds.push((block, taken));
                continue;
            }

            // Canonicalize compares against an int zero into zero tests.
            if let Some(terminator) = code.block_mut(block).and_then(|b| b.terminator_mut()) {
                if let Op::If {
                    cond, left, right, ..
                } = &mut terminator.op
                {
                    if let Some(r) = *right {
                        if constants.get(&r) == Some(&Constant::Int(0)) {
                            *right = None;
                            changes += 1;
                        } else if constants.get(left) == Some(&Constant::Int(0)) {
                            *left = r;
                            *right = None;
                            *cond = mirrored(*cond);
                            changes += 1;
                        }
                    }
                }
            }
        }

        for (block, taken) in &folds {
            fold_branch(code, *block, *taken);
        }
        if !folds.is_empty() {
            code.remove_unreachable_blocks();
            code.remove_trivial_phis();
        }
        changes + folds.len()
    }
}

impl IrPass for IfSimplifier {
    fn name(&self) -> &'static str {
        "if-simplification"
    }

    fn description(&self) -> &'static str {
        "Folds decided branches and canonicalizes zero tests"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let changes = Self::apply(code);
        if changes > 0 {
            ctx.events()
                .record(EventKind::BranchSimplified)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("simplified {changes} branches"));
        }
        Ok(changes > 0)
    }
}

/// Inverts every conditional branch by swapping its targets.
///
/// Used by test harnesses to check that nothing depends on branch polarity.
pub fn invert_conditionals(code: &mut IrCode) -> usize {
    let mut inverted = 0;
    for block in code.block_ids() {
        if let Some(terminator) = code.block_mut(block).and_then(|b| b.terminator_mut()) {
            if let Op::If {
                cond,
                then_target,
                else_target,
                ..
            } = &mut terminator.op
            {
                *cond = cond.inverted();
                std::mem::swap(then_target, else_target);
                inverted += 1;
            }
        }
    }
    inverted
}

/// Trivial check-cast and instance-of removal.
pub struct CastRemover;

impl CastRemover {
    /// Removes casts proven redundant; returns the number of removed checks.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let constants = constant_values(code);
        let mut aliases = Vec::new();
        let mut rewrites = Vec::new();

        for (block, index, instr) in code.instructions() {
            let Some(dest) = instr.dest else {
                continue;
            };
            match &instr.op {
                Op::CheckCast { value, class } => {
                    let data = code.value(*value);
                    let proven = matches!(constants.get(value), Some(Constant::Null))
                        || data.nullability == Nullability::Null
                        || data.class.is_some_and(|c| program.is_subtype(c, *class));
                    if proven {
                        aliases.push((block, index, dest, *value));
                    }
                }
                Op::InstanceOf { value, class } => {
                    let data = code.value(*value);
                    let result = if matches!(constants.get(value), Some(Constant::Null))
                        || data.nullability == Nullability::Null
                    {
                        Some(0)
                    } else if data.nullability == Nullability::NotNull
                        && data.class.is_some_and(|c| program.is_subtype(c, *class))
                    {
                        Some(1)
                    } else {
                        None
                    };
                    if let Some(result) = result {
                        rewrites.push((block, index, result));
                    }
                }
                _ => {}
            }
        }

        for &(block, index, result) in &rewrites {
            if let Some(instr) = code
                .block_mut(block)
                .and_then(|b| b.instructions.get_mut(index))
            {
                instr.op = Op::Const(Constant::Int(result));
            }
        }
        for &(block, index, dest, value) in aliases.iter().rev() {
            if let Some(b) = code.block_mut(block) {
                b.instructions.remove(index);
            }
            code.replace_all_uses(dest, value);
        }
        aliases.len() + rewrites.len()
    }
}

impl IrPass for CastRemover {
    fn name(&self) -> &'static str {
        "cast-removal"
    }

    fn description(&self) -> &'static str {
        "Removes check-casts and instance-of tests proven by known types"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let removed = Self::apply(code, ctx.program);
        if removed > 0 {
            ctx.events()
                .record(EventKind::CastRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("removed {removed} type checks"));
        }
        Ok(removed > 0)
    }
}

/// Switch simplification pass.
pub struct SwitchRewriter;

impl SwitchRewriter {
    /// Rewrites switches; returns the number of rewritten switches.
    pub fn apply(code: &mut IrCode) -> usize {
        let mut changed = 0;
        for block in code.block_ids() {
            let Some(b) = code.block(block) else {
                continue;
            };
            let Some(Instruction {
                op:
                    Op::Switch {
                        value,
                        keys,
                        targets,
                        default,
                    },
                position,
                ..
            }) = b.terminator()
            else {
                continue;
            };
            let (value, default, position) = (*value, *default, position.clone());
            let cases: Vec<(i32, BlockId)> = keys
                .iter()
                .copied()
                .zip(targets.iter().copied())
                .filter(|(_, target)| *target != default)
                .collect();
            let original_len = keys.len();

            let replacement = match cases.as_slice() {
                [] => vec![Instruction::new(Op::Goto { target: default }, None)],
                [(0, target)] => vec![Instruction::new(
                    Op::If {
                        cond: IfCond::Eq,
                        left: value,
                        right: None,
                        then_target: *target,
                        else_target: default,
                    },
                    None,
                )],
                [(key, target)] => {
                    let constant = code.new_value(ValueData::new(ValueType::Int));
                    vec![
                        Instruction::new(Op::Const(Constant::Int(*key)), Some(constant)),
                        Instruction::new(
                            Op::If {
                                cond: IfCond::Eq,
                                left: value,
                                right: Some(constant),
                                then_target: *target,
                                else_target: default,
                            },
                            None,
                        ),
                    ]
                }
                _ if cases.len() < original_len => vec![Instruction::new(
                    Op::Switch {
                        value,
                        keys: cases.iter().map(|(k, _)| *k).collect(),
                        targets: cases.iter().map(|(_, t)| *t).collect(),
                        default,
                    },
                    None,
                )],
                _ => continue,
            };

            if let Some(b) = code.block_mut(block) {
                b.instructions.pop();
                b.instructions
                    .extend(replacement.into_iter().map(|i| i.at(position.clone())));
                changed += 1;
            }
        }
        changed
    }
}

impl IrPass for SwitchRewriter {
    fn name(&self) -> &'static str {
        "switch-rewriting"
    }

    fn description(&self) -> &'static str {
        "Drops redundant switch cases and lowers tiny switches to branches"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let changed = Self::apply(code);
        if changed > 0 {
            ctx.events()
                .record(EventKind::BranchSimplified)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("rewrote {changed} switches"));
        }
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{verify_ssa, IrBuilder, ValueType},
        program::{Class, MethodId},
    };

    #[test]
    fn test_not_null_zero_test_folds() {
        let mut b = IrBuilder::new(MethodId(0));
        let this = b.receiver(crate::program::ClassId(0));
        let yes = b.new_block();
        let no = b.new_block();
        b.if_zero(IfCond::Eq, this, yes, no);
        b.switch_to(yes);
        b.ret(None);
        b.switch_to(no);
        b.ret(None);
        let mut code = b.finish();

        assert_eq!(IfSimplifier::apply(&mut code), 1);
        assert!(code.block(yes).is_none());
        verify_ssa(&code, "if-simplification").unwrap();
    }

    #[test]
    fn test_compare_with_zero_is_canonicalized() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let zero = b.const_int(0);
        let yes = b.new_block();
        let no = b.new_block();
        b.if_cmp(IfCond::Lt, zero, x, yes, no);
        b.switch_to(yes);
        b.ret(None);
        b.switch_to(no);
        b.ret(None);
        let mut code = b.finish();

        assert_eq!(IfSimplifier::apply(&mut code), 1);
        let terminator = code.block(code.entry).and_then(|b| b.terminator()).unwrap();
        assert!(matches!(
            terminator.op,
            Op::If { cond: IfCond::Gt, left, right: None, .. } if left == x
        ));
    }

    #[test]
    fn test_cast_removal_with_known_class() {
        let program = Program::new();
        let base = program.add_class(Class::new("app.Base"));
        let derived = program.add_class(Class::new("app.Derived").with_superclass(base));

        let mut b = IrBuilder::new(MethodId(0));
        let object = b.new_instance(derived);
        let cast = b.check_cast(object, base);
        let test = b.instance_of(object, base);
        b.ret(Some(cast));
        let mut code = b.finish();
        let _ = test;

        assert_eq!(CastRemover::apply(&mut code, &program), 2);
        let ret = code.block(code.entry).and_then(|b| b.terminator()).unwrap();
        assert_eq!(ret.op, Op::Return { value: Some(object) });
        verify_ssa(&code, "cast-removal").unwrap();
    }

    #[test]
    fn test_single_case_switch_becomes_if() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let case = b.new_block();
        let other = b.new_block();
        let default = b.new_block();
        b.switch(x, &[(5, case), (6, default)], default);
        b.switch_to(case);
        b.ret(None);
        b.switch_to(other);
        b.ret(None);
        b.switch_to(default);
        b.ret(None);
        let mut code = b.finish();

        assert_eq!(SwitchRewriter::apply(&mut code), 1);
        let terminator = code.block(code.entry).and_then(|b| b.terminator()).unwrap();
        assert!(matches!(terminator.op, Op::If { cond: IfCond::Eq, .. }));
        assert_eq!(terminator.op.successors(), vec![case, default]);
    }

    #[test]
    fn test_invert_conditionals_is_involution() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let yes = b.new_block();
        let no = b.new_block();
        b.if_zero(IfCond::Lt, x, yes, no);
        b.switch_to(yes);
        b.ret(None);
        b.switch_to(no);
        b.ret(None);
        let original = b.finish();

        let mut code = original.clone();
        assert_eq!(invert_conditionals(&mut code), 1);
        assert_ne!(code, original);
        invert_conditionals(&mut code);
        assert_eq!(code, original);
    }
}
