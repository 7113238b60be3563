//! Member value propagation.
//!
//! Replaces reads of members whose value is known at compile time:
//!
//! 1. Calls to methods that always return the same constant
//! 2. Reads of final static fields whose value was recorded from the class
//!    initializer
//! 3. Reads of the synthetic assertion-status field, when assertions are
//!    compiled out
//!
//! [`ClassInitializerDefaults`] produces the facts consumed by step 2: it
//! turns constant stores at the start of a class initializer into field
//! default values.

use std::collections::{HashMap, HashSet};

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
        passes::deadcode::constant_values,
    },
    ir::{BlockId, Constant, Instruction, IrCode, Nullability, Op, ValueId},
    program::{known, FieldFlags, FieldId, MethodId, Program},
    Result,
};

enum Replacement {
    /// Turn the instruction itself into a constant.
    Fold(Constant),
    /// Keep the call for its effects and define the result after it.
    After(ValueId, Constant),
}

/// Member value propagation pass.
pub struct MemberValuePropagation;

impl MemberValuePropagation {
    /// Returns the number of replaced reads.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        Self::propagate(code, program).0
    }

    /// Returns the number of replaced reads and the methods whose calls were
    /// folded away entirely.
    fn propagate(code: &mut IrCode, program: &Program) -> (usize, Vec<MethodId>) {
        let holder = program.method(code.method).ok().map(|m| m.holder);
        let mut replacements: Vec<(BlockId, usize, Replacement)> = Vec::new();
        let mut folded_calls = Vec::new();

        for (block, index, instr) in code.instructions() {
            let Some(dest) = instr.dest else {
                continue;
            };
            let ty = code.value(dest).ty;
            match &instr.op {
                Op::Invoke { kind, method, args } => {
                    let Some(target) = program.single_target(*kind, *method) else {
                        continue;
                    };
                    let info = program.info(target);
                    let Some(constant) = info.returns_constant.filter(|c| c.ty() == ty) else {
                        continue;
                    };
                    let receiver_ok = !kind.has_receiver()
                        || args
                            .first()
                            .is_some_and(|r| code.value(*r).nullability == Nullability::NotNull);
                    if info.side_effect_free && receiver_ok {
                        folded_calls.push(target);
                        replacements.push((block, index, Replacement::Fold(constant)));
                    } else {
                        replacements.push((block, index, Replacement::After(dest, constant)));
                    }
                }
                Op::StaticGet { field } => {
                    let Ok(declaration) = program.field(*field) else {
                        continue;
                    };
                    if !declaration.flags.contains(FieldFlags::FINAL)
                        || (Some(declaration.holder) != holder
                            && program.has_clinit_side_effects(declaration.holder))
                    {
                        continue;
                    }
                    if let Some(constant) = program.static_value(*field).filter(|c| c.ty() == ty) {
                        replacements.push((block, index, Replacement::Fold(constant)));
                    }
                }
                _ => {}
            }
        }

        let count = replacements.len();
        for (block, index, replacement) in replacements.into_iter().rev() {
            match replacement {
                Replacement::Fold(constant) => {
                    if let Some(instr) = code
                        .block_mut(block)
                        .and_then(|b| b.instructions.get_mut(index))
                    {
                        instr.op = Op::Const(constant);
                    }
                }
                Replacement::After(dest, constant) => {
                    if let Some(b) = code.block_mut(block) {
                        let position = b.instructions[index].position.clone();
                        b.instructions[index].dest = None;
                        b.instructions.insert(
                            index + 1,
                            Instruction::new(Op::Const(constant), Some(dest)).at(position),
                        );
                    }
                }
            }
        }
        (count, folded_calls)
    }
}

impl IrPass for MemberValuePropagation {
    fn name(&self) -> &'static str {
        "member-value-propagation"
    }

    fn description(&self) -> &'static str {
        "Replaces reads of members with known constant values"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        !ctx.config.debug
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let (count, folded_calls) = Self::propagate(code, ctx.program);
        // A folded call no longer needs its target, same as an inlined one.
        for target in folded_calls {
            ctx.compiler.mark_inlined(target);
        }
        if count > 0 {
            ctx.events()
                .record(EventKind::ConstantFolded)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("propagated {count} member values"));
        }
        Ok(count > 0)
    }
}

/// Compiles out assertion checks by treating `$assertionsDisabled` as true.
pub struct AssertionsDisabler;

impl AssertionsDisabler {
    /// Returns the number of replaced reads.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let mut replaced = 0;
        for block in code.block_ids() {
            let Some(b) = code.block_mut(block) else {
                continue;
            };
            for instr in &mut b.instructions {
                let Op::StaticGet { field } = instr.op else {
                    continue;
                };
                if program
                    .field(field)
                    .is_ok_and(|f| f.name == known::ASSERTIONS_DISABLED)
                {
                    instr.op = Op::Const(Constant::Int(1));
                    replaced += 1;
                }
            }
        }
        replaced
    }
}

impl IrPass for AssertionsDisabler {
    fn name(&self) -> &'static str {
        "assertion-disabling"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        ctx.config.disable_assertions
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let count = Self::apply(code, ctx.program);
        if count > 0 {
            ctx.events()
                .record(EventKind::ConstantFolded)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("disabled {count} assertion checks"));
        }
        Ok(count > 0)
    }
}

/// Moves constant stores at the start of a class initializer into field defaults.
///
/// Only stores in the entry block to static fields of the holder qualify, and
/// only for fields the initializer writes once and never reads.
pub struct ClassInitializerDefaults;

impl ClassInitializerDefaults {
    /// Returns the fields whose stores were removed.
    pub fn apply(code: &mut IrCode, program: &Program) -> Vec<FieldId> {
        let Ok(method) = program.method(code.method) else {
            return Vec::new();
        };
        if !method.is_class_initializer() {
            return Vec::new();
        }
        let holder = method.holder;

        let mut writes: HashMap<FieldId, usize> = HashMap::new();
        let mut read = HashSet::new();
        for (_, _, instr) in code.instructions() {
            match &instr.op {
                Op::StaticPut { field, .. } => *writes.entry(*field).or_default() += 1,
                Op::StaticGet { field } => {
                    read.insert(*field);
                }
                _ => {}
            }
        }

        let constants = constant_values(code);
        let mut moved = Vec::new();
        let entry = code.entry;
        if let Some(b) = code.block_mut(entry) {
            b.instructions.retain(|instr| {
                let Op::StaticPut { field, value } = &instr.op else {
                    return true;
                };
                let qualifies = writes.get(field) == Some(&1)
                    && !read.contains(field)
                    && program
                        .field(*field)
                        .is_ok_and(|f| f.holder == holder && f.is_static());
                match constants.get(value) {
                    Some(constant) if qualifies => {
                        program.set_static_value(*field, constant.clone());
                        moved.push(*field);
                        false
                    }
                    _ => true,
                }
            });
        }
        moved
    }
}

impl IrPass for ClassInitializerDefaults {
    fn name(&self) -> &'static str {
        "class-initializer-defaults"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        !ctx.config.debug && ctx.declaration().is_ok_and(|m| m.is_class_initializer())
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let moved = Self::apply(code, ctx.program);
        if !moved.is_empty() {
            ctx.events()
                .record(EventKind::InstructionRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("moved {} static stores into field defaults", moved.len()));
        }
        Ok(!moved.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{InvokeKind, IrBuilder, ValueType},
        program::{Class, Field, Method},
    };

    #[test]
    fn test_constant_returning_call_is_folded() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Config"));
        let answer = program.add_method(Method::new_static(
            class,
            "answer",
            Vec::new(),
            Some(ValueType::Int),
        ));
        program.update_info(answer, |info| {
            info.returns_constant = Some(Constant::Int(42));
            info.side_effect_free = true;
        });
        let noisy = program.add_method(Method::new_static(
            class,
            "noisy",
            Vec::new(),
            Some(ValueType::Int),
        ));
        program.update_info(noisy, |info| info.returns_constant = Some(Constant::Int(7)));

        let mut b = IrBuilder::new(MethodId(100));
        let a = b
            .invoke(InvokeKind::Static, answer, &[], Some(ValueType::Int))
            .unwrap();
        let n = b
            .invoke(InvokeKind::Static, noisy, &[], Some(ValueType::Int))
            .unwrap();
        let sum = b.binary(crate::ir::BinaryOp::Add, a, n);
        b.ret(Some(sum));
        let mut code = b.finish();

        assert_eq!(MemberValuePropagation::apply(&mut code, &program), 2);
        assert_eq!(code.defining_instruction(a).unwrap().op, Op::Const(Constant::Int(42)));
        assert_eq!(code.defining_instruction(n).unwrap().op, Op::Const(Constant::Int(7)));
        assert!(code
            .instructions()
            .any(|(_, _, i)| matches!(i.op, Op::Invoke { method, .. } if method == noisy)));
    }

    #[test]
    fn test_class_initializer_constants_become_defaults() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Limits"));
        let max = program.add_field(
            Field::new_static(class, "MAX", ValueType::Int).with_flags(FieldFlags::FINAL),
        );
        let clinit = program.add_method(Method::class_initializer(class));

        let mut b = IrBuilder::new(clinit);
        let value = b.const_int(64);
        b.static_put(max, value);
        b.ret(None);
        let mut code = b.finish();

        assert_eq!(ClassInitializerDefaults::apply(&mut code, &program), vec![max]);
        assert_eq!(program.static_value(max), Some(Constant::Int(64)));

        let reader = program.add_method(Method::new_static(
            class,
            "max",
            Vec::new(),
            Some(ValueType::Int),
        ));
        let mut b = IrBuilder::new(reader);
        let read = b.static_get(max, ValueType::Int);
        b.ret(Some(read));
        let mut code = b.finish();
        assert_eq!(MemberValuePropagation::apply(&mut code, &program), 1);
        assert_eq!(code.defining_instruction(read).unwrap().op, Op::Const(Constant::Int(64)));
    }

    #[test]
    fn test_assertion_status_reads_become_true() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Checked"));
        let status = program.add_field(Field::new_static(
            class,
            known::ASSERTIONS_DISABLED,
            ValueType::Int,
        ));
        let mut b = IrBuilder::new(MethodId(100));
        let disabled = b.static_get(status, ValueType::Int);
        b.ret(Some(disabled));
        let mut code = b.finish();

        assert_eq!(AssertionsDisabler::apply(&mut code, &program), 1);
        assert_eq!(
            code.defining_instruction(disabled).unwrap().op,
            Op::Const(Constant::Int(1))
        );
    }
}
