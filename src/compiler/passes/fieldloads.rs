//! Redundant field load elimination.
//!
//! Walks blocks in reverse postorder tracking the known contents of instance
//! and static fields. A block with a single predecessor starts from that
//! predecessor's final state; every other block starts empty.
//!
//! Invalidation rules:
//!
//! 1. Calls may write anything and clear all state
//! 2. Allocations and reads of other classes may run class initializers,
//!    which clears static state
//! 3. A write kills every entry for the same field (the objects may alias)
//!    and then records the written value
//! 4. Volatile accesses are never eliminated and clear all state

use std::collections::HashMap;

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    ir::{BlockId, IrCode, Op, ValueId},
    program::{FieldFlags, FieldId, Program},
    Result,
};

#[derive(Debug, Clone, Default)]
struct FieldState {
    instance: HashMap<(FieldId, ValueId), ValueId>,
    statics: HashMap<FieldId, ValueId>,
}

impl FieldState {
    fn clear(&mut self) {
        self.instance.clear();
        self.statics.clear();
    }

    fn kill_field(&mut self, field: FieldId) {
        self.instance.retain(|(f, _), _| *f != field);
    }
}

/// Field load elimination pass.
pub struct RedundantFieldLoadEliminator;

impl RedundantFieldLoadEliminator {
    /// Returns the number of eliminated loads.
    pub fn apply(code: &mut IrCode, program: &Program) -> usize {
        let holder = program.method(code.method).ok().map(|m| m.holder);
        let predecessors = code.predecessors();
        let mut exit_states: HashMap<BlockId, FieldState> = HashMap::new();
        let mut replacements: HashMap<ValueId, ValueId> = HashMap::new();
        let mut removals: Vec<(BlockId, usize)> = Vec::new();

        let resolve = |replacements: &HashMap<ValueId, ValueId>, value: ValueId| {
            replacements.get(&value).copied().unwrap_or(value)
        };
        let volatile = |field: FieldId| {
            program
                .field(field)
                .is_ok_and(|f| f.flags.contains(FieldFlags::VOLATILE))
        };
        let foreign_initializer = |field: FieldId| {
            program.field(field).is_ok_and(|f| {
                Some(f.holder) != holder && program.has_clinit_side_effects(f.holder)
            })
        };

        for block in code.reverse_postorder() {
            let mut state = match predecessors[block.index()].as_slice() {
                [single] => exit_states.get(single).cloned().unwrap_or_default(),
                _ => FieldState::default(),
            };
            let Some(b) = code.block(block) else {
                continue;
            };
            for (index, instr) in b.instructions.iter().enumerate() {
                match (&instr.op, instr.dest) {
                    (Op::InstanceGet { field, object }, Some(dest)) => {
                        if volatile(*field) {
                            state.clear();
                            continue;
                        }
                        let key = (*field, resolve(&replacements, *object));
                        match state.instance.get(&key) {
                            Some(&known) => {
                                replacements.insert(dest, known);
                                removals.push((block, index));
                            }
                            None => {
                                state.instance.insert(key, dest);
                            }
                        }
                    }
                    (
                        Op::InstancePut {
                            field,
                            object,
                            value,
                        },
                        _,
                    ) => {
                        if volatile(*field) {
                            state.clear();
                            continue;
                        }
                        state.kill_field(*field);
                        state.instance.insert(
                            (*field, resolve(&replacements, *object)),
                            resolve(&replacements, *value),
                        );
                    }
                    (Op::StaticGet { field }, Some(dest)) => {
                        if volatile(*field) {
                            state.clear();
                            continue;
                        }
                        if foreign_initializer(*field) {
                            state.statics.clear();
                        }
                        match state.statics.get(field) {
                            Some(&known) => {
                                replacements.insert(dest, known);
                                removals.push((block, index));
                            }
                            None => {
                                state.statics.insert(*field, dest);
                            }
                        }
                    }
                    (Op::StaticPut { field, value }, _) => {
                        if volatile(*field) {
                            state.clear();
                            continue;
                        }
                        if foreign_initializer(*field) {
                            state.statics.clear();
                        }
                        state.statics.insert(*field, resolve(&replacements, *value));
                    }
                    (Op::Invoke { .. }, _) => state.clear(),
                    (Op::NewInstance { .. }, _) => state.statics.clear(),
                    _ => {}
                }
            }
            exit_states.insert(block, state);
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

impl IrPass for RedundantFieldLoadEliminator {
    fn name(&self) -> &'static str {
        "redundant-field-load-elimination"
    }

    fn description(&self) -> &'static str {
        "Reuses field values that are already known"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let eliminated = Self::apply(code, ctx.program);
        if eliminated > 0 {
            ctx.events()
                .record(EventKind::FieldLoadEliminated)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("eliminated {eliminated} field loads"));
        }
        Ok(eliminated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{verify_ssa, BinaryOp, InvokeKind, IrBuilder, ValueType},
        program::{Class, Field, Method, MethodId},
    };

    fn point_program() -> (Program, FieldId, FieldId, MethodId) {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Point"));
        let x = program.add_field(Field::new(class, "x", ValueType::Int));
        let v = program.add_field(
            Field::new(class, "v", ValueType::Int).with_flags(FieldFlags::VOLATILE),
        );
        let touch = program.add_method(Method::new_static(class, "touch", Vec::new(), None));
        (program, x, v, touch)
    }

    #[test]
    fn test_store_then_load_forwards_value() {
        let (program, x, _, _) = point_program();
        let mut b = IrBuilder::new(MethodId(100));
        let point = b.reference_argument(None);
        let value = b.argument(ValueType::Int);
        b.instance_put(x, point, value);
        let loaded = b.instance_get(x, point, ValueType::Int);
        let again = b.instance_get(x, point, ValueType::Int);
        let sum = b.binary(BinaryOp::Add, loaded, again);
        b.ret(Some(sum));
        let mut code = b.finish();

        assert_eq!(RedundantFieldLoadEliminator::apply(&mut code, &program), 2);
        let add = code.defining_instruction(sum).unwrap();
        assert_eq!(add.op.uses(), vec![value, value]);
        verify_ssa(&code, "field-loads").unwrap();
    }

    #[test]
    fn test_calls_and_volatile_fields_block_elimination() {
        let (program, x, v, touch) = point_program();
        let mut b = IrBuilder::new(MethodId(100));
        let point = b.reference_argument(None);
        let first = b.instance_get(x, point, ValueType::Int);
        b.invoke(InvokeKind::Static, touch, &[], None);
        let second = b.instance_get(x, point, ValueType::Int);
        let v1 = b.instance_get(v, point, ValueType::Int);
        let v2 = b.instance_get(v, point, ValueType::Int);
        let a = b.binary(BinaryOp::Add, first, second);
        let c = b.binary(BinaryOp::Add, v1, v2);
        let sum = b.binary(BinaryOp::Add, a, c);
        b.ret(Some(sum));
        let mut code = b.finish();

        assert_eq!(RedundantFieldLoadEliminator::apply(&mut code, &program), 0);
    }
}
