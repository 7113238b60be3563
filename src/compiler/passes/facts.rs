//! Method facts computed when a body is finalized.
//!
//! Callers processed later consult these facts through
//! [`Program::info`]: constant and argument returns feed member value
//! propagation, side-effect freedom lets dead code elimination drop calls,
//! and the receiver and initializer shapes drive the inliners.

use std::collections::HashSet;

use crate::{
    compiler::passes::deadcode::{constant_values, is_removable},
    config::OptimizerConfig,
    ir::{Constant, InvokeKind, IrCode, Op, ValueId},
    program::{
        known, ClassId, ClassInlinerEligibility, Constraint, FieldFlags, InitValue, MethodFlags,
        MethodId, OptimizationInfo, Program, TrivialClassInitializer, TrivialInitializer,
    },
};

/// Computes every fact of `code` except the processed state.
#[must_use]
pub fn compute(code: &IrCode, program: &Program, method: MethodId) -> OptimizationInfo {
    let constants = constant_values(code);
    let mut info = OptimizationInfo {
        size: code.size_estimate(),
        ..OptimizationInfo::default()
    };

    let mut returns: Vec<Option<ValueId>> = Vec::new();
    let mut throws = false;
    for block in code.block_ids() {
        match code.block(block).and_then(|b| b.terminator()).map(|t| &t.op) {
            Some(Op::Return { value }) => returns.push(*value),
            Some(Op::Throw { .. }) => throws = true,
            _ => {}
        }
    }
    info.never_returns_normally = returns.is_empty() && throws;

    let arguments = code.arguments();
    if let Some(Some(first)) = returns.first() {
        if returns.iter().all(|r| *r == Some(*first)) {
            info.returns_argument = arguments.iter().position(|a| a == first);
        }
        let returned: Option<Vec<&Constant>> = returns
            .iter()
            .map(|r| r.and_then(|v| constants.get(&v)))
            .collect();
        if let Some(returned) = returned {
            if returned.windows(2).all(|w| w[0] == w[1]) {
                info.returns_constant = returned.first().map(|c| (*c).clone());
            }
        }
    }

    info.side_effect_free = !throws
        && code.instructions().all(|(_, _, instr)| {
            matches!(instr.op, Op::Argument { .. })
                || (instr.op.is_terminator() && !matches!(instr.op, Op::Throw { .. }))
                || is_removable(code, &instr.op, &constants, program)
        });

    let Ok(declaration) = program.method(method) else {
        return info;
    };
    if !declaration.is_static() {
        if let Some(&receiver) = arguments.first() {
            info.checks_null_receiver_before_side_effect =
                checks_receiver_first(code, receiver);
            if !declaration.is_constructor() {
                info.class_inliner_eligibility =
                    class_inliner_eligibility(code, program, declaration.holder, receiver);
            }
        }
    }
    if declaration.is_constructor() {
        info.trivial_initializer = trivial_initializer(code, program, declaration.holder);
    }
    if declaration.is_class_initializer() {
        info.trivial_class_initializer =
            trivial_class_initializer(code, program, declaration.holder);
    }
    info
}

/// Returns true if the first instruction with an effect dereferences `receiver`.
fn checks_receiver_first(code: &IrCode, receiver: ValueId) -> bool {
    let mut block = code.entry;
    let mut visited = HashSet::new();
    while visited.insert(block) {
        let Some(b) = code.block(block) else {
            return false;
        };
        for instr in &b.instructions {
            if let Op::Goto { target } = instr.op {
                block = target;
                break;
            }
            if instr.op.has_side_effects() || instr.op.may_throw() {
                return instr.op.dereferenced() == Some(receiver);
            }
        }
        if !matches!(b.terminator().map(|t| &t.op), Some(Op::Goto { .. })) {
            return false;
        }
    }
    false
}

/// Facts for calling this method on a class-inlined receiver.
///
/// The receiver may only be read from or written to fields of the holder and
/// its superclasses, and must either be returned on every path or on none.
fn class_inliner_eligibility(
    code: &IrCode,
    program: &Program,
    holder: ClassId,
    receiver: ValueId,
) -> Option<ClassInlinerEligibility> {
    let uses = code.uses();
    if uses.has_phi_users(receiver) {
        return None;
    }
    let superclasses = program.superclasses(holder);
    let own_field = |field| {
        program
            .field(field)
            .is_ok_and(|f| !f.is_static() && superclasses.contains(&f.holder))
    };
    for (_, _, instr) in code.instructions() {
        if !instr.op.uses().contains(&receiver) {
            continue;
        }
        let allowed = match &instr.op {
            Op::InstanceGet { field, object } => *object == receiver && own_field(*field),
            Op::InstancePut {
                field,
                object,
                value,
            } => *object == receiver && *value != receiver && own_field(*field),
            Op::Return { .. } => true,
            _ => false,
        };
        if !allowed {
            return None;
        }
    }

    let mut returns_receiver = None;
    for block in code.block_ids() {
        let terminator = code.block(block).and_then(|b| b.terminator());
        if let Some(Op::Return { value }) = terminator.map(|t| &t.op) {
            let returned = *value == Some(receiver);
            match returns_receiver {
                None => returns_receiver = Some(returned),
                Some(previous) if previous != returned => return None,
                Some(_) => {}
            }
        }
    }
    Some(ClassInlinerEligibility {
        returns_receiver: returns_receiver.unwrap_or(false),
    })
}

/// Recognizes constructors that only store arguments and constants into fields.
fn trivial_initializer(
    code: &IrCode,
    program: &Program,
    holder: ClassId,
) -> Option<TrivialInitializer> {
    let constants = constant_values(code);
    let arguments = code.arguments();
    let receiver = *arguments.first()?;
    let superclass = program.class(holder).ok()?.superclass;

    let mut result = TrivialInitializer {
        super_initializer: None,
        field_values: Vec::new(),
    };
    for (_, _, instr) in code.instructions() {
        match &instr.op {
            Op::Argument { .. }
            | Op::Const(_)
            | Op::DebugPosition
            | Op::Goto { .. }
            | Op::Return { value: None } => {}
            Op::InstancePut {
                field,
                object,
                value,
            } if *object == receiver => {
                let declared = program
                    .field(*field)
                    .is_ok_and(|f| f.holder == holder && !f.flags.contains(FieldFlags::VOLATILE));
                if !declared {
                    return None;
                }
                let init = match arguments.iter().position(|a| a == value) {
                    Some(0) => return None,
                    Some(index) => InitValue::Argument(index),
                    None => InitValue::Constant(constants.get(value)?.clone()),
                };
                result.field_values.push((*field, init));
            }
            Op::Invoke {
                kind: InvokeKind::Direct,
                method,
                args,
            } if args.as_slice() == [receiver] && result.super_initializer.is_none() => {
                let callee = program.method(*method).ok()?;
                if !callee.is_constructor() || Some(callee.holder) != superclass {
                    return None;
                }
                let is_root = program.is_method(*method, known::OBJECT, known::INIT);
                let super_trivial = program.info(*method).trivial_initializer.is_some();
                if !is_root && !super_trivial {
                    return None;
                }
                result.super_initializer = Some(*method);
            }
            _ => return None,
        }
    }
    Some(result)
}

/// Recognizes `static { INSTANCE = new Holder(); }`.
fn trivial_class_initializer(
    code: &IrCode,
    program: &Program,
    holder: ClassId,
) -> Option<TrivialClassInitializer> {
    let mut instance = None;
    let mut constructed = false;
    let mut field = None;
    for (_, _, instr) in code.instructions() {
        match (&instr.op, instr.dest) {
            (Op::NewInstance { class }, Some(dest)) if *class == holder && instance.is_none() => {
                instance = Some(dest);
            }
            (
                Op::Invoke {
                    kind: InvokeKind::Direct,
                    method,
                    args,
                },
                _,
            ) if !constructed && instance.is_some_and(|i| args.as_slice() == [i]) => {
                let trivial = program.method(*method).is_ok_and(|m| m.holder == holder)
                    && program.info(*method).trivial_initializer.is_some();
                if !trivial {
                    return None;
                }
                constructed = true;
            }
            (Op::StaticPut { field: target, value }, _)
                if constructed && Some(*value) == instance && field.is_none() =>
            {
                let own = program
                    .field(*target)
                    .is_ok_and(|f| f.holder == holder && f.is_static());
                if !own {
                    return None;
                }
                field = Some(*target);
            }
            (
                Op::Argument { .. }
                | Op::DebugPosition
                | Op::Goto { .. }
                | Op::Return { value: None },
                _,
            ) => {}
            _ => return None,
        }
    }
    field.map(|field| TrivialClassInitializer { field })
}

/// Where a finalized body may be inlined.
#[must_use]
pub fn compute_constraint(
    code: &IrCode,
    program: &Program,
    method: MethodId,
    config: &OptimizerConfig,
) -> Constraint {
    let Ok(declaration) = program.method(method) else {
        return Constraint::Never;
    };
    if config.debug
        || declaration.is_class_initializer()
        || declaration.flags.intersects(
            MethodFlags::SYNCHRONIZED | MethodFlags::NATIVE | MethodFlags::ABSTRACT,
        )
    {
        return Constraint::Never;
    }

    // Super constructor calls are only legal inside the own class.
    let mut constraint = if declaration.is_constructor() {
        Constraint::SameClass
    } else {
        Constraint::Always
    };
    for (_, _, instr) in code.instructions() {
        let private = match &instr.op {
            Op::InstanceGet { field, .. }
            | Op::InstancePut { field, .. }
            | Op::StaticGet { field }
            | Op::StaticPut { field, .. } => program
                .field(*field)
                .is_ok_and(|f| f.flags.contains(FieldFlags::PRIVATE)),
            Op::Invoke {
                kind: InvokeKind::Super,
                ..
            } => {
                constraint = constraint.min(Constraint::Subclass);
                false
            }
            Op::Invoke { method, .. } => program
                .method(*method)
                .is_ok_and(|m| m.flags.contains(MethodFlags::PRIVATE)),
            _ => false,
        };
        if private {
            constraint = constraint.min(Constraint::SameClass);
        }
    }
    constraint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{BinaryOp, IrBuilder, ValueType},
        program::{Class, Field, Method},
    };

    #[test]
    fn test_constant_and_argument_returns() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Facts"));
        let identity = program.add_method(Method::new_static(
            class,
            "identity",
            vec![ValueType::Int],
            Some(ValueType::Int),
        ));
        let mut b = IrBuilder::new(identity);
        let x = b.argument(ValueType::Int);
        b.ret(Some(x));
        let info = compute(&b.finish(), &program, identity);
        assert_eq!(info.returns_argument, Some(0));
        assert!(info.side_effect_free);
        assert_eq!(info.returns_constant, None);

        let three = program.add_method(Method::new_static(
            class,
            "three",
            Vec::new(),
            Some(ValueType::Int),
        ));
        let mut b = IrBuilder::new(three);
        let c = b.const_int(3);
        b.ret(Some(c));
        let info = compute(&b.finish(), &program, three);
        assert_eq!(info.returns_constant, Some(Constant::Int(3)));
        assert_eq!(info.size, 2);
    }

    #[test]
    fn test_throwing_method_never_returns() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Facts"));
        let fail = program.add_method(Method::new_static(class, "fail", Vec::new(), None));
        let mut b = IrBuilder::new(fail);
        let null = b.const_null();
        b.throw(null);
        let info = compute(&b.finish(), &program, fail);
        assert!(info.never_returns_normally);
        assert!(!info.side_effect_free);
    }

    #[test]
    fn test_trivial_constructor_and_getter() {
        let program = Program::with_runtime_library();
        let object = program.find_class(known::OBJECT).unwrap();
        let object_init = program.find_method(object, known::INIT).unwrap();
        let class = program.add_class(Class::new("app.Box").with_superclass(object));
        let value = program.add_field(Field::new(class, "value", ValueType::Int));
        let ctor = program.add_method(Method::constructor(class, vec![ValueType::Int]));
        let getter =
            program.add_method(Method::new(class, "get", Vec::new(), Some(ValueType::Int)));

        let mut b = IrBuilder::new(ctor);
        let this = b.receiver(class);
        let v = b.argument(ValueType::Int);
        b.invoke(InvokeKind::Direct, object_init, &[this], None);
        b.instance_put(value, this, v);
        b.ret(None);
        let info = compute(&b.finish(), &program, ctor);
        assert_eq!(
            info.trivial_initializer,
            Some(TrivialInitializer {
                super_initializer: Some(object_init),
                field_values: vec![(value, InitValue::Argument(1))],
            })
        );
        assert!(info.checks_null_receiver_before_side_effect);

        let mut b = IrBuilder::new(getter);
        let this = b.receiver(class);
        let read = b.instance_get(value, this, ValueType::Int);
        let doubled = b.binary(BinaryOp::Add, read, read);
        b.ret(Some(doubled));
        let info = compute(&b.finish(), &program, getter);
        assert_eq!(
            info.class_inliner_eligibility,
            Some(ClassInlinerEligibility {
                returns_receiver: false
            })
        );
    }

    #[test]
    fn test_constraints() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Secret"));
        let hidden = program.add_field(
            Field::new_static(class, "hidden", ValueType::Int).with_flags(FieldFlags::PRIVATE),
        );
        let reveal = program.add_method(Method::new_static(
            class,
            "reveal",
            Vec::new(),
            Some(ValueType::Int),
        ));
        let mut b = IrBuilder::new(reveal);
        let v = b.static_get(hidden, ValueType::Int);
        b.ret(Some(v));
        let code = b.finish();

        let config = OptimizerConfig::default();
        assert_eq!(
            compute_constraint(&code, &program, reveal, &config),
            Constraint::SameClass
        );
        assert_eq!(
            compute_constraint(&code, &program, reveal, &OptimizerConfig::debug()),
            Constraint::Never
        );
    }
}
