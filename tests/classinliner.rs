//! Class inlining through the whole pipeline.

use std::sync::{Arc, Mutex};

use bytescope::{
    config::TestingHooks,
    output::RegisterOp,
    prelude::*,
    program::known,
};
use pretty_assertions::assert_eq;

struct Fixture {
    program: Program,
    class: ClassId,
    field: FieldId,
    constructor: MethodId,
    app: ClassId,
}

/// `class L { final int x; L(int x) { super(); this.x = x; } }`
fn fixture() -> Fixture {
    let program = Program::with_runtime_library();
    let object = program.find_class(known::OBJECT).expect("runtime library");
    let object_init = program.find_method(object, known::INIT).expect("runtime library");
    let class = program.add_class(Class::new("app.L").with_superclass(object));
    let field = program.add_field(Field::new(class, "x", ValueType::Int).with_flags(FieldFlags::FINAL));
    let constructor = program.add_method(Method::constructor(class, vec![ValueType::Int]));
    let app = program.add_class(Class::new("app.Main").with_superclass(object));

    let mut b = IrBuilder::new(constructor);
    let this = b.receiver(class);
    let x = b.argument(ValueType::Int);
    b.invoke(InvokeKind::Direct, object_init, &[this], None);
    b.instance_put(field, this, x);
    b.ret(None);
    program.set_code(constructor, Code::from_ir(b.finish()));

    Fixture {
        program,
        class,
        field,
        constructor,
        app,
    }
}

/// `static int run() { return new L(value).x; }`
fn read_fresh_field(f: &Fixture, name: &str, value: i32) -> MethodId {
    let run = f.program.add_method(Method::new_static(f.app, name, Vec::new(), Some(ValueType::Int)));
    let mut b = IrBuilder::new(run);
    let object = b.new_instance(f.class);
    let constant = b.const_int(value);
    b.invoke(InvokeKind::Direct, f.constructor, &[object, constant], None);
    let x = b.instance_get(f.field, object, ValueType::Int);
    b.ret(Some(x));
    f.program.set_code(run, Code::from_ir(b.finish()));
    run
}

fn register_ops(program: &Program, method: MethodId) -> Vec<RegisterOp> {
    let code = program.code(method).expect("method has code");
    let register = code.as_register().expect("register output");
    register.instructions().map(|instr| instr.op.clone()).collect()
}

fn has_object_access(ops: &[RegisterOp]) -> bool {
    ops.iter().any(|op| {
        matches!(
            op,
            RegisterOp::NewInstance { .. }
                | RegisterOp::InstanceGet { .. }
                | RegisterOp::InstancePut { .. }
                | RegisterOp::Invoke { .. }
        )
    })
}

#[test]
fn test_fresh_object_field_read_becomes_literal() -> Result<()> {
    let f = fixture();
    let run = read_fresh_field(&f, "run", 5);

    let converter = IrConverter::new(&f.program, OptimizerConfig::default());
    converter.optimize()?;

    let ops = register_ops(&f.program, run);
    assert!(!has_object_access(&ops));
    assert_eq!(ops.len(), 2);
    let RegisterOp::Const { dest, value } = &ops[0] else {
        panic!("expected a constant, got {}", ops[0]);
    };
    assert_eq!(*value, Constant::Int(5));
    assert_eq!(ops[1], RegisterOp::Return { value: Some(*dest) });
    assert!(converter.events().has(EventKind::ClassInlined));
    Ok(())
}

#[test]
fn test_class_inlining_disabled_keeps_allocation() -> Result<()> {
    let f = fixture();
    let run = read_fresh_field(&f, "run", 5);

    let config = OptimizerConfig::default().with_class_inlining(false, 50);
    IrConverter::new(&f.program, config).optimize()?;

    let ops = register_ops(&f.program, run);
    assert!(ops.iter().any(|op| matches!(op, RegisterOp::NewInstance { .. })));
    Ok(())
}

#[test]
fn test_escaping_object_is_not_inlined() -> Result<()> {
    let f = fixture();
    let sink = f.program.add_field(Field::new_static(f.app, "sink", ValueType::Reference));
    let run = f.program.add_method(Method::new_static(f.app, "publish", Vec::new(), None));
    let mut b = IrBuilder::new(run);
    let object = b.new_instance(f.class);
    let seven = b.const_int(7);
    b.invoke(InvokeKind::Direct, f.constructor, &[object, seven], None);
    b.static_put(sink, object);
    b.ret(None);
    f.program.set_code(run, Code::from_ir(b.finish()));

    IrConverter::new(&f.program, OptimizerConfig::default()).optimize()?;

    let ops = register_ops(&f.program, run);
    assert!(ops.iter().any(|op| matches!(op, RegisterOp::NewInstance { .. })));
    assert!(ops.iter().any(|op| matches!(op, RegisterOp::StaticPut { .. })));
    Ok(())
}

#[test]
fn test_private_access_in_user_blocks_class_inlining() -> Result<()> {
    let f = fixture();
    let secret = f.program.add_field(
        Field::new_static(f.class, "SECRET", ValueType::Int).with_flags(FieldFlags::PRIVATE),
    );
    let get_x = f
        .program
        .add_method(Method::new(f.class, "getX", Vec::new(), Some(ValueType::Int)));
    let mut b = IrBuilder::new(get_x);
    let this = b.receiver(f.class);
    let x = b.instance_get(f.field, this, ValueType::Int);
    let hidden = b.static_get(secret, ValueType::Int);
    let sum = b.binary(BinaryOp::Add, x, hidden);
    b.ret(Some(sum));
    f.program.set_code(get_x, Code::from_ir(b.finish()));

    // static int run() { return new L(5).getX(); }
    let run = f.program.add_method(Method::new_static(f.app, "run", Vec::new(), Some(ValueType::Int)));
    let mut b = IrBuilder::new(run);
    let object = b.new_instance(f.class);
    let five = b.const_int(5);
    b.invoke(InvokeKind::Direct, f.constructor, &[object, five], None);
    let result = b.invoke(InvokeKind::Virtual, get_x, &[object], Some(ValueType::Int));
    b.ret(result);
    f.program.set_code(run, Code::from_ir(b.finish()));

    let converter = IrConverter::new(&f.program, OptimizerConfig::default());
    converter.optimize()?;

    let ops = register_ops(&f.program, run);
    assert!(!ops.iter().any(|op| matches!(op, RegisterOp::StaticGet { .. })));
    assert!(ops.iter().any(|op| matches!(op, RegisterOp::NewInstance { .. })));
    assert!(ops
        .iter()
        .any(|op| matches!(op, RegisterOp::Invoke { method, .. } if *method == get_x)));
    assert!(!converter.events().has(EventKind::ClassInlined));
    Ok(())
}

#[test]
fn test_hook_sees_inlined_classes() -> Result<()> {
    let f = fixture();
    let first = read_fresh_field(&f, "first", 1);
    let second = read_fresh_field(&f, "second", 2);
    let seen: Arc<Mutex<Vec<(MethodId, Vec<ClassId>)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let config = OptimizerConfig::default().with_testing(TestingHooks {
        after_class_inlining: Some(Arc::new(
            move |method: MethodId, classes: &[ClassId], _code: &IrCode| {
                sink.lock().unwrap().push((method, classes.to_vec()));
            },
        )),
        ..TestingHooks::default()
    });

    IrConverter::new(&f.program, config).optimize()?;

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![(first, vec![f.class]), (second, vec![f.class])]);
    Ok(())
}
