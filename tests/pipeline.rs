//! Whole-program optimization tests.
//!
//! Each test registers a small program, runs [`IrConverter::optimize`] and
//! inspects the finalized register code of the methods involved.

use std::sync::{Arc, Mutex};

use bytescope::{
    config::{OutputFormat, TestingHooks},
    output::RegisterOp,
    prelude::*,
};
use pretty_assertions::assert_eq;

/// Register operations of the finalized body of `method`.
fn register_ops(program: &Program, method: MethodId) -> Vec<RegisterOp> {
    let code = program.code(method).expect("method has code");
    let register = code.as_register().expect("register output");
    register.instructions().map(|instr| instr.op.clone()).collect()
}

fn calls(program: &Program, method: MethodId) -> Vec<MethodId> {
    program
        .code(method)
        .map(|code| code.invoked_methods(method, program))
        .unwrap_or_default()
}

/// `static int f() { return 1 + 2; }` and `static int g() { return f(); }`.
fn constant_callee(program: &Program) -> (MethodId, MethodId) {
    constant_callee_with(program, MethodFlags::empty())
}

fn constant_callee_with(program: &Program, flags: MethodFlags) -> (MethodId, MethodId) {
    let class = program.add_class(Class::new("app.Main"));
    let f = program.add_method(
        Method::new_static(class, "f", Vec::new(), Some(ValueType::Int)).with_flags(flags),
    );
    let g = program.add_method(Method::new_static(class, "g", Vec::new(), Some(ValueType::Int)));

    let mut b = IrBuilder::new(f);
    let one = b.const_int(1);
    let two = b.const_int(2);
    let sum = b.binary(BinaryOp::Add, one, two);
    b.ret(Some(sum));
    program.set_code(f, Code::from_ir(b.finish()));

    let mut b = IrBuilder::new(g);
    let result = b.invoke(InvokeKind::Static, f, &[], Some(ValueType::Int));
    b.ret(result);
    program.set_code(g, Code::from_ir(b.finish()));
    (f, g)
}

/// `class Cell { int value; int get() { return value; } }` and
/// `static int read(Cell c) { return c.get(); }`.
fn nullable_receiver(program: &Program) -> (MethodId, MethodId) {
    let class = program.add_class(Class::new("app.Cell"));
    let field = program.add_field(Field::new(class, "value", ValueType::Int));
    let get = program.add_method(Method::new(class, "get", Vec::new(), Some(ValueType::Int)));
    let read = program.add_method(Method::new_static(
        class,
        "read",
        vec![ValueType::Reference],
        Some(ValueType::Int),
    ));

    let mut b = IrBuilder::new(get);
    let this = b.receiver(class);
    let value = b.instance_get(field, this, ValueType::Int);
    b.ret(Some(value));
    program.set_code(get, Code::from_ir(b.finish()));

    let mut b = IrBuilder::new(read);
    let cell = b.reference_argument(Some(class));
    let value = b.invoke(InvokeKind::Virtual, get, &[cell], Some(ValueType::Int));
    b.ret(value);
    program.set_code(read, Code::from_ir(b.finish()));
    (get, read)
}

#[test]
fn test_trivial_constant_callee_is_inlined_and_removed() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee(&program);

    let converter = IrConverter::new(&program, OptimizerConfig::default().with_inlining(true, 6));
    let stats = converter.optimize()?;

    let ops = register_ops(&program, g);
    assert_eq!(ops.len(), 2);
    let RegisterOp::Const { dest, value } = &ops[0] else {
        panic!("expected a constant, got {}", ops[0]);
    };
    assert_eq!(*value, Constant::Int(3));
    assert_eq!(ops[1], RegisterOp::Return { value: Some(*dest) });

    assert!(!program.is_live(f));
    assert!(!program.method_ids().contains(&f));
    assert!(program.code(f).is_none());
    assert!(converter.events().has(EventKind::MethodRemoved));
    assert!(stats.methods_removed >= 1);
    Ok(())
}

#[test]
fn test_kept_callee_survives() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee_with(&program, MethodFlags::KEEP);

    IrConverter::new(&program, OptimizerConfig::default()).optimize()?;
    assert!(program.is_live(f));
    assert!(calls(&program, g).is_empty());
    Ok(())
}

#[test]
fn test_nullable_receiver_gate() -> Result<()> {
    let program = Program::new();
    let (get, read) = nullable_receiver(&program);
    let config = OptimizerConfig::default().with_nullable_receivers(false);
    let converter = IrConverter::new(&program, config);
    converter.optimize()?;

    assert_eq!(calls(&program, read), vec![get]);
    assert!(program.is_live(get));
    assert!(converter.events().has(EventKind::InlineRejected));

    let program = Program::new();
    let (get, read) = nullable_receiver(&program);
    let config = OptimizerConfig::default().with_nullable_receivers(true);
    IrConverter::new(&program, config).optimize()?;

    assert!(calls(&program, read).is_empty());
    assert!(!program.is_live(get));
    // The field read dereferences the receiver first, so no explicit check.
    let ops = register_ops(&program, read);
    assert!(ops.iter().any(|op| matches!(op, RegisterOp::InstanceGet { .. })));
    assert!(!ops.iter().any(|op| matches!(op, RegisterOp::NullCheck { .. })));
    Ok(())
}

#[test]
fn test_nullable_receiver_gets_explicit_check() -> Result<()> {
    // void touch() { hits = 1; this.value = 1; }  static void poke(Counter c) { c.touch(); }
    let program = Program::new();
    let class = program.add_class(Class::new("app.Counter"));
    let hits = program.add_field(Field::new_static(class, "hits", ValueType::Int));
    let value = program.add_field(Field::new(class, "value", ValueType::Int));
    let touch = program.add_method(Method::new(class, "touch", Vec::new(), None));
    let poke = program.add_method(Method::new_static(
        class,
        "poke",
        vec![ValueType::Reference],
        None,
    ));

    let mut b = IrBuilder::new(touch);
    let this = b.receiver(class);
    let one = b.const_int(1);
    b.static_put(hits, one);
    b.instance_put(value, this, one);
    b.ret(None);
    program.set_code(touch, Code::from_ir(b.finish()));

    let mut b = IrBuilder::new(poke);
    let counter = b.reference_argument(Some(class));
    b.invoke(InvokeKind::Virtual, touch, &[counter], None);
    b.ret(None);
    program.set_code(poke, Code::from_ir(b.finish()));

    let config = OptimizerConfig::default().with_nullable_receivers(true);
    IrConverter::new(&program, config).optimize()?;

    assert!(calls(&program, poke).is_empty());
    let ops = register_ops(&program, poke);
    let position = |is: fn(&RegisterOp) -> bool| ops.iter().position(|op| is(op));
    let check = position(|op| matches!(op, RegisterOp::NullCheck { .. }))
        .expect("receiver is checked");
    let store = position(|op| matches!(op, RegisterOp::StaticPut { .. })).expect("static store");
    assert!(check < store);
    assert!(ops.iter().any(|op| matches!(op, RegisterOp::InstancePut { .. })));
    Ok(())
}

#[test]
fn test_debug_mode_never_inlines() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee(&program);
    IrConverter::new(&program, OptimizerConfig::debug()).optimize()?;

    assert_eq!(calls(&program, g), vec![f]);
    assert!(program.is_live(f));
    Ok(())
}

#[test]
fn test_stack_output() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee(&program);
    let config = OptimizerConfig::debug().with_output(OutputFormat::Stack);
    IrConverter::new(&program, config).optimize()?;

    for method in [f, g] {
        let code = program.code(method).expect("method has code");
        let stack = code.as_stack().expect("stack output");
        assert!(stack.max_stack >= 1);
    }
    Ok(())
}

#[test]
fn test_skip_ir_keeps_input() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee(&program);
    let converter = IrConverter::new(&program, OptimizerConfig::default().with_skip_ir(true));
    converter.optimize()?;

    for method in [f, g] {
        assert!(!program.code(method).expect("method has code").is_finalized());
    }
    assert_eq!(converter.events().count_kind(EventKind::MethodSkipped), 2);
    Ok(())
}

#[test]
fn test_layer_hook_observes_published_callees() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee(&program);
    let layers: Arc<Mutex<Vec<Vec<MethodId>>>> = Arc::default();
    let sink = Arc::clone(&layers);
    let config = OptimizerConfig::default().with_testing(TestingHooks {
        after_layer: Some(Arc::new(move |_: usize, layer: &[MethodId]| {
            sink.lock().unwrap().push(layer.to_vec());
        })),
        ..TestingHooks::default()
    });

    IrConverter::new(&program, config).optimize()?;
    assert_eq!(*layers.lock().unwrap(), vec![vec![f], vec![g]]);
    Ok(())
}

#[test]
fn test_recursive_pair_keeps_calls() -> Result<()> {
    // even(n) = n == 0 ? 1 : odd(n - 1); odd(n) = n == 0 ? 0 : even(n - 1)
    let program = Program::new();
    let class = program.add_class(Class::new("app.Parity"));
    let even = program.add_method(Method::new_static(
        class,
        "even",
        vec![ValueType::Int],
        Some(ValueType::Int),
    ));
    let odd = program.add_method(Method::new_static(
        class,
        "odd",
        vec![ValueType::Int],
        Some(ValueType::Int),
    ));
    for (method, other, base) in [(even, odd, 1), (odd, even, 0)] {
        let mut b = IrBuilder::new(method);
        let n = b.argument(ValueType::Int);
        let zero = b.new_block();
        let recurse = b.new_block();
        b.if_zero(IfCond::Eq, n, zero, recurse);
        b.switch_to(zero);
        let result = b.const_int(base);
        b.ret(Some(result));
        b.switch_to(recurse);
        let one = b.const_int(1);
        let next = b.binary(BinaryOp::Sub, n, one);
        let result = b.invoke(InvokeKind::Static, other, &[next], Some(ValueType::Int));
        b.ret(result);
        program.set_code(method, Code::from_ir(b.finish()));
    }

    let converter = IrConverter::new(&program, OptimizerConfig::default());
    converter.optimize()?;

    assert!(program.is_live(even));
    assert!(program.is_live(odd));
    assert!(program.code(even).is_some_and(|code| code.is_finalized()));
    assert!(program.code(odd).is_some_and(|code| code.is_finalized()));
    assert!(converter.events().has(EventKind::LayerCompleted));
    // Each body calls back into the other, so neither can be inlined.
    assert_eq!(calls(&program, even), vec![odd]);
    assert_eq!(calls(&program, odd), vec![even]);
    assert!(!converter.events().has(EventKind::MethodInlined));
    Ok(())
}

#[test]
fn test_call_cycle_is_double_inlined() -> Result<()> {
    // a() { count = 1; b(); }  b() { count = 2; c(); }  c() { count = 3; a(); }
    let program = Program::new();
    let class = program.add_class(Class::new("app.Cycle"));
    let count = program.add_field(Field::new_static(class, "count", ValueType::Int));
    let [a, b, c] = ["a", "b", "c"]
        .map(|name| program.add_method(Method::new_static(class, name, Vec::new(), None)));
    for (value, method, next) in [(1, a, b), (2, b, c), (3, c, a)] {
        let mut builder = IrBuilder::new(method);
        let constant = builder.const_int(value);
        builder.static_put(count, constant);
        builder.invoke(InvokeKind::Static, next, &[], None);
        builder.ret(None);
        program.set_code(method, Code::from_ir(builder.finish()));
    }

    let converter = IrConverter::new(&program, OptimizerConfig::default());
    converter.optimize()?;

    // The whole cycle is one layer, so every callee is only available in
    // the second round, which splices one step of the cycle into each caller.
    assert_eq!(converter.events().count_kind(EventKind::DoubleInlineScheduled), 3);
    assert_eq!(converter.events().count_kind(EventKind::MethodInlined), 3);
    assert_eq!(calls(&program, a), vec![c]);
    assert_eq!(calls(&program, b), vec![a]);
    assert_eq!(calls(&program, c), vec![b]);
    for method in [a, b, c] {
        assert!(program.is_live(method));
    }
    Ok(())
}

#[test]
fn test_convert_processes_every_method() -> Result<()> {
    let program = Program::new();
    let (f, g) = constant_callee(&program);
    let converter = IrConverter::new(&program, OptimizerConfig::default());
    converter.convert()?;

    assert!(program.code(f).is_some_and(|code| code.is_finalized()));
    assert_eq!(calls(&program, g), vec![f]);
    assert!(!program.info(f).is_processed());
    assert_eq!(converter.events().count_kind(EventKind::CodeFinalized), 2);
    Ok(())
}

#[test]
fn test_repeated_sequences_are_outlined() -> Result<()> {
    // (a + b) * a ^ c in two methods
    let program = Program::with_runtime_library();
    let class = program.add_class(Class::new("app.Math"));
    let methods: Vec<MethodId> = (0..2)
        .map(|n| {
            let method = program.add_method(Method::new_static(
                class,
                &format!("f{n}"),
                vec![ValueType::Int; 3],
                Some(ValueType::Int),
            ));
            let mut b = IrBuilder::new(method);
            let a = b.argument(ValueType::Int);
            let x = b.argument(ValueType::Int);
            let c = b.argument(ValueType::Int);
            let sum = b.binary(BinaryOp::Add, a, x);
            let product = b.binary(BinaryOp::Mul, sum, a);
            let mixed = b.binary(BinaryOp::Xor, product, c);
            b.ret(Some(mixed));
            program.set_code(method, Code::from_ir(b.finish()));
            method
        })
        .collect();

    let config = OptimizerConfig::release().with_outline(OutlineOptions {
        enabled: true,
        min_size: 2,
        max_size: 10,
        threshold: 2,
        max_arguments: 3,
    });
    let converter = IrConverter::new(&program, config);
    converter.optimize()?;

    let outline_class = program
        .find_class("bytescope.Outline")
        .expect("outline class synthesized");
    let outline = program.methods_of(outline_class);
    assert_eq!(outline.len(), 1);
    for method in methods {
        assert_eq!(calls(&program, method), outline);
    }
    assert!(program.code(outline[0]).is_some_and(|code| code.is_finalized()));
    assert_eq!(converter.events().count_kind(EventKind::Outlined), 2);
    Ok(())
}
