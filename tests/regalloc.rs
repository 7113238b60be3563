//! Register allocation and SSA preservation properties.
//!
//! A handful of method shapes (loops, swaps, wide values, range calls) are
//! run through the full pass pipeline with SSA verification enabled, then
//! register-allocated; every allocation is checked for interference.

use bytescope::{
    compiler::{CompilerContext, MethodContext, PassScheduler},
    ir::{verify_ssa, NumericType, PhiOperand},
    output::RegisterOp,
    prelude::*,
    regalloc::Allocation,
    Error,
};

struct Shape {
    name: &'static str,
    method: MethodId,
    code: IrCode,
}

/// `int sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }`
fn counting_loop(program: &Program, class: ClassId) -> Shape {
    let method = program.add_method(Method::new_static(
        class,
        "sum",
        vec![ValueType::Int],
        Some(ValueType::Int),
    ));
    let mut b = IrBuilder::new(method);
    let n = b.argument(ValueType::Int);
    let zero = b.const_int(0);
    let entry = b.current_block();
    let header = b.new_block();
    let body = b.new_block();
    let exit = b.new_block();
    b.goto(header);

    b.switch_to(body);
    let one = b.const_int(1);
    b.switch_to(header);
    let sum = b.phi(ValueType::Int, &[(entry, zero)]);
    let i = b.phi(ValueType::Int, &[(entry, zero)]);
    b.if_cmp(IfCond::Lt, i, n, body, exit);

    b.switch_to(body);
    let next_sum = b.binary(BinaryOp::Add, sum, i);
    let next_i = b.binary(BinaryOp::Add, i, one);
    b.goto(header);

    b.switch_to(exit);
    b.ret(Some(sum));

    let mut code = b.finish();
    add_back_edge(&mut code, header, body, &[(sum, next_sum), (i, next_i)]);
    Shape {
        name: "counting-loop",
        method,
        code,
    }
}

/// `while (n-- != 0) { t = a; a = b; b = t; } return a - b;`
fn swapping_loop(program: &Program, class: ClassId) -> Shape {
    let method = program.add_method(Method::new_static(
        class,
        "swap",
        vec![ValueType::Int, ValueType::Int, ValueType::Int],
        Some(ValueType::Int),
    ));
    let mut b = IrBuilder::new(method);
    let a = b.argument(ValueType::Int);
    let c = b.argument(ValueType::Int);
    let n = b.argument(ValueType::Int);
    let entry = b.current_block();
    let header = b.new_block();
    let body = b.new_block();
    let exit = b.new_block();
    b.goto(header);

    b.switch_to(header);
    let x = b.phi(ValueType::Int, &[(entry, a)]);
    let y = b.phi(ValueType::Int, &[(entry, c)]);
    let count = b.phi(ValueType::Int, &[(entry, n)]);
    b.if_zero(IfCond::Ne, count, body, exit);

    b.switch_to(body);
    let one = b.const_int(1);
    let next = b.binary(BinaryOp::Sub, count, one);
    b.goto(header);

    b.switch_to(exit);
    let diff = b.binary(BinaryOp::Sub, x, y);
    b.ret(Some(diff));

    let mut code = b.finish();
    add_back_edge(&mut code, header, body, &[(x, y), (y, x), (count, next)]);
    Shape {
        name: "swapping-loop",
        method,
        code,
    }
}

/// `long mix(long a, int k, long b) { return (a + b) * k; }` with wide values.
fn wide_arithmetic(program: &Program, class: ClassId) -> Shape {
    let method = program.add_method(Method::new_static(
        class,
        "mix",
        vec![ValueType::Long, ValueType::Int, ValueType::Long],
        Some(ValueType::Long),
    ));
    let mut b = IrBuilder::new(method);
    let a = b.argument(ValueType::Long);
    let k = b.argument(ValueType::Int);
    let c = b.argument(ValueType::Long);
    let sum = b.binary(BinaryOp::Add, a, c);
    let widened = b.convert(NumericType::Long, k);
    let product = b.binary(BinaryOp::Mul, sum, widened);
    b.ret(Some(product));
    Shape {
        name: "wide-arithmetic",
        method,
        code: b.finish(),
    }
}

/// A call passing more argument words than a non-range call can encode.
fn range_call(program: &Program, class: ClassId) -> Shape {
    let target = program.add_method(Method::new_static(
        class,
        "sink",
        vec![ValueType::Long, ValueType::Int, ValueType::Long, ValueType::Int],
        None,
    ));
    let method = program.add_method(Method::new_static(
        class,
        "call",
        vec![ValueType::Int, ValueType::Long],
        None,
    ));
    let mut b = IrBuilder::new(method);
    let k = b.argument(ValueType::Int);
    let l = b.argument(ValueType::Long);
    let m = b.const_long(7);
    b.invoke(InvokeKind::Static, target, &[l, k, m, k], None);
    b.ret(None);
    Shape {
        name: "range-call",
        method,
        code: b.finish(),
    }
}

/// Appends the back-edge operands of loop phis once the body block exists.
fn add_back_edge(code: &mut IrCode, header: BlockId, latch: BlockId, operands: &[(ValueId, ValueId)]) {
    let block = code.block_mut(header).expect("header exists");
    for (phi_value, incoming) in operands {
        let phi = block
            .phis
            .iter_mut()
            .find(|phi| phi.dest == *phi_value)
            .expect("phi exists");
        phi.operands.push(PhiOperand {
            value: *incoming,
            predecessor: latch,
        });
    }
}

fn shapes(program: &Program) -> Vec<Shape> {
    let class = program.add_class(Class::new("app.Shapes"));
    vec![
        counting_loop(program, class),
        swapping_loop(program, class),
        wide_arithmetic(program, class),
        range_call(program, class),
    ]
}

fn assert_no_interference(name: &str, code: &IrCode, allocation: &Allocation) {
    let intervals = allocation.intervals();
    let frame = allocation.frame_size() as u32;
    for interval in intervals {
        let register = allocation
            .register(interval.value)
            .unwrap_or_else(|| panic!("{name}: {} has no register", interval.value));
        assert!(
            register.0 + interval.width <= frame,
            "{name}: {} at {register} exceeds the frame",
            interval.value
        );
        // Copies made for range calls only exist in the allocator's clone.
        let original = interval.value.0 < code.value_count();
        if original && code.value(interval.value).ty.is_wide() {
            assert_eq!(interval.width, 2, "{name}: {} is wide", interval.value);
        }
    }
    for (index, first) in intervals.iter().enumerate() {
        for second in &intervals[index + 1..] {
            if !first.overlaps(second) {
                continue;
            }
            let (Some(a), Some(b)) = (
                allocation.register(first.value),
                allocation.register(second.value),
            ) else {
                continue;
            };
            let disjoint = a.0 + first.width <= b.0 || b.0 + second.width <= a.0;
            assert!(
                disjoint,
                "{name}: {} ({a}) and {} ({b}) interfere",
                first.value, second.value
            );
        }
    }
}

#[test]
fn test_pipeline_preserves_ssa() -> Result<()> {
    let program = Program::new();
    let compiler = CompilerContext::new();
    let config = OptimizerConfig::default().with_verify_ssa(true);
    let scheduler = PassScheduler::default();

    for mut shape in shapes(&program) {
        verify_ssa(&shape.code, "input")?;
        let ctx = MethodContext::new(&program, &config, &compiler, shape.method);
        scheduler.run(&mut shape.code, &ctx)?;
        verify_ssa(&shape.code, shape.name)?;
    }
    Ok(())
}

#[test]
fn test_allocations_do_not_interfere() -> Result<()> {
    let program = Program::new();
    let config = OptimizerConfig::default();
    let allocator = RegisterAllocator::new(&program, &config);

    for shape in shapes(&program) {
        let (output, allocation) = allocator.allocate_with_details(&shape.code)?;
        assert_no_interference(shape.name, &shape.code, &allocation);
        assert_eq!(output.registers as usize, allocation.frame_size(), "{}", shape.name);
        assert!(output.instruction_count() > 0, "{}", shape.name);
    }
    Ok(())
}

#[test]
fn test_range_call_uses_consecutive_registers() -> Result<()> {
    let program = Program::new();
    let class = program.add_class(Class::new("app.Range"));
    let shape = range_call(&program, class);
    let config = OptimizerConfig::default();
    let output = RegisterAllocator::new(&program, &config).allocate(&shape.code)?;

    let (args, range) = output
        .instructions()
        .find_map(|instr| match &instr.op {
            RegisterOp::Invoke { args, range, .. } => Some((args.clone(), *range)),
            _ => None,
        })
        .expect("call survives");
    assert!(range);
    let first = args[0].0;
    let words: Vec<u32> = args.iter().map(|r| r.0 - first).collect();
    assert_eq!(words, vec![0, 2, 3, 5]);
    Ok(())
}

#[test]
fn test_incoming_arguments_sit_at_the_top() -> Result<()> {
    let program = Program::new();
    let class = program.add_class(Class::new("app.Top"));
    let shape = wide_arithmetic(&program, class);
    let config = OptimizerConfig::default();
    let output = RegisterAllocator::new(&program, &config).allocate(&shape.code)?;

    assert_eq!(output.incoming, 5);
    assert_eq!(output.argument_register(0).0, output.registers - 5);
    Ok(())
}

#[test]
fn test_register_overflow_is_reported() {
    let program = Program::new();
    let class = program.add_class(Class::new("app.Huge"));
    let method = program.add_method(Method::new_static(
        class,
        "huge",
        vec![ValueType::Long; 33_000],
        None,
    ));
    let mut b = IrBuilder::new(method);
    b.ret(None);
    let code = b.finish();

    let config = OptimizerConfig::default();
    let result = RegisterAllocator::new(&program, &config).allocate(&code);
    assert!(matches!(
        result,
        Err(Error::RegisterOverflow {
            required: 66_000,
            ..
        })
    ));
}
