//! Linear-scan register allocation.
//!
//! [`RegisterAllocator`] turns optimized SSA code into [`RegisterCode`]:
//!
//! 1. dead code elimination, trivial phi removal and critical edge splitting,
//! 2. the long-operation workaround, when the target needs it and not in debug,
//! 3. instruction numbering in traced block order ([`linear_scan::Numbering`]),
//! 4. live intervals from block liveness ([`linear_scan::build_intervals`]),
//! 5. linear scan ([`linear_scan::linear_scan`]): lowest free register, wide
//!    values on two consecutive slots, range-invoke arguments as one
//!    contiguous block, arguments pinned to the highest registers,
//! 6. out-of-SSA lowering with sequenced phi copies ([`lower`]),
//! 7. [`peephole`] cleanup.
//!
//! A method needing more than [`MAX_REGISTERS`] slots fails with
//! [`Error::RegisterOverflow`].

pub mod linear_scan;
pub mod lower;
pub mod peephole;
pub mod workaround;

use crate::{
    compiler::passes::eliminate_dead_code,
    config::OptimizerConfig,
    ir::{Instruction, IrCode, Op, ValueData, ValueId},
    output::RegisterCode,
    program::Program,
    Error, Result,
};

pub use linear_scan::{Allocation, LiveInterval};

/// Register slots the output format can address.
pub const MAX_REGISTERS: usize = 65536;

/// Argument words a non-range invoke can pass.
pub const MAX_NON_RANGE_WORDS: usize = 5;

/// Allocates registers for finalized methods.
pub struct RegisterAllocator<'a> {
    program: &'a Program,
    config: &'a OptimizerConfig,
}

impl<'a> RegisterAllocator<'a> {
    /// Creates an allocator for methods of `program`.
    #[must_use]
    pub fn new(program: &'a Program, config: &'a OptimizerConfig) -> Self {
        Self { program, config }
    }

    /// Allocates registers for `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegisterOverflow`] if the frame exceeds
    /// [`MAX_REGISTERS`], or an internal error for malformed input.
    pub fn allocate(&self, code: &IrCode) -> Result<RegisterCode> {
        self.allocate_with_details(code).map(|(output, _)| output)
    }

    /// Like [`allocate`](Self::allocate), also returning the assignment.
    ///
    /// # Errors
    ///
    /// See [`allocate`](Self::allocate).
    pub fn allocate_with_details(&self, code: &IrCode) -> Result<(RegisterCode, Allocation)> {
        let mut code = code.clone();
        let keep_locals = self.config.debug;
        eliminate_dead_code(&mut code, self.program, keep_locals);
        code.remove_trivial_phis();
        code.split_critical_edges();

        let order = code.trace_blocks();
        if self.config.platform.long_operation_bug && !self.config.debug {
            let fixed = workaround::materialize_before_long_operations(&mut code, &order);
            if fixed > 0 {
                tracing::trace!(method = %code.method, fixed, "long-operation workaround");
            }
        }
        let groups = prepare_range_invokes(&mut code);

        let numbering = linear_scan::Numbering::new(&code, &order);
        let intervals = linear_scan::build_intervals(&code, &numbering, keep_locals);
        let argument_types = self
            .program
            .method(code.method)
            .map(|m| m.argument_types())
            .unwrap_or_default();
        let mut allocation = linear_scan::linear_scan(&code, intervals, &groups, &argument_types);

        let scratch = lower::scratch_words(&code, &order, &allocation)?;
        allocation.pin_arguments(scratch);

        let required = allocation.frame_size();
        if required > MAX_REGISTERS {
            return Err(Error::RegisterOverflow {
                method: code.method,
                required,
                limit: MAX_REGISTERS,
            });
        }

        let mut blocks = lower::lower(&code, &order, &allocation)?;
        peephole::optimize(&mut blocks);

        tracing::debug!(
            method = %code.method,
            registers = required,
            blocks = blocks.len(),
            "registers allocated"
        );

        let output = RegisterCode {
            method: code.method,
            registers: required as u32,
            incoming: allocation.incoming(),
            blocks,
        };
        Ok((output, allocation))
    }
}

/// Copies the arguments of every invoke passing more than
/// [`MAX_NON_RANGE_WORDS`] words into fresh values right before the call.
///
/// Each returned group lists the copies of one call in argument order; the
/// scan places every group in consecutive registers.
fn prepare_range_invokes(code: &mut IrCode) -> Vec<Vec<ValueId>> {
    let mut sites = Vec::new();
    for (block, index, instr) in code.instructions() {
        if let Op::Invoke { args, .. } = &instr.op {
            let words: usize = args.iter().map(|a| code.value(*a).ty.width()).sum();
            if words > MAX_NON_RANGE_WORDS {
                sites.push((block, index));
            }
        }
    }

    let mut groups = Vec::with_capacity(sites.len());
    // Later sites first so earlier indices stay valid.
    for &(block, index) in sites.iter().rev() {
        let Some(instr) = code.block(block).and_then(|b| b.instructions.get(index)).cloned() else {
            continue;
        };
        let Op::Invoke { kind, method, args } = instr.op else {
            continue;
        };

        let mut copies = Vec::with_capacity(args.len());
        let mut moves = Vec::with_capacity(args.len());
        for &arg in &args {
            let data = ValueData {
                local: None,
                ..code.value(arg).clone()
            };
            let copy = code.new_value(data);
            moves.push(Instruction::new(Op::Move { src: arg }, Some(copy)).at(instr.position.clone()));
            copies.push(copy);
        }

        if let Some(target) = code.block_mut(block) {
            target.instructions[index].op = Op::Invoke {
                kind,
                method,
                args: copies.clone(),
            };
            target.instructions.splice(index..index, moves);
        }
        groups.push(copies);
    }
    groups.reverse();
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{BinaryOp, IfCond, InvokeKind, IrBuilder, ValueType},
        output::RegisterOp,
        program::{Class, Method, MethodFlags},
    };

    fn static_method(program: &Program, params: Vec<ValueType>, ret: Option<ValueType>) -> crate::program::MethodId {
        let class = program.add_class(Class::new("app.Alloc"));
        program.add_method(Method::new(class, "run", params, ret).with_flags(MethodFlags::STATIC))
    }

    #[test]
    fn test_arguments_are_pinned_to_top() {
        let program = Program::new();
        let method = static_method(&program, vec![ValueType::Int, ValueType::Long], Some(ValueType::Int));
        let mut b = IrBuilder::new(method);
        let x = b.argument(ValueType::Int);
        let _y = b.argument(ValueType::Long);
        let one = b.const_int(1);
        let sum = b.binary(BinaryOp::Add, x, one);
        b.ret(Some(sum));
        let code = b.finish();

        let config = OptimizerConfig::default();
        let (output, allocation) = RegisterAllocator::new(&program, &config)
            .allocate_with_details(&code)
            .unwrap();

        assert_eq!(output.incoming, 3);
        assert_eq!(output.registers, allocation.locals() + 3);
        assert_eq!(allocation.register(x), Some(output.argument_register(0)));
    }

    #[test]
    fn test_loop_phi_copies_are_emitted() {
        let program = Program::new();
        let method = static_method(&program, vec![ValueType::Int], Some(ValueType::Int));
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
        let i = b.phi(ValueType::Int, &[(entry, zero)]);
        b.if_cmp(IfCond::Lt, i, n, body, exit);
        b.switch_to(body);
        let next = b.binary(BinaryOp::Add, i, one);
        b.goto(header);
        b.switch_to(exit);
        b.ret(Some(i));
        let mut code = b.finish();
        if let Some(block) = code.block_mut(header) {
            block.phis[0].operands.push(crate::ir::PhiOperand {
                value: next,
                predecessor: body,
            });
        }

        let config = OptimizerConfig::default();
        let (output, allocation) = RegisterAllocator::new(&program, &config)
            .allocate_with_details(&code)
            .unwrap();

        let intervals = allocation.intervals();
        for (a_index, a) in intervals.iter().enumerate() {
            for b in &intervals[a_index + 1..] {
                if a.overlaps(b) {
                    let (ra, rb) = (
                        allocation.register(a.value).unwrap().0,
                        allocation.register(b.value).unwrap().0,
                    );
                    assert!(ra + a.width <= rb || rb + b.width <= ra, "{} and {} share a register", a.value, b.value);
                }
            }
        }
        assert!(output
            .instructions()
            .any(|i| matches!(i.op, RegisterOp::If { .. })));
        assert!(output
            .instructions()
            .any(|i| matches!(i.op, RegisterOp::Return { .. })));
    }

    #[test]
    fn test_wide_invoke_uses_range() {
        let program = Program::new();
        let method = static_method(&program, vec![ValueType::Long, ValueType::Long], None);
        let class = program.add_class(Class::new("app.Sink"));
        let sink = program.add_method(
            Method::new(class, "take", vec![ValueType::Long; 3], None).with_flags(MethodFlags::STATIC),
        );
        let mut b = IrBuilder::new(method);
        let a = b.argument(ValueType::Long);
        let c = b.argument(ValueType::Long);
        b.invoke(InvokeKind::Static, sink, &[a, c, a], None);
        b.ret(None);
        let code = b.finish();

        let config = OptimizerConfig::default();
        let output = RegisterAllocator::new(&program, &config).allocate(&code).unwrap();
        let invoke = output
            .instructions()
            .find_map(|i| match &i.op {
                RegisterOp::Invoke { args, range, .. } => Some((args.clone(), *range)),
                _ => None,
            })
            .unwrap();
        assert!(invoke.1);
        assert_eq!(invoke.0.len(), 3);
        assert_eq!(invoke.0[1].0, invoke.0[0].0 + 2);
        assert_eq!(invoke.0[2].0, invoke.0[1].0 + 2);
    }
}
