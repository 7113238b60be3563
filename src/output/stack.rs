use std::{collections::HashMap, fmt};

use crate::{
    ir::{
        BinaryOp, BlockId, Constant, IfCond, InvokeKind, IrCode, NumericType, Op, UnaryOp,
        ValueId, ValueType,
    },
    program::{ClassId, FieldId, MethodId, Program},
    Result,
};

/// One operand-stack operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackInstruction {
    /// Pushes local `slot`.
    Load {
        /// Local slot.
        slot: u32,
        /// Type of the local.
        ty: ValueType,
    },
    /// Pops into local `slot`.
    Store {
        /// Local slot.
        slot: u32,
        /// Type of the local.
        ty: ValueType,
    },
    /// Pushes a constant.
    Const(Constant),
    /// Two-operand arithmetic.
    Binary {
        /// The operation.
        op: BinaryOp,
        /// Operand width.
        ty: NumericType,
    },
    /// One-operand arithmetic.
    Unary {
        /// The operation.
        op: UnaryOp,
        /// Operand width.
        ty: NumericType,
    },
    /// Three-way long compare.
    Cmp,
    /// Numeric conversion.
    Convert {
        /// Source width.
        from: NumericType,
        /// Destination width.
        to: NumericType,
    },
    /// Allocates an instance.
    New(ClassId),
    /// Allocates an array.
    NewArray,
    /// Array length.
    ArrayLength,
    /// Array element load.
    ArrayLoad,
    /// Array element store.
    ArrayStore,
    /// Instance field read.
    GetField(FieldId),
    /// Instance field write.
    PutField(FieldId),
    /// Static field read.
    GetStatic(FieldId),
    /// Static field write.
    PutStatic(FieldId),
    /// Method call.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Referenced method.
        method: MethodId,
    },
    /// Checked cast of the top of stack.
    CheckCast(ClassId),
    /// Type test of the top of stack.
    InstanceOf(ClassId),
    /// Pops a reference and throws if it is null.
    NullCheck,
    /// Discards the top of stack.
    Pop {
        /// Pops two slots.
        wide: bool,
    },
    /// Unconditional jump.
    Goto(BlockId),
    /// Conditional jump; `zero` compares one operand against zero or null.
    If {
        /// Condition.
        cond: IfCond,
        /// One operand compared against zero.
        zero: bool,
        /// Target when the condition holds.
        target: BlockId,
    },
    /// Multi-way jump; falls through when no key matches.
    Switch {
        /// Case keys.
        keys: Vec<i32>,
        /// Case targets.
        targets: Vec<BlockId>,
    },
    /// Returns, with the value on the stack unless void.
    Return(Option<ValueType>),
    /// Throws the top of stack.
    Throw,
}

impl StackInstruction {
    /// Returns true if control never continues with the next instruction.
    #[must_use]
    pub fn ends_flow(&self) -> bool {
        matches!(self, Self::Goto(_) | Self::Return(_) | Self::Throw)
    }
}

/// A labelled run of stack instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackBlock {
    /// Label, the id of the IR block this run was lowered from.
    pub label: BlockId,
    /// The instructions.
    pub instructions: Vec<StackInstruction>,
}

/// A method body in operand-stack form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCode {
    /// The method this code belongs to.
    pub method: MethodId,
    /// Local slots, arguments first.
    pub max_locals: u32,
    /// Deepest operand stack in slots.
    pub max_stack: u32,
    /// Blocks in layout order; the first one is the entry.
    pub blocks: Vec<StackBlock>,
}

struct Lowering<'a> {
    code: &'a IrCode,
    slots: HashMap<ValueId, u32>,
    next_slot: u32,
    max_stack: u32,
    out: Vec<StackInstruction>,
}

impl Lowering<'_> {
    fn ty(&self, value: ValueId) -> ValueType {
        self.code.value(value).ty
    }

    fn slot(&mut self, value: ValueId) -> u32 {
        if let Some(&slot) = self.slots.get(&value) {
            return slot;
        }
        let slot = self.next_slot;
        self.next_slot += self.ty(value).width() as u32;
        self.slots.insert(value, slot);
        slot
    }

    fn load(&mut self, values: &[ValueId]) {
        let depth: usize = values.iter().map(|v| self.ty(*v).width()).sum();
        self.max_stack = self.max_stack.max(depth as u32);
        for &value in values {
            let slot = self.slot(value);
            let ty = self.ty(value);
            self.out.push(StackInstruction::Load { slot, ty });
        }
    }

    fn store(&mut self, value: ValueId, used: bool) {
        let ty = self.ty(value);
        self.max_stack = self.max_stack.max(ty.width() as u32);
        if used {
            let slot = self.slot(value);
            self.out.push(StackInstruction::Store { slot, ty });
        } else {
            self.out.push(StackInstruction::Pop { wide: ty.is_wide() });
        }
    }
}

impl StackCode {
    /// Lowers SSA code to operand-stack form.
    ///
    /// Every value gets its own local slot; arguments keep the slots of the
    /// calling convention. Critical edges are split on a private copy so phi
    /// copies can be placed at the end of predecessors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownMethod`] if the method is not registered.
    pub fn lower(code: &IrCode, program: &Program) -> Result<Self> {
        let declaration = program.method(code.method)?;
        let mut code = code.clone();
        code.split_critical_edges();

        let uses = code.uses();
        let order = code.trace_blocks();
        let argument_types = declaration.argument_types();

        let mut lowering = Lowering {
            code: &code,
            slots: HashMap::new(),
            next_slot: 0,
            max_stack: 0,
            out: Vec::new(),
        };

        let mut argument_slots = Vec::with_capacity(argument_types.len());
        for ty in &argument_types {
            argument_slots.push(lowering.next_slot);
            lowering.next_slot += ty.width() as u32;
        }
        for (_, _, instr) in code.instructions() {
            if let (Op::Argument { index }, Some(dest)) = (&instr.op, instr.dest) {
                if let Some(&slot) = argument_slots.get(usize::from(*index)) {
                    lowering.slots.insert(dest, slot);
                }
            }
        }

        let mut blocks = Vec::with_capacity(order.len());
        for (position, &id) in order.iter().enumerate() {
            let Some(block) = code.block(id) else {
                continue;
            };
            let next = order.get(position + 1).copied();

            for instr in &block.instructions {
                if instr.op.is_terminator() {
                    lower_phi_copies(&mut lowering, id, &instr.op.successors());
                }
                let used = instr.dest.is_some_and(|d| !uses.is_unused(d));
                lower_instruction(&mut lowering, &instr.op, instr.dest, used, next);
            }

            blocks.push(StackBlock {
                label: id,
                instructions: std::mem::take(&mut lowering.out),
            });
        }

        Ok(Self {
            method: code.method,
            max_locals: lowering.next_slot,
            max_stack: lowering.max_stack,
            blocks,
        })
    }

    /// All instructions in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &StackInstruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Methods invoked by this body, in first-occurrence order.
    #[must_use]
    pub fn invoked_methods(&self) -> Vec<MethodId> {
        let mut methods = Vec::new();
        for instr in self.instructions() {
            if let StackInstruction::Invoke { method, .. } = instr {
                if !methods.contains(method) {
                    methods.push(*method);
                }
            }
        }
        methods
    }
}

/// Loads all incoming phi operands, then stores them in reverse so the copies
/// behave as one parallel assignment.
fn lower_phi_copies(lowering: &mut Lowering<'_>, from: BlockId, successors: &[BlockId]) {
    let code = lowering.code;
    let mut dests = Vec::new();
    let mut operands = Vec::new();
    for &successor in successors {
        let Some(block) = code.block(successor) else {
            continue;
        };
        for phi in &block.phis {
            if let Some(value) = phi.operand_for(from) {
                if value != phi.dest {
                    operands.push(value);
                    dests.push(phi.dest);
                }
            }
        }
    }
    lowering.load(&operands);
    for &dest in dests.iter().rev() {
        let slot = lowering.slot(dest);
        let ty = lowering.ty(dest);
        lowering.out.push(StackInstruction::Store { slot, ty });
    }
}

fn lower_instruction(
    lowering: &mut Lowering<'_>,
    op: &Op,
    dest: Option<ValueId>,
    used: bool,
    next: Option<BlockId>,
) {
    let simple = match op {
        Op::Argument { .. }
        | Op::DebugPosition
        | Op::AlwaysMaterializingDefinition
        | Op::AlwaysMaterializingUser { .. } => return,
        Op::Const(constant) => Some(StackInstruction::Const(constant.clone())),
        Op::Binary { op, ty, .. } => Some(StackInstruction::Binary { op: *op, ty: *ty }),
        Op::Unary { op, ty, .. } => Some(StackInstruction::Unary { op: *op, ty: *ty }),
        Op::Cmp { .. } => Some(StackInstruction::Cmp),
        Op::Convert { from, to, .. } => Some(StackInstruction::Convert {
            from: *from,
            to: *to,
        }),
        Op::Move { .. } | Op::NonNull { .. } => None,
        Op::NewInstance { class } => Some(StackInstruction::New(*class)),
        Op::NewArray { .. } => Some(StackInstruction::NewArray),
        Op::ArrayLength { .. } => Some(StackInstruction::ArrayLength),
        Op::ArrayGet { .. } => Some(StackInstruction::ArrayLoad),
        Op::ArrayPut { .. } => Some(StackInstruction::ArrayStore),
        Op::InstanceGet { field, .. } => Some(StackInstruction::GetField(*field)),
        Op::InstancePut { field, .. } => Some(StackInstruction::PutField(*field)),
        Op::StaticGet { field } => Some(StackInstruction::GetStatic(*field)),
        Op::StaticPut { field, .. } => Some(StackInstruction::PutStatic(*field)),
        Op::Invoke { kind, method, .. } => Some(StackInstruction::Invoke {
            kind: *kind,
            method: *method,
        }),
        Op::CheckCast { class, .. } => Some(StackInstruction::CheckCast(*class)),
        Op::InstanceOf { class, .. } => Some(StackInstruction::InstanceOf(*class)),
        Op::NullCheck { .. } => Some(StackInstruction::NullCheck),
        Op::Goto { target } => {
            if Some(*target) != next {
                lowering.out.push(StackInstruction::Goto(*target));
            }
            return;
        }
        Op::If {
            cond,
            left,
            right,
            then_target,
            else_target,
        } => {
            let operands: Vec<ValueId> = std::iter::once(*left).chain(*right).collect();
            lowering.load(&operands);
            lowering.out.push(StackInstruction::If {
                cond: *cond,
                zero: right.is_none(),
                target: *then_target,
            });
            if Some(*else_target) != next {
                lowering.out.push(StackInstruction::Goto(*else_target));
            }
            return;
        }
        Op::Switch {
            value,
            keys,
            targets,
            default,
        } => {
            lowering.load(&[*value]);
            lowering.out.push(StackInstruction::Switch {
                keys: keys.clone(),
                targets: targets.clone(),
            });
            if Some(*default) != next {
                lowering.out.push(StackInstruction::Goto(*default));
            }
            return;
        }
        Op::Return { value } => {
            lowering.load(value.as_slice());
            let ty = value.map(|v| lowering.ty(v));
            lowering.out.push(StackInstruction::Return(ty));
            return;
        }
        Op::Throw { .. } => Some(StackInstruction::Throw),
    };

    lowering.load(&op.uses());
    if let Some(instruction) = simple {
        lowering.out.push(instruction);
    }
    if let Some(dest) = dest {
        lowering.store(dest, used);
    }
}

impl fmt::Display for StackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: max_locals={} max_stack={}",
            self.method, self.max_locals, self.max_stack
        )?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for instr in &block.instructions {
                writeln!(f, "  {instr:?}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ir::IrBuilder,
        program::{Class, Method, MethodFlags},
    };

    #[test]
    fn test_lower_static_add() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Math"));
        let method = program.add_method(
            Method::new(class, "add", vec![ValueType::Int, ValueType::Int], Some(ValueType::Int))
                .with_flags(MethodFlags::STATIC),
        );

        let mut b = IrBuilder::new(method);
        let x = b.argument(ValueType::Int);
        let y = b.argument(ValueType::Int);
        let sum = b.binary(BinaryOp::Add, x, y);
        b.ret(Some(sum));
        let code = b.finish();

        let stack = StackCode::lower(&code, &program).unwrap();
        assert_eq!(stack.max_stack, 2);
        assert_eq!(stack.max_locals, 3);
        assert_eq!(
            stack.blocks[0].instructions,
            vec![
                StackInstruction::Load { slot: 0, ty: ValueType::Int },
                StackInstruction::Load { slot: 1, ty: ValueType::Int },
                StackInstruction::Binary { op: BinaryOp::Add, ty: NumericType::Int },
                StackInstruction::Store { slot: 2, ty: ValueType::Int },
                StackInstruction::Load { slot: 2, ty: ValueType::Int },
                StackInstruction::Return(Some(ValueType::Int)),
            ]
        );
    }

    #[test]
    fn test_phi_copies_and_wide_arguments() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Pick"));
        let method = program.add_method(
            Method::new(class, "pick", vec![ValueType::Long], Some(ValueType::Long)),
        );

        let mut b = IrBuilder::new(method);
        let _this = b.receiver(class);
        let wide = b.argument(ValueType::Long);
        let zero = b.const_long(0);
        let then_block = b.new_block();
        let else_block = b.new_block();
        let join = b.new_block();
        let cmp = b.cmp(wide, zero);
        b.if_zero(IfCond::Eq, cmp, then_block, else_block);
        b.switch_to(then_block);
        b.goto(join);
        b.switch_to(else_block);
        b.goto(join);
        b.switch_to(join);
        let merged = b.phi(ValueType::Long, &[(then_block, zero), (else_block, wide)]);
        b.ret(Some(merged));
        let code = b.finish();

        let stack = StackCode::lower(&code, &program).unwrap();
        // receiver, one wide argument, then locals
        assert!(stack.max_locals >= 3 + 2);
        assert_eq!(stack.max_stack, 4);
        let stores = stack
            .instructions()
            .filter(|i| matches!(i, StackInstruction::Store { ty: ValueType::Long, .. }))
            .count();
        assert!(stores >= 2);
        assert!(stack.invoked_methods().is_empty());
    }
}
