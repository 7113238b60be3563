//! Fluent construction of SSA code.
//!
//! Front ends (and tests) use [`IrBuilder`] to produce [`IrCode`] without
//! dealing with arenas directly. The builder appends to a current block;
//! terminators do not switch blocks automatically.
//!
//! # Examples
//!
//! ```rust,ignore
//! use bytescope::ir::{BinaryOp, IrBuilder, ValueType};
//!
//! let mut b = IrBuilder::new(method);
//! let x = b.argument(ValueType::Int);
//! let one = b.const_int(1);
//! let sum = b.binary(BinaryOp::Add, x, one);
//! b.ret(Some(sum));
//! let code = b.finish();
//! ```

use std::sync::Arc;

use crate::{
    ir::{
        BinaryOp, BlockId, Constant, IfCond, Instruction, IrCode, InvokeKind, Nullability,
        NumericType, Op, Phi, PhiOperand, Position, UnaryOp, ValueData, ValueId, ValueType,
    },
    program::{ClassId, FieldId, MethodId},
};

/// Incremental builder for [`IrCode`].
#[derive(Debug)]
pub struct IrBuilder {
    code: IrCode,
    current: BlockId,
    line: u32,
    next_argument: u16,
}

impl IrBuilder {
    /// Starts building code for `method`, positioned in the entry block.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        let code = IrCode::new(method);
        let current = code.entry;
        Self {
            code,
            current,
            line: 0,
            next_argument: 0,
        }
    }

    /// Sets the source line attached to subsequently emitted instructions.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// The block instructions are currently appended to.
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Creates a new empty block without switching to it.
    pub fn new_block(&mut self) -> BlockId {
        self.code.add_block()
    }

    /// Continues appending to `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.code.method)
    }

    /// Appends `op`, defining a fresh value described by `data` if given.
    pub fn emit(&mut self, op: Op, data: Option<ValueData>) -> Option<ValueId> {
        let dest = data.map(|data| self.code.new_value(data));
        let instr = Instruction::new(op, dest).at(self.position());
        let current = self.current;
        if let Some(block) = self.code.block_mut(current) {
            block.instructions.push(instr);
        }
        dest
    }

    fn emit_value(&mut self, op: Op, data: ValueData) -> ValueId {
        let dest = self.code.new_value(data);
        let instr = Instruction::new(op, Some(dest)).at(self.position());
        let current = self.current;
        if let Some(block) = self.code.block_mut(current) {
            block.instructions.push(instr);
        }
        dest
    }

    /// Declares the next incoming argument.
    pub fn argument(&mut self, ty: ValueType) -> ValueId {
        let index = self.next_argument;
        self.next_argument += 1;
        self.emit_value(Op::Argument { index }, ValueData::new(ty))
    }

    /// Declares the receiver of an instance method; it is known to be non-null.
    pub fn receiver(&mut self, class: ClassId) -> ValueId {
        let index = self.next_argument;
        self.next_argument += 1;
        self.emit_value(
            Op::Argument { index },
            ValueData::new(ValueType::Reference)
                .with_nullability(Nullability::NotNull)
                .with_class(Some(class)),
        )
    }

    /// Declares a reference argument of a known class.
    pub fn reference_argument(&mut self, class: Option<ClassId>) -> ValueId {
        let index = self.next_argument;
        self.next_argument += 1;
        self.emit_value(
            Op::Argument { index },
            ValueData::new(ValueType::Reference).with_class(class),
        )
    }

    /// Materializes a constant.
    pub fn constant(&mut self, constant: Constant) -> ValueId {
        let data = ValueData::new(constant.ty()).with_nullability(constant.nullability());
        self.emit_value(Op::Const(constant), data)
    }

    /// Materializes an int constant.
    pub fn const_int(&mut self, value: i32) -> ValueId {
        self.constant(Constant::Int(value))
    }

    /// Materializes a long constant.
    pub fn const_long(&mut self, value: i64) -> ValueId {
        self.constant(Constant::Long(value))
    }

    /// Materializes `null`.
    pub fn const_null(&mut self) -> ValueId {
        self.constant(Constant::Null)
    }

    /// Materializes a string literal.
    pub fn const_string(&mut self, value: &str) -> ValueId {
        self.constant(Constant::String(Arc::from(value)))
    }

    /// Emits arithmetic whose width is taken from `left`.
    pub fn binary(&mut self, op: BinaryOp, left: ValueId, right: ValueId) -> ValueId {
        let ty = NumericType::of(self.code.value(left).ty).unwrap_or(NumericType::Int);
        self.emit_value(
            Op::Binary {
                op,
                ty,
                left,
                right,
            },
            ValueData::new(ty.value_type()),
        )
    }

    /// Emits a unary operation whose width is taken from `operand`.
    pub fn unary(&mut self, op: UnaryOp, operand: ValueId) -> ValueId {
        let ty = NumericType::of(self.code.value(operand).ty).unwrap_or(NumericType::Int);
        self.emit_value(Op::Unary { op, ty, operand }, ValueData::new(ty.value_type()))
    }

    /// Emits a long three-way compare.
    pub fn cmp(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.emit_value(Op::Cmp { left, right }, ValueData::new(ValueType::Int))
    }

    /// Emits a numeric conversion.
    pub fn convert(&mut self, to: NumericType, operand: ValueId) -> ValueId {
        let from = NumericType::of(self.code.value(operand).ty).unwrap_or(NumericType::Int);
        self.emit_value(
            Op::Convert { from, to, operand },
            ValueData::new(to.value_type()),
        )
    }

    /// Allocates an instance of `class`.
    pub fn new_instance(&mut self, class: ClassId) -> ValueId {
        self.emit_value(
            Op::NewInstance { class },
            ValueData::new(ValueType::Reference)
                .with_nullability(Nullability::NotNull)
                .with_class(Some(class)),
        )
    }

    /// Allocates an array.
    pub fn new_array(&mut self, size: ValueId) -> ValueId {
        self.emit_value(
            Op::NewArray { size },
            ValueData::new(ValueType::Reference).with_nullability(Nullability::NotNull),
        )
    }

    /// Reads an array length.
    pub fn array_length(&mut self, array: ValueId) -> ValueId {
        self.emit_value(Op::ArrayLength { array }, ValueData::new(ValueType::Int))
    }

    /// Reads an array element of type `ty`.
    pub fn array_get(&mut self, array: ValueId, index: ValueId, ty: ValueType) -> ValueId {
        self.emit_value(Op::ArrayGet { array, index }, ValueData::new(ty))
    }

    /// Writes an array element.
    pub fn array_put(&mut self, array: ValueId, index: ValueId, value: ValueId) {
        self.emit(
            Op::ArrayPut {
                array,
                index,
                value,
            },
            None,
        );
    }

    /// Reads an instance field of type `ty`.
    pub fn instance_get(&mut self, field: FieldId, object: ValueId, ty: ValueType) -> ValueId {
        self.emit_value(Op::InstanceGet { field, object }, ValueData::new(ty))
    }

    /// Writes an instance field.
    pub fn instance_put(&mut self, field: FieldId, object: ValueId, value: ValueId) {
        self.emit(
            Op::InstancePut {
                field,
                object,
                value,
            },
            None,
        );
    }

    /// Reads a static field of type `ty`.
    pub fn static_get(&mut self, field: FieldId, ty: ValueType) -> ValueId {
        self.emit_value(Op::StaticGet { field }, ValueData::new(ty))
    }

    /// Writes a static field.
    pub fn static_put(&mut self, field: FieldId, value: ValueId) {
        self.emit(Op::StaticPut { field, value }, None);
    }

    /// Emits a call; `ret` is the callee's return type.
    pub fn invoke(
        &mut self,
        kind: InvokeKind,
        method: MethodId,
        args: &[ValueId],
        ret: Option<ValueType>,
    ) -> Option<ValueId> {
        self.emit(
            Op::Invoke {
                kind,
                method,
                args: args.to_vec(),
            },
            ret.map(ValueData::new),
        )
    }

    /// Emits a checked cast.
    pub fn check_cast(&mut self, value: ValueId, class: ClassId) -> ValueId {
        let nullability = self.code.value(value).nullability;
        self.emit_value(
            Op::CheckCast { value, class },
            ValueData::new(ValueType::Reference)
                .with_nullability(nullability)
                .with_class(Some(class)),
        )
    }

    /// Emits a type test.
    pub fn instance_of(&mut self, value: ValueId, class: ClassId) -> ValueId {
        self.emit_value(Op::InstanceOf { value, class }, ValueData::new(ValueType::Int))
    }

    /// Emits an explicit null check.
    pub fn null_check(&mut self, value: ValueId) {
        self.emit(Op::NullCheck { value }, None);
    }

    /// Emits a source-position marker.
    pub fn debug_position(&mut self) {
        self.emit(Op::DebugPosition, None);
    }

    /// Attaches a local variable name to `value`.
    pub fn named(&mut self, value: ValueId, name: &str) -> ValueId {
        if let Some(data) = self.code.value_mut(value) {
            data.local = Some(Arc::from(name));
        }
        value
    }

    /// Adds a phi to the current block.
    pub fn phi(&mut self, ty: ValueType, operands: &[(BlockId, ValueId)]) -> ValueId {
        let dest = self.code.new_value(ValueData::new(ty));
        let phi = Phi {
            dest,
            operands: operands
                .iter()
                .map(|&(predecessor, value)| PhiOperand { value, predecessor })
                .collect(),
        };
        let current = self.current;
        if let Some(block) = self.code.block_mut(current) {
            block.phis.push(phi);
        }
        dest
    }

    /// Ends the current block with a jump.
    pub fn goto(&mut self, target: BlockId) {
        self.emit(Op::Goto { target }, None);
    }

    /// Ends the current block with a compare-against-zero branch.
    pub fn if_zero(&mut self, cond: IfCond, value: ValueId, then_target: BlockId, else_target: BlockId) {
        self.emit(
            Op::If {
                cond,
                left: value,
                right: None,
                then_target,
                else_target,
            },
            None,
        );
    }

    /// Ends the current block with a two-operand branch.
    pub fn if_cmp(
        &mut self,
        cond: IfCond,
        left: ValueId,
        right: ValueId,
        then_target: BlockId,
        else_target: BlockId,
    ) {
        self.emit(
            Op::If {
                cond,
                left,
                right: Some(right),
                then_target,
                else_target,
            },
            None,
        );
    }

    /// Ends the current block with a multi-way branch.
    pub fn switch(&mut self, value: ValueId, cases: &[(i32, BlockId)], default: BlockId) {
        self.emit(
            Op::Switch {
                value,
                keys: cases.iter().map(|&(key, _)| key).collect(),
                targets: cases.iter().map(|&(_, target)| target).collect(),
                default,
            },
            None,
        );
    }

    /// Ends the current block with a return.
    pub fn ret(&mut self, value: Option<ValueId>) {
        self.emit(Op::Return { value }, None);
    }

    /// Ends the current block with a throw.
    pub fn throw(&mut self, exception: ValueId) {
        self.emit(Op::Throw { exception }, None);
    }

    /// Finishes construction.
    #[must_use]
    pub fn finish(self) -> IrCode {
        self.code
    }
}
