//! The closed instruction set of the IR.
//!
//! Every pass is written as a `match` over [`Op`], so adding a variant makes
//! the compiler point at every place that has to learn about it. The helpers
//! on [`Op`] (`uses`, `for_each_use_mut`, `successors`, `has_side_effects`,
//! `may_throw`) are the only generic view passes need for def/use and CFG
//! bookkeeping.

use std::{fmt, sync::Arc};

use crate::{
    ir::{BlockId, Constant, ValueId, ValueType},
    program::{ClassId, FieldId, MethodId},
};

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division; throws on a zero divisor.
    Div,
    /// Remainder; throws on a zero divisor.
    Rem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Left shift.
    Shl,
    /// Arithmetic right shift.
    Shr,
    /// Logical right shift.
    Ushr,
}

impl BinaryOp {
    /// Returns true if `a op b == b op a`.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor)
    }

    /// Returns true if the operation throws `ArithmeticException` on a zero divisor.
    #[must_use]
    pub const fn is_division(self) -> bool {
        matches!(self, Self::Div | Self::Rem)
    }

    /// Folds the operation on 32-bit operands with JVM semantics.
    ///
    /// Returns `None` when folding would throw (division by zero).
    #[must_use]
    pub fn fold_int(self, a: i32, b: i32) -> Option<i32> {
        Some(match self {
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::Mul => a.wrapping_mul(b),
            Self::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            Self::Rem => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            Self::And => a & b,
            Self::Or => a | b,
            Self::Xor => a ^ b,
            Self::Shl => a.wrapping_shl((b & 0x1f) as u32),
            Self::Shr => a.wrapping_shr((b & 0x1f) as u32),
            Self::Ushr => ((a as u32) >> ((b & 0x1f) as u32)) as i32,
        })
    }

    /// Folds the operation on 64-bit operands with JVM semantics.
    ///
    /// Shift distances are taken from the low six bits of `b`. Returns `None`
    /// when folding would throw.
    #[must_use]
    pub fn fold_long(self, a: i64, b: i64) -> Option<i64> {
        Some(match self {
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::Mul => a.wrapping_mul(b),
            Self::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            Self::Rem => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            Self::And => a & b,
            Self::Or => a | b,
            Self::Xor => a ^ b,
            Self::Shl => a.wrapping_shl((b & 0x3f) as u32),
            Self::Shr => a.wrapping_shr((b & 0x3f) as u32),
            Self::Ushr => ((a as u64) >> ((b & 0x3f) as u32)) as i64,
        })
    }
}

/// Single-operand arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Not,
}

/// Operand width of arithmetic instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum NumericType {
    /// 32-bit integer arithmetic.
    Int,
    /// 64-bit integer arithmetic.
    Long,
}

impl NumericType {
    /// The value type produced by arithmetic of this width.
    #[must_use]
    pub const fn value_type(self) -> ValueType {
        match self {
            Self::Int => ValueType::Int,
            Self::Long => ValueType::Long,
        }
    }

    /// The numeric width of a value type, if it is numeric.
    #[must_use]
    pub const fn of(ty: ValueType) -> Option<Self> {
        match ty {
            ValueType::Int => Some(Self::Int),
            ValueType::Long => Some(Self::Long),
            ValueType::Reference => None,
        }
    }
}

/// Condition of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum IfCond {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Greater or equal.
    Ge,
    /// Greater than.
    Gt,
    /// Less or equal.
    Le,
}

impl IfCond {
    /// Evaluates the condition on two numeric operands.
    #[must_use]
    pub const fn evaluate(self, a: i64, b: i64) -> bool {
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Lt => a < b,
            Self::Ge => a >= b,
            Self::Gt => a > b,
            Self::Le => a <= b,
        }
    }

    /// The condition that holds exactly when this one does not.
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
        }
    }

    /// Result of comparing a value with itself.
    #[must_use]
    pub const fn reflexive(self) -> bool {
        matches!(self, Self::Eq | Self::Ge | Self::Le)
    }
}

/// Dispatch kind of a method invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InvokeKind {
    /// Static call, no receiver.
    Static,
    /// Virtual dispatch on a class receiver.
    Virtual,
    /// Interface dispatch.
    Interface,
    /// Non-virtual call of a private method or constructor.
    Direct,
    /// Non-virtual call of a superclass implementation.
    Super,
}

impl InvokeKind {
    /// Returns true if the first argument is a receiver.
    #[must_use]
    pub const fn has_receiver(self) -> bool {
        !matches!(self, Self::Static)
    }

    /// Returns true if the target depends on the receiver's runtime class.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::Virtual | Self::Interface)
    }
}

/// Source position of an instruction, including the chain of inline frames.
///
/// When a callee body is inlined, each of its instructions keeps its own
/// position and gains the call site as (outermost) caller, so stack traces
/// can be reconstructed after optimization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Position {
    /// Source line, `0` when unknown.
    pub line: u32,
    /// Method the line belongs to, `None` for synthetic positions.
    pub method: Option<MethodId>,
    /// Position of the call site this instruction was inlined into.
    pub caller: Option<Arc<Position>>,
}

impl Position {
    /// A position carrying no information.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A position at `line` of `method`.
    #[must_use]
    pub fn new(line: u32, method: MethodId) -> Self {
        Self {
            line,
            method: Some(method),
            caller: None,
        }
    }

    /// Returns true if the position has no method and no caller.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.method.is_none() && self.caller.is_none()
    }

    /// Appends `call_site` as the outermost frame of this position.
    #[must_use]
    pub fn with_outermost_caller(&self, call_site: &Position) -> Position {
        let caller = match &self.caller {
            Some(inner) => inner.with_outermost_caller(call_site),
            None => call_site.clone(),
        };
        Position {
            line: self.line,
            method: self.method,
            caller: Some(Arc::new(caller)),
        }
    }

    /// Number of inline frames above this position.
    #[must_use]
    pub fn inline_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.caller.as_deref();
        while let Some(frame) = current {
            depth += 1;
            current = frame.caller.as_deref();
        }
        depth
    }

    /// Returns true if `method` appears anywhere in the frame chain.
    #[must_use]
    pub fn has_frame(&self, method: MethodId) -> bool {
        let mut current = Some(self);
        while let Some(frame) = current {
            if frame.method == Some(method) {
                return true;
            }
            current = frame.caller.as_deref();
        }
        false
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            Some(method) => write!(f, "{method}:{}", self.line)?,
            None => f.write_str("<none>")?,
        }
        if let Some(caller) = &self.caller {
            write!(f, " <- {caller}")?;
        }
        Ok(())
    }
}

/// One IR operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    /// Incoming method argument `index` (receiver is index 0 for instance methods).
    Argument {
        /// Argument position.
        index: u16,
    },
    /// Materializes a constant.
    Const(Constant),
    /// Two-operand arithmetic.
    Binary {
        /// The operation.
        op: BinaryOp,
        /// Operand width.
        ty: NumericType,
        /// Left operand.
        left: ValueId,
        /// Right operand.
        right: ValueId,
    },
    /// One-operand arithmetic.
    Unary {
        /// The operation.
        op: UnaryOp,
        /// Operand width.
        ty: NumericType,
        /// The operand.
        operand: ValueId,
    },
    /// Three-way compare of two longs producing -1, 0 or 1.
    Cmp {
        /// Left operand.
        left: ValueId,
        /// Right operand.
        right: ValueId,
    },
    /// Numeric conversion.
    Convert {
        /// Source width.
        from: NumericType,
        /// Destination width.
        to: NumericType,
        /// The operand.
        operand: ValueId,
    },
    /// Copies a value; only present outside SSA or for debug locals.
    Move {
        /// The copied value.
        src: ValueId,
    },
    /// Allocates an uninitialized instance.
    NewInstance {
        /// The allocated class.
        class: ClassId,
    },
    /// Allocates an array.
    NewArray {
        /// Element count.
        size: ValueId,
    },
    /// Reads the length of an array.
    ArrayLength {
        /// The array.
        array: ValueId,
    },
    /// Reads an array element.
    ArrayGet {
        /// The array.
        array: ValueId,
        /// The element index.
        index: ValueId,
    },
    /// Writes an array element.
    ArrayPut {
        /// The array.
        array: ValueId,
        /// The element index.
        index: ValueId,
        /// The stored value.
        value: ValueId,
    },
    /// Reads an instance field.
    InstanceGet {
        /// The field.
        field: FieldId,
        /// The receiver object.
        object: ValueId,
    },
    /// Writes an instance field.
    InstancePut {
        /// The field.
        field: FieldId,
        /// The receiver object.
        object: ValueId,
        /// The stored value.
        value: ValueId,
    },
    /// Reads a static field.
    StaticGet {
        /// The field.
        field: FieldId,
    },
    /// Writes a static field.
    StaticPut {
        /// The field.
        field: FieldId,
        /// The stored value.
        value: ValueId,
    },
    /// Calls a method.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Referenced method.
        method: MethodId,
        /// Arguments, receiver first for instance calls.
        args: Vec<ValueId>,
    },
    /// Checked reference cast; the result aliases the operand.
    CheckCast {
        /// The cast value.
        value: ValueId,
        /// Target class.
        class: ClassId,
    },
    /// Type test producing 0 or 1.
    InstanceOf {
        /// The tested value.
        value: ValueId,
        /// The tested class.
        class: ClassId,
    },
    /// Throws `NullPointerException` if the operand is null.
    NullCheck {
        /// The checked value.
        value: ValueId,
    },
    /// Marks its result as a non-null alias of the operand.
    NonNull {
        /// The aliased value.
        value: ValueId,
    },
    /// Carries a source position without computing anything.
    DebugPosition,
    /// Defines a value that is forced into a register (runtime workaround).
    AlwaysMaterializingDefinition,
    /// Keeps a materializing definition alive (runtime workaround).
    AlwaysMaterializingUser {
        /// The kept value.
        value: ValueId,
    },
    /// Unconditional jump.
    Goto {
        /// Jump target.
        target: BlockId,
    },
    /// Conditional jump; `right == None` compares against zero / null.
    If {
        /// Condition.
        cond: IfCond,
        /// Left operand.
        left: ValueId,
        /// Right operand, absent for zero tests.
        right: Option<ValueId>,
        /// Target taken when the condition holds.
        then_target: BlockId,
        /// Fallthrough target.
        else_target: BlockId,
    },
    /// Multi-way jump on an integer key.
    Switch {
        /// The key.
        value: ValueId,
        /// Case keys, parallel to `targets`.
        keys: Vec<i32>,
        /// Case targets.
        targets: Vec<BlockId>,
        /// Target when no key matches.
        default: BlockId,
    },
    /// Returns from the method.
    Return {
        /// The returned value, absent for void methods.
        value: Option<ValueId>,
    },
    /// Throws an exception.
    Throw {
        /// The thrown value.
        exception: ValueId,
    },
}

impl Op {
    /// Values read by this operation, in operand order.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Self::Argument { .. }
            | Self::Const(_)
            | Self::NewInstance { .. }
            | Self::StaticGet { .. }
            | Self::DebugPosition
            | Self::AlwaysMaterializingDefinition
            | Self::Goto { .. } => Vec::new(),
            Self::Binary { left, right, .. } | Self::Cmp { left, right } => vec![*left, *right],
            Self::Unary { operand, .. } | Self::Convert { operand, .. } => vec![*operand],
            Self::Move { src } => vec![*src],
            Self::NewArray { size } => vec![*size],
            Self::ArrayLength { array } => vec![*array],
            Self::ArrayGet { array, index } => vec![*array, *index],
            Self::ArrayPut {
                array,
                index,
                value,
            } => vec![*array, *index, *value],
            Self::InstanceGet { object, .. } => vec![*object],
            Self::InstancePut { object, value, .. } => vec![*object, *value],
            Self::StaticPut { value, .. } => vec![*value],
            Self::Invoke { args, .. } => args.clone(),
            Self::CheckCast { value, .. }
            | Self::InstanceOf { value, .. }
            | Self::NullCheck { value }
            | Self::NonNull { value }
            | Self::AlwaysMaterializingUser { value } => vec![*value],
            Self::If { left, right, .. } => match right {
                Some(right) => vec![*left, *right],
                None => vec![*left],
            },
            Self::Switch { value, .. } => vec![*value],
            Self::Return { value } => value.iter().copied().collect(),
            Self::Throw { exception } => vec![*exception],
        }
    }

    /// Calls `f` on every operand slot, allowing operands to be rewritten.
    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            Self::Argument { .. }
            | Self::Const(_)
            | Self::NewInstance { .. }
            | Self::StaticGet { .. }
            | Self::DebugPosition
            | Self::AlwaysMaterializingDefinition
            | Self::Goto { .. } => {}
            Self::Binary { left, right, .. } | Self::Cmp { left, right } => {
                f(left);
                f(right);
            }
            Self::Unary { operand, .. } | Self::Convert { operand, .. } => f(operand),
            Self::Move { src } => f(src),
            Self::NewArray { size } => f(size),
            Self::ArrayLength { array } => f(array),
            Self::ArrayGet { array, index } => {
                f(array);
                f(index);
            }
            Self::ArrayPut {
                array,
                index,
                value,
            } => {
                f(array);
                f(index);
                f(value);
            }
            Self::InstanceGet { object, .. } => f(object),
            Self::InstancePut { object, value, .. } => {
                f(object);
                f(value);
            }
            Self::StaticPut { value, .. } => f(value),
            Self::Invoke { args, .. } => args.iter_mut().for_each(f),
            Self::CheckCast { value, .. }
            | Self::InstanceOf { value, .. }
            | Self::NullCheck { value }
            | Self::NonNull { value }
            | Self::AlwaysMaterializingUser { value } => f(value),
            Self::If { left, right, .. } => {
                f(left);
                if let Some(right) = right {
                    f(right);
                }
            }
            Self::Switch { value, .. } => f(value),
            Self::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Self::Throw { exception } => f(exception),
        }
    }

    /// Replaces every operand equal to `old` with `new`; returns true if any changed.
    pub fn replace_use(&mut self, old: ValueId, new: ValueId) -> bool {
        let mut changed = false;
        self.for_each_use_mut(|operand| {
            if *operand == old {
                *operand = new;
                changed = true;
            }
        });
        changed
    }

    /// Returns true if this operation ends a basic block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Goto { .. }
                | Self::If { .. }
                | Self::Switch { .. }
                | Self::Return { .. }
                | Self::Throw { .. }
        )
    }

    /// Control-flow successors of a terminator, without duplicates.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        let mut result = Vec::new();
        let mut push = |block: BlockId| {
            if !result.contains(&block) {
                result.push(block);
            }
        };
        match self {
            Self::Goto { target } => push(*target),
            Self::If {
                then_target,
                else_target,
                ..
            } => {
                push(*then_target);
                push(*else_target);
            }
            Self::Switch {
                targets, default, ..
            } => {
                for target in targets {
                    push(*target);
                }
                push(*default);
            }
            _ => {}
        }
        result
    }

    /// Calls `f` on every jump target slot.
    pub fn for_each_target_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            Self::Goto { target } => f(target),
            Self::If {
                then_target,
                else_target,
                ..
            } => {
                f(then_target);
                f(else_target);
            }
            Self::Switch {
                targets, default, ..
            } => {
                targets.iter_mut().for_each(&mut f);
                f(default);
            }
            _ => {}
        }
    }

    /// Redirects every jump to `old` towards `new`.
    pub fn replace_target(&mut self, old: BlockId, new: BlockId) {
        self.for_each_target_mut(|target| {
            if *target == old {
                *target = new;
            }
        });
    }

    /// Returns true if the operation has an effect besides computing its result.
    ///
    /// Such instructions must stay even when their result is unused.
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Self::ArrayPut { .. }
                | Self::InstancePut { .. }
                | Self::StaticPut { .. }
                | Self::Invoke { .. }
                | Self::NullCheck { .. }
                | Self::AlwaysMaterializingDefinition
                | Self::AlwaysMaterializingUser { .. }
                | Self::DebugPosition
        ) || self.is_terminator()
    }

    /// Returns true if the operation may throw, ignoring facts about operands.
    ///
    /// Passes that know more (non-null receivers, non-zero divisors) refine
    /// this answer themselves.
    #[must_use]
    pub const fn may_throw(&self) -> bool {
        match self {
            Self::Binary { op, .. } => op.is_division(),
            Self::NewArray { .. }
            | Self::ArrayLength { .. }
            | Self::ArrayGet { .. }
            | Self::ArrayPut { .. }
            | Self::InstanceGet { .. }
            | Self::InstancePut { .. }
            | Self::StaticGet { .. }
            | Self::StaticPut { .. }
            | Self::Invoke { .. }
            | Self::CheckCast { .. }
            | Self::NullCheck { .. }
            | Self::NewInstance { .. }
            | Self::Throw { .. } => true,
            _ => false,
        }
    }

    /// The reference operand this operation dereferences, if any.
    ///
    /// A null value in this slot raises `NullPointerException`.
    #[must_use]
    pub fn dereferenced(&self) -> Option<ValueId> {
        match self {
            Self::ArrayLength { array }
            | Self::ArrayGet { array, .. }
            | Self::ArrayPut { array, .. } => Some(*array),
            Self::InstanceGet { object, .. } | Self::InstancePut { object, .. } => Some(*object),
            Self::Invoke { kind, args, .. } if kind.has_receiver() => args.first().copied(),
            Self::NullCheck { value } => Some(*value),
            _ => None,
        }
    }

    /// Returns true for operations whose result depends only on their operands.
    ///
    /// These are the candidates for value numbering and common subexpression
    /// elimination.
    #[must_use]
    pub const fn is_pure_computation(&self) -> bool {
        matches!(
            self,
            Self::Const(_)
                | Self::Binary { .. }
                | Self::Unary { .. }
                | Self::Cmp { .. }
                | Self::Convert { .. }
                | Self::InstanceOf { .. }
        )
    }

    /// Returns true for debug-only bookkeeping operations.
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        matches!(self, Self::DebugPosition)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &[ValueId]| {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Self::Argument { index } => write!(f, "argument {index}"),
            Self::Const(c) => write!(f, "const {c}"),
            Self::Binary {
                op,
                ty,
                left,
                right,
            } => write!(f, "{op}-{ty} {left}, {right}"),
            Self::Unary { op, ty, operand } => write!(f, "{op}-{ty} {operand}"),
            Self::Cmp { left, right } => write!(f, "cmp-long {left}, {right}"),
            Self::Convert { from, to, operand } => write!(f, "{from}-to-{to} {operand}"),
            Self::Move { src } => write!(f, "move {src}"),
            Self::NewInstance { class } => write!(f, "new-instance {class}"),
            Self::NewArray { size } => write!(f, "new-array {size}"),
            Self::ArrayLength { array } => write!(f, "array-length {array}"),
            Self::ArrayGet { array, index } => write!(f, "aget {array}[{index}]"),
            Self::ArrayPut {
                array,
                index,
                value,
            } => write!(f, "aput {array}[{index}], {value}"),
            Self::InstanceGet { field, object } => write!(f, "iget {object}.{field}"),
            Self::InstancePut {
                field,
                object,
                value,
            } => write!(f, "iput {object}.{field}, {value}"),
            Self::StaticGet { field } => write!(f, "sget {field}"),
            Self::StaticPut { field, value } => write!(f, "sput {field}, {value}"),
            Self::Invoke { kind, method, args } => {
                write!(f, "invoke-{kind} {method}({})", join(args))
            }
            Self::CheckCast { value, class } => write!(f, "check-cast {value}, {class}"),
            Self::InstanceOf { value, class } => write!(f, "instance-of {value}, {class}"),
            Self::NullCheck { value } => write!(f, "null-check {value}"),
            Self::NonNull { value } => write!(f, "non-null {value}"),
            Self::DebugPosition => f.write_str("debug-position"),
            Self::AlwaysMaterializingDefinition => f.write_str("always-materializing-def"),
            Self::AlwaysMaterializingUser { value } => {
                write!(f, "always-materializing-use {value}")
            }
            Self::Goto { target } => write!(f, "goto {target}"),
            Self::If {
                cond,
                left,
                right,
                then_target,
                else_target,
            } => match right {
                Some(right) => write!(
                    f,
                    "if-{cond} {left}, {right} then {then_target} else {else_target}"
                ),
                None => write!(f, "if-{cond}z {left} then {then_target} else {else_target}"),
            },
            Self::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                write!(f, "switch {value} {{")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key} -> {target},")?;
                }
                write!(f, " default -> {default} }}")
            }
            Self::Return { value: Some(value) } => write!(f, "return {value}"),
            Self::Return { value: None } => f.write_str("return-void"),
            Self::Throw { exception } => write!(f, "throw {exception}"),
        }
    }
}

/// An operation together with its output value and source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The operation.
    pub op: Op,
    /// The defined value, if the operation produces one.
    pub dest: Option<ValueId>,
    /// Source position including inline frames.
    pub position: Position,
}

impl Instruction {
    /// Creates an instruction without a source position.
    #[must_use]
    pub fn new(op: Op, dest: Option<ValueId>) -> Self {
        Self {
            op,
            dest,
            position: Position::none(),
        }
    }

    /// Returns a copy of this instruction at `position`.
    #[must_use]
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dest) = self.dest {
            write!(f, "{dest} = ")?;
        }
        write!(f, "{}", self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_int_wraps_and_rejects_zero_division() {
        assert_eq!(BinaryOp::Add.fold_int(i32::MAX, 1), Some(i32::MIN));
        assert_eq!(BinaryOp::Div.fold_int(7, 0), None);
        assert_eq!(BinaryOp::Rem.fold_int(7, 3), Some(1));
        assert_eq!(BinaryOp::Ushr.fold_int(-1, 28), Some(15));
        assert_eq!(BinaryOp::Shl.fold_int(1, 33), Some(2));
    }

    #[test]
    fn test_fold_long() {
        assert_eq!(BinaryOp::Mul.fold_long(1 << 40, 4), Some(1 << 42));
        assert_eq!(BinaryOp::Div.fold_long(i64::MIN, -1), Some(i64::MIN));
        assert_eq!(BinaryOp::Rem.fold_long(1, 0), None);
    }

    #[test]
    fn test_if_cond_inversion() {
        for cond in [
            IfCond::Eq,
            IfCond::Ne,
            IfCond::Lt,
            IfCond::Ge,
            IfCond::Gt,
            IfCond::Le,
        ] {
            assert_eq!(cond.inverted().inverted(), cond);
            assert_ne!(cond.evaluate(3, 5), cond.inverted().evaluate(3, 5));
        }
    }

    #[test]
    fn test_uses_and_replace() {
        let mut op = Op::Binary {
            op: BinaryOp::Add,
            ty: NumericType::Int,
            left: ValueId(1),
            right: ValueId(1),
        };
        assert_eq!(op.uses(), vec![ValueId(1), ValueId(1)]);
        assert!(op.replace_use(ValueId(1), ValueId(4)));
        assert_eq!(op.uses(), vec![ValueId(4), ValueId(4)]);
        assert!(!op.replace_use(ValueId(1), ValueId(5)));
    }

    #[test]
    fn test_successors_are_unique() {
        let op = Op::Switch {
            value: ValueId(0),
            keys: vec![1, 2, 3],
            targets: vec![BlockId(1), BlockId(2), BlockId(1)],
            default: BlockId(2),
        };
        assert_eq!(op.successors(), vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_position_frames() {
        let call_site = Position::new(10, MethodId(1));
        let inner = Position::new(3, MethodId(2)).with_outermost_caller(&call_site);
        assert_eq!(inner.inline_depth(), 1);
        assert!(inner.has_frame(MethodId(1)));
        assert!(inner.has_frame(MethodId(2)));

        let outer = Position::new(20, MethodId(0));
        let nested = inner.with_outermost_caller(&outer);
        assert_eq!(nested.inline_depth(), 2);
        assert_eq!(nested.caller.as_deref().map(|c| c.line), Some(10));
        assert!(nested.has_frame(MethodId(0)));
    }
}
