use std::fmt;

use crate::{
    ir::{BinaryOp, BlockId, Constant, IfCond, InvokeKind, NumericType, Position, UnaryOp, ValueType},
    program::{ClassId, FieldId, MethodId},
};

/// A register slot.
///
/// Wide values occupy the named register and the one above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u32);

impl Register {
    /// The register `offset` slots above this one.
    #[must_use]
    pub const fn offset(self, offset: u32) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// One register-machine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RegisterOp {
    Const {
        dest: Register,
        value: Constant,
    },
    Move {
        dest: Register,
        src: Register,
        ty: ValueType,
    },
    Binary {
        op: BinaryOp,
        ty: NumericType,
        dest: Register,
        left: Register,
        right: Register,
    },
    Unary {
        op: UnaryOp,
        ty: NumericType,
        dest: Register,
        operand: Register,
    },
    Cmp {
        dest: Register,
        left: Register,
        right: Register,
    },
    Convert {
        from: NumericType,
        to: NumericType,
        dest: Register,
        operand: Register,
    },
    NewInstance {
        dest: Register,
        class: ClassId,
    },
    NewArray {
        dest: Register,
        size: Register,
    },
    ArrayLength {
        dest: Register,
        array: Register,
    },
    ArrayGet {
        dest: Register,
        array: Register,
        index: Register,
    },
    ArrayPut {
        array: Register,
        index: Register,
        value: Register,
    },
    InstanceGet {
        dest: Register,
        field: FieldId,
        object: Register,
    },
    InstancePut {
        field: FieldId,
        object: Register,
        value: Register,
    },
    StaticGet {
        dest: Register,
        field: FieldId,
    },
    StaticPut {
        field: FieldId,
        value: Register,
    },
    /// A call; `range` calls read their arguments from one contiguous block
    /// starting at the first argument register.
    Invoke {
        kind: InvokeKind,
        method: MethodId,
        args: Vec<Register>,
        range: bool,
        result: Option<Register>,
    },
    /// Checks the class of `register` in place.
    CheckCast {
        register: Register,
        class: ClassId,
    },
    InstanceOf {
        dest: Register,
        value: Register,
        class: ClassId,
    },
    NullCheck {
        value: Register,
    },
    Goto {
        target: BlockId,
    },
    /// Branches to `target` when the condition holds, falls through otherwise.
    If {
        cond: IfCond,
        left: Register,
        right: Option<Register>,
        target: BlockId,
    },
    /// Jumps to the matching case, falls through otherwise.
    Switch {
        value: Register,
        keys: Vec<i32>,
        targets: Vec<BlockId>,
    },
    Return {
        value: Option<Register>,
    },
    Throw {
        exception: Register,
    },
}

impl RegisterOp {
    /// Returns true if control never continues with the next instruction.
    #[must_use]
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Self::Goto { .. } | Self::Return { .. } | Self::Throw { .. }
        )
    }

    /// Branch targets of this operation, fallthrough excluded.
    #[must_use]
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Self::Goto { target } | Self::If { target, .. } => vec![*target],
            Self::Switch { targets, .. } => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Calls `f` on every branch target.
    pub fn for_each_target_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            Self::Goto { target } | Self::If { target, .. } => f(target),
            Self::Switch { targets, .. } => targets.iter_mut().for_each(f),
            _ => {}
        }
    }

    /// Registers written by this operation, widths included.
    #[must_use]
    pub fn defined_registers(&self, wide: bool) -> Vec<Register> {
        let dest = match self {
            Self::Const { dest, .. }
            | Self::Move { dest, .. }
            | Self::Binary { dest, .. }
            | Self::Unary { dest, .. }
            | Self::Cmp { dest, .. }
            | Self::Convert { dest, .. }
            | Self::NewInstance { dest, .. }
            | Self::NewArray { dest, .. }
            | Self::ArrayLength { dest, .. }
            | Self::ArrayGet { dest, .. }
            | Self::InstanceGet { dest, .. }
            | Self::StaticGet { dest, .. }
            | Self::InstanceOf { dest, .. } => *dest,
            Self::Invoke {
                result: Some(dest), ..
            } => *dest,
            _ => return Vec::new(),
        };
        if wide {
            vec![dest, dest.offset(1)]
        } else {
            vec![dest]
        }
    }
}

impl fmt::Display for RegisterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const { dest, value } => write!(f, "const {dest}, {value}"),
            Self::Move { dest, src, ty } => match ty {
                ValueType::Long => write!(f, "move-wide {dest}, {src}"),
                ValueType::Reference => write!(f, "move-object {dest}, {src}"),
                ValueType::Int => write!(f, "move {dest}, {src}"),
            },
            Self::Binary {
                op,
                ty,
                dest,
                left,
                right,
            } => write!(f, "{op}-{ty} {dest}, {left}, {right}"),
            Self::Unary {
                op,
                ty,
                dest,
                operand,
            } => write!(f, "{op}-{ty} {dest}, {operand}"),
            Self::Cmp { dest, left, right } => write!(f, "cmp-long {dest}, {left}, {right}"),
            Self::Convert {
                from,
                to,
                dest,
                operand,
            } => write!(f, "{from}-to-{to} {dest}, {operand}"),
            Self::NewInstance { dest, class } => write!(f, "new-instance {dest}, {class}"),
            Self::NewArray { dest, size } => write!(f, "new-array {dest}, {size}"),
            Self::ArrayLength { dest, array } => write!(f, "array-length {dest}, {array}"),
            Self::ArrayGet { dest, array, index } => write!(f, "aget {dest}, {array}, {index}"),
            Self::ArrayPut {
                array,
                index,
                value,
            } => write!(f, "aput {value}, {array}, {index}"),
            Self::InstanceGet {
                dest,
                field,
                object,
            } => write!(f, "iget {dest}, {object}, {field}"),
            Self::InstancePut {
                field,
                object,
                value,
            } => write!(f, "iput {value}, {object}, {field}"),
            Self::StaticGet { dest, field } => write!(f, "sget {dest}, {field}"),
            Self::StaticPut { field, value } => write!(f, "sput {value}, {field}"),
            Self::Invoke {
                kind,
                method,
                args,
                range,
                result,
            } => {
                write!(f, "invoke-{kind}{} {{", if *range { "/range" } else { "" })?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, "}}, {method}")?;
                if let Some(result) = result {
                    write!(f, " -> {result}")?;
                }
                Ok(())
            }
            Self::CheckCast { register, class } => write!(f, "check-cast {register}, {class}"),
            Self::InstanceOf { dest, value, class } => {
                write!(f, "instance-of {dest}, {value}, {class}")
            }
            Self::NullCheck { value } => write!(f, "null-check {value}"),
            Self::Goto { target } => write!(f, "goto {target}"),
            Self::If {
                cond,
                left,
                right: Some(right),
                target,
            } => write!(f, "if-{cond} {left}, {right}, {target}"),
            Self::If {
                cond,
                left,
                right: None,
                target,
            } => write!(f, "if-{cond}z {left}, {target}"),
            Self::Switch {
                value,
                keys,
                targets,
            } => {
                write!(f, "switch {value}")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, ", {key}: {target}")?;
                }
                Ok(())
            }
            Self::Return { value: Some(value) } => write!(f, "return {value}"),
            Self::Return { value: None } => f.write_str("return-void"),
            Self::Throw { exception } => write!(f, "throw {exception}"),
        }
    }
}

/// A register operation with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInstruction {
    /// The operation.
    pub op: RegisterOp,
    /// Source position, inline frames included.
    pub position: Position,
}

impl RegisterInstruction {
    /// Creates an instruction without position.
    #[must_use]
    pub fn new(op: RegisterOp) -> Self {
        Self {
            op,
            position: Position::none(),
        }
    }

    /// Sets the source position.
    #[must_use]
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }
}

/// A labelled run of register instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    /// Label, the id of the IR block this run was lowered from.
    pub label: BlockId,
    /// The instructions; control falls through to the next block unless the
    /// last one ends the flow.
    pub instructions: Vec<RegisterInstruction>,
}

impl RegisterBlock {
    /// Returns true if control can continue into the next block in layout.
    #[must_use]
    pub fn falls_through(&self) -> bool {
        self.instructions.last().map_or(true, |i| !i.op.ends_flow())
    }
}

/// A method body after register allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCode {
    /// The method this code belongs to.
    pub method: MethodId,
    /// Frame size in register slots.
    pub registers: u32,
    /// Slots taken by incoming arguments, pinned to the top of the frame.
    pub incoming: u32,
    /// Blocks in layout order; the first one is the entry.
    pub blocks: Vec<RegisterBlock>,
}

impl RegisterCode {
    /// All instructions in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &RegisterInstruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// The register holding incoming argument word `word`.
    #[must_use]
    pub fn argument_register(&self, word: u32) -> Register {
        Register(self.registers - self.incoming + word)
    }

    /// Methods invoked by this body, in first-occurrence order.
    #[must_use]
    pub fn invoked_methods(&self) -> Vec<MethodId> {
        let mut methods = Vec::new();
        for instr in self.instructions() {
            if let RegisterOp::Invoke { method, .. } = &instr.op {
                if !methods.contains(method) {
                    methods.push(*method);
                }
            }
        }
        methods
    }
}

impl fmt::Display for RegisterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: registers={} incoming={}",
            self.method, self.registers, self.incoming
        )?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for instr in &block.instructions {
                writeln!(f, "  {}", instr.op)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_invoked_methods() {
        let code = RegisterCode {
            method: MethodId(3),
            registers: 3,
            incoming: 1,
            blocks: vec![RegisterBlock {
                label: BlockId(0),
                instructions: vec![
                    RegisterInstruction::new(RegisterOp::Const {
                        dest: Register(0),
                        value: Constant::Int(7),
                    }),
                    RegisterInstruction::new(RegisterOp::Invoke {
                        kind: InvokeKind::Static,
                        method: MethodId(9),
                        args: vec![Register(0), Register(2)],
                        range: false,
                        result: Some(Register(1)),
                    }),
                    RegisterInstruction::new(RegisterOp::Return {
                        value: Some(Register(1)),
                    }),
                ],
            }],
        };

        assert_eq!(code.invoked_methods(), vec![MethodId(9)]);
        assert_eq!(code.argument_register(0), Register(2));
        assert!(!code.blocks[0].falls_through());
        let text = code.to_string();
        assert!(text.contains("invoke-static {r0, r2}, m9 -> r1"));
        assert!(text.contains("const r0, 7"));
    }
}
