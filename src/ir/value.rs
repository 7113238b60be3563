//! SSA values and constants.

use std::{fmt, sync::Arc};

use crate::program::ClassId;

/// Identifier of an SSA value inside one [`crate::ir::IrCode`].
///
/// Values are owned by the code object that created them; identifiers are
/// never shared across methods. When a callee body is spliced into a caller,
/// every callee value is renumbered into the caller's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl ValueId {
    /// Creates a value identifier from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the arena index of this value.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Conceptual type tag of a value.
///
/// Only the distinctions the optimizer needs are kept: single-slot integers,
/// wide (two-slot) integers and references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ValueType {
    /// 32-bit integer-like value (int, boolean, char, short, byte).
    #[strum(serialize = "int")]
    Int,
    /// 64-bit integer; occupies two register slots.
    #[strum(serialize = "long")]
    Long,
    /// Object or array reference.
    #[strum(serialize = "ref")]
    Reference,
}

impl ValueType {
    /// Returns true for types that occupy two register slots.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Long)
    }

    /// Number of register slots a value of this type occupies.
    #[must_use]
    pub const fn width(self) -> usize {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// The zero value of this type, used as the default of uninitialized fields.
    #[must_use]
    pub fn default_value(self) -> Constant {
        match self {
            Self::Int => Constant::Int(0),
            Self::Long => Constant::Long(0),
            Self::Reference => Constant::Null,
        }
    }
}

/// What is statically known about a reference value being null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Nullability {
    /// Nothing is known.
    #[default]
    Maybe,
    /// The value is never null.
    NotNull,
    /// The value is always null.
    Null,
}

impl Nullability {
    /// Returns true if the value may be null at runtime.
    #[must_use]
    pub const fn may_be_null(self) -> bool {
        !matches!(self, Self::NotNull)
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// A 32-bit integer constant.
    Int(i32),
    /// A 64-bit integer constant.
    Long(i64),
    /// The null reference.
    Null,
    /// A string literal.
    String(Arc<str>),
}

impl Constant {
    /// Creates a string constant.
    #[must_use]
    pub fn string(value: &str) -> Self {
        Self::String(Arc::from(value))
    }

    /// The type of values produced by this constant.
    #[must_use]
    pub const fn ty(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Long(_) => ValueType::Long,
            Self::Null | Self::String(_) => ValueType::Reference,
        }
    }

    /// Returns the numeric payload widened to 64 bits, if this is a number.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v as i64),
            Self::Long(v) => Some(*v),
            Self::Null | Self::String(_) => None,
        }
    }

    /// Returns the string payload of a string constant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Nullability of the produced value.
    #[must_use]
    pub const fn nullability(&self) -> Nullability {
        match self {
            Self::Null => Nullability::Null,
            Self::String(_) => Nullability::NotNull,
            Self::Int(_) | Self::Long(_) => Nullability::Maybe,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Null => f.write_str("null"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Per-value metadata stored in the code's value arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueData {
    /// Type tag of the value.
    pub ty: ValueType,
    /// Static nullability (only meaningful for references).
    pub nullability: Nullability,
    /// Upper bound of the runtime class, if known.
    pub class: Option<ClassId>,
    /// Source-level local variable name, kept for debug information.
    pub local: Option<Arc<str>>,
}

impl ValueData {
    /// Creates metadata for a value of the given type with nothing else known.
    #[must_use]
    pub const fn new(ty: ValueType) -> Self {
        Self {
            ty,
            nullability: Nullability::Maybe,
            class: None,
            local: None,
        }
    }

    /// Returns a copy with the given nullability.
    #[must_use]
    pub fn with_nullability(mut self, nullability: Nullability) -> Self {
        self.nullability = nullability;
        self
    }

    /// Returns a copy with the given class bound.
    #[must_use]
    pub fn with_class(mut self, class: Option<ClassId>) -> Self {
        self.class = class;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_types() {
        assert!(ValueType::Long.is_wide());
        assert!(!ValueType::Int.is_wide());
        assert_eq!(ValueType::Long.width(), 2);
        assert_eq!(ValueType::Reference.width(), 1);
    }

    #[test]
    fn test_constant_types() {
        assert_eq!(Constant::Int(3).ty(), ValueType::Int);
        assert_eq!(Constant::Long(3).ty(), ValueType::Long);
        assert_eq!(Constant::string("a").ty(), ValueType::Reference);
        assert_eq!(Constant::Null.nullability(), Nullability::Null);
        assert_eq!(Constant::Int(-2).as_i64(), Some(-2));
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueId(7).to_string(), "v7");
        assert_eq!(Constant::Long(5).to_string(), "5L");
        assert_eq!(ValueType::Reference.to_string(), "ref");
    }
}
