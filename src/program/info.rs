//! Per-method optimization feedback.
//!
//! Facts are computed when a method is finalized and consumed when its callers
//! are optimized later in call-graph order.

use crate::{
    ir::Constant,
    program::{ClassId, FieldId, MethodId},
};

/// How widely a finalized method body may be inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Constraint {
    /// Must not be inlined anywhere.
    Never,
    /// Only into methods of the same class.
    SameClass,
    /// Only into methods of the same class or a subclass.
    Subclass,
    /// Anywhere.
    Always,
}

impl Constraint {
    /// Returns true if a body with this constraint may be inlined into `caller_holder`.
    ///
    /// `is_subclass` is queried lazily and only for [`Constraint::Subclass`].
    pub fn allows(
        self,
        callee_holder: ClassId,
        caller_holder: ClassId,
        is_subclass: impl FnOnce() -> bool,
    ) -> bool {
        match self {
            Self::Never => false,
            Self::SameClass => callee_holder == caller_holder,
            Self::Subclass => callee_holder == caller_holder || is_subclass(),
            Self::Always => true,
        }
    }
}

/// The value stored into a field by a trivial constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitValue {
    /// Constructor argument `n` (the receiver is argument 0).
    Argument(usize),
    /// A constant.
    Constant(Constant),
}

/// A constructor that only calls a trivial super constructor and stores
/// arguments or constants into fields of its own class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrivialInitializer {
    /// The super constructor called on the receiver, if any.
    pub super_initializer: Option<MethodId>,
    /// Field stores in program order.
    pub field_values: Vec<(FieldId, InitValue)>,
}

/// A class initializer that only stores a fresh instance of its class into a
/// static field (the singleton pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrivialClassInitializer {
    /// The static field holding the singleton.
    pub field: FieldId,
}

/// Facts making a method usable on a class-inlined receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInlinerEligibility {
    /// The method returns its receiver (builder pattern).
    pub returns_receiver: bool,
}

/// Everything the optimizer learned about a method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationInfo {
    /// Set once the method was processed in this compilation.
    pub processed: Option<Constraint>,
    /// The method always returns argument `n`.
    pub returns_argument: Option<usize>,
    /// The method always returns this constant.
    pub returns_constant: Option<Constant>,
    /// Calls to the method never complete normally.
    pub never_returns_normally: bool,
    /// The method has no side effects besides computing its result.
    pub side_effect_free: bool,
    /// The method dereferences its receiver before any other side effect.
    pub checks_null_receiver_before_side_effect: bool,
    /// Set if calls on a class-inlined receiver can be force-inlined.
    pub class_inliner_eligibility: Option<ClassInlinerEligibility>,
    /// Set for constructors that only initialize fields.
    pub trivial_initializer: Option<TrivialInitializer>,
    /// Set for class initializers that only create a singleton.
    pub trivial_class_initializer: Option<TrivialClassInitializer>,
    /// Size estimate of the optimized body.
    pub size: usize,
}

impl OptimizationInfo {
    /// Returns true once the method has been finalized.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed.is_some()
    }

    /// The inlining constraint, `Never` when not processed.
    #[must_use]
    pub fn constraint(&self) -> Constraint {
        self.processed.unwrap_or(Constraint::Never)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_allows() {
        let a = ClassId(0);
        let b = ClassId(1);
        assert!(!Constraint::Never.allows(a, a, || true));
        assert!(Constraint::SameClass.allows(a, a, || false));
        assert!(!Constraint::SameClass.allows(a, b, || true));
        assert!(Constraint::Subclass.allows(a, b, || true));
        assert!(!Constraint::Subclass.allows(a, b, || false));
        assert!(Constraint::Always.allows(a, b, || false));
    }

    #[test]
    fn test_unprocessed_is_never() {
        let info = OptimizationInfo::default();
        assert!(!info.is_processed());
        assert_eq!(info.constraint(), Constraint::Never);
    }
}
