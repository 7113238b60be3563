//! Method bodies in their input and output representations.

use std::{fmt, sync::Arc};

use crate::{
    ir::IrCode,
    output::{RegisterCode, StackCode},
    program::{MethodId, Program},
};

/// An input representation that can produce SSA code on demand.
///
/// Bytecode readers implement this for their parsed method bodies. Returning
/// `None` means the body cannot be converted in its current form; the method
/// is then passed through unchanged.
pub trait CodeSource: Send + Sync + fmt::Debug {
    /// Builds fresh SSA code for `method`.
    fn build_ir(&self, method: MethodId, program: &Program) -> Option<IrCode>;

    /// Methods invoked by this body, used to build the call graph.
    fn invoked_methods(&self, method: MethodId, program: &Program) -> Vec<MethodId> {
        self.build_ir(method, program)
            .map(|code| code.invoked_methods())
            .unwrap_or_default()
    }
}

impl CodeSource for IrCode {
    fn build_ir(&self, method: MethodId, _program: &Program) -> Option<IrCode> {
        let mut code = self.clone();
        code.method = method;
        Some(code)
    }

    fn invoked_methods(&self, _method: MethodId, _program: &Program) -> Vec<MethodId> {
        IrCode::invoked_methods(self)
    }
}

/// The body of a method.
///
/// Code is replaced, never mutated in place: every pass that finalizes a
/// method installs a new value.
#[derive(Debug, Clone)]
pub enum Code {
    /// Not yet converted; IR is built from the source on demand.
    Source(Arc<dyn CodeSource>),
    /// Register-allocated output.
    Register(Arc<RegisterCode>),
    /// Stack-machine output.
    Stack(Arc<StackCode>),
}

impl Code {
    /// Wraps SSA code as a source.
    #[must_use]
    pub fn from_ir(code: IrCode) -> Self {
        Self::Source(Arc::new(code))
    }

    /// Builds IR; finalized output forms decline.
    #[must_use]
    pub fn build_ir(&self, method: MethodId, program: &Program) -> Option<IrCode> {
        match self {
            Self::Source(source) => source.build_ir(method, program),
            Self::Register(_) | Self::Stack(_) => None,
        }
    }

    /// Returns true for finalized output forms.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        !matches!(self, Self::Source(_))
    }

    /// Methods referenced from this body.
    #[must_use]
    pub fn invoked_methods(&self, method: MethodId, program: &Program) -> Vec<MethodId> {
        match self {
            Self::Source(source) => source.invoked_methods(method, program),
            Self::Register(code) => code.invoked_methods(),
            Self::Stack(code) => code.invoked_methods(),
        }
    }

    /// The register-allocated form, if finalized that way.
    #[must_use]
    pub fn as_register(&self) -> Option<&RegisterCode> {
        match self {
            Self::Register(code) => Some(code),
            _ => None,
        }
    }

    /// The stack form, if finalized that way.
    #[must_use]
    pub fn as_stack(&self) -> Option<&StackCode> {
        match self {
            Self::Stack(code) => Some(code),
            _ => None,
        }
    }
}
