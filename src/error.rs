use thiserror::Error;

use crate::program::{ClassId, FieldId, MethodId};

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure the optimizer can report.
///
/// Expected outcomes of the pipeline (a method whose IR cannot be built, a call
/// site that is not eligible for inlining, an allocation root that cannot be
/// class-inlined) are never errors: they are recorded in the
/// [`crate::compiler::EventLog`] and processing continues. The variants below
/// are reserved for conditions that stop the whole compilation.
///
/// # Error Categories
///
/// ## Internal consistency violations
/// - [`Error::InvalidSsa`] - A pass left the IR in a state that violates SSA form
/// - [`Error::RegisterOverflow`] - A method needs more registers than the encoding allows
/// - [`Error::Internal`] - Any other broken invariant, carrying the source location
///
/// ## Lookup failures
/// - [`Error::UnknownMethod`], [`Error::UnknownClass`], [`Error::UnknownField`] -
///   An identifier does not resolve in the [`crate::program::Program`]
///
/// ## Configuration
/// - [`Error::Config`] - An [`crate::OptimizerConfig`] failed validation
///
/// # Examples
///
/// ```rust,no_run
/// use bytescope::{Error, IrConverter, OptimizerConfig, program::Program};
///
/// let program = Program::new();
/// let converter = IrConverter::new(&program, OptimizerConfig::default());
/// match converter.optimize() {
///     Ok(stats) => println!("{}", stats.summary()),
///     Err(Error::InvalidSsa { method, pass, message }) => {
///         eprintln!("{pass} broke SSA form in {method}: {message}");
///     }
///     Err(e) => eprintln!("compilation aborted: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A pass produced IR that is no longer in valid SSA form.
    ///
    /// This always indicates a bug in the named pass. The compilation is
    /// aborted rather than emitting code derived from the broken IR.
    ///
    /// # Fields
    ///
    /// * `method` - The method whose IR was being rewritten
    /// * `pass` - The pass that ran last before the check
    /// * `message` - Description of the violated property
    #[error("Invalid SSA in {method} after {pass}: {message}")]
    InvalidSsa {
        /// The method whose IR failed verification
        method: MethodId,
        /// The name of the pass that ran before verification
        pass: String,
        /// The violated property
        message: String,
    },

    /// The register allocator ran out of encodable registers.
    ///
    /// The output format addresses registers with 16 bits; a method that needs
    /// more than that cannot be emitted.
    #[error("Register overflow in {method}: {required} registers required, limit is {limit}")]
    RegisterOverflow {
        /// The method being allocated
        method: MethodId,
        /// Number of register slots the allocation needed
        required: usize,
        /// The maximum number of slots of the output format
        limit: usize,
    },

    /// An internal invariant was violated.
    ///
    /// The error records the source location where the violation was detected.
    #[error("Internal error - {file}:{line}: {message}")]
    Internal {
        /// The message describing the violation
        message: String,
        /// The source file in which the violation was detected
        file: &'static str,
        /// The source line in which the violation was detected
        line: u32,
    },

    /// A method identifier does not resolve in the program.
    #[error("Unknown method {0}")]
    UnknownMethod(MethodId),

    /// A class identifier does not resolve in the program.
    #[error("Unknown class {0}")]
    UnknownClass(ClassId),

    /// A field identifier does not resolve in the program.
    #[error("Unknown field {0}")]
    UnknownField(FieldId),

    /// The optimizer configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// The result type used throughout bytescope.
pub type Result<T> = std::result::Result<T, Error>;
