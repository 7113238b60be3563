//! Configuration for the optimizer.
//!
//! [`OptimizerConfig`] selects which parts of the pipeline run and bounds the
//! inlining budgets. Testing hooks are callbacks the surrounding harness can
//! attach to observe intermediate states; they never change what is emitted.

use std::{fmt, sync::Arc};

use crate::{
    ir::IrCode,
    program::{ClassId, MethodId, Program},
    Error, Result,
};

/// Code representation produced by finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum OutputFormat {
    /// Register-allocated code with a fixed register file.
    #[default]
    Register,
    /// Stack-machine code with local slots.
    Stack,
}

/// Predicate selecting the methods that are optimized.
///
/// Methods rejected by the filter are marked processed with
/// [`crate::program::Constraint::Never`] and keep their input code.
#[derive(Clone, Default)]
pub enum MethodFilter {
    /// Every method is optimized.
    #[default]
    All,
    /// Only methods whose `Class.name` (or bare name) is listed.
    Names(Vec<String>),
    /// A custom predicate.
    Predicate(Arc<dyn Fn(&Program, MethodId) -> bool + Send + Sync>),
}

impl MethodFilter {
    /// Returns true if `method` should be optimized.
    #[must_use]
    pub fn accepts(&self, program: &Program, method: MethodId) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => {
                let qualified = program.describe(method);
                let simple = program.method(method).map(|m| m.name.as_str()).ok();
                names
                    .iter()
                    .any(|name| *name == qualified || Some(name.as_str()) == simple)
            }
            Self::Predicate(predicate) => predicate(program, method),
        }
    }
}

impl fmt::Debug for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Names(names) => f.debug_tuple("Names").field(names).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Workarounds for bugs of specific runtime targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformWorkarounds {
    /// The target mishandles direct `String.<init>` invocations.
    pub string_init_bug: bool,
    /// The target miscompiles wide arithmetic whose result register overlaps
    /// an operand; a materializing instruction is forced ahead of it.
    pub long_operation_bug: bool,
}

/// Settings of the outliner (phase 2 of `optimize`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineOptions {
    /// Run the outliner.
    pub enabled: bool,
    /// Shortest instruction sequence considered.
    pub min_size: usize,
    /// Longest instruction sequence considered.
    pub max_size: usize,
    /// Number of occurrences a sequence needs before it is outlined.
    pub threshold: usize,
    /// Maximum number of inputs of an outlined sequence.
    pub max_arguments: usize,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            min_size: 3,
            max_size: 99,
            threshold: 20,
            max_arguments: 4,
        }
    }
}

/// Callback invoked after class inlining changed a method.
pub type ClassInliningHook = Arc<dyn Fn(MethodId, &[ClassId], &IrCode) + Send + Sync>;

/// Callback invoked after a call-graph layer was processed.
pub type LayerHook = Arc<dyn Fn(usize, &[MethodId]) + Send + Sync>;

/// Extension points for test harnesses.
#[derive(Clone, Default)]
pub struct TestingHooks {
    /// Receives the method, the classes inlined into it and the resulting IR.
    pub after_class_inlining: Option<ClassInliningHook>,
    /// Inverts every conditional branch after `if` simplification.
    pub invert_conditionals: bool,
    /// Receives the layer index and its methods once the layer is published.
    pub after_layer: Option<LayerHook>,
}

impl fmt::Debug for TestingHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestingHooks")
            .field("after_class_inlining", &self.after_class_inlining.is_some())
            .field("invert_conditionals", &self.invert_conditionals)
            .field("after_layer", &self.after_layer.is_some())
            .finish()
    }
}

/// Configuration for the optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Enable method inlining (default: true).
    pub enable_inlining: bool,

    /// Maximum estimated size of a caller after inlining (default: 1500).
    pub inlining_instruction_limit: usize,

    /// Allow inlining instance calls whose receiver may be null (default: true).
    pub enable_inlining_of_invokes_with_nullable_receivers: bool,

    /// Enable class inlining (default: true).
    pub enable_class_inlining: bool,

    /// Class inlining is skipped for roots whose inlined users reach this
    /// size (default: 50).
    pub class_inlining_instruction_limit: usize,

    /// Preserve debug information fidelity; disables inlining, class inlining
    /// and outlining.
    pub debug: bool,

    /// Do not build IR at all; every method keeps its input code.
    pub skip_ir: bool,

    /// Replace reads of `$assertionsDisabled` with `true` (default: true).
    pub disable_assertions: bool,

    /// Check SSA form after every pass that mutates IR.
    ///
    /// Defaults to on in debug builds of this crate and off in release builds.
    pub verify_ssa: bool,

    /// Output representation.
    pub output: OutputFormat,

    /// Runtime workarounds of the target.
    pub platform: PlatformWorkarounds,

    /// Outliner settings.
    pub outline: OutlineOptions,

    /// Selects the methods that are optimized.
    pub method_filter: MethodFilter,

    /// Test harness callbacks.
    pub testing: TestingHooks,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enable_inlining: true,
            inlining_instruction_limit: 1500,
            enable_inlining_of_invokes_with_nullable_receivers: true,
            enable_class_inlining: true,
            class_inlining_instruction_limit: 50,
            debug: false,
            skip_ir: false,
            disable_assertions: true,
            verify_ssa: cfg!(debug_assertions),
            output: OutputFormat::Register,
            platform: PlatformWorkarounds::default(),
            outline: OutlineOptions::default(),
            method_filter: MethodFilter::All,
            testing: TestingHooks::default(),
        }
    }
}

impl OptimizerConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that keeps debug information intact.
    ///
    /// This configuration uses:
    /// - No inlining or class inlining
    /// - No outlining
    /// - Assertions left enabled
    #[must_use]
    pub fn debug() -> Self {
        Self {
            debug: true,
            enable_inlining: false,
            enable_class_inlining: false,
            disable_assertions: false,
            outline: OutlineOptions {
                enabled: false,
                ..OutlineOptions::default()
            },
            ..Self::default()
        }
    }

    /// Creates a release configuration with the outliner enabled.
    #[must_use]
    pub fn release() -> Self {
        Self {
            outline: OutlineOptions {
                enabled: true,
                ..OutlineOptions::default()
            },
            ..Self::default()
        }
    }

    /// Enables or disables inlining and sets the size limit.
    #[must_use]
    pub fn with_inlining(mut self, enable: bool, limit: usize) -> Self {
        self.enable_inlining = enable;
        self.inlining_instruction_limit = limit;
        self
    }

    /// Allows or forbids inlining calls on possibly-null receivers.
    #[must_use]
    pub fn with_nullable_receivers(mut self, enable: bool) -> Self {
        self.enable_inlining_of_invokes_with_nullable_receivers = enable;
        self
    }

    /// Enables or disables class inlining and sets its size limit.
    #[must_use]
    pub fn with_class_inlining(mut self, enable: bool, limit: usize) -> Self {
        self.enable_class_inlining = enable;
        self.class_inlining_instruction_limit = limit;
        self
    }

    /// Sets the output representation.
    #[must_use]
    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Sets the outliner settings.
    #[must_use]
    pub fn with_outline(mut self, outline: OutlineOptions) -> Self {
        self.outline = outline;
        self
    }

    /// Sets the platform workarounds.
    #[must_use]
    pub fn with_platform(mut self, platform: PlatformWorkarounds) -> Self {
        self.platform = platform;
        self
    }

    /// Sets the method filter.
    #[must_use]
    pub fn with_method_filter(mut self, filter: MethodFilter) -> Self {
        self.method_filter = filter;
        self
    }

    /// Enables or disables SSA verification between passes.
    #[must_use]
    pub fn with_verify_ssa(mut self, verify: bool) -> Self {
        self.verify_ssa = verify;
        self
    }

    /// Sets the testing hooks.
    #[must_use]
    pub fn with_testing(mut self, testing: TestingHooks) -> Self {
        self.testing = testing;
        self
    }

    /// Enables or disables `skip_ir`.
    #[must_use]
    pub fn with_skip_ir(mut self, skip: bool) -> Self {
        self.skip_ir = skip;
        self
    }

    /// Returns true if the inliner runs.
    #[must_use]
    pub fn inlining_enabled(&self) -> bool {
        self.enable_inlining && !self.debug
    }

    /// Returns true if the class inliner runs.
    #[must_use]
    pub fn class_inlining_enabled(&self) -> bool {
        self.enable_class_inlining && !self.debug
    }

    /// Returns true if the outliner runs.
    #[must_use]
    pub fn outlining_enabled(&self) -> bool {
        self.outline.enabled && !self.debug
    }

    /// Checks the configuration for contradictory values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.inlining_instruction_limit == 0 {
            return Err(Error::Config(
                "inlining_instruction_limit must be positive".to_string(),
            ));
        }
        if self.class_inlining_instruction_limit == 0 {
            return Err(Error::Config(
                "class_inlining_instruction_limit must be positive".to_string(),
            ));
        }
        let outline = &self.outline;
        if outline.min_size < 2 {
            return Err(Error::Config(format!(
                "outline.min_size must be at least 2, got {}",
                outline.min_size
            )));
        }
        if outline.min_size > outline.max_size {
            return Err(Error::Config(format!(
                "outline.min_size ({}) exceeds outline.max_size ({})",
                outline.min_size, outline.max_size
            )));
        }
        if outline.threshold == 0 {
            return Err(Error::Config("outline.threshold must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Class, Method};

    #[test]
    fn test_defaults_are_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.inlining_enabled());
        assert_eq!(config.class_inlining_instruction_limit, 50);
        assert_eq!(config.output, OutputFormat::Register);
    }

    #[test]
    fn test_debug_disables_inlining() {
        let config = OptimizerConfig::debug().with_inlining(true, 10);
        assert!(!config.inlining_enabled());
        assert!(!config.class_inlining_enabled());
        assert!(!config.outlining_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_outline_bounds() {
        let config = OptimizerConfig::release().with_outline(OutlineOptions {
            enabled: true,
            min_size: 10,
            max_size: 4,
            threshold: 2,
            max_arguments: 4,
        });
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = OptimizerConfig::default().with_inlining(true, 0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_method_filter() {
        let program = Program::new();
        let class = program.add_class(Class::new("app.Main"));
        let run = program.add_method(Method::new_static(class, "run", vec![], None));
        let other = program.add_method(Method::new_static(class, "other", vec![], None));

        let filter = MethodFilter::Names(vec!["app.Main.run".to_string()]);
        assert!(filter.accepts(&program, run));
        assert!(!filter.accepts(&program, other));

        let filter = MethodFilter::Names(vec!["other".to_string()]);
        assert!(filter.accepts(&program, other));

        let filter = MethodFilter::Predicate(Arc::new(move |_: &Program, m: MethodId| m == run));
        assert!(filter.accepts(&program, run));
        assert!(!filter.accepts(&program, other));
        assert!(MethodFilter::All.accepts(&program, other));
    }
}
