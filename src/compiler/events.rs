//! Event logging for the optimization pipeline.
//!
//! Every decision the pipeline takes (a folded constant, an inlined call, a
//! rejected inlining candidate, a skipped method) is recorded as an [`Event`].
//! Soft outcomes that are not errors, such as a method whose IR cannot be
//! built, surface here and nowhere else. Statistics are derived from the log
//! rather than tracked separately.
//!
//! # Example
//!
//! ```rust,ignore
//! use bytescope::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::MethodInlined)
//!     .method(caller)
//!     .pass("inliner")
//!     .message(format!("inlined {callee}"));
//! println!("{}", log.summary());
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::program::MethodId;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A computation was replaced by its constant result.
    ConstantFolded,
    /// A conditional branch became unconditional.
    BranchSimplified,
    /// An instruction was removed.
    InstructionRemoved,
    /// A basic block was removed.
    BlockRemoved,
    /// A phi was replaced by its single input.
    PhiSimplified,
    /// A call was replaced by the callee body.
    MethodInlined,
    /// A call site was considered for inlining and rejected.
    InlineRejected,
    /// An allocation was eliminated by the class inliner.
    ClassInlined,
    /// A check-cast or instance-of was proven trivial.
    CastRemoved,
    /// A field read was replaced by an earlier value.
    FieldLoadEliminated,
    /// A dynamic dispatch was turned into a direct call.
    Devirtualized,
    /// A computation was replaced by an equivalent earlier one.
    ExpressionReused,
    /// A value was proven non-null.
    NonNullInserted,
    /// Constants were deduplicated and hoisted.
    ConstantCanonicalized,
    /// A definition was moved closer to its use.
    LiveRangeShortened,
    /// A call result was replaced by the argument the callee returns.
    MoveResultRewritten,
    /// A code sequence was replaced by a call to an outlined method.
    Outlined,
    /// The outliner class was synthesized.
    OutlineClassSynthesized,
    /// A method was dropped from the output.
    MethodRemoved,
    /// A method body was finalized into an output form.
    CodeFinalized,
    /// Registers were allocated for a method.
    RegistersAllocated,
    /// A method was passed through without optimization.
    MethodSkipped,
    /// A caller was scheduled for a second inlining round.
    DoubleInlineScheduled,
    /// A call-graph layer was fully processed.
    LayerCompleted,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ConstantFolded => "constant folded",
            Self::BranchSimplified => "branch simplified",
            Self::InstructionRemoved => "instruction removed",
            Self::BlockRemoved => "block removed",
            Self::PhiSimplified => "phi simplified",
            Self::MethodInlined => "method inlined",
            Self::InlineRejected => "inline rejected",
            Self::ClassInlined => "class inlined",
            Self::CastRemoved => "cast removed",
            Self::FieldLoadEliminated => "field load eliminated",
            Self::Devirtualized => "call devirtualized",
            Self::ExpressionReused => "expression reused",
            Self::NonNullInserted => "non-null fact inserted",
            Self::ConstantCanonicalized => "constant canonicalized",
            Self::LiveRangeShortened => "live range shortened",
            Self::MoveResultRewritten => "move-result rewritten",
            Self::Outlined => "sequence outlined",
            Self::OutlineClassSynthesized => "outline class synthesized",
            Self::MethodRemoved => "method removed",
            Self::CodeFinalized => "code finalized",
            Self::RegistersAllocated => "registers allocated",
            Self::MethodSkipped => "method skipped",
            Self::DoubleInlineScheduled => "double inline scheduled",
            Self::LayerCompleted => "layer completed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::ConstantFolded
                | Self::BranchSimplified
                | Self::InstructionRemoved
                | Self::BlockRemoved
                | Self::PhiSimplified
                | Self::MethodInlined
                | Self::ClassInlined
                | Self::CastRemoved
                | Self::FieldLoadEliminated
                | Self::Devirtualized
                | Self::ExpressionReused
                | Self::NonNullInserted
                | Self::ConstantCanonicalized
                | Self::LiveRangeShortened
                | Self::MoveResultRewritten
                | Self::Outlined
                | Self::MethodRemoved
        )
    }

    /// Returns true if this is a diagnostic event (info/warning/error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (if applicable).
    pub method: Option<MethodId>,
    /// Block index within the method, if meaningful.
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodId>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and block where the event occurred.
    pub fn at(mut self, method: MethodId, location: usize) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets only the method.
    pub fn method(mut self, method: MethodId) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Append-only collection of pipeline events.
///
/// Events can be appended concurrently from worker threads through shared
/// references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends all events of `other` to this log.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in other.events.iter() {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.kind == kind).then_some(e))
    }

    /// Returns an iterator over events for a specific method.
    pub fn filter_method(&self, method: MethodId) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.method == Some(method)).then_some(e))
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of unique methods with transformation events.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.events
            .iter()
            .filter(|(_, e)| e.kind.is_transformation())
            .filter_map(|(_, e)| e.method)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of all transformation events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Number of methods that had any transformations.
    pub methods_transformed: usize,
    /// Number of constants folded.
    pub constants_folded: usize,
    /// Number of instructions removed.
    pub instructions_removed: usize,
    /// Number of blocks removed.
    pub blocks_removed: usize,
    /// Number of branches simplified.
    pub branches_simplified: usize,
    /// Number of call sites inlined.
    pub methods_inlined: usize,
    /// Number of allocations eliminated.
    pub classes_inlined: usize,
    /// Number of sequences outlined.
    pub outlined: usize,
    /// Number of methods removed from the output.
    pub methods_removed: usize,
    /// Number of methods finalized.
    pub methods_finalized: usize,
    /// Number of methods passed through.
    pub methods_skipped: usize,
    /// Number of call-graph layers processed.
    pub layers: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            constants_folded: get(EventKind::ConstantFolded),
            instructions_removed: get(EventKind::InstructionRemoved),
            blocks_removed: get(EventKind::BlockRemoved),
            branches_simplified: get(EventKind::BranchSimplified),
            methods_inlined: get(EventKind::MethodInlined),
            classes_inlined: get(EventKind::ClassInlined),
            outlined: get(EventKind::Outlined),
            methods_removed: get(EventKind::MethodRemoved),
            methods_finalized: get(EventKind::CodeFinalized),
            methods_skipped: get(EventKind::MethodSkipped),
            layers: get(EventKind::LayerCompleted),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.methods_transformed > 0 {
            parts.push(format!("{} methods", self.methods_transformed));
        }
        if self.constants_folded > 0 {
            parts.push(format!("{} constants folded", self.constants_folded));
        }
        if self.instructions_removed > 0 {
            parts.push(format!(
                "{} instructions removed",
                self.instructions_removed
            ));
        }
        if self.blocks_removed > 0 {
            parts.push(format!("{} blocks removed", self.blocks_removed));
        }
        if self.branches_simplified > 0 {
            parts.push(format!("{} branches simplified", self.branches_simplified));
        }
        if self.methods_inlined > 0 {
            parts.push(format!("{} inlined", self.methods_inlined));
        }
        if self.classes_inlined > 0 {
            parts.push(format!("{} allocations eliminated", self.classes_inlined));
        }
        if self.outlined > 0 {
            parts.push(format!("{} outlined", self.outlined));
        }
        if self.methods_removed > 0 {
            parts.push(format!("{} methods removed", self.methods_removed));
        }
        if self.methods_skipped > 0 {
            parts.push(format!("{} skipped", self.methods_skipped));
        }
        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!(
                "{} in {:?} ({} layers)",
                stats, self.total_time, self.layers
            )
        } else {
            stats
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.summary(), "no events");
    }

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        let method = MethodId(3);

        log.record(EventKind::MethodInlined)
            .at(method, 2)
            .pass("inliner")
            .message("inlined m4");

        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.method, Some(method));
        assert_eq!(event.location, Some(2));
        assert_eq!(event.pass.as_deref(), Some("inliner"));
        assert_eq!(event.message, "inlined m4");
        assert_eq!(log.filter_method(method).count(), 1);
    }

    #[test]
    fn test_default_message_and_diagnostics() {
        let log = EventLog::new();
        log.record(EventKind::MethodSkipped).method(MethodId(1));
        log.warn("careful");
        assert_eq!(log.iter().next().unwrap().message, "method skipped");
        assert_eq!(log.count_kind(EventKind::Warning), 1);
        assert!(!EventKind::MethodSkipped.is_transformation());
        assert_eq!(log.methods_affected(), 0);
    }

    #[test]
    fn test_derived_stats() {
        let log = EventLog::new();
        log.record(EventKind::ConstantFolded).method(MethodId(0));
        log.record(EventKind::ConstantFolded).method(MethodId(0));
        log.record(EventKind::MethodInlined).method(MethodId(1));

        let stats = DerivedStats::from_log(&log);
        assert_eq!(stats.constants_folded, 2);
        assert_eq!(stats.methods_inlined, 1);
        assert_eq!(stats.methods_transformed, 2);
        assert_eq!(stats.summary(), "2 methods, 2 constants folded, 1 inlined");
        assert!(log.summary().contains("2 constant folded"));
    }
}
