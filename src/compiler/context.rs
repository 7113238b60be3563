//! Compiler context for whole-program optimization.
//!
//! The [`CompilerContext`] holds the state shared by all workers of one
//! compilation: published IR snapshots, inlining bookkeeping, memoized class
//! facts, outline candidates and the event log.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::{
    compiler::{events::EventLog, outliner::OutlineShape},
    ir::IrCode,
    program::{ClassId, MethodId},
};

/// Compiler context for one `optimize` or `convert` run.
///
/// All collection fields use thread-safe types so workers of one call-graph
/// layer can record facts concurrently. Snapshots produced while a layer is
/// running go to a staging area and become visible to inlining decisions only
/// after [`CompilerContext::publish_pending`] is called at the layer barrier.
pub struct CompilerContext {
    /// Accumulated events from all passes.
    pub events: EventLog,

    /// Optimized IR of finalized methods, visible to the inliner.
    optimized: DashMap<MethodId, Arc<IrCode>>,

    /// Snapshots of the layer currently being processed.
    pending: DashMap<MethodId, Arc<IrCode>>,

    /// Methods that were inlined at least once.
    pub inlined_methods: DashSet<MethodId>,

    /// Callers that met a callee whose optimized body was not yet available.
    pub double_inline_callers: DashSet<MethodId>,

    /// Memoized class-inlining eligibility per class.
    class_eligibility: DashMap<ClassId, bool>,

    /// Outline candidate shapes with the methods they occur in (one entry per occurrence).
    pub outline_candidates: DashMap<OutlineShape, Vec<MethodId>>,

    /// Lexicographically highest string constant in any finalized method.
    highest_sorting_string: Mutex<Option<Arc<str>>>,

    start_time: Instant,
}

impl CompilerContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: EventLog::new(),
            optimized: DashMap::new(),
            pending: DashMap::new(),
            inlined_methods: DashSet::new(),
            double_inline_callers: DashSet::new(),
            class_eligibility: DashMap::new(),
            outline_candidates: DashMap::new(),
            highest_sorting_string: Mutex::new(None),
            start_time: Instant::now(),
        }
    }

    /// Returns the elapsed time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    // ── Optimized snapshots ─────────────────────────────────────────────

    /// The published optimized IR of `method`.
    #[must_use]
    pub fn optimized_code(&self, method: MethodId) -> Option<Arc<IrCode>> {
        self.optimized.get(&method).map(|code| Arc::clone(&code))
    }

    /// Stages the optimized IR of `method` until the next layer barrier.
    pub fn stage_snapshot(&self, method: MethodId, code: IrCode) {
        self.pending.insert(method, Arc::new(code));
    }

    /// Makes the optimized IR of `method` visible immediately.
    pub fn publish_snapshot(&self, method: MethodId, code: IrCode) {
        self.pending.remove(&method);
        self.optimized.insert(method, Arc::new(code));
    }

    /// Publishes every staged snapshot; returns how many were published.
    pub fn publish_pending(&self) -> usize {
        let staged: Vec<MethodId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut published = 0;
        for method in staged {
            if let Some((method, code)) = self.pending.remove(&method) {
                self.optimized.insert(method, code);
                published += 1;
            }
        }
        published
    }

    // ── Inlining bookkeeping ────────────────────────────────────────────

    /// Marks a method as having been inlined at least once.
    pub fn mark_inlined(&self, method: MethodId) {
        self.inlined_methods.insert(method);
    }

    /// Checks if a method was inlined at least once.
    #[must_use]
    pub fn was_inlined(&self, method: MethodId) -> bool {
        self.inlined_methods.contains(&method)
    }

    /// Records that `caller` should be revisited by the double-inline pass.
    ///
    /// Returns true if `caller` was not scheduled yet.
    pub fn request_double_inline(&self, caller: MethodId) -> bool {
        self.double_inline_callers.insert(caller)
    }

    /// Drains the callers recorded for double inlining, sorted by id.
    pub fn take_double_inline_callers(&self) -> Vec<MethodId> {
        let mut callers: Vec<MethodId> = self.double_inline_callers.iter().map(|m| *m).collect();
        self.double_inline_callers.clear();
        callers.sort();
        callers
    }

    // ── Class eligibility cache ─────────────────────────────────────────

    /// Returns the memoized eligibility of `class`, computing it on a miss.
    ///
    /// Concurrent misses may compute the value twice; the function is pure
    /// so every computation agrees.
    pub fn class_eligibility(&self, class: ClassId, compute: impl FnOnce() -> bool) -> bool {
        if let Some(cached) = self.class_eligibility.get(&class) {
            return *cached;
        }
        let eligible = compute();
        *self.class_eligibility.entry(class).or_insert(eligible)
    }

    /// The cached eligibility of `class`, if it was computed.
    #[must_use]
    pub fn cached_class_eligibility(&self, class: ClassId) -> Option<bool> {
        self.class_eligibility.get(&class).map(|cached| *cached)
    }

    // ── Outlining ───────────────────────────────────────────────────────

    /// Records one occurrence of `shape` in `method`.
    pub fn add_outline_candidate(&self, shape: OutlineShape, method: MethodId) {
        self.outline_candidates.entry(shape).or_default().push(method);
    }

    // ── Highest sorting string ──────────────────────────────────────────

    /// Folds `candidate` into the highest-sorting-string accumulator.
    pub fn update_highest_sorting_string(&self, candidate: &Arc<str>) {
        let mut highest = self.highest_sorting_string.lock();
        match highest.as_ref() {
            Some(current) if current.as_ref() >= candidate.as_ref() => {}
            _ => *highest = Some(Arc::clone(candidate)),
        }
    }

    /// The highest string constant seen so far.
    #[must_use]
    pub fn highest_sorting_string(&self) -> Option<Arc<str>> {
        self.highest_sorting_string.lock().clone()
    }
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_snapshots_visible_after_publish() {
        let ctx = CompilerContext::new();
        let method = MethodId(3);
        ctx.stage_snapshot(method, IrCode::new(method));
        assert!(ctx.optimized_code(method).is_none());
        assert_eq!(ctx.publish_pending(), 1);
        assert!(ctx.optimized_code(method).is_some());
        assert_eq!(ctx.publish_pending(), 0);
    }

    #[test]
    fn test_class_eligibility_memoized() {
        let ctx = CompilerContext::new();
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::Relaxed);
            true
        };
        assert!(ctx.class_eligibility(ClassId(1), compute));
        assert!(ctx.class_eligibility(ClassId(1), || false));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.cached_class_eligibility(ClassId(1)), Some(true));
        assert_eq!(ctx.cached_class_eligibility(ClassId(2)), None);
    }

    #[test]
    fn test_highest_sorting_string() {
        let ctx = CompilerContext::new();
        ctx.update_highest_sorting_string(&Arc::from("beta"));
        ctx.update_highest_sorting_string(&Arc::from("alpha"));
        ctx.update_highest_sorting_string(&Arc::from("gamma"));
        assert_eq!(ctx.highest_sorting_string().as_deref(), Some("gamma"));
    }

    #[test]
    fn test_double_inline_callers_drained() {
        let ctx = CompilerContext::new();
        assert!(ctx.request_double_inline(MethodId(5)));
        assert!(ctx.request_double_inline(MethodId(2)));
        assert!(!ctx.request_double_inline(MethodId(5)));
        assert_eq!(ctx.take_double_inline_callers(), vec![MethodId(2), MethodId(5)]);
        assert!(ctx.take_double_inline_callers().is_empty());
    }
}
