//! GC memory-pressure accounting for the native engine.
//!
//! Every handle creation charges the engine's collector with the native
//! memory cost of the proxy record it references; every release credits it
//! back. Adjustments from finalizer context must not call into the engine,
//! so deltas accumulate in an atomic and are flushed at the next
//! native-call boundary.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::engine::NativeEngine;

/// Per-engine pressure accumulator.
pub(crate) struct MemoryPressure {
    /// Delta not yet reported to the engine.
    pending: AtomicI64,
    /// Net bytes currently attributed to live handles.
    tracked: AtomicI64,
}

impl MemoryPressure {
    pub(crate) fn new() -> MemoryPressure {
        MemoryPressure {
            pending: AtomicI64::new(0),
            tracked: AtomicI64::new(0),
        }
    }

    /// Record a delta. Safe from any thread, including finalizers: this
    /// only touches atomics.
    pub(crate) fn record(&self, delta: i64) {
        if delta != 0 {
            self.pending.fetch_add(delta, Ordering::AcqRel);
            self.tracked.fetch_add(delta, Ordering::AcqRel);
            tracing::trace!(delta, "deferred memory-pressure adjustment");
        }
    }

    /// Apply accumulated deltas to the engine. Called on entry to every
    /// native call.
    pub(crate) fn flush(&self, engine: &dyn NativeEngine) {
        let delta = self.pending.swap(0, Ordering::AcqRel);
        if delta != 0 {
            engine.adjust_external_memory(delta);
            tracing::trace!(delta, "flushed memory-pressure adjustment");
        }
    }

    /// Net bytes attributed to live handles (flushed or not).
    pub(crate) fn tracked(&self) -> i64 {
        self.tracked.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> i64 {
        self.pending.load(Ordering::Acquire)
    }
}
