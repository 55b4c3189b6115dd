//! The two-sided disposal handshake between host and engine collectors.
//!
//! Neither collector can see the other's references, so neither may free a
//! proxy unilaterally. The coordinator decides, per handle, between three
//! outcomes:
//!
//! - release now: no wrapper and no reachable bound object, so the slot is
//!   finalized and cached immediately;
//! - defer weak: the host side let go but the native side may still reach
//!   the value, so the native handle is made weak and the slot waits;
//! - wait for native: the engine's collector confirms unreachability via
//!   [`DisposalCoordinator::on_native_collect`], and only then does the
//!   slot actually clear.
//!
//! Host finalizers never call into the engine. They enqueue the record
//! here; the queue drains at the next native-call boundary, the same
//! process-on-next-entry discipline the destruction queue uses for handles
//! dropped off-thread.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::EngineContext;
use crate::proxy::{DisposedState, ProxyRecord};

pub struct DisposalCoordinator {
    /// Records whose tracked wrapper was finalized, awaiting triage at the
    /// next native-call boundary.
    finalized: Mutex<VecDeque<Arc<ProxyRecord>>>,

    /// Fast check for pending items (avoids lock acquisition on hot path).
    pending_count: AtomicU64,

    /// Weak proxies waiting for the engine's collector to confirm.
    awaiting_native: Mutex<HashMap<i32, Arc<ProxyRecord>>>,
}

impl DisposalCoordinator {
    pub(crate) fn new() -> DisposalCoordinator {
        DisposalCoordinator {
            finalized: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
            awaiting_native: Mutex::new(HashMap::new()),
        }
    }

    /// Flag a record whose wrapper the host collector finalized.
    ///
    /// Called from `Drop`, possibly on a finalizer thread: only queues,
    /// never touches the engine.
    pub(crate) fn defer_finalized(&self, record: Arc<ProxyRecord>) {
        self.finalized
            .lock()
            .expect("finalized queue poisoned")
            .push_back(record);
        self.pending_count.fetch_add(1, Ordering::Release);
        tracing::trace!(
            pending = self.pending_len(),
            "deferred wrapper finalization"
        );
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn pending_len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    /// Number of weak proxies awaiting the native collector.
    pub fn awaiting_native_len(&self) -> usize {
        self.awaiting_native
            .lock()
            .expect("awaiting-native map poisoned")
            .len()
    }

    /// Triage every queued finalization. Called on entry to each native
    /// call, where talking to the engine is safe.
    pub(crate) fn process_pending(&self, ctx: &EngineContext) {
        if !self.has_pending() {
            return;
        }

        let drained: VecDeque<Arc<ProxyRecord>> = {
            let mut queue = self.finalized.lock().expect("finalized queue poisoned");
            std::mem::take(&mut *queue)
        };
        if drained.is_empty() {
            return;
        }
        self.pending_count
            .fetch_sub(drained.len() as u64, Ordering::Release);

        for record in drained {
            if record.state() == DisposedState::Cached {
                continue;
            }
            if ctx.is_dispose_ready(&record) {
                self.final_dispose(ctx, &record);
            } else {
                self.defer_weak(ctx, &record);
            }
        }
    }

    /// Explicit-dispose path (a `ValueHandle::dispose` already zeroed the
    /// managed count and marked the record `PendingDisposal`).
    pub(crate) fn request_dispose(&self, ctx: &EngineContext, record: &Arc<ProxyRecord>) {
        let slot = record.object_slot();
        if slot >= 0 && !ctx.weak_table().is_stale(slot) {
            // A reachable bound object (or placeholder) still occupies the
            // slot; the native side may still reference it.
            self.defer_weak(ctx, record);
        } else if record.is_weak() {
            // Already weak: the native collector has the last word.
            record.set_state(DisposedState::Weak);
            self.awaiting_native
                .lock()
                .expect("awaiting-native map poisoned")
                .insert(record.id(), record.clone());
        } else {
            self.final_dispose(ctx, record);
        }
    }

    /// The engine's collector confirmed a weak handle is unreachable.
    pub(crate) fn on_native_collect(&self, ctx: &EngineContext, id: i32) {
        let record = {
            let mut awaiting = self
                .awaiting_native
                .lock()
                .expect("awaiting-native map poisoned");
            awaiting.remove(&id)
        }
        .or_else(|| ctx.registry().lookup(id));

        let Some(record) = record else {
            tracing::trace!(proxy_id = id, "native collect for unknown proxy");
            return;
        };
        if record.state() == DisposedState::Cached {
            return;
        }
        let slot = record.object_slot();
        if record.ref_count() > 0 || (slot >= 0 && ctx.weak_table().has_live_object(slot)) {
            // Host code re-kept the proxy (or resurrected its wrapper)
            // after it went weak; revive it.
            record.clear_weak();
            record.set_state(DisposedState::Active);
            tracing::debug!(proxy_id = id, "weak proxy revived by host reference");
            return;
        }
        self.final_dispose(ctx, &record);
    }

    /// Make the native handle weak and wait for `on_native_collect`.
    fn defer_weak(&self, ctx: &EngineContext, record: &Arc<ProxyRecord>) {
        if record.is_weak() {
            record.set_state(DisposedState::Weak);
            return;
        }
        ctx.engine().make_weak(record.id());
        record.set_weak();
        record.set_state(DisposedState::Weak);
        self.awaiting_native
            .lock()
            .expect("awaiting-native map poisoned")
            .insert(record.id(), record.clone());
        tracing::debug!(
            proxy_id = record.id(),
            "native handle made weak, awaiting engine collector"
        );
    }

    /// Clear the slot: engine finalizes the proxy, registry, weak table and
    /// accessor entries are dropped, and the slot id is cached for reuse.
    fn final_dispose(&self, ctx: &EngineContext, record: &Arc<ProxyRecord>) {
        let id = record.id();
        record.set_state(DisposedState::PendingDisposal);
        ctx.engine().dispose_proxy(id);

        let slot = record.object_slot();
        if slot >= 0 {
            ctx.weak_table().remove(slot);
            ctx.accessors().clear_slot(slot);
        }
        ctx.registry().clear(id);
        record.zero_refs();
        record.set_state(DisposedState::Cached);
        self.awaiting_native
            .lock()
            .expect("awaiting-native map poisoned")
            .remove(&id);
        tracing::debug!(proxy_id = id, "proxy finally disposed, slot cached");
    }
}

impl std::fmt::Debug for DisposalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalCoordinator")
            .field("pending", &self.pending_len())
            .field("awaiting_native", &self.awaiting_native_len())
            .finish()
    }
}
