//! Proxy records: the per-slot state shared by every handle to one JS value.
//!
//! A [`ProxyRecord`] mirrors one native-side proxy. The native engine owns
//! the underlying JS value; the record only tracks what the managed side
//! knows about it: the value-type tag, a cached raw value, the managed
//! reference count, and the disposal state machine the two collectors
//! negotiate through.
//!
//! Fields that the host finalizer thread or the engine's collection
//! callback may touch are atomics, so flagging intent never takes a lock.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::{Mutex, Weak};

use crate::tracked::TrackedHandle;
use crate::value::{JsValueKind, RawValue};

/// Disposal state machine for one registry slot.
///
/// `Active -> PendingDisposal -> Cached` is the direct path when no native
/// references remain. `Active -> Weak -> Cached` is the deferred path: the
/// host side has let go, but the engine's own collector has not yet
/// confirmed the value is unreachable from script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisposedState {
    Active = 0,
    PendingDisposal,
    Weak,
    Cached,
}

impl DisposedState {
    fn from_u8(tag: u8) -> DisposedState {
        match tag {
            1 => DisposedState::PendingDisposal,
            2 => DisposedState::Weak,
            3 => DisposedState::Cached,
            _ => DisposedState::Active,
        }
    }
}

/// Bookkeeping for the at-most-one tracked wrapper attached to a record.
///
/// `canonical_handle` is the instance id of the ValueHandle physically
/// embedded in the wrapper; that exact instance is "locked" and refuses
/// direct disposal while the wrapper is alive.
#[derive(Default)]
pub(crate) struct WrapperSlot {
    pub(crate) canonical_handle: Option<u64>,
    pub(crate) wrapper: Weak<TrackedHandle>,
}

/// Managed-side state for one native proxy.
pub struct ProxyRecord {
    id: i32,
    engine_id: i32,
    value_type: AtomicU8,
    managed_ref_count: AtomicI32,
    object_slot_id: AtomicI32,
    disposed_state: AtomicU8,
    is_weak: AtomicBool,
    /// Bound objects and typed argument wrappers answer value reads from
    /// the cache without a native round trip.
    value_is_direct: AtomicBool,
    cached: Mutex<RawValue>,
    wrapper: Mutex<WrapperSlot>,
}

impl ProxyRecord {
    pub(crate) fn new(id: i32, engine_id: i32, kind: JsValueKind, value: RawValue) -> ProxyRecord {
        ProxyRecord {
            id,
            engine_id,
            value_type: AtomicU8::new(kind as u8),
            managed_ref_count: AtomicI32::new(0),
            object_slot_id: AtomicI32::new(-1),
            disposed_state: AtomicU8::new(DisposedState::Active as u8),
            is_weak: AtomicBool::new(false),
            value_is_direct: AtomicBool::new(false),
            cached: Mutex::new(value),
            wrapper: Mutex::new(WrapperSlot::default()),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn engine_id(&self) -> i32 {
        self.engine_id
    }

    pub fn kind(&self) -> JsValueKind {
        JsValueKind::from_u8(self.value_type.load(Ordering::Acquire))
    }

    pub fn ref_count(&self) -> i32 {
        self.managed_ref_count.load(Ordering::Acquire)
    }

    pub fn state(&self) -> DisposedState {
        DisposedState::from_u8(self.disposed_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: DisposedState) {
        self.disposed_state.store(state as u8, Ordering::Release);
    }

    pub fn is_weak(&self) -> bool {
        self.is_weak.load(Ordering::Acquire)
    }

    pub(crate) fn set_weak(&self) {
        self.is_weak.store(true, Ordering::Release);
    }

    pub(crate) fn clear_weak(&self) {
        self.is_weak.store(false, Ordering::Release);
    }

    /// Managed-object slot bound to this proxy, or -1.
    pub fn object_slot(&self) -> i32 {
        self.object_slot_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_object_slot(&self, slot: i32) {
        self.object_slot_id.store(slot, Ordering::Release);
    }

    pub(crate) fn value_is_direct(&self) -> bool {
        self.value_is_direct.load(Ordering::Acquire)
    }

    pub(crate) fn mark_value_direct(&self) {
        self.value_is_direct.store(true, Ordering::Release);
    }

    /// One more handle references this record.
    pub(crate) fn retain(&self) -> i32 {
        self.managed_ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// One handle let go. Clamped at zero: after an explicit dispose zeroed
    /// the count, stale copies dropping must not drive it negative.
    pub(crate) fn release(&self) -> i32 {
        self.managed_ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            })
            .map(|n| n - 1)
            .unwrap_or(0)
    }

    /// Explicit dispose zeroes the count outright.
    pub(crate) fn zero_refs(&self) {
        self.managed_ref_count.store(0, Ordering::Release);
    }

    pub(crate) fn cached_value(&self) -> RawValue {
        self.cached.lock().expect("proxy value cache poisoned").clone()
    }

    /// Store a freshly fetched value and refresh the type tag.
    ///
    /// The generic `Object` marker never downgrades an existing
    /// object-family tag (the engine reported the precise tag at creation).
    pub(crate) fn store_value(&self, value: &RawValue) {
        let kind = value.kind();
        let keep_tag = kind == JsValueKind::Object && self.kind().is_object_family();
        if !keep_tag {
            self.value_type.store(kind as u8, Ordering::Release);
        }
        *self.cached.lock().expect("proxy value cache poisoned") = value.clone();
    }

    /// Native memory cost attributed to one handle referencing this record.
    ///
    /// Charged once per handle creation, not per logical value: many
    /// handles to one large proxy really do pin that memory from many
    /// places, and the engine's collector should feel it.
    pub(crate) fn pressure_cost(&self) -> i64 {
        let heap = self
            .cached
            .lock()
            .expect("proxy value cache poisoned")
            .heap_size();
        (std::mem::size_of::<ProxyRecord>() + heap) as i64
    }

    pub(crate) fn with_wrapper_slot<R>(&self, f: impl FnOnce(&mut WrapperSlot) -> R) -> R {
        let mut slot = self.wrapper.lock().expect("wrapper slot poisoned");
        f(&mut slot)
    }

    /// True while a tracked wrapper is attached and alive.
    pub fn has_live_wrapper(&self) -> bool {
        self.with_wrapper_slot(|slot| slot.wrapper.strong_count() > 0)
    }

    /// True iff `instance_id` names the exact handle instance embedded in a
    /// live wrapper. Copies of that handle are not locked.
    pub(crate) fn is_locked_instance(&self, instance_id: u64) -> bool {
        self.with_wrapper_slot(|slot| {
            slot.canonical_handle == Some(instance_id) && slot.wrapper.strong_count() > 0
        })
    }
}

impl std::fmt::Debug for ProxyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRecord")
            .field("id", &self.id)
            .field("engine_id", &self.engine_id)
            .field("kind", &self.kind())
            .field("refs", &self.ref_count())
            .field("state", &self.state())
            .field("weak", &self.is_weak())
            .field("object_slot", &self.object_slot())
            .finish()
    }
}
