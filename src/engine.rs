//! Native engine capability contract and per-engine-instance state.
//!
//! The execution engine itself is an external collaborator reached through
//! the [`NativeEngine`] trait; this crate never assumes a concrete engine.
//! Everything that used to be ambient per-engine state in embeddings of
//! this shape (proxy array, accessor table, weak table) lives on an owned
//! [`EngineContext`] instead, so multiple engine instances coexist cleanly.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::accessor::{AccessorTable, GetterTrampoline, SetterTrampoline};
use crate::disposal::DisposalCoordinator;
use crate::error::HandleError;
use crate::handle::ValueHandle;
use crate::memory::MemoryPressure;
use crate::proxy::{DisposedState, ProxyRecord};
use crate::registry::ProxyRegistry;
use crate::value::{JsValueKind, RawValue};
use crate::weak_table::{BoundObject, ObjectWeakTable};

/// Description of a proxy the engine just created or returned.
#[derive(Debug, Clone)]
pub struct NewProxy {
    /// Engine-minted proxy id, used as the registry index.
    pub id: i32,
    /// Precise value-type tag.
    pub kind: JsValueKind,
    /// Current raw value (the `Object` marker for object-family values).
    pub value: RawValue,
    /// Managed-object slot already associated on the native side, or -1.
    pub object_slot: i32,
}

/// Property key: by name or by array index.
#[derive(Debug, Clone, Copy)]
pub enum PropertyKey<'a> {
    Name(&'a str),
    Index(u32),
}

/// Marshaled argument form for `set_property` and calls: either an
/// immediate raw value or an existing proxy by id.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Raw(RawValue),
    Proxy(i32),
}

/// Capability contract the native engine collaborator implements.
///
/// Synchronous, bounded calls only; a stuck native call is outside this
/// core's contract. The engine reports its own collector's decisions back
/// through [`EngineContext::on_native_collect`].
pub trait NativeEngine: Send + Sync {
    fn create_proxy(&self, value: RawValue) -> Result<NewProxy, HandleError>;

    /// Finalize a proxy and cache its slot on the native side.
    fn dispose_proxy(&self, id: i32);

    /// Convert the native handle to weak; the engine's collector may now
    /// reclaim it at any time and will confirm via the collect callback.
    fn make_weak(&self, id: i32);

    /// Re-fetch the proxy's current value.
    fn update_value(&self, id: i32) -> Result<RawValue, HandleError>;

    fn get_property(&self, id: i32, key: PropertyKey<'_>) -> Result<NewProxy, HandleError>;
    fn set_property(
        &self,
        id: i32,
        key: PropertyKey<'_>,
        value: ArgValue,
    ) -> Result<(), HandleError>;
    fn delete_property(&self, id: i32, key: PropertyKey<'_>) -> Result<bool, HandleError>;

    fn call(
        &self,
        id: i32,
        this: Option<i32>,
        args: &[ArgValue],
    ) -> Result<NewProxy, HandleError>;

    fn get_prototype(&self, id: i32) -> Result<NewProxy, HandleError>;

    /// Returns a proxy for a native array of property names.
    fn get_property_names(&self, id: i32, own_only: bool) -> Result<NewProxy, HandleError>;

    fn array_length(&self, id: i32) -> Result<u32, HandleError>;

    fn set_accessor(
        &self,
        id: i32,
        name: &str,
        getter: Option<GetterTrampoline>,
        setter: Option<SetterTrampoline>,
    ) -> Result<(), HandleError>;

    /// Report host-side memory pressure to the engine's collector.
    fn adjust_external_memory(&self, delta: i64);
}

/// Binder collaborator: turns arbitrary host objects into proxies and
/// builds fresh wrapper objects during resurrection.
pub trait ObjectBinder: Send + Sync {
    /// Bind a host object into the engine, yielding a first-time handle.
    fn bind(
        &self,
        ctx: &Arc<EngineContext>,
        object: BoundObject,
    ) -> Result<ValueHandle, HandleError>;

    /// Build a replacement wrapper for a slot whose previous wrapper the
    /// host collector already reclaimed.
    fn wrap(&self, ctx: &Arc<EngineContext>, slot_id: i32, proxy_id: i32) -> BoundObject;
}

/// Per-engine-instance state owner.
///
/// One of these exists per embedded engine instance; handles keep an `Arc`
/// to it, and binding/typing layers reach the registry, weak table, and
/// accessor table through it.
pub struct EngineContext {
    engine_id: i32,
    engine: Arc<dyn NativeEngine>,
    binder: Option<Arc<dyn ObjectBinder>>,
    registry: ProxyRegistry,
    weak_table: ObjectWeakTable,
    accessors: AccessorTable,
    pub(crate) disposal: DisposalCoordinator,
    pub(crate) pressure: MemoryPressure,
    next_slot_id: AtomicI32,
}

impl EngineContext {
    pub fn new(engine_id: i32, engine: Arc<dyn NativeEngine>) -> Arc<EngineContext> {
        Self::with_binder_opt(engine_id, engine, None)
    }

    pub fn with_binder(
        engine_id: i32,
        engine: Arc<dyn NativeEngine>,
        binder: Arc<dyn ObjectBinder>,
    ) -> Arc<EngineContext> {
        Self::with_binder_opt(engine_id, engine, Some(binder))
    }

    fn with_binder_opt(
        engine_id: i32,
        engine: Arc<dyn NativeEngine>,
        binder: Option<Arc<dyn ObjectBinder>>,
    ) -> Arc<EngineContext> {
        Arc::new(EngineContext {
            engine_id,
            engine,
            binder,
            registry: ProxyRegistry::new(),
            weak_table: ObjectWeakTable::new(),
            accessors: AccessorTable::new(),
            disposal: DisposalCoordinator::new(),
            pressure: MemoryPressure::new(),
            next_slot_id: AtomicI32::new(0),
        })
    }

    pub fn engine_id(&self) -> i32 {
        self.engine_id
    }

    pub fn engine(&self) -> &dyn NativeEngine {
        self.engine.as_ref()
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    pub fn weak_table(&self) -> &ObjectWeakTable {
        &self.weak_table
    }

    pub fn accessors(&self) -> &AccessorTable {
        &self.accessors
    }

    pub fn disposal(&self) -> &DisposalCoordinator {
        &self.disposal
    }

    pub(crate) fn binder(&self) -> Result<&Arc<dyn ObjectBinder>, HandleError> {
        self.binder
            .as_ref()
            .ok_or(HandleError::NoBinder(self.engine_id))
    }

    /// Native-call boundary: flush deferred memory pressure and triage any
    /// finalizations queued since the last call. Every operation that talks
    /// to the engine passes through here first.
    pub(crate) fn enter_native_call(&self) {
        self.pressure.flush(self.engine.as_ref());
        self.disposal.process_pending(self);
    }

    /// Asynchronous callback from the engine's collector: a weak handle is
    /// confirmed unreachable in-engine. Wire the engine's weak-callback to
    /// this.
    pub fn on_native_collect(&self, id: i32) {
        self.disposal.on_native_collect(self, id);
    }

    /// Create a handle for a fresh engine value.
    pub fn create_handle(
        self: &Arc<Self>,
        value: RawValue,
    ) -> Result<ValueHandle, HandleError> {
        self.enter_native_call();
        let novel = self.engine.create_proxy(value)?;
        Ok(self.adopt(novel))
    }

    /// Wrap an engine-returned proxy description into a first-time handle,
    /// reusing the live registry record when the engine returned an id we
    /// already track.
    pub(crate) fn adopt(self: &Arc<Self>, novel: NewProxy) -> ValueHandle {
        let record = match self.registry.lookup(novel.id) {
            Some(existing) if existing.state() != DisposedState::Cached => {
                existing.store_value(&novel.value);
                existing
            }
            _ => {
                let record = Arc::new(ProxyRecord::new(
                    novel.id,
                    self.engine_id,
                    novel.kind,
                    novel.value,
                ));
                if novel.object_slot >= 0 {
                    record.set_object_slot(novel.object_slot);
                    record.mark_value_direct();
                }
                self.registry.register(record.clone());
                record
            }
        };
        ValueHandle::bind(self.clone(), record, true)
    }

    /// Bind a managed object to a fresh native proxy and track the object
    /// weakly under a new slot id.
    pub fn bind_object(
        self: &Arc<Self>,
        object: BoundObject,
    ) -> Result<ValueHandle, HandleError> {
        self.enter_native_call();
        let novel = self.engine.create_proxy(RawValue::Object)?;
        let handle = self.adopt(novel);
        let slot = self.alloc_slot();
        let record = handle.record().expect("freshly adopted handle is bound");
        record.set_object_slot(slot);
        record.mark_value_direct();
        self.weak_table.insert(slot, &object);
        tracing::debug!(
            engine_id = self.engine_id,
            proxy_id = record.id(),
            slot,
            "bound managed object"
        );
        Ok(handle)
    }

    pub(crate) fn alloc_slot(&self) -> i32 {
        self.next_slot_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Whether a record can be finally disposed without losing a reachable
    /// value: no managed references remain and no reachable bound object
    /// occupies its slot.
    pub fn is_dispose_ready(&self, record: &ProxyRecord) -> bool {
        if record.ref_count() > 0 {
            return false;
        }
        let slot = record.object_slot();
        slot < 0 || self.weak_table.is_stale(slot)
    }

    /// Net bytes of memory pressure currently attributed to live handles.
    pub fn tracked_memory(&self) -> i64 {
        self.pressure.tracked()
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("engine_id", &self.engine_id)
            .field("registry", &self.registry)
            .field("disposal", &self.disposal)
            .finish()
    }
}
