//! ValueHandle: the unit of day-to-day handle passing inside the engine
//! boundary.
//!
//! A handle is a cheap clonable reference to one proxy record. It is not
//! independently tracked by the host collector; code that needs a value to
//! outlive the current call promotes it with `keep_alive()` (see
//! [`crate::tracked`]).
//!
//! ## First-handle disposal contract
//!
//! Handles returned by engine operations are "first-time" handles: whoever
//! creates one for intermediate use and does not propagate it further must
//! dispose it before returning. `pass_on()` transfers that responsibility
//! up the call chain. Property writes and calls honor the same contract
//! from the other side: any first-time handle passed in as a value is
//! disposed by the callee once the engine call returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::accessor::{self, GetterFn, SetterFn};
use crate::engine::{ArgValue, EngineContext, PropertyKey};
use crate::error::HandleError;
use crate::proxy::{DisposedState, ProxyRecord};
use crate::value::{self, Coerced, CoerceTarget, JsValueKind, RawValue};
use crate::weak_table::BoundObject;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// A value being written into a property or passed as a call argument.
///
/// Raw values marshal directly; handles marshal by proxy id; anything else
/// goes through the engine's object binder.
pub enum PropertyValue {
    Raw(RawValue),
    Handle(ValueHandle),
    Object(BoundObject),
}

impl From<RawValue> for PropertyValue {
    fn from(value: RawValue) -> Self {
        PropertyValue::Raw(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Raw(RawValue::Bool(value))
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Raw(RawValue::Number(value as f64))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Raw(RawValue::Number(value))
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Raw(RawValue::Str(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Raw(RawValue::Str(value))
    }
}

impl From<ValueHandle> for PropertyValue {
    fn from(handle: ValueHandle) -> Self {
        PropertyValue::Handle(handle)
    }
}

/// Reference to one proxy record. `Empty -> Bound -> (dispose) -> Empty`.
pub struct ValueHandle {
    ctx: Arc<EngineContext>,
    record: Option<Arc<ProxyRecord>>,
    /// Identity of this exact instance, used for the locked-instance check.
    instance_id: u64,
    /// Freshly created by an engine operation and not yet passed on.
    first: bool,
    /// Memory pressure charged when this handle was created.
    pressure: i64,
}

impl ValueHandle {
    pub fn empty(ctx: Arc<EngineContext>) -> ValueHandle {
        ValueHandle {
            ctx,
            record: None,
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            first: false,
            pressure: 0,
        }
    }

    /// Bind a handle to a record: increments the managed count and charges
    /// memory pressure once for this handle creation.
    pub(crate) fn bind(
        ctx: Arc<EngineContext>,
        record: Arc<ProxyRecord>,
        first: bool,
    ) -> ValueHandle {
        let cost = record.pressure_cost();
        record.retain();
        ctx.pressure.record(cost);
        ValueHandle {
            ctx,
            record: Some(record),
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            first,
            pressure: cost,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_none()
    }

    /// Proxy id, or -1 for an empty handle.
    pub fn id(&self) -> i32 {
        self.record.as_ref().map(|r| r.id()).unwrap_or(-1)
    }

    pub fn engine_id(&self) -> i32 {
        self.ctx.engine_id()
    }

    pub fn kind(&self) -> JsValueKind {
        self.record
            .as_ref()
            .map(|r| r.kind())
            .unwrap_or(JsValueKind::Uninitialized)
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub(crate) fn record(&self) -> Option<&Arc<ProxyRecord>> {
        self.record.as_ref()
    }

    pub(crate) fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Whether this handle is still a first-time handle whose disposal is
    /// this code path's responsibility.
    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Transfer disposal responsibility to whatever consumes this handle
    /// next. Used at call-site boundaries when returning a handle up the
    /// chain.
    pub fn pass_on(mut self) -> ValueHandle {
        self.first = false;
        self
    }

    /// True iff this instance is the exact one embedded in a live tracked
    /// wrapper. Copies of that handle are never locked.
    pub fn is_locked(&self) -> bool {
        self.record
            .as_ref()
            .map(|r| r.is_locked_instance(self.instance_id))
            .unwrap_or(false)
    }

    pub fn can_dispose(&self) -> bool {
        !self.is_locked()
    }

    /// Dispose this handle.
    ///
    /// - Empty handles: no-op (double dispose is idempotent).
    /// - The canonical instance inside a live wrapper: contract violation,
    ///   fails with [`HandleError::DisposeLocked`].
    /// - A copy while a wrapper is alive: releases only this handle's
    ///   reference; the wrapper's authoritative handle is unaffected.
    /// - Otherwise: authoritative teardown. Marks the record
    ///   `PendingDisposal`, zeroes the managed count, and hands the slot to
    ///   the disposal coordinator (which may finalize now or defer to the
    ///   engine's collector).
    pub fn dispose(&mut self) -> Result<(), HandleError> {
        let Some(record) = self.record.clone() else {
            return Ok(());
        };

        if record.is_locked_instance(self.instance_id) {
            return Err(HandleError::DisposeLocked {
                engine_id: self.ctx.engine_id(),
                proxy_id: record.id(),
                ref_count: record.ref_count(),
            });
        }

        self.record = None;
        self.ctx.pressure.record(-self.pressure);
        self.pressure = 0;
        self.first = false;

        if record.state() == DisposedState::Cached {
            // Another handle already finalized the slot.
            return Ok(());
        }

        if record.has_live_wrapper() {
            // Copies release their own reference only.
            record.release();
            return Ok(());
        }

        tracing::trace!(
            engine_id = self.ctx.engine_id(),
            proxy_id = record.id(),
            "disposing handle"
        );
        record.set_state(DisposedState::PendingDisposal);
        record.zero_refs();
        self.ctx.disposal.request_dispose(&self.ctx, &record);
        Ok(())
    }

    fn require_bound(&self) -> Result<&Arc<ProxyRecord>, HandleError> {
        let record = self.record.as_ref().ok_or(HandleError::Empty)?;
        if record.state() == DisposedState::Cached {
            return Err(HandleError::Stale {
                engine_id: self.ctx.engine_id(),
                proxy_id: record.id(),
            });
        }
        Ok(record)
    }

    fn require_object(&self) -> Result<&Arc<ProxyRecord>, HandleError> {
        let record = self.require_bound()?;
        if !record.kind().is_object_family() {
            return Err(HandleError::NotAnObject {
                kind: record.kind(),
                engine_id: self.ctx.engine_id(),
                proxy_id: record.id(),
            });
        }
        Ok(record)
    }

    // ---- value access ----------------------------------------------------

    /// Current value, refreshed from the engine.
    ///
    /// Bound managed objects and typed argument wrappers answer from the
    /// cached value directly; everything else round-trips through
    /// `update_value`.
    pub fn value(&self) -> Result<RawValue, HandleError> {
        let record = self.require_bound()?;
        if record.value_is_direct() {
            return Ok(record.cached_value());
        }
        self.ctx.enter_native_call();
        let raw = self.ctx.engine().update_value(record.id())?;
        record.store_value(&raw);
        Ok(raw)
    }

    /// Last fetched value.
    ///
    /// Only re-fetches while the cached type is still uninitialized. After
    /// that it deliberately does not reflect engine-side mutation since the
    /// previous read; call [`ValueHandle::value`] when freshness matters.
    pub fn last_value(&self) -> Result<RawValue, HandleError> {
        let record = self.require_bound()?;
        if record.kind() == JsValueKind::Uninitialized {
            return self.value();
        }
        Ok(record.cached_value())
    }

    pub fn is_undefined(&self) -> bool {
        self.kind() == JsValueKind::Undefined
    }

    pub fn is_null(&self) -> bool {
        self.kind() == JsValueKind::Null
    }

    pub fn is_object_type(&self) -> bool {
        self.kind().is_object_family()
    }

    /// Convert a script-level error tag into a real failure. Non-error
    /// handles pass through untouched.
    pub fn throw_on_error(&self) -> Result<&ValueHandle, HandleError> {
        let record = self.require_bound()?;
        let kind = record.kind();
        if !kind.is_error() {
            return Ok(self);
        }
        let message = match record.cached_value() {
            RawValue::Error(_, message) => message,
            other => format!("{other:?}"),
        };
        Err(HandleError::Script {
            kind,
            message,
            engine_id: self.ctx.engine_id(),
            proxy_id: record.id(),
        })
    }

    // ---- conversions (all through value::coerce) -------------------------

    pub fn as_bool(&self) -> Result<bool, HandleError> {
        match value::coerce(&self.value()?, CoerceTarget::Bool)? {
            Coerced::Bool(b) => Ok(b),
            _ => unreachable!(),
        }
    }

    pub fn as_f64(&self) -> Result<f64, HandleError> {
        match value::coerce(&self.value()?, CoerceTarget::Number)? {
            Coerced::Number(n) => Ok(n),
            _ => unreachable!(),
        }
    }

    /// 32-bit conversion with script wrap-around semantics (modulo 2^32
    /// into the signed range), not a saturating cast.
    pub fn as_i32(&self) -> Result<i32, HandleError> {
        match value::coerce(&self.value()?, CoerceTarget::Int32)? {
            Coerced::Int(i) => Ok(i),
            _ => unreachable!(),
        }
    }

    pub fn as_string(&self) -> Result<String, HandleError> {
        match value::coerce(&self.value()?, CoerceTarget::Text)? {
            Coerced::Text(s) => Ok(s),
            _ => unreachable!(),
        }
    }

    /// Numeric milliseconds since the epoch, interpreted as a UTC offset
    /// from 1970-01-01.
    pub fn as_date(&self) -> Result<SystemTime, HandleError> {
        value::epoch_millis_to_time(self.as_f64()?)
    }

    // ---- property operations ---------------------------------------------

    pub fn get_property(&self, name: &str) -> Result<ValueHandle, HandleError> {
        validate_name(name)?;
        self.get_by_key(PropertyKey::Name(name))
    }

    pub fn get_property_index(&self, index: u32) -> Result<ValueHandle, HandleError> {
        self.get_by_key(PropertyKey::Index(index))
    }

    fn get_by_key(&self, key: PropertyKey<'_>) -> Result<ValueHandle, HandleError> {
        let record = self.require_object()?;
        self.ctx.enter_native_call();
        let novel = self.ctx.engine().get_property(record.id(), key)?;
        Ok(self.ctx.adopt(novel))
    }

    pub fn set_property(
        &self,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), HandleError> {
        let value = value.into();
        if let Err(err) = validate_name(name) {
            dispose_first_time(vec![value]);
            return Err(err);
        }
        self.set_by_key(PropertyKey::Name(name), value)
    }

    pub fn set_property_index(
        &self,
        index: u32,
        value: impl Into<PropertyValue>,
    ) -> Result<(), HandleError> {
        self.set_by_key(PropertyKey::Index(index), value.into())
    }

    fn set_by_key(&self, key: PropertyKey<'_>, value: PropertyValue) -> Result<(), HandleError> {
        let record = match self.require_object() {
            Ok(record) => record,
            Err(err) => {
                dispose_first_time(vec![value]);
                return Err(err);
            }
        };
        let mut dispose_after = Vec::new();
        let mut hold = Vec::new();
        let arg = match self.marshal(value, &mut dispose_after, &mut hold) {
            Ok(arg) => arg,
            Err(err) => {
                dispose_temps(dispose_after);
                return Err(err);
            }
        };

        self.ctx.enter_native_call();
        let result = self.ctx.engine().set_property(record.id(), key, arg);
        dispose_temps(dispose_after);
        drop(hold);
        result
    }

    pub fn delete_property(&self, name: &str) -> Result<bool, HandleError> {
        validate_name(name)?;
        let record = self.require_object()?;
        self.ctx.enter_native_call();
        self.ctx
            .engine()
            .delete_property(record.id(), PropertyKey::Name(name))
    }

    pub fn delete_property_index(&self, index: u32) -> Result<bool, HandleError> {
        let record = self.require_object()?;
        self.ctx.enter_native_call();
        self.ctx
            .engine()
            .delete_property(record.id(), PropertyKey::Index(index))
    }

    /// All property names, prototype chain included.
    pub fn get_property_names(&self) -> Result<Vec<String>, HandleError> {
        self.property_names(false)
    }

    /// Own property names only.
    pub fn get_own_property_names(&self) -> Result<Vec<String>, HandleError> {
        self.property_names(true)
    }

    /// Fetch the native name array, iterate by index, and dispose every
    /// per-item handle plus the array handle itself. No handle crosses this
    /// boundary.
    fn property_names(&self, own_only: bool) -> Result<Vec<String>, HandleError> {
        let record = self.require_object()?;
        self.ctx.enter_native_call();
        let mut array = self
            .ctx
            .adopt(self.ctx.engine().get_property_names(record.id(), own_only)?);

        let collected = (|| {
            let len = self.ctx.engine().array_length(array.id())?;
            let mut names = Vec::with_capacity(len as usize);
            for index in 0..len {
                let mut item = self.ctx.adopt(
                    self.ctx
                        .engine()
                        .get_property(array.id(), PropertyKey::Index(index))?,
                );
                let text = item.as_string();
                item.dispose()?;
                names.push(text?);
            }
            Ok(names)
        })();

        array.dispose()?;
        collected
    }

    pub fn prototype(&self) -> Result<ValueHandle, HandleError> {
        let record = self.require_object()?;
        self.ctx.enter_native_call();
        let novel = self.ctx.engine().get_prototype(record.id())?;
        Ok(self.ctx.adopt(novel))
    }

    // ---- calls -----------------------------------------------------------

    /// Call this handle as a function with an explicit `this`.
    ///
    /// First-time argument handles are disposed once the call returns; the
    /// result is a fresh handle the caller now owns.
    pub fn call_with(
        &self,
        this: Option<&ValueHandle>,
        args: Vec<PropertyValue>,
    ) -> Result<ValueHandle, HandleError> {
        let record = match self.require_object() {
            Ok(record) => record,
            Err(err) => {
                dispose_first_time(args);
                return Err(err);
            }
        };
        let this_id = match this {
            Some(handle) => match handle.require_bound() {
                Ok(this_record) => Some(this_record.id()),
                Err(err) => {
                    dispose_first_time(args);
                    return Err(err);
                }
            },
            None => None,
        };

        let mut dispose_after = Vec::new();
        let mut hold = Vec::new();
        let marshaled = self.marshal_args(args, &mut dispose_after, &mut hold)?;

        self.ctx.enter_native_call();
        let result = self.ctx.engine().call(record.id(), this_id, &marshaled);
        dispose_temps(dispose_after);
        drop(hold);
        Ok(self.ctx.adopt(result?))
    }

    /// Call this handle as a function with no `this` binding.
    pub fn static_call(&self, args: Vec<PropertyValue>) -> Result<ValueHandle, HandleError> {
        self.call_with(None, args)
    }

    /// Call the named function property with this handle as `this`. The
    /// intermediate function handle is disposed before returning.
    pub fn invoke(
        &self,
        name: &str,
        args: Vec<PropertyValue>,
    ) -> Result<ValueHandle, HandleError> {
        let mut function = self.get_property(name)?;
        let result = function.call_with(Some(self), args);
        function.dispose()?;
        result
    }

    /// Marshal a full argument list. On any failure, every first-time
    /// handle in the list is disposed before the error propagates, whether
    /// it was already marshaled or not: passed-in values are the callee's
    /// to clean up even when the call never reaches the engine.
    fn marshal_args(
        &self,
        args: Vec<PropertyValue>,
        dispose_after: &mut Vec<ValueHandle>,
        hold: &mut Vec<ValueHandle>,
    ) -> Result<Vec<ArgValue>, HandleError> {
        let mut marshaled = Vec::with_capacity(args.len());
        let mut pending = args.into_iter();
        while let Some(value) = pending.next() {
            match self.marshal(value, dispose_after, hold) {
                Ok(arg) => marshaled.push(arg),
                Err(err) => {
                    dispose_temps(std::mem::take(dispose_after));
                    dispose_first_time(pending.collect());
                    return Err(err);
                }
            }
        }
        Ok(marshaled)
    }

    fn marshal(
        &self,
        value: PropertyValue,
        dispose_after: &mut Vec<ValueHandle>,
        hold: &mut Vec<ValueHandle>,
    ) -> Result<ArgValue, HandleError> {
        match value {
            PropertyValue::Raw(raw) => Ok(ArgValue::Raw(raw)),
            PropertyValue::Handle(handle) => {
                let bound = handle.require_bound().map(|record| record.id());
                match bound {
                    Ok(id) => {
                        if handle.is_first() {
                            dispose_after.push(handle);
                        } else {
                            hold.push(handle);
                        }
                        Ok(ArgValue::Proxy(id))
                    }
                    Err(err) => {
                        // A handle that fails to marshal was still passed
                        // by value; a first-time one is ours to dispose.
                        dispose_first_time(vec![PropertyValue::Handle(handle)]);
                        Err(err)
                    }
                }
            }
            PropertyValue::Object(object) => {
                let handle = self.ctx.binder()?.bind(&self.ctx, object)?;
                let id = handle.require_bound()?.id();
                dispose_after.push(handle);
                Ok(ArgValue::Proxy(id))
            }
        }
    }

    // ---- accessors -------------------------------------------------------

    /// Install native getter/setter trampolines for a property.
    ///
    /// Delegates are pinned in the per-engine accessor table for the
    /// lifetime of the bound object's slot; the trampolines convert any
    /// delegate failure or panic into an execution-error value before it
    /// can reach native code.
    pub fn set_accessor(
        &self,
        name: &str,
        getter: Option<GetterFn>,
        setter: Option<SetterFn>,
    ) -> Result<(), HandleError> {
        validate_name(name)?;
        let record = self.require_object()?;
        let slot = if record.object_slot() >= 0 {
            record.object_slot()
        } else {
            let slot = self.ctx.alloc_slot();
            record.set_object_slot(slot);
            slot
        };
        self.ctx
            .accessors()
            .store(slot, name, getter.clone(), setter.clone());

        let getter_tramp = getter.map(accessor::getter_trampoline);
        let setter_tramp = setter.map(accessor::setter_trampoline);
        self.ctx.enter_native_call();
        self.ctx
            .engine()
            .set_accessor(record.id(), name, getter_tramp, setter_tramp)
    }

    // ---- bound objects ---------------------------------------------------

    /// The managed object bound to this proxy's slot.
    ///
    /// If the host collector already reclaimed the wrapper while the slot
    /// is still live, a new wrapper is built through the binder and
    /// re-associated with the same slot id: object identity is slot-scoped,
    /// not instance-scoped.
    pub fn object(&self) -> Result<BoundObject, HandleError> {
        let record = self.require_bound()?;
        let slot = record.object_slot();
        if slot < 0 {
            return Err(HandleError::NotBound {
                engine_id: self.ctx.engine_id(),
                proxy_id: record.id(),
            });
        }
        if let Some(object) = self.ctx.weak_table().get(slot) {
            return Ok(object);
        }

        // Stale wrapper on a live slot: resurrect.
        let fresh = self.ctx.binder()?.wrap(&self.ctx, slot, record.id());
        self.ctx.weak_table().reassociate(slot, &fresh);
        tracing::debug!(
            engine_id = self.ctx.engine_id(),
            proxy_id = record.id(),
            slot,
            "resurrected bound object wrapper"
        );
        Ok(fresh)
    }

    /// Detach the bound managed object from its slot, substituting a
    /// placeholder so still-live native handles do not dangle. Returns the
    /// original object, now unmanaged by the engine.
    pub fn release_managed_object(&self) -> Result<BoundObject, HandleError> {
        let record = self.require_bound()?;
        let slot = record.object_slot();
        if slot < 0 {
            return Err(HandleError::NotBound {
                engine_id: self.ctx.engine_id(),
                proxy_id: record.id(),
            });
        }
        self.ctx.weak_table().release(slot, self.ctx.engine_id())
    }
}

impl Clone for ValueHandle {
    /// Cloning is a new handle creation: the managed count goes up and
    /// memory pressure is charged again. Clones are not first-time handles.
    fn clone(&self) -> ValueHandle {
        match &self.record {
            None => ValueHandle::empty(self.ctx.clone()),
            Some(record) => ValueHandle::bind(self.ctx.clone(), record.clone(), false),
        }
    }
}

impl Drop for ValueHandle {
    /// Implicit drop releases only this handle's reference and pressure.
    /// Never talks to the engine: a handle may be dropped from finalizer
    /// context, and reclamation happens at the next native-call boundary.
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            record.release();
            self.ctx.pressure.record(-self.pressure);
        }
    }
}

impl std::fmt::Debug for ValueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueHandle")
            .field("engine_id", &self.ctx.engine_id())
            .field("proxy_id", &self.id())
            .field("kind", &self.kind())
            .field("first", &self.first)
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), HandleError> {
    if name.trim().is_empty() {
        return Err(HandleError::InvalidPropertyName);
    }
    Ok(())
}

/// Dispose the first-time handles in an unconsumed argument list. Raw
/// values and non-first handles just drop; host objects were never bound.
fn dispose_first_time(values: Vec<PropertyValue>) {
    let mut temps = Vec::new();
    for value in values {
        if let PropertyValue::Handle(handle) = value {
            if handle.is_first() {
                temps.push(handle);
            }
        }
    }
    dispose_temps(temps);
}

fn dispose_temps(temps: Vec<ValueHandle>) {
    for mut temp in temps {
        // First-time temporaries are never locked; failure here would mean
        // a corrupted record, which dispose reports loudly anyway.
        if let Err(err) = temp.dispose() {
            tracing::warn!(error = %err, "failed to dispose call temporary");
        }
    }
}
