//! Bound managed objects: slot-scoped identity, resurrection, explicit
//! release, and the weak-handle handshake with the engine's collector.

mod common;

use std::sync::Arc;

use common::{MockEngine, ResurrectedWrapper};
use jsbridge::{BoundObject, DetachedPlaceholder, DisposedState, HandleError, RawValue};

struct Widget {
    name: &'static str,
}

#[test]
fn bound_object_round_trips_by_identity() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let handle = ctx.bind_object(object.clone()).unwrap();

    assert!(handle.is_object_type());
    assert_eq!(ctx.weak_table().len(), 1);

    let got = handle.object().unwrap();
    assert!(Arc::ptr_eq(&got, &object));
    assert_eq!(got.downcast_ref::<Widget>().unwrap().name, "gizmo");
}

#[test]
fn bound_object_value_reads_are_direct() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let handle = ctx.bind_object(object).unwrap();

    // Mutating the engine-side value must not show through: bound objects
    // answer from the pinned object marker without a round trip.
    engine.mutate_value(handle.id(), RawValue::Number(99.0));
    assert_eq!(handle.value().unwrap(), RawValue::Object);
}

#[test]
fn stale_wrapper_resurrects_under_same_slot() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let handle = ctx.bind_object(object.clone()).unwrap();
    let id = handle.id();

    // Host collector reclaims the wrapper while the slot stays live.
    drop(object);

    let fresh = handle.object().unwrap();
    let wrapper = fresh.downcast_ref::<ResurrectedWrapper>().unwrap();
    assert_eq!(wrapper.proxy_id, id);

    // The resurrected wrapper now owns the slot: reading again yields the
    // same instance, and the slot is no longer stale.
    let again = handle.object().unwrap();
    assert!(Arc::ptr_eq(&fresh, &again));
}

#[test]
fn object_on_unbound_handle_fails() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let plain = ctx.create_handle(RawValue::Number(1.0)).unwrap();
    assert!(matches!(plain.object(), Err(HandleError::NotBound { .. })));
    assert!(matches!(
        plain.release_managed_object(),
        Err(HandleError::NotBound { .. })
    ));
}

#[test]
fn release_substitutes_placeholder() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let handle = ctx.bind_object(object.clone()).unwrap();

    let released = handle.release_managed_object().unwrap();
    assert!(Arc::ptr_eq(&released, &object));

    // A still-live native handle sees the placeholder, not a dangling slot.
    let current = handle.object().unwrap();
    let placeholder = current.downcast_ref::<DetachedPlaceholder>().unwrap();
    assert!(ctx.weak_table().is_placeholder(placeholder.slot_id));

    // Releasing twice fails: the object is already unmanaged.
    assert!(matches!(
        handle.release_managed_object(),
        Err(HandleError::NotBound { .. })
    ));
}

#[test]
fn dispose_with_reachable_object_defers_to_native_collector() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let mut handle = ctx.bind_object(object.clone()).unwrap();
    let id = handle.id();

    // The bound object is still reachable from the host, so the native
    // handle goes weak instead of being torn down.
    handle.dispose().unwrap();
    assert!(engine.was_weakened(id));
    assert!(!engine.was_disposed(id));
    assert_eq!(ctx.disposal().awaiting_native_len(), 1);

    let record = ctx.registry().lookup(id).unwrap();
    assert_eq!(record.state(), DisposedState::Weak);

    // Collector fires while the object is still alive: revive, not dispose.
    ctx.on_native_collect(id);
    assert!(!engine.was_disposed(id));
    assert_eq!(record.state(), DisposedState::Active);
    assert_eq!(ctx.disposal().awaiting_native_len(), 0);

    // Once the object is gone too, the next confirmation clears the slot.
    drop(object);
    ctx.on_native_collect(id);
    assert!(engine.was_disposed(id));
    assert_eq!(record.state(), DisposedState::Cached);
    assert!(ctx.registry().lookup(id).is_none());
    assert!(ctx.weak_table().is_empty());
}

#[test]
fn wrapper_finalization_with_live_object_goes_weak() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let handle = ctx.bind_object(object.clone()).unwrap();
    let id = handle.id();
    let wrapper = handle.keep_alive().unwrap();

    drop(handle);
    drop(wrapper);
    assert!(ctx.disposal().has_pending());

    // Triage at the next boundary: no handles remain but the bound object
    // is reachable, so the proxy waits on the engine's collector.
    let _other = ctx.create_handle(RawValue::Null).unwrap();
    assert!(engine.was_weakened(id));
    assert!(!engine.was_disposed(id));

    drop(object);
    ctx.on_native_collect(id);
    assert!(engine.was_disposed(id));
}

#[test]
fn set_property_auto_binds_host_objects() {
    let engine = MockEngine::new();
    let ctx = engine.context();
    let parent = ctx.create_handle(RawValue::Object).unwrap();

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    parent
        .set_property("widget", jsbridge::PropertyValue::Object(object.clone()))
        .unwrap();

    // The binder minted a proxy and tracked the object under a slot; the
    // temporary binding handle was disposed, which leaves that proxy weak
    // while the host still reaches the object.
    assert_eq!(ctx.weak_table().len(), 1);
    assert_eq!(engine.weakened.lock().unwrap().len(), 1);
    assert!(engine.disposed.lock().unwrap().is_empty());
}

#[test]
fn native_collect_for_unknown_proxy_is_ignored() {
    let engine = MockEngine::new();
    let ctx = engine.context();

    ctx.on_native_collect(999);
    assert!(!engine.was_disposed(999));
}

#[test]
fn bound_object_lifecycle_nets_zero_memory_pressure() {
    let engine = MockEngine::new();
    let ctx = engine.context();
    assert_eq!(ctx.tracked_memory(), 0);

    let object: BoundObject = Arc::new(Widget { name: "gizmo" });
    let mut handle = ctx.bind_object(object.clone()).unwrap();
    let id = handle.id();
    assert!(ctx.tracked_memory() > 0);

    drop(object);
    handle.dispose().unwrap();
    assert_eq!(ctx.tracked_memory(), 0);
    assert!(engine.was_disposed(id));
}
