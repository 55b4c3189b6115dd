//! Test doubles: an in-memory engine collaborator and object binder.
//!
//! `MockEngine` implements the `NativeEngine` capability contract over a
//! plain map of proxies, mints monotonically increasing proxy ids, and
//! records every `dispose_proxy`/`make_weak`/memory adjustment so tests can
//! assert on the handshake traffic.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use jsbridge::{
    ArgValue, BoundObject, EngineContext, GetterTrampoline, HandleError, JsValueKind,
    NativeEngine, NewProxy, ObjectBinder, PropertyKey, RawValue, SetterTrampoline, ValueHandle,
};

pub type MockFn = Arc<dyn Fn(&[ArgValue]) -> RawValue + Send + Sync>;

/// Run tests with `RUST_LOG=trace` to see the handshake traffic.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct MockProxy {
    kind: JsValueKind,
    value: RawValue,
    props: HashMap<String, (JsValueKind, RawValue)>,
    /// Backing storage for array proxies (property-name lists).
    indexed: Vec<RawValue>,
    func: Option<MockFn>,
    /// Names contributed by the prototype chain.
    proto_names: Vec<String>,
}

impl MockProxy {
    fn new(kind: JsValueKind, value: RawValue) -> MockProxy {
        MockProxy {
            kind,
            value,
            props: HashMap::new(),
            indexed: Vec::new(),
            func: None,
            proto_names: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct MockEngine {
    next_id: AtomicI32,
    proxies: Mutex<HashMap<i32, MockProxy>>,
    func_props: Mutex<HashMap<(i32, String), MockFn>>,
    accessors: Mutex<HashMap<(i32, String), (Option<GetterTrampoline>, Option<SetterTrampoline>)>>,
    pub disposed: Mutex<Vec<i32>>,
    pub weakened: Mutex<Vec<i32>>,
    pub external_memory: AtomicI64,
}

impl MockEngine {
    pub fn new() -> Arc<MockEngine> {
        init_tracing();
        Arc::new(MockEngine::default())
    }

    /// Build an engine context wired to this mock plus the mock binder.
    pub fn context(self: &Arc<Self>) -> Arc<EngineContext> {
        EngineContext::with_binder(0, self.clone(), Arc::new(MockBinder))
    }

    /// Force the next minted proxy id (simulates sparse engine ids).
    pub fn set_next_id(&self, id: i32) {
        self.next_id.store(id, Ordering::SeqCst);
    }

    pub fn live_proxies(&self) -> usize {
        self.proxies.lock().unwrap().len()
    }

    pub fn was_disposed(&self, id: i32) -> bool {
        self.disposed.lock().unwrap().contains(&id)
    }

    pub fn was_weakened(&self, id: i32) -> bool {
        self.weakened.lock().unwrap().contains(&id)
    }

    /// Mutate a proxy's value behind the handle's back, as a script write
    /// would.
    pub fn mutate_value(&self, id: i32, value: RawValue) {
        let mut proxies = self.proxies.lock().unwrap();
        let proxy = proxies.get_mut(&id).expect("unknown proxy");
        proxy.value = value;
    }

    /// Install a callable property on an object proxy.
    pub fn define_function_prop(&self, parent: i32, name: &str, f: MockFn) {
        self.func_props
            .lock()
            .unwrap()
            .insert((parent, name.to_string()), f);
    }

    /// Names the prototype chain would contribute for a proxy.
    pub fn set_proto_names(&self, id: i32, names: &[&str]) {
        let mut proxies = self.proxies.lock().unwrap();
        let proxy = proxies.get_mut(&id).expect("unknown proxy");
        proxy.proto_names = names.iter().map(|n| n.to_string()).collect();
    }

    fn mint(&self, kind: JsValueKind, value: RawValue) -> NewProxy {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.proxies
            .lock()
            .unwrap()
            .insert(id, MockProxy::new(kind, value.clone()));
        NewProxy {
            id,
            kind,
            value,
            object_slot: -1,
        }
    }

    fn resolve_arg(&self, arg: &ArgValue) -> (JsValueKind, RawValue) {
        match arg {
            ArgValue::Raw(raw) => (raw.kind(), raw.clone()),
            ArgValue::Proxy(id) => {
                let proxies = self.proxies.lock().unwrap();
                let proxy = proxies.get(id).expect("unknown proxy argument");
                (proxy.kind, proxy.value.clone())
            }
        }
    }
}

impl NativeEngine for MockEngine {
    fn create_proxy(&self, value: RawValue) -> Result<NewProxy, HandleError> {
        Ok(self.mint(value.kind(), value))
    }

    fn dispose_proxy(&self, id: i32) {
        self.proxies.lock().unwrap().remove(&id);
        self.disposed.lock().unwrap().push(id);
    }

    fn make_weak(&self, id: i32) {
        self.weakened.lock().unwrap().push(id);
    }

    fn update_value(&self, id: i32) -> Result<RawValue, HandleError> {
        let proxies = self.proxies.lock().unwrap();
        proxies
            .get(&id)
            .map(|p| p.value.clone())
            .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))
    }

    fn get_property(&self, id: i32, key: PropertyKey<'_>) -> Result<NewProxy, HandleError> {
        match key {
            PropertyKey::Name(name) => {
                let accessor = self
                    .accessors
                    .lock()
                    .unwrap()
                    .get(&(id, name.to_string()))
                    .and_then(|(getter, _)| getter.clone());
                if let Some(getter) = accessor {
                    let value = getter();
                    return Ok(self.mint(value.kind(), value));
                }

                let func = self
                    .func_props
                    .lock()
                    .unwrap()
                    .get(&(id, name.to_string()))
                    .cloned();
                if let Some(func) = func {
                    let novel = self.mint(JsValueKind::Function, RawValue::Object);
                    self.proxies
                        .lock()
                        .unwrap()
                        .get_mut(&novel.id)
                        .unwrap()
                        .func = Some(func);
                    return Ok(novel);
                }

                let stored = {
                    let proxies = self.proxies.lock().unwrap();
                    let proxy = proxies
                        .get(&id)
                        .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
                    proxy.props.get(name).cloned()
                };
                match stored {
                    Some((kind, value)) => Ok(self.mint(kind, value)),
                    None => Ok(self.mint(JsValueKind::Undefined, RawValue::Undefined)),
                }
            }
            PropertyKey::Index(index) => {
                let stored = {
                    let proxies = self.proxies.lock().unwrap();
                    let proxy = proxies
                        .get(&id)
                        .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
                    proxy.indexed.get(index as usize).cloned()
                };
                match stored {
                    Some(value) => Ok(self.mint(value.kind(), value)),
                    None => Ok(self.mint(JsValueKind::Undefined, RawValue::Undefined)),
                }
            }
        }
    }

    fn set_property(
        &self,
        id: i32,
        key: PropertyKey<'_>,
        value: ArgValue,
    ) -> Result<(), HandleError> {
        let (kind, raw) = self.resolve_arg(&value);
        match key {
            PropertyKey::Name(name) => {
                let accessor = self
                    .accessors
                    .lock()
                    .unwrap()
                    .get(&(id, name.to_string()))
                    .and_then(|(_, setter)| setter.clone());
                if let Some(setter) = accessor {
                    setter(raw);
                    return Ok(());
                }
                let mut proxies = self.proxies.lock().unwrap();
                let proxy = proxies
                    .get_mut(&id)
                    .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
                proxy.props.insert(name.to_string(), (kind, raw));
                Ok(())
            }
            PropertyKey::Index(index) => {
                let mut proxies = self.proxies.lock().unwrap();
                let proxy = proxies
                    .get_mut(&id)
                    .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
                let index = index as usize;
                if proxy.indexed.len() <= index {
                    proxy.indexed.resize(index + 1, RawValue::Undefined);
                }
                proxy.indexed[index] = raw;
                Ok(())
            }
        }
    }

    fn delete_property(&self, id: i32, key: PropertyKey<'_>) -> Result<bool, HandleError> {
        let mut proxies = self.proxies.lock().unwrap();
        let proxy = proxies
            .get_mut(&id)
            .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
        match key {
            PropertyKey::Name(name) => Ok(proxy.props.remove(name).is_some()),
            PropertyKey::Index(index) => {
                let index = index as usize;
                if index < proxy.indexed.len() {
                    proxy.indexed[index] = RawValue::Undefined;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn call(
        &self,
        id: i32,
        _this: Option<i32>,
        args: &[ArgValue],
    ) -> Result<NewProxy, HandleError> {
        let func = {
            let proxies = self.proxies.lock().unwrap();
            let proxy = proxies
                .get(&id)
                .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
            proxy.func.clone()
        };
        let func =
            func.ok_or_else(|| HandleError::Engine(format!("proxy {id} is not callable")))?;
        let result = func(args);
        Ok(self.mint(result.kind(), result))
    }

    fn get_prototype(&self, _id: i32) -> Result<NewProxy, HandleError> {
        Ok(self.mint(JsValueKind::Object, RawValue::Object))
    }

    fn get_property_names(&self, id: i32, own_only: bool) -> Result<NewProxy, HandleError> {
        let names: Vec<String> = {
            let proxies = self.proxies.lock().unwrap();
            let proxy = proxies
                .get(&id)
                .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))?;
            let mut names: Vec<String> = proxy.props.keys().cloned().collect();
            names.sort();
            if !own_only {
                names.extend(proxy.proto_names.iter().cloned());
            }
            names
        };
        let novel = self.mint(JsValueKind::Array, RawValue::Object);
        self.proxies
            .lock()
            .unwrap()
            .get_mut(&novel.id)
            .unwrap()
            .indexed = names.into_iter().map(RawValue::Str).collect();
        Ok(novel)
    }

    fn array_length(&self, id: i32) -> Result<u32, HandleError> {
        let proxies = self.proxies.lock().unwrap();
        proxies
            .get(&id)
            .map(|p| p.indexed.len() as u32)
            .ok_or_else(|| HandleError::Engine(format!("unknown proxy {id}")))
    }

    fn set_accessor(
        &self,
        id: i32,
        name: &str,
        getter: Option<GetterTrampoline>,
        setter: Option<SetterTrampoline>,
    ) -> Result<(), HandleError> {
        self.accessors
            .lock()
            .unwrap()
            .insert((id, name.to_string()), (getter, setter));
        Ok(())
    }

    fn adjust_external_memory(&self, delta: i64) {
        self.external_memory.fetch_add(delta, Ordering::SeqCst);
    }
}

/// Binder double: binds through the engine context and resurrects with a
/// marker wrapper tests can downcast.
pub struct MockBinder;

pub struct ResurrectedWrapper {
    pub slot_id: i32,
    pub proxy_id: i32,
}

impl ObjectBinder for MockBinder {
    fn bind(
        &self,
        ctx: &Arc<EngineContext>,
        object: BoundObject,
    ) -> Result<ValueHandle, HandleError> {
        ctx.bind_object(object)
    }

    fn wrap(&self, _ctx: &Arc<EngineContext>, slot_id: i32, proxy_id: i32) -> BoundObject {
        Arc::new(ResurrectedWrapper { slot_id, proxy_id })
    }
}
