//! Per-engine proxy registry: dense id -> record array.
//!
//! Proxy ids are minted by the native engine and used as direct indexes.
//! Steady-state lookups take the shared read path; only growth and slot
//! mutation take the write guard, and growth preserves every existing slot.
//!
//! Growth failure has no recovery path: an out-of-range id after a failed
//! resize is a fatal invariant violation, so this module panics rather than
//! returning an error.

use std::sync::{Arc, RwLock};

use crate::proxy::{DisposedState, ProxyRecord};

const INITIAL_CAPACITY: usize = 64;

pub struct ProxyRegistry {
    slots: RwLock<Vec<Option<Arc<ProxyRecord>>>>,
}

impl ProxyRegistry {
    pub fn new() -> ProxyRegistry {
        let mut slots = Vec::new();
        slots.resize_with(INITIAL_CAPACITY, || None);
        ProxyRegistry {
            slots: RwLock::new(slots),
        }
    }

    /// Register a record at its own id, growing the backing array if the
    /// incoming id exceeds current capacity (at least doubling).
    ///
    /// A slot is only reassigned once its previous record reached `Cached`
    /// with zero references; anything else is an id-reuse invariant break.
    pub fn register(&self, record: Arc<ProxyRecord>) {
        let index = slot_index(record.id());
        let mut slots = self.slots.write().expect("proxy registry poisoned");

        if index >= slots.len() {
            let new_len = (slots.len() * 2).max(index + 1);
            slots.resize_with(new_len, || None);
            tracing::trace!(
                engine_id = record.engine_id(),
                new_len,
                "grew proxy registry"
            );
        }

        if let Some(existing) = &slots[index] {
            assert!(
                existing.state() == DisposedState::Cached && existing.ref_count() == 0,
                "proxy id {} reused while still live (state {:?}, refs {})",
                record.id(),
                existing.state(),
                existing.ref_count(),
            );
        }

        slots[index] = Some(record);
    }

    pub fn lookup(&self, id: i32) -> Option<Arc<ProxyRecord>> {
        if id < 0 {
            return None;
        }
        let slots = self.slots.read().expect("proxy registry poisoned");
        slots.get(id as usize).and_then(|slot| slot.clone())
    }

    /// Clear a slot, returning the record that occupied it.
    pub fn clear(&self, id: i32) -> Option<Arc<ProxyRecord>> {
        let index = slot_index(id);
        let mut slots = self.slots.write().expect("proxy registry poisoned");
        slots.get_mut(index).and_then(|slot| slot.take())
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        let slots = self.slots.read().expect("proxy registry poisoned");
        slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Current backing-array capacity.
    pub fn capacity(&self) -> usize {
        self.slots.read().expect("proxy registry poisoned").len()
    }
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_index(id: i32) -> usize {
    usize::try_from(id).unwrap_or_else(|_| panic!("negative proxy id {id}"))
}

impl std::fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{JsValueKind, RawValue};

    fn record(id: i32) -> Arc<ProxyRecord> {
        Arc::new(ProxyRecord::new(
            id,
            0,
            JsValueKind::Number,
            RawValue::Number(id as f64),
        ))
    }

    #[test]
    fn lookup_after_register() {
        let registry = ProxyRegistry::new();
        let r = record(3);
        registry.register(r.clone());
        let found = registry.lookup(3).unwrap();
        assert!(Arc::ptr_eq(&found, &r));
        assert!(registry.lookup(4).is_none());
        assert!(registry.lookup(-1).is_none());
    }

    #[test]
    fn growth_preserves_existing_slots() {
        let registry = ProxyRegistry::new();
        for id in 0..50 {
            registry.register(record(id));
        }

        registry.register(record(200));
        assert!(registry.capacity() >= 201);

        for id in 0..50 {
            assert_eq!(registry.lookup(id).unwrap().id(), id);
        }
        assert_eq!(registry.lookup(200).unwrap().id(), 200);
    }

    #[test]
    fn clear_empties_slot() {
        let registry = ProxyRegistry::new();
        registry.register(record(7));
        assert_eq!(registry.occupied(), 1);
        let taken = registry.clear(7).unwrap();
        assert_eq!(taken.id(), 7);
        assert!(registry.lookup(7).is_none());
        assert_eq!(registry.occupied(), 0);
    }

    #[test]
    #[should_panic(expected = "reused while still live")]
    fn live_slot_reuse_is_fatal() {
        let registry = ProxyRegistry::new();
        let first = record(5);
        first.retain();
        registry.register(first);
        registry.register(record(5));
    }

    #[test]
    fn cached_slot_may_be_reused() {
        let registry = ProxyRegistry::new();
        let first = record(5);
        first.set_state(DisposedState::Cached);
        registry.register(first);
        registry.register(record(5));
        assert_eq!(registry.lookup(5).unwrap().state(), DisposedState::Active);
    }
}
