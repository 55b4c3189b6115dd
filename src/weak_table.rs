//! Object weak table: slot id -> weak reference to the bound wrapper.
//!
//! Bound managed objects are tracked weakly so the host collector can
//! reclaim a wrapper the moment no host-side path reaches it, even while
//! the native engine still holds the object reachable from script. Two
//! consequences:
//!
//! - A stale entry on a still-Active slot is normal, not an error; reading
//!   the object resurrects a fresh wrapper under the same slot id (object
//!   identity is slot-scoped, not instance-scoped).
//! - Explicitly releasing an object must not leave still-live native
//!   handles dangling, so release swaps in a placeholder that keeps the
//!   slot occupied until the engine confirms collection.
//!
//! Reader/writer lock at table granularity: many readers touch independent
//! slots; only the release swap needs the slot stable.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::error::HandleError;

/// A managed object bound to a proxy slot.
pub type BoundObject = Arc<dyn Any + Send + Sync>;

/// Stand-in installed by [`ObjectWeakTable::release`]: keeps the slot
/// occupied after the real object was handed back to the caller.
pub struct DetachedPlaceholder {
    pub slot_id: i32,
}

enum SlotEntry {
    Live(Weak<dyn Any + Send + Sync>),
    Placeholder(BoundObject),
}

pub struct ObjectWeakTable {
    entries: RwLock<HashMap<i32, SlotEntry>>,
}

impl ObjectWeakTable {
    pub(crate) fn new() -> ObjectWeakTable {
        ObjectWeakTable {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Associate a slot with a wrapper object, tracked weakly.
    pub(crate) fn insert(&self, slot: i32, object: &BoundObject) {
        let mut entries = self.entries.write().expect("object weak table poisoned");
        entries.insert(slot, SlotEntry::Live(Arc::downgrade(object)));
        tracing::trace!(slot, "bound object to slot");
    }

    /// Look up the wrapper for a slot.
    ///
    /// A placeholder counts as the slot's current object; a stale weak
    /// reference yields `None` (resurrection is the caller's business).
    pub fn get(&self, slot: i32) -> Option<BoundObject> {
        let entries = self.entries.read().expect("object weak table poisoned");
        match entries.get(&slot)? {
            SlotEntry::Live(weak) => weak.upgrade(),
            SlotEntry::Placeholder(object) => Some(object.clone()),
        }
    }

    /// Whether the slot has an entry at all (live, stale, or placeholder).
    pub fn contains(&self, slot: i32) -> bool {
        let entries = self.entries.read().expect("object weak table poisoned");
        entries.contains_key(&slot)
    }

    /// True when no reachable object occupies the slot: no entry, or the
    /// weak reference died. A placeholder keeps the slot non-stale.
    pub fn is_stale(&self, slot: i32) -> bool {
        let entries = self.entries.read().expect("object weak table poisoned");
        match entries.get(&slot) {
            None => true,
            Some(SlotEntry::Live(weak)) => weak.strong_count() == 0,
            Some(SlotEntry::Placeholder(_)) => false,
        }
    }

    /// True only for a reachable live object; placeholders do not count.
    pub fn has_live_object(&self, slot: i32) -> bool {
        let entries = self.entries.read().expect("object weak table poisoned");
        matches!(entries.get(&slot), Some(SlotEntry::Live(weak)) if weak.strong_count() > 0)
    }

    pub fn is_placeholder(&self, slot: i32) -> bool {
        let entries = self.entries.read().expect("object weak table poisoned");
        matches!(entries.get(&slot), Some(SlotEntry::Placeholder(_)))
    }

    /// Detach the bound object from its slot, substituting a placeholder
    /// that keeps the slot alive for any still-live native handle.
    ///
    /// Returns the original object, now unmanaged by the engine. Fails if
    /// the slot has no reachable object to release.
    pub(crate) fn release(&self, slot: i32, engine_id: i32) -> Result<BoundObject, HandleError> {
        let mut entries = self.entries.write().expect("object weak table poisoned");
        let original = match entries.get(&slot) {
            Some(SlotEntry::Live(weak)) => weak.upgrade(),
            _ => None,
        };
        let original = original.ok_or(HandleError::NotBound {
            engine_id,
            proxy_id: slot,
        })?;

        let placeholder: BoundObject = Arc::new(DetachedPlaceholder { slot_id: slot });
        entries.insert(slot, SlotEntry::Placeholder(placeholder));
        tracing::debug!(slot, "released managed object, placeholder installed");
        Ok(original)
    }

    /// Re-associate a slot with a freshly resurrected wrapper.
    pub(crate) fn reassociate(&self, slot: i32, object: &BoundObject) {
        let mut entries = self.entries.write().expect("object weak table poisoned");
        entries.insert(slot, SlotEntry::Live(Arc::downgrade(object)));
        tracing::debug!(slot, "resurrected wrapper re-associated with slot");
    }

    /// Drop the slot entirely. Called on final disposal.
    pub(crate) fn remove(&self, slot: i32) {
        let mut entries = self.entries.write().expect("object weak table poisoned");
        entries.remove(&slot);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("object weak table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
