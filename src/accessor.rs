//! Accessor delegates and the trampolines the native engine invokes.
//!
//! The engine may call an installed getter/setter on whatever thread it
//! chooses, asynchronously relative to host collection. Two rules follow:
//!
//! - Delegates are pinned in a per-engine `(slot, name)` table for the
//!   lifetime of the bound object's slot, so a trampoline can never outlive
//!   the closure it calls into.
//! - Nothing raised inside a delegate may cross the native boundary. The
//!   trampoline catches both `Err` returns and panics and converts them
//!   into an execution-error value the engine understands.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::error::HandleError;
use crate::value::{JsValueKind, RawValue};

/// Host-side getter delegate.
pub type GetterFn = Arc<dyn Fn() -> Result<RawValue, HandleError> + Send + Sync>;

/// Host-side setter delegate.
pub type SetterFn = Arc<dyn Fn(RawValue) -> Result<(), HandleError> + Send + Sync>;

/// Trampoline handed to the engine for property reads.
pub type GetterTrampoline = Arc<dyn Fn() -> RawValue + Send + Sync>;

/// Trampoline handed to the engine for property writes. Returns the
/// undefined value on success or an execution-error value.
pub type SetterTrampoline = Arc<dyn Fn(RawValue) -> RawValue + Send + Sync>;

struct AccessorEntry {
    getter: Option<GetterFn>,
    setter: Option<SetterFn>,
}

/// Per-engine `(slot, property name) -> delegates` table.
///
/// Append and clear only; entries live until the slot is finally disposed.
pub struct AccessorTable {
    entries: RwLock<HashMap<(i32, String), AccessorEntry>>,
}

impl AccessorTable {
    pub(crate) fn new() -> AccessorTable {
        AccessorTable {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn store(
        &self,
        slot: i32,
        name: &str,
        getter: Option<GetterFn>,
        setter: Option<SetterFn>,
    ) {
        let mut entries = self.entries.write().expect("accessor table poisoned");
        entries.insert((slot, name.to_string()), AccessorEntry { getter, setter });
    }

    /// Drop every delegate registered for a slot. Called when the slot is
    /// finally disposed.
    pub(crate) fn clear_slot(&self, slot: i32) {
        let mut entries = self.entries.write().expect("accessor table poisoned");
        entries.retain(|(entry_slot, _), _| *entry_slot != slot);
    }

    /// Whether any delegate is registered under `(slot, name)`.
    pub fn contains(&self, slot: i32, name: &str) -> bool {
        let entries = self.entries.read().expect("accessor table poisoned");
        entries.contains_key(&(slot, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("accessor table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wrap a getter delegate so no failure can cross into native code.
pub(crate) fn getter_trampoline(delegate: GetterFn) -> GetterTrampoline {
    Arc::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| delegate()));
        match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "accessor getter failed");
                RawValue::Error(JsValueKind::ExecutionError, err.to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::debug!(panic = %msg, "accessor getter panicked");
                RawValue::Error(JsValueKind::ExecutionError, msg)
            }
        }
    })
}

/// Wrap a setter delegate so no failure can cross into native code.
pub(crate) fn setter_trampoline(delegate: SetterFn) -> SetterTrampoline {
    Arc::new(move |value: RawValue| {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| delegate(value)));
        match outcome {
            Ok(Ok(())) => RawValue::Undefined,
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "accessor setter failed");
                RawValue::Error(JsValueKind::ExecutionError, err.to_string())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::debug!(panic = %msg, "accessor setter panicked");
                RawValue::Error(JsValueKind::ExecutionError, msg)
            }
        }
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "accessor delegate panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_stores_and_clears_by_slot() {
        let table = AccessorTable::new();
        let getter: GetterFn = Arc::new(|| Ok(RawValue::Number(1.0)));
        table.store(3, "x", Some(getter.clone()), None);
        table.store(3, "y", Some(getter.clone()), None);
        table.store(4, "x", Some(getter), None);

        assert!(table.contains(3, "x"));
        assert_eq!(table.len(), 3);

        table.clear_slot(3);
        assert!(!table.contains(3, "x"));
        assert!(table.contains(4, "x"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn getter_trampoline_converts_error_result() {
        let delegate: GetterFn = Arc::new(|| Err(HandleError::InvalidPropertyName));
        let tramp = getter_trampoline(delegate);
        match tramp() {
            RawValue::Error(kind, _) => assert_eq!(kind, JsValueKind::ExecutionError),
            other => panic!("expected error value, got {other:?}"),
        }
    }

    #[test]
    fn getter_trampoline_converts_panic() {
        let delegate: GetterFn = Arc::new(|| panic!("host getter blew up"));
        let tramp = getter_trampoline(delegate);
        match tramp() {
            RawValue::Error(kind, msg) => {
                assert_eq!(kind, JsValueKind::ExecutionError);
                assert!(msg.contains("host getter blew up"));
            }
            other => panic!("expected error value, got {other:?}"),
        }
    }

    #[test]
    fn setter_trampoline_passes_value_and_converts_panic() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        let delegate: SetterFn = Arc::new(move |value| {
            *seen_clone.lock().unwrap() = Some(value);
            Ok(())
        });
        let tramp = setter_trampoline(delegate);
        assert_eq!(tramp(RawValue::Number(9.0)), RawValue::Undefined);
        assert_eq!(seen.lock().unwrap().clone(), Some(RawValue::Number(9.0)));

        let delegate: SetterFn = Arc::new(|_| panic!("no"));
        let tramp = setter_trampoline(delegate);
        assert!(matches!(tramp(RawValue::Null), RawValue::Error(..)));
    }
}
