//! Handle lifetime and reference-counting core for embedding a native
//! JavaScript engine.
//!
//! Handles to JS values live in native engine memory and are shared between
//! two collectors that cannot see each other: the host side (`Arc`/`Drop`)
//! and the engine's own GC. This crate owns the coordination between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  EngineContext (one per engine instance)                    │
//! │  ├── ProxyRegistry      dense id -> ProxyRecord array       │
//! │  ├── ObjectWeakTable    slot -> weak wrapper reference      │
//! │  ├── AccessorTable      (slot, name) -> pinned delegates    │
//! │  ├── DisposalCoordinator  dual-GC handshake                 │
//! │  └── MemoryPressure     deferred external-memory accounting │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ValueHandle (transient, clonable)                          │
//! │  ├── value access / conversions / property ops / calls      │
//! │  ├── first-handle disposal contract (pass_on)               │
//! │  └── keep_alive() ──► Arc<TrackedHandle>                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TrackedHandle (host-GC-visible wrapper)                    │
//! │  ├── pins the canonical ValueHandle ("locked")              │
//! │  └── Drop = finalizer: flags intent, never calls native     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine itself is a collaborator behind the [`NativeEngine`] trait;
//! its collector reports back through [`EngineContext::on_native_collect`].
//! Deferred work (finalizations, memory-pressure deltas) drains on entry to
//! every native call.

pub mod accessor;
pub mod disposal;
pub mod engine;
pub mod error;
pub mod handle;
mod memory;
pub mod proxy;
pub mod registry;
pub mod tracked;
pub mod value;
pub mod weak_table;

pub use accessor::{AccessorTable, GetterFn, GetterTrampoline, SetterFn, SetterTrampoline};
pub use disposal::DisposalCoordinator;
pub use engine::{ArgValue, EngineContext, NativeEngine, NewProxy, ObjectBinder, PropertyKey};
pub use error::HandleError;
pub use handle::{PropertyValue, ValueHandle};
pub use proxy::{DisposedState, ProxyRecord};
pub use registry::ProxyRegistry;
pub use tracked::TrackedHandle;
pub use value::{JsValueKind, RawValue};
pub use weak_table::{BoundObject, DetachedPlaceholder, ObjectWeakTable};
