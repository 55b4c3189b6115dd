//! Error taxonomy for the handle core.
//!
//! Three families of failure, kept deliberately distinct:
//!
//! - Contract violations (disposing a locked handle, property ops on a
//!   non-object, blank property names) are programming errors at the call
//!   site. They are returned, never swallowed, and never retried.
//! - Script-level errors travel as a value-type tag on the handle itself;
//!   [`crate::ValueHandle::throw_on_error`] converts them into
//!   [`HandleError::Script`] only when the caller opts in.
//! - Engine failures are whatever the native collaborator reports, wrapped
//!   with enough handle context (engine id, proxy id, refcount) to diagnose.
//!
//! Registry growth failure is not represented here: it is a fatal invariant
//! break and panics (see [`crate::registry`]).

use crate::value::JsValueKind;

/// Errors surfaced by handle-level operations.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// Attempted to dispose the one handle instance embedded in a live
    /// tracked wrapper. The wrapper's own disposal protocol owns that
    /// instance; copies of it remain freely disposable.
    #[error(
        "cannot dispose the handle embedded in a live object wrapper \
         (engine {engine_id}, proxy {proxy_id}, refs {ref_count})"
    )]
    DisposeLocked {
        engine_id: i32,
        proxy_id: i32,
        ref_count: i32,
    },

    /// A second tracked wrapper was attached to a proxy that already has a
    /// live one. At most one wrapper exists per proxy record.
    #[error("a tracked wrapper is already attached to proxy {proxy_id} (engine {engine_id})")]
    WrapperAlreadyAttached { engine_id: i32, proxy_id: i32 },

    /// Property or call operation on a handle whose value type is not in
    /// the object family.
    #[error(
        "operation requires an object-family handle, got {kind:?} \
         (engine {engine_id}, proxy {proxy_id})"
    )]
    NotAnObject {
        kind: JsValueKind,
        engine_id: i32,
        proxy_id: i32,
    },

    /// Name-based property operations reject null, empty, and
    /// all-whitespace names.
    #[error("property name must be non-empty and not all whitespace")]
    InvalidPropertyName,

    /// A script-level error (compile, execution, or internal engine error)
    /// carried by the handle, converted on request via `throw_on_error`.
    #[error("script error ({kind:?}): {message} (engine {engine_id}, proxy {proxy_id})")]
    Script {
        kind: JsValueKind,
        message: String,
        engine_id: i32,
        proxy_id: i32,
    },

    /// Central coercion routine could not convert the value.
    #[error("cannot coerce {from:?} to {to}")]
    Coercion { from: JsValueKind, to: &'static str },

    /// Operation on an empty (never bound, or already disposed) handle.
    #[error("handle is empty")]
    Empty,

    /// Operation on a handle whose proxy slot was already finalized and
    /// cached for reuse.
    #[error("proxy {proxy_id} was already finalized (engine {engine_id})")]
    Stale { engine_id: i32, proxy_id: i32 },

    /// No managed object is bound to this proxy's slot.
    #[error("no managed object bound to proxy {proxy_id} (engine {engine_id})")]
    NotBound { engine_id: i32, proxy_id: i32 },

    /// Resurrection or auto-binding was requested but the engine context
    /// has no object binder configured.
    #[error("no object binder configured for engine {0}")]
    NoBinder(i32),

    /// Failure reported by the native engine collaborator.
    #[error("native engine error: {0}")]
    Engine(String),
}
