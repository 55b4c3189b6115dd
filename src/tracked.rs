//! TrackedHandle: host-GC-visible wrapper pinning a ValueHandle.
//!
//! `keep_alive()` promotes a transient handle into an `Arc<TrackedHandle>`
//! that the host collector tracks. When the last strong reference goes
//! away, `Drop` acts as the finalizer. Finalizers run on whatever
//! thread the host chooses, so it only flags intent: the record is queued
//! with the disposal coordinator and the actual native release happens at
//! the next native-call boundary. Never a synchronous engine round trip
//! from here.
//!
//! At most one wrapper exists per proxy record. The ValueHandle instance
//! embedded in the wrapper is the canonical one: it is "locked" against
//! direct disposal for as long as the wrapper lives, because the wrapper's
//! own disposal protocol is responsible for it.

use std::sync::{Arc, Weak};

use crate::error::HandleError;
use crate::handle::ValueHandle;
use crate::value::JsValueKind;

pub struct TrackedHandle {
    inner: ValueHandle,
}

impl ValueHandle {
    /// Promote this handle for use outside the engine boundary.
    ///
    /// The handle `keep_alive` is called on becomes the canonical instance
    /// for the record: while the wrapper lives, disposing it directly fails
    /// with [`HandleError::DisposeLocked`]. Copies stay freely disposable.
    ///
    /// The wrapper embeds its own clone of the handle, reachable only by
    /// shared reference through [`TrackedHandle::inner`], so that copy can
    /// never be disposed at all; the observable lock therefore sits on the
    /// receiver, the one instance user code still holds by value.
    ///
    /// Returns the wrapper already attached to the record if one is alive:
    /// calling `keep_alive` twice on the same slot yields the same
    /// `TrackedHandle` instance. A wrapper whose previous incarnation was
    /// already finalized is replaced transparently.
    pub fn keep_alive(&self) -> Result<Arc<TrackedHandle>, HandleError> {
        let record = self.record().ok_or(HandleError::Empty)?.clone();
        let ctx = self.context().clone();

        let wrapper = record.with_wrapper_slot(|slot| {
            if let Some(existing) = slot.wrapper.upgrade() {
                return existing;
            }
            let inner = ValueHandle::bind(ctx.clone(), record.clone(), false);
            slot.canonical_handle = Some(self.instance_id());
            let wrapper = Arc::new(TrackedHandle { inner });
            slot.wrapper = Arc::downgrade(&wrapper);
            wrapper
        });

        tracing::trace!(
            engine_id = wrapper.inner.engine_id(),
            proxy_id = wrapper.inner.id(),
            "handle kept alive"
        );
        Ok(wrapper)
    }
}

impl TrackedHandle {
    pub fn id(&self) -> i32 {
        self.inner.id()
    }

    pub fn kind(&self) -> JsValueKind {
        self.inner.kind()
    }

    /// Borrow the canonical embedded handle.
    pub fn inner(&self) -> &ValueHandle {
        &self.inner
    }

    /// A fresh copy of the embedded handle. Copies are freely disposable;
    /// only the embedded instance itself is locked.
    pub fn handle(&self) -> ValueHandle {
        self.inner.clone()
    }
}

impl Drop for TrackedHandle {
    /// Host-collector finalizer. Flags intent only: detaches the canonical
    /// lock and queues the record for triage at the next native-call
    /// boundary. The embedded handle then drops normally, releasing its
    /// reference and pressure without touching the engine.
    fn drop(&mut self) {
        if let Some(record) = self.inner.record().cloned() {
            record.with_wrapper_slot(|slot| {
                slot.canonical_handle = None;
                slot.wrapper = Weak::new();
            });
            self.inner.context().disposal.defer_finalized(record);
        }
    }
}

impl std::fmt::Debug for TrackedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedHandle")
            .field("proxy_id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
