use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::fabric::sink::Sink;

/// A registered (source, sink) edge.
///
/// Connections are intrusive list nodes: the record embeds its own link and
/// owns no heap storage. They must be backed by storage that outlives the
/// graph (a `static` declared by the [`wire!`](crate::wire) macro, or a
/// leaked box for runtime wiring) and are never freed while either endpoint
/// is live. Unlinking (feature `runtime-wiring`) leaves the record intact so
/// that an emit traversing it concurrently still sees a valid chain; a
/// record may only be reused for a new `connect` once such emits have
/// drained.
pub struct Connection<T: 'static> {
    sink: &'static Sink<T>,
    /// Next edge of the owning source's list. Written under the source lock
    /// with Release; traversed lock-free with Acquire.
    next: AtomicPtr<Connection<T>>,
    /// Guards a record against being linked into two lists at once.
    linked: AtomicBool,
}

impl<T: 'static> Connection<T> {
    pub const fn new(sink: &'static Sink<T>) -> Self {
        Self {
            sink,
            next: AtomicPtr::new(ptr::null_mut()),
            linked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn sink(&self) -> &'static Sink<T> {
        self.sink
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<&'static Connection<T>> {
        let next = self.next.load(Ordering::Acquire);
        // Safety: list nodes are 'static and never freed; a non-null next
        // always points at a live record.
        unsafe { next.as_ref() }
    }

    /// Claims the record for a list. Fails if it is already linked.
    pub(crate) fn claim(&self) -> bool {
        !self.linked.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_next(&self, next: *mut Connection<T>) {
        self.next.store(next, Ordering::Release);
    }

    #[cfg(feature = "runtime-wiring")]
    pub(crate) fn next_ptr(&self) -> *mut Connection<T> {
        self.next.load(Ordering::Acquire)
    }

    #[cfg(feature = "runtime-wiring")]
    pub(crate) fn unclaim(&self) {
        self.linked.store(false, Ordering::Release);
    }
}
