use crate::error::Result;
use crate::fabric::sink::Sink;

/// Lifecycle hooks the fabric invokes around each delivery.
///
/// The fabric never inspects payloads; everything it needs to know about
/// their lifetime goes through these two hooks. `acquire` produces the copy a
/// sink will own, or vetoes the delivery; `release` consumes that copy after
/// the handler ran (or after a queued event was discarded).
///
/// One effective ops instance is resolved per delivery (the sink's, falling
/// back to the source's) and is used for both hooks, which keeps the
/// acquire/release pairing exact by construction:
/// for every sink reached by an emit, `release` runs at most once and only
/// for a successful `acquire`.
pub trait PayloadOps<T>: Sync {
    /// Called exactly once before a sink takes possession of `payload`.
    ///
    /// Returns the copy the sink will own. `Err(FilterMismatch)` bypasses
    /// the sink without counting a delivery: there is nothing to release
    /// and the emitter sees no error. Any other error skips the sink the
    /// same way but is accounted as a drop rather than a filter.
    fn acquire(&self, payload: &T, sink: &Sink<T>) -> Result<T>;

    /// Called exactly once per successful `acquire`, after the handler has
    /// been invoked or the queued event was discarded. Consuming the copy is
    /// the release; overriding is only useful for side accounting.
    fn release(&self, payload: T) {
        drop(payload);
    }
}

/// The identity ops: acquire clones the payload handle, release drops it.
///
/// This is what an ops-less delivery does implicitly; having it as a value
/// lets a sink opt into explicit accounting without changing behavior.
pub struct CloneOps;

impl CloneOps {
    pub const SHARED: CloneOps = CloneOps;
}

impl<T: Clone + Send> PayloadOps<T> for CloneOps {
    fn acquire(&self, payload: &T, _sink: &Sink<T>) -> Result<T> {
        Ok(payload.clone())
    }
}
