use crate::error::Result;
use crate::fabric::ops::PayloadOps;
use crate::fabric::queue::{Event, EventQueue};
use crate::stats::Counter;
use crate::time::Timeout;

/// Receives payloads delivered to a sink.
///
/// Handlers borrow the payload and may not release it; the copy produced by
/// `acquire` stays with the fabric, which releases it once the handler
/// returns. State a C-style `user_data` pointer would carry lives in the
/// implementing struct instead.
pub trait SinkHandler<T>: Sync {
    fn deliver(&self, payload: &T);
}

/// Where a sink's handler executes.
pub enum Mode<T: 'static> {
    /// In the emitter's thread, before `emit` returns.
    Immediate,
    /// In whichever thread drains the given queue.
    Queued(&'static dyn EventQueue<T>),
}

// Derived impls would demand `T: Copy`; the variants only hold a reference.
impl<T: 'static> Clone for Mode<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Mode<T> {}

/// A named delivery target: a handler plus an execution mode.
///
/// Sinks are `const`-constructible and live in statics for the whole
/// program, like the sources and connections that reference them.
pub struct Sink<T: 'static> {
    #[cfg(feature = "names")]
    name: &'static str,
    handler: &'static dyn SinkHandler<T>,
    mode: Mode<T>,
    ops: Option<&'static dyn PayloadOps<T>>,
    handled: Counter,
}

impl<T: 'static> Sink<T> {
    /// A sink whose handler runs synchronously in the emitter's thread.
    pub const fn immediate(name: &'static str, handler: &'static dyn SinkHandler<T>) -> Self {
        #[cfg(not(feature = "names"))]
        let _ = name;
        Self {
            #[cfg(feature = "names")]
            name,
            handler,
            mode: Mode::Immediate,
            ops: None,
            handled: Counter::new(),
        }
    }

    /// A sink whose events are parked on `queue` and handled by whichever
    /// thread drains it.
    pub const fn queued(
        name: &'static str,
        handler: &'static dyn SinkHandler<T>,
        queue: &'static dyn EventQueue<T>,
    ) -> Self {
        #[cfg(not(feature = "names"))]
        let _ = name;
        Self {
            #[cfg(feature = "names")]
            name,
            handler,
            mode: Mode::Queued(queue),
            ops: None,
            handled: Counter::new(),
        }
    }

    /// Attaches per-sink payload ops, overriding the source's for every
    /// delivery to this sink. This is how a sink carries its own filter.
    pub const fn with_ops(mut self, ops: &'static dyn PayloadOps<T>) -> Self {
        self.ops = Some(ops);
        self
    }

    #[cfg(feature = "names")]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn mode(&self) -> Mode<T> {
        self.mode
    }

    pub(crate) fn ops(&self) -> Option<&'static dyn PayloadOps<T>> {
        self.ops
    }

    /// Runs the handler. The payload stays owned by the caller.
    pub(crate) fn dispatch(&self, payload: &T) {
        self.handler.deliver(payload);
        self.handled.hit();
    }

    /// Number of payloads this sink's handler has been invoked with.
    #[cfg(feature = "stats")]
    pub fn handled(&self) -> usize {
        self.handled.get()
    }

    /// Direct point-to-point delivery, bypassing the connection graph.
    ///
    /// Semantics mirror a single iteration of the fan-out loop: the
    /// effective ops resolve first (the explicit argument wins over the
    /// sink's own), then acquire runs and the payload is dispatched inline
    /// or enqueued. A full queue reports
    /// [`WouldBlock`](crate::Error::WouldBlock) (non-blocking) or
    /// [`Overflow`](crate::Error::Overflow) (deadline expired), after
    /// releasing the acquired copy. A filter veto surfaces as
    /// [`FilterMismatch`](crate::Error::FilterMismatch), which callers may
    /// treat as success with zero deliveries.
    ///
    /// Intended for reply paths and tests.
    pub fn send(
        &'static self,
        payload: &T,
        ops: Option<&'static dyn PayloadOps<T>>,
        timeout: Timeout,
    ) -> Result<()>
    where
        T: Clone,
    {
        self.send_until(payload, ops, timeout.deadline())
    }

    pub(crate) fn send_until(
        &'static self,
        payload: &T,
        ops: Option<&'static dyn PayloadOps<T>>,
        deadline: crate::time::Deadline,
    ) -> Result<()>
    where
        T: Clone,
    {
        let ops = ops.or(self.ops);
        let owned = match ops {
            Some(ops) => ops.acquire(payload, self)?,
            None => payload.clone(),
        };
        match self.mode {
            Mode::Immediate => {
                self.dispatch(&owned);
                match ops {
                    Some(ops) => ops.release(owned),
                    None => drop(owned),
                }
                Ok(())
            }
            Mode::Queued(queue) => match queue.put(Event::new(self, owned, ops), deadline) {
                Ok(()) => Ok(()),
                Err(event) => {
                    // Event::drop releases the acquired copy.
                    drop(event);
                    Err(deadline.overflow_kind())
                }
            },
        }
    }
}

#[cfg(test)]
mod sink_test {
    use super::*;
    use crate::time::Timeout;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountHandler {
        hits: &'static AtomicUsize,
    }

    impl SinkHandler<u32> for CountHandler {
        fn deliver(&self, payload: &u32) {
            self.hits.fetch_add(*payload as usize, Ordering::Relaxed);
        }
    }

    /// Immediate direct send runs the handler before returning.
    #[test]
    fn test_send_immediate() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        static HANDLER: CountHandler = CountHandler { hits: &HITS };
        static SINK: Sink<u32> = Sink::immediate("direct", &HANDLER);

        SINK.send(&5, None, Timeout::NoWait).unwrap();
        assert_eq!(HITS.load(Ordering::Relaxed), 5);
        #[cfg(feature = "stats")]
        assert_eq!(SINK.handled(), 1);
    }

    /// Handler state plays the role of a C-style user_data pointer: two
    /// sinks sharing one handler type, each with its own target.
    #[test]
    fn test_per_sink_handler_state() {
        static HITS_A: AtomicUsize = AtomicUsize::new(0);
        static HITS_B: AtomicUsize = AtomicUsize::new(0);
        static HANDLER_A: CountHandler = CountHandler { hits: &HITS_A };
        static HANDLER_B: CountHandler = CountHandler { hits: &HITS_B };
        static SINK_A: Sink<u32> = Sink::immediate("a", &HANDLER_A);
        static SINK_B: Sink<u32> = Sink::immediate("b", &HANDLER_B);

        SINK_A.send(&3, None, Timeout::NoWait).unwrap();
        SINK_B.send(&4, None, Timeout::NoWait).unwrap();
        assert_eq!(HITS_A.load(Ordering::Relaxed), 3);
        assert_eq!(HITS_B.load(Ordering::Relaxed), 4);
    }
}
