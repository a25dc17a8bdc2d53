//! Bounded MPMC event queue.
//!
//! A queued sink parks `(sink, payload)` events here; whichever thread calls
//! [`process`](EventQueue::process) drains them and runs the handlers. Any
//! number of emitters may put concurrently and any number of workers may
//! process concurrently.
//!
//! ## Synchronization
//!
//! Lock-free ring with per-slot sequence stamps: both cursors are CAS'd, and
//! a producer or consumer synchronizes with the previous user of its slot
//! through the stamp rather than through the opposite cursor.
//!
//! | Operation | Memory Ordering | Purpose |
//! |-----------|-----------------|---------|
//! | Claim cursor (CAS) | `Relaxed` | The stamp carries the data ordering |
//! | Read slot stamp | `Acquire` | See the previous user's slot writes |
//! | Write slot stamp | `Release` | Publish our slot writes |
//!
//! `try_put`/`try_get` never suspend and are legal in interrupt-style
//! context; `put`/`get`/`process` bound their waiting with an absolute
//! deadline.

use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::fabric::ops::PayloadOps;
use crate::fabric::sink::Sink;
use crate::ring::RingBuffer;
use crate::stats::Counter;
use crate::time::{Deadline, Timeout, block_on};

/// An in-queue record: the sink to run and the payload copy it owns.
///
/// The queue owns the payload reference between put and get. Dropping an
/// unprocessed event (queue purge, refused put) releases the copy through
/// the ops it was acquired with, so the acquire/release pairing survives
/// every path an event can take.
pub struct Event<T: 'static> {
    sink: &'static Sink<T>,
    payload: Option<T>,
    ops: Option<&'static dyn PayloadOps<T>>,
}

impl<T: 'static> Event<T> {
    pub fn new(
        sink: &'static Sink<T>,
        payload: T,
        ops: Option<&'static dyn PayloadOps<T>>,
    ) -> Self {
        Self {
            sink,
            payload: Some(payload),
            ops,
        }
    }

    /// Runs the sink handler, then releases the payload copy.
    pub(crate) fn process(mut self) {
        if let Some(payload) = self.payload.take() {
            self.sink.dispatch(&payload);
            match self.ops {
                Some(ops) => ops.release(payload),
                None => drop(payload),
            }
        }
    }
}

impl<T: 'static> Drop for Event<T> {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            match self.ops {
                Some(ops) => ops.release(payload),
                None => drop(payload),
            }
        }
    }
}

impl<T: 'static> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("pending", &self.payload.is_some())
            .field("has_ops", &self.ops.is_some())
            .finish()
    }
}

/// The queue surface a sink needs: non-blocking primitives plus the bounded
/// waiting and processing loops built on them.
///
/// Implemented by [`MessageQueue`]; object-safe so a [`Sink`](crate::Sink)
/// can reference any capacity through `&'static dyn EventQueue<T>`.
pub trait EventQueue<T: 'static>: Sync {
    /// Lock-free enqueue attempt; hands the event back when full.
    fn try_put(&self, event: Event<T>) -> core::result::Result<(), Event<T>>;

    /// Lock-free dequeue attempt.
    fn try_get(&self) -> Option<Event<T>>;

    fn capacity(&self) -> usize;

    /// Approximate number of queued events.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues, waiting up to `deadline` for a slot. Hands the event back
    /// if the queue stayed full; the caller maps that to
    /// `WouldBlock`/`Overflow` and lets the event's drop release the payload.
    fn put(&self, event: Event<T>, deadline: Deadline) -> core::result::Result<(), Event<T>> {
        let mut slot = Some(event);
        match block_on(deadline, || match self.try_put(slot.take().unwrap()) {
            Ok(()) => Some(()),
            Err(back) => {
                slot = Some(back);
                None
            }
        }) {
            Ok(()) => Ok(()),
            // block_on reported expiry, so the event is back in `slot`.
            Err(_) => Err(slot.take().unwrap()),
        }
    }

    /// Dequeues, waiting up to `timeout` for the first event.
    fn get(&self, timeout: Timeout) -> Result<Event<T>> {
        block_on(timeout.deadline(), || self.try_get())
    }

    /// Drains the queue and dispatches each event to its sink.
    ///
    /// Blocks up to `timeout` for the first event; none arriving is an
    /// empty round, `Ok(0)`, not an error. After the first event the drain
    /// is non-blocking and caps at `capacity()` further events, so a bursty
    /// producer amortizes the wakeup without starving the worker thread.
    ///
    /// Returns the number of events whose handler was invoked.
    fn process(&self, timeout: Timeout) -> Result<usize> {
        let first = match self.get(timeout) {
            Ok(event) => event,
            Err(Error::WouldBlock) | Err(Error::Timeout) => return Ok(0),
            Err(e) => return Err(e),
        };
        first.process();
        let mut handled = 1;
        for _ in 0..self.capacity() {
            match self.try_get() {
                Some(event) => {
                    event.process();
                    handled += 1;
                }
                None => break,
            }
        }
        Ok(handled)
    }

    /// Discards every queued event, releasing each payload copy without
    /// running its handler. Returns the number of events discarded.
    fn purge(&self) -> usize {
        let mut purged = 0;
        while let Some(event) = self.try_get() {
            drop(event);
            purged += 1;
        }
        if purged > 0 {
            log::warn!("message queue purged: {purged} undelivered event(s)");
        }
        purged
    }
}

/// Bounded MPMC FIFO of [`Event`]s, `const`-constructible so it can back a
/// `static` shared by sinks and worker threads. `N` must be a power of two.
pub struct MessageQueue<T: 'static, const N: usize> {
    ring: RingBuffer<Event<T>, N>,
    /// Enqueue cursor; claimed by CAS, so many producers can interleave.
    tail: CachePadded<AtomicUsize>,
    /// Dequeue cursor; claimed by CAS, so many consumers can interleave.
    head: CachePadded<AtomicUsize>,
    enqueued: Counter,
}

// Safety: events move through the ring under the slot stamp protocol; an
// event is only ever accessed by the thread that claimed its slot.
unsafe impl<T: Send + 'static, const N: usize> Send for MessageQueue<T, N> {}
unsafe impl<T: Send + 'static, const N: usize> Sync for MessageQueue<T, N> {}

impl<T: Send + 'static, const N: usize> MessageQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            enqueued: Counter::new(),
        }
    }

    /// Events ever enqueued.
    #[cfg(feature = "stats")]
    pub fn enqueued(&self) -> usize {
        self.enqueued.get()
    }

    // Inherent forwards so callers don't need the trait in scope.

    pub fn process(&self, timeout: Timeout) -> Result<usize> {
        EventQueue::process(self, timeout)
    }

    pub fn purge(&self) -> usize {
        EventQueue::purge(self)
    }

    pub fn len(&self) -> usize {
        EventQueue::len(self)
    }

    pub fn is_empty(&self) -> bool {
        EventQueue::is_empty(self)
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Send + 'static, const N: usize> Default for MessageQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static, const N: usize> EventQueue<T> for MessageQueue<T, N> {
    fn try_put(&self, event: Event<T>) -> core::result::Result<(), Event<T>> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.ring.get(self.ring.index(tail));
            let stamp = slot.load_stamp();
            let dif = stamp as isize - tail as isize;
            if dif == 0 {
                // Slot ready for this lap; claim the cursor.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made us the sole writer of this slot
                        // until the "data ready" stamp below.
                        unsafe { slot.write(event) };
                        slot.store_stamp(tail.wrapping_add(1));
                        self.enqueued.hit();
                        return Ok(());
                    }
                    Err(current) => tail = current,
                }
            } else if dif < 0 {
                // The consumer of the previous lap hasn't freed the slot.
                return Err(event);
            } else {
                // Another producer claimed this position; reload and retry.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    fn try_get(&self) -> Option<Event<T>> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = self.ring.get(self.ring.index(head));
            let stamp = slot.load_stamp();
            let dif = stamp as isize - head.wrapping_add(1) as isize;
            if dif == 0 {
                // Data ready; claim the cursor.
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made us the sole reader of this
                        // slot; the Acquire stamp load saw the writer's data.
                        let event = unsafe { slot.read() };
                        slot.store_stamp(head.wrapping_add(N));
                        return Some(event);
                    }
                    Err(current) => head = current,
                }
            } else if dif < 0 {
                // Empty (or the producer at this position hasn't published).
                return None;
            } else {
                // Another consumer claimed this position; reload and retry.
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    fn capacity(&self) -> usize {
        N
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head).min(N)
    }
}

impl<T: 'static, const N: usize> Drop for MessageQueue<T, N> {
    fn drop(&mut self) {
        // With per-slot stamps, slots holding unread data are identified by
        // stamp % N == (index + 1) % N: written for this lap, not yet read.
        // Relaxed is fine: &mut self guarantees exclusive access.
        let mask = N - 1;
        for i in 0..N {
            let slot = self.ring.get(i);
            let stamp = slot.stamp_relaxed();
            if (stamp & mask) == ((i + 1) & mask) {
                // Safety: slot contains an initialized event that was never
                // consumed; dropping it runs the event's release path.
                unsafe { slot.drop_in_place() };
            }
        }
    }
}

/// Generates type aliases for common queue capacities.
///
/// Creates types like `MessageQueue8<T>`, `MessageQueue64<T>`, etc.
macro_rules! define_capacity_aliases {
    ($($n:literal),* $(,)?) => {
        paste::paste! {
            $(
                pub type [<MessageQueue $n>]<T> = MessageQueue<T, $n>;
            )*
        }
    };
}

// Generate aliases for powers of 2
define_capacity_aliases!(2, 4, 8, 16, 32, 64, 128, 256, 512, 1024);

#[cfg(test)]
mod queue_test {
    use super::*;
    use crate::fabric::sink::SinkHandler;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Tally {
        sum: &'static AtomicUsize,
    }

    impl SinkHandler<usize> for Tally {
        fn deliver(&self, payload: &usize) {
            self.sum.fetch_add(*payload, Ordering::Relaxed);
        }
    }

    fn leak_sink(sum: &'static AtomicUsize) -> &'static Sink<usize> {
        Box::leak(Box::new(Sink::immediate(
            "tally",
            Box::leak(Box::new(Tally { sum })),
        )))
    }

    /// When the queue is full, try_put must hand the event back.
    #[test]
    fn test_full() {
        static SUM: AtomicUsize = AtomicUsize::new(0);
        let sink = leak_sink(&SUM);
        let q: MessageQueue<usize, 2> = MessageQueue::new();
        q.try_put(Event::new(sink, 1, None)).unwrap();
        q.try_put(Event::new(sink, 2, None)).unwrap();
        assert!(q.try_put(Event::new(sink, 3, None)).is_err());
        assert_eq!(q.len(), 2);
    }

    /// FIFO order within one producer.
    #[test]
    fn test_fifo() {
        static SEEN: spin::Mutex<Vec<usize>> = spin::Mutex::new(Vec::new());
        struct Record;
        impl SinkHandler<usize> for Record {
            fn deliver(&self, payload: &usize) {
                SEEN.lock().push(*payload);
            }
        }
        static RECORD: Record = Record;
        let sink: &'static Sink<usize> = Box::leak(Box::new(Sink::immediate("record", &RECORD)));
        let q: MessageQueue<usize, 4> = MessageQueue::new();
        for i in 1..=4 {
            q.try_put(Event::new(sink, i, None)).unwrap();
        }
        assert_eq!(q.process(Timeout::NoWait).unwrap(), 4);
        assert_eq!(*SEEN.lock(), [1, 2, 3, 4]);
    }

    /// process blocks for the first event, then drains without blocking.
    #[test]
    fn test_process_drains() {
        static SUM: AtomicUsize = AtomicUsize::new(0);
        let sink = leak_sink(&SUM);
        let q: MessageQueue<usize, 8> = MessageQueue::new();
        for _ in 0..5 {
            q.try_put(Event::new(sink, 1, None)).unwrap();
        }
        assert_eq!(q.process(Timeout::NoWait).unwrap(), 5);
        assert_eq!(q.process(Timeout::NoWait).unwrap(), 0);
        assert!(q.is_empty());
    }

    /// An empty queue with a bounded timeout returns Ok(0), not an error.
    #[test]
    fn test_process_timeout_is_empty_round() {
        let q: MessageQueue<usize, 2> = MessageQueue::new();
        let handled = q.process(Timeout::After(Duration::from_millis(2))).unwrap();
        assert_eq!(handled, 0);
    }

    #[derive(Clone)]
    struct DropCounter(Arc<AtomicUsize>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Ignore;
    impl SinkHandler<DropCounter> for Ignore {
        fn deliver(&self, _payload: &DropCounter) {}
    }

    /// Purging releases every queued payload exactly once.
    #[test]
    fn test_purge_releases() {
        let drops = Arc::new(AtomicUsize::new(0));
        static IGNORE: Ignore = Ignore;
        let sink: &'static Sink<DropCounter> =
            Box::leak(Box::new(Sink::immediate("ignore", &IGNORE)));
        let q: MessageQueue<DropCounter, 4> = MessageQueue::new();
        q.try_put(Event::new(sink, DropCounter(drops.clone()), None))
            .unwrap();
        q.try_put(Event::new(sink, DropCounter(drops.clone()), None))
            .unwrap();
        assert_eq!(q.purge(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(q.is_empty());
    }

    /// Dropping the queue itself releases unread payloads (no leak).
    #[test]
    fn test_drop_unread_events() {
        let drops = Arc::new(AtomicUsize::new(0));
        static IGNORE: Ignore = Ignore;
        let sink: &'static Sink<DropCounter> =
            Box::leak(Box::new(Sink::immediate("ignore", &IGNORE)));
        {
            let q: MessageQueue<DropCounter, 4> = MessageQueue::new();
            for _ in 0..3 {
                q.try_put(Event::new(sink, DropCounter(drops.clone()), None))
                    .unwrap();
            }
            let _ = q.try_get();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    /// Many producers, one drainer: nothing lost, nothing duplicated.
    #[test]
    fn test_mpmc_stress() {
        static SUM: AtomicUsize = AtomicUsize::new(0);
        static Q: MessageQueue<usize, 64> = MessageQueue::new();
        let sink = leak_sink(&SUM);

        let producers = num_cpus::get().clamp(2, 8);
        let per_producer = 1_000usize;
        std::thread::scope(|s| {
            for _ in 0..producers {
                s.spawn(move || {
                    for _ in 0..per_producer {
                        let event = Event::new(sink, 1, None);
                        Q.put(event, Timeout::Forever.deadline()).ok().unwrap();
                    }
                });
            }
            s.spawn(|| {
                let mut handled = 0;
                while handled < producers * per_producer {
                    handled += Q.process(Timeout::After(Duration::from_millis(50))).unwrap();
                }
            });
        });
        assert_eq!(SUM.load(Ordering::Relaxed), producers * per_producer);
        assert!(Q.is_empty());
    }
}
