use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

use crate::error::{Error, Result};
use crate::fabric::connection::Connection;
use crate::fabric::ops::PayloadOps;
use crate::fabric::queue::Event;
use crate::fabric::sink::{Mode, Sink};
use crate::stats::Counter;
use crate::time::{Deadline, Timeout};

/// Mutable end of the connection list, guarded by the source's spin lock.
///
/// `head` lives outside the lock as an atomic so that emit can traverse the
/// list without holding anything; all writes to `head`, `tail` and the
/// intra-list `next` pointers happen under the lock.
struct ListState<T: 'static> {
    len: usize,
    tail: *mut Connection<T>,
}

// Safety: the tail pointer only ever targets 'static connection records.
unsafe impl<T: 'static> Send for ListState<T> {}

/// What happened to one sink during a fan-out iteration.
enum Outcome {
    Delivered,
    Filtered,
    Overflowed,
    Skipped,
}

/// A named fan-out point: emit here, and every connected sink whose ops
/// accept the payload receives it.
///
/// Sources are `const`-constructible and live in statics for the whole
/// program. The connection list is an intrusive singly-linked list:
/// tail-append under the source's spin lock, lock-free traversal during
/// delivery, so a handler never runs with a fabric lock held and may
/// re-enter `emit` on any source.
pub struct Source<T: 'static> {
    #[cfg(feature = "names")]
    name: &'static str,
    ops: Option<&'static dyn PayloadOps<T>>,
    head: AtomicPtr<Connection<T>>,
    list: Mutex<ListState<T>>,
    emitted: Counter,
    delivered: Counter,
    filtered: Counter,
    overflowed: Counter,
}

/// Counter snapshot of a source.
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    /// `emit` calls that passed validation.
    pub emitted: usize,
    /// Sinks that accepted a payload.
    pub delivered: usize,
    /// Deliveries bypassed by a filter.
    pub filtered: usize,
    /// Deliveries dropped on a full queue.
    pub overflowed: usize,
}

impl<T: Clone + Send + 'static> Source<T> {
    /// A source without payload ops. An ops-less delivery falls back to
    /// plain cloning (see [`PayloadOps`]), and the source is limited to a
    /// single connection: without acquire hooks there is no lifecycle
    /// accounting to keep a fan-out honest, so `emit` refuses one.
    pub const fn new(name: &'static str) -> Self {
        #[cfg(not(feature = "names"))]
        let _ = name;
        Self {
            #[cfg(feature = "names")]
            name,
            ops: None,
            head: AtomicPtr::new(ptr::null_mut()),
            list: Mutex::new(ListState {
                len: 0,
                tail: ptr::null_mut(),
            }),
            emitted: Counter::new(),
            delivered: Counter::new(),
            filtered: Counter::new(),
            overflowed: Counter::new(),
        }
    }

    /// A source whose deliveries run through `ops` wherever a sink does not
    /// override them.
    pub const fn with_ops(name: &'static str, ops: &'static dyn PayloadOps<T>) -> Self {
        let mut source = Self::new(name);
        source.ops = Some(ops);
        source
    }

    #[cfg(feature = "names")]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.list.lock().len
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            emitted: self.emitted.get(),
            delivered: self.delivered.get(),
            filtered: self.filtered.get(),
            overflowed: self.overflowed.get(),
        }
    }

    /// Tail-appends a connection record. Fails with `InvalidArgument` if the
    /// record is already linked somewhere.
    pub(crate) fn attach(&self, conn: &'static Connection<T>) -> Result<()> {
        if !conn.claim() {
            return Err(Error::InvalidArgument);
        }
        conn.set_next(ptr::null_mut());
        let conn_ptr = conn as *const Connection<T> as *mut Connection<T>;
        let mut list = self.list.lock();
        if list.tail.is_null() {
            self.head.store(conn_ptr, Ordering::Release);
        } else {
            // Safety: tail targets a live 'static record; we hold the lock.
            unsafe { &*list.tail }.set_next(conn_ptr);
        }
        list.tail = conn_ptr;
        list.len += 1;
        Ok(())
    }

    /// Unlinks a connection record. The record stays valid for traversals
    /// already in flight and may be reused once those have drained.
    #[cfg(feature = "runtime-wiring")]
    pub(crate) fn detach(&self, conn: &'static Connection<T>) -> Result<()> {
        let target = conn as *const Connection<T> as *mut Connection<T>;
        let mut list = self.list.lock();
        let mut prev: *mut Connection<T> = ptr::null_mut();
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            if cur == target {
                let next = conn.next_ptr();
                if prev.is_null() {
                    self.head.store(next, Ordering::Release);
                } else {
                    // Safety: prev targets a live 'static record; lock held.
                    unsafe { &*prev }.set_next(next);
                }
                if list.tail == target {
                    list.tail = prev;
                }
                list.len -= 1;
                drop(list);
                conn.unclaim();
                return Ok(());
            }
            prev = cur;
            // Safety: cur targets a live 'static record.
            cur = unsafe { &*cur }.next_ptr();
        }
        Err(Error::InvalidArgument)
    }

    /// Captures (head, len) under the lock. Traversal happens outside it:
    /// connections appended after the snapshot are not part of this emit,
    /// and the `len` bound keeps the walk from running into them.
    fn snapshot(&self) -> (Option<&'static Connection<T>>, usize) {
        let list = self.list.lock();
        let head = self.head.load(Ordering::Acquire);
        let len = list.len;
        drop(list);
        // Safety: list nodes are 'static and never freed.
        (unsafe { head.as_ref() }, len)
    }

    /// Fans `payload` out to every connected sink.
    ///
    /// Returns the number of sinks that accepted the payload. Per-sink
    /// failures (filter veto, full queue) are absorbed into the count; the
    /// only error is the structural one (an ops-less source with more than
    /// one connection), which short-circuits before any delivery.
    ///
    /// The timeout is converted to one absolute deadline shared by every
    /// queued sink of this emit. `emit` may suspend only inside a queue put;
    /// with [`Timeout::NoWait`] it never suspends and is legal in interrupt
    /// context.
    ///
    /// A sink is visited at most once per emit, even when several
    /// connections join the same pair.
    pub fn emit(&self, payload: &T, timeout: Timeout) -> Result<usize> {
        let deadline = timeout.deadline();
        let (head, len) = self.snapshot();
        if self.ops.is_none() && len > 1 {
            return Err(Error::InvalidArgument);
        }
        self.emitted.hit();
        let mut delivered = 0;
        let mut cur = head;
        let mut visited = 0;
        while let Some(conn) = cur {
            if visited == len {
                break;
            }
            let sink = conn.sink();
            if !Self::seen_before(head, visited, sink) {
                match self.deliver(sink, payload, deadline) {
                    Outcome::Delivered => delivered += 1,
                    Outcome::Filtered => self.filtered.hit(),
                    Outcome::Overflowed => self.overflowed.hit(),
                    Outcome::Skipped => {}
                }
            }
            visited += 1;
            cur = conn.next();
        }
        Ok(delivered)
    }

    /// Whether `sink` already appeared in the first `upto` snapshot entries.
    /// Quadratic over the connection list, which is short by construction;
    /// keeps emit allocation-free.
    fn seen_before(head: Option<&'static Connection<T>>, upto: usize, sink: &Sink<T>) -> bool {
        let mut cur = head;
        let mut i = 0;
        while let Some(conn) = cur {
            if i == upto {
                break;
            }
            if ptr::eq(conn.sink(), sink) {
                return true;
            }
            i += 1;
            cur = conn.next();
        }
        false
    }

    /// One iteration of the fan-out loop: acquire, then dispatch inline or
    /// enqueue. No source lock is held here.
    fn deliver(&self, sink: &'static Sink<T>, payload: &T, deadline: Deadline) -> Outcome {
        let ops = sink.ops().or(self.ops);
        let owned = match ops {
            Some(ops) => match ops.acquire(payload, sink) {
                Ok(p) => p,
                Err(Error::FilterMismatch) => return Outcome::Filtered,
                Err(_) => return Outcome::Skipped,
            },
            None => payload.clone(),
        };
        match sink.mode() {
            Mode::Immediate => {
                sink.dispatch(&owned);
                match ops {
                    Some(ops) => ops.release(owned),
                    None => drop(owned),
                }
                self.delivered.hit();
                Outcome::Delivered
            }
            Mode::Queued(queue) => match queue.put(Event::new(sink, owned, ops), deadline) {
                Ok(()) => {
                    self.delivered.hit();
                    Outcome::Delivered
                }
                Err(event) => {
                    // The acquire already ran; dropping the refused event
                    // releases the copy and keeps the count conserved.
                    drop(event);
                    Outcome::Overflowed
                }
            },
        }
    }
}
