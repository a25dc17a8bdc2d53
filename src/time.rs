//! Deadlines and bounded waiting.
//!
//! Every blocking operation in the fabric takes a [`Timeout`] on entry and
//! converts it once into an absolute [`Deadline`]. The deadline is then shared
//! across all suspension points of that operation, so an emit that waits on
//! one full queue has less budget left for the next one.
//!
//! Waiting itself is spin-then-snooze: a [`Backoff`] handles the
//! short-latency window without entering the scheduler, and once it is
//! exhausted the thread naps in small bounded slices so that
//! multi-millisecond timeouts do not burn a core.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

use crate::error::{Error, Result};

/// Relative wait budget accepted by every blocking entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Never suspend. The only variant legal in interrupt-style context.
    NoWait,
    /// Wait without bound.
    Forever,
    /// Wait up to the given duration.
    After(Duration),
}

impl Timeout {
    /// Pins the relative budget to an absolute deadline, once, on entry.
    pub fn deadline(self) -> Deadline {
        match self {
            Timeout::NoWait => Deadline::NoWait,
            Timeout::Forever => Deadline::Forever,
            Timeout::After(d) => Deadline::At(Instant::now() + d),
        }
    }
}

/// Absolute expiry computed from a [`Timeout`] at operation entry.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    NoWait,
    Forever,
    At(Instant),
}

impl Deadline {
    #[inline]
    pub fn is_nowait(&self) -> bool {
        matches!(self, Deadline::NoWait)
    }

    #[inline]
    pub fn expired(&self) -> bool {
        match self {
            Deadline::NoWait => true,
            Deadline::Forever => false,
            Deadline::At(t) => Instant::now() >= *t,
        }
    }

    /// Remaining budget; `None` means unbounded.
    #[inline]
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Deadline::NoWait => Some(Duration::ZERO),
            Deadline::Forever => None,
            Deadline::At(t) => Some(t.saturating_duration_since(Instant::now())),
        }
    }

    /// Maps a queue-full outcome to the error kind the caller expects:
    /// a non-blocking try reports `WouldBlock`, an expired wait `Overflow`.
    #[inline]
    pub(crate) fn overflow_kind(&self) -> Error {
        if self.is_nowait() {
            Error::WouldBlock
        } else {
            Error::Overflow
        }
    }
}

/// Longest single nap once the backoff is exhausted. Spurious wakeups are
/// fine; the loop re-checks the deadline every slice.
const NAP_SLICE: Duration = Duration::from_micros(50);

/// Retries `attempt` until it produces a value or the deadline expires.
///
/// `Deadline::NoWait` tries exactly once and reports [`Error::WouldBlock`];
/// an expired bounded deadline reports [`Error::Timeout`]. Callers remap the
/// kind where their contract names a different one (queue put, pool alloc).
pub(crate) fn block_on<T>(deadline: Deadline, mut attempt: impl FnMut() -> Option<T>) -> Result<T> {
    if let Some(v) = attempt() {
        return Ok(v);
    }
    if deadline.is_nowait() {
        return Err(Error::WouldBlock);
    }
    let backoff = Backoff::new();
    loop {
        if let Some(v) = attempt() {
            return Ok(v);
        }
        if deadline.expired() {
            return Err(Error::Timeout);
        }
        if backoff.is_completed() {
            let nap = match deadline.remaining() {
                Some(r) => NAP_SLICE.min(r),
                None => NAP_SLICE,
            };
            thread::park_timeout(nap);
        } else {
            backoff.snooze();
        }
    }
}

/// Monotonic tick counter stamped into packet metadata.
///
/// Millisecond resolution by default; the `high-res-timestamps` feature
/// switches to nanoseconds. Ticks count from the first call, which pins the
/// epoch for the life of the process.
pub(crate) fn now_ticks() -> u64 {
    static EPOCH: spin::Once<Instant> = spin::Once::new();
    let epoch = *EPOCH.call_once(Instant::now);
    let elapsed = epoch.elapsed();
    #[cfg(feature = "high-res-timestamps")]
    {
        elapsed.as_nanos() as u64
    }
    #[cfg(not(feature = "high-res-timestamps"))]
    {
        elapsed.as_millis() as u64
    }
}
