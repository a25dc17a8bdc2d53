//! Feature-gated event counters.
//!
//! With the `stats` feature disabled a [`Counter`] is a zero-sized no-op, so
//! call sites never need their own `#[cfg]` guards.

#[cfg(feature = "stats")]
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Counter {
    #[cfg(feature = "stats")]
    n: AtomicUsize,
}

impl Counter {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(feature = "stats")]
            n: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn hit(&self) {
        #[cfg(feature = "stats")]
        self.n.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(feature = "stats")]
    #[inline]
    pub(crate) fn get(&self) -> usize {
        self.n.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod counter_test {
    use super::*;

    #[cfg(feature = "stats")]
    #[test]
    fn test_counting() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.hit();
        c.hit();
        assert_eq!(c.get(), 2);
    }

    /// A counter must be constructible in a `static` regardless of features.
    #[test]
    fn test_const_new() {
        static C: Counter = Counter::new();
        C.hit();
    }
}
