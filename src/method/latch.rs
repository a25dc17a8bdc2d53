use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Result;
use crate::time::{Deadline, block_on};

const PENDING: u32 = 0;
const SET: u32 = 1;

/// One-shot completion latch.
///
/// The dispatcher sets it once; the caller waits with a deadline. Waiting
/// after the latch is set returns immediately, so a caller may re-wait
/// after a timeout.
pub(crate) struct Latch {
    state: AtomicU32,
}

impl Latch {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU32::new(PENDING),
        }
    }

    /// Release-publishes everything written before the set.
    pub(crate) fn set(&self) {
        self.state.store(SET, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }

    pub(crate) fn wait(&self, deadline: Deadline) -> Result<()> {
        block_on(deadline, || self.is_set().then_some(()))
    }
}
