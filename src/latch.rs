//! The outstanding-task counter behind every task group. A sync blocks on it
//! until the group's last task reports in.

use crate::platform::*;

// -----------------------------------------------------------------------------
// Count latch

/// A [`CountLatch`] counts outstanding work. It starts at zero ("open"), is
/// incremented once per spawned task and decremented once per completed task.
/// Threads may block on it until the count returns to zero.
///
/// The count doubles as a futex word. A waiter sleeps only while the count
/// still holds the value it last observed, and the decrement that reaches
/// zero wakes every sleeper, so there are no missed wake-ups.
pub struct CountLatch {
    count: AtomicU32,
}

impl CountLatch {
    /// Creates a new open latch.
    pub fn new() -> CountLatch {
        CountLatch {
            count: AtomicU32::new(0),
        }
    }

    /// The current count.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Returns true if the count is zero.
    #[inline]
    pub fn probe(&self) -> bool {
        self.count() == 0
    }

    /// Adds one unit of outstanding work and returns the new count. Returns
    /// `None`, leaving the count unchanged, if it would overflow.
    #[inline]
    pub fn increment(&self) -> Option<u32> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_add(1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Removes one unit of outstanding work. If this brings the count to zero,
    /// every waiting thread is woken.
    ///
    /// The caller must hold a unit added by [`CountLatch::increment`].
    #[inline]
    pub fn decrement(&self) {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(previous, 0, "count latch decremented below zero");
        if previous == 1 {
            wake_all(&self.count);
        }
    }

    /// Blocks the thread until the count is zero.
    pub fn wait(&self) {
        loop {
            let count = self.count.load(Ordering::Acquire);
            if count == 0 {
                return;
            }
            wait(&self.count, count);
        }
    }
}

impl Default for CountLatch {
    fn default() -> CountLatch {
        CountLatch::new()
    }
}
