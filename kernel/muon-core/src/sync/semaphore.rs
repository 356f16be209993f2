//! Counting semaphore.

use core::sync::atomic::{AtomicU32, Ordering};

use super::yield_now;

/// A counting semaphore.
///
/// [`acquire`](Self::acquire) yields the CPU between attempts rather than
/// busy-spinning, so a holder that has been preempted can run and release.
/// Block-cache slots use one permit per slot to serialise writers.
pub struct Semaphore {
    permits: AtomicU32,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub const fn new(permits: u32) -> Self {
        Self {
            permits: AtomicU32::new(permits),
        }
    }

    /// Acquires one permit, yielding until one becomes available.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            yield_now();
        }
    }

    /// Attempts to acquire one permit without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::Relaxed);
        while current > 0 {
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Releases one permit.
    pub fn release(&self) {
        self.permits.fetch_add(1, Ordering::Release);
    }
}
