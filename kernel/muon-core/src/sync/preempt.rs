//! Counter-based preemption guard.
//!
//! The tick handler consults [`preempt_enabled`] before rotating the run
//! queue, so code holding the guard cannot be rescheduled. Disable/enable
//! pairs nest.

use core::sync::atomic::{AtomicU32, Ordering};

static PREEMPT_COUNT: AtomicU32 = AtomicU32::new(0);

/// Disables preemption. Nests; every call must be paired with
/// [`preempt_enable`].
pub fn preempt_disable() {
    PREEMPT_COUNT.fetch_add(1, Ordering::Acquire);
}

/// Re-enables preemption once the outermost disable is released.
///
/// # Panics
///
/// Debug-panics on unbalanced enable.
pub fn preempt_enable() {
    let prev = PREEMPT_COUNT.fetch_sub(1, Ordering::Release);
    debug_assert!(prev > 0, "unbalanced preempt_enable");
}

/// Returns whether the scheduler may currently preempt.
pub fn preempt_enabled() -> bool {
    PREEMPT_COUNT.load(Ordering::Acquire) == 0
}

/// RAII preemption guard: disabled on construction, re-enabled on drop.
pub struct PreemptGuard(());

/// Disables preemption for the lifetime of the returned guard.
pub fn preempt_guard() -> PreemptGuard {
    preempt_disable();
    PreemptGuard(())
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        preempt_enable();
    }
}
