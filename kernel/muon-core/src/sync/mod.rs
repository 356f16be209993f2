//! Synchronisation primitives.
//!
//! The kernel targets single-CPU boards: the preemption counter in
//! [`preempt`] is the primary critical-section guard, [`SpinLock`] protects
//! individual structures, and [`Semaphore`] serialises longer-lived owners
//! such as block-cache slots.

mod preempt;
mod semaphore;
mod spinlock;

pub use preempt::{PreemptGuard, preempt_disable, preempt_enable, preempt_enabled, preempt_guard};
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicPtr, Ordering};

/// Signature of the scheduler yield hook.
pub type YieldFn = fn();

fn null_yield() {
    core::hint::spin_loop();
}

static YIELD_FN: AtomicPtr<()> = AtomicPtr::new(null_yield as *mut ());

/// Registers the scheduler's yield function.
///
/// Installed once at scheduler init; until then [`yield_now`] spins.
pub fn set_yield_fn(f: YieldFn) {
    YIELD_FN.store(f as *mut (), Ordering::Release);
}

/// Gives up the CPU until the caller is next scheduled.
///
/// Used by blocking primitives while they wait for another process to
/// release a resource.
pub fn yield_now() {
    let ptr = YIELD_FN.load(Ordering::Acquire);
    // SAFETY: only valid `YieldFn` pointers are ever stored in YIELD_FN.
    let f: YieldFn = unsafe { core::mem::transmute(ptr) };
    f();
}
