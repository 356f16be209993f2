//! Global wall-clock facade.
//!
//! Backed by whichever RTC the platform registers. Returns 0 before a
//! source is installed, so callers always get a valid (if meaningless)
//! timestamp. ARP cache expiry and the timed sleep calls read this clock.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Signature of a wall-clock source: seconds since the epoch.
pub type WallClockFn = fn() -> u64;

fn null_clock() -> u64 {
    0
}

static WALL_CLOCK: AtomicPtr<()> = AtomicPtr::new(null_clock as *mut ());

/// Registers the wall-clock source. Called once the platform's RTC driver
/// is ready; may be called again if a better source appears.
pub fn set_wall_clock(f: WallClockFn) {
    WALL_CLOCK.store(f as *mut (), Ordering::Release);
}

/// Returns the current wall-clock time in seconds since the epoch.
pub fn now() -> u64 {
    let ptr = WALL_CLOCK.load(Ordering::Acquire);
    // SAFETY: only valid `WallClockFn` pointers are ever stored.
    let f: WallClockFn = unsafe { core::mem::transmute(ptr) };
    f()
}
