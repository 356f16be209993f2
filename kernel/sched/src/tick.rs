//! Periodic tick service.
//!
//! One timer device (the first timer in the tree) is programmed to the
//! requested rate and given [`tick`] as its per-tick function. Each tick
//! disables the timer, bumps the global tick counter, runs every due
//! callback with preemption disabled, and re-enables the timer.
//!
//! Callbacks fire every `interval` ticks and are keyed by an opaque id
//! that only ever increases.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use muon_core::sync::{SpinLock, preempt_guard};
use muon_core::{KernelError, kerror, kinfo};
use muon_dev::device::{self, DeviceId};
use muon_driver_api::{Control, ControlData, DeviceClass};

/// Default tick rate requested at boot, in Hz.
pub const TICK_RATE_HZ: u32 = 64;

/// Handle to a registered tick callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

/// A registered callback.
struct TickCallback {
    id: u64,
    /// Fire every `interval` ticks.
    interval: u32,
    /// Ticks remaining until the next firing.
    counter: u32,
    func: Box<dyn FnMut() + Send>,
}

/// The callback registry, separated from the global wiring so its
/// arithmetic is testable.
#[derive(Default)]
pub struct TickService {
    callbacks: Vec<TickCallback>,
    next_id: u64,
}

impl TickService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` to run every `interval` ticks.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidArgument`] for a zero interval.
    pub fn add(
        &mut self,
        interval: u32,
        func: Box<dyn FnMut() + Send>,
    ) -> Result<CallbackId, KernelError> {
        if interval == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.next_id += 1;
        let id = self.next_id;
        self.callbacks.push(TickCallback {
            id,
            interval,
            counter: interval,
            func,
        });
        Ok(CallbackId(id))
    }

    /// Removes a callback.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] for an unknown id.
    pub fn remove(&mut self, id: CallbackId) -> Result<(), KernelError> {
        let pos = self
            .callbacks
            .iter()
            .position(|cb| cb.id == id.0)
            .ok_or(KernelError::NotFound)?;
        self.callbacks.remove(pos);
        Ok(())
    }

    /// Advances one tick: decrements every counter and runs the callbacks
    /// that reach zero, resetting them to their interval.
    pub fn advance(&mut self) {
        for cb in &mut self.callbacks {
            cb.counter -= 1;
            if cb.counter == 0 {
                cb.counter = cb.interval;
                (cb.func)();
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

// ── Global tick state ───────────────────────────────────────────────────

static TICK_COUNT: AtomicU64 = AtomicU64::new(0);
static SERVICE: SpinLock<Option<TickService>> = SpinLock::new(None);
static TIMER: SpinLock<Option<DeviceId>> = SpinLock::new(None);

/// Locates the first timer device, programs it to `rate_hz` and installs
/// [`tick`] as its per-tick function.
///
/// # Errors
///
/// `NoSuchDevice` if the tree holds no timer; device control errors
/// propagate.
pub fn init(rate_hz: u32) -> Result<(), KernelError> {
    let mut timer = None;
    let mut node = None;
    while let Some(id) = device::next(node) {
        if device::class(id) == Some(DeviceClass::Timer) {
            timer = Some(id);
            break;
        }
        node = Some(id);
    }
    let Some(timer) = timer else {
        kerror!("tick: no timer device found");
        return Err(KernelError::NoSuchDevice);
    };
    let name = device::name(timer).unwrap_or_default();
    let ops = device::ops(timer).ok_or(KernelError::NoSuchDevice)?;

    match ops.control(Control::TimerSetFreq(rate_hz)) {
        Ok(ControlData::U32(actual)) => {
            kinfo!("tick: {}: {} Hz requested, {} Hz actual", name, rate_hz, actual);
        }
        Ok(_) => {}
        Err(e) => {
            kerror!("tick: {}: failed to set rate: {}", name, e);
            return Err(e);
        }
    }

    ops.control(Control::TimerSetTickFn(tick))?;

    *SERVICE.lock() = Some(TickService::new());
    *TIMER.lock() = Some(timer);

    ops.control(Control::TimerSetEnabled(true))?;
    Ok(())
}

/// The per-tick function handed to the timer device.
///
/// Runs outside IRQ context proper: the timer is disabled for the
/// duration, callbacks run under the preemption guard, then the timer is
/// re-enabled.
pub fn tick() {
    let Some(ops) = TIMER.lock().as_ref().copied().and_then(device::ops) else {
        return;
    };

    if ops.control(Control::TimerSetEnabled(false)).is_err() {
        return;
    }

    TICK_COUNT.fetch_add(1, Ordering::Relaxed);

    {
        let _guard = preempt_guard();
        if let Some(service) = SERVICE.lock().as_mut() {
            service.advance();
        }
    }

    if let Err(e) = ops.control(Control::TimerSetEnabled(true)) {
        kerror!("tick: failed to re-enable timer: {}", e);
    }
}

/// The number of ticks since boot.
pub fn ticks() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Registers a callback with the global service; see [`TickService::add`].
pub fn add_callback(
    interval: u32,
    func: Box<dyn FnMut() + Send>,
) -> Result<CallbackId, KernelError> {
    let _guard = preempt_guard();
    SERVICE
        .lock()
        .as_mut()
        .ok_or(KernelError::NotFound)?
        .add(interval, func)
}

/// Removes a callback from the global service.
pub fn remove_callback(id: CallbackId) -> Result<(), KernelError> {
    let _guard = preempt_guard();
    SERVICE
        .lock()
        .as_mut()
        .ok_or(KernelError::NotFound)?
        .remove(id)
}
