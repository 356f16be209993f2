//! Driver-facing contracts for the muon kernel device model.
//!
//! Every piece of hardware (or logical sub-device, such as a partition)
//! appears in the device tree behind one uniform interface:
//!
//! - [`DeviceOps`] — the operation set: `read`, `write`, `control`, `getc`,
//!   `putc`, `shut_down`. Operations a driver does not implement fall back
//!   to defaults returning [`KernelError::NotSupported`].
//! - [`Control`] / [`ControlData`] — the enumerated control surface and its
//!   typed responses (timer programming, block geometry, network identity,
//!   the board-parameter block, …).
//! - [`DeviceClass`] / [`DeviceSubclass`] / [`DeviceState`] — device
//!   classification used by subsystem scans (partition discovery, network
//!   interface registration, timer selection).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod control;
pub mod device;

pub use control::{BoardParams, Control, ControlData, HwType, LinkFlags, TickFn};
pub use device::{DeviceClass, DeviceOps, DeviceState, DeviceSubclass, NullDevice};
