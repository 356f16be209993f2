//! Device layer of the muon kernel.
//!
//! [`device`] keeps the tree of device nodes: globally unique names,
//! parent/child/sibling structure, and per-node operation objects behind
//! the uniform [`muon_driver_api::DeviceOps`] contract. [`block`] layers a
//! write-through cache over block-class devices, and [`partition`]
//! discovers MBR partitions on mass-storage devices and publishes them as
//! child block devices.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod device;
pub mod partition;

#[cfg(test)]
pub(crate) mod testutil;

pub use device::{Device, DeviceId, DeviceSpec, DeviceTree};
