//! The muon kernel proper.
//!
//! Ties the subsystem crates together: the interrupt dispatch table
//! ([`irq`]), the boot-time and device consoles ([`console`]), the global
//! allocator over the slab and heap allocators ([`kalloc`]), the platform
//! collaborator contract ([`platform`]), and the ordered boot flow
//! ([`boot`]).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod boot;
pub mod console;
pub mod irq;
pub mod kalloc;
pub mod platform;

pub use boot::{BootConfig, kernel_init};
pub use platform::Platform;
