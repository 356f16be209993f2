//! Virtual filesystem layer.
//!
//! A [`driver::FsDriver`] implements one filesystem format; a [`Vfs`] is
//! one *instance* of a driver bound to a device. The [`mount`] table maps
//! `(host VFS, host directory node)` locations to inner VFS instances,
//! with the root filesystem mounted at the null location. Path lookups go
//! through [`vfs::get_child_node`], which crosses mount points
//! transparently.
//!
//! [`ramfs`] is the in-memory reference driver, used for ram-only boards
//! and by the test suite.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod driver;
pub mod mount;
pub mod node;
pub mod ramfs;
pub mod vfs;

#[cfg(test)]
pub(crate) mod testutil;

pub use driver::{DirContext, FsDriver};
pub use node::{FsNode, FsNodeType, FsStat};
pub use vfs::Vfs;
