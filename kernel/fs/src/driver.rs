//! The filesystem driver contract and the driver registry.
//!
//! The build enables a fixed set of drivers; each registers here once its
//! `init` has succeeded. Operations a driver leaves unimplemented fall
//! back to trait defaults returning
//! [`KernelError::NotSupported`].

use alloc::boxed::Box;
use alloc::vec::Vec;

use muon_core::sync::SpinLock;
use muon_core::{KernelError, kerror, kinfo};

use crate::node::{FsNode, FsStat};
use crate::vfs::Vfs;

/// An open-directory handle.
///
/// Dropping the handle closes the directory.
pub trait DirContext: Send {
    /// Reads a directory entry.
    ///
    /// With a `name`, finds the entry so named; otherwise returns the next
    /// entry in iteration order.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] for a missing name or at the end
    /// of the directory.
    fn read(&mut self, name: Option<&str>) -> Result<FsNode, KernelError>;
}

/// The operations every filesystem driver provides.
pub trait FsDriver: Send + Sync {
    /// The driver's registry name, e.g. `ext2`.
    fn name(&self) -> &'static str;

    /// One-time driver initialisation, run at registration.
    fn init(&self) -> Result<(), KernelError> {
        Ok(())
    }

    /// Binds a fresh [`Vfs`] instance to its device: reads superblocks,
    /// builds per-mount state.
    fn mount(&self, vfs: &Vfs) -> Result<(), KernelError> {
        let _ = vfs;
        Err(KernelError::NotSupported)
    }

    /// Releases a [`Vfs`] instance, flushing as needed.
    fn unmount(&self, vfs: &Vfs) -> Result<(), KernelError> {
        let _ = vfs;
        Err(KernelError::NotSupported)
    }

    /// Returns the node of the filesystem's root directory.
    fn root_node(&self, vfs: &Vfs) -> Result<FsNode, KernelError> {
        let _ = vfs;
        Err(KernelError::NotSupported)
    }

    /// Opens a directory for iteration or name lookup.
    fn open_dir(&self, vfs: &Vfs, node: &FsNode) -> Result<Box<dyn DirContext>, KernelError> {
        let _ = (vfs, node);
        Err(KernelError::NotSupported)
    }

    /// Reads from the start of a file into `buf`; returns bytes read.
    fn read(&self, vfs: &Vfs, node: &FsNode, buf: &mut [u8]) -> Result<usize, KernelError> {
        let _ = (vfs, node, buf);
        Err(KernelError::NotSupported)
    }

    /// Writes `buf` to a file from its start; returns bytes written.
    fn write(&self, vfs: &Vfs, node: &FsNode, buf: &[u8]) -> Result<usize, KernelError> {
        let _ = (vfs, node, buf);
        Err(KernelError::NotSupported)
    }

    /// Filesystem statistics.
    fn stat(&self, vfs: &Vfs) -> Result<FsStat, KernelError> {
        let _ = vfs;
        Err(KernelError::NotSupported)
    }
}

// ── Driver registry ─────────────────────────────────────────────────────

static DRIVERS: SpinLock<Vec<&'static dyn FsDriver>> = SpinLock::new(Vec::new());

/// Runs a driver's `init` and adds it to the registry.
///
/// A failed `init` leaves the driver unregistered (logged). Registering
/// the same name twice fails with [`KernelError::Exists`].
pub fn register(driver: &'static dyn FsDriver) -> Result<(), KernelError> {
    let mut drivers = DRIVERS.lock();
    if drivers.iter().any(|d| d.name() == driver.name()) {
        return Err(KernelError::Exists);
    }

    match driver.init() {
        Ok(()) => {
            kinfo!("vfs: initialised '{}' fs driver", driver.name());
            drivers.push(driver);
            Ok(())
        }
        Err(e) => {
            kerror!("vfs: failed to initialise '{}' fs driver: {}", driver.name(), e);
            Err(e)
        }
    }
}

/// Looks a driver up by its registry name.
pub fn by_name(name: &str) -> Option<&'static dyn FsDriver> {
    DRIVERS.lock().iter().copied().find(|d| d.name() == name)
}
