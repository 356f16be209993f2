//! The mount table.
//!
//! Maps `(host VFS, host directory node)` locations to mounted inner VFS
//! instances. The root filesystem mounts at the null location; at most
//! one root mount exists, a device mounts at most once, and a location
//! carries at most one mount.

use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::KernelError;
use muon_core::sync::{SpinLock, preempt_guard};
use muon_dev::DeviceId;

use crate::driver::FsDriver;
use crate::node::FsNode;
use crate::vfs::{self, Vfs};

/// A mount location: the root (null) location or a directory node on a
/// host filesystem. Host nodes are identified by their driver handle.
struct Location {
    host: Option<(Arc<Vfs>, u32)>,
}

impl Location {
    fn of(host: Option<(&Arc<Vfs>, &FsNode)>) -> Self {
        Self {
            host: host.map(|(vfs, node)| (Arc::clone(vfs), node.first_block)),
        }
    }

    fn matches(&self, other: Option<(&Arc<Vfs>, &FsNode)>) -> bool {
        match (&self.host, other) {
            (None, None) => true,
            (Some((vfs, handle)), Some((ovfs, onode))) => {
                Arc::ptr_eq(vfs, ovfs) && *handle == onode.first_block
            }
            _ => false,
        }
    }
}

struct MountEntry {
    location: Location,
    inner: Arc<Vfs>,
}

/// The table of mounts.
#[derive(Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Mounts the filesystem on `dev`, driven by `driver`, at `host`
    /// (`None` mounts the root filesystem).
    ///
    /// # Errors
    ///
    /// `DeviceBusy` if the location already carries a mount or the device
    /// is already mounted anywhere; attach errors propagate.
    pub fn add(
        &mut self,
        host: Option<(&Arc<Vfs>, &FsNode)>,
        driver: &'static dyn FsDriver,
        dev: DeviceId,
    ) -> Result<(), KernelError> {
        for entry in &self.entries {
            if entry.location.matches(host)
                || entry.inner.dev == Some(dev)
                || entry
                    .location
                    .host
                    .as_ref()
                    .is_some_and(|(hv, _)| hv.dev == Some(dev))
            {
                return Err(KernelError::DeviceBusy);
            }
        }

        let inner = vfs::attach(driver, Some(dev))?;
        self.entries.push(MountEntry {
            location: Location::of(host),
            inner,
        });
        Ok(())
    }

    /// Unmounts the filesystem at `host`. A `dev` of `Some` must match
    /// the mounted device.
    ///
    /// If the driver's unmount fails the mount is left intact.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown location or a device mismatch; unmount
    /// errors propagate.
    pub fn remove(
        &mut self,
        host: Option<(&Arc<Vfs>, &FsNode)>,
        dev: Option<DeviceId>,
    ) -> Result<(), KernelError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.location.matches(host))
            .ok_or(KernelError::NotFound)?;

        if let Some(dev) = dev {
            if self.entries[pos].inner.dev != Some(dev) {
                return Err(KernelError::NotFound);
            }
        }

        vfs::detach(&self.entries[pos].inner)?;
        self.entries.remove(pos);
        Ok(())
    }

    /// Looks up the mount at `host`, returning the inner filesystem and
    /// its root directory node.
    ///
    /// # Errors
    ///
    /// `NotFound` (cleanly) when the location carries no mount.
    pub fn find(
        &self,
        host: Option<(&Arc<Vfs>, &FsNode)>,
    ) -> Result<(Arc<Vfs>, FsNode), KernelError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.location.matches(host))
            .ok_or(KernelError::NotFound)?;
        let root = entry.inner.root_node()?;
        Ok((Arc::clone(&entry.inner), root))
    }

    /// Number of mounts in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Global table ────────────────────────────────────────────────────────

static TABLE: SpinLock<MountTable> = SpinLock::new(MountTable::new());

/// Adds a mount to the global table; see [`MountTable::add`].
pub fn add(
    host: Option<(&Arc<Vfs>, &FsNode)>,
    driver: &'static dyn FsDriver,
    dev: DeviceId,
) -> Result<(), KernelError> {
    let _guard = preempt_guard();
    TABLE.lock().add(host, driver, dev)
}

/// Removes a mount from the global table; see [`MountTable::remove`].
pub fn remove(
    host: Option<(&Arc<Vfs>, &FsNode)>,
    dev: Option<DeviceId>,
) -> Result<(), KernelError> {
    let _guard = preempt_guard();
    TABLE.lock().remove(host, dev)
}

/// Looks up a mount in the global table; see [`MountTable::find`].
pub fn find(host: Option<(&Arc<Vfs>, &FsNode)>) -> Result<(Arc<Vfs>, FsNode), KernelError> {
    let _guard = preempt_guard();
    TABLE.lock().find(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::{self, RAMFS};
    use crate::testutil::block_device;

    /// Mounts fine, refuses to unmount.
    struct StickyFs;

    impl FsDriver for StickyFs {
        fn name(&self) -> &'static str {
            "stickyfs"
        }
        fn mount(&self, _vfs: &Vfs) -> Result<(), KernelError> {
            Ok(())
        }
        fn unmount(&self, _vfs: &Vfs) -> Result<(), KernelError> {
            Err(KernelError::IoError)
        }
        fn root_node(&self, _vfs: &Vfs) -> Result<FsNode, KernelError> {
            Ok(FsNode {
                name: alloc::string::String::from("/"),
                node_type: crate::node::FsNodeType::Dir,
                perms: 0o755,
                uid: 0,
                gid: 0,
                size: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
                first_block: 0,
            })
        }
    }

    fn host_dir(table: &mut MountTable, dev_prefix: &str) -> (Arc<Vfs>, FsNode) {
        // A host filesystem with one directory to mount onto.
        let dev = block_device(dev_prefix);
        table.add(None, &RAMFS, dev).unwrap();
        let (host, root) = table.find(None).unwrap();
        let dir = ramfs::add_dir(&host, &root, "mnt").unwrap();
        (host, dir)
    }

    #[test]
    fn find_is_the_inverse_of_add() {
        let mut table = MountTable::new();
        let (host, dir) = host_dir(&mut table, "mtinv");
        let inner_dev = block_device("mtinv");

        table.add(Some((&host, &dir)), &RAMFS, inner_dev).unwrap();
        let (inner, inner_root) = table.find(Some((&host, &dir))).unwrap();
        assert!(inner_root.is_dir());
        assert_eq!(inner.dev, Some(inner_dev));

        table.remove(Some((&host, &dir)), None).unwrap();
        assert_eq!(
            table.find(Some((&host, &dir))).unwrap_err(),
            KernelError::NotFound
        );
    }

    #[test]
    fn one_mount_per_location() {
        let mut table = MountTable::new();
        let (host, dir) = host_dir(&mut table, "mtloc");

        table
            .add(Some((&host, &dir)), &RAMFS, block_device("mtloc"))
            .unwrap();
        assert_eq!(
            table
                .add(Some((&host, &dir)), &RAMFS, block_device("mtloc"))
                .unwrap_err(),
            KernelError::DeviceBusy
        );
    }

    #[test]
    fn one_root_mount() {
        let mut table = MountTable::new();
        table.add(None, &RAMFS, block_device("mtroot")).unwrap();
        assert_eq!(
            table.add(None, &RAMFS, block_device("mtroot")).unwrap_err(),
            KernelError::DeviceBusy
        );
    }

    #[test]
    fn a_device_mounts_at_most_once() {
        let mut table = MountTable::new();
        let (host, dir) = host_dir(&mut table, "mtdev");
        let other = ramfs::add_dir(&host, &dir, "other").unwrap();

        let dev = block_device("mtdev");
        table.add(Some((&host, &dir)), &RAMFS, dev).unwrap();
        assert_eq!(
            table.add(Some((&host, &other)), &RAMFS, dev).unwrap_err(),
            KernelError::DeviceBusy
        );
    }

    #[test]
    fn remove_checks_location_and_device() {
        let mut table = MountTable::new();
        let (host, dir) = host_dir(&mut table, "mtrm");
        let dev = block_device("mtrm");
        table.add(Some((&host, &dir)), &RAMFS, dev).unwrap();

        let elsewhere = ramfs::add_dir(&host, &dir, "elsewhere").unwrap();
        assert_eq!(
            table.remove(Some((&host, &elsewhere)), None).unwrap_err(),
            KernelError::NotFound
        );
        assert_eq!(
            table
                .remove(Some((&host, &dir)), Some(block_device("mtrm")))
                .unwrap_err(),
            KernelError::NotFound
        );

        table.remove(Some((&host, &dir)), Some(dev)).unwrap();
        assert_eq!(table.len(), 1, "only the host root mount remains");
    }

    #[test]
    fn failed_unmount_leaves_the_mount_intact() {
        static STICKY: StickyFs = StickyFs;
        let mut table = MountTable::new();
        let (host, dir) = host_dir(&mut table, "mtstk");

        table
            .add(Some((&host, &dir)), &STICKY, block_device("mtstk"))
            .unwrap();
        assert_eq!(
            table.remove(Some((&host, &dir)), None).unwrap_err(),
            KernelError::IoError
        );
        assert!(table.find(Some((&host, &dir))).is_ok());
    }
}
