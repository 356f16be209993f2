//! VFS instances and path-component lookup.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::Any;

use muon_core::KernelError;
use muon_core::sync::SpinLock;
use muon_dev::DeviceId;

use crate::driver::FsDriver;
use crate::mount;
use crate::node::FsNode;

/// One instance of a filesystem driver bound to a device.
pub struct Vfs {
    /// The driver implementing this filesystem's format.
    pub driver: &'static dyn FsDriver,
    /// The backing device, if the filesystem has one.
    pub dev: Option<DeviceId>,
    /// Driver-private per-mount state, owned by the instance.
    pub data: SpinLock<Option<Box<dyn Any + Send>>>,
}

impl core::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vfs")
            .field("driver", &self.driver.name())
            .field("dev", &self.dev)
            .finish()
    }
}

impl Vfs {
    /// Creates an instance not yet bound to any device.
    pub fn bare(driver: &'static dyn FsDriver) -> Self {
        Self {
            driver,
            dev: None,
            data: SpinLock::new(None),
        }
    }

    /// Returns this filesystem's root directory node.
    pub fn root_node(&self) -> Result<FsNode, KernelError> {
        self.driver.root_node(self)
    }
}

/// Creates a VFS for `driver` on `dev` and asks the driver to mount it.
///
/// On failure the half-built instance is dropped; nothing is retained.
pub fn attach(
    driver: &'static dyn FsDriver,
    dev: Option<DeviceId>,
) -> Result<Arc<Vfs>, KernelError> {
    let vfs = Arc::new(Vfs {
        driver,
        dev,
        data: SpinLock::new(None),
    });
    vfs.driver.mount(&vfs)?;
    Ok(vfs)
}

/// Unmounts and releases a VFS created by [`attach`].
pub fn detach(vfs: &Arc<Vfs>) -> Result<(), KernelError> {
    vfs.driver.unmount(vfs)
}

/// Resolves one path component.
///
/// Enumerates `parent` (a directory on `vfs`) for the entry named
/// `child`. If the resulting `(vfs, node)` pair is a mount point, the
/// lookup crosses into the mounted filesystem and returns its root
/// instead.
///
/// The special cases follow the argument table:
///
/// - `vfs = None`, `parent = None`, `child = None`: the root filesystem's
///   root directory.
/// - `vfs = Some`, `parent = None`, `child = None`: that filesystem's
///   root directory.
/// - `vfs = Some`, `parent = Some`, `child = None`: invalid.
/// - `vfs = None` with any other argument present: invalid.
pub fn get_child_node(
    vfs: Option<&Arc<Vfs>>,
    parent: Option<&FsNode>,
    child: Option<&str>,
) -> Result<(Arc<Vfs>, FsNode), KernelError> {
    let Some(vfs) = vfs else {
        // Only the root-filesystem lookup is valid without a VFS.
        if parent.is_some() || child.is_some() {
            return Err(KernelError::InvalidArgument);
        }
        let (root_vfs, _) = mount::find(None)?;
        let root_node = root_vfs.root_node()?;
        return Ok((root_vfs, root_node));
    };

    // A null parent means the root directory of `vfs`.
    let parent_node = match parent {
        Some(node) => {
            if child.is_none() {
                return Err(KernelError::InvalidArgument);
            }
            node.clone()
        }
        None => vfs.root_node()?,
    };

    let Some(child) = child else {
        return Ok((Arc::clone(vfs), parent_node));
    };

    let mut dir = vfs.driver.open_dir(vfs, &parent_node)?;
    let node = dir.read(Some(child))?;
    drop(dir);

    // Cross a mount point transparently.
    match mount::find(Some((vfs, &node))) {
        Ok((inner_vfs, inner_root)) => Ok((inner_vfs, inner_root)),
        Err(KernelError::NotFound) => Ok((Arc::clone(vfs), node)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::{self, RAMFS};
    use crate::testutil::block_device;

    #[test]
    fn resolves_children_without_mounts() {
        let fs = attach(&RAMFS, None).unwrap();
        let root = fs.root_node().unwrap();
        let etc = ramfs::add_dir(&fs, &root, "etc").unwrap();
        ramfs::add_file(&fs, &etc, "mnttab", b"").unwrap();

        let (fs2, etc_node) = get_child_node(Some(&fs), None, Some("etc")).unwrap();
        assert!(Arc::ptr_eq(&fs, &fs2));
        assert_eq!(etc_node.name, "etc");

        let (_, file) = get_child_node(Some(&fs), Some(&etc_node), Some("mnttab")).unwrap();
        assert_eq!(file.name, "mnttab");

        assert_eq!(
            get_child_node(Some(&fs), None, Some("missing")).unwrap_err(),
            KernelError::NotFound
        );
    }

    #[test]
    fn null_child_returns_the_directory_itself() {
        let fs = attach(&RAMFS, None).unwrap();
        let root = fs.root_node().unwrap();

        let (_, node) = get_child_node(Some(&fs), None, None).unwrap();
        assert_eq!(node, root);
    }

    #[test]
    fn invalid_argument_combinations() {
        let fs = attach(&RAMFS, None).unwrap();
        let root = fs.root_node().unwrap();

        assert_eq!(
            get_child_node(Some(&fs), Some(&root), None).unwrap_err(),
            KernelError::InvalidArgument
        );
        assert_eq!(
            get_child_node(None, None, Some("x")).unwrap_err(),
            KernelError::InvalidArgument
        );
        assert_eq!(
            get_child_node(None, Some(&root), None).unwrap_err(),
            KernelError::InvalidArgument
        );
    }

    /// Root-mount lifecycle and mount crossing, in one test because the
    /// global mount table admits exactly one root mount.
    #[test]
    fn root_mount_and_mount_crossing() {
        let root_dev = block_device("vfsrt");

        // No root mount yet: resolution fails cleanly.
        assert_eq!(
            get_child_node(None, None, None).unwrap_err(),
            KernelError::NotFound
        );

        mount::add(None, &RAMFS, root_dev).unwrap();
        let (root_fs, root) = get_child_node(None, None, None).unwrap();
        assert!(root.is_dir());

        // Graft a second filesystem onto /mnt.
        let mnt = ramfs::add_dir(&root_fs, &root, "mnt").unwrap();
        let inner_dev = block_device("vfsrt");
        mount::add(Some((&root_fs, &mnt)), &RAMFS, inner_dev).unwrap();

        // Resolving "mnt" crosses into the mounted filesystem's root.
        let (inner_fs, inner_root) = get_child_node(Some(&root_fs), None, Some("mnt")).unwrap();
        assert!(!Arc::ptr_eq(&root_fs, &inner_fs));
        assert_eq!(inner_fs.dev, Some(inner_dev));
        assert!(inner_root.is_dir());

        // Files created on the inner filesystem resolve through it.
        ramfs::add_file(&inner_fs, &inner_root, "inside", b"hi").unwrap();
        let (_, inside) = get_child_node(Some(&inner_fs), None, Some("inside")).unwrap();
        assert_eq!(inside.name, "inside");

        // Unmount; "mnt" resolves to the plain host directory again.
        mount::remove(Some((&root_fs, &mnt)), None).unwrap();
        let (back_fs, back) = get_child_node(Some(&root_fs), None, Some("mnt")).unwrap();
        assert!(Arc::ptr_eq(&root_fs, &back_fs));
        assert_eq!(back.name, "mnt");

        // Root unmount requires the right device.
        assert_eq!(
            mount::remove(None, Some(block_device("vfsrt"))).unwrap_err(),
            KernelError::NotFound
        );
        mount::remove(None, Some(root_dev)).unwrap();
        assert_eq!(
            get_child_node(None, None, None).unwrap_err(),
            KernelError::NotFound
        );
    }
}
