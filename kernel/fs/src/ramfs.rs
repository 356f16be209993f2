//! In-memory filesystem.
//!
//! The reference implementation of the driver contract: a flat node
//! arena per mount, directories holding child indices, file contents in
//! kernel memory. Ram-only boards use it as their root filesystem; the
//! test suite uses it to exercise the VFS and mount layers.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use muon_core::{KernelError, time};

use crate::driver::{DirContext, FsDriver};
use crate::node::{FsNode, FsNodeType, FsStat};
use crate::vfs::Vfs;

/// The ramfs driver. Register once with [`crate::driver::register`].
pub struct RamFs;

/// The driver instance.
pub static RAMFS: RamFs = RamFs;

/// Default permissions for ramfs nodes.
const RAMFS_PERMS: u16 = 0o755;

struct RamNode {
    name: String,
    kind: FsNodeType,
    data: Vec<u8>,
    children: Vec<usize>,
    ctime: u64,
    mtime: u64,
}

struct RamFsData {
    nodes: Vec<RamNode>,
}

impl RamFsData {
    fn fs_node(&self, handle: usize) -> Option<FsNode> {
        let node = self.nodes.get(handle)?;
        Some(FsNode {
            name: node.name.clone(),
            node_type: node.kind,
            perms: RAMFS_PERMS,
            uid: 0,
            gid: 0,
            size: node.data.len() as u32,
            atime: node.mtime,
            mtime: node.mtime,
            ctime: node.ctime,
            first_block: handle as u32,
        })
    }
}

/// Runs `f` on the mount's node arena.
fn with_data<R>(vfs: &Vfs, f: impl FnOnce(&mut RamFsData) -> R) -> Result<R, KernelError> {
    let mut guard = vfs.data.lock();
    let any = guard.as_mut().ok_or(KernelError::NotFound)?;
    let data = any
        .downcast_mut::<RamFsData>()
        .ok_or(KernelError::CorruptData)?;
    Ok(f(data))
}

struct RamDirContext {
    entries: Vec<FsNode>,
    pos: usize,
}

impl DirContext for RamDirContext {
    fn read(&mut self, name: Option<&str>) -> Result<FsNode, KernelError> {
        match name {
            Some(wanted) => self
                .entries
                .iter()
                .find(|e| e.name == wanted)
                .cloned()
                .ok_or(KernelError::NotFound),
            None => {
                let entry = self.entries.get(self.pos).cloned();
                self.pos += 1;
                entry.ok_or(KernelError::NotFound)
            }
        }
    }
}

impl FsDriver for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn mount(&self, vfs: &Vfs) -> Result<(), KernelError> {
        let now = time::now();
        let root = RamNode {
            name: String::from("/"),
            kind: FsNodeType::Dir,
            data: Vec::new(),
            children: Vec::new(),
            ctime: now,
            mtime: now,
        };
        *vfs.data.lock() = Some(Box::new(RamFsData {
            nodes: alloc::vec![root],
        }));
        Ok(())
    }

    fn unmount(&self, vfs: &Vfs) -> Result<(), KernelError> {
        *vfs.data.lock() = None;
        Ok(())
    }

    fn root_node(&self, vfs: &Vfs) -> Result<FsNode, KernelError> {
        with_data(vfs, |data| data.fs_node(0).ok_or(KernelError::CorruptData))?
    }

    fn open_dir(&self, vfs: &Vfs, node: &FsNode) -> Result<Box<dyn DirContext>, KernelError> {
        if !node.is_dir() {
            return Err(KernelError::NotADirectory);
        }
        let entries = with_data(vfs, |data| {
            let dir = data
                .nodes
                .get(node.first_block as usize)
                .ok_or(KernelError::NotFound)?;
            Ok(dir
                .children
                .iter()
                .filter_map(|&c| data.fs_node(c))
                .collect::<Vec<_>>())
        })??;
        Ok(Box::new(RamDirContext { entries, pos: 0 }))
    }

    fn read(&self, vfs: &Vfs, node: &FsNode, buf: &mut [u8]) -> Result<usize, KernelError> {
        if node.is_dir() {
            return Err(KernelError::IsADirectory);
        }
        with_data(vfs, |data| {
            let file = data
                .nodes
                .get(node.first_block as usize)
                .ok_or(KernelError::NotFound)?;
            let n = buf.len().min(file.data.len());
            buf[..n].copy_from_slice(&file.data[..n]);
            Ok(n)
        })?
    }

    fn write(&self, vfs: &Vfs, node: &FsNode, buf: &[u8]) -> Result<usize, KernelError> {
        if node.is_dir() {
            return Err(KernelError::IsADirectory);
        }
        with_data(vfs, |data| {
            let file = data
                .nodes
                .get_mut(node.first_block as usize)
                .ok_or(KernelError::NotFound)?;
            file.data.clear();
            file.data.extend_from_slice(buf);
            file.mtime = time::now();
            Ok(buf.len())
        })?
    }

    fn stat(&self, vfs: &Vfs) -> Result<FsStat, KernelError> {
        with_data(vfs, |data| FsStat {
            label: String::from("ramfs"),
            total_blocks: data.nodes.len() as u32,
            free_blocks: 0,
            block_size: 512,
        })
    }
}

/// Creates a node under `parent` and returns its directory entry.
fn add_node(
    vfs: &Vfs,
    parent: &FsNode,
    name: &str,
    kind: FsNodeType,
    contents: &[u8],
) -> Result<FsNode, KernelError> {
    if !parent.is_dir() {
        return Err(KernelError::NotADirectory);
    }
    if name.is_empty() || name.contains('/') {
        return Err(KernelError::InvalidArgument);
    }

    with_data(vfs, |data| {
        let parent_idx = parent.first_block as usize;
        let exists = {
            let dir = data.nodes.get(parent_idx).ok_or(KernelError::NotFound)?;
            dir.children
                .iter()
                .any(|&c| data.nodes[c].name == name)
        };
        if exists {
            return Err(KernelError::Exists);
        }

        let now = time::now();
        let handle = data.nodes.len();
        data.nodes.push(RamNode {
            name: String::from(name),
            kind,
            data: contents.to_vec(),
            children: Vec::new(),
            ctime: now,
            mtime: now,
        });
        data.nodes[parent_idx].children.push(handle);
        data.fs_node(handle).ok_or(KernelError::CorruptData)
    })?
}

/// Creates a directory under `parent`.
pub fn add_dir(vfs: &Vfs, parent: &FsNode, name: &str) -> Result<FsNode, KernelError> {
    add_node(vfs, parent, name, FsNodeType::Dir, &[])
}

/// Creates a file under `parent` with the given contents.
pub fn add_file(
    vfs: &Vfs,
    parent: &FsNode,
    name: &str,
    contents: &[u8],
) -> Result<FsNode, KernelError> {
    add_node(vfs, parent, name, FsNodeType::File, contents)
}
