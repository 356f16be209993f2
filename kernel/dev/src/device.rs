//! The device tree.
//!
//! Devices form an ordered tree rooted at a synthetic root node. Nodes are
//! stored in an arena and referenced by stable [`DeviceId`] indices;
//! parent/child/sibling structure is kept as ids rather than pointers.
//! Names are globally unique: a device is created from a *prefix* (`"ata"`,
//! `"timer"`) and receives the first free suffix character from a fixed
//! 62-character alphabet (`ata0`, `ata1`, … `ataZ`). Sub-devices suffix
//! their parent's full name the same way (`ata00` is the first partition
//! of `ata0`).

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::KernelError;
use muon_core::kerror;
use muon_core::sync::{SpinLock, preempt_guard};
use muon_driver_api::{DeviceClass, DeviceOps, DeviceState, DeviceSubclass, NullDevice};

/// Characters used to make sub-device names unique, in allocation order.
pub const SUB_DEVICE_ALPHABET: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Stable handle to a node in the device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

/// One node of the device tree.
pub struct Device {
    /// Unique short name, e.g. `ata0`.
    pub name: String,
    /// Human-readable description, e.g. `ATA interface`.
    pub human_name: String,
    /// High-level class.
    pub class: DeviceClass,
    /// Class refinement.
    pub subclass: DeviceSubclass,
    /// Lifecycle state.
    pub state: DeviceState,
    /// Interrupt level the device raises, 0 for none.
    pub irql: u32,
    /// Base address of the device's registers, 0 for none.
    pub base_addr: usize,
    /// The device's operations.
    pub ops: Arc<dyn DeviceOps>,

    parent: Option<DeviceId>,
    first_child: Option<DeviceId>,
    prev_sibling: Option<DeviceId>,
    next_sibling: Option<DeviceId>,
}

impl Device {
    /// The parent node; `None` only for the root.
    pub fn parent(&self) -> Option<DeviceId> {
        self.parent
    }

    /// The first child, in creation order.
    pub fn first_child(&self) -> Option<DeviceId> {
        self.first_child
    }

    /// The next sibling, in creation order.
    pub fn next_sibling(&self) -> Option<DeviceId> {
        self.next_sibling
    }
}

/// Inputs to [`DeviceTree::create`].
#[derive(Clone, Copy)]
pub struct DeviceSpec<'a> {
    /// High-level class.
    pub class: DeviceClass,
    /// Class refinement.
    pub subclass: DeviceSubclass,
    /// Name prefix; the allocated suffix completes the unique name.
    pub name_prefix: &'a str,
    /// Interrupt level, 0 for none.
    pub irql: u32,
    /// Register base address, 0 for none.
    pub base_addr: usize,
    /// Human-readable description.
    pub human_name: &'a str,
    /// Parent node; `None` attaches under the root.
    pub parent: Option<DeviceId>,
}

/// The tree of device nodes.
pub struct DeviceTree {
    nodes: Vec<Option<Device>>,
    root: DeviceId,
}

impl DeviceTree {
    /// Creates a tree holding only the synthetic root node.
    pub fn new() -> Self {
        let root = Device {
            name: String::new(),
            human_name: String::from("device tree root"),
            class: DeviceClass::None,
            subclass: DeviceSubclass::None,
            state: DeviceState::Ready,
            irql: 0,
            base_addr: 0,
            ops: Arc::new(NullDevice),
            parent: None,
            first_child: None,
            prev_sibling: None,
            next_sibling: None,
        };
        Self {
            nodes: alloc::vec![Some(root)],
            root: DeviceId(0),
        }
    }

    /// The synthetic root node.
    pub fn root(&self) -> DeviceId {
        self.root
    }

    /// Borrows a node.
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.nodes.get(id.0 as usize)?.as_ref()
    }

    fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.nodes.get_mut(id.0 as usize)?.as_mut()
    }

    /// Finds a device by its unique name.
    pub fn find(&self, name: &str) -> Option<DeviceId> {
        if name.is_empty() {
            return None;
        }
        self.nodes
            .iter()
            .position(|n| n.as_ref().is_some_and(|d| d.name == name))
            .map(|i| DeviceId(i as u32))
    }

    /// Depth-first iteration over the tree in creation order.
    ///
    /// `next(None)` yields the root; passing the previous result walks
    /// children before siblings, climbing back up when a subtree ends.
    pub fn next(&self, node: Option<DeviceId>) -> Option<DeviceId> {
        let Some(id) = node else {
            return Some(self.root);
        };
        let dev = self.device(id)?;

        if let Some(child) = dev.first_child {
            return Some(child);
        }
        if let Some(sibling) = dev.next_sibling {
            return Some(sibling);
        }

        // End of this subtree: climb until an ancestor has an unvisited
        // sibling.
        let mut current = dev.parent;
        while let Some(up) = current {
            let updev = self.device(up)?;
            if let Some(sibling) = updev.next_sibling {
                return Some(sibling);
            }
            current = updev.parent;
        }
        None
    }

    /// Completes `prefix` with the first suffix character that yields an
    /// unused name.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::TooManyFiles`] when all 62 candidates exist.
    pub fn add_suffix(&self, prefix: &str) -> Result<String, KernelError> {
        let mut name = String::with_capacity(prefix.len() + 1);
        for &c in SUB_DEVICE_ALPHABET {
            name.clear();
            name.push_str(prefix);
            name.push(c as char);
            if self.find(&name).is_none() {
                return Ok(name);
            }
        }
        Err(KernelError::TooManyFiles)
    }

    /// Creates a device: allocates its unique name, runs the driver's init
    /// function to obtain the operation object, and attaches the node in
    /// the `Ready` state.
    ///
    /// If `init` fails nothing is attached.
    pub fn create(
        &mut self,
        spec: &DeviceSpec<'_>,
        init: impl FnOnce(&str) -> Result<Arc<dyn DeviceOps>, KernelError>,
    ) -> Result<DeviceId, KernelError> {
        let name = self.add_suffix(spec.name_prefix)?;
        let ops = init(&name)?;
        self.attach(spec, name, ops)
    }

    fn attach(
        &mut self,
        spec: &DeviceSpec<'_>,
        name: String,
        ops: Arc<dyn DeviceOps>,
    ) -> Result<DeviceId, KernelError> {
        if self.find(&name).is_some() {
            return Err(KernelError::Exists);
        }
        let parent = spec.parent.unwrap_or(self.root);
        if self.device(parent).is_none() {
            return Err(KernelError::NoSuchDevice);
        }

        let id = DeviceId(self.nodes.len() as u32);
        self.nodes.push(Some(Device {
            name,
            human_name: String::from(spec.human_name),
            class: spec.class,
            subclass: spec.subclass,
            state: DeviceState::Ready,
            irql: spec.irql,
            base_addr: spec.base_addr,
            ops,
            parent: Some(parent),
            first_child: None,
            prev_sibling: None,
            next_sibling: None,
        }));

        // Append to the parent's child list.
        match self.device(parent).and_then(|p| p.first_child) {
            None => self.device_mut(parent).expect("parent exists").first_child = Some(id),
            Some(first) => {
                let mut last = first;
                while let Some(next) = self.device(last).and_then(|d| d.next_sibling) {
                    last = next;
                }
                self.device_mut(last).expect("sibling exists").next_sibling = Some(id);
                self.device_mut(id).expect("new node").prev_sibling = Some(last);
            }
        }

        Ok(id)
    }

    /// Destroys a device and its whole subtree.
    ///
    /// Children are destroyed first. Each node's `shut_down` operation
    /// runs; `NotSupported` is tolerated, any other error aborts the
    /// destruction with the subtree partially removed.
    pub fn destroy(&mut self, id: DeviceId) -> Result<(), KernelError> {
        if id == self.root {
            return Err(KernelError::InvalidArgument);
        }
        if self.device(id).is_none() {
            return Err(KernelError::NoSuchDevice);
        }

        while let Some(child) = self.device(id).and_then(|d| d.first_child) {
            self.destroy(child)?;
        }

        let ops = Arc::clone(&self.device(id).expect("checked above").ops);
        match ops.shut_down() {
            Ok(()) | Err(KernelError::NotSupported) => {}
            Err(e) => return Err(e),
        }

        let (parent, prev, next) = {
            let d = self.device(id).expect("checked above");
            (d.parent, d.prev_sibling, d.next_sibling)
        };

        if let Some(p) = parent {
            if self.device(p).and_then(|d| d.first_child) == Some(id) {
                self.device_mut(p).expect("parent exists").first_child = next;
            }
        }
        if let Some(prev) = prev {
            self.device_mut(prev).expect("sibling exists").next_sibling = next;
        }
        if let Some(next) = next {
            self.device_mut(next).expect("sibling exists").prev_sibling = prev;
        }

        self.nodes[id.0 as usize] = None;
        Ok(())
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

// ── Global tree ─────────────────────────────────────────────────────────

static TREE: SpinLock<Option<DeviceTree>> = SpinLock::new(None);

/// Initialises the global device tree.
///
/// # Panics
///
/// Panics if the tree already exists.
pub fn init() {
    let mut tree = TREE.lock();
    assert!(tree.is_none(), "device tree already initialised");
    *tree = Some(DeviceTree::new());
}

/// Runs `f` with a shared reference to the global tree.
///
/// # Panics
///
/// Panics if the tree has not been initialised.
pub fn with_tree<R>(f: impl FnOnce(&DeviceTree) -> R) -> R {
    let tree = TREE.lock();
    f(tree.as_ref().expect("device tree not initialised"))
}

/// Runs `f` with a mutable reference to the global tree, with preemption
/// disabled for the duration (tree mutation is a critical section).
///
/// # Panics
///
/// Panics if the tree has not been initialised.
pub fn with_tree_mut<R>(f: impl FnOnce(&mut DeviceTree) -> R) -> R {
    let _guard = preempt_guard();
    let mut tree = TREE.lock();
    f(tree.as_mut().expect("device tree not initialised"))
}

/// Creates a device in the global tree, logging failures.
///
/// Logged here rather than inside the tree: the console sink resolves its
/// device through the tree lock.
pub fn create(
    spec: &DeviceSpec<'_>,
    init: impl FnOnce(&str) -> Result<Arc<dyn DeviceOps>, KernelError>,
) -> Result<DeviceId, KernelError> {
    let result = with_tree_mut(|t| t.create(spec, init));
    if let Err(e) = &result {
        kerror!("{}: {} device init failed: {}", spec.name_prefix, spec.human_name, e);
    }
    result
}

/// Destroys a device (and its subtree) in the global tree.
pub fn destroy(id: DeviceId) -> Result<(), KernelError> {
    with_tree_mut(|t| t.destroy(id))
}

/// Finds a device by name in the global tree.
pub fn find(name: &str) -> Option<DeviceId> {
    with_tree(|t| t.find(name))
}

/// Returns a device's operation object.
pub fn ops(id: DeviceId) -> Option<Arc<dyn DeviceOps>> {
    with_tree(|t| t.device(id).map(|d| Arc::clone(&d.ops)))
}

/// Returns a device's class.
pub fn class(id: DeviceId) -> Option<DeviceClass> {
    with_tree(|t| t.device(id).map(|d| d.class))
}

/// Returns a device's subclass.
pub fn subclass(id: DeviceId) -> Option<DeviceSubclass> {
    with_tree(|t| t.device(id).map(|d| d.subclass))
}

/// Returns a device's unique name.
pub fn name(id: DeviceId) -> Option<String> {
    with_tree(|t| t.device(id).map(|d| d.name.clone()))
}

/// Depth-first iteration over the global tree; see [`DeviceTree::next`].
pub fn next(node: Option<DeviceId>) -> Option<DeviceId> {
    with_tree(|t| t.next(node))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(prefix: &'a str, parent: Option<DeviceId>) -> DeviceSpec<'a> {
        DeviceSpec {
            class: DeviceClass::Block,
            subclass: DeviceSubclass::None,
            name_prefix: prefix,
            irql: 0,
            base_addr: 0,
            human_name: "test device",
            parent,
        }
    }

    fn null_ops(_name: &str) -> Result<Arc<dyn DeviceOps>, KernelError> {
        Ok(Arc::new(NullDevice))
    }

    #[test]
    fn names_get_sequential_suffixes() {
        let mut tree = DeviceTree::new();
        let a = tree.create(&spec("disk", None), null_ops).unwrap();
        let b = tree.create(&spec("disk", None), null_ops).unwrap();
        assert_eq!(tree.device(a).unwrap().name, "disk0");
        assert_eq!(tree.device(b).unwrap().name, "disk1");
    }

    #[test]
    fn suffix_namespace_exhausts_at_62() {
        let mut tree = DeviceTree::new();
        for _ in 0..62 {
            tree.create(&spec("x", None), null_ops).unwrap();
        }
        assert_eq!(
            tree.create(&spec("x", None), null_ops).unwrap_err(),
            KernelError::TooManyFiles
        );
    }

    #[test]
    fn find_locates_nested_devices() {
        let mut tree = DeviceTree::new();
        let parent = tree.create(&spec("ata", None), null_ops).unwrap();
        let child = tree.create(&spec("ata0", Some(parent)), null_ops).unwrap();
        assert_eq!(tree.find("ata0"), Some(parent));
        assert_eq!(tree.find("ata00"), Some(child));
        assert_eq!(tree.find("ata1"), None);
    }

    #[test]
    fn failed_init_attaches_nothing() {
        let mut tree = DeviceTree::new();
        let err = tree.create(&spec("bad", None), |_| Err(KernelError::IoError));
        assert_eq!(err.unwrap_err(), KernelError::IoError);
        assert_eq!(tree.find("bad0"), None);
        // The name is free again for the next attempt.
        let ok = tree.create(&spec("bad", None), null_ops).unwrap();
        assert_eq!(tree.device(ok).unwrap().name, "bad0");
    }

    #[test]
    fn depth_first_walk_visits_children_before_siblings() {
        let mut tree = DeviceTree::new();
        let a = tree.create(&spec("a", None), null_ops).unwrap();
        let a_child = tree.create(&spec("a0", Some(a)), null_ops).unwrap();
        let b = tree.create(&spec("b", None), null_ops).unwrap();
        let b_child0 = tree.create(&spec("b0", Some(b)), null_ops).unwrap();
        let b_child1 = tree.create(&spec("b0", Some(b)), null_ops).unwrap();

        let mut order = Vec::new();
        let mut node = None;
        while let Some(id) = tree.next(node) {
            order.push(id);
            node = Some(id);
        }
        assert_eq!(order, [tree.root(), a, a_child, b, b_child0, b_child1]);
    }

    #[test]
    fn destroy_unlinks_subtree() {
        let mut tree = DeviceTree::new();
        let a = tree.create(&spec("a", None), null_ops).unwrap();
        let a0 = tree.create(&spec("a0", Some(a)), null_ops).unwrap();
        let b = tree.create(&spec("b", None), null_ops).unwrap();

        tree.destroy(a).unwrap();
        assert!(tree.device(a).is_none());
        assert!(tree.device(a0).is_none());
        assert_eq!(tree.find("a0"), None);
        assert_eq!(tree.find("b0"), Some(b));

        // The walk skips the destroyed subtree.
        let mut order = Vec::new();
        let mut node = None;
        while let Some(id) = tree.next(node) {
            order.push(id);
            node = Some(id);
        }
        assert_eq!(order, [tree.root(), b]);
    }

    #[test]
    fn destroy_middle_sibling_relinks() {
        let mut tree = DeviceTree::new();
        let a = tree.create(&spec("m", None), null_ops).unwrap();
        let b = tree.create(&spec("m", None), null_ops).unwrap();
        let c = tree.create(&spec("m", None), null_ops).unwrap();

        tree.destroy(b).unwrap();

        let mut order = Vec::new();
        let mut node = None;
        while let Some(id) = tree.next(node) {
            order.push(id);
            node = Some(id);
        }
        assert_eq!(order, [tree.root(), a, c]);
    }

    #[test]
    fn root_cannot_be_destroyed() {
        let mut tree = DeviceTree::new();
        let root = tree.root();
        assert_eq!(tree.destroy(root).unwrap_err(), KernelError::InvalidArgument);
    }
}
