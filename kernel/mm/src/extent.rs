//! Physical memory extents.
//!
//! Platform memory detection runs before any allocator exists and fills a
//! fixed-capacity table describing every region of the address space. The
//! table is immutable afterwards: the boot flow queries it to place the
//! kernel and user heaps, and the trap reporter uses it to decide whether a
//! stack pointer is safe to dump.

use bitflags::bitflags;
use planck_noalloc::vec::ArrayVec;

use muon_core::KernelError;
use muon_core::sync::SpinLock;

/// Maximum number of extents a platform may declare.
pub const MAX_EXTENTS: usize = 16;

bitflags! {
    /// Classification of a memory extent: one privilege bit and one kind bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtentFlags: u8 {
        /// Reserved for the kernel.
        const KERNEL = 1 << 0;
        /// Available to user processes.
        const USER = 1 << 1;
        /// Writable RAM.
        const RAM = 1 << 2;
        /// Read-only memory.
        const ROM = 1 << 3;
        /// Memory-mapped peripherals.
        const PERIPHERAL = 1 << 4;
        /// Address space with nothing behind it.
        const VACANT = 1 << 5;
    }
}

/// One contiguous region of the physical address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemExtent {
    /// First address of the region.
    pub base: usize,
    /// Length in bytes.
    pub len: usize,
    /// Classification.
    pub flags: ExtentFlags,
}

impl MemExtent {
    /// First address past the region.
    pub const fn end(&self) -> usize {
        self.base + self.len
    }

    /// Returns whether `addr` lies within the region.
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// The table of extents declared by the platform.
#[derive(Debug)]
pub struct ExtentTable {
    extents: ArrayVec<MemExtent, MAX_EXTENTS>,
}

impl Default for ExtentTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtentTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            extents: ArrayVec::new(),
        }
    }

    /// Appends an extent.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::OutOfMemory`] once [`MAX_EXTENTS`] regions
    /// have been declared.
    pub fn add(&mut self, extent: MemExtent) -> Result<(), KernelError> {
        if self.extents.is_full() {
            return Err(KernelError::OutOfMemory);
        }
        self.extents.push(extent);
        Ok(())
    }

    /// Iterates over all extents.
    pub fn iter(&self) -> impl Iterator<Item = &MemExtent> {
        self.extents.iter()
    }

    /// Iterates over extents whose flags contain all of `flags`.
    pub fn iter_matching(&self, flags: ExtentFlags) -> impl Iterator<Item = &MemExtent> {
        self.extents.iter().filter(move |e| e.flags.contains(flags))
    }

    /// Returns the largest extent matching `flags`, if any.
    pub fn largest(&self, flags: ExtentFlags) -> Option<&MemExtent> {
        self.iter_matching(flags).max_by_key(|e| e.len)
    }

    /// Returns the total size of all extents matching `flags`.
    pub fn total_size(&self, flags: ExtentFlags) -> usize {
        self.iter_matching(flags).map(|e| e.len).sum()
    }

    /// Returns one past the highest address covered by extents matching
    /// `flags`, or 0 if none match.
    pub fn highest_addr(&self, flags: ExtentFlags) -> usize {
        self.iter_matching(flags).map(MemExtent::end).max().unwrap_or(0)
    }

    /// Returns the extent containing `addr`, if any.
    pub fn containing(&self, addr: usize) -> Option<&MemExtent> {
        self.extents.iter().find(|e| e.contains(addr))
    }
}

// ── Global table ────────────────────────────────────────────────────────

static EXTENTS: SpinLock<Option<ExtentTable>> = SpinLock::new(None);

/// Installs the extent table produced by platform memory detection.
///
/// # Panics
///
/// Panics if called twice: the table is created once at boot.
pub fn install(table: ExtentTable) {
    let mut extents = EXTENTS.lock();
    assert!(extents.is_none(), "extent table already installed");
    *extents = Some(table);
}

/// Runs `f` with a reference to the global extent table.
///
/// # Panics
///
/// Panics if memory detection has not run yet.
pub fn with_extents<R>(f: impl FnOnce(&ExtentTable) -> R) -> R {
    let extents = EXTENTS.lock();
    f(extents.as_ref().expect("extent table not installed"))
}

/// Returns whether `addr` lies within a RAM extent (kernel or user).
///
/// Safe to call before [`install`]; answers `false` in that case.
pub fn addr_in_ram(addr: usize) -> bool {
    let extents = EXTENTS.lock();
    match extents.as_ref() {
        Some(table) => table
            .containing(addr)
            .is_some_and(|e| e.flags.contains(ExtentFlags::RAM)),
        None => false,
    }
}
