//! Write-through block cache.
//!
//! A fixed number of slots, each holding one `(device, block)` identity and
//! one block of data. Slot selection hashes the identity, so a given block
//! always maps to the same slot and at most one slot ever holds it. Each
//! slot is guarded by a semaphore: acquiring it grants exclusive use of the
//! slot, including any device I/O done on its behalf.
//!
//! Writes go through to the device immediately; the cached copy only
//! serves subsequent reads. A write with no source buffer marks the slot
//! *zero-fill*: no data is stored and reads of that block yield zeros.
//! Statistics counters are best-effort (relaxed atomics, no locking).

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;

use muon_core::KernelError;
use muon_core::kinfo;
use muon_core::sync::{Semaphore, SpinLock};
use muon_driver_api::DeviceClass;

use crate::device::{self, DeviceId};

use core::sync::atomic::{AtomicU64, Ordering};

/// Block size the cache operates on, in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Multiplier spreading `(device, block)` identities across slots.
const SLOT_HASH_PRIME: u64 = 2_654_435_761;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SlotFlags: u8 {
        /// The cached copy is newer than the device.
        const DIRTY = 1 << 0;
        /// The block is all zeroes; no data is stored.
        const ZERO_FILL = 1 << 1;
    }
}

struct SlotState {
    dev: Option<DeviceId>,
    block: u32,
    flags: SlotFlags,
    data: Box<[u8]>,
}

struct Slot {
    /// Grants exclusive use of the slot; held across device I/O.
    sem: Semaphore,
    state: SpinLock<SlotState>,
}

/// Best-effort cache statistics.
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

/// A point-in-time copy of the statistics counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    /// Requests served from a matching slot.
    pub hits: u64,
    /// Requests that had to (re)load their slot.
    pub misses: u64,
    /// Total read requests.
    pub reads: u64,
    /// Total write requests.
    pub writes: u64,
    /// Dirty slots written back to make room.
    pub evictions: u64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// The block cache.
pub struct BlockCache {
    slots: Vec<Slot>,
    stats: CacheStats,
}

impl BlockCache {
    /// Creates a cache with `capacity` slots. A capacity of zero is legal:
    /// every request is forwarded straight to the device.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                sem: Semaphore::new(1),
                state: SpinLock::new(SlotState {
                    dev: None,
                    block: 0,
                    flags: SlotFlags::empty(),
                    data: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
                }),
            });
        }
        Self {
            slots,
            stats: CacheStats::default(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index for a `(device, block)` identity.
    ///
    /// The identity is folded before the multiply so that block numbers
    /// differing only above the low bits still spread across a small cache.
    fn slot_index(&self, dev: DeviceId, block: u32) -> usize {
        let v = u64::from(dev.0 ^ block);
        let v = v ^ (v >> 2);
        (v.wrapping_mul(SLOT_HASH_PRIME) % self.slots.len() as u64) as usize
    }

    /// Reads one block through the cache into `buf`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for non-block devices; device errors propagate; a
    /// short transfer becomes `ReadError` (or `WriteError` while evicting).
    pub fn read(&self, dev: DeviceId, block: u32, buf: &mut [u8]) -> Result<(), KernelError> {
        if device::class(dev) != Some(DeviceClass::Block) {
            return Err(KernelError::InvalidArgument);
        }

        if self.slots.is_empty() {
            return device_read(dev, block, buf);
        }

        let slot = &self.slots[self.slot_index(dev, block)];
        slot.sem.acquire();
        let result = self.read_slot(slot, dev, block, buf);
        slot.sem.release();
        result
    }

    fn read_slot(
        &self,
        slot: &Slot,
        dev: DeviceId,
        block: u32,
        buf: &mut [u8],
    ) -> Result<(), KernelError> {
        let mut state = slot.state.lock();

        if state.dev != Some(dev) || state.block != block {
            Self::evict(&self.stats, &mut state)?;

            device_read(dev, block, &mut state.data)?;
            state.dev = Some(dev);
            state.block = block;
            state.flags = SlotFlags::empty();
            CacheStats::bump(&self.stats.misses);
        } else {
            CacheStats::bump(&self.stats.hits);
        }
        CacheStats::bump(&self.stats.reads);

        if state.flags.contains(SlotFlags::ZERO_FILL) {
            buf.fill(0);
        } else {
            buf[..BLOCK_SIZE].copy_from_slice(&state.data);
        }

        Ok(())
    }

    /// Writes one block through the cache. `buf` of `None` writes a block
    /// of zeroes and marks the slot zero-fill.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for non-block devices; device errors propagate; a
    /// short transfer becomes `WriteError`.
    pub fn write(&self, dev: DeviceId, block: u32, buf: Option<&[u8]>) -> Result<(), KernelError> {
        if device::class(dev) != Some(DeviceClass::Block) {
            return Err(KernelError::InvalidArgument);
        }

        if self.slots.is_empty() {
            return match buf {
                Some(data) => device_write(dev, block, data),
                None => device_write(dev, block, &[0u8; BLOCK_SIZE]),
            };
        }

        let slot = &self.slots[self.slot_index(dev, block)];
        slot.sem.acquire();
        let result = self.write_slot(slot, dev, block, buf);
        slot.sem.release();
        result
    }

    fn write_slot(
        &self,
        slot: &Slot,
        dev: DeviceId,
        block: u32,
        buf: Option<&[u8]>,
    ) -> Result<(), KernelError> {
        let mut state = slot.state.lock();

        if state.dev != Some(dev) || state.block != block {
            Self::evict(&self.stats, &mut state)?;
            CacheStats::bump(&self.stats.misses);
        } else {
            CacheStats::bump(&self.stats.hits);
        }

        // Write through before updating the cached copy.
        match buf {
            Some(data) => device_write(dev, block, data)?,
            None => device_write(dev, block, &[0u8; BLOCK_SIZE])?,
        }

        if let Some(data) = buf {
            state.data.copy_from_slice(&data[..BLOCK_SIZE]);
            state.flags = SlotFlags::empty();
        } else {
            state.flags = SlotFlags::ZERO_FILL;
        }
        state.dev = Some(dev);
        state.block = block;

        CacheStats::bump(&self.stats.writes);
        Ok(())
    }

    /// Writes back a dirty slot before its identity changes.
    fn evict(stats: &CacheStats, state: &mut SlotState) -> Result<(), KernelError> {
        if !state.flags.contains(SlotFlags::DIRTY) {
            return Ok(());
        }
        let dev = state.dev.expect("dirty slot always has an identity");

        if state.flags.contains(SlotFlags::ZERO_FILL) {
            device_write(dev, state.block, &[0u8; BLOCK_SIZE])?;
        } else {
            device_write(dev, state.block, &state.data)?;
        }

        CacheStats::bump(&stats.evictions);
        state.flags = SlotFlags::empty();
        Ok(())
    }

    /// Reads `count` consecutive blocks starting at `block`.
    ///
    /// Returns the number of blocks read.
    pub fn read_multi(
        &self,
        dev: DeviceId,
        block: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result<u32, KernelError> {
        for i in 0..count {
            let off = i as usize * BLOCK_SIZE;
            self.read(dev, block + i, &mut buf[off..off + BLOCK_SIZE])?;
        }
        Ok(count)
    }

    /// Writes `count` consecutive blocks starting at `block`. `buf` of
    /// `None` zero-fills the whole range.
    ///
    /// Returns the number of blocks written.
    pub fn write_multi(
        &self,
        dev: DeviceId,
        block: u32,
        count: u32,
        buf: Option<&[u8]>,
    ) -> Result<u32, KernelError> {
        for i in 0..count {
            let chunk = buf.map(|b| &b[i as usize * BLOCK_SIZE..(i as usize + 1) * BLOCK_SIZE]);
            self.write(dev, block + i, chunk)?;
        }
        Ok(count)
    }

    /// Flushes every dirty slot to its device.
    pub fn sync(&self) -> Result<(), KernelError> {
        for slot in &self.slots {
            slot.sem.acquire();
            let result = Self::evict(&self.stats, &mut slot.state.lock());
            slot.sem.release();
            result?;
        }
        Ok(())
    }

    /// Returns a snapshot of the statistics counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Reads one block from the device itself.
fn device_read(dev: DeviceId, block: u32, buf: &mut [u8]) -> Result<(), KernelError> {
    let ops = device::ops(dev).ok_or(KernelError::NoSuchDevice)?;
    let mut len = 1;
    ops.read(block, &mut len, buf)?;
    if len != 1 {
        return Err(KernelError::ReadError);
    }
    Ok(())
}

/// Writes one block to the device itself.
fn device_write(dev: DeviceId, block: u32, buf: &[u8]) -> Result<(), KernelError> {
    let ops = device::ops(dev).ok_or(KernelError::NoSuchDevice)?;
    let mut len = 1;
    ops.write(block, &mut len, buf)?;
    if len != 1 {
        return Err(KernelError::WriteError);
    }
    Ok(())
}

// ── Global cache ────────────────────────────────────────────────────────

static CACHE: SpinLock<Option<alloc::sync::Arc<BlockCache>>> = SpinLock::new(None);

/// Creates the global block cache with `capacity` slots.
///
/// # Panics
///
/// Panics if the cache already exists.
pub fn init(capacity: usize) {
    let mut cache = CACHE.lock();
    assert!(cache.is_none(), "block cache already initialised");
    *cache = Some(alloc::sync::Arc::new(BlockCache::new(capacity)));
    kinfo!(
        "block cache: allocated {} bytes ({} blocks)",
        capacity * BLOCK_SIZE,
        capacity
    );
}

fn cache() -> Result<alloc::sync::Arc<BlockCache>, KernelError> {
    CACHE
        .lock()
        .as_ref()
        .cloned()
        .ok_or(KernelError::NotFound)
}

/// Reads one block via the global cache.
pub fn read(dev: DeviceId, block: u32, buf: &mut [u8]) -> Result<(), KernelError> {
    cache()?.read(dev, block, buf)
}

/// Writes one block via the global cache; `None` zero-fills.
pub fn write(dev: DeviceId, block: u32, buf: Option<&[u8]>) -> Result<(), KernelError> {
    cache()?.write(dev, block, buf)
}

/// Reads consecutive blocks via the global cache.
pub fn read_multi(dev: DeviceId, block: u32, count: u32, buf: &mut [u8]) -> Result<u32, KernelError> {
    cache()?.read_multi(dev, block, count, buf)
}

/// Writes consecutive blocks via the global cache; `None` zero-fills.
pub fn write_multi(
    dev: DeviceId,
    block: u32,
    count: u32,
    buf: Option<&[u8]>,
) -> Result<u32, KernelError> {
    cache()?.write_multi(dev, block, count, buf)
}

/// Flushes the global cache.
pub fn sync() -> Result<(), KernelError> {
    cache()?.sync()
}

/// Statistics of the global cache.
pub fn stats() -> Result<CacheStatsSnapshot, KernelError> {
    Ok(cache()?.stats())
}
