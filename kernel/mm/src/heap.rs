//! Variable-size heap allocator.
//!
//! A heap is a contiguous region carved into blocks, each prefixed by a
//! `{ magic, size }` header whose magic's low bit is the in-use flag. The
//! block list is implicit: `size`-sized strides from the region base walk
//! every block and end at a zero-sized in-use sentinel. Allocation is
//! first-fit with block splitting; freeing coalesces with the blocks that
//! follow, but not with those before (the list cannot be walked backwards).
//!
//! Two instances normally coexist: the kernel heap, placed after the slab
//! region in kernel RAM, and the user heap in the largest user RAM extent.

use core::ptr::{self, NonNull};

use muon_core::KernelError;
use muon_core::kdebug;

/// Identifiable bit pattern marking a block header. The low bit must be
/// clear: it is borrowed as the in-use flag.
const MAGIC: u32 = 0xc91d_58be;
const USED: u32 = 1;

/// log2 of the block alignment; requests round up to 2^ALIGN_LOG2 bytes.
const ALIGN_LOG2: u32 = 2;
const ALIGN_MASK: u32 = (1 << ALIGN_LOG2) - 1;

/// Block header. `size` excludes the header itself.
#[repr(C)]
struct BlockHeader {
    magic: u32,
    size: u32,
}

const HDR: usize = core::mem::size_of::<BlockHeader>();

/// A heap over one memory region.
pub struct Heap {
    start: usize,
    size: usize,
}

// SAFETY: the heap exclusively owns its region; callers serialise access
// (the kernel instance lives behind a lock).
unsafe impl Send for Heap {}

impl Heap {
    /// Creates a heap over `[base, base + len)` and formats it as a single
    /// free block followed by the end-of-heap sentinel.
    ///
    /// # Safety
    ///
    /// The region must be unused RAM, at least large enough for two block
    /// headers, aligned to 2^[`ALIGN_LOG2`] bytes, and exclusively owned by
    /// the heap for its whole lifetime.
    pub unsafe fn new(base: usize, len: usize) -> Self {
        let len = len & !(ALIGN_MASK as usize);
        debug_assert!(base & ALIGN_MASK as usize == 0, "heap base misaligned");
        debug_assert!(len > 2 * HDR, "heap region too small");

        let heap = Self { start: base, size: len };

        // SAFETY: both headers lie within the owned region.
        unsafe {
            let first = base as *mut BlockHeader;
            (*first).magic = MAGIC;
            (*first).size = (len - 2 * HDR) as u32;

            let sentinel = (base + HDR + (*first).size as usize) as *mut BlockHeader;
            (*sentinel).magic = MAGIC | USED;
            (*sentinel).size = 0;
        }

        heap
    }

    /// Allocates `size` bytes, rounded up to the block alignment.
    ///
    /// First-fit: walks the block list from the region base and takes the
    /// first free block that is large enough, splitting it when the
    /// remainder can hold a header plus one alignment unit.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > u32::MAX as usize {
            return None;
        }
        let size = (size + ALIGN_MASK as usize) & !(ALIGN_MASK as usize);

        let mut p = self.start as *mut BlockHeader;
        // SAFETY: the walk below visits only intact headers between the
        // region base and the sentinel.
        unsafe {
            while (*p).size != 0 {
                if (*p).magic & USED == 0 && size <= (*p).size as usize {
                    if (*p).size as usize - size > HDR + ALIGN_MASK as usize {
                        // Split: the tail becomes a new free block.
                        let tail = (p as usize + HDR + size) as *mut BlockHeader;
                        (*tail).magic = MAGIC;
                        (*tail).size = (*p).size - (size + HDR) as u32;
                        (*p).size = size as u32;
                    }
                    (*p).magic |= USED;
                    return NonNull::new((p as *mut u8).add(HDR));
                }
                p = (p as usize + HDR + (*p).size as usize) as *mut BlockHeader;
            }
        }

        None
    }

    /// Allocates `count * size` bytes and zero-fills them.
    pub fn alloc_zeroed(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let ptr = self.alloc(total)?;
        // SAFETY: the returned block holds at least `total` bytes.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Resizes the allocation at `old`.
    ///
    /// `realloc(None, n)` behaves like [`alloc`](Self::alloc); a zero `size`
    /// frees `old` and returns `None`. Otherwise a new block is allocated,
    /// `min(old_size, size)` bytes are copied, and the old block is freed.
    ///
    /// # Safety
    ///
    /// `old`, when present, must be a live allocation from this heap.
    pub unsafe fn realloc(&mut self, old: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(old) = old else {
            return if size == 0 { None } else { self.alloc(size) };
        };
        if size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.free(old.as_ptr()) };
            return None;
        }

        let hdr = (old.as_ptr() as usize - HDR) as *mut BlockHeader;
        // SAFETY: per the contract `hdr` is an intact in-use header.
        unsafe {
            if (*hdr).magic != MAGIC | USED {
                kdebug!("heap: realloc of unallocated block {:p}", old.as_ptr());
                return None;
            }

            let new = self.alloc(size)?;
            let copy = size.min((*hdr).size as usize);
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), copy);
            self.free(old.as_ptr());
            Some(new)
        }
    }

    /// Frees the allocation at `ptr` and coalesces it with any free blocks
    /// immediately following it. Null is ignored; a double free or an
    /// unrecognised pointer is detected by the header magic, logged, and
    /// otherwise ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this heap.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let hdr = (ptr as usize - HDR) as *mut BlockHeader;
        let end = self.start + self.size;

        // SAFETY: per the contract the header precedes `ptr`; every block
        // visited by the merge loop lies before the region end.
        unsafe {
            match (*hdr).magic {
                m if m == MAGIC | USED => {
                    (*hdr).magic &= !USED;

                    // Merge the free blocks that follow into this one.
                    let mut next = (ptr as usize + (*hdr).size as usize) as *mut BlockHeader;
                    while (next as usize) < end && (*next).magic & USED == 0 {
                        (*hdr).size += (*next).size + HDR as u32;
                        next = (next as usize + HDR + (*next).size as usize) as *mut BlockHeader;
                    }
                }
                MAGIC => kdebug!("heap: double free of {:p}", ptr),
                _ => kdebug!("heap: free of unallocated block {:p}", ptr),
            }
        }
    }

    /// Returns the number of free bytes.
    ///
    /// Fragmentation may make a single allocation of this size impossible.
    pub fn free_bytes(&self) -> usize {
        self.tally(false)
    }

    /// Returns the number of allocated bytes, excluding header overhead.
    pub fn used_bytes(&self) -> usize {
        self.tally(true)
    }

    /// Walks the whole block list and checks its structural invariants:
    /// every header has the magic pattern and the strides land exactly on
    /// the sentinel at the region end.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::CorruptData`] if a header fails validation.
    pub fn validate(&self) -> Result<(), KernelError> {
        let end = self.start + self.size;
        let mut p = self.start as *const BlockHeader;

        // SAFETY: the walk stops at the first corrupt header or the
        // region end.
        unsafe {
            loop {
                if p as usize + HDR > end || (*p).magic & !USED != MAGIC {
                    return Err(KernelError::CorruptData);
                }
                if (*p).size == 0 {
                    // The sentinel must be in use and flush with the end.
                    if (*p).magic != MAGIC | USED || p as usize + HDR != end {
                        return Err(KernelError::CorruptData);
                    }
                    return Ok(());
                }
                p = (p as usize + HDR + (*p).size as usize) as *const BlockHeader;
            }
        }
    }

    fn tally(&self, used: bool) -> usize {
        let end = self.start + self.size;
        let wanted = if used { MAGIC | USED } else { MAGIC };
        let mut total = 0;
        let mut p = self.start as *const BlockHeader;

        // SAFETY: strides visit intact headers up to the region end.
        unsafe {
            while (p as usize) < end {
                if (*p).magic == wanted {
                    total += (*p).size as usize;
                }
                p = (p as usize + HDR + (*p).size as usize) as *const BlockHeader;
            }
        }

        total
    }
}
