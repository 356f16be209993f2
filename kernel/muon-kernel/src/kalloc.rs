//! Global allocator wiring.
//!
//! Two heap instances coexist: the kernel heap, carved out of kernel RAM
//! after the slab region, and the user heap in the largest user RAM
//! extent. Rust allocations go through [`KernelAllocator`], which serves
//! small requests from the slab allocator and everything else from the
//! kernel heap.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use muon_core::sync::SpinLock;
use muon_mm::heap::Heap;
use muon_mm::slab;

static KERNEL_HEAP: SpinLock<Option<Heap>> = SpinLock::new(None);
static USER_HEAP: SpinLock<Option<Heap>> = SpinLock::new(None);

/// Largest request the slab allocator serves.
const SLAB_MAX_BYTES: usize = 1 << slab::MAX_RADIX;

/// Alignment every heap block satisfies.
const HEAP_ALIGN: usize = 4;

/// Initialises the kernel heap over `[base, base + len)`.
///
/// # Safety
///
/// Same contract as [`Heap::new`]; call once, before any allocation.
pub unsafe fn init_kernel_heap(base: usize, len: usize) {
    // SAFETY: forwarded caller contract.
    *KERNEL_HEAP.lock() = Some(unsafe { Heap::new(base, len) });
}

/// Initialises the user heap over `[base, base + len)`.
///
/// # Safety
///
/// Same contract as [`Heap::new`]; call once.
pub unsafe fn init_user_heap(base: usize, len: usize) {
    // SAFETY: forwarded caller contract.
    *USER_HEAP.lock() = Some(unsafe { Heap::new(base, len) });
}

/// Free bytes in the kernel heap.
pub fn kernel_heap_free() -> usize {
    KERNEL_HEAP.lock().as_ref().map_or(0, Heap::free_bytes)
}

/// Free bytes in the user heap.
pub fn user_heap_free() -> usize {
    USER_HEAP.lock().as_ref().map_or(0, Heap::free_bytes)
}

/// Allocates from the user heap (user stacks, user-space images).
pub fn user_alloc(size: usize) -> Option<NonNull<u8>> {
    USER_HEAP.lock().as_mut()?.alloc(size)
}

/// Frees a user-heap allocation.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from [`user_alloc`].
pub unsafe fn user_free(ptr: *mut u8) {
    if let Some(heap) = USER_HEAP.lock().as_mut() {
        // SAFETY: forwarded caller contract.
        unsafe { heap.free(ptr) };
    }
}

/// The kernel's global allocator: slab for small objects, kernel heap for
/// the rest.
pub struct KernelAllocator;

// SAFETY: both backing allocators hand out unique, live blocks of at
// least the requested size; dealloc routes each pointer back to the
// allocator that produced it (the slab region is a fixed address range).
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Slab objects are aligned to their (power-of-two) size, so
        // covering the alignment is a matter of rounding the request up.
        let size = layout.size().max(layout.align());
        if size <= SLAB_MAX_BYTES {
            if let Some(ptr) = slab::alloc(size) {
                return ptr.as_ptr();
            }
        }

        if layout.align() > HEAP_ALIGN {
            return ptr::null_mut();
        }
        match KERNEL_HEAP.lock().as_mut().and_then(|h| h.alloc(layout.size())) {
            Some(ptr) => ptr.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if slab::owns(ptr) {
            // SAFETY: the pointer came from the slab region.
            unsafe { slab::free(ptr) };
            return;
        }
        if let Some(heap) = KERNEL_HEAP.lock().as_mut() {
            // SAFETY: not slab-owned, so it came from the kernel heap.
            unsafe { heap.free(ptr) };
        }
    }
}

/// The global allocator for kernel targets. On hosted targets (the test
/// suite) the system allocator stays in charge.
#[cfg_attr(target_os = "none", global_allocator)]
pub static ALLOCATOR: KernelAllocator = KernelAllocator;
