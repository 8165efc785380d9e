//! # monoheap
//!
//! A drop-in, single-segment heap manager backed by the OS break.
//!
//! Every block carved from the segment is tracked in one unified ledger —
//! a singly linked list of headers in carve order, live and free blocks
//! alike. Allocation reuses the earliest free block that fits (first-fit)
//! or grows the segment; releasing the block at the break top is the one
//! case where memory physically returns to the OS. All four operations
//! serialize through a single lock.
//!
//! Three surfaces, outermost first:
//! - namespaced C ABI exports (`monoheap_malloc` and friends) over the
//!   process-global break heap, intentionally namespaced until a build
//!   flips them to real allocator symbol exports
//! - [`BreakHeap`], a [`GlobalAlloc`] adapter over the same global heap
//! - [`HeapAllocator`] itself, generic over its [`HeapSegment`], which is
//!   what tests and tooling instantiate against [`ArenaSegment`]

pub mod heap;

pub use heap::allocator::{HeapAllocator, HeapLogLevel, HeapLogRecord, HeapStats};
#[cfg(unix)]
pub use heap::brk::SbrkSegment;
pub use heap::brk::{ArenaSegment, HeapSegment, SegmentError};
pub use heap::header::{HEADER_SIZE, PAYLOAD_GRANULE};
pub use heap::ledger::{LedgerFault, LedgerSummary};

#[cfg(unix)]
use std::alloc::{GlobalAlloc, Layout};
#[cfg(unix)]
use std::ffi::c_void;
#[cfg(unix)]
use std::ptr;
#[cfg(unix)]
use std::sync::OnceLock;

#[cfg(unix)]
static GLOBAL_HEAP: OnceLock<HeapAllocator<SbrkSegment>> = OnceLock::new();

/// The process-wide break-backed heap.
///
/// Initialized exactly once, on first use; every surface below routes
/// through this instance so the process break has a single owner.
#[cfg(unix)]
pub fn global_heap() -> &'static HeapAllocator<SbrkSegment> {
    GLOBAL_HEAP.get_or_init(|| HeapAllocator::new(SbrkSegment::new()))
}

/// `malloc`-shaped entry point over the global break heap.
///
/// # Safety
///
/// Callers must treat the result exactly as they would a C allocator's:
/// never read past `size` bytes, never pass the pointer to another
/// allocator's free.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monoheap_malloc(size: usize) -> *mut c_void {
    match global_heap().allocate(size) {
        Some(payload) => payload.as_ptr().cast::<c_void>(),
        None => ptr::null_mut(),
    }
}

/// `free`-shaped entry point. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by one of these entry points
/// that has not been freed since.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monoheap_free(ptr: *mut c_void) {
    // SAFETY: caller contract matches `HeapAllocator::release`.
    unsafe { global_heap().release(ptr.cast::<u8>()) }
}

/// `calloc`-shaped entry point: `nmemb * size` zeroed bytes.
///
/// # Safety
///
/// Same contract as [`monoheap_malloc`].
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monoheap_calloc(nmemb: usize, size: usize) -> *mut c_void {
    match global_heap().zero_allocate(nmemb, size) {
        Some(payload) => payload.as_ptr().cast::<c_void>(),
        None => ptr::null_mut(),
    }
}

/// `realloc`-shaped entry point.
///
/// Null delegates to allocation; a zero `new_size` returns null and leaves
/// `ptr` owned by the caller (no implicit free).
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by one of these entry
/// points.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monoheap_realloc(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    // SAFETY: caller contract matches `HeapAllocator::resize`.
    match unsafe { global_heap().resize(ptr.cast::<u8>(), new_size) } {
        Some(payload) => payload.as_ptr().cast::<c_void>(),
        None => ptr::null_mut(),
    }
}

/// [`GlobalAlloc`] adapter over the global break heap.
///
/// Serves layouts up to the payload granule's alignment; anything stricter
/// is refused with null, as the break protocol cannot promise more.
#[cfg(unix)]
pub struct BreakHeap;

#[cfg(unix)]
// SAFETY: all four methods delegate to the lock-serialized global heap;
// blocks are never handed to two owners and never move underneath a caller.
unsafe impl GlobalAlloc for BreakHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAYLOAD_GRANULE {
            return ptr::null_mut();
        }
        match global_heap().allocate(layout.size()) {
            Some(payload) => payload.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: `ptr` was produced by `alloc` on the same global heap.
        unsafe { global_heap().release(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAYLOAD_GRANULE {
            return ptr::null_mut();
        }
        match global_heap().zero_allocate(layout.size(), 1) {
            Some(payload) => payload.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > PAYLOAD_GRANULE {
            return ptr::null_mut();
        }
        // SAFETY: `ptr` was produced by `alloc` on the same global heap.
        match unsafe { global_heap().resize(ptr, new_size) } {
            Some(payload) => payload.as_ptr(),
            None => ptr::null_mut(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // One combined smoke test: the global heap moves the real process
    // break, so the churn is kept to a single allocate/write/free cycle.
    #[test]
    fn c_abi_round_trip_on_the_process_break() {
        // SAFETY: fresh allocation, written within bounds, freed once.
        unsafe {
            let p = monoheap_malloc(24).cast::<u8>();
            assert!(!p.is_null());
            assert_eq!(p as usize % PAYLOAD_GRANULE, 0);

            for i in 0..24 {
                p.add(i).write(i as u8);
            }
            for i in 0..24 {
                assert_eq!(p.add(i).read(), i as u8);
            }

            let z = monoheap_calloc(4, 8).cast::<u8>();
            assert!(!z.is_null());
            assert!((0..32).all(|i| z.add(i).read() == 0));

            assert!(monoheap_malloc(0).is_null());
            assert!(monoheap_calloc(usize::MAX, 2).is_null());

            monoheap_free(z.cast::<c_void>());
            monoheap_free(p.cast::<c_void>());
            monoheap_free(ptr::null_mut());
        }
    }

    #[test]
    fn global_alloc_adapter_round_trip() {
        let heap = BreakHeap;
        // SAFETY: valid layouts; the block is written in bounds and freed
        // exactly once.
        unsafe {
            let layout = Layout::from_size_align(40, 8).unwrap();
            let p = heap.alloc(layout);
            assert!(!p.is_null());
            p.write_bytes(0x42, 40);

            let grown = heap.realloc(p, layout, 80);
            assert!(!grown.is_null());
            assert!((0..40).all(|i| grown.add(i).read() == 0x42));
            heap.dealloc(grown, Layout::from_size_align(80, 8).unwrap());

            // Alignments past the payload granule are refused.
            let strict = Layout::from_size_align(8, 64).unwrap();
            assert!(heap.alloc(strict).is_null());
        }
    }
}
