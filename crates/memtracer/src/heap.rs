use std::alloc::Layout;
use std::ptr;

/// Malloc-style allocation interface the tracer records against.
///
/// Implementations must be thread-safe; the tracer calls them from
/// whichever thread holds its lock.
pub trait Heap: Send {
    /// Allocate `size` bytes, returning null on exhaustion. A zero
    /// `size` is treated as a one byte request.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Release a block previously returned by [`Heap::allocate`] with
    /// the same `size`.
    ///
    /// # Safety
    /// `ptr` must originate from this heap's `allocate` and must not
    /// be released twice.
    unsafe fn release(&self, ptr: *mut u8, size: usize);
}

/// The process heap via `std::alloc`. Blocks are word aligned, which
/// is what the guarded heap needs for its canary stamps.
pub struct SystemHeap;

fn word_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), std::mem::align_of::<usize>()).ok()
}

impl Heap for SystemHeap {
    fn allocate(&self, size: usize) -> *mut u8 {
        let Some(layout) = word_layout(size) else {
            return ptr::null_mut();
        };
        unsafe { std::alloc::alloc(layout) }
    }

    unsafe fn release(&self, ptr: *mut u8, size: usize) {
        let Some(layout) = word_layout(size) else {
            return;
        };
        unsafe { std::alloc::dealloc(ptr, layout) }
    }
}
