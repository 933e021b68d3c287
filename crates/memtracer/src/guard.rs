use crate::heap::Heap;
use std::ptr;

const WORD: usize = std::mem::size_of::<usize>();
const CANARY: usize = 0xFEED_FACE_CAFE_BEEF_u64 as usize;

/// Outcome of the canary validation performed on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryState {
    Intact,
    Corrupt,
}

/// Red-zone decorator over a [`Heap`].
///
/// Block layout: a leading canary word and the aligned user size, then
/// the word-aligned user region, then a trailing canary placed
/// immediately past it:
///
/// ```text
/// [ canary ][ asize ][ user region, align_up(n) bytes ][ canary ]
/// ```
///
/// Both canaries are validated on release; a corrupt block is still
/// freed so nothing leaks, and the caller is told what was found.
pub struct GuardedHeap {
    inner: Box<dyn Heap>,
}

fn align_up(n: usize) -> usize {
    (n + WORD - 1) & !(WORD - 1)
}

impl GuardedHeap {
    pub fn new(inner: Box<dyn Heap>) -> Self {
        Self { inner }
    }

    pub fn allocate(&self, size: usize) -> *mut u8 {
        let asize = align_up(size.max(1));
        let Some(total) = asize.checked_add(3 * WORD) else {
            return ptr::null_mut();
        };
        let raw = self.inner.allocate(total);
        if raw.is_null() {
            return raw;
        }
        unsafe {
            let head = raw as *mut usize;
            head.write(CANARY);
            head.add(1).write(asize);
            let user = raw.add(2 * WORD);
            (user.add(asize) as *mut usize).write(CANARY);
            user
        }
    }

    /// Validate the canaries and free the underlying block.
    ///
    /// `size` is the size originally requested for `user`. The stored
    /// header is cross-checked against it rather than trusted, so a
    /// corrupted header cannot steer the tail probe or the inner free.
    ///
    /// # Safety
    /// `user` must originate from this heap's `allocate` with the same
    /// `size`, and must not be released twice.
    pub unsafe fn release(&self, user: *mut u8, size: usize) -> CanaryState {
        let asize = align_up(size.max(1));
        let raw = unsafe { user.sub(2 * WORD) };
        let state = unsafe {
            let head = raw as *const usize;
            let stored = head.add(1).read();
            let tail = (user.add(asize) as *const usize).read();
            if head.read() == CANARY && stored == asize && tail == CANARY {
                CanaryState::Intact
            } else {
                CanaryState::Corrupt
            }
        };
        unsafe { self.inner.release(raw, asize + 3 * WORD) };
        state
    }
}
