//! The heap-growth primitive.
//!
//! The allocator consumes "move the break" as an abstract collaborator:
//! [`HeapSegment`]. [`SbrkSegment`] drives the real process break and is the
//! only place the syscall is touched; [`ArenaSegment`] is a deterministic,
//! owned stand-in that makes exhaustion and shrink behavior testable without
//! moving the process break.

use std::ptr::NonNull;

use thiserror::Error;

/// Failure reported when a segment cannot move its break.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// The segment refused to move the break by `delta` bytes.
    #[error("heap segment cannot move its break by {delta} bytes")]
    Exhausted { delta: isize },
}

/// A single growable heap segment with a movable top.
///
/// A positive delta extends the segment and yields the address of the newly
/// available region; a negative delta shrinks it, the caller guaranteeing
/// that the released bytes sit exactly at the current top. Failure is a
/// typed error, never a sentinel address.
pub trait HeapSegment {
    fn extend_or_shrink(&mut self, delta: isize) -> Result<NonNull<u8>, SegmentError>;

    /// Where the managed segment currently ends.
    fn current_top(&self) -> usize;
}

/// The process break, moved through `sbrk`.
///
/// There is exactly one break per process; the crate's global heap owns the
/// one value of this type and routes every move through it.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct SbrkSegment(());

#[cfg(unix)]
impl SbrkSegment {
    pub const fn new() -> Self {
        Self(())
    }
}

#[cfg(unix)]
impl HeapSegment for SbrkSegment {
    fn extend_or_shrink(&mut self, delta: isize) -> Result<NonNull<u8>, SegmentError> {
        // SAFETY: `sbrk` accepts any increment and reports failure through
        // the -1 sentinel, mapped to a typed error here.
        let raw = unsafe { libc::sbrk(delta as libc::intptr_t) };
        if raw == usize::MAX as *mut libc::c_void {
            return Err(SegmentError::Exhausted { delta });
        }
        NonNull::new(raw.cast::<u8>()).ok_or(SegmentError::Exhausted { delta })
    }

    fn current_top(&self) -> usize {
        // SAFETY: a zero increment only queries the break.
        unsafe { libc::sbrk(0) as usize }
    }
}

/// Backing unit for [`ArenaSegment`]; keeps the owned store on the same
/// alignment the real break path provides after its first carve pad.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct ArenaChunk([u8; 16]);

/// A deterministic in-memory segment with a fixed capacity.
///
/// Extension fails with [`SegmentError::Exhausted`] once capacity runs out,
/// so growth-failure paths are exercised on demand instead of by actually
/// starving the process.
pub struct ArenaSegment {
    store: Box<[ArenaChunk]>,
    brk: usize,
}

impl ArenaSegment {
    /// A segment able to hold `capacity` bytes, rounded up to whole chunks.
    pub fn with_capacity(capacity: usize) -> Self {
        let chunks = capacity.div_ceil(std::mem::size_of::<ArenaChunk>());
        Self {
            store: vec![ArenaChunk([0; 16]); chunks].into_boxed_slice(),
            brk: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.store.len() * std::mem::size_of::<ArenaChunk>()
    }

    /// Bytes currently below the break.
    pub fn in_use(&self) -> usize {
        self.brk
    }

    fn base(&self) -> usize {
        self.store.as_ptr() as usize
    }
}

impl HeapSegment for ArenaSegment {
    fn extend_or_shrink(&mut self, delta: isize) -> Result<NonNull<u8>, SegmentError> {
        let refused = SegmentError::Exhausted { delta };
        let next = if delta >= 0 {
            let next = self.brk.checked_add(delta.unsigned_abs()).ok_or(refused)?;
            if next > self.capacity() {
                return Err(refused);
            }
            next
        } else {
            self.brk.checked_sub(delta.unsigned_abs()).ok_or(refused)?
        };

        // Extension yields the old top (the newly available region); a
        // shrink yields the lowered top.
        let region = self.brk.min(next);
        self.brk = next;
        // SAFETY: `base + region` stays within (or one past) the owned store.
        Ok(unsafe { NonNull::new_unchecked((self.base() + region) as *mut u8) })
    }

    fn current_top(&self) -> usize {
        self.base() + self.brk
    }
}
