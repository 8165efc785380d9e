//! Allocator core.
//!
//! The four public operations — `allocate`, `release`, `zero_allocate`,
//! `resize` — each take the single operation lock, consult and mutate the
//! ledger, optionally move the segment break, and drop the lock before
//! returning. The lock covers list traversal and the break move only, never
//! caller-supplied work.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::heap::brk::HeapSegment;
use crate::heap::header::{pad_to_header, round_to_granule, BlockHandle, HEADER_SIZE};
use crate::heap::ledger::{HeapLedger, LedgerFault, LedgerSummary};

/// Heap lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: HeapLogLevel,
    /// API symbol (`allocate`, `release`, `zero_allocate`, `resize`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `shrink`, ...).
    pub event: &'static str,
    /// Payload address involved in the event.
    pub ptr: Option<usize>,
    /// Requested size involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: blocks currently owned by callers.
    pub live_blocks: usize,
    /// Snapshot: blocks retained for reuse.
    pub free_blocks: usize,
    /// Snapshot: usable bytes currently carved from the segment.
    pub carved_bytes: usize,
}

/// Point-in-time allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Blocks currently owned by callers.
    pub live_blocks: usize,
    /// Blocks retained in the ledger for reuse.
    pub free_blocks: usize,
    /// Usable bytes currently carved from the segment.
    pub carved_bytes: usize,
    /// Allocations served from the ledger instead of the segment.
    pub reuse_hits: u64,
    /// Blocks physically returned to the segment.
    pub shrink_count: u64,
}

/// Everything the operation lock guards: the segment, the ledger, and the
/// lifecycle/accounting state.
struct HeapState<S> {
    segment: S,
    ledger: HeapLedger,
    next_decision_id: u64,
    lifecycle: Vec<HeapLogRecord>,
    live_blocks: usize,
    free_blocks: usize,
    carved_bytes: usize,
    reuse_hits: u64,
    shrink_count: u64,
}

/// Single-segment heap manager.
///
/// One owned structure holds the block list and the lock; operations
/// serialize through that lock, so concurrent callers never observe a
/// half-linked ledger or claim the same free block.
pub struct HeapAllocator<S: HeapSegment> {
    state: Mutex<HeapState<S>>,
}

impl<S: HeapSegment> HeapAllocator<S> {
    /// A heap manager over `segment`, starting with an empty ledger.
    pub fn new(segment: S) -> Self {
        Self {
            state: Mutex::new(HeapState {
                segment,
                ledger: HeapLedger::new(),
                next_decision_id: 1,
                lifecycle: Vec::new(),
                live_blocks: 0,
                free_blocks: 0,
                carved_bytes: 0,
                reuse_hits: 0,
                shrink_count: 0,
            }),
        }
    }

    /// Hands out at least `size` writable, uninitialized bytes, granule
    /// aligned.
    ///
    /// A free block with enough capacity is reused first-fit; otherwise the
    /// segment grows by header plus payload. `size == 0` is refused outright
    /// with no lock taken and no ledger effect.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let mut state = self.state.lock();
        state.allocate_locked("allocate", size).map(BlockHandle::payload)
    }

    /// Returns a block to the ledger for reuse, or to the segment when its
    /// payload ends exactly at the break top. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this allocator that has
    /// not been released since.
    pub unsafe fn release(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        let mut state = self.state.lock();
        // SAFETY: caller contract — `payload` came from this allocator.
        let block = unsafe { BlockHandle::from_payload(payload) };
        state.release_locked(block);
    }

    /// `count * elem_size` zero-filled bytes.
    ///
    /// Zero arguments are refused without side effects; a product that
    /// overflows is refused before any ledger or segment effect.
    pub fn zero_allocate(&self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        if count == 0 || elem_size == 0 {
            return None;
        }
        let mut state = self.state.lock();
        let Some(size) = count.checked_mul(elem_size) else {
            state.record_lifecycle(
                HeapLogLevel::Warn,
                "zero_allocate",
                "product_overflow",
                None,
                None,
                "denied",
                format!("count={count} elem_size={elem_size}"),
            );
            return None;
        };
        let block = state.allocate_locked("zero_allocate", size)?;
        block.zero_payload();
        Some(block.payload())
    }

    /// Grows a block, preserving its contents up to the old size.
    ///
    /// A null `ptr` or a zero `new_size` delegates entirely to
    /// [`allocate`](Self::allocate); in particular `resize(p, 0)` returns
    /// `None` and deliberately leaves `p` owned by the caller. A block whose
    /// capacity already covers `new_size` is returned unchanged. Otherwise a
    /// fresh allocation is made, the old contents copied, and the old block
    /// released; on allocation failure the original block is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer obtained from this allocator.
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            return self.allocate(new_size);
        }

        let mut state = self.state.lock();
        // SAFETY: caller contract — `payload` came from this allocator.
        let block = unsafe { BlockHandle::from_payload(payload) };

        if block.size() >= new_size {
            state.record_lifecycle(
                HeapLogLevel::Trace,
                "resize",
                "resize_in_place",
                Some(block.payload_addr()),
                Some(new_size),
                "success",
                format!("capacity={}", block.size()),
            );
            return Some(payload);
        }

        let old_size = block.size();
        let old_payload = block.payload_addr();
        let fresh = state.allocate_locked("resize", new_size)?;
        // SAFETY: `fresh` is a distinct block with capacity for `new_size`,
        // which exceeds `old_size` on this path.
        unsafe {
            fresh.copy_payload_from(block, old_size);
        }
        // The old block may sit at the break top, so nothing reads its
        // header past this point.
        state.release_locked(block);
        state.record_lifecycle(
            HeapLogLevel::Trace,
            "resize",
            "resize_move",
            Some(fresh.payload_addr()),
            Some(new_size),
            "success",
            format!("old_ptr={old_payload:#x} old_size={old_size}"),
        );
        Some(fresh.payload())
    }

    /// Walks the ledger under the lock: the accounting summary on success,
    /// the first structural fault otherwise.
    pub fn audit(&self) -> Result<LedgerSummary, LedgerFault> {
        self.state.lock().ledger.audit()
    }

    /// Point-in-time counters, taken under the lock.
    pub fn stats(&self) -> HeapStats {
        let state = self.state.lock();
        HeapStats {
            live_blocks: state.live_blocks,
            free_blocks: state.free_blocks,
            carved_bytes: state.carved_bytes,
            reuse_hits: state.reuse_hits,
            shrink_count: state.shrink_count,
        }
    }

    /// Copies the lifecycle records accumulated so far.
    pub fn lifecycle_logs(&self) -> Vec<HeapLogRecord> {
        self.state.lock().lifecycle.clone()
    }

    /// Takes and clears the lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.state.lock().lifecycle)
    }
}

impl<S: HeapSegment> HeapState<S> {
    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("heap::{symbol}::{decision_id:016x}");
        self.lifecycle.push(HeapLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            outcome,
            details: details.into(),
            live_blocks: self.live_blocks,
            free_blocks: self.free_blocks,
            carved_bytes: self.carved_bytes,
        });
    }

    /// The find-or-grow sequence, atomic with respect to other operations
    /// because the caller already holds the lock.
    fn allocate_locked(&mut self, symbol: &'static str, size: usize) -> Option<BlockHandle> {
        debug_assert!(size > 0);

        if let Some(block) = self.ledger.find_reusable(size) {
            block.set_free(false);
            self.live_blocks += 1;
            self.free_blocks -= 1;
            self.reuse_hits += 1;
            self.record_lifecycle(
                HeapLogLevel::Trace,
                symbol,
                "alloc",
                Some(block.payload_addr()),
                Some(size),
                "success",
                format!("path=ledger_reuse capacity={}", block.size()),
            );
            return Some(block);
        }

        let pad = pad_to_header(self.segment.current_top());
        let Some(total) = round_to_granule(size)
            .and_then(|usable| usable.checked_add(HEADER_SIZE))
            .and_then(|t| t.checked_add(pad))
        else {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                symbol,
                "carve_overflow",
                None,
                Some(size),
                "denied",
                "carve_size_exceeds_usize",
            );
            return None;
        };
        let Ok(delta) = isize::try_from(total) else {
            self.record_lifecycle(
                HeapLogLevel::Warn,
                symbol,
                "carve_overflow",
                None,
                Some(size),
                "denied",
                "carve_size_exceeds_isize",
            );
            return None;
        };

        let base = match self.segment.extend_or_shrink(delta) {
            Ok(base) => base,
            Err(err) => {
                self.record_lifecycle(
                    HeapLogLevel::Warn,
                    symbol,
                    "segment_refused",
                    None,
                    Some(size),
                    "oom",
                    err.to_string(),
                );
                return None;
            }
        };

        let usable = total - pad - HEADER_SIZE;
        // SAFETY: the segment just granted `pad + HEADER_SIZE + usable`
        // fresh bytes at `base`; `base + pad` sits on the header alignment.
        let block = unsafe {
            BlockHandle::carve(NonNull::new_unchecked(base.as_ptr().add(pad)), usable)
        };
        self.ledger.push_back(block);
        self.live_blocks += 1;
        self.carved_bytes += usable;
        self.record_lifecycle(
            HeapLogLevel::Trace,
            symbol,
            "alloc",
            Some(block.payload_addr()),
            Some(size),
            "success",
            format!("path=segment_carve usable={usable} pad={pad}"),
        );
        Some(block)
    }

    fn release_locked(&mut self, block: BlockHandle) {
        let payload = block.payload_addr();
        let size = block.size();
        let top = self.segment.current_top();

        if payload + size == top {
            if self.ledger.is_tail(block) {
                self.ledger.retire_tail();
                self.debit_live(block, "release");
                self.debit_carved(block, "release");

                let Some(total) = HEADER_SIZE
                    .checked_add(size)
                    .and_then(|t| isize::try_from(t).ok())
                else {
                    self.record_lifecycle(
                        HeapLogLevel::Error,
                        "release",
                        "shrink_overflow",
                        Some(payload),
                        Some(size),
                        "leaked",
                        "delta_exceeds_isize",
                    );
                    return;
                };
                match self.segment.extend_or_shrink(-total) {
                    Ok(_) => {
                        self.shrink_count += 1;
                        self.record_lifecycle(
                            HeapLogLevel::Trace,
                            "release",
                            "shrink",
                            Some(payload),
                            Some(size),
                            "success",
                            format!("returned_bytes={total}"),
                        );
                    }
                    Err(err) => {
                        self.record_lifecycle(
                            HeapLogLevel::Error,
                            "release",
                            "shrink_failed",
                            Some(payload),
                            Some(size),
                            "leaked",
                            err.to_string(),
                        );
                    }
                }
                return;
            }

            // Blocks are carved in break order, so the block at the top must
            // be the tail; anything else is a corrupted ledger or a foreign
            // pointer. Degrade to an ordinary free instead of excising the
            // wrong header.
            self.record_lifecycle(
                HeapLogLevel::Error,
                "release",
                "invariant_break_block_not_tail",
                Some(payload),
                Some(size),
                "recovered",
                format!("top={top:#x}"),
            );
        }

        block.set_free(true);
        self.debit_live(block, "release");
        self.free_blocks += 1;
        self.record_lifecycle(
            HeapLogLevel::Trace,
            "release",
            "free",
            Some(payload),
            Some(size),
            "success",
            "path=ledger_retain",
        );
    }

    fn debit_live(&mut self, block: BlockHandle, symbol: &'static str) {
        match self.live_blocks.checked_sub(1) {
            Some(next) => self.live_blocks = next,
            None => {
                self.record_lifecycle(
                    HeapLogLevel::Error,
                    symbol,
                    "invariant_live_blocks_underflow",
                    Some(block.payload_addr()),
                    Some(block.size()),
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
    }

    fn debit_carved(&mut self, block: BlockHandle, symbol: &'static str) {
        match self.carved_bytes.checked_sub(block.size()) {
            Some(next) => self.carved_bytes = next,
            None => {
                self.carved_bytes = 0;
                self.record_lifecycle(
                    HeapLogLevel::Error,
                    symbol,
                    "invariant_carved_bytes_underflow",
                    Some(block.payload_addr()),
                    Some(block.size()),
                    "recovered",
                    "checked_sub_failed",
                );
            }
        }
    }
}
