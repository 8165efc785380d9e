//! The unified block list.
//!
//! One singly linked list of every block ever carved from the segment, free
//! or live, in exact carve order. The ledger owns no concurrency logic; the
//! allocator core serializes access around it.

use thiserror::Error;

use crate::heap::header::BlockHandle;

/// Accounting snapshot produced by a clean [`HeapLedger::audit`] walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSummary {
    /// Blocks currently linked, live and free alike.
    pub blocks: usize,
    /// Blocks currently marked free.
    pub free_blocks: usize,
    /// Usable bytes across all linked blocks.
    pub payload_bytes: usize,
    /// Usable bytes across free blocks only.
    pub free_bytes: usize,
}

/// Structural corruption detected while walking the ledger.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFault {
    /// Exactly one anchor is set.
    #[error("ledger anchors disagree: head={head:?} tail={tail:?}")]
    AnchorMismatch {
        head: Option<usize>,
        tail: Option<usize>,
    },
    /// A link points at or below its own header, which also covers cycles.
    #[error("link at {prev:#x} points backwards to {next:#x}")]
    MisorderedLink { prev: usize, next: usize },
    /// A block's payload extends past the next header.
    #[error("block at {prev:#x} spans to {prev_end:#x}, past the next header at {next:#x}")]
    OverlappingBlocks {
        prev: usize,
        prev_end: usize,
        next: usize,
    },
    /// The tail anchor is not the final linked block.
    #[error("tail anchor {tail:#x} is not the last linked block {last:#x}")]
    StaleTail { tail: usize, last: usize },
}

/// Anchors of the carve-ordered header list.
pub(crate) struct HeapLedger {
    /// First header ever carved, or none while the segment is empty.
    head: Option<BlockHandle>,
    /// Most recently carved header, or none.
    tail: Option<BlockHandle>,
}

impl HeapLedger {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    /// First-fit scan from `head`: the earliest-carved free block with
    /// enough capacity wins, regardless of how much space goes to waste.
    /// That trade-off is deliberate — fragmentation is accepted in exchange
    /// for a list any reader can follow.
    pub(crate) fn find_reusable(&self, size: usize) -> Option<BlockHandle> {
        let mut cursor = self.head;
        while let Some(block) = cursor {
            if block.is_free() && block.size() >= size {
                return Some(block);
            }
            cursor = block.next();
        }
        None
    }

    /// Appends a freshly carved block, keeping the list in carve order.
    pub(crate) fn push_back(&mut self, block: BlockHandle) {
        if self.head.is_none() {
            self.head = Some(block);
        }
        if let Some(tail) = self.tail {
            tail.set_next(Some(block));
        }
        self.tail = Some(block);
    }

    pub(crate) fn is_tail(&self, block: BlockHandle) -> bool {
        self.tail == Some(block)
    }

    /// Excises the current tail. A sole block clears both anchors; otherwise
    /// the list is walked from `head` to the predecessor, which is unlinked
    /// from the excised block and becomes the new tail.
    pub(crate) fn retire_tail(&mut self) {
        let (Some(head), Some(tail)) = (self.head, self.tail) else {
            return;
        };
        if head == tail {
            self.head = None;
            self.tail = None;
            return;
        }
        let mut cursor = head;
        while let Some(next) = cursor.next() {
            if next == tail {
                cursor.set_next(None);
                self.tail = Some(cursor);
                return;
            }
            cursor = next;
        }
    }

    /// Walks the whole list and returns its accounting, or the first
    /// structural fault found. Carve-order monotonicity is checked on every
    /// link, which rules out cycles without a visited set.
    pub(crate) fn audit(&self) -> Result<LedgerSummary, LedgerFault> {
        let (head, tail) = match (self.head, self.tail) {
            (None, None) => return Ok(LedgerSummary::default()),
            (Some(head), Some(tail)) => (head, tail),
            (head, tail) => {
                return Err(LedgerFault::AnchorMismatch {
                    head: head.map(BlockHandle::header_addr),
                    tail: tail.map(BlockHandle::header_addr),
                });
            }
        };

        let mut summary = LedgerSummary::default();
        let mut cursor = head;
        loop {
            summary.blocks += 1;
            summary.payload_bytes += cursor.size();
            if cursor.is_free() {
                summary.free_blocks += 1;
                summary.free_bytes += cursor.size();
            }

            let Some(next) = cursor.next() else {
                break;
            };
            if next.header_addr() <= cursor.header_addr() {
                return Err(LedgerFault::MisorderedLink {
                    prev: cursor.header_addr(),
                    next: next.header_addr(),
                });
            }
            let prev_end = cursor.payload_addr() + cursor.size();
            if prev_end > next.header_addr() {
                return Err(LedgerFault::OverlappingBlocks {
                    prev: cursor.header_addr(),
                    prev_end,
                    next: next.header_addr(),
                });
            }
            cursor = next;
        }

        if cursor != tail {
            return Err(LedgerFault::StaleTail {
                tail: tail.header_addr(),
                last: cursor.header_addr(),
            });
        }
        Ok(summary)
    }
}
