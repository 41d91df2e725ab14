//! Derived per-arena statistics
//!
//! The header has no spare words, so nothing is counted as the arena
//! runs; statistics are gathered on demand by walking the physical
//! chain. O(blocks), cheap enough for diagnostics and tests.

use core::ptr;

use crate::arena::Arena;
use crate::block::BlockHeader;

/// Snapshot of an arena's block population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Usable bytes after the arena header and any head padding
    pub capacity: usize,
    /// Occupied blocks, including nested-arena and bump overlays
    pub live_blocks: usize,
    /// Free blocks currently in the reuse tree
    pub free_blocks: usize,
    /// Payload bytes held by occupied blocks
    pub live_bytes: usize,
    /// Payload bytes held by reusable free blocks
    pub free_bytes: usize,
    /// Largest single reusable free block
    pub largest_free_block: usize,
    /// Uncarved bytes in the tail
    pub free_size_in_tail: usize,
}

impl Arena {
    /// Walk the block chain and report what it holds.
    pub fn stats(&self) -> ArenaStats {
        let a = self.raw();
        let mut stats = ArenaStats::default();
        // SAFETY: the walk stays on headers the arena owns
        unsafe {
            stats.capacity = (*a).capacity();
            stats.free_size_in_tail = (*a).free_size_in_tail();

            let tail = (*a).tail_block();
            let mut cur = (*a).data() as *mut BlockHeader;
            loop {
                if ptr::eq(cur, tail) {
                    if !(*cur).is_free() {
                        // Fully packed: the tail pointer names the last
                        // occupied block.
                        stats.live_blocks += 1;
                        stats.live_bytes += (*cur).size();
                    }
                    break;
                }
                let size = (*cur).size();
                if (*cur).is_free() {
                    stats.free_blocks += 1;
                    stats.free_bytes += size;
                    if size > stats.largest_free_block {
                        stats.largest_free_block = size;
                    }
                } else {
                    stats.live_blocks += 1;
                    stats.live_bytes += size;
                }
                cur = (*cur).next_addr() as *mut BlockHeader;
            }
        }
        stats
    }
}
