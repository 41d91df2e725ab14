//! Bump sub-allocator
//!
//! A fixed region carved from one parent block, handed out as a
//! monotonically advancing cursor. The bump header overlays the block
//! header the same way a nested arena does: size and prev keep their
//! block meaning, the owner slot already names the parent arena, and
//! the magic slot becomes the cursor. Individual bump allocations are
//! never freed; the whole region is reset, trimmed, or released at
//! once.

use core::ptr::{self, NonNull};

use crate::arena::{alloc_impl, release_block, Arena, ArenaHeader};
use crate::block::{align_up, BlockHeader, HEADER_SIZE};
use crate::config::{MAX_ALIGNMENT, MIN_BUFFER_SIZE, WORD_SIZE};
use crate::tag::{PrevLink, SizeAlign};

#[repr(C)]
pub(crate) struct BumpHeader {
    size_align: SizeAlign,
    #[allow(dead_code)]
    prev: PrevLink,
    arena: *mut ArenaHeader,
    /// Cursor, measured from the header base; starts past the header.
    offset: usize,
}

const _: () = assert!(core::mem::size_of::<BumpHeader>() == HEADER_SIZE);

impl BumpHeader {
    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn capacity(&self) -> usize {
        self.size_align.size()
    }

    /// One past the last allocatable byte, as a cursor value.
    fn limit(&self) -> usize {
        HEADER_SIZE + self.capacity()
    }
}

/// Handle to a bump region resident inside a parent arena.
pub struct Bump {
    header: NonNull<BumpHeader>,
}

impl Bump {
    /// Carve a bump region of at least `capacity` bytes out of `parent`.
    pub fn new(parent: &mut Arena, capacity: usize) -> Option<Bump> {
        // SAFETY: the parent handle owns its span; the allocated block
        // becomes the bump region
        unsafe {
            let a = parent.raw();
            let baseline = (*a).baseline_align();
            let (blk, _payload) = alloc_impl(a, capacity, baseline).ok()?;
            let header = blk.as_ptr() as *mut BumpHeader;
            // The owner slot already names the arena; only the cursor
            // needs installing over the magic slot.
            (*header).offset = HEADER_SIZE;
            Some(Bump {
                header: NonNull::new_unchecked(header),
            })
        }
    }

    /// Allocate `n` bytes. Consecutive allocations are contiguous; no
    /// alignment is applied.
    pub fn alloc(&mut self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }
        let h = self.header.as_ptr();
        // SAFETY: the handle owns the region
        unsafe {
            let offset = (*h).offset;
            let next = offset.checked_add(n)?;
            if next > (*h).limit() {
                return None;
            }
            (*h).offset = next;
            Some(NonNull::new_unchecked(((*h).addr() + offset) as *mut u8))
        }
    }

    /// Allocate `n` bytes whose address is a multiple of `align`, a
    /// power of two.
    pub fn alloc_aligned(&mut self, n: usize, align: usize) -> Option<NonNull<u8>> {
        if n == 0 || !align.is_power_of_two() || align > MAX_ALIGNMENT {
            return None;
        }
        let h = self.header.as_ptr();
        // SAFETY: the handle owns the region
        unsafe {
            let base = (*h).addr();
            let addr = align_up(base + (*h).offset, align);
            let offset = addr - base;
            let next = offset.checked_add(n)?;
            if next > (*h).limit() {
                return None;
            }
            (*h).offset = next;
            Some(NonNull::new_unchecked(addr as *mut u8))
        }
    }

    /// Roll the cursor back to the start of the region.
    pub fn reset(&mut self) {
        let h = self.header.as_ptr();
        // SAFETY: the handle owns the region
        unsafe {
            (*h).offset = HEADER_SIZE;
        }
    }

    /// Shrink the region to the used bytes rounded up to the parent's
    /// baseline alignment and donate the surplus back to the parent,
    /// either by growing the adjacent free space or as a new free block.
    /// Regions whose surplus is too small to stand alone are left
    /// untouched.
    pub fn trim(&mut self) {
        let h = self.header.as_ptr();
        // SAFETY: the handle owns the region and the parent owns the
        // surrounding span
        unsafe {
            let a = (*h).arena;
            if a.is_null() {
                return;
            }
            let cap = (*h).capacity();
            let used = (*h).offset - HEADER_SIZE;
            let baseline = (*a).baseline_align();
            let new_cap = align_up(used, baseline).max(MIN_BUFFER_SIZE);
            if new_cap >= cap {
                return;
            }
            let surplus = cap - new_cap;
            if surplus < HEADER_SIZE {
                return;
            }

            let blk = h as *mut BlockHeader;
            let payload = (*h).addr() + HEADER_SIZE;
            let tail = (*a).tail_block();

            if ptr::eq(blk, tail) {
                // The bump absorbed the end of the span; the carved
                // surplus simply becomes the new tail.
                (*h).size_align.set_size(new_cap);
                let carved = (payload + new_cap) as *mut BlockHeader;
                ptr::write(carved, BlockHeader::new_tail(baseline, blk));
                (*a).set_tail_block(carved);
                return;
            }

            let succ = (payload + cap) as *mut BlockHeader;
            let succ_open = if ptr::eq(succ, tail) {
                (*tail).is_free()
            } else {
                (*succ).is_free()
            };
            if !succ_open && surplus < HEADER_SIZE + MIN_BUFFER_SIZE {
                return;
            }

            (*h).size_align.set_size(new_cap);
            let carved = (payload + new_cap) as *mut BlockHeader;
            ptr::write(
                carved,
                BlockHeader::new_free(surplus - HEADER_SIZE, WORD_SIZE, blk),
            );
            (*succ).set_prev_ptr(carved);
            release_block(a, carved);
        }
    }

    /// Release the whole region back to the parent arena.
    pub fn free(self) {
        let h = self.header.as_ptr();
        // SAFETY: the handle is consumed; the block returns to the
        // parent
        unsafe {
            let a = (*h).arena;
            if a.is_null() {
                return;
            }
            release_block(a, h as *mut BlockHeader);
        }
    }

    /// Payload bytes in the region.
    pub fn capacity(&self) -> usize {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().capacity() }
    }

    /// Bytes handed out since creation or the last reset.
    pub fn used_bytes(&self) -> usize {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().offset - HEADER_SIZE }
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        // SAFETY: the header outlives the handle
        let h = unsafe { self.header.as_ref() };
        h.limit() - h.offset
    }
}
