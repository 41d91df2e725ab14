//! Arena lifecycle and the allocate/free paths
//!
//! The arena header lives at the start of the span it manages and is
//! byte-compatible with a block header: a nested arena is
//! indistinguishable from an occupied block to its parent. Word 0 packs
//! the capacity with the baseline-alignment exponent exactly the way a
//! block packs its size; word 1 is the physical prev link (null unless
//! nested); word 2 holds the tail pointer with the `is_dynamic` and
//! `is_nested` tags in the slot occupied blocks use for their owner;
//! word 3 holds the free-tree root in the magic slot. The root is a
//! pointer and therefore even, so it can never satisfy the (odd) magic
//! check and a live nested arena cannot be freed through [`free`].
//!
//! Allocation tries the free tree before growing the tail, so reuse
//! happens before growth and the live set stays compact. Every free
//! coalesces with both physical neighbours and reabsorbs into the tail
//! when it touches it, which keeps the tree bounded by the number of
//! distinct free runs.

use core::mem::align_of;
use core::ptr::{self, NonNull};

use log::{debug, trace};

use crate::block::{align_up, write_back_link, BlockHeader, HEADER_SIZE};
use crate::config::{
    BASELINE_ALIGNMENT, BLOCK_MAGIC, MAX_ALIGNMENT, MAX_BLOCK_SIZE, MIN_BUFFER_SIZE, WORD_SIZE,
};
use crate::error::{AllocError, FreeError};
use crate::invariant;
use crate::poison;
use crate::tag::{self, PrevLink, SizeAlign, TailRef};
use crate::tree;

#[cfg(feature = "alloc")]
use core::alloc::Layout;

#[cfg(feature = "alloc")]
use crate::source::{GlobalHeap, SpanSource};

/// Size of the arena header in bytes. Identical to the block header by
/// construction; the overlay depends on it.
pub const ARENA_HEADER_SIZE: usize = core::mem::size_of::<ArenaHeader>();

const _: () = assert!(ARENA_HEADER_SIZE == HEADER_SIZE);

/// In-span arena header. See the module docs for the word-by-word
/// correspondence with [`BlockHeader`].
#[repr(C)]
pub(crate) struct ArenaHeader {
    capacity_align: SizeAlign,
    prev: PrevLink,
    tail: TailRef,
    free_root: *mut BlockHeader,
}

impl ArenaHeader {
    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity_align.size()
    }

    pub(crate) fn baseline_align(&self) -> usize {
        self.capacity_align.align()
    }

    pub(crate) fn is_dynamic(&self) -> bool {
        self.tail.is_dynamic()
    }

    pub(crate) fn is_nested(&self) -> bool {
        self.tail.is_nested()
    }

    pub(crate) fn tail_block(&self) -> *mut BlockHeader {
        self.tail.ptr()
    }

    pub(crate) fn set_tail_block(&mut self, block: *mut BlockHeader) {
        self.tail.set_ptr(block);
    }

    /// Start of the block region: the first header sits here.
    ///
    /// Derived, not stored. A nested arena's blocks start right after
    /// its header; otherwise the start is placed so the first payload
    /// lands on the baseline alignment, which may leave tagged padding
    /// between the arena header and the first block.
    pub(crate) fn data(&self) -> usize {
        if self.is_nested() {
            self.addr() + ARENA_HEADER_SIZE
        } else {
            align_up(
                self.addr() + ARENA_HEADER_SIZE + HEADER_SIZE,
                self.baseline_align(),
            ) - HEADER_SIZE
        }
    }

    /// One past the last managed byte.
    pub(crate) fn end(&self) -> usize {
        self.data() + self.capacity()
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        addr >= self.data() && addr < self.end()
    }

    /// Uncarved bytes left in the tail block, zero when the span is
    /// fully packed.
    pub(crate) fn free_size_in_tail(&self) -> usize {
        let tail = self.tail_block();
        // SAFETY: the tail pointer always names a valid header inside
        // the span
        unsafe {
            if (*tail).is_free() {
                self.end() - (*tail).payload_addr()
            } else {
                0
            }
        }
    }
}

/// Handle to an arena header resident at the start of its span.
///
/// The handle is the exclusive owner of the arena: all mutation goes
/// through it or through [`free`], which recovers the owning arena from
/// the pointer itself. Dropping the handle does not release a dynamic
/// arena's span; call [`destroy`](Arena::destroy).
#[derive(Debug)]
pub struct Arena {
    header: NonNull<ArenaHeader>,
}

impl Arena {
    /// Initialise an arena inside a caller-owned buffer.
    ///
    /// Returns `None` when the buffer is null, not word-aligned, or too
    /// small for the headers plus one minimum allocation.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `len` bytes for the
    /// arena's whole lifetime, and the buffer must not be touched by the
    /// caller while the arena lives.
    pub unsafe fn new_static(base: *mut u8, len: usize) -> Option<Arena> {
        if base.is_null() || (base as usize) % WORD_SIZE != 0 {
            return None;
        }
        if len < ARENA_HEADER_SIZE + HEADER_SIZE + MIN_BUFFER_SIZE {
            return None;
        }
        // SAFETY: per contract the whole span is ours
        let header = unsafe { init_in_place(base as usize, len, false, None) }?;
        debug!(
            "arena {:#x}: static, capacity {}",
            header.as_ptr() as usize,
            // SAFETY: just initialised
            unsafe { header.as_ref().capacity() },
        );
        Some(Arena { header })
    }

    /// Create an arena whose span is acquired from the global heap.
    ///
    /// The arena's capacity is exactly `capacity`; the provider is asked
    /// for `capacity` plus header and alignment slack. Returns `None`
    /// when the request is below the minimum or the provider fails.
    #[cfg(feature = "alloc")]
    pub fn new_dynamic(capacity: usize) -> Option<Arena> {
        Self::try_new_dynamic(capacity).ok()
    }

    /// Like [`new_dynamic`](Arena::new_dynamic) but reports why the
    /// construction failed.
    #[cfg(feature = "alloc")]
    pub fn try_new_dynamic(capacity: usize) -> Result<Arena, AllocError> {
        if capacity < ARENA_HEADER_SIZE + HEADER_SIZE + MIN_BUFFER_SIZE {
            return Err(AllocError::InvalidSize);
        }
        let layout = span_layout(capacity).ok_or(AllocError::InvalidSize)?;
        // SAFETY: the span is released with the same layout in destroy
        let base = unsafe { GlobalHeap.acquire(layout) }.ok_or(AllocError::ProviderFailure)?;
        // SAFETY: the acquired span is exclusively ours
        let header =
            unsafe { init_in_place(base.as_ptr() as usize, layout.size(), true, Some(capacity)) };
        match header {
            Some(header) => {
                debug!(
                    "arena {:#x}: dynamic, capacity {}",
                    header.as_ptr() as usize,
                    capacity
                );
                Ok(Arena { header })
            }
            None => {
                // SAFETY: acquired above and never handed out
                unsafe { GlobalHeap.release(base, layout) };
                Err(AllocError::InvalidSize)
            }
        }
    }

    /// Carve a child arena out of one block of `parent`.
    ///
    /// The child's header overlays the block header, so the parent sees
    /// the whole child as a single occupied block until
    /// [`destroy`](Arena::destroy) releases it.
    pub fn new_nested(parent: &mut Arena, capacity: usize) -> Option<Arena> {
        if capacity < HEADER_SIZE + MIN_BUFFER_SIZE {
            return None;
        }
        let a = parent.header.as_ptr();
        // SAFETY: the parent handle owns its span; the allocated block
        // becomes the child's span
        unsafe {
            let baseline = (*a).baseline_align();
            let (blk, _payload) = alloc_impl(a, capacity, baseline).ok()?;
            let child = blk.as_ptr() as *mut ArenaHeader;
            // Words 0 and 1 keep their block meaning (capacity = block
            // size, prev = parent chain). The owner slot becomes the
            // tagged tail, the magic slot the tree root.
            let head = (child as usize + ARENA_HEADER_SIZE) as *mut BlockHeader;
            (*child).tail = TailRef::new(head, false, true);
            (*child).free_root = ptr::null_mut();
            ptr::write(head, BlockHeader::new_tail(baseline, ptr::null_mut()));
            debug!(
                "arena {:#x}: nested in {:#x}, capacity {}",
                child as usize,
                a as usize,
                (*child).capacity()
            );
            Some(Arena {
                header: NonNull::new_unchecked(child),
            })
        }
    }

    /// Allocate `size` bytes at the baseline alignment.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let a = self.header.as_ptr();
        // SAFETY: the handle owns the arena
        unsafe {
            let align = (*a).baseline_align();
            alloc_impl(a, size, align).ok().map(|(_, p)| p)
        }
    }

    /// Allocate `size` bytes aligned to `align`, a power of two in
    /// `[WORD_SIZE, MAX_ALIGNMENT]`.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        // SAFETY: the handle owns the arena
        unsafe { alloc_impl(self.header.as_ptr(), size, align).ok().map(|(_, p)| p) }
    }

    /// Like [`alloc_aligned`](Arena::alloc_aligned) but reports why the
    /// request failed.
    pub fn try_alloc_aligned(
        &mut self,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: the handle owns the arena
        unsafe { alloc_impl(self.header.as_ptr(), size, align).map(|(_, p)| p) }
    }

    /// Allocate `count * size` zeroed bytes, failing on overflow.
    pub fn alloc_zeroed(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        self.try_alloc_zeroed(count, size).ok()
    }

    /// Like [`alloc_zeroed`](Arena::alloc_zeroed) but reports why the
    /// request failed.
    pub fn try_alloc_zeroed(
        &mut self,
        count: usize,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let total = count.checked_mul(size).ok_or(AllocError::SizeOverflow)?;
        let a = self.header.as_ptr();
        // SAFETY: the handle owns the arena
        let p = unsafe {
            let align = (*a).baseline_align();
            alloc_impl(a, total, align).map(|(_, p)| p)?
        };
        // SAFETY: the block holds at least `total` bytes
        unsafe { ptr::write_bytes(p.as_ptr(), 0, total) };
        Ok(p)
    }

    /// Return every block to the tail: the arena becomes equivalent to a
    /// freshly constructed one of the same capacity. Payload bytes keep
    /// their residual contents.
    pub fn reset(&mut self) {
        let a = self.header.as_ptr();
        // SAFETY: the handle owns the span; no block survives reset
        unsafe {
            let head = (*a).data() as *mut BlockHeader;
            ptr::write(
                head,
                BlockHeader::new_tail((*a).baseline_align(), ptr::null_mut()),
            );
            (*a).set_tail_block(head);
            (*a).free_root = ptr::null_mut();
            trace!("arena {:#x}: reset", a as usize);
        }
    }

    /// [`reset`](Arena::reset), then zero the whole payload area.
    pub fn reset_zeroed(&mut self) {
        self.reset();
        let a = self.header.as_ptr();
        // SAFETY: after reset the area past the tail header is unowned
        unsafe {
            let start = (*a).data() + HEADER_SIZE;
            ptr::write_bytes(start as *mut u8, 0, (*a).end() - start);
        }
    }

    /// Tear the arena down. Dynamic arenas release their span back to
    /// the provider, nested arenas return their block to the parent,
    /// static arenas are a no-op (the caller owns the buffer).
    pub fn destroy(self) {
        let a = self.header.as_ptr();
        // SAFETY: the handle is consumed; nothing refers to the arena
        // afterwards
        unsafe {
            if (*a).is_nested() {
                debug!("arena {:#x}: destroying nested", a as usize);
                if let Some(parent) = recover_parent(a) {
                    release_block(parent.as_ptr(), a as *mut BlockHeader);
                }
            } else if (*a).is_dynamic() {
                #[cfg(feature = "alloc")]
                {
                    debug!("arena {:#x}: destroying dynamic", a as usize);
                    if let Some(layout) = span_layout((*a).capacity()) {
                        GlobalHeap.release(NonNull::new_unchecked(a as *mut u8), layout);
                    }
                }
            }
        }
    }

    /// Total usable bytes after the arena header and any head padding.
    pub fn capacity(&self) -> usize {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().capacity() }
    }

    /// The arena-wide minimum alignment.
    pub fn baseline_align(&self) -> usize {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().baseline_align() }
    }

    /// Uncarved bytes remaining in the tail.
    pub fn free_size_in_tail(&self) -> usize {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().free_size_in_tail() }
    }

    pub fn is_dynamic(&self) -> bool {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().is_dynamic() }
    }

    pub fn is_nested(&self) -> bool {
        // SAFETY: the header outlives the handle
        unsafe { self.header.as_ref().is_nested() }
    }

    pub(crate) fn raw(&self) -> *mut ArenaHeader {
        self.header.as_ptr()
    }
}

/// Release a pointer back to whichever arena owns it.
///
/// The owning arena is recovered from the pointer: the word before it is
/// either the block's magic (no head pad) or a back-link to the header.
/// Anything that fails validation (null, misaligned, foreign, already
/// free, corrupted) is silently discarded; the primary defence against
/// wild pointers is the magic-XOR-pointer check, not diagnostics.
///
/// # Safety
/// `p` must be null, or point into memory where the preceding word and
/// the recovered header are readable. Pointers previously returned by an
/// arena allocation satisfy this for as long as the arena lives.
pub unsafe fn free(p: *mut u8) {
    let addr = p as usize;
    // SAFETY: validation reads one word before the pointer and only
    // trusts headers that pass every structural check
    unsafe {
        match validate(addr) {
            Ok((blk, a)) => {
                let blk = blk.as_ptr();
                if poison::poison_enabled() {
                    let len = (*blk).next_addr() - addr;
                    poison::poison_free(p, len);
                }
                release_block(a.as_ptr(), blk);
            }
            Err(reason) => {
                debug!("free: discarding pointer {:#x}: {}", addr, reason);
            }
        }
    }
}

#[cfg(feature = "alloc")]
fn span_layout(capacity: usize) -> Option<Layout> {
    let size = capacity.checked_add(ARENA_HEADER_SIZE + BASELINE_ALIGNMENT)?;
    Layout::from_size_align(size, BASELINE_ALIGNMENT).ok()
}

/// Lay the arena header, optional tagged padding and the empty tail into
/// a raw span.
///
/// # Safety
/// `[base, base + len)` must be exclusively owned, writable, and
/// word-aligned.
unsafe fn init_in_place(
    base: usize,
    len: usize,
    is_dynamic: bool,
    capacity_override: Option<usize>,
) -> Option<NonNull<ArenaHeader>> {
    let baseline = BASELINE_ALIGNMENT;
    let data = align_up(base + ARENA_HEADER_SIZE + HEADER_SIZE, baseline) - HEADER_SIZE;
    let end = base + len;
    if data + HEADER_SIZE + MIN_BUFFER_SIZE > end {
        return None;
    }
    let capacity = match capacity_override {
        Some(n) => n,
        None => end - data,
    };
    if capacity > MAX_BLOCK_SIZE {
        return None;
    }
    debug_assert!(data + capacity <= end);

    let arena = base as *mut ArenaHeader;
    let head = data as *mut BlockHeader;
    // SAFETY: per contract the span is ours; data and head derive from
    // base and stay inside it
    unsafe {
        ptr::write(
            arena,
            ArenaHeader {
                capacity_align: SizeAlign::new(capacity, baseline),
                prev: PrevLink::new(ptr::null_mut(), false, false),
                tail: TailRef::new(head, is_dynamic, false),
                free_root: ptr::null_mut(),
            },
        );
        if data != base + ARENA_HEADER_SIZE {
            // Tagged padding word: odd marker whose upper bits encode
            // the distance from the first block back to the arena
            // header.
            *((data - WORD_SIZE) as *mut usize) = ((data - base) << 1) | 1;
        }
        ptr::write(head, BlockHeader::new_tail(baseline, ptr::null_mut()));
    }
    NonNull::new(arena)
}

/// Both allocation paths. Returns the block header and the payload
/// pointer so nested arenas and bumps can overlay the header.
///
/// # Safety
/// `a` must point to a live arena header exclusively owned by the
/// caller.
pub(crate) unsafe fn alloc_impl(
    a: *mut ArenaHeader,
    size: usize,
    align: usize,
) -> Result<(NonNull<BlockHeader>, NonNull<u8>), AllocError> {
    // SAFETY: per contract the arena and every block in it are ours
    unsafe {
        if size == 0 || size > (*a).capacity() {
            return Err(AllocError::InvalidSize);
        }
        if !align.is_power_of_two() || align < WORD_SIZE || align > MAX_ALIGNMENT {
            return Err(AllocError::InvalidAlignment);
        }

        // Reuse before growth.
        let node = tree::best_fit((*a).free_root, size, align);
        if !node.is_null() {
            (*a).free_root = tree::remove((*a).free_root, node);
            return Ok(reuse_block(a, node, size, align));
        }

        alloc_in_tail(a, size, align).ok_or(AllocError::OutOfSpace)
    }
}

/// Stamp a detached free block as occupied, splitting off the trailing
/// remainder when it is worth a block of its own.
unsafe fn reuse_block(
    a: *mut ArenaHeader,
    blk: *mut BlockHeader,
    size: usize,
    align: usize,
) -> (NonNull<BlockHeader>, NonNull<u8>) {
    // SAFETY: the block was just detached from the tree and is ours
    unsafe {
        let raw = (*blk).payload_addr();
        let aligned = align_up(raw, align);
        let padding = aligned - raw;
        let total = (*blk).size();
        // The best-fit search only returns blocks that hold the size
        // plus their own head pad.
        invariant!(total >= padding + size);

        // Word-rounded so the remainder header stays word-aligned.
        let consumed = align_up(padding + size, WORD_SIZE);
        if total >= consumed + HEADER_SIZE + MIN_BUFFER_SIZE {
            let rem = (raw + consumed) as *mut BlockHeader;
            ptr::write(
                rem,
                BlockHeader::new_free(total - consumed - HEADER_SIZE, WORD_SIZE, blk),
            );
            let after = (raw + total) as *mut BlockHeader;
            (*after).set_prev_ptr(rem);
            (*blk).set_size_align(consumed, align);
            (*a).free_root = tree::insert((*a).free_root, rem);
        } else {
            (*blk).set_size_align(total, align);
        }

        (*blk).set_free(false);
        (*blk).set_red(false);
        (*blk).stamp_occupied(a, aligned);
        if padding > 0 {
            write_back_link(aligned, blk as usize);
        }
        (NonNull::new_unchecked(blk), NonNull::new_unchecked(aligned as *mut u8))
    }
}

/// Carve the allocation out of the tail: donate an oversized head pad as
/// its own free block, round the consumed span to the baseline so the
/// next payload starts aligned, and absorb a remainder too small to
/// stand alone.
unsafe fn alloc_in_tail(
    a: *mut ArenaHeader,
    size: usize,
    align: usize,
) -> Option<(NonNull<BlockHeader>, NonNull<u8>)> {
    // SAFETY: the tail and everything derived from it are inside the
    // caller-owned span
    unsafe {
        let mut tail = (*a).tail_block();
        if !(*tail).is_free() {
            // Fully packed: the tail pointer names the last occupied
            // block.
            return None;
        }
        let end = (*a).end();
        let mut raw = (*tail).payload_addr();
        let mut aligned = align_up(raw, align);
        let mut padding = aligned - raw;
        if end - raw < padding + size {
            return None;
        }

        if align > (*a).baseline_align() && padding >= HEADER_SIZE + MIN_BUFFER_SIZE {
            // The skipped head pad is big enough to live as a free
            // block: shrink the tail into it and start a new tail at
            // the aligned boundary.
            let donated = tail;
            (*donated).set_size_align(padding - HEADER_SIZE, WORD_SIZE);
            (*donated).set_red(true);
            let new_tail = (raw + padding - HEADER_SIZE) as *mut BlockHeader;
            ptr::write(
                new_tail,
                BlockHeader::new_tail((*a).baseline_align(), donated),
            );
            (*a).set_tail_block(new_tail);
            (*a).free_root = tree::insert((*a).free_root, donated);
            tail = new_tail;
            raw = (*tail).payload_addr();
            debug_assert_eq!(raw, aligned);
            aligned = raw;
            padding = 0;
        }

        let avail = end - raw;
        let consumed = padding + size;
        // Established by the space check before any donation; donation
        // only shrinks the pad, never the fit.
        invariant!(avail >= consumed);
        let remainder = avail - consumed;

        let mut block_size = avail;
        let mut new_tail: *mut BlockHeader = ptr::null_mut();
        if remainder >= HEADER_SIZE + MIN_BUFFER_SIZE {
            let rounded = align_up(consumed, (*a).baseline_align());
            if rounded <= avail && avail - rounded >= HEADER_SIZE {
                block_size = rounded;
                new_tail = (raw + rounded) as *mut BlockHeader;
            }
        }

        let blk = tail;
        (*blk).set_size_align(block_size, align);
        (*blk).set_free(false);
        (*blk).set_red(false);
        (*blk).stamp_occupied(a, aligned);
        if new_tail.is_null() {
            // Everything left was absorbed; the tail pointer keeps
            // naming this block and reports no space until it is freed.
        } else {
            ptr::write(
                new_tail,
                BlockHeader::new_tail((*a).baseline_align(), blk),
            );
            (*a).set_tail_block(new_tail);
        }
        if padding > 0 {
            write_back_link(aligned, blk as usize);
        }
        Some((NonNull::new_unchecked(blk), NonNull::new_unchecked(aligned as *mut u8)))
    }
}

/// Return a block to its arena: mark it free, coalesce with free
/// neighbours on both sides, reabsorb into the tail when it touches it,
/// and insert whatever survives into the tree.
///
/// # Safety
/// `blk` must be a block of arena `a` that is not in the free tree: an
/// occupied block, an overlay being dissolved back into one, or a
/// freshly carved donation. The caller must own both.
pub(crate) unsafe fn release_block(a: *mut ArenaHeader, blk: *mut BlockHeader) {
    // SAFETY: per contract the block, its neighbours and the tree are
    // all inside the caller-owned span
    unsafe {
        let mut blk = blk;
        (*blk).set_free(true);
        (*blk).set_red(true);
        (*blk).clear_links();

        let tail = (*a).tail_block();
        if ptr::eq(blk, tail) {
            // Fully-packed span: the last block returns and becomes the
            // empty tail again.
            (*blk).set_size(0);
        } else if (*blk).next_addr() == tail as usize && (*tail).is_free() {
            // The successor is the empty tail: this block is reabsorbed
            // and the old tail header's bytes return to the open end.
            (*blk).set_size(0);
            (*a).set_tail_block(blk);
        } else {
            let succ = (*blk).next_addr() as *mut BlockHeader;
            if !ptr::eq(succ, tail) && (*succ).is_free() {
                (*a).free_root = tree::remove((*a).free_root, succ);
                (*blk).set_size((*blk).size() + HEADER_SIZE + (*succ).size());
                let after = (*blk).next_addr() as *mut BlockHeader;
                (*after).set_prev_ptr(blk);
            }
        }

        let pred = (*blk).prev_ptr();
        if !pred.is_null() && (*pred).is_free() {
            (*a).free_root = tree::remove((*a).free_root, pred);
            if ptr::eq(blk, (*a).tail_block()) {
                // Merging left of the tail: the predecessor becomes the
                // new empty tail.
                (*pred).set_size(0);
                (*pred).clear_links();
                (*pred).set_red(false);
                (*a).set_tail_block(pred);
                return;
            }
            (*pred).set_size((*pred).size() + HEADER_SIZE + (*blk).size());
            let after = (*blk).next_addr() as *mut BlockHeader;
            (*after).set_prev_ptr(pred);
            blk = pred;
        }

        if !ptr::eq(blk, (*a).tail_block()) {
            (*a).free_root = tree::insert((*a).free_root, blk);
        }
    }
}

/// Recover the header and owning arena from a user pointer, rejecting
/// anything implausible.
unsafe fn validate(addr: usize) -> Result<(NonNull<BlockHeader>, NonNull<ArenaHeader>), FreeError> {
    if addr == 0 {
        return Err(FreeError::NullPointer);
    }
    if addr % WORD_SIZE != 0 {
        return Err(FreeError::Misaligned);
    }
    // SAFETY: the caller of `free` guarantees the word before the
    // pointer is readable; everything after that is checked before use
    unsafe {
        let before = *((addr - WORD_SIZE) as *const usize);
        let decoded = before ^ addr;
        let header_addr = if decoded == BLOCK_MAGIC {
            // No head pad: the magic word itself sits right before the
            // payload.
            addr - HEADER_SIZE
        } else {
            decoded
        };
        if header_addr == 0 || header_addr % align_of::<BlockHeader>() != 0 {
            return Err(FreeError::BadBackLink);
        }
        // A real header sits between HEADER_SIZE and HEADER_SIZE plus
        // the largest honourable head pad before its payload. Anything
        // outside that window cannot be a back-link, so it is rejected
        // before the candidate is ever dereferenced.
        match addr.checked_sub(header_addr) {
            Some(gap) if gap >= HEADER_SIZE && gap <= HEADER_SIZE + MAX_ALIGNMENT => {}
            _ => return Err(FreeError::BadBackLink),
        }

        let blk = header_addr as *mut BlockHeader;
        if (*blk).is_free() {
            return Err(FreeError::AlreadyFree);
        }
        if (*blk).magic() ^ addr != BLOCK_MAGIC {
            return Err(FreeError::BadMagic);
        }
        let owner_word = (*blk).owner_slot();
        let owner = tag::owner_slot_ptr(owner_word);
        if owner.is_null() || (owner as usize) % align_of::<ArenaHeader>() != 0 {
            return Err(FreeError::NoOwner);
        }
        if (*blk).size() > (*owner).capacity() {
            return Err(FreeError::CorruptHeader);
        }
        if !(*owner).contains(addr) {
            return Err(FreeError::OutOfRange);
        }
        Ok((NonNull::new_unchecked(blk), NonNull::new_unchecked(owner)))
    }
}

/// Find the arena a nested arena's block belongs to by walking the
/// physical chain backwards.
///
/// Any occupied block that is not itself a nested arena names the owner
/// directly. Falling off the head of the chain lands on the word before
/// the first block: even means the arena header sits immediately before
/// it, odd is a tagged padding word encoding the distance.
unsafe fn recover_parent(child: *mut ArenaHeader) -> Option<NonNull<ArenaHeader>> {
    // SAFETY: the chain stays inside the parent's span; every header on
    // it is valid
    unsafe {
        let mut head = child as *mut BlockHeader;
        let mut cur = (*child).prev.ptr();
        while !cur.is_null() {
            if !(*cur).is_free() {
                let word = (*cur).owner_slot();
                if !tag::owner_slot_is_nested(word) {
                    return NonNull::new(tag::owner_slot_ptr(word));
                }
            }
            head = cur;
            cur = (*cur).prev_ptr();
        }
        let head_addr = head as usize;
        let word = *((head_addr - WORD_SIZE) as *const usize);
        let arena_addr = if word & 1 == 1 {
            head_addr - (word >> 1)
        } else {
            head_addr - ARENA_HEADER_SIZE
        };
        NonNull::new(arena_addr as *mut ArenaHeader)
    }
}
