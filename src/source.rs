//! Byte-span providers
//!
//! An arena manages a span it does not create. Static arenas borrow a
//! caller-owned buffer; dynamic arenas acquire their span from a
//! [`SpanSource`] and release it on destroy.

use core::alloc::Layout;
use core::ptr::NonNull;

/// A source of raw byte spans.
pub trait SpanSource {
    /// Acquire a span for the given layout.
    ///
    /// Returns a word-aligned base pointer, or `None` when the source
    /// cannot supply the span.
    ///
    /// # Safety
    /// The span must be released with [`release`](Self::release) using
    /// the same layout.
    unsafe fn acquire(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Release a span previously acquired from this source.
    ///
    /// # Safety
    /// `base` must come from [`acquire`](Self::acquire) on this source
    /// with the same `layout`, and must not be used afterwards.
    unsafe fn release(&self, base: NonNull<u8>, layout: Layout);
}

/// Span source backed by the global allocator.
#[cfg(feature = "alloc")]
pub struct GlobalHeap;

#[cfg(feature = "alloc")]
impl SpanSource for GlobalHeap {
    unsafe fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: the layout is non-zero-sized
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        NonNull::new(ptr)
    }

    unsafe fn release(&self, base: NonNull<u8>, layout: Layout) {
        // SAFETY: per contract, `base`/`layout` match a live acquire
        unsafe { alloc::alloc::dealloc(base.as_ptr(), layout) };
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    #[test]
    fn test_global_heap_roundtrip() {
        let layout = Layout::from_size_align(1024, 16).unwrap();
        unsafe {
            let span = GlobalHeap.acquire(layout).unwrap();
            assert_eq!(span.as_ptr() as usize % 16, 0);
            GlobalHeap.release(span, layout);
        }
    }

    #[test]
    fn test_zero_size_refused() {
        let layout = Layout::from_size_align(0, 16).unwrap();
        unsafe {
            assert!(GlobalHeap.acquire(layout).is_none());
        }
    }
}
