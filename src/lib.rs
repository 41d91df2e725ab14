//! Header-resident region allocator
//!
//! Carves a single contiguous byte span into aligned, individually
//! freeable blocks. Allocation is O(1) off the open tail and O(log n)
//! best-fit over previously freed blocks; all bookkeeping lives inside
//! the managed span itself: a fixed four-word header per live block
//! plus one arena header, with flags packed into otherwise-unused low
//! bits of the size and pointer words.
//!
//! # Features
//!
//! - **Best-fit reuse**: freed blocks live in an intrusive left-leaning
//!   red-black tree keyed by size, alignment quality and address
//! - **Neighbour coalescing**: every free merges adjacent free blocks
//!   and reabsorbs into the open tail, so free runs stay contiguous
//! - **Validated frees**: a magic word XOR-ed with the payload address
//!   lets [`free`] reject wild, foreign and double frees without
//!   crashing or touching arena state
//! - **Sub-allocators**: nested arenas and bump regions overlay
//!   ordinary block headers, so a parent sees them as plain occupied
//!   blocks
//!
//! # Optional Features
//!
//! - `alloc` (default): dynamic arenas backed by the global allocator
//! - `debug-poison` / `no-poison`: force freed-memory poisoning on or
//!   off (on by default in debug builds)
//! - `debug-dump`: textual dump and usage-bar diagnostics
//!
//! # Usage
//!
//! ```ignore
//! use carve::{Arena, Bump};
//!
//! let mut arena = Arena::new_dynamic(64 * 1024).expect("span");
//! let p = arena.alloc(100).expect("alloc");
//!
//! let mut scratch = Bump::new(&mut arena, 4 * 1024).expect("bump");
//! let s = scratch.alloc_aligned(256, 64).expect("bump alloc");
//!
//! scratch.free();
//! unsafe { carve::free(p.as_ptr()) };
//! arena.destroy();
//! ```
//!
//! The arena is single-owner: no operation takes a lock and concurrent
//! use is not supported. Callers needing per-thread allocation are
//! expected to carve one nested arena per thread.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(test)]
extern crate std;

/// Internal invariant check: asserts in debug builds, tells the
/// optimiser the violating branch is unreachable in release builds.
/// Only for conditions implied by checks the same path has already
/// made.
macro_rules! invariant {
    ($cond:expr) => {
        if cfg!(debug_assertions) {
            assert!($cond);
        } else if !$cond {
            // SAFETY: the condition is established by earlier checks on
            // this path; see the call site
            #[allow(unused_unsafe)]
            unsafe {
                core::hint::unreachable_unchecked()
            }
        }
    };
}

pub(crate) use invariant;

pub mod arena;
pub mod block;
pub mod bump;
pub mod config;
pub mod error;
pub mod poison;
pub mod source;
pub mod stats;

#[cfg(feature = "debug-dump")]
pub mod dump;

mod tag;
mod tree;

pub use arena::{free, Arena};
pub use bump::Bump;
pub use error::{AllocError, FreeError};
pub use stats::ArenaStats;
