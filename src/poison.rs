//! Freed-memory poisoning
//!
//! On in debug builds, forced on by the `debug-poison` feature, forced
//! off by `no-poison`. Freed payloads are overwritten with a
//! recognisable pattern so use-after-free reads surface as garbage
//! instead of stale data.

/// Pattern written over freed payloads.
pub const FREE_POISON: u8 = 0xDD;

/// Whether freed payloads get poisoned in this build.
pub const fn poison_enabled() -> bool {
    if cfg!(feature = "no-poison") {
        false
    } else {
        cfg!(any(debug_assertions, feature = "debug-poison"))
    }
}

/// Poison a freed payload.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes.
pub(crate) unsafe fn poison_free(ptr: *mut u8, len: usize) {
    // SAFETY: caller guarantees the range is writable
    unsafe {
        core::ptr::write_bytes(ptr, FREE_POISON, len);
    }
}

/// Verify that a range still carries the free-poison pattern.
///
/// # Safety
/// `ptr` must be valid for reads of `len` bytes.
#[allow(dead_code)]
pub(crate) unsafe fn verify_free_poison(ptr: *const u8, len: usize) -> bool {
    // SAFETY: caller guarantees the range is readable
    let slice = unsafe { core::slice::from_raw_parts(ptr, len) };
    slice.iter().all(|&b| b == FREE_POISON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_pattern() {
        let mut buf = [0u8; 64];

        unsafe {
            poison_free(buf.as_mut_ptr(), buf.len());
            assert!(verify_free_poison(buf.as_ptr(), buf.len()));
        }
        assert!(buf.iter().all(|&b| b == FREE_POISON));
    }
}
