//! Diagnostics: textual dump and usage bar
//!
//! Feature-gated under `debug-dump`. Both renderers write into any
//! `core::fmt::Write`, so they work without a stdout.

use core::fmt::{self, Write};
use core::ptr;

use crate::arena::Arena;
use crate::block::BlockHeader;

/// Write a structured dump of the arena header and every block.
pub fn dump<W: Write>(arena: &Arena, out: &mut W) -> fmt::Result {
    let a = arena.raw();
    // SAFETY: the walk stays on headers the arena owns
    unsafe {
        writeln!(out, "arena {:#x}", a as usize)?;
        writeln!(out, "  capacity:     {}", (*a).capacity())?;
        writeln!(out, "  baseline:     {}", (*a).baseline_align())?;
        writeln!(
            out,
            "  kind:         {}",
            if (*a).is_nested() {
                "nested"
            } else if (*a).is_dynamic() {
                "dynamic"
            } else {
                "static"
            }
        )?;
        writeln!(out, "  free in tail: {}", (*a).free_size_in_tail())?;

        let tail = (*a).tail_block();
        let mut cur = (*a).data() as *mut BlockHeader;
        loop {
            let state = if ptr::eq(cur, tail) {
                if (*cur).is_free() {
                    "tail"
                } else {
                    "used (tail)"
                }
            } else if (*cur).is_free() {
                "free"
            } else {
                "used"
            };
            writeln!(
                out,
                "  block {:#x} size {:>8} align {:>4} {}",
                cur as usize,
                (*cur).size(),
                (*cur).align(),
                state
            )?;
            if ptr::eq(cur, tail) {
                break;
            }
            cur = (*cur).next_addr() as *mut BlockHeader;
        }
    }
    Ok(())
}

/// Render a fixed-width bar of the span: `@` for headers, `#` for
/// occupied payload, spaces for free payload, `|` at block boundaries.
pub fn usage_bar<W: Write>(arena: &Arena, width: usize, out: &mut W) -> fmt::Result {
    let a = arena.raw();
    if width < 4 {
        return Ok(());
    }
    // SAFETY: the walk stays on headers the arena owns
    unsafe {
        let data = (*a).data();
        let end = (*a).end();
        let scale = |addr: usize| (addr - data) * (width - 1) / (end - data);

        out.write_char('|')?;
        let tail = (*a).tail_block();
        let mut col = 0usize;
        let mut cur = data as *mut BlockHeader;
        loop {
            let header_end = scale((*cur).payload_addr().min(end));
            while col < header_end {
                out.write_char('@')?;
                col += 1;
            }
            let is_open_tail = ptr::eq(cur, tail) && (*cur).is_free();
            let payload_end = if is_open_tail {
                width - 1
            } else {
                scale((*cur).next_addr())
            };
            let ch = if (*cur).is_free() { ' ' } else { '#' };
            while col < payload_end {
                out.write_char(ch)?;
                col += 1;
            }
            if ptr::eq(cur, tail) {
                break;
            }
            out.write_char('|')?;
            cur = (*cur).next_addr() as *mut BlockHeader;
        }
        while col < width - 1 {
            out.write_char(' ')?;
            col += 1;
        }
        out.write_char('|')?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;

    #[repr(align(16))]
    struct Slab([u8; 1024]);

    #[test]
    fn test_dump_lists_blocks() {
        let mut slab = Slab([0; 1024]);
        // SAFETY: the slab outlives the arena
        let mut arena = unsafe { Arena::new_static(slab.0.as_mut_ptr(), 1024).unwrap() };
        let _p = arena.alloc(100).unwrap();

        let mut text = String::new();
        dump(&arena, &mut text).unwrap();
        assert!(text.contains("capacity:"));
        assert!(text.contains("static"));
        assert!(text.contains("used"));
        assert!(text.contains("tail"));
    }

    #[test]
    fn test_usage_bar_shape() {
        let mut slab = Slab([0; 1024]);
        // SAFETY: the slab outlives the arena
        let mut arena = unsafe { Arena::new_static(slab.0.as_mut_ptr(), 1024).unwrap() };
        let _p = arena.alloc(300).unwrap();

        let mut bar = String::new();
        usage_bar(&arena, 80, &mut bar).unwrap();
        assert!(bar.starts_with('|'));
        assert!(bar.ends_with('|'));
        assert!(bar.contains('#'));
        assert!(bar.contains('@'));
        assert!(bar.chars().count() >= 80);
    }
}
