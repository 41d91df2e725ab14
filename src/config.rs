//! Build-time configuration and derived constants

/// Machine word size in bytes. Block and arena headers are built from
/// whole words and every managed address is at least word-aligned.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Threshold below which a trailing remainder is not split off into its
/// own free block and is instead absorbed into the allocation.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Arena-wide minimum alignment applied by the default allocation path.
/// Must be a power of two in `[WORD_SIZE, MAX_ALIGNMENT]`.
pub const BASELINE_ALIGNMENT: usize = 16;

/// Number of low bits of the size word reserved for the alignment
/// exponent.
pub const ALIGN_BITS: usize = 3;

/// Largest exponent the 3-bit field can store: alignments up to
/// `WORD_SIZE << 7`.
pub const MAX_ALIGN_SHIFT: usize = (1 << ALIGN_BITS) - 1;

/// Largest alignment a request may name. Anything aligned this strictly
/// is also aligned to the largest storable exponent, so the request range
/// can exceed what the header encodes.
pub const MAX_ALIGNMENT: usize = WORD_SIZE << (MAX_ALIGN_SHIFT + 1);

/// Largest payload size the size word can carry.
pub const MAX_BLOCK_SIZE: usize = usize::MAX >> ALIGN_BITS;

/// Stored in every occupied block XOR-ed with the payload address.
/// Must stay odd: header and payload addresses are even, which is what
/// lets `word ^ ptr == BLOCK_MAGIC` distinguish a magic word from a
/// back-link, and an even tree-root word from a tagged padding word.
pub const BLOCK_MAGIC: usize = 0xDEAD_BEEF;

const _: () = assert!(BASELINE_ALIGNMENT.is_power_of_two());
const _: () = assert!(BASELINE_ALIGNMENT >= WORD_SIZE);
const _: () = assert!(BASELINE_ALIGNMENT <= MAX_ALIGNMENT);
const _: () = assert!(MIN_BUFFER_SIZE > 0);
const _: () = assert!(BLOCK_MAGIC & 1 == 1);
