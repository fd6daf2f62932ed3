//! Boot pointer tags, fixie header layout, and mask sizing.
//!
//! Heap words carry an image-relative object number in the low bits and a
//! two-bit mark in the top two bits. Code words marked in the code map carry
//! an offset plus flag bits in the same top-bit positions.

use crate::target::ceiling;

/// Low bits of a heap word that hold a mark rather than pointer bits.
pub const POINTER_TAG_MASK: u64 = 3;

/// Mark OR'd into the first word of a fixed object.
pub const FIXED_MARK: u64 = 3;

/// Fixed objects are emitted past the tenure threshold so the collector
/// never promotes them again.
pub const FIXIE_TENURE_THRESHOLD: u8 = 3;

/// Byte offsets within the fixie header.
pub const FIXIE_AGE_OFFSET: usize = 0;
pub const FIXIE_HAS_MASK_OFFSET: usize = 1;
pub const FIXIE_SIZE_OFFSET: usize = 4;

/// Default pre-allocated heap buffer: 256 MiB.
pub const DEFAULT_HEAP_CAPACITY: usize = 256 * 1024 * 1024;

/// Default pre-allocated code buffer. Branch immediates cap usable code at
/// roughly 30 MiB on short-branch targets.
pub const DEFAULT_CODE_CAPACITY: usize = 30 * 1024 * 1024;

/// Shift that moves a heap-word mark into the top two bits.
#[inline]
pub fn boot_shift(word_bits: u32) -> u32 {
    word_bits - 2
}

/// Flag on a code-map word: the constant is a flat (absolute-immediate)
/// encoding rather than a relative one.
#[inline]
pub fn boot_flat_constant(word_bits: u32) -> u64 {
    1u64 << boot_shift(word_bits)
}

/// Flag on a code-map word: the offset refers to the heap image rather than
/// the code image.
#[inline]
pub fn boot_heap_offset(word_bits: u32) -> u64 {
    1u64 << (boot_shift(word_bits) + 1)
}

/// Fixie header size in bytes: age/has-mask/size prefix plus two pointer
/// words the collector links through at run time.
#[inline]
pub fn fixie_size_bytes(word_bytes: u32) -> u32 {
    8 + word_bytes * 2
}

/// Fixie header size in target words.
#[inline]
pub fn fixie_size_words(word_bytes: u32) -> u32 {
    ceiling(fixie_size_bytes(word_bytes) as u64, word_bytes as u64) as u32
}

/// Trailing reference-mask size, in words, for a singleton with `body_words`
/// value slots. The mask indexes word offsets over the whole object, so the
/// two header words are counted in.
#[inline]
pub fn singleton_mask_words(body_words: u32, word_bits: u32) -> u32 {
    if body_words == 0 {
        return 0;
    }
    ceiling(body_words as u64 + 2, word_bits as u64) as u32
}

/// Numeric-mask size, in words, for a pool with `body_words` entry slots.
/// Pool masks index fixed-field positions, which include the two synthetic
/// leading slots.
#[inline]
pub fn pool_mask_words(body_words: u32, word_bits: u32) -> u32 {
    ceiling(body_words as u64 + 2, word_bits as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_flags_occupy_top_bits() {
        assert_eq!(boot_shift(32), 30);
        assert_eq!(boot_flat_constant(32), 1 << 30);
        assert_eq!(boot_heap_offset(32), 1 << 31);
        assert_eq!(boot_shift(64), 62);
        assert_eq!(boot_heap_offset(64), 1 << 63);
    }

    #[test]
    fn fixie_sizes() {
        assert_eq!(fixie_size_bytes(4), 16);
        assert_eq!(fixie_size_words(4), 4);
        assert_eq!(fixie_size_bytes(8), 24);
        assert_eq!(fixie_size_words(8), 3);
    }

    #[test]
    fn singleton_mask_sizing() {
        assert_eq!(singleton_mask_words(0, 32), 0);
        assert_eq!(singleton_mask_words(1, 32), 1);
        assert_eq!(singleton_mask_words(30, 32), 1);
        assert_eq!(singleton_mask_words(31, 32), 2);
        assert_eq!(singleton_mask_words(62, 64), 1);
        assert_eq!(singleton_mask_words(63, 64), 2);
    }

    #[test]
    fn pool_mask_sizing() {
        assert_eq!(pool_mask_words(1, 32), 1);
        assert_eq!(pool_mask_words(30, 32), 1);
        assert_eq!(pool_mask_words(31, 32), 2);
    }
}
