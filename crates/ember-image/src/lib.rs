//! Boot image format for the Ember VM.
//!
//! Everything the builder and the loading VM must agree on: the target
//! machine spec (word width + endianness) with its value-conversion
//! primitives, the closed set of semantic slot types, boot pointer tags,
//! the fixie header, reference bitmaps, and the image header.

mod bitmap;
mod fields;
mod header;
mod tags;
mod target;

pub use bitmap::Bitmap;

pub use fields::FieldType;

pub use header::{Header, ThunkRange, Thunks, HEADER_SIZE, MAGIC, VERSION};

pub use tags::{
    boot_flat_constant, boot_heap_offset, boot_shift, fixie_size_bytes, fixie_size_words,
    pool_mask_words, singleton_mask_words, DEFAULT_CODE_CAPACITY, DEFAULT_HEAP_CAPACITY,
    FIXED_MARK, FIXIE_AGE_OFFSET, FIXIE_HAS_MASK_OFFSET, FIXIE_SIZE_OFFSET,
    FIXIE_TENURE_THRESHOLD, POINTER_TAG_MASK,
};

pub use target::{ceiling, pad_to_word, BuildSpec, Endian, TargetSpec, WordWidth};

#[cfg(test)]
mod header_tests;
