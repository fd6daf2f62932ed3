//! Pre-allocated code buffer with its relocation bitmap.
//!
//! The code map carries one bit per code byte; a set bit marks the start of
//! a word patched by the constant resolver.

use ember_image::{Bitmap, TargetSpec};

use crate::BuildError;

pub struct CodeBuffer {
    spec: TargetSpec,
    bytes: Vec<u8>,
    capacity: usize,
    map: Bitmap,
}

impl CodeBuffer {
    pub fn new(spec: TargetSpec, capacity: usize) -> Self {
        Self {
            spec,
            bytes: Vec::new(),
            capacity,
            map: Bitmap::new(spec.word_bits()),
        }
    }

    #[inline]
    pub fn spec(&self) -> TargetSpec {
        self.spec
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one target word; returns its byte offset.
    pub fn emit_word(&mut self, value: u64) -> Result<u32, BuildError> {
        let wb = self.spec.word_bytes() as usize;
        if self.bytes.len() + wb > self.capacity {
            return Err(BuildError::CapacityExceeded {
                what: "code",
                needed: self.bytes.len() + wb,
                capacity: self.capacity,
            });
        }
        let offset = self.bytes.len() as u32;
        self.bytes.resize(self.bytes.len() + wb, 0);
        self.spec.put_word(&mut self.bytes[offset as usize..], value);
        Ok(offset)
    }

    pub fn write_word_at(&mut self, offset: u32, value: u64) {
        self.spec.put_word(&mut self.bytes[offset as usize..], value);
    }

    pub fn read_word_at(&self, offset: u32) -> u64 {
        self.spec.read_word(&self.bytes[offset as usize..])
    }

    /// Mark a patched word in the code map.
    pub fn mark(&mut self, offset: u32) {
        self.map.mark(offset as usize);
    }

    pub fn map(&self) -> &Bitmap {
        &self.map
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
