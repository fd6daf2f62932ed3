//! Layout translator: copies one object from build memory into the target
//! image, field by field, converting width and byte order as it goes.
//!
//! Reference slots are zeroed here; the heap walk patches them once child
//! numbers are known. Singleton- and pool-kind objects get their trailing
//! reference masks appended after the fixed slots.

use ember_image::{
    boot_shift, ceiling, pool_mask_words, singleton_mask_words, BuildSpec, Endian, FieldType,
    TargetSpec, POINTER_TAG_MASK,
};
use ember_runtime::{Machine, Obj};

use crate::type_map::{TypeMap, TypeMapKind};
use crate::BuildError;

/// Build/target spec pair threaded through every translation step.
#[derive(Clone, Copy, Debug)]
pub struct Translator {
    pub build: BuildSpec,
    pub target: TargetSpec,
}

impl Translator {
    pub fn new(build: BuildSpec, target: TargetSpec) -> Self {
        Self { build, target }
    }

    /// Shift for heap-word mark merging on this target.
    #[inline]
    pub fn boot_shift(&self) -> u32 {
        boot_shift(self.target.word_bits())
    }

    /// Merge an object number with the mark bits already present in a heap
    /// word.
    #[inline]
    pub fn merge_reference(&self, previous: u64, number: u32) -> u64 {
        number as u64 | ((previous & POINTER_TAG_MASK) << self.boot_shift())
    }

    /// Total target footprint of `obj` in target words.
    pub fn target_size_words(&self, m: &Machine, map: &TypeMap, obj: Obj) -> u64 {
        let twb = self.target.word_bytes() as u64;
        let bits = self.target.word_bits();
        if map.has_array() {
            let count = self.array_count(m, map, obj);
            return map.target_fixed_words as u64
                + ceiling(map.target_array_element_bytes as u64 * count, twb);
        }
        match map.kind {
            TypeMapKind::Normal => map.target_fixed_words as u64,
            TypeMapKind::Singleton => {
                map.target_fixed_words as u64
                    + singleton_mask_words(map.target_fixed_words - 2, bits) as u64
            }
            TypeMapKind::Pool => {
                let numeric = pool_mask_words(map.target_fixed_words - 2, bits);
                map.target_fixed_words as u64
                    + numeric as u64
                    + singleton_mask_words(map.target_fixed_words - 2 + numeric, bits) as u64
            }
        }
    }

    /// Element count of a trailing array, read from the last fixed word.
    fn array_count(&self, m: &Machine, map: &TypeMap, obj: Obj) -> u64 {
        let bwb = self.build.word_bytes();
        m.heap().read_word(obj, (map.build_fixed_words - 1) * bwb)
    }

    /// Copy `obj` into `dst`, which must span the full target footprint.
    pub fn copy_object(
        &self,
        m: &Machine,
        map: &TypeMap,
        obj: Obj,
        dst: &mut [u8],
    ) -> Result<(), BuildError> {
        let src = m.heap().bytes(obj);

        for field in map.fields() {
            self.copy_field(
                &src[field.build_offset as usize..],
                &mut dst[field.target_offset as usize..],
                field.ty,
            )?;
        }

        if map.has_array() {
            let bwb = self.build.word_bytes();
            let twb = self.target.word_bytes();
            let count = self.array_count(m, map, obj);
            let build_base = map.build_fixed_words * bwb;
            let target_base = map.target_fixed_words * twb;
            for i in 0..count as u32 {
                self.copy_field(
                    &src[(build_base + i * map.build_array_element_bytes) as usize..],
                    &mut dst[(target_base + i * map.target_array_element_bytes) as usize..],
                    map.array_element_type,
                )?;
            }
        } else {
            match map.kind {
                TypeMapKind::Normal => {}
                TypeMapKind::Singleton => self.write_singleton_mask(map, src, dst),
                TypeMapKind::Pool => self.write_pool_masks(map, src, dst),
            }
        }
        Ok(())
    }

    /// Copy one slot, dispatching on its semantic type.
    fn copy_field(&self, src: &[u8], dst: &mut [u8], ty: FieldType) -> Result<(), BuildError> {
        match ty {
            FieldType::I8 | FieldType::U8 => dst[0] = src[0],
            FieldType::I16 | FieldType::U16 => {
                let v = u16::from_le_bytes([src[0], src[1]]);
                dst[..2].copy_from_slice(&self.target.v2(v));
            }
            FieldType::I32 | FieldType::U32 | FieldType::F32 => {
                let v = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
                dst[..4].copy_from_slice(&self.target.v4(v));
            }
            FieldType::I64 | FieldType::U64 | FieldType::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&src[..8]);
                dst[..8].copy_from_slice(&self.target.v8(u64::from_le_bytes(b)));
            }
            FieldType::I64Pad | FieldType::F64Pad => {}
            FieldType::IWord => {
                let v = self.build.read_word_signed(src);
                self.target.put_word(dst, v as u64);
            }
            FieldType::UWord | FieldType::Word => {
                let v = self.build.read_word(src);
                self.target.put_word(dst, v);
            }
            FieldType::Object => {
                // pointer write-back happens during the graph walk
                self.target.put_word(dst, 0);
            }
            FieldType::None | FieldType::Array => {
                return Err(BuildError::SchemaDrift(format!(
                    "field of type {ty:?} in a copy"
                )))
            }
        }
        Ok(())
    }

    /// Singleton mask: one bit per target word of the object, set on
    /// reference slots.
    fn write_singleton_mask(&self, map: &TypeMap, src: &[u8], dst: &mut [u8]) {
        let twb = self.target.word_bytes();
        let mask_start = (map.target_fixed_words * twb) as usize;
        for field in map.fields() {
            if field.ty.is_reference() {
                self.set_mask_bit(dst, mask_start, field.target_offset / twb);
            }
        }

        if self.matches_build_layout() {
            let bits = self.target.word_bits();
            let len = (singleton_mask_words(map.target_fixed_words - 2, bits) * twb) as usize;
            debug_assert_eq!(
                &src[mask_start..mask_start + len],
                &dst[mask_start..mask_start + len],
                "singleton mask disagrees with the build-side copy"
            );
        }
    }

    /// Pool masks: a numeric mask over float/double entries, then an object
    /// mask, both indexed by fixed-field position.
    fn write_pool_masks(&self, map: &TypeMap, src: &[u8], dst: &mut [u8]) {
        let twb = self.target.word_bytes();
        let bits = self.target.word_bits();
        let numeric_words = pool_mask_words(map.target_fixed_words - 2, bits);
        let numeric_start = (map.target_fixed_words * twb) as usize;
        let object_start = numeric_start + (numeric_words * twb) as usize;

        for (i, field) in map.fields().iter().enumerate() {
            if field.ty.is_float() {
                self.set_mask_bit(dst, numeric_start, i as u32);
            } else if field.ty.is_reference() {
                self.set_mask_bit(dst, object_start, i as u32);
            }
        }

        if self.matches_build_layout() {
            let object_words =
                singleton_mask_words(map.target_fixed_words - 2 + numeric_words, bits);
            let len = ((numeric_words + object_words) * twb) as usize;
            debug_assert_eq!(
                &src[numeric_start..numeric_start + len],
                &dst[numeric_start..numeric_start + len],
                "pool masks disagree with the build-side copy"
            );
        }
    }

    fn set_mask_bit(&self, dst: &mut [u8], mask_start: usize, bit: u32) {
        let twb = self.target.word_bytes();
        let bits = self.target.word_bits();
        let off = mask_start + ((bit / bits) * twb) as usize;
        let word = self.target.read_word(&dst[off..]);
        self.target.put_word(&mut dst[off..], word | 1u64 << (bit % bits));
    }

    /// Whether target bytes are directly comparable with build bytes.
    fn matches_build_layout(&self) -> bool {
        self.build.word == self.target.word && self.target.endian == Endian::Little
    }
}
