//! Type maps: per-class build-to-target layout descriptors.
//!
//! A map records the fixed-prefix geometry on both sides, the described
//! fields with their offsets, a dense build-byte-offset to target-offset
//! table spanning the fixed prefix, and optional trailing-array element
//! info. The registry keys maps by class handle, or by instance handle for
//! singleton-shaped objects (static tables and constant pools).

use indexmap::IndexMap;

use ember_image::FieldType;
use ember_runtime::schema::BuiltinType;
use ember_runtime::{Machine, Obj};

use crate::BuildError;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeMapKind {
    Normal,
    Singleton,
    Pool,
}

/// One described slot.
#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub ty: FieldType,
    pub build_offset: u32,
    pub target_offset: u32,
}

#[derive(Clone, Debug)]
pub struct TypeMap {
    pub kind: TypeMapKind,
    pub build_fixed_words: u32,
    pub target_fixed_words: u32,
    pub build_array_element_bytes: u32,
    pub target_array_element_bytes: u32,
    pub array_element_type: FieldType,
    fields: Vec<Field>,
    /// Target byte offset for every build byte offset of the fixed prefix.
    /// Exactly one entry per build byte.
    target_fixed_offsets: Vec<u32>,
}

impl TypeMap {
    pub fn new(
        kind: TypeMapKind,
        build_fixed_words: u32,
        target_fixed_words: u32,
        build_word_bytes: u32,
    ) -> Self {
        Self {
            kind,
            build_fixed_words,
            target_fixed_words,
            build_array_element_bytes: 0,
            target_array_element_bytes: 0,
            array_element_type: FieldType::None,
            fields: Vec::new(),
            target_fixed_offsets: vec![0; (build_fixed_words * build_word_bytes) as usize],
        }
    }

    pub fn with_array(
        mut self,
        build_element_bytes: u32,
        target_element_bytes: u32,
        element_type: FieldType,
    ) -> Self {
        self.build_array_element_bytes = build_element_bytes;
        self.target_array_element_bytes = target_element_bytes;
        self.array_element_type = element_type;
        self
    }

    /// Describe one slot and record it in the dense offset table.
    pub fn add_field(&mut self, ty: FieldType, build_offset: u32, target_offset: u32) {
        assert!(
            (build_offset as usize) < self.target_fixed_offsets.len(),
            "field build offset {build_offset} outside fixed prefix"
        );
        self.target_fixed_offsets[build_offset as usize] = target_offset;
        self.fields.push(Field {
            ty,
            build_offset,
            target_offset,
        });
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fixed_field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    pub fn has_array(&self) -> bool {
        self.target_array_element_bytes > 0
    }

    /// Translate a build byte offset to the target byte offset, extending
    /// into the trailing array by element index when present.
    pub fn target_offset(
        &self,
        build_offset: u32,
        build_word_bytes: u32,
        target_word_bytes: u32,
    ) -> u32 {
        let fixed = self.build_fixed_words * build_word_bytes;
        if self.has_array() && build_offset >= fixed {
            let index = (build_offset - fixed) / self.build_array_element_bytes;
            self.target_fixed_words * target_word_bytes + index * self.target_array_element_bytes
        } else {
            self.target_fixed_offsets[build_offset as usize]
        }
    }
}

/// All registered maps, keyed by class handle or singleton instance handle.
#[derive(Default)]
pub struct TypeMapRegistry {
    maps: IndexMap<Obj, TypeMap>,
}

impl TypeMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Obj, map: TypeMap) {
        self.maps.insert(key, map);
    }

    pub fn get(&self, key: Obj) -> Option<&TypeMap> {
        self.maps.get(&key)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// The map describing `obj`: singleton-shaped objects resolve by
    /// instance, everything else by class.
    pub fn lookup(&self, m: &Machine, obj: Obj) -> Result<&TypeMap, BuildError> {
        let class = m
            .heap()
            .class_of(obj)
            .expect("object without class in build heap");
        let key = if class == m.builtin_class(BuiltinType::Singleton) {
            obj
        } else {
            class
        };
        self.maps.get(&key).ok_or_else(|| {
            BuildError::SchemaDrift(format!(
                "no type map for object {} (class {})",
                obj.raw(),
                String::from_utf8_lossy(m.class_name_bytes(class).unwrap_or(b"?")),
            ))
        })
    }
}
