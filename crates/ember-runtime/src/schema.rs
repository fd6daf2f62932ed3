//! Source-of-truth schema for the built-in VM types.
//!
//! Each built-in type is a sequence of semantic slot types, not counting the
//! implicit class-pointer word every object starts with. A trailing `Array`
//! marker switches the description into variable-length mode: the one type
//! after it is the element type, and the last fixed word holds the element
//! count.

use ember_image::{ceiling, BuildSpec, FieldType};

/// Built-in VM types, in `types`-array order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BuiltinType {
    Class,
    ByteArray,
    CharArray,
    ObjectArray,
    Str,
    Triple,
    HashMap,
    ClassLoader,
    SystemClassLoader,
    FieldInfo,
    Method,
    Code,
    Singleton,
}

pub const BUILTIN_COUNT: usize = 13;

pub const BUILTIN_TYPES: [BuiltinType; BUILTIN_COUNT] = [
    BuiltinType::Class,
    BuiltinType::ByteArray,
    BuiltinType::CharArray,
    BuiltinType::ObjectArray,
    BuiltinType::Str,
    BuiltinType::Triple,
    BuiltinType::HashMap,
    BuiltinType::ClassLoader,
    BuiltinType::SystemClassLoader,
    BuiltinType::FieldInfo,
    BuiltinType::Method,
    BuiltinType::Code,
    BuiltinType::Singleton,
];

/// One built-in type description.
pub struct BuiltinDesc {
    pub name: &'static str,
    pub fields: &'static [FieldType],
}

use FieldType::{Array, Object, U16, U32, U8, UWord, Word, I8};

pub const BUILTINS: [BuiltinDesc; BUILTIN_COUNT] = [
    BuiltinDesc {
        name: "ember/vm/Class",
        fields: &[
            UWord,  // flags
            UWord,  // vmFlags
            UWord,  // fixedSize
            UWord,  // arrayElementSize
            Object, // arrayElementClass
            Object, // name
            Object, // super
            Object, // fieldTable
            Object, // methodTable
            Object, // staticTable
            Object, // pool
            Object, // loader
        ],
    },
    BuiltinDesc {
        name: "ember/vm/ByteArray",
        fields: &[UWord, Array, I8],
    },
    BuiltinDesc {
        name: "ember/vm/CharArray",
        fields: &[UWord, Array, U16],
    },
    BuiltinDesc {
        name: "ember/vm/Array",
        fields: &[UWord, Array, Object],
    },
    BuiltinDesc {
        name: "ember/vm/String",
        fields: &[Object, UWord, UWord, U32], // data, offset, length, hash
    },
    BuiltinDesc {
        name: "ember/vm/Triple",
        fields: &[Object, Object, Object],
    },
    BuiltinDesc {
        name: "ember/vm/HashMap",
        fields: &[UWord, Object], // size, bucket array
    },
    BuiltinDesc {
        name: "ember/vm/ClassLoader",
        fields: &[Object, Object], // parent, map
    },
    BuiltinDesc {
        name: "ember/vm/SystemClassLoader",
        fields: &[Object, Object, Word], // parent, map, finder
    },
    BuiltinDesc {
        name: "ember/vm/Field",
        fields: &[UWord, UWord, U8, Object, Object, Object], // flags, offset, code, name, spec, class
    },
    BuiltinDesc {
        name: "ember/vm/Method",
        fields: &[UWord, Object, Object, Object, Object], // flags, name, spec, class, code
    },
    BuiltinDesc {
        name: "ember/vm/Code",
        fields: &[UWord, UWord], // compiledStart, compiledSize
    },
    BuiltinDesc {
        name: "ember/vm/Singleton",
        fields: &[UWord, Array, Word],
    },
];

impl BuiltinType {
    #[inline]
    pub fn desc(self) -> &'static BuiltinDesc {
        &BUILTINS[self as usize]
    }
}

/// Field indices into the schemas above (not counting the class pointer).
pub mod class_fields {
    pub const FLAGS: usize = 0;
    pub const VM_FLAGS: usize = 1;
    pub const FIXED_SIZE: usize = 2;
    pub const ARRAY_ELEMENT_SIZE: usize = 3;
    pub const ARRAY_ELEMENT_CLASS: usize = 4;
    pub const NAME: usize = 5;
    pub const SUPER: usize = 6;
    pub const FIELD_TABLE: usize = 7;
    pub const METHOD_TABLE: usize = 8;
    pub const STATIC_TABLE: usize = 9;
    pub const POOL: usize = 10;
    pub const LOADER: usize = 11;
}

pub mod array_fields {
    pub const LENGTH: usize = 0;
}

pub mod string_fields {
    pub const DATA: usize = 0;
    pub const OFFSET: usize = 1;
    pub const LENGTH: usize = 2;
    pub const HASH: usize = 3;
}

pub mod triple_fields {
    pub const FIRST: usize = 0;
    pub const SECOND: usize = 1;
    pub const THIRD: usize = 2;
}

pub mod hash_map_fields {
    pub const SIZE: usize = 0;
    pub const ARRAY: usize = 1;
}

pub mod loader_fields {
    pub const PARENT: usize = 0;
    pub const MAP: usize = 1;
    pub const FINDER: usize = 2;
}

pub mod field_info_fields {
    pub const FLAGS: usize = 0;
    pub const OFFSET: usize = 1;
    pub const CODE: usize = 2;
    pub const NAME: usize = 3;
    pub const SPEC: usize = 4;
    pub const CLASS: usize = 5;
}

pub mod method_fields {
    pub const FLAGS: usize = 0;
    pub const NAME: usize = 1;
    pub const SPEC: usize = 2;
    pub const CLASS: usize = 3;
    pub const CODE: usize = 4;
}

pub mod code_fields {
    pub const COMPILED_START: usize = 0;
    pub const COMPILED_SIZE: usize = 1;
}

pub mod singleton_fields {
    pub const LENGTH: usize = 0;
}

/// VM flag on class metadata: the class names a primitive type.
pub const VM_FLAG_PRIMITIVE: u64 = 1;

/// Primitive types, in seeding order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PrimitiveKind {
    Void,
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Float,
    Long,
    Double,
}

pub const PRIMITIVE_COUNT: usize = 9;

pub const PRIMITIVE_KINDS: [PrimitiveKind; PRIMITIVE_COUNT] = [
    PrimitiveKind::Void,
    PrimitiveKind::Boolean,
    PrimitiveKind::Byte,
    PrimitiveKind::Short,
    PrimitiveKind::Char,
    PrimitiveKind::Int,
    PrimitiveKind::Float,
    PrimitiveKind::Long,
    PrimitiveKind::Double,
];

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Char => "char",
            Self::Int => "int",
            Self::Float => "float",
            Self::Long => "long",
            Self::Double => "double",
        }
    }

    /// Descriptor character, as it appears in array class names.
    pub fn descriptor(self) -> u8 {
        match self {
            Self::Void => b'V',
            Self::Boolean => b'Z',
            Self::Byte => b'B',
            Self::Short => b'S',
            Self::Char => b'C',
            Self::Int => b'I',
            Self::Float => b'F',
            Self::Long => b'J',
            Self::Double => b'D',
        }
    }

    /// Array element size in bytes; void has none.
    pub fn element_size(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Boolean | Self::Byte => 1,
            Self::Short | Self::Char => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }

    pub fn from_descriptor(d: u8) -> Option<Self> {
        PRIMITIVE_KINDS.iter().copied().find(|k| k.descriptor() == d)
    }
}

/// Trailing-array element info for a built-in layout.
#[derive(Clone, Copy, Debug)]
pub struct ArrayElem {
    pub ty: FieldType,
    pub size_bytes: u32,
}

/// Computed build-side layout for one built-in type.
pub struct BuiltinLayout {
    /// Byte offset of each schema field, parallel to `BuiltinDesc::fields`
    /// (array marker and element type carry the offset where the array
    /// region starts).
    pub field_offsets: Vec<u32>,
    /// Fixed-prefix size in build words.
    pub fixed_words: u32,
    /// Word offsets of reference slots, class pointer included.
    pub ref_word_offsets: Vec<u32>,
    pub array: Option<ArrayElem>,
}

/// Assign build-side offsets for a schema sequence: start one word in (past
/// the class pointer), round each field up to its own size, stop at the
/// array marker.
pub fn compute_layout(fields: &'static [FieldType], spec: BuildSpec) -> BuiltinLayout {
    let wb = spec.word_bytes();
    let mut offset = wb;
    let mut field_offsets = Vec::with_capacity(fields.len());
    let mut ref_word_offsets = vec![0u32];
    let mut array = None;
    let mut in_array = false;

    for (i, &ft) in fields.iter().enumerate() {
        if in_array {
            field_offsets.push(offset);
            array = Some(ArrayElem {
                ty: ft,
                size_bytes: ft.size_bytes(spec.word),
            });
            break;
        }
        if ft == FieldType::Array {
            field_offsets.push(offset);
            in_array = true;
            continue;
        }
        let size = ft.size_bytes(spec.word);
        debug_assert!(size > 0, "schema field {i} has no size");
        while offset % size != 0 {
            offset += 1;
        }
        field_offsets.push(offset);
        if ft.is_reference() {
            ref_word_offsets.push(offset / wb);
        }
        offset += size;
    }

    BuiltinLayout {
        field_offsets,
        fixed_words: ceiling(offset as u64, wb as u64) as u32,
        ref_word_offsets,
        array,
    }
}
