//! The build-side machine.
//!
//! Bootstraps the built-in class graph, owns the loaders and the types
//! root, interns strings, and resolves classes from a classpath finder into
//! heap metadata: class objects, field/method tables, static-field
//! singletons, and constant-pool singletons.
//!
//! Class-loader maps live in the heap (they are part of the image); the
//! string intern table is host-side bookkeeping, since interned strings stay
//! reachable through the pools that mention them.

use indexmap::IndexMap;

use ember_image::{pool_mask_words, singleton_mask_words, BuildSpec};

use crate::classfile::{self, PoolEntry, ACC_ABSTRACT, ACC_NATIVE, ACC_STATIC};
use crate::finder::ClasspathFinder;
use crate::heap::{Heap, Obj, ObjKind};
use crate::schema::{
    self, class_fields, code_fields, field_info_fields, hash_map_fields, loader_fields,
    method_fields, singleton_fields, string_fields, triple_fields, BuiltinLayout, BuiltinType,
    PrimitiveKind, BUILTIN_COUNT, BUILTIN_TYPES, PRIMITIVE_KINDS, VM_FLAG_PRIMITIVE,
};
use crate::RuntimeError;

/// Bucket count for heap hash maps.
const HASH_BUCKETS: usize = 31;

/// One constant-pool slot value handed to `make_pool`.
#[derive(Clone, Copy, Debug)]
pub enum PoolSlot {
    Ref(Option<Obj>),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    /// Phantom upper slot of a long or double.
    Pad,
}

pub struct Machine {
    heap: Heap,
    layouts: Vec<BuiltinLayout>,
    builtin_classes: Vec<Obj>,
    builtin_of_class: IndexMap<Obj, BuiltinType>,
    primitive_classes: Vec<Obj>,
    boot_loader: Obj,
    app_loader: Obj,
    types: Obj,
    string_map: IndexMap<Vec<u8>, Obj>,
    resolving: Vec<Vec<u8>>,
}

impl Machine {
    pub fn new(spec: BuildSpec) -> Self {
        let mut heap = Heap::new(spec);

        let layouts: Vec<BuiltinLayout> = BUILTIN_TYPES
            .iter()
            .map(|t| schema::compute_layout(t.desc().fields, spec))
            .collect();

        // Built-in class objects first; the metaclass cycle means classes
        // exist before their class pointers can be stamped.
        let wb = spec.word_bytes();
        let class_size = (layouts[BuiltinType::Class as usize].fixed_words * wb) as usize;
        let builtin_classes: Vec<Obj> = (0..BUILTIN_COUNT)
            .map(|_| heap.alloc(None, class_size, ObjKind::Normal))
            .collect();
        let class_class = builtin_classes[BuiltinType::Class as usize];
        for &c in &builtin_classes {
            heap.set_class(c, class_class);
        }

        let mut builtin_of_class = IndexMap::new();
        for (i, &c) in builtin_classes.iter().enumerate() {
            builtin_of_class.insert(c, BUILTIN_TYPES[i]);
        }

        let mut m = Machine {
            heap,
            layouts,
            builtin_classes,
            builtin_of_class,
            primitive_classes: Vec::new(),
            // placeholder until the loaders exist below
            boot_loader: class_class,
            app_loader: class_class,
            types: class_class,
            string_map: IndexMap::new(),
            resolving: Vec::new(),
        };

        for (i, &c) in m.builtin_classes.clone().iter().enumerate() {
            let t = BUILTIN_TYPES[i];
            let fixed = m.layouts[i].fixed_words as u64 * wb as u64;
            m.set_word(c, BuiltinType::Class, class_fields::FIXED_SIZE, fixed);
            let element_size = m.layouts[i].array.as_ref().map(|e| e.size_bytes);
            if let Some(element_size) = element_size {
                m.set_word(
                    c,
                    BuiltinType::Class,
                    class_fields::ARRAY_ELEMENT_SIZE,
                    element_size as u64,
                );
            }
            let name = m.make_byte_array(t.desc().name.as_bytes());
            m.set_ref(c, BuiltinType::Class, class_fields::NAME, Some(name));
        }

        // Primitive classes stay nameless here; naming happens in the
        // pre-freeze seeding pass.
        for kind in PRIMITIVE_KINDS {
            let c = m.alloc_class_object();
            m.set_word(c, BuiltinType::Class, class_fields::VM_FLAGS, VM_FLAG_PRIMITIVE);
            m.set_word(
                c,
                BuiltinType::Class,
                class_fields::ARRAY_ELEMENT_SIZE,
                kind.element_size() as u64,
            );
            m.primitive_classes.push(c);
        }

        m.boot_loader = m.make_system_class_loader(None);
        m.app_loader = m.make_system_class_loader(Some(m.boot_loader));

        let type_objs: Vec<Option<Obj>> = m
            .builtin_classes
            .iter()
            .chain(m.primitive_classes.iter())
            .map(|&c| Some(c))
            .collect();
        m.types = m.make_object_array(&type_objs);

        // Built-ins are boot classes: register them by name so the loader
        // can find them without touching the classpath.
        for &c in &m.builtin_classes.clone() {
            let name = m
                .get_ref(c, BuiltinType::Class, class_fields::NAME)
                .expect("built-in class without name");
            let map = m.loader_map(m.boot_loader);
            m.hash_map_insert(map, name, Some(c));
        }

        m
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[inline]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    #[inline]
    pub fn builtin_class(&self, t: BuiltinType) -> Obj {
        self.builtin_classes[t as usize]
    }

    /// Which built-in type a class object describes, if any.
    pub fn builtin_of_class(&self, class: Obj) -> Option<BuiltinType> {
        self.builtin_of_class.get(&class).copied()
    }

    #[inline]
    pub fn layout(&self, t: BuiltinType) -> &BuiltinLayout {
        &self.layouts[t as usize]
    }

    /// Build byte offset of a schema field.
    #[inline]
    pub fn field_offset(&self, t: BuiltinType, field: usize) -> u32 {
        self.layouts[t as usize].field_offsets[field]
    }

    pub fn boot_loader(&self) -> Obj {
        self.boot_loader
    }

    pub fn app_loader(&self) -> Obj {
        self.app_loader
    }

    pub fn types(&self) -> Obj {
        self.types
    }

    pub fn primitive_class(&self, kind: PrimitiveKind) -> Obj {
        self.primitive_classes[kind as usize]
    }

    // ------------------------------------------------------------------
    // Field access
    // ------------------------------------------------------------------

    pub fn get_ref(&self, obj: Obj, t: BuiltinType, field: usize) -> Option<Obj> {
        self.heap.read_ref(obj, self.field_offset(t, field))
    }

    pub fn set_ref(&mut self, obj: Obj, t: BuiltinType, field: usize, value: Option<Obj>) {
        let off = self.field_offset(t, field);
        self.heap.write_ref(obj, off, value);
    }

    pub fn get_word(&self, obj: Obj, t: BuiltinType, field: usize) -> u64 {
        self.heap.read_word(obj, self.field_offset(t, field))
    }

    pub fn set_word(&mut self, obj: Obj, t: BuiltinType, field: usize, value: u64) {
        let off = self.field_offset(t, field);
        self.heap.write_word(obj, off, value);
    }

    pub fn get_u8(&self, obj: Obj, t: BuiltinType, field: usize) -> u8 {
        self.heap.read_u8(obj, self.field_offset(t, field))
    }

    pub fn get_u32(&self, obj: Obj, t: BuiltinType, field: usize) -> u32 {
        self.heap.read_u32(obj, self.field_offset(t, field))
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn alloc_builtin(&mut self, t: BuiltinType, extra_bytes: usize) -> Obj {
        let class = self.builtin_class(t);
        let size =
            (self.layouts[t as usize].fixed_words * self.heap.spec().word_bytes()) as usize
                + extra_bytes;
        self.heap.alloc(Some(class), size, ObjKind::Normal)
    }

    fn alloc_class_object(&mut self) -> Obj {
        let c = self.alloc_builtin(BuiltinType::Class, 0);
        let layout = &self.layouts[BuiltinType::Class as usize];
        let fixed = layout.fixed_words as u64 * self.heap.spec().word_bytes() as u64;
        self.set_word(c, BuiltinType::Class, class_fields::FIXED_SIZE, fixed);
        c
    }

    pub fn make_byte_array(&mut self, bytes: &[u8]) -> Obj {
        let obj = self.alloc_builtin(BuiltinType::ByteArray, bytes.len());
        self.set_word(obj, BuiltinType::ByteArray, schema::array_fields::LENGTH, bytes.len() as u64);
        let start = self.array_body_offset(BuiltinType::ByteArray) as usize;
        self.heap.bytes_mut(obj)[start..start + bytes.len()].copy_from_slice(bytes);
        obj
    }

    pub fn byte_array_bytes(&self, obj: Obj) -> &[u8] {
        let len = self.get_word(obj, BuiltinType::ByteArray, schema::array_fields::LENGTH) as usize;
        let start = self.array_body_offset(BuiltinType::ByteArray) as usize;
        &self.heap.bytes(obj)[start..start + len]
    }

    pub fn make_char_array(&mut self, chars: &[u16]) -> Obj {
        let obj = self.alloc_builtin(BuiltinType::CharArray, chars.len() * 2);
        self.set_word(obj, BuiltinType::CharArray, schema::array_fields::LENGTH, chars.len() as u64);
        let start = self.array_body_offset(BuiltinType::CharArray) as usize;
        let body = &mut self.heap.bytes_mut(obj)[start..];
        for (i, &c) in chars.iter().enumerate() {
            body[i * 2..i * 2 + 2].copy_from_slice(&c.to_le_bytes());
        }
        obj
    }

    pub fn make_object_array(&mut self, elements: &[Option<Obj>]) -> Obj {
        let wb = self.heap.spec().word_bytes() as usize;
        let obj = self.alloc_builtin(BuiltinType::ObjectArray, elements.len() * wb);
        self.set_word(
            obj,
            BuiltinType::ObjectArray,
            schema::array_fields::LENGTH,
            elements.len() as u64,
        );
        for (i, &e) in elements.iter().enumerate() {
            self.array_set(obj, i, e);
        }
        obj
    }

    fn array_body_offset(&self, t: BuiltinType) -> u32 {
        self.layouts[t as usize].fixed_words * self.heap.spec().word_bytes()
    }

    pub fn array_length(&self, obj: Obj) -> usize {
        self.get_word(obj, BuiltinType::ObjectArray, schema::array_fields::LENGTH) as usize
    }

    pub fn array_get(&self, obj: Obj, index: usize) -> Option<Obj> {
        let wb = self.heap.spec().word_bytes();
        let off = self.array_body_offset(BuiltinType::ObjectArray) + index as u32 * wb;
        self.heap.read_ref(obj, off)
    }

    pub fn array_set(&mut self, obj: Obj, index: usize, value: Option<Obj>) {
        let wb = self.heap.spec().word_bytes();
        let off = self.array_body_offset(BuiltinType::ObjectArray) + index as u32 * wb;
        self.heap.write_ref(obj, off, value);
    }

    pub fn make_string(&mut self, utf8: &[u8]) -> Obj {
        let data = self.make_byte_array(utf8);
        let obj = self.alloc_builtin(BuiltinType::Str, 0);
        self.set_ref(obj, BuiltinType::Str, string_fields::DATA, Some(data));
        self.set_word(obj, BuiltinType::Str, string_fields::LENGTH, utf8.len() as u64);
        let hash = hash_bytes(utf8);
        let off = self.field_offset(BuiltinType::Str, string_fields::HASH);
        self.heap.write_u32(obj, off, hash);
        obj
    }

    /// Get or create the canonical string for these bytes.
    pub fn intern_string(&mut self, utf8: &[u8]) -> Obj {
        if let Some(&s) = self.string_map.get(utf8) {
            return s;
        }
        let s = self.make_string(utf8);
        self.string_map.insert(utf8.to_vec(), s);
        s
    }

    pub fn strings(&self) -> impl Iterator<Item = Obj> + '_ {
        self.string_map.values().copied()
    }

    pub fn string_count(&self) -> usize {
        self.string_map.len()
    }

    pub fn make_triple(&mut self, first: Option<Obj>, second: Option<Obj>, third: Option<Obj>) -> Obj {
        let obj = self.alloc_builtin(BuiltinType::Triple, 0);
        self.set_ref(obj, BuiltinType::Triple, triple_fields::FIRST, first);
        self.set_ref(obj, BuiltinType::Triple, triple_fields::SECOND, second);
        self.set_ref(obj, BuiltinType::Triple, triple_fields::THIRD, third);
        obj
    }

    fn make_system_class_loader(&mut self, parent: Option<Obj>) -> Obj {
        let map = self.make_hash_map();
        let obj = self.alloc_builtin(BuiltinType::SystemClassLoader, 0);
        self.set_ref(obj, BuiltinType::SystemClassLoader, loader_fields::PARENT, parent);
        self.set_ref(obj, BuiltinType::SystemClassLoader, loader_fields::MAP, Some(map));
        obj
    }

    pub fn is_system_class_loader(&self, obj: Obj) -> bool {
        self.heap.class_of(obj) == Some(self.builtin_class(BuiltinType::SystemClassLoader))
    }

    pub fn loader_map(&self, loader: Obj) -> Obj {
        self.get_ref(loader, BuiltinType::SystemClassLoader, loader_fields::MAP)
            .expect("class loader without a map")
    }

    // ------------------------------------------------------------------
    // Heap hash maps (byte-array keys)
    // ------------------------------------------------------------------

    pub fn make_hash_map(&mut self) -> Obj {
        let buckets = self.make_object_array(&vec![None; HASH_BUCKETS]);
        let obj = self.alloc_builtin(BuiltinType::HashMap, 0);
        self.set_ref(obj, BuiltinType::HashMap, hash_map_fields::ARRAY, Some(buckets));
        obj
    }

    pub fn hash_map_size(&self, map: Obj) -> u64 {
        self.get_word(map, BuiltinType::HashMap, hash_map_fields::SIZE)
    }

    /// Prepend `(key, value)` to the key's bucket chain.
    pub fn hash_map_insert(&mut self, map: Obj, key: Obj, value: Option<Obj>) {
        let buckets = self
            .get_ref(map, BuiltinType::HashMap, hash_map_fields::ARRAY)
            .expect("hash map without buckets");
        let bucket = hash_bytes(self.byte_array_bytes(key)) as usize % HASH_BUCKETS;
        let head = self.array_get(buckets, bucket);
        let entry = self.make_triple(Some(key), value, head);
        self.array_set(buckets, bucket, Some(entry));
        let size = self.hash_map_size(map);
        self.set_word(map, BuiltinType::HashMap, hash_map_fields::SIZE, size + 1);
    }

    pub fn hash_map_find(&self, map: Obj, key: &[u8]) -> Option<Obj> {
        let buckets = self.get_ref(map, BuiltinType::HashMap, hash_map_fields::ARRAY)?;
        let bucket = hash_bytes(key) as usize % HASH_BUCKETS;
        let mut entry = self.array_get(buckets, bucket);
        while let Some(e) = entry {
            let k = self.get_ref(e, BuiltinType::Triple, triple_fields::FIRST);
            if let Some(k) = k {
                if self.byte_array_bytes(k) == key {
                    return self.get_ref(e, BuiltinType::Triple, triple_fields::SECOND);
                }
            }
            entry = self.get_ref(e, BuiltinType::Triple, triple_fields::THIRD);
        }
        None
    }

    /// All `(key, value)` pairs in bucket-then-chain order. The order is
    /// stable for a given insertion sequence.
    pub fn hash_map_entries(&self, map: Obj) -> Vec<(Obj, Option<Obj>)> {
        let mut out = Vec::new();
        let Some(buckets) = self.get_ref(map, BuiltinType::HashMap, hash_map_fields::ARRAY) else {
            return out;
        };
        for i in 0..self.array_length(buckets) {
            let mut entry = self.array_get(buckets, i);
            while let Some(e) = entry {
                let k = self
                    .get_ref(e, BuiltinType::Triple, triple_fields::FIRST)
                    .expect("hash map entry without key");
                out.push((k, self.get_ref(e, BuiltinType::Triple, triple_fields::SECOND)));
                entry = self.get_ref(e, BuiltinType::Triple, triple_fields::THIRD);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Singletons
    // ------------------------------------------------------------------

    /// Allocate a static-field table with `body_words` value slots.
    /// `ref_word_offsets` are object-typed slots as word offsets from the
    /// start of the table (header included).
    pub fn make_static_table(&mut self, body_words: u32, ref_word_offsets: &[u32]) -> Obj {
        let spec = self.heap.spec();
        let wb = spec.word_bytes();
        let mask_words = singleton_mask_words(body_words, spec.word_bits());
        let total_words = 2 + body_words + mask_words;
        let class = self.builtin_class(BuiltinType::Singleton);
        let obj = self.heap.alloc(
            Some(class),
            (total_words * wb) as usize,
            ObjKind::StaticTable { body_words },
        );
        let len_off = self.field_offset(BuiltinType::Singleton, singleton_fields::LENGTH);
        self.heap
            .write_word(obj, len_off, (body_words + mask_words) as u64);

        if mask_words > 0 {
            let mask_start = (2 + body_words) * wb;
            self.set_build_mask_bit(obj, mask_start, 0);
            for &off in ref_word_offsets {
                self.set_build_mask_bit(obj, mask_start, off);
            }
        }
        obj
    }

    /// Allocate a constant-pool singleton. Trailing masks: a numeric mask
    /// over float/double slots, then an object mask, both indexed by slot
    /// position with the two header words counted in.
    pub fn make_pool(&mut self, slots: &[PoolSlot]) -> Obj {
        let spec = self.heap.spec();
        let wb = spec.word_bytes();
        let bits = spec.word_bits();
        let body = slots.len() as u32;
        let numeric_words = pool_mask_words(body, bits);
        let object_words = singleton_mask_words(body + numeric_words, bits);
        let total_words = 2 + body + numeric_words + object_words;
        let class = self.builtin_class(BuiltinType::Singleton);
        let obj = self.heap.alloc(
            Some(class),
            (total_words * wb) as usize,
            ObjKind::Pool { body_words: body },
        );
        let len_off = self.field_offset(BuiltinType::Singleton, singleton_fields::LENGTH);
        self.heap
            .write_word(obj, len_off, (body + numeric_words + object_words) as u64);

        let numeric_start = (2 + body) * wb;
        let object_start = (2 + body + numeric_words) * wb;
        self.set_build_mask_bit(obj, object_start, 0);

        for (i, &slot) in slots.iter().enumerate() {
            let off = (2 + i as u32) * wb;
            match slot {
                PoolSlot::Ref(v) => {
                    self.heap.write_ref(obj, off, v);
                    self.set_build_mask_bit(obj, object_start, 2 + i as u32);
                }
                PoolSlot::Int(v) => self.heap.write_u32(obj, off, v as u32),
                PoolSlot::Float(v) => {
                    self.heap.write_u32(obj, off, v.to_bits());
                    self.set_build_mask_bit(obj, numeric_start, 2 + i as u32);
                }
                PoolSlot::Long(v) => self.write_raw8(obj, off, v as u64),
                PoolSlot::Double(v) => {
                    self.write_raw8(obj, off, v.to_bits());
                    self.set_build_mask_bit(obj, numeric_start, 2 + i as u32);
                }
                PoolSlot::Pad => {}
            }
        }
        obj
    }

    fn write_raw8(&mut self, obj: Obj, byte_offset: u32, value: u64) {
        let o = byte_offset as usize;
        self.heap.bytes_mut(obj)[o..o + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn set_build_mask_bit(&mut self, obj: Obj, mask_byte_start: u32, bit: u32) {
        let spec = self.heap.spec();
        let wb = spec.word_bytes();
        let bits = spec.word_bits();
        let off = mask_byte_start + (bit / bits) * wb;
        let word = self.heap.read_word(obj, off);
        self.heap.write_word(obj, off, word | 1u64 << (bit % bits));
    }

    /// Value-slot count of a singleton-shaped object.
    pub fn singleton_body_words(&self, obj: Obj) -> Option<u32> {
        match self.heap.kind(obj) {
            ObjKind::StaticTable { body_words } | ObjKind::Pool { body_words } => Some(body_words),
            ObjKind::Normal => None,
        }
    }

    // ------------------------------------------------------------------
    // Reference walking
    // ------------------------------------------------------------------

    /// Build word offsets of every reference slot in `obj`, class pointer
    /// included, ascending.
    pub fn reference_offsets_words(&self, obj: Obj) -> Vec<u32> {
        let spec = self.heap.spec();
        let wb = spec.word_bytes();
        let bits = spec.word_bits();
        match self.heap.kind(obj) {
            ObjKind::StaticTable { body_words } => {
                let mask_start = (2 + body_words) * wb;
                self.collect_mask_bits(obj, mask_start, body_words + 2)
            }
            ObjKind::Pool { body_words } => {
                let numeric_words = pool_mask_words(body_words, bits);
                let object_start = (2 + body_words + numeric_words) * wb;
                self.collect_mask_bits(obj, object_start, body_words + 2)
            }
            ObjKind::Normal => {
                let class = self
                    .heap
                    .class_of(obj)
                    .expect("object without class in build heap");
                let t = self
                    .builtin_of_class(class)
                    .expect("object with non-built-in class in build heap");
                let layout = &self.layouts[t as usize];
                let mut offsets = layout.ref_word_offsets.clone();
                if let Some(elem) = &layout.array {
                    if elem.ty.is_reference() {
                        let count =
                            self.heap.read_word(obj, (layout.fixed_words - 1) * wb) as u32;
                        offsets.extend((0..count).map(|i| layout.fixed_words + i));
                    }
                }
                offsets
            }
        }
    }

    fn collect_mask_bits(&self, obj: Obj, mask_byte_start: u32, bit_count: u32) -> Vec<u32> {
        let spec = self.heap.spec();
        let wb = spec.word_bytes();
        let bits = spec.word_bits();
        (0..bit_count)
            .filter(|&bit| {
                let off = mask_byte_start + (bit / bits) * wb;
                self.heap.read_word(obj, off) & (1u64 << (bit % bits)) != 0
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Class metadata accessors
    // ------------------------------------------------------------------

    pub fn class_name_bytes(&self, class: Obj) -> Option<&[u8]> {
        self.get_ref(class, BuiltinType::Class, class_fields::NAME)
            .map(|n| self.byte_array_bytes(n))
    }

    pub fn class_fixed_size(&self, class: Obj) -> u64 {
        self.get_word(class, BuiltinType::Class, class_fields::FIXED_SIZE)
    }

    pub fn class_field_table(&self, class: Obj) -> Option<Obj> {
        self.get_ref(class, BuiltinType::Class, class_fields::FIELD_TABLE)
    }

    pub fn class_method_table(&self, class: Obj) -> Option<Obj> {
        self.get_ref(class, BuiltinType::Class, class_fields::METHOD_TABLE)
    }

    pub fn class_static_table(&self, class: Obj) -> Option<Obj> {
        self.get_ref(class, BuiltinType::Class, class_fields::STATIC_TABLE)
    }

    pub fn class_pool(&self, class: Obj) -> Option<Obj> {
        self.get_ref(class, BuiltinType::Class, class_fields::POOL)
    }

    /// Build word offset of the static-table slot in class metadata; the
    /// heap image pins the object behind this edge.
    pub fn class_static_table_word_offset(&self) -> u32 {
        self.field_offset(BuiltinType::Class, class_fields::STATIC_TABLE)
            / self.heap.spec().word_bytes()
    }

    pub fn method_flags(&self, method: Obj) -> u16 {
        self.get_word(method, BuiltinType::Method, method_fields::FLAGS) as u16
    }

    pub fn method_name_bytes(&self, method: Obj) -> &[u8] {
        let name = self
            .get_ref(method, BuiltinType::Method, method_fields::NAME)
            .expect("method without name");
        self.byte_array_bytes(name)
    }

    pub fn method_spec_bytes(&self, method: Obj) -> &[u8] {
        let spec = self
            .get_ref(method, BuiltinType::Method, method_fields::SPEC)
            .expect("method without descriptor");
        self.byte_array_bytes(spec)
    }

    pub fn method_code(&self, method: Obj) -> Option<Obj> {
        self.get_ref(method, BuiltinType::Method, method_fields::CODE)
    }

    pub fn set_code_compiled(&mut self, code: Obj, start: u64, size: u64) {
        self.set_word(code, BuiltinType::Code, code_fields::COMPILED_START, start);
        self.set_word(code, BuiltinType::Code, code_fields::COMPILED_SIZE, size);
    }

    // ------------------------------------------------------------------
    // Class resolution
    // ------------------------------------------------------------------

    /// Resolve a class by VM name into the boot loader, loading it from the
    /// classpath if needed. Idempotent.
    pub fn resolve_system_class(
        &mut self,
        finder: &ClasspathFinder,
        name: &[u8],
    ) -> Result<Obj, RuntimeError> {
        if let Some(c) = self.hash_map_find(self.loader_map(self.boot_loader), name) {
            return Ok(c);
        }
        if name.first() == Some(&b'[') {
            return self.resolve_array_class(finder, name);
        }

        let name_str = String::from_utf8_lossy(name).into_owned();
        if self.resolving.iter().any(|n| n == name) {
            return Err(RuntimeError::MalformedClass {
                name: name_str,
                reason: "circular superclass chain".to_string(),
            });
        }
        self.resolving.push(name.to_vec());
        let result = self.define_class(finder, &name_str, name);
        self.resolving.pop();
        result
    }

    fn resolve_array_class(
        &mut self,
        finder: &ClasspathFinder,
        name: &[u8],
    ) -> Result<Obj, RuntimeError> {
        let spec = self.heap.spec();
        let element = &name[1..];
        let (element_class, element_size) = match element.first() {
            Some(b'L') if element.last() == Some(&b';') => {
                let inner = &element[1..element.len() - 1];
                (self.resolve_system_class(finder, inner)?, spec.word_bytes())
            }
            Some(b'[') => (
                self.resolve_system_class(finder, element)?,
                spec.word_bytes(),
            ),
            Some(&d) => match PrimitiveKind::from_descriptor(d) {
                Some(kind) if kind != PrimitiveKind::Void => {
                    (self.primitive_class(kind), kind.element_size())
                }
                _ => {
                    return Err(RuntimeError::MalformedClass {
                        name: String::from_utf8_lossy(name).into_owned(),
                        reason: "bad array element descriptor".to_string(),
                    })
                }
            },
            None => {
                return Err(RuntimeError::MalformedClass {
                    name: String::from_utf8_lossy(name).into_owned(),
                    reason: "empty array descriptor".to_string(),
                })
            }
        };

        let wb = self.heap.spec().word_bytes();
        let name_obj = self.make_byte_array(name);
        let c = self.alloc_class_object();
        self.set_ref(c, BuiltinType::Class, class_fields::NAME, Some(name_obj));
        // array instances: class word plus length word, then elements
        self.set_word(c, BuiltinType::Class, class_fields::FIXED_SIZE, 2 * wb as u64);
        self.set_word(
            c,
            BuiltinType::Class,
            class_fields::ARRAY_ELEMENT_SIZE,
            element_size as u64,
        );
        self.set_ref(
            c,
            BuiltinType::Class,
            class_fields::ARRAY_ELEMENT_CLASS,
            Some(element_class),
        );
        self.set_ref(c, BuiltinType::Class, class_fields::LOADER, Some(self.boot_loader));

        let map = self.loader_map(self.boot_loader);
        self.hash_map_insert(map, name_obj, Some(c));
        Ok(c)
    }

    fn define_class(
        &mut self,
        finder: &ClasspathFinder,
        name_str: &str,
        name: &[u8],
    ) -> Result<Obj, RuntimeError> {
        let file_name = format!("{name_str}.class");
        let bytes = finder
            .find(&file_name)
            .map_err(|_| RuntimeError::ClassNotFound(name_str.to_string()))?;
        let cf = classfile::parse(name_str, &bytes)?;

        let super_class = match cf.super_class_name(name_str)? {
            Some(s) => {
                let s = s.to_vec();
                Some(self.resolve_system_class(finder, &s)?)
            }
            None => None,
        };

        // Materialize every utf8 pool entry once; names, descriptors, and
        // pool slots all share the same byte arrays.
        let utf8_objs: Vec<Option<Obj>> = cf
            .pool
            .iter()
            .map(|e| match e {
                PoolEntry::Utf8(b) => {
                    let b = b.clone();
                    Some(self.make_byte_array(&b))
                }
                _ => None,
            })
            .collect();
        let utf8_obj = |index: u16| -> Result<Obj, RuntimeError> {
            index
                .checked_sub(1)
                .and_then(|i| utf8_objs.get(i as usize).copied().flatten())
                .ok_or_else(|| RuntimeError::MalformedClass {
                    name: name_str.to_string(),
                    reason: format!("pool index {index} is not utf8"),
                })
        };

        let spec = self.heap.spec();
        let wb = spec.word_bytes();
        let this_name_index = match cf
            .this_class
            .checked_sub(1)
            .and_then(|i| cf.pool.get(i as usize))
        {
            Some(PoolEntry::Class { name }) => *name,
            _ => {
                return Err(RuntimeError::MalformedClass {
                    name: name_str.to_string(),
                    reason: "this_class is not a class entry".to_string(),
                })
            }
        };
        let name_obj = utf8_obj(this_name_index)?;

        let c = self.alloc_class_object();
        self.set_word(c, BuiltinType::Class, class_fields::FLAGS, cf.access_flags as u64);
        self.set_ref(c, BuiltinType::Class, class_fields::NAME, Some(name_obj));
        self.set_ref(c, BuiltinType::Class, class_fields::SUPER, super_class);
        self.set_ref(c, BuiltinType::Class, class_fields::LOADER, Some(self.boot_loader));

        // Instance and static field layout.
        let mut instance_offset = super_class.map_or(wb as u64, |s| self.class_fixed_size(s));
        let mut static_offset = 2 * wb as u64;
        let mut static_ref_words: Vec<u32> = Vec::new();
        let mut field_objs: Vec<Option<Obj>> = Vec::new();

        for f in &cf.fields {
            let descriptor = cf.utf8(name_str, f.descriptor)?.to_vec();
            let ft = classfile::descriptor_field_type(&descriptor).ok_or_else(|| {
                RuntimeError::UnknownDescriptor {
                    name: name_str.to_string(),
                    descriptor: String::from_utf8_lossy(&descriptor).into_owned(),
                }
            })?;
            let size = ft.size_bytes(spec.word) as u64;

            let offset = if f.access_flags & ACC_STATIC != 0 {
                while static_offset % size != 0 {
                    static_offset += 1;
                }
                let off = static_offset;
                if ft.is_reference() {
                    static_ref_words.push((off / wb as u64) as u32);
                }
                static_offset += size;
                off
            } else {
                while instance_offset % size != 0 {
                    instance_offset += 1;
                }
                let off = instance_offset;
                instance_offset += size;
                off
            };

            let fname = utf8_obj(f.name)?;
            let fspec = utf8_obj(f.descriptor)?;
            let info = self.alloc_builtin(BuiltinType::FieldInfo, 0);
            self.set_word(info, BuiltinType::FieldInfo, field_info_fields::FLAGS, f.access_flags as u64);
            self.set_word(info, BuiltinType::FieldInfo, field_info_fields::OFFSET, offset);
            let code_off = self.field_offset(BuiltinType::FieldInfo, field_info_fields::CODE);
            self.heap.write_u8(info, code_off, descriptor[0]);
            self.set_ref(info, BuiltinType::FieldInfo, field_info_fields::NAME, Some(fname));
            self.set_ref(info, BuiltinType::FieldInfo, field_info_fields::SPEC, Some(fspec));
            self.set_ref(info, BuiltinType::FieldInfo, field_info_fields::CLASS, Some(c));
            field_objs.push(Some(info));
        }

        let fixed_size = ember_image::pad_to_word(instance_offset, wb);
        self.set_word(c, BuiltinType::Class, class_fields::FIXED_SIZE, fixed_size);

        if !field_objs.is_empty() {
            let table = self.make_object_array(&field_objs);
            self.set_ref(c, BuiltinType::Class, class_fields::FIELD_TABLE, Some(table));
        }

        if static_offset > 2 * wb as u64 {
            let body_words =
                (ember_image::ceiling(static_offset, wb as u64) - 2) as u32;
            let table = self.make_static_table(body_words, &static_ref_words);
            self.set_ref(c, BuiltinType::Class, class_fields::STATIC_TABLE, Some(table));
        }

        // Methods.
        let mut method_objs: Vec<Option<Obj>> = Vec::new();
        for mm in &cf.methods {
            let mname = utf8_obj(mm.name)?;
            let mspec = utf8_obj(mm.descriptor)?;
            let method = self.alloc_builtin(BuiltinType::Method, 0);
            self.set_word(method, BuiltinType::Method, method_fields::FLAGS, mm.access_flags as u64);
            self.set_ref(method, BuiltinType::Method, method_fields::NAME, Some(mname));
            self.set_ref(method, BuiltinType::Method, method_fields::SPEC, Some(mspec));
            self.set_ref(method, BuiltinType::Method, method_fields::CLASS, Some(c));
            if mm.access_flags & (ACC_ABSTRACT | ACC_NATIVE) == 0 {
                let code = self.alloc_builtin(BuiltinType::Code, 0);
                self.set_ref(method, BuiltinType::Method, method_fields::CODE, Some(code));
            }
            method_objs.push(Some(method));
        }
        if !method_objs.is_empty() {
            let table = self.make_object_array(&method_objs);
            self.set_ref(c, BuiltinType::Class, class_fields::METHOD_TABLE, Some(table));
        }

        // Constant pool singleton.
        if !cf.pool.is_empty() {
            let mut slots: Vec<PoolSlot> = Vec::with_capacity(cf.pool.len());
            for (i, entry) in cf.pool.iter().enumerate() {
                let slot = match entry {
                    PoolEntry::Utf8(_) => PoolSlot::Ref(utf8_objs[i]),
                    PoolEntry::Integer(v) => PoolSlot::Int(*v),
                    PoolEntry::Float(v) => PoolSlot::Float(*v),
                    PoolEntry::Long(v) => PoolSlot::Long(*v),
                    PoolEntry::Double(v) => PoolSlot::Double(*v),
                    PoolEntry::Class { name } => PoolSlot::Ref(Some(utf8_obj(*name)?)),
                    PoolEntry::Str { utf8 } => {
                        let bytes = cf.utf8(name_str, *utf8)?.to_vec();
                        PoolSlot::Ref(Some(self.intern_string(&bytes)))
                    }
                    PoolEntry::Fieldref { .. }
                    | PoolEntry::Methodref { .. }
                    | PoolEntry::InterfaceMethodref { .. }
                    | PoolEntry::NameAndType { .. } => PoolSlot::Ref(None),
                    PoolEntry::Wide => PoolSlot::Pad,
                };
                slots.push(slot);
            }
            let pool = self.make_pool(&slots);
            self.set_ref(c, BuiltinType::Class, class_fields::POOL, Some(pool));
        }

        let map = self.loader_map(self.boot_loader);
        self.hash_map_insert(map, name_obj, Some(c));
        Ok(c)
    }
}

/// Byte-array hash used by heap hash maps and string objects.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in bytes {
        h = h.wrapping_mul(31).wrapping_add(b as u32);
    }
    h
}
