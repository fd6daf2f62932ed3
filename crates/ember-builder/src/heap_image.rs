//! Heap image emission.
//!
//! `ImageVisitor` drives the depth-first walker: each newly seen object is
//! translated into the heap buffer and assigned a 1-based number; every
//! parent-to-child edge is written back as an image-relative reference, with
//! the reference bitmap tracking which words hold pointers.
//!
//! Static-field tables and system class loaders are emitted as *fixed*
//! objects: a fixie header, the translated object with its first word
//! mark-tagged, and a per-object dirty mask. The running VM may mutate
//! references inside fixed objects; the rest of the image is immutable.

use ember_image::{
    ceiling, fixie_size_words, Bitmap, Header, TargetSpec, FIXED_MARK, FIXIE_AGE_OFFSET,
    FIXIE_HAS_MASK_OFFSET, FIXIE_SIZE_OFFSET, FIXIE_TENURE_THRESHOLD,
};
use ember_runtime::schema::BuiltinType;
use ember_runtime::{HeapVisitor, HeapWalker, Machine, Obj};

use crate::processor::Processor;
use crate::promise::ConstantEntry;
use crate::translate::Translator;
use crate::type_map::TypeMapRegistry;
use crate::BuildError;

/// Pre-allocated target heap plus its word-granular reference bitmap.
pub struct HeapBuffer {
    spec: TargetSpec,
    bytes: Vec<u8>,
    capacity_words: usize,
    map: Bitmap,
    position: usize,
}

impl HeapBuffer {
    pub fn new(spec: TargetSpec, capacity_bytes: usize) -> Self {
        Self {
            spec,
            bytes: Vec::new(),
            capacity_words: capacity_bytes / spec.word_bytes() as usize,
            map: Bitmap::new(spec.word_bits()),
            position: 0,
        }
    }

    #[inline]
    pub fn spec(&self) -> TargetSpec {
        self.spec
    }

    /// Cursor position in target words.
    pub fn position_words(&self) -> usize {
        self.position
    }

    pub fn heap_size_bytes(&self) -> usize {
        self.position * self.spec.word_bytes() as usize
    }

    /// Reserve room for `words` more words; returns the start word.
    fn require(&mut self, words: usize) -> Result<usize, BuildError> {
        if self.position + words >= self.capacity_words {
            return Err(BuildError::CapacityExceeded {
                what: "heap",
                needed: (self.position + words) * self.spec.word_bytes() as usize,
                capacity: self.capacity_words * self.spec.word_bytes() as usize,
            });
        }
        let needed = (self.position + words) * self.spec.word_bytes() as usize;
        if self.bytes.len() < needed {
            self.bytes.resize(needed, 0);
        }
        Ok(self.position)
    }

    fn advance(&mut self, words: usize) {
        self.position += words;
    }

    fn region_mut(&mut self, start_word: usize, words: usize) -> &mut [u8] {
        let wb = self.spec.word_bytes() as usize;
        &mut self.bytes[start_word * wb..(start_word + words) * wb]
    }

    pub fn read_word_at(&self, word_index: usize) -> u64 {
        let wb = self.spec.word_bytes() as usize;
        self.spec.read_word(&self.bytes[word_index * wb..])
    }

    pub fn write_word_at(&mut self, word_index: usize, value: u64) {
        let wb = self.spec.word_bytes() as usize;
        let spec = self.spec;
        spec.put_word(&mut self.bytes[word_index * wb..], value);
    }

    pub fn map(&self) -> &Bitmap {
        &self.map
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The edge currently being walked: parent object, its number, and the
/// build word offset of the slot under visit.
#[derive(Clone, Copy)]
struct Edge {
    obj: Obj,
    number: u32,
    offset_words: u32,
}

/// Heap-walk visitor that lays out and translates objects.
pub struct ImageVisitor<'a> {
    translator: Translator,
    registry: &'a TypeMapRegistry,
    heap: &'a mut HeapBuffer,
    class_class: Obj,
    static_table_word_offset: u32,
    current: Option<Edge>,
}

impl<'a> ImageVisitor<'a> {
    pub fn new(
        m: &Machine,
        translator: Translator,
        registry: &'a TypeMapRegistry,
        heap: &'a mut HeapBuffer,
    ) -> Self {
        Self {
            translator,
            registry,
            heap,
            class_class: m.builtin_class(BuiltinType::Class),
            static_table_word_offset: m.class_static_table_word_offset(),
            current: None,
        }
    }

    /// Static tables (reached through class metadata) and system class
    /// loaders must survive run-time mutation, so they are pinned.
    fn is_fixed(&self, m: &Machine, obj: Obj) -> bool {
        if let Some(edge) = self.current {
            if m.heap().class_of(edge.obj) == Some(self.class_class)
                && edge.offset_words == self.static_table_word_offset
            {
                return true;
            }
        }
        m.is_system_class_loader(obj)
    }

    fn emit_inline(&mut self, m: &Machine, obj: Obj) -> Result<u32, BuildError> {
        let map = self.registry.lookup(m, obj)?;
        let size = self.translator.target_size_words(m, map, obj) as usize;
        let start = self.heap.require(size)?;
        self.translator
            .copy_object(m, map, obj, self.heap.region_mut(start, size))?;
        self.heap.advance(size);
        Ok(start as u32 + 1)
    }

    fn emit_fixed(&mut self, m: &Machine, obj: Obj) -> Result<u32, BuildError> {
        let map = self.registry.lookup(m, obj)?;
        let twb = self.heap.spec().word_bytes();
        let size = self.translator.target_size_words(m, map, obj) as usize;
        let fixie_words = fixie_size_words(twb) as usize;
        let mask_words = ceiling(size as u64, twb as u64) as usize;
        let total = fixie_words + size + mask_words;

        let start = self.heap.require(total)?;
        let spec = self.heap.spec();
        let header = self.heap.region_mut(start, fixie_words);
        header[FIXIE_AGE_OFFSET] = FIXIE_TENURE_THRESHOLD + 1;
        header[FIXIE_HAS_MASK_OFFSET] = 1;
        header[FIXIE_SIZE_OFFSET..FIXIE_SIZE_OFFSET + 4]
            .copy_from_slice(&spec.v4(size as u32));

        let object_start = start + fixie_words;
        self.translator
            .copy_object(m, map, obj, self.heap.region_mut(object_start, size))?;

        let first = self.heap.read_word_at(object_start);
        self.heap.write_word_at(object_start, first | FIXED_MARK);

        // dirty mask after the object; left zeroed
        self.heap.advance(total);
        Ok(object_start as u32 + 1)
    }

    /// Patch the parent slot for the current edge with `number`, merging any
    /// mark already written into that word.
    fn write_edge(&mut self, m: &Machine, number: u32) -> Result<(), BuildError> {
        let Some(edge) = self.current else {
            return Ok(());
        };
        let bwb = self.translator.build.word_bytes();
        let twb = self.translator.target.word_bytes();
        let parent_map = self.registry.lookup(m, edge.obj)?;
        let target_offset = parent_map.target_offset(edge.offset_words * bwb, bwb, twb);
        let word = edge.number as usize - 1 + (target_offset / twb) as usize;

        let previous = self.heap.read_word_at(word);
        let value = self.translator.merge_reference(previous, number);
        if value != 0 {
            self.heap.map.mark(word);
        }
        self.heap.write_word_at(word, value);
        Ok(())
    }
}

impl HeapVisitor for ImageVisitor<'_> {
    type Error = BuildError;

    fn root(&mut self) {
        self.current = None;
    }

    fn visit_new(&mut self, m: &Machine, obj: Option<Obj>) -> Result<u32, BuildError> {
        let Some(obj) = obj else {
            return Ok(0);
        };
        let number = if self.is_fixed(m, obj) {
            self.emit_fixed(m, obj)?
        } else {
            self.emit_inline(m, obj)?
        };
        self.write_edge(m, number)?;
        Ok(number)
    }

    fn visit_old(&mut self, m: &Machine, _obj: Obj, number: u32) -> Result<(), BuildError> {
        self.write_edge(m, number)
    }

    fn push(&mut self, parent: Obj, number: u32, field_word_offset: u32) {
        self.current = Some(Edge {
            obj: parent,
            number,
            offset_words: field_word_offset,
        });
    }

    fn pop(&mut self) {
        self.current = None;
    }
}

/// Walk the full root set, translating the graph into `heap`. Root order:
/// boot-loader map entries, the boot loader, the app loader, the types
/// root, the processor's roots, then every heap constant.
pub fn make_heap_image(
    m: &Machine,
    header: &mut Header,
    heap: &mut HeapBuffer,
    registry: &TypeMapRegistry,
    translator: Translator,
    processor: &mut dyn Processor,
    constants: &[ConstantEntry],
) -> Result<HeapWalker, BuildError> {
    let mut walker = HeapWalker::new();
    {
        let mut visitor = ImageVisitor::new(m, translator, registry, heap);

        let boot_map = m.loader_map(m.boot_loader());
        for (_name, class) in m.hash_map_entries(boot_map) {
            walker.visit_root(m, &mut visitor, class)?;
        }

        header.boot_loader = walker.visit_root(m, &mut visitor, Some(m.boot_loader()))?;
        header.app_loader = walker.visit_root(m, &mut visitor, Some(m.app_loader()))?;
        header.types = walker.visit_root(m, &mut visitor, Some(m.types()))?;

        processor.visit_roots(m, &mut walker, &mut visitor)?;

        for entry in constants {
            walker.visit_root(m, &mut visitor, Some(entry.value))?;
        }
    }

    header.heap_size = heap.heap_size_bytes() as u32;
    Ok(walker)
}
