use ember_image::{
    boot_flat_constant, boot_heap_offset, boot_shift, ceiling, pad_to_word, BuildSpec, Endian,
    Header, TargetSpec, WordWidth, HEADER_SIZE,
};
use ember_runtime::classfile::ACC_STATIC;
use ember_runtime::finder::ClasspathFinder;
use ember_runtime::schema::BuiltinType;
use ember_runtime::testutil::ClassWriter;
use ember_runtime::{HeapVisitor, HeapWalker, Machine, Obj};

use crate::builder::{build_boot_image, BuilderConfig};
use crate::builtins::register_builtin_maps;
use crate::code::CodeBuffer;
use crate::code_image::{make_code_image, update_constants, CompileFilter};
use crate::heap_image::{make_heap_image, HeapBuffer};
use crate::processor::{Processor, TrampolineProcessor};
use crate::promise::{CallEntry, ConstantEntry, DelayedPromise, PatchSite, PromiseZone};
use crate::seed::seed_primitive_classes;
use crate::translate::Translator;
use crate::type_map::TypeMapRegistry;
use crate::BuildError;

struct ParsedImage {
    header: Header,
    boot: Vec<u32>,
    strings: Vec<u32>,
    calls: Vec<u32>,
    heap_map: Vec<u64>,
    heap: Vec<u8>,
    code_map: Vec<u64>,
    code: Vec<u8>,
}

fn parse_image(bytes: &[u8]) -> ParsedImage {
    let header = Header::from_bytes(bytes);
    assert!(header.validate_magic());
    let spec = header.target_spec();
    let twb = spec.word_bytes() as usize;
    let bits = spec.word_bits() as usize;

    let mut off = HEADER_SIZE;
    let table = |count: usize, off: &mut usize| -> Vec<u32> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(spec.r4(&bytes[*off..]));
            *off += 4;
        }
        out
    };
    let boot = table(header.boot_class_count as usize, &mut off);
    let app = table(header.app_class_count as usize, &mut off);
    let strings = table(header.string_count as usize, &mut off);
    let calls = table(header.call_count as usize * 2, &mut off);
    assert!(app.is_empty());

    let table_bytes = off - HEADER_SIZE;
    off = HEADER_SIZE + pad_to_word(table_bytes as u64, twb as u32) as usize;

    let heap_words = header.heap_size as usize / twb;
    let heap_map_words = ceiling(heap_words as u64, bits as u64) as usize;
    let mut heap_map = Vec::with_capacity(heap_map_words);
    for _ in 0..heap_map_words {
        heap_map.push(spec.read_word(&bytes[off..]));
        off += twb;
    }
    let heap = bytes[off..off + header.heap_size as usize].to_vec();
    off += header.heap_size as usize;

    let code_map_words = ceiling(header.code_size as u64, bits as u64) as usize;
    let mut code_map = Vec::with_capacity(code_map_words);
    for _ in 0..code_map_words {
        code_map.push(spec.read_word(&bytes[off..]));
        off += twb;
    }
    let padded_code = pad_to_word(header.code_size as u64, twb as u32) as usize;
    let code = bytes[off..off + header.code_size as usize].to_vec();
    off += padded_code;

    assert_eq!(off, bytes.len(), "trailing bytes after the code section");

    ParsedImage {
        header,
        boot,
        strings,
        calls,
        heap_map,
        heap,
        code_map,
        code,
    }
}

impl ParsedImage {
    fn spec(&self) -> TargetSpec {
        self.header.target_spec()
    }

    fn heap_words(&self) -> usize {
        self.header.heap_size as usize / self.spec().word_bytes() as usize
    }

    fn heap_word(&self, index: usize) -> u64 {
        let twb = self.spec().word_bytes() as usize;
        self.spec().read_word(&self.heap[index * twb..])
    }

    fn map_bit(map: &[u64], bits: usize, index: usize) -> bool {
        map[index / bits] & (1u64 << (index % bits)) != 0
    }

    /// Heap closure: every marked word is a valid nonzero in-image offset.
    fn assert_heap_closure(&self) {
        let bits = self.spec().word_bits() as usize;
        let pointer_mask = (1u64 << boot_shift(bits as u32)) - 1;
        for word in 0..self.heap_words() {
            if Self::map_bit(&self.heap_map, bits, word) {
                let value = self.heap_word(word);
                assert_ne!(value, 0, "marked heap word {word} holds zero");
                let number = value & pointer_mask;
                assert!(
                    number >= 1 && number <= self.heap_words() as u64,
                    "heap word {word} escapes the image: {number}"
                );
            }
        }
    }

    /// Code closure: every marked code word decodes to a heap or code
    /// offset inside the image.
    fn assert_code_closure(&self) {
        let spec = self.spec();
        let bits = spec.word_bits();
        let heap_flag = boot_heap_offset(bits);
        let flat_flag = boot_flat_constant(bits);
        for byte in 0..self.code.len() {
            if Self::map_bit(&self.code_map, bits as usize, byte) {
                let value = spec.read_word(&self.code[byte..]);
                let offset = value & !(heap_flag | flat_flag);
                if value & heap_flag != 0 {
                    assert!(
                        offset >= 1 && offset <= self.heap_words() as u64,
                        "code constant at {byte} escapes the heap: {offset}"
                    );
                } else {
                    assert!(
                        offset < self.code.len() as u64,
                        "code constant at {byte} escapes the code image: {offset}"
                    );
                }
            }
        }
    }
}

fn write_class(dir: &std::path::Path, name: &str, bytes: &[u8]) {
    let path = dir.join(format!("{name}.class"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

fn build(dir: &std::path::Path, config: &BuilderConfig) -> (Vec<u8>, crate::BuildSummary, Machine) {
    let mut m = Machine::new(config.build);
    let finder = ClasspathFinder::with_roots(vec![dir.to_path_buf()]);
    let mut processor = TrampolineProcessor::new();
    let mut out = Vec::new();
    let summary = build_boot_image(&mut m, &finder, &mut processor, config, &mut out).unwrap();
    (out, summary, m)
}

#[test]
fn empty_classpath_builds_a_minimal_image() {
    let dir = tempfile::tempdir().unwrap();
    let (bytes, summary, _m) = build(dir.path(), &BuilderConfig::default());

    // built-ins and the eight primitive array classes are always present
    assert!(summary.boot_class_count >= 13);
    assert_eq!(summary.string_count, 0);
    assert_eq!(summary.call_count, 0);
    assert_eq!(summary.code_size, 0);
    assert!(summary.heap_size > 0);

    let image = parse_image(&bytes);
    assert_eq!(image.header.boot_class_count, summary.boot_class_count);
    assert_eq!(image.header.heap_size, summary.heap_size);
    assert_eq!(image.header.code_size, 0);
    assert!(image.strings.is_empty());
    assert!(image.calls.is_empty());
    assert!(image.code.is_empty());
    assert!(image.header.boot_loader > 0);
    assert!(image.header.app_loader > 0);
    assert!(image.header.types > 0);

    for &offset in &image.boot {
        assert!(offset >= 1 && offset as usize <= image.heap_words());
    }
    image.assert_heap_closure();
}

#[test]
fn single_class_adds_one_boot_class() {
    let empty = tempfile::tempdir().unwrap();
    let (_bytes, base, _m) = build(empty.path(), &BuilderConfig::default());

    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "t/Empty", &ClassWriter::new("t/Empty").finish());
    let (bytes, summary, m) = build(dir.path(), &BuilderConfig::default());

    assert_eq!(summary.boot_class_count, base.boot_class_count + 1);
    assert_eq!(summary.call_count, 0);
    assert!(m.hash_map_find(m.loader_map(m.boot_loader()), b"t/Empty").is_some());
    parse_image(&bytes).assert_heap_closure();
}

#[test]
fn methods_produce_code_and_call_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/Runner");
    w.field(0, "state", "I");
    w.field(ACC_STATIC, "instance", "Lt/Runner;");
    w.method(0, "run", "()V");
    w.method(0, "stop", "()V");
    write_class(dir.path(), "t/Runner", &w.finish());

    let (bytes, summary, _m) = build(dir.path(), &BuilderConfig::default());
    assert_eq!(summary.call_count, 2);
    assert!(summary.code_size > 0);

    let image = parse_image(&bytes);
    let spec = image.spec();
    let wb = spec.word_bytes();

    // thunk block plus a two-word trampoline per method
    assert_eq!(image.header.code_size, (8 + 4) * wb);
    assert_eq!(image.header.thunks.interpret.start, 0);
    assert_eq!(image.header.thunks.native.start, 4 * wb);

    // each call-table entry names an in-heap method and in-code entry point
    for pair in image.calls.chunks(2) {
        let (method, code_start) = (pair[0], pair[1]);
        assert!(method >= 1 && method as usize <= image.heap_words());
        assert!(code_start < image.header.code_size);
    }

    // every trampoline literal was patched and mapped
    image.assert_heap_closure();
    image.assert_code_closure();
    let bits = spec.word_bits() as usize;
    let first_literal = (8 + 1) * wb as usize;
    assert!(ParsedImage::map_bit(&image.code_map, bits, first_literal));
    let literal = spec.read_word(&image.code[first_literal..]);
    assert_ne!(literal & boot_heap_offset(bits as u32), 0);

    // dispatch words are flat code constants naming the interpret thunk
    let first_dispatch = 8 * wb as usize;
    let dispatch = spec.read_word(&image.code[first_dispatch..]);
    assert_eq!(dispatch, boot_flat_constant(bits as u32));
}

#[test]
fn method_filters_narrow_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/Two");
    w.method(0, "keep", "()V");
    w.method(0, "drop", "()V");
    write_class(dir.path(), "t/Two", &w.finish());

    let config = BuilderConfig {
        class_name: Some("t/Two".to_string()),
        method_name: Some("keep".to_string()),
        ..Default::default()
    };
    let (_bytes, summary, _m) = build(dir.path(), &config);
    assert_eq!(summary.call_count, 1);
}

#[test]
fn class_filter_still_registers_superclasses() {
    let dir = tempfile::tempdir().unwrap();
    let mut base = ClassWriter::new("t/Base");
    base.field(ACC_STATIC, "root", "Lt/Base;");
    write_class(dir.path(), "t/Base", &base.finish());
    let mut derived = ClassWriter::new("t/Derived");
    derived.set_super("t/Base");
    write_class(dir.path(), "t/Derived", &derived.finish());

    let config = BuilderConfig {
        class_name: Some("t/Derived".to_string()),
        ..Default::default()
    };
    // the super's static table is reachable and needs a singleton map
    let (bytes, _summary, _m) = build(dir.path(), &config);
    parse_image(&bytes).assert_heap_closure();
}

#[test]
fn builds_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/Det");
    w.string_entry("fixed point");
    w.method(0, "go", "()V");
    write_class(dir.path(), "t/Det", &w.finish());

    let (a, _, _) = build(dir.path(), &BuilderConfig::default());
    let (b, _, _) = build(dir.path(), &BuilderConfig::default());
    assert_eq!(a, b);
}

#[test]
fn cross_target_32_big_endian_image_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/X");
    w.field(0, "a", "J");
    w.field(ACC_STATIC, "s", "Ljava/lang/Object;");
    w.string_entry("cross");
    w.method(0, "m", "()V");
    write_class(dir.path(), "t/X", &w.finish());

    let config = BuilderConfig {
        target: TargetSpec::new(WordWidth::W32, Endian::Big),
        ..Default::default()
    };
    let (bytes, summary, _m) = build(dir.path(), &config);

    let image = parse_image(&bytes);
    assert_eq!(image.header.word_bytes, 4);
    assert_eq!(image.header.big_endian, 1);
    assert_eq!(image.header.string_count, summary.string_count);
    image.assert_heap_closure();
    image.assert_code_closure();
}

#[test]
fn primitive_array_classes_are_resolvable() {
    let dir = tempfile::tempdir().unwrap();
    let (bytes, _summary, m) = build(dir.path(), &BuilderConfig::default());

    let map = m.loader_map(m.boot_loader());
    for name in [b"[B", b"[Z", b"[S", b"[C", b"[I", b"[J", b"[F", b"[D"] {
        assert!(m.hash_map_find(map, name).is_some(), "missing array class");
    }
    // and each is indexed in the boot class table
    let image = parse_image(&bytes);
    assert_eq!(image.boot.len() as u64, m.hash_map_size(map));
}

/// Minimal scripted compiler: emits one literal word per method, promising
/// the first string constant of the owning class's pool.
#[derive(Default)]
struct StringConstProcessor {
    compiled: Vec<(Obj, u32)>,
}

impl StringConstProcessor {
    fn first_pool_string(m: &Machine, method: Obj) -> Obj {
        use ember_runtime::schema::method_fields;
        let class = m
            .get_ref(method, BuiltinType::Method, method_fields::CLASS)
            .unwrap();
        let pool = m.class_pool(class).unwrap();
        let body = m.singleton_body_words(pool).unwrap();
        let wb = m.heap().spec().word_bytes();
        let string_class = m.builtin_class(BuiltinType::Str);
        for slot in 0..body {
            if let Some(obj) = m.heap().read_ref(pool, (2 + slot) * wb) {
                if m.heap().class_of(obj) == Some(string_class) {
                    return obj;
                }
            }
        }
        panic!("no string constant in pool");
    }
}

impl Processor for StringConstProcessor {
    fn compile_method(
        &mut self,
        m: &mut Machine,
        zone: &mut PromiseZone,
        constants: &mut Vec<ConstantEntry>,
        _calls: &mut Vec<CallEntry>,
        _addresses: &mut Vec<DelayedPromise>,
        code: &mut CodeBuffer,
        method: Obj,
    ) -> Result<(), BuildError> {
        let start = code.emit_word(0)?;
        let promise = zone.make_listen();
        zone.add_listener(
            promise,
            PatchSite {
                location: start,
                flat: false,
            },
        );
        constants.push(ConstantEntry {
            value: Self::first_pool_string(m, method),
            promise,
        });
        self.compiled.push((method, start));
        Ok(())
    }

    fn compiled_start(&self, method: Obj) -> Option<u32> {
        self.compiled
            .iter()
            .find(|(me, _)| *me == method)
            .map(|&(_, s)| s)
    }

    fn thunks(&self) -> ember_image::Thunks {
        ember_image::Thunks::default()
    }

    fn visit_roots(
        &self,
        m: &Machine,
        walker: &mut HeapWalker,
        visitor: &mut dyn HeapVisitor<Error = BuildError>,
    ) -> Result<(), BuildError> {
        for &(method, _) in &self.compiled {
            walker.visit_root(m, visitor, Some(method))?;
        }
        Ok(())
    }

    fn make_call_table(&self, walker: &HeapWalker) -> Result<Vec<u32>, BuildError> {
        let mut table = Vec::new();
        for &(method, start) in &self.compiled {
            table.push(walker.find(method));
            table.push(start);
        }
        Ok(table)
    }
}

/// A method that refers to a string constant: one constants entry, and the
/// patched site carries the string's heap offset tagged as a heap reference.
#[test]
fn string_constant_resolves_to_a_tagged_heap_offset() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/Greeter");
    w.string_entry("hi there");
    w.method(0, "greet", "()V");
    write_class(dir.path(), "t/Greeter", &w.finish());

    let build = BuildSpec::default();
    let target = TargetSpec::default();
    let translator = Translator::new(build, target);
    let mut m = Machine::new(build);
    let finder = ClasspathFinder::with_roots(vec![dir.path().to_path_buf()]);
    let mut processor = StringConstProcessor::default();
    let mut zone = PromiseZone::new();
    let mut registry = TypeMapRegistry::new();
    let mut code = CodeBuffer::new(target, 4096);

    let constants = make_code_image(
        &mut m,
        &finder,
        &mut registry,
        translator,
        &mut processor,
        &mut zone,
        &mut code,
        &CompileFilter::default(),
    )
    .unwrap();
    assert_eq!(constants.len(), 1);

    register_builtin_maps(&m, &mut registry, translator).unwrap();
    seed_primitive_classes(&mut m, &finder).unwrap();

    let mut header = Header::new(&target);
    let mut heap = HeapBuffer::new(target, 1 << 20);
    let walker = make_heap_image(
        &m,
        &mut header,
        &mut heap,
        &registry,
        translator,
        &mut processor,
        &constants,
    )
    .unwrap();

    update_constants(&zone, &constants, &mut code, &walker).unwrap();

    let string = m.intern_string(b"hi there");
    let number = walker.find(string);
    assert!(number > 0);

    let bits = target.word_bits();
    assert_eq!(
        code.read_word_at(0),
        number as u64 | boot_heap_offset(bits)
    );
    assert!(code.map().is_marked(0));
}

#[test]
fn unresolved_heap_constant_is_fatal() {
    let target = TargetSpec::default();
    let mut m = Machine::new(BuildSpec::default());
    let orphan = m.make_byte_array(b"never walked");

    let mut zone = PromiseZone::new();
    let promise = zone.make_listen();
    let mut code = CodeBuffer::new(target, 64);
    code.emit_word(0).unwrap();
    zone.add_listener(
        promise,
        PatchSite {
            location: 0,
            flat: false,
        },
    );
    let constants = vec![ConstantEntry {
        value: orphan,
        promise,
    }];
    let walker = HeapWalker::new();
    assert!(matches!(
        update_constants(&zone, &constants, &mut code, &walker),
        Err(BuildError::UnresolvedReference(_))
    ));
}
