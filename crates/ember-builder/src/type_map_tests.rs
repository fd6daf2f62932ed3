use ember_image::{BuildSpec, Endian, FieldType, TargetSpec, WordWidth};
use ember_runtime::classfile::ACC_STATIC;
use ember_runtime::finder::ClasspathFinder;
use ember_runtime::testutil::ClassWriter;
use ember_runtime::Machine;

use crate::code_image::{register_class_maps, register_pool_map};
use crate::translate::Translator;
use crate::type_map::{TypeMap, TypeMapKind, TypeMapRegistry};

fn translator(build: WordWidth, target: WordWidth) -> Translator {
    Translator::new(
        BuildSpec::new(build),
        TargetSpec::new(target, Endian::Little),
    )
}

fn write_class(dir: &std::path::Path, name: &str, bytes: &[u8]) {
    let path = dir.join(format!("{name}.class"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

fn resolve(
    m: &mut Machine,
    dir: &std::path::Path,
    name: &str,
) -> (ember_runtime::Obj, ClasspathFinder, Vec<u8>) {
    let finder = ClasspathFinder::with_roots(vec![dir.to_path_buf()]);
    let bytes = finder.find(&format!("{name}.class")).unwrap();
    let class = m.resolve_system_class(&finder, name.as_bytes()).unwrap();
    (class, finder, bytes)
}

#[test]
fn dense_table_is_one_entry_per_build_byte() {
    let map = TypeMap::new(TypeMapKind::Normal, 3, 3, 8);
    // a 3-word fixed prefix on a 64-bit build spans 24 byte offsets
    assert_eq!(map.target_offset(0, 8, 8), 0);
    let mut map = map;
    map.add_field(FieldType::Object, 0, 0);
    map.add_field(FieldType::I32, 8, 4);
    map.add_field(FieldType::I32, 16, 8);
    assert_eq!(map.target_offset(8, 8, 8), 4);
    assert_eq!(map.target_offset(16, 8, 8), 8);
}

#[test]
#[should_panic(expected = "outside fixed prefix")]
fn field_outside_prefix_panics() {
    let mut map = TypeMap::new(TypeMapKind::Normal, 2, 2, 4);
    map.add_field(FieldType::I32, 8, 8);
}

#[test]
fn array_offsets_extend_past_the_prefix() {
    let mut map = TypeMap::new(TypeMapKind::Normal, 2, 2, 8).with_array(8, 4, FieldType::Object);
    map.add_field(FieldType::Object, 0, 0);
    map.add_field(FieldType::IWord, 8, 4);
    // element 0 and 3 of the trailing array
    assert_eq!(map.target_offset(16, 8, 4), 8);
    assert_eq!(map.target_offset(40, 8, 4), 20);
}

#[test]
fn instance_map_for_fieldless_class_has_one_field() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "t/Empty", &ClassWriter::new("t/Empty").finish());

    let mut m = Machine::new(BuildSpec::default());
    let (class, _finder, _bytes) = resolve(&mut m, dir.path(), "t/Empty");

    let mut registry = TypeMapRegistry::new();
    register_class_maps(&m, &mut registry, translator(WordWidth::W64, WordWidth::W64), class)
        .unwrap();

    let map = registry.get(class).unwrap();
    assert_eq!(map.fixed_field_count(), 1);
    assert_eq!(map.fields()[0].ty, FieldType::Object);
    assert_eq!(map.target_fixed_words, 1);
    assert!(m.class_static_table(class).is_none());
}

#[test]
fn instance_and_singleton_maps_for_mixed_fields() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/Mixed");
    w.field(0, "value", "I");
    w.field(ACC_STATIC, "shared", "Ljava/lang/Object;");
    write_class(dir.path(), "t/Mixed", &w.finish());

    let mut m = Machine::new(BuildSpec::default());
    let (class, _finder, _bytes) = resolve(&mut m, dir.path(), "t/Mixed");

    let mut registry = TypeMapRegistry::new();
    let tr = translator(WordWidth::W64, WordWidth::W64);
    register_class_maps(&m, &mut registry, tr, class).unwrap();

    // instance map: class pointer at 0, the int right after it
    let map = registry.get(class).unwrap();
    assert_eq!(map.fixed_field_count(), 2);
    assert_eq!(map.fields()[0].ty, FieldType::Object);
    assert_eq!(map.fields()[0].target_offset, 0);
    assert_eq!(map.fields()[1].ty, FieldType::I32);
    assert_eq!(map.fields()[1].target_offset, 8);

    // singleton map for the static table, keyed by instance
    let statics = m.class_static_table(class).unwrap();
    let smap = registry.get(statics).unwrap();
    assert_eq!(smap.kind, TypeMapKind::Singleton);
    assert_eq!(smap.fixed_field_count(), 3);
    let object_field = smap.fields()[2];
    assert_eq!(object_field.ty, FieldType::Object);
    assert_eq!(object_field.target_offset, 16);

    // lookup dispatches on shape: by class for instances, by handle for
    // the singleton
    assert!(registry.lookup(&m, statics).is_ok());
}

#[test]
fn double_field_on_32_bit_build_gets_a_pad() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/D");
    w.field(0, "d", "D");
    write_class(dir.path(), "t/D", &w.finish());

    let mut m = Machine::new(BuildSpec::new(WordWidth::W32));
    let (class, _finder, _bytes) = resolve(&mut m, dir.path(), "t/D");

    let mut registry = TypeMapRegistry::new();
    register_class_maps(&m, &mut registry, translator(WordWidth::W32, WordWidth::W32), class)
        .unwrap();

    let map = registry.get(class).unwrap();
    let types: Vec<FieldType> = map.fields().iter().map(|f| f.ty).collect();
    assert_eq!(types, vec![FieldType::Object, FieldType::F64, FieldType::F64Pad]);
    // 8-byte alignment holds on both sides
    assert_eq!(map.fields()[1].build_offset, 8);
    assert_eq!(map.fields()[1].target_offset, 8);
    assert_eq!(map.fields()[2].target_offset, 12);
    assert_eq!(map.target_fixed_words, 4);
}

#[test]
fn pool_map_tags_and_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let mut w = ClassWriter::new("t/Pool");
    w.string_entry("text");
    w.int_entry(3);
    w.long_entry(9);
    write_class(dir.path(), "t/Pool", &w.finish());

    let mut m = Machine::new(BuildSpec::default());
    let (class, _finder, bytes) = resolve(&mut m, dir.path(), "t/Pool");

    let mut registry = TypeMapRegistry::new();
    let tr = translator(WordWidth::W64, WordWidth::W32);
    register_pool_map(&m, &mut registry, tr, "t/Pool", &bytes, class).unwrap();

    let pool = m.class_pool(class).unwrap();
    let map = registry.get(pool).unwrap();
    assert_eq!(map.kind, TypeMapKind::Pool);
    // utf8, Class, utf8, String, Integer, Long, pad + two synthetic slots
    assert_eq!(map.fixed_field_count(), 9);
    assert_eq!(map.fields()[0].ty, FieldType::Object);
    assert_eq!(map.fields()[1].ty, FieldType::IWord);
    assert_eq!(map.fields()[6].ty, FieldType::I32);
    assert_eq!(map.fields()[7].ty, FieldType::I64);
    assert_eq!(map.fields()[8].ty, FieldType::I64Pad);
    // dense word spacing on both sides
    assert_eq!(map.fields()[4].build_offset, 4 * 8);
    assert_eq!(map.fields()[4].target_offset, 4 * 4);
}

#[test]
fn lookup_without_map_is_schema_drift() {
    let mut m = Machine::new(BuildSpec::default());
    let a = m.make_byte_array(b"x");
    let registry = TypeMapRegistry::new();
    assert!(matches!(
        registry.lookup(&m, a),
        Err(crate::BuildError::SchemaDrift(_))
    ));
}
