//! Type maps for the built-in VM types, derived from the static schema.
//!
//! Each schema sequence is folded into a map with the same alignment
//! discipline the runtime used for the build side, with target offsets
//! assigned independently for the target word width. Signed/unsigned and
//! float variants collapse to their copy representation; a terminal `Array`
//! marker switches to trailing-array mode.

use ember_image::{ceiling, FieldType};
use ember_runtime::schema::{BuiltinType, BUILTIN_TYPES};
use ember_runtime::Machine;

use crate::translate::Translator;
use crate::type_map::{TypeMap, TypeMapKind, TypeMapRegistry};
use crate::BuildError;

/// Register one Normal-kind map per built-in type, keyed by its class.
pub fn register_builtin_maps(
    m: &Machine,
    registry: &mut TypeMapRegistry,
    translator: Translator,
) -> Result<(), BuildError> {
    for t in BUILTIN_TYPES {
        let map = builtin_map(t, translator)?;
        registry.insert(m.builtin_class(t), map);
    }
    Ok(())
}

fn builtin_map(t: BuiltinType, translator: Translator) -> Result<TypeMap, BuildError> {
    let bwb = translator.build.word_bytes();
    let twb = translator.target.word_bytes();

    let mut fields: Vec<(FieldType, u32, u32)> = vec![(FieldType::Object, 0, 0)];
    let mut build_offset = bwb;
    let mut target_offset = twb;
    let mut array: Option<(u32, u32, FieldType)> = None;
    let mut in_array = false;

    for &ft in t.desc().fields {
        if ft == FieldType::Array {
            in_array = true;
            continue;
        }
        let translated = match ft {
            FieldType::Object => FieldType::Object,
            FieldType::Word | FieldType::IWord | FieldType::UWord => FieldType::IWord,
            FieldType::I8 | FieldType::U8 => FieldType::I8,
            FieldType::I16 | FieldType::U16 => FieldType::I16,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => FieldType::I32,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => FieldType::I64,
            other => {
                return Err(BuildError::SchemaDrift(format!(
                    "unexpected schema token {other:?} in {}",
                    t.desc().name
                )))
            }
        };
        let build_size = translated.size_bytes(translator.build.word);
        let target_size = translated.size_bytes(translator.target.word);

        if in_array {
            array = Some((build_size, target_size, translated));
            break;
        }

        while build_offset % build_size != 0 {
            build_offset += 1;
        }
        while target_offset % target_size != 0 {
            target_offset += 1;
        }
        fields.push((translated, build_offset, target_offset));
        build_offset += build_size;
        target_offset += target_size;
    }

    let build_fixed = ceiling(build_offset as u64, bwb as u64) as u32;
    let target_fixed = ceiling(target_offset as u64, twb as u64) as u32;
    let mut map = TypeMap::new(TypeMapKind::Normal, build_fixed, target_fixed, bwb);
    if let Some((build_elem, target_elem, ty)) = array {
        map = map.with_array(build_elem, target_elem, ty);
    }
    for (ty, b, tgt) in fields {
        map.add_field(ty, b, tgt);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_image::{BuildSpec, Endian, TargetSpec, WordWidth};

    fn translator(build: WordWidth, target: WordWidth) -> Translator {
        Translator::new(
            BuildSpec::new(build),
            TargetSpec::new(target, Endian::Little),
        )
    }

    #[test]
    fn byte_array_map_crosses_word_widths() {
        let map = builtin_map(BuiltinType::ByteArray, translator(WordWidth::W64, WordWidth::W32))
            .unwrap();
        assert_eq!(map.build_fixed_words, 2);
        assert_eq!(map.target_fixed_words, 2);
        assert_eq!(map.build_array_element_bytes, 1);
        assert_eq!(map.target_array_element_bytes, 1);
        assert_eq!(map.array_element_type, FieldType::I8);
        // class pointer and length
        assert_eq!(map.fixed_field_count(), 2);
    }

    #[test]
    fn object_array_elements_resize_with_target() {
        let map = builtin_map(
            BuiltinType::ObjectArray,
            translator(WordWidth::W64, WordWidth::W32),
        )
        .unwrap();
        assert_eq!(map.build_array_element_bytes, 8);
        assert_eq!(map.target_array_element_bytes, 4);
        assert_eq!(map.array_element_type, FieldType::Object);
    }

    #[test]
    fn class_map_matches_schema_geometry() {
        let map =
            builtin_map(BuiltinType::Class, translator(WordWidth::W64, WordWidth::W64)).unwrap();
        assert_eq!(map.build_fixed_words, 13);
        assert_eq!(map.target_fixed_words, 13);
        assert_eq!(map.fixed_field_count(), 13);
        assert!(!map.has_array());
        // name slot translates to the same offset on a same-width target
        assert_eq!(map.target_offset(48, 8, 8), 48);
    }

    #[test]
    fn string_map_narrows_words() {
        let map =
            builtin_map(BuiltinType::Str, translator(WordWidth::W64, WordWidth::W32)).unwrap();
        // data @8->4, offset @16->8, length @24->12, hash @32->16
        let fields = map.fields();
        assert_eq!(fields[1].build_offset, 8);
        assert_eq!(fields[1].target_offset, 4);
        assert_eq!(fields[4].build_offset, 32);
        assert_eq!(fields[4].target_offset, 16);
        assert_eq!(map.target_fixed_words, 5);
    }
}
