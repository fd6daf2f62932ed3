//! Class ingestion and code emission.
//!
//! One pass over the classpath: each matching class is resolved, its pool
//! and layout maps registered, and its methods compiled. Afterwards, call
//! sites and captured code-address promises are patched. Heap-constant
//! promises wait for the graph walk; `update_constants` patches them last.

use ember_image::{boot_flat_constant, boot_heap_offset, ceiling, FieldType};
use ember_runtime::classfile::{self, ACC_NATIVE, ACC_STATIC};
use ember_runtime::finder::ClasspathFinder;
use ember_runtime::schema::{field_info_fields, BuiltinType};
use ember_runtime::{HeapWalker, Machine, Obj};

use crate::code::CodeBuffer;
use crate::processor::Processor;
use crate::promise::{CallEntry, ConstantEntry, DelayedPromise, PromiseZone};
use crate::translate::Translator;
use crate::type_map::{TypeMap, TypeMapKind, TypeMapRegistry};
use crate::BuildError;

/// Which classes and methods get compiled.
#[derive(Clone, Debug, Default)]
pub struct CompileFilter {
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub method_spec: Option<String>,
}

impl CompileFilter {
    fn matches_class(&self, name: &str) -> bool {
        self.class_name.as_deref().is_none_or(|c| c == name)
    }

    fn matches_method(&self, name: &[u8], spec: &[u8]) -> bool {
        self.method_name
            .as_deref()
            .is_none_or(|n| n.as_bytes() == name)
            && self
                .method_spec
                .as_deref()
                .is_none_or(|s| s.as_bytes() == spec)
    }
}

/// Ingest the classpath: resolve classes, register their type maps, compile
/// their methods, and resolve call and code-address promises. Returns the
/// heap-constant list for the walk and the final patch phase.
#[allow(clippy::too_many_arguments)]
pub fn make_code_image(
    m: &mut Machine,
    finder: &ClasspathFinder,
    registry: &mut TypeMapRegistry,
    translator: Translator,
    processor: &mut dyn Processor,
    zone: &mut PromiseZone,
    code: &mut CodeBuffer,
    filter: &CompileFilter,
) -> Result<Vec<ConstantEntry>, BuildError> {
    let mut constants: Vec<ConstantEntry> = Vec::new();
    let mut calls: Vec<CallEntry> = Vec::new();
    let mut addresses: Vec<DelayedPromise> = Vec::new();

    for (entry_name, bytes) in finder.class_entries().map_err(ember_runtime::RuntimeError::Io)? {
        let Some(class_name) = entry_name.strip_suffix(".class") else {
            continue;
        };
        if !filter.matches_class(class_name) {
            continue;
        }
        tracing::debug!(class = class_name, "ingesting class");

        let class = m.resolve_system_class(finder, class_name.as_bytes())?;
        register_pool_map(m, registry, translator, class_name, &bytes, class)?;
        register_class_maps(m, registry, translator, class)?;

        let Some(table) = m.class_method_table(class) else {
            continue;
        };
        for i in 0..m.array_length(table) {
            let method = m.array_get(table, i).expect("hole in method table");
            if !filter.matches_method(m.method_name_bytes(method), m.method_spec_bytes(method)) {
                continue;
            }
            if m.method_code(method).is_some() || m.method_flags(method) & ACC_NATIVE != 0 {
                processor.compile_method(
                    m,
                    zone,
                    &mut constants,
                    &mut calls,
                    &mut addresses,
                    code,
                    method,
                )?;
            }
        }
    }

    // Resolution may have pulled in classes whose own classpath entries were
    // filtered out (superclass chains). They are in the loader map and will
    // be walked, so they need maps too.
    let resolved: Vec<(Vec<u8>, Obj)> = m
        .hash_map_entries(m.loader_map(m.boot_loader()))
        .into_iter()
        .filter_map(|(name, class)| Some((m.byte_array_bytes(name).to_vec(), class?)))
        .collect();
    for (name, class) in resolved {
        if registry.get(class).is_some()
            || m.builtin_of_class(class).is_some()
            || name.first() == Some(&b'[')
        {
            continue;
        }
        let class_name = String::from_utf8_lossy(&name).into_owned();
        let bytes = finder
            .find(&format!("{class_name}.class"))
            .map_err(ember_runtime::RuntimeError::Io)?;
        register_pool_map(m, registry, translator, &class_name, &bytes, class)?;
        register_class_maps(m, registry, translator, class)?;
    }

    resolve_calls(m, processor, zone, &calls, code)?;
    resolve_addresses(&addresses, code);

    Ok(constants)
}

/// Pool layout: one word per pool slot on both sides, behind the two
/// synthetic slots for the class pointer and the length word.
pub(crate) fn register_pool_map(
    m: &Machine,
    registry: &mut TypeMapRegistry,
    translator: Translator,
    class_name: &str,
    class_bytes: &[u8],
    class: Obj,
) -> Result<(), BuildError> {
    let slot_types = classfile::scan_constant_pool(class_name, class_bytes)?;
    if slot_types.is_empty() {
        return Ok(());
    }
    let Some(pool) = m.class_pool(class) else {
        return Ok(());
    };

    let bwb = translator.build.word_bytes();
    let twb = translator.target.word_bytes();
    let count = slot_types.len() as u32;
    let mut map = TypeMap::new(TypeMapKind::Pool, count + 2, count + 2, bwb);
    map.add_field(FieldType::Object, 0, 0);
    map.add_field(FieldType::IWord, bwb, twb);
    for (i, &ty) in slot_types.iter().enumerate() {
        map.add_field(ty, (2 + i as u32) * bwb, (2 + i as u32) * twb);
    }
    registry.insert(pool, map);
    Ok(())
}

/// Instance map for the class, plus a singleton map for its static table
/// when it has one. Target offsets restart after the class pointer and are
/// re-aligned per field; build offsets come from resolution.
pub(crate) fn register_class_maps(
    m: &Machine,
    registry: &mut TypeMapRegistry,
    translator: Translator,
    class: Obj,
) -> Result<(), BuildError> {
    let bwb = translator.build.word_bytes();
    let twb = translator.target.word_bytes();
    let pad_on_build = translator.build.word_bits() == 32;

    let mut members: Vec<(FieldType, u32, u32)> = vec![(FieldType::Object, 0, 0)];
    let mut statics: Vec<(FieldType, u32, u32)> =
        vec![(FieldType::Object, 0, 0), (FieldType::IWord, bwb, twb)];
    let mut member_offset = twb;
    let mut static_offset = 2 * twb;

    if let Some(table) = m.class_field_table(class) {
        for i in 0..m.array_length(table) {
            let info = m.array_get(table, i).expect("hole in field table");
            let code = m.get_u8(info, BuiltinType::FieldInfo, field_info_fields::CODE);
            let ty = classfile::descriptor_field_type(&[code]).ok_or_else(|| {
                BuildError::SchemaDrift(format!("field code {code:#x} maps to no slot type"))
            })?;
            let build_offset =
                m.get_word(info, BuiltinType::FieldInfo, field_info_fields::OFFSET) as u32;
            let size = ty.size_bytes(translator.target.word);
            let is_static =
                m.get_word(info, BuiltinType::FieldInfo, field_info_fields::FLAGS) as u16
                    & ACC_STATIC
                    != 0;

            let (list, offset) = if is_static {
                (&mut statics, &mut static_offset)
            } else {
                (&mut members, &mut member_offset)
            };
            while *offset % size != 0 {
                *offset += 1;
            }
            list.push((ty, build_offset, *offset));
            if pad_on_build {
                if let Some(pad) = ty.pad_type() {
                    list.push((pad, build_offset + 4, *offset + 4));
                }
            }
            *offset += size;
        }
    }

    let build_fixed = ceiling(m.class_fixed_size(class), bwb as u64) as u32;
    let target_fixed = ceiling(member_offset as u64, twb as u64) as u32;
    let mut instance_map = TypeMap::new(TypeMapKind::Normal, build_fixed, target_fixed, bwb);
    for (ty, b, t) in members {
        instance_map.add_field(ty, b, t);
    }
    registry.insert(class, instance_map);

    if let Some(static_table) = m.class_static_table(class) {
        let body = m
            .singleton_body_words(static_table)
            .expect("static table is not singleton-shaped");
        let target_fixed = ceiling(static_offset as u64, twb as u64) as u32;
        let mut static_map = TypeMap::new(TypeMapKind::Singleton, body + 2, target_fixed, bwb);
        for (ty, b, t) in statics {
            static_map.add_field(ty, b, t);
        }
        registry.insert(static_table, static_map);
    }
    Ok(())
}

/// Patch every call site with the callee's code offset, or the native thunk
/// for native callees.
fn resolve_calls(
    m: &Machine,
    processor: &dyn Processor,
    zone: &PromiseZone,
    calls: &[CallEntry],
    code: &mut CodeBuffer,
) -> Result<(), BuildError> {
    let bits = code.spec().word_bits();
    for entry in calls {
        let address = if m.method_flags(entry.method) & ACC_NATIVE != 0 {
            processor.thunks().native.start
        } else {
            processor.compiled_start(entry.method).ok_or_else(|| {
                BuildError::UnresolvedReference(format!(
                    "call to uncompiled method {}",
                    String::from_utf8_lossy(m.method_name_bytes(entry.method)),
                ))
            })?
        };
        for site in &zone.listen(entry.promise).listeners {
            let (flat, location) = site.resolve(0);
            let location = location as u32;
            let mut value = address as u64;
            if flat {
                value |= boot_flat_constant(bits);
            }
            assert!(location < code.len(), "call patch site outside the code buffer");
            code.write_word_at(location, value);
            code.mark(location);
        }
    }
    Ok(())
}

/// Patch captured code-address constants with their basis offsets.
fn resolve_addresses(addresses: &[DelayedPromise], code: &mut CodeBuffer) {
    let bits = code.spec().word_bits();
    for promise in addresses {
        let (flat, location) = promise.listener.resolve(0);
        let location = location as u32;
        let mut value = promise.basis as u64;
        if flat {
            value |= boot_flat_constant(bits);
        }
        assert!(location < code.len(), "address patch site outside the code buffer");
        code.write_word_at(location, value);
        code.mark(location);
    }
}

/// Patch every heap-constant site with its object's image offset, tagged as
/// a heap reference.
pub fn update_constants(
    zone: &PromiseZone,
    constants: &[ConstantEntry],
    code: &mut CodeBuffer,
    walker: &HeapWalker,
) -> Result<(), BuildError> {
    let bits = code.spec().word_bits();
    for entry in constants {
        let target = walker.find(entry.value);
        if target == 0 {
            return Err(BuildError::UnresolvedReference(
                "heap constant missing from the image".to_string(),
            ));
        }
        for site in &zone.listen(entry.promise).listeners {
            let (flat, location) = site.resolve(0);
            let location = location as u32;
            let mut value = target as u64 | boot_heap_offset(bits);
            if flat {
                value |= boot_flat_constant(bits);
            }
            assert!(
                location < code.len(),
                "constant patch site outside the code buffer"
            );
            code.write_word_at(location, value);
            code.mark(location);
        }
    }
    Ok(())
}
