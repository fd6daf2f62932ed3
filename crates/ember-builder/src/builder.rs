//! Build orchestration.
//!
//! Phase order is load-bearing: every type map is registered before the
//! heap walk starts, the walk finishes before heap constants are patched,
//! and all bitmaps are complete before a single byte reaches the output.

use std::io::Write;

use ember_image::{
    BuildSpec, Header, TargetSpec, DEFAULT_CODE_CAPACITY, DEFAULT_HEAP_CAPACITY,
};
use ember_runtime::finder::ClasspathFinder;
use ember_runtime::Machine;

use crate::builtins::register_builtin_maps;
use crate::code::CodeBuffer;
use crate::code_image::{make_code_image, update_constants, CompileFilter};
use crate::heap_image::{make_heap_image, HeapBuffer};
use crate::processor::Processor;
use crate::promise::PromiseZone;
use crate::seed::seed_primitive_classes;
use crate::translate::Translator;
use crate::type_map::TypeMapRegistry;
use crate::{writer, BuildError};

/// Knobs for one build.
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    pub build: BuildSpec,
    pub target: TargetSpec,
    pub heap_capacity: usize,
    pub code_capacity: usize,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub method_spec: Option<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            build: BuildSpec::default(),
            target: TargetSpec::default(),
            heap_capacity: DEFAULT_HEAP_CAPACITY,
            code_capacity: DEFAULT_CODE_CAPACITY,
            class_name: None,
            method_name: None,
            method_spec: None,
        }
    }
}

/// Counts and sizes of the finished image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildSummary {
    pub boot_class_count: u32,
    pub app_class_count: u32,
    pub string_count: u32,
    pub call_count: u32,
    pub heap_size: u32,
    pub code_size: u32,
}

/// Run the whole pipeline and write the image to `out`.
pub fn build_boot_image<W: Write>(
    m: &mut Machine,
    finder: &ClasspathFinder,
    processor: &mut dyn Processor,
    config: &BuilderConfig,
    out: &mut W,
) -> Result<BuildSummary, BuildError> {
    let translator = Translator::new(config.build, config.target);
    let mut code = CodeBuffer::new(config.target, config.code_capacity);
    processor.initialize(&mut code)?;

    let mut zone = PromiseZone::new();
    let mut registry = TypeMapRegistry::new();
    let filter = CompileFilter {
        class_name: config.class_name.clone(),
        method_name: config.method_name.clone(),
        method_spec: config.method_spec.clone(),
    };

    let constants = make_code_image(
        m,
        finder,
        &mut registry,
        translator,
        processor,
        &mut zone,
        &mut code,
        &filter,
    )?;
    register_builtin_maps(m, &mut registry, translator)?;
    seed_primitive_classes(m, finder)?;
    tracing::debug!(
        type_maps = registry.len(),
        constants = constants.len(),
        "class ingestion complete"
    );

    let mut header = Header::new(&config.target);
    let mut heap = HeapBuffer::new(config.target, config.heap_capacity);
    let walker = make_heap_image(
        m,
        &mut header,
        &mut heap,
        &registry,
        translator,
        processor,
        &constants,
    )?;

    update_constants(&zone, &constants, &mut code, &walker)?;

    let boot_map = m.loader_map(m.boot_loader());
    let boot_classes = table_for_map(m, &walker, boot_map)?;
    let app_map = m.loader_map(m.app_loader());
    let app_classes = table_for_map(m, &walker, app_map)?;

    let mut strings = Vec::with_capacity(m.string_count());
    for s in m.strings() {
        let number = walker.find(s);
        if number == 0 {
            return Err(BuildError::UnresolvedReference(
                "interned string missing from the image".to_string(),
            ));
        }
        strings.push(number);
    }

    let calls = processor.make_call_table(&walker)?;

    header.boot_class_count = boot_classes.len() as u32;
    header.app_class_count = app_classes.len() as u32;
    header.string_count = strings.len() as u32;
    header.call_count = (calls.len() / 2) as u32;
    header.code_size = code.len();
    header.thunks = processor.thunks();

    tracing::info!(
        boot_classes = header.boot_class_count,
        strings = header.string_count,
        calls = header.call_count,
        heap_size = header.heap_size,
        code_size = header.code_size,
        "boot image assembled"
    );

    writer::write_image(
        out,
        &config.target,
        &header,
        &boot_classes,
        &app_classes,
        &strings,
        &calls,
        &heap,
        &code,
    )?;

    Ok(BuildSummary {
        boot_class_count: header.boot_class_count,
        app_class_count: header.app_class_count,
        string_count: header.string_count,
        call_count: header.call_count,
        heap_size: header.heap_size,
        code_size: header.code_size,
    })
}

/// Image offsets of every class registered in a loader map.
fn table_for_map(
    m: &Machine,
    walker: &ember_runtime::HeapWalker,
    map: ember_runtime::Obj,
) -> Result<Vec<u32>, BuildError> {
    let entries = m.hash_map_entries(map);
    let mut table = Vec::with_capacity(entries.len());
    for (_name, class) in entries {
        let class = class.ok_or_else(|| {
            BuildError::UnresolvedReference("loader map entry without a class".to_string())
        })?;
        let number = walker.find(class);
        if number == 0 {
            return Err(BuildError::UnresolvedReference(
                "loader map class missing from the image".to_string(),
            ));
        }
        table.push(number);
    }
    Ok(table)
}
