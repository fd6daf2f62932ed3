//! Boot image builder core.
//!
//! Consumes a classpath plus the build runtime's live object graph and emits
//! a relocatable boot image: a pre-translated heap, compiled code with
//! resolved constants, reference bitmaps for both, and the index tables the
//! loading VM mmaps at startup.
//!
//! Pipeline: class ingestion registers type maps and compiles methods
//! (`code_image`), the graph walk lays out and translates the heap
//! (`heap_image`), constant resolution patches the code buffer, and the
//! serializer writes the artifact (`writer`). `builder` ties the phases
//! together.

pub mod builder;
pub mod builtins;
pub mod code;
pub mod code_image;
pub mod heap_image;
pub mod processor;
pub mod promise;
pub mod seed;
pub mod translate;
pub mod type_map;
pub mod writer;

mod error;

pub use builder::{build_boot_image, BuildSummary, BuilderConfig};

pub use builtins::register_builtin_maps;

pub use code::CodeBuffer;

pub use code_image::{make_code_image, update_constants, CompileFilter};

pub use error::BuildError;

pub use heap_image::{make_heap_image, HeapBuffer, ImageVisitor};

pub use processor::{Processor, TrampolineProcessor};

pub use promise::{CallEntry, ConstantEntry, DelayedPromise, PatchSite, PromiseRef, PromiseZone};

pub use translate::Translator;

pub use type_map::{Field, TypeMap, TypeMapKind, TypeMapRegistry};

#[cfg(test)]
mod builder_tests;
#[cfg(test)]
mod type_map_tests;
