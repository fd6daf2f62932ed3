//! Build-side runtime for the Ember boot image builder.
//!
//! Hosts the object graph the builder serializes: an arena heap of raw
//! build-layout objects, the built-in VM type schema, class-file ingestion
//! and resolution, and the depth-first heap walker that drives image
//! emission.

pub mod classfile;
pub mod finder;
pub mod heap;
pub mod machine;
pub mod schema;
pub mod walker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

mod error;

pub use error::RuntimeError;

pub use heap::{Heap, Obj, ObjKind};

pub use machine::{Machine, PoolSlot};

pub use schema::{BuiltinType, PrimitiveKind};

pub use walker::{HeapVisitor, HeapWalker};
