//! Pre-freeze seeding of primitive and primitive-array classes.
//!
//! Run before the heap walk so the image never carries a name slot the
//! loading VM would otherwise populate lazily, which would mean writing an
//! immutable reference at run time.

use ember_runtime::finder::ClasspathFinder;
use ember_runtime::schema::{class_fields, BuiltinType, PrimitiveKind, PRIMITIVE_KINDS};
use ember_runtime::Machine;

use crate::BuildError;

/// Name every primitive class and resolve each one-dimensional primitive
/// array class into the boot loader.
pub fn seed_primitive_classes(
    m: &mut Machine,
    finder: &ClasspathFinder,
) -> Result<(), BuildError> {
    for kind in PRIMITIVE_KINDS {
        let name = m.make_byte_array(kind.name().as_bytes());
        let class = m.primitive_class(kind);
        m.set_ref(class, BuiltinType::Class, class_fields::NAME, Some(name));
    }

    for kind in PRIMITIVE_KINDS {
        if kind == PrimitiveKind::Void {
            continue;
        }
        let name = [b'[', kind.descriptor()];
        m.resolve_system_class(finder, &name)?;
    }
    Ok(())
}
