//! Error type for build-runtime operations.

/// Error during class ingestion, resolution, or heap emission.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Class file failed structural validation.
    #[error("malformed class {name}: {reason}")]
    MalformedClass { name: String, reason: String },

    /// Constant-pool tag outside the supported set (schema drift).
    #[error("unknown constant pool tag {tag} in {name}")]
    UnknownPoolTag { name: String, tag: u8 },

    /// Field descriptor that maps to no semantic slot type.
    #[error("unknown field descriptor {descriptor:?} in {name}")]
    UnknownDescriptor { name: String, descriptor: String },

    /// Named class is on no classpath root.
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// A pre-allocated buffer would overflow.
    #[error("{what} capacity exceeded: need {needed}, have {capacity}")]
    CapacityExceeded {
        what: &'static str,
        needed: usize,
        capacity: usize,
    },

    /// Classpath I/O failure.
    #[error("classpath i/o error: {0}")]
    Io(#[from] std::io::Error),
}
