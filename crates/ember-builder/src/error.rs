//! Builder error type.
//!
//! Every failure is fatal to the build: a half-built boot image is worse
//! than none, and a rerun is cheap. The CLI prints the error and exits
//! nonzero.

use ember_runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Class ingestion or resolution failed.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// A semantic type or type map was missing or inconsistent; the static
    /// schema and the code disagree.
    #[error("schema drift: {0}")]
    SchemaDrift(String),

    /// The heap or code buffer would overflow its pre-allocated capacity.
    #[error("{what} capacity exceeded: need {needed}, have {capacity}")]
    CapacityExceeded {
        what: &'static str,
        needed: usize,
        capacity: usize,
    },

    /// The heap walk never assigned a number to a referenced object.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// Output I/O failure.
    #[error("output i/o error: {0}")]
    Io(#[from] std::io::Error),
}
