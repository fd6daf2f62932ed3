//! Processor contract and the trampoline processor.
//!
//! Method compilation proper is a collaborator concern; the builder only
//! needs the promise lists a compiler leaves behind, plus the call table and
//! thunk block. The trampoline processor is the shipped implementation:
//! every compiled method becomes a two-word trampoline that transfers to the
//! shared dispatch thunk through a flat code-address constant and loads its
//! method object through a literal-pool heap constant. The interpreter takes
//! it from there at run time.

use indexmap::IndexMap;

use ember_image::{ThunkRange, Thunks};
use ember_runtime::classfile::ACC_NATIVE;
use ember_runtime::{HeapVisitor, HeapWalker, Machine, Obj};

use crate::code::CodeBuffer;
use crate::promise::{CallEntry, ConstantEntry, DelayedPromise, PatchSite, PromiseZone};
use crate::BuildError;

/// The compiler the builder drives.
pub trait Processor {
    /// Called once before compilation with the empty code buffer.
    fn initialize(&mut self, code: &mut CodeBuffer) -> Result<(), BuildError> {
        let _ = code;
        Ok(())
    }

    /// Compile one method, appending promises to the three lists.
    #[allow(clippy::too_many_arguments)]
    fn compile_method(
        &mut self,
        m: &mut Machine,
        zone: &mut PromiseZone,
        constants: &mut Vec<ConstantEntry>,
        calls: &mut Vec<CallEntry>,
        addresses: &mut Vec<DelayedPromise>,
        code: &mut CodeBuffer,
        method: Obj,
    ) -> Result<(), BuildError>;

    /// Code offset of a compiled method's entry, if it was compiled.
    fn compiled_start(&self, method: Obj) -> Option<u32>;

    /// The shared thunk block, zeroed ranges if nothing was compiled.
    fn thunks(&self) -> Thunks;

    /// Visit compiler-held roots so they survive into the image.
    fn visit_roots(
        &self,
        m: &Machine,
        walker: &mut HeapWalker,
        visitor: &mut dyn HeapVisitor<Error = BuildError>,
    ) -> Result<(), BuildError>;

    /// `(method heap number, code offset)` pairs for the call index table.
    fn make_call_table(&self, walker: &HeapWalker) -> Result<Vec<u32>, BuildError>;
}

/// Words per thunk in the shared block.
const THUNK_WORDS: u32 = 4;

/// Trampoline-emitting processor.
#[derive(Default)]
pub struct TrampolineProcessor {
    compiled: IndexMap<Obj, u32>,
    thunks: Option<Thunks>,
}

impl TrampolineProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the thunk block at the front of the code image on first use, so
    /// an image with no methods carries no code at all.
    fn ensure_thunks(&mut self, code: &mut CodeBuffer) -> Result<Thunks, BuildError> {
        if let Some(t) = self.thunks {
            return Ok(t);
        }
        let wb = code.spec().word_bytes();
        let interpret_start = code.len();
        for _ in 0..THUNK_WORDS {
            code.emit_word(0)?;
        }
        let native_start = code.len();
        for _ in 0..THUNK_WORDS {
            code.emit_word(0)?;
        }
        let t = Thunks {
            interpret: ThunkRange {
                start: interpret_start,
                size: THUNK_WORDS * wb,
            },
            native: ThunkRange {
                start: native_start,
                size: THUNK_WORDS * wb,
            },
        };
        self.thunks = Some(t);
        Ok(t)
    }
}

impl Processor for TrampolineProcessor {
    fn compile_method(
        &mut self,
        m: &mut Machine,
        zone: &mut PromiseZone,
        constants: &mut Vec<ConstantEntry>,
        _calls: &mut Vec<CallEntry>,
        addresses: &mut Vec<DelayedPromise>,
        code: &mut CodeBuffer,
        method: Obj,
    ) -> Result<(), BuildError> {
        let thunks = self.ensure_thunks(code)?;
        let start = code.len();

        // dispatch word: flat constant resolved to the thunk entry
        let thunk = if m.method_flags(method) & ACC_NATIVE != 0 {
            thunks.native.start
        } else {
            thunks.interpret.start
        };
        let dispatch = code.emit_word(0)?;
        addresses.push(DelayedPromise {
            basis: thunk,
            listener: PatchSite {
                location: dispatch,
                flat: true,
            },
        });

        // literal-pool word: the method object, patched after layout
        let literal = code.emit_word(0)?;
        let promise = zone.make_listen();
        zone.add_listener(
            promise,
            PatchSite {
                location: literal,
                flat: false,
            },
        );
        constants.push(ConstantEntry {
            value: method,
            promise,
        });

        self.compiled.insert(method, start);
        if let Some(code_obj) = m.method_code(method) {
            m.set_code_compiled(code_obj, start as u64, (code.len() - start) as u64);
        }
        Ok(())
    }

    fn compiled_start(&self, method: Obj) -> Option<u32> {
        self.compiled.get(&method).copied()
    }

    fn thunks(&self) -> Thunks {
        self.thunks.unwrap_or_default()
    }

    fn visit_roots(
        &self,
        m: &Machine,
        walker: &mut HeapWalker,
        visitor: &mut dyn HeapVisitor<Error = BuildError>,
    ) -> Result<(), BuildError> {
        for (&method, _) in &self.compiled {
            walker.visit_root(m, visitor, Some(method))?;
        }
        Ok(())
    }

    fn make_call_table(&self, walker: &HeapWalker) -> Result<Vec<u32>, BuildError> {
        let mut table = Vec::with_capacity(self.compiled.len() * 2);
        for (&method, &start) in &self.compiled {
            let number = walker.find(method);
            if number == 0 {
                return Err(BuildError::UnresolvedReference(
                    "compiled method missing from the heap image".to_string(),
                ));
            }
            table.push(number);
            table.push(start);
        }
        Ok(table)
    }
}
