//! Image serializer.
//!
//! Section order: header, boot-class table, app-class table, string table,
//! call table, zero padding to a target-word boundary, heap map, heap, code
//! map, code. Index tables are u32s in target byte order; everything after
//! the tables is padded to whole target words.

use std::io::Write;

use ember_image::{pad_to_word, Header, TargetSpec};

use crate::code::CodeBuffer;
use crate::heap_image::HeapBuffer;

pub fn write_image<W: Write>(
    out: &mut W,
    spec: &TargetSpec,
    header: &Header,
    boot_classes: &[u32],
    app_classes: &[u32],
    strings: &[u32],
    calls: &[u32],
    heap: &HeapBuffer,
    code: &CodeBuffer,
) -> std::io::Result<()> {
    out.write_all(&header.to_bytes(spec))?;

    let mut table_bytes = 0usize;
    for table in [boot_classes, app_classes, strings, calls] {
        for &value in table {
            out.write_all(&spec.v4(value))?;
        }
        table_bytes += table.len() * 4;
    }
    let padded = pad_to_word(table_bytes as u64, spec.word_bytes()) as usize;
    out.write_all(&vec![0u8; padded - table_bytes])?;

    let heap_words = heap.position_words();
    out.write_all(&heap.map().to_bytes(spec, heap_words))?;
    out.write_all(&heap.bytes()[..heap.heap_size_bytes()])?;

    let code_size = code.len() as usize;
    out.write_all(&code.map().to_bytes(spec, code_size))?;
    out.write_all(code.bytes())?;
    let padded_code = pad_to_word(code_size as u64, spec.word_bytes()) as usize;
    out.write_all(&vec![0u8; padded_code - code_size])?;

    out.flush()
}
