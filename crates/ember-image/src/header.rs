//! Image header (80 bytes).
//!
//! Written first, in target byte order throughout. On-disk section order:
//! Header → BootClassTable → AppClassTable → StringTable → CallTable →
//! pad → HeapMap → Heap → CodeMap → Code.

use crate::target::{Endian, TargetSpec, WordWidth};

/// Magic bytes: b"EMBR".
pub const MAGIC: [u8; 4] = *b"EMBR";

/// Format version.
pub const VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 80;

/// One thunk in the shared thunk block at the front of the code image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThunkRange {
    pub start: u32,
    pub size: u32,
}

/// Entry points the loading VM patches calls through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Thunks {
    pub interpret: ThunkRange,
    pub native: ThunkRange,
}

/// Image header.
///
/// Layout:
/// - 0-11: identity (magic, version, word-size byte, endian byte, pad)
/// - 12-27: counts (boot classes, app classes, strings, calls)
/// - 28-43: sizes and code base (heap size, code size, code base)
/// - 44-55: root numbers (boot loader, app loader, types)
/// - 56-71: thunk block (interpret start/size, native start/size)
/// - 72-79: reserved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    /// Target word size in bytes (4 or 8).
    pub word_bytes: u8,
    /// 0 = little-endian, 1 = big-endian.
    pub big_endian: u8,
    pub boot_class_count: u32,
    pub app_class_count: u32,
    pub string_count: u32,
    pub call_count: u32,
    /// Heap image size in bytes (cursor position times the target word size).
    pub heap_size: u32,
    pub code_size: u32,
    /// Always zero in a relocatable image; the loader rebases code constants.
    pub code_base: u64,
    /// Heap number of the boot class loader.
    pub boot_loader: u32,
    /// Heap number of the application class loader.
    pub app_loader: u32,
    /// Heap number of the built-in types array.
    pub types: u32,
    pub thunks: Thunks,
}

impl Header {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            word_bytes: spec.word_bytes() as u8,
            big_endian: matches!(spec.endian, Endian::Big) as u8,
            boot_class_count: 0,
            app_class_count: 0,
            string_count: 0,
            call_count: 0,
            heap_size: 0,
            code_size: 0,
            code_base: 0,
            boot_loader: 0,
            app_loader: 0,
            types: 0,
            thunks: Thunks::default(),
        }
    }

    pub fn validate_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// The target spec the header declares.
    pub fn target_spec(&self) -> TargetSpec {
        TargetSpec::new(
            if self.word_bytes == 4 {
                WordWidth::W32
            } else {
                WordWidth::W64
            },
            if self.big_endian != 0 {
                Endian::Big
            } else {
                Endian::Little
            },
        )
    }

    /// Encode to 80 bytes in target byte order.
    pub fn to_bytes(&self, spec: &TargetSpec) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        b[0..4].copy_from_slice(&self.magic);
        b[4..8].copy_from_slice(&spec.v4(self.version));
        b[8] = self.word_bytes;
        b[9] = self.big_endian;
        b[12..16].copy_from_slice(&spec.v4(self.boot_class_count));
        b[16..20].copy_from_slice(&spec.v4(self.app_class_count));
        b[20..24].copy_from_slice(&spec.v4(self.string_count));
        b[24..28].copy_from_slice(&spec.v4(self.call_count));
        b[28..32].copy_from_slice(&spec.v4(self.heap_size));
        b[32..36].copy_from_slice(&spec.v4(self.code_size));
        b[36..44].copy_from_slice(&spec.v8(self.code_base));
        b[44..48].copy_from_slice(&spec.v4(self.boot_loader));
        b[48..52].copy_from_slice(&spec.v4(self.app_loader));
        b[52..56].copy_from_slice(&spec.v4(self.types));
        b[56..60].copy_from_slice(&spec.v4(self.thunks.interpret.start));
        b[60..64].copy_from_slice(&spec.v4(self.thunks.interpret.size));
        b[64..68].copy_from_slice(&spec.v4(self.thunks.native.start));
        b[68..72].copy_from_slice(&spec.v4(self.thunks.native.size));
        b
    }

    /// Decode from 80 bytes. Byte order is recovered from the endian byte.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= HEADER_SIZE, "header too short");

        let word_bytes = bytes[8];
        let big_endian = bytes[9];
        let spec = TargetSpec::new(
            if word_bytes == 4 {
                WordWidth::W32
            } else {
                WordWidth::W64
            },
            if big_endian != 0 {
                Endian::Big
            } else {
                Endian::Little
            },
        );

        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: spec.r4(&bytes[4..]),
            word_bytes,
            big_endian,
            boot_class_count: spec.r4(&bytes[12..]),
            app_class_count: spec.r4(&bytes[16..]),
            string_count: spec.r4(&bytes[20..]),
            call_count: spec.r4(&bytes[24..]),
            heap_size: spec.r4(&bytes[28..]),
            code_size: spec.r4(&bytes[32..]),
            code_base: spec.r8(&bytes[36..]),
            boot_loader: spec.r4(&bytes[44..]),
            app_loader: spec.r4(&bytes[48..]),
            types: spec.r4(&bytes[52..]),
            thunks: Thunks {
                interpret: ThunkRange {
                    start: spec.r4(&bytes[56..]),
                    size: spec.r4(&bytes[60..]),
                },
                native: ThunkRange {
                    start: spec.r4(&bytes[64..]),
                    size: spec.r4(&bytes[68..]),
                },
            },
        }
    }
}
