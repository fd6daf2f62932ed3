//! Arena heap of raw build-layout objects.
//!
//! Every object is a zeroed byte buffer laid out for the build machine:
//! little-endian, `BuildSpec` word width, class handle in the first word.
//! `Obj` handles are 1-based arena indices; the handle value is also the
//! word written into reference slots, so a slot holding zero is null.

use std::num::NonZeroU32;

use ember_image::BuildSpec;

/// Handle to an arena object. The raw value doubles as the reference
/// representation inside object bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Obj(NonZeroU32);

impl Obj {
    #[inline]
    pub fn from_raw(raw: u32) -> Option<Obj> {
        NonZeroU32::new(raw).map(Obj)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    #[inline]
    fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

/// Allocation kind. Singleton-shaped objects carry their value-slot count so
/// the trailing build-side masks can be located.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjKind {
    Normal,
    StaticTable { body_words: u32 },
    Pool { body_words: u32 },
}

struct RawObject {
    class: Option<Obj>,
    kind: ObjKind,
    bytes: Vec<u8>,
}

/// The build-side arena. Objects are never freed; the arena lives for the
/// whole run.
pub struct Heap {
    spec: BuildSpec,
    objects: Vec<RawObject>,
}

impl Heap {
    pub fn new(spec: BuildSpec) -> Self {
        Self {
            spec,
            objects: Vec::new(),
        }
    }

    #[inline]
    pub fn spec(&self) -> BuildSpec {
        self.spec
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Allocate a zero-filled object of `size_bytes` and stamp the class
    /// word. `class` may be deferred during bootstrap and set later.
    pub fn alloc(&mut self, class: Option<Obj>, size_bytes: usize, kind: ObjKind) -> Obj {
        self.objects.push(RawObject {
            class,
            kind,
            bytes: vec![0; size_bytes],
        });
        let obj = Obj::from_raw(self.objects.len() as u32).unwrap();
        if let Some(c) = class {
            self.write_ref(obj, 0, Some(c));
        }
        obj
    }

    pub fn set_class(&mut self, obj: Obj, class: Obj) {
        self.objects[obj.index()].class = Some(class);
        self.write_ref(obj, 0, Some(class));
    }

    pub fn class_of(&self, obj: Obj) -> Option<Obj> {
        self.objects[obj.index()].class
    }

    pub fn kind(&self, obj: Obj) -> ObjKind {
        self.objects[obj.index()].kind
    }

    pub fn bytes(&self, obj: Obj) -> &[u8] {
        &self.objects[obj.index()].bytes
    }

    pub fn bytes_mut(&mut self, obj: Obj) -> &mut [u8] {
        &mut self.objects[obj.index()].bytes
    }

    pub fn size_bytes(&self, obj: Obj) -> usize {
        self.objects[obj.index()].bytes.len()
    }

    /// Read the build word at `byte_offset`, zero-extended.
    pub fn read_word(&self, obj: Obj, byte_offset: u32) -> u64 {
        self.spec.read_word(&self.bytes(obj)[byte_offset as usize..])
    }

    pub fn write_word(&mut self, obj: Obj, byte_offset: u32, value: u64) {
        let spec = self.spec;
        spec.put_word(&mut self.bytes_mut(obj)[byte_offset as usize..], value);
    }

    pub fn read_u8(&self, obj: Obj, byte_offset: u32) -> u8 {
        self.bytes(obj)[byte_offset as usize]
    }

    pub fn write_u8(&mut self, obj: Obj, byte_offset: u32, value: u8) {
        self.bytes_mut(obj)[byte_offset as usize] = value;
    }

    pub fn read_u32(&self, obj: Obj, byte_offset: u32) -> u32 {
        let b = self.bytes(obj);
        let o = byte_offset as usize;
        u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
    }

    pub fn write_u32(&mut self, obj: Obj, byte_offset: u32, value: u32) {
        self.bytes_mut(obj)[byte_offset as usize..byte_offset as usize + 4]
            .copy_from_slice(&value.to_le_bytes());
    }

    /// Read a reference slot.
    pub fn read_ref(&self, obj: Obj, byte_offset: u32) -> Option<Obj> {
        Obj::from_raw(self.read_word(obj, byte_offset) as u32)
    }

    pub fn write_ref(&mut self, obj: Obj, byte_offset: u32, value: Option<Obj>) {
        self.write_word(obj, byte_offset, value.map_or(0, Obj::raw) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_image::WordWidth;

    #[test]
    fn alloc_stamps_class_word() {
        let mut heap = Heap::new(BuildSpec::new(WordWidth::W64));
        let a = heap.alloc(None, 16, ObjKind::Normal);
        let b = heap.alloc(Some(a), 24, ObjKind::Normal);
        assert_eq!(heap.class_of(b), Some(a));
        assert_eq!(heap.read_ref(b, 0), Some(a));
        assert_eq!(heap.read_word(b, 0), a.raw() as u64);
    }

    #[test]
    fn null_refs_read_as_none() {
        let mut heap = Heap::new(BuildSpec::new(WordWidth::W32));
        let a = heap.alloc(None, 12, ObjKind::Normal);
        assert_eq!(heap.read_ref(a, 4), None);
        let b = heap.alloc(Some(a), 8, ObjKind::Normal);
        heap.write_ref(a, 4, Some(b));
        assert_eq!(heap.read_ref(a, 4), Some(b));
        heap.write_ref(a, 4, None);
        assert_eq!(heap.read_ref(a, 4), None);
    }

    #[test]
    fn words_narrow_on_32_bit_builds() {
        let mut heap = Heap::new(BuildSpec::new(WordWidth::W32));
        let a = heap.alloc(None, 8, ObjKind::Normal);
        heap.write_word(a, 4, 0x1_0000_0002);
        assert_eq!(heap.read_word(a, 4), 2);
    }
}
