//! Class-file reader.
//!
//! Two entry points with different depths: `scan_constant_pool` reads just
//! far enough to tag each pool slot with a semantic type, which is all the
//! pool layout pass needs; `parse` reads the full structural skeleton
//! (pool values, flags, field and method tables) for class resolution.
//! Attribute bodies and bytecode are skipped.

use ember_image::FieldType;

use crate::RuntimeError;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;

const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_FLOAT: u8 = 4;
const CONSTANT_LONG: u8 = 5;
const CONSTANT_DOUBLE: u8 = 6;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_STRING: u8 = 8;
const CONSTANT_FIELDREF: u8 = 9;
const CONSTANT_METHODREF: u8 = 10;
const CONSTANT_INTERFACE_METHODREF: u8 = 11;
const CONSTANT_NAME_AND_TYPE: u8 = 12;

/// One constant-pool entry. `Wide` is the phantom slot after a long or
/// double; it owns no data but keeps indices aligned.
#[derive(Clone, Debug, PartialEq)]
pub enum PoolEntry {
    Utf8(Vec<u8>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name: u16 },
    Str { utf8: u16 },
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    Wide,
}

/// Field or method entry: flags plus pool indices of name and descriptor.
#[derive(Clone, Copy, Debug)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name: u16,
    pub descriptor: u16,
}

/// Parsed structural skeleton of one class file.
#[derive(Debug)]
pub struct ClassFile {
    pub pool: Vec<PoolEntry>,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
}

impl ClassFile {
    /// Resolve a pool index to utf8 bytes.
    pub fn utf8(&self, name: &str, index: u16) -> Result<&[u8], RuntimeError> {
        match self.entry(name, index)? {
            PoolEntry::Utf8(bytes) => Ok(bytes),
            other => Err(malformed(
                name,
                format!("pool index {index} is not utf8: {other:?}"),
            )),
        }
    }

    /// Resolve a Class pool index to the named class's utf8 name.
    pub fn class_name(&self, name: &str, index: u16) -> Result<&[u8], RuntimeError> {
        match self.entry(name, index)? {
            PoolEntry::Class { name: n } => self.utf8(name, *n),
            other => Err(malformed(
                name,
                format!("pool index {index} is not a class: {other:?}"),
            )),
        }
    }

    pub fn super_class_name(&self, name: &str) -> Result<Option<&[u8]>, RuntimeError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.class_name(name, self.super_class).map(Some)
    }

    fn entry(&self, name: &str, index: u16) -> Result<&PoolEntry, RuntimeError> {
        if index == 0 {
            return Err(malformed(name, "pool index 0".to_string()));
        }
        self.pool
            .get(index as usize - 1)
            .ok_or_else(|| malformed(name, format!("pool index {index} out of range")))
    }
}

fn malformed(name: &str, reason: String) -> RuntimeError {
    RuntimeError::MalformedClass {
        name: name.to_string(),
        reason,
    }
}

struct Reader<'a> {
    name: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(name: &'a str, bytes: &'a [u8]) -> Self {
        Self {
            name,
            bytes,
            pos: 0,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RuntimeError> {
        if self.pos + n > self.bytes.len() {
            return Err(malformed(self.name, "truncated class file".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), RuntimeError> {
        self.take(n).map(|_| ())
    }

    fn read1(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn read2(&mut self) -> Result<u16, RuntimeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read4(&mut self) -> Result<u32, RuntimeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn check_magic(r: &mut Reader<'_>) -> Result<(), RuntimeError> {
    let magic = r.read4()?;
    if magic != CLASS_MAGIC {
        return Err(malformed(r.name, format!("bad magic {magic:#010x}")));
    }
    r.read2()?; // minor version
    r.read2()?; // major version
    Ok(())
}

/// Tag every constant-pool slot with its semantic type and stop. Long and
/// double entries contribute a value slot plus a pad slot.
pub fn scan_constant_pool(name: &str, bytes: &[u8]) -> Result<Vec<FieldType>, RuntimeError> {
    let mut r = Reader::new(name, bytes);
    check_magic(&mut r)?;

    let count = r.read2()?.saturating_sub(1) as usize;
    let mut types = Vec::with_capacity(count);
    while types.len() < count {
        match r.read1()? {
            CONSTANT_CLASS | CONSTANT_STRING => {
                types.push(FieldType::Object);
                r.skip(2)?;
            }
            CONSTANT_INTEGER | CONSTANT_FLOAT => {
                types.push(FieldType::I32);
                r.skip(4)?;
            }
            CONSTANT_NAME_AND_TYPE
            | CONSTANT_FIELDREF
            | CONSTANT_METHODREF
            | CONSTANT_INTERFACE_METHODREF => {
                types.push(FieldType::Object);
                r.skip(4)?;
            }
            CONSTANT_LONG => {
                types.push(FieldType::I64);
                types.push(FieldType::I64Pad);
                r.skip(8)?;
            }
            CONSTANT_DOUBLE => {
                types.push(FieldType::F64);
                types.push(FieldType::F64Pad);
                r.skip(8)?;
            }
            CONSTANT_UTF8 => {
                types.push(FieldType::Object);
                let len = r.read2()? as usize;
                r.skip(len)?;
            }
            tag => {
                return Err(RuntimeError::UnknownPoolTag {
                    name: name.to_string(),
                    tag,
                })
            }
        }
    }
    Ok(types)
}

/// Parse the full structural skeleton.
pub fn parse(name: &str, bytes: &[u8]) -> Result<ClassFile, RuntimeError> {
    let mut r = Reader::new(name, bytes);
    check_magic(&mut r)?;

    let count = r.read2()?.saturating_sub(1) as usize;
    let mut pool = Vec::with_capacity(count);
    while pool.len() < count {
        match r.read1()? {
            CONSTANT_UTF8 => {
                let len = r.read2()? as usize;
                pool.push(PoolEntry::Utf8(r.take(len)?.to_vec()));
            }
            CONSTANT_INTEGER => pool.push(PoolEntry::Integer(r.read4()? as i32)),
            CONSTANT_FLOAT => pool.push(PoolEntry::Float(f32::from_bits(r.read4()?))),
            CONSTANT_LONG => {
                let hi = r.read4()? as u64;
                let lo = r.read4()? as u64;
                pool.push(PoolEntry::Long((hi << 32 | lo) as i64));
                pool.push(PoolEntry::Wide);
            }
            CONSTANT_DOUBLE => {
                let hi = r.read4()? as u64;
                let lo = r.read4()? as u64;
                pool.push(PoolEntry::Double(f64::from_bits(hi << 32 | lo)));
                pool.push(PoolEntry::Wide);
            }
            CONSTANT_CLASS => pool.push(PoolEntry::Class { name: r.read2()? }),
            CONSTANT_STRING => pool.push(PoolEntry::Str { utf8: r.read2()? }),
            CONSTANT_FIELDREF => pool.push(PoolEntry::Fieldref {
                class: r.read2()?,
                name_and_type: r.read2()?,
            }),
            CONSTANT_METHODREF => pool.push(PoolEntry::Methodref {
                class: r.read2()?,
                name_and_type: r.read2()?,
            }),
            CONSTANT_INTERFACE_METHODREF => pool.push(PoolEntry::InterfaceMethodref {
                class: r.read2()?,
                name_and_type: r.read2()?,
            }),
            CONSTANT_NAME_AND_TYPE => pool.push(PoolEntry::NameAndType {
                name: r.read2()?,
                descriptor: r.read2()?,
            }),
            tag => {
                return Err(RuntimeError::UnknownPoolTag {
                    name: name.to_string(),
                    tag,
                })
            }
        }
    }

    let access_flags = r.read2()?;
    let this_class = r.read2()?;
    let super_class = r.read2()?;

    let interface_count = r.read2()? as usize;
    r.skip(interface_count * 2)?;

    let fields = read_members(&mut r)?;
    let methods = read_members(&mut r)?;

    Ok(ClassFile {
        pool,
        access_flags,
        this_class,
        super_class,
        fields,
        methods,
    })
}

fn read_members(r: &mut Reader<'_>) -> Result<Vec<MemberInfo>, RuntimeError> {
    let count = r.read2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = r.read2()?;
        let name = r.read2()?;
        let descriptor = r.read2()?;
        let attribute_count = r.read2()? as usize;
        for _ in 0..attribute_count {
            r.skip(2)?;
            let len = r.read4()? as usize;
            r.skip(len)?;
        }
        members.push(MemberInfo {
            access_flags,
            name,
            descriptor,
        });
    }
    Ok(members)
}

/// Semantic slot type for a field descriptor.
pub fn descriptor_field_type(descriptor: &[u8]) -> Option<FieldType> {
    match descriptor.first()? {
        b'B' | b'Z' => Some(FieldType::I8),
        b'C' => Some(FieldType::U16),
        b'S' => Some(FieldType::I16),
        b'I' => Some(FieldType::I32),
        b'F' => Some(FieldType::F32),
        b'J' => Some(FieldType::I64),
        b'D' => Some(FieldType::F64),
        b'L' | b'[' => Some(FieldType::Object),
        _ => None,
    }
}
