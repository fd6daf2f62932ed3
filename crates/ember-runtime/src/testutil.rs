//! In-memory class-file writer for tests.
//!
//! Emits structurally valid class files with just enough surface for the
//! builder: constant pool, flags, fields, and methods, no attributes.

/// Builder for one synthetic class file.
pub struct ClassWriter {
    pool: Vec<Entry>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<(u16, u16, u16)>,
    methods: Vec<(u16, u16, u16)>,
}

enum Entry {
    Utf8(Vec<u8>),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    Str(u16),
    Wide,
}

impl ClassWriter {
    pub fn new(name: &str) -> Self {
        let mut w = Self {
            pool: Vec::new(),
            access_flags: 0x0021, // ACC_PUBLIC | ACC_SUPER
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
        };
        w.this_class = w.class_entry(name);
        w
    }

    fn push(&mut self, e: Entry) -> u16 {
        self.pool.push(e);
        self.pool.len() as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        for (i, e) in self.pool.iter().enumerate() {
            if let Entry::Utf8(b) = e {
                if b == s.as_bytes() {
                    return i as u16 + 1;
                }
            }
        }
        self.push(Entry::Utf8(s.as_bytes().to_vec()))
    }

    pub fn class_entry(&mut self, name: &str) -> u16 {
        let n = self.utf8(name);
        self.push(Entry::Class(n))
    }

    pub fn string_entry(&mut self, s: &str) -> u16 {
        let n = self.utf8(s);
        self.push(Entry::Str(n))
    }

    pub fn int_entry(&mut self, v: i32) -> u16 {
        self.push(Entry::Int(v))
    }

    pub fn float_entry(&mut self, v: f32) -> u16 {
        self.push(Entry::Float(v))
    }

    pub fn long_entry(&mut self, v: i64) -> u16 {
        let idx = self.push(Entry::Long(v));
        self.push(Entry::Wide);
        idx
    }

    pub fn double_entry(&mut self, v: f64) -> u16 {
        let idx = self.push(Entry::Double(v));
        self.push(Entry::Wide);
        idx
    }

    pub fn set_super(&mut self, name: &str) {
        self.super_class = self.class_entry(name);
    }

    pub fn field(&mut self, flags: u16, name: &str, descriptor: &str) {
        let n = self.utf8(name);
        let d = self.utf8(descriptor);
        self.fields.push((flags, n, d));
    }

    pub fn method(&mut self, flags: u16, name: &str, descriptor: &str) {
        let n = self.utf8(name);
        let d = self.utf8(descriptor);
        self.methods.push((flags, n, d));
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // minor
        out.extend_from_slice(&52u16.to_be_bytes()); // major
        out.extend_from_slice(&(self.pool.len() as u16 + 1).to_be_bytes());
        for e in &self.pool {
            match e {
                Entry::Utf8(b) => {
                    out.push(1);
                    out.extend_from_slice(&(b.len() as u16).to_be_bytes());
                    out.extend_from_slice(b);
                }
                Entry::Int(v) => {
                    out.push(3);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Entry::Float(v) => {
                    out.push(4);
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                Entry::Long(v) => {
                    out.push(5);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Entry::Double(v) => {
                    out.push(6);
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                Entry::Class(n) => {
                    out.push(7);
                    out.extend_from_slice(&n.to_be_bytes());
                }
                Entry::Str(n) => {
                    out.push(8);
                    out.extend_from_slice(&n.to_be_bytes());
                }
                Entry::Wide => {}
            }
        }
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // interfaces
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for &(flags, name, descriptor) in &self.fields {
            out.extend_from_slice(&flags.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes()); // attributes
        }
        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for &(flags, name, descriptor) in &self.methods {
            out.extend_from_slice(&flags.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes()); // attributes
        }
        out.extend_from_slice(&0u16.to_be_bytes()); // class attributes
        out
    }
}
