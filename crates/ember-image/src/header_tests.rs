use crate::{Endian, Header, TargetSpec, ThunkRange, Thunks, WordWidth, HEADER_SIZE, MAGIC};

#[test]
fn header_default_is_valid() {
    let spec = TargetSpec::default();
    let h = Header::new(&spec);
    assert!(h.validate_magic());
    assert_eq!(h.word_bytes, 8);
    assert_eq!(h.big_endian, 0);
    assert_eq!(h.target_spec(), spec);
}

#[test]
fn header_roundtrip_little_64() {
    let spec = TargetSpec::new(WordWidth::W64, Endian::Little);
    let mut h = Header::new(&spec);
    h.boot_class_count = 17;
    h.app_class_count = 2;
    h.string_count = 9;
    h.call_count = 4;
    h.heap_size = 4096;
    h.code_size = 128;
    h.boot_loader = 33;
    h.app_loader = 41;
    h.types = 1;
    h.thunks = Thunks {
        interpret: ThunkRange { start: 0, size: 32 },
        native: ThunkRange { start: 32, size: 32 },
    };

    let bytes = h.to_bytes(&spec);
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[0..4], &MAGIC);

    let decoded = Header::from_bytes(&bytes);
    assert_eq!(decoded, h);
}

#[test]
fn header_roundtrip_big_32() {
    let spec = TargetSpec::new(WordWidth::W32, Endian::Big);
    let mut h = Header::new(&spec);
    h.boot_class_count = 300;
    h.heap_size = 0xABCD;

    let bytes = h.to_bytes(&spec);
    // Counts are big-endian on a big-endian target.
    assert_eq!(bytes[12..16], [0, 0, 1, 44]);

    let decoded = Header::from_bytes(&bytes);
    assert_eq!(decoded, h);
    assert_eq!(decoded.target_spec(), spec);
}
