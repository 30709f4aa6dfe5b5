use crate::header::{
    decode_header, encode_header, pack_any_final40, pack_map_final40, set_field_num, set_final40,
    unpack_any_final40, unpack_map_final40, FieldType, MAX_FINAL40,
};
use claw_base::ErrorKind;
use test_log::test;

#[test]
fn test_roundtrip() {
    let mut buf = [0u8; 8];
    encode_header(&mut buf, 513, FieldType::String, 0x12_3456_789a).unwrap();
    let (num, ty, final40) = decode_header(&buf).unwrap();
    assert_eq!(num, 513);
    assert_eq!(ty, FieldType::String);
    assert_eq!(final40, 0x12_3456_789a);
}

#[test]
fn test_little_endian_layout() {
    let mut buf = [0u8; 8];
    encode_header(&mut buf, 0x0201, FieldType::Bool, 0x05_0403_0201).unwrap();
    assert_eq!(buf, [0x01, 0x02, 1, 0x01, 0x02, 0x03, 0x04, 0x05]);
}

#[test]
fn test_rejects_short_buffer() {
    let mut buf = [0u8; 7];
    let e = encode_header(&mut buf, 0, FieldType::Bool, 0).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MalformedHeader);
    assert_eq!(decode_header(&buf).unwrap_err().kind(), ErrorKind::MalformedHeader);
}

#[test]
fn test_rejects_final40_overflow() {
    let mut buf = [0u8; 8];
    let e = encode_header(&mut buf, 0, FieldType::Bytes, MAX_FINAL40 + 1).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidEncoding);
    encode_header(&mut buf, 0, FieldType::Bytes, MAX_FINAL40).unwrap();
}

#[test]
fn test_repeated_updates_are_idempotent() {
    let mut buf = [0u8; 8];
    encode_header(&mut buf, 7, FieldType::Struct, MAX_FINAL40).unwrap();
    encode_header(&mut buf, 7, FieldType::Struct, 8).unwrap();
    let (_, _, final40) = decode_header(&buf).unwrap();
    assert_eq!(final40, 8);
    set_final40(&mut buf, 24).unwrap();
    set_field_num(&mut buf, 9).unwrap();
    assert_eq!(decode_header(&buf).unwrap(), (9, FieldType::Struct, 24));
}

#[test]
fn test_unknown_tag_decodes_as_unknown() {
    let mut buf = [0u8; 8];
    buf[2] = 39;
    let (_, ty, _) = decode_header(&buf).unwrap();
    assert_eq!(ty, FieldType::Unknown);
}

#[test]
fn test_map_payload_packing() {
    let f = pack_map_final40(FieldType::String, FieldType::Int64, 4096).unwrap();
    let (k, v, size) = unpack_map_final40(f);
    assert_eq!(k, FieldType::String);
    assert_eq!(v, FieldType::Int64);
    assert_eq!(size, 4096);
    let e = pack_map_final40(FieldType::Bool, FieldType::Bool, 1 << 24).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidEncoding);
}

#[test]
fn test_any_payload_packing() {
    let f = pack_any_final40(FieldType::Struct, 1 << 20).unwrap();
    let (ty, size) = unpack_any_final40(f);
    assert_eq!(ty, FieldType::Struct);
    assert_eq!(size, 1 << 20);
    assert!(pack_any_final40(FieldType::Struct, 1 << 32).is_err());
}
