use crate::header::{decode_header, FieldType, HEADER_LEN};
use crate::structs::Struct;
use crate::test::{car, car_mapping, garage_mapping, node_mapping, wide_mapping, HashedCar};
use claw_base::ErrorKind;
use std::io::Cursor;
use test_log::test;

/// Walk a marshaled struct body and return `(field_num, size)` pairs in
/// encounter order, checking the universal layout invariants as it goes.
fn walk_fields(bytes: &[u8]) -> Vec<(u16, usize)> {
    assert_eq!(bytes.len() % 8, 0, "segment length must be 8-byte aligned");
    let (_, ty, final40) = decode_header(bytes).unwrap();
    assert_eq!(ty, FieldType::Struct);
    assert_eq!(final40 as usize, bytes.len(), "root header must mirror total size");
    let mut out = Vec::new();
    let mut off = HEADER_LEN;
    while off < bytes.len() {
        let (num, ty, final40) = decode_header(&bytes[off..]).unwrap();
        let size = match ty {
            FieldType::Bool
            | FieldType::Int8
            | FieldType::Int16
            | FieldType::Int32
            | FieldType::Uint8
            | FieldType::Uint16
            | FieldType::Uint32
            | FieldType::Float32 => 8,
            FieldType::Int64 | FieldType::Uint64 | FieldType::Float64 => 16,
            FieldType::String | FieldType::Bytes => 8 + (final40 as usize).div_ceil(8) * 8,
            FieldType::Struct => final40 as usize,
            _ => panic!("walk_fields only handles scalar and struct fields"),
        };
        assert_eq!(size % 8, 0, "every field footprint must be 8-byte aligned");
        out.push((num, size));
        off += size;
    }
    assert_eq!(off, bytes.len());
    out
}

#[test]
fn test_zero_value_omission() {
    // Two int32 sets, one of them zero: only the nonzero one materialises.
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_i32(3, 42).unwrap();
    s.set_i16(2, 0).unwrap();
    let bytes = s.marshal().unwrap();
    assert_eq!(walk_fields(&bytes), vec![(3, 8)]);
    assert_eq!(s.get_i16(2).unwrap(), 0);
    assert!(!s.has_field(2).unwrap());
    assert!(s.has_field(3).unwrap());
}

#[test]
fn test_setting_zero_removes() {
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_i32(3, 42).unwrap();
    s.set_i32(3, 0).unwrap();
    assert_eq!(s.marshal().unwrap().len(), HEADER_LEN);
    assert!(!s.has_field(3).unwrap());
}

#[test]
fn test_sorted_insertion() {
    // Out-of-order sets land in ascending field-number order.
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_u8(5, 7).unwrap();
    s.set_i16(2, 3).unwrap();
    s.set_u64(8, 9).unwrap();
    let bytes = s.marshal().unwrap();
    let nums: Vec<u16> = walk_fields(&bytes).iter().map(|(n, _)| *n).collect();
    assert_eq!(nums, vec![2, 5, 8]);
    assert_eq!(s.get_i16(2).unwrap(), 3);
    assert_eq!(s.get_u8(5).unwrap(), 7);
    assert_eq!(s.get_u64(8).unwrap(), 9);
}

#[test]
fn test_shrinking_replacement_shifts_later_fields() {
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_str(11, "hello world").unwrap();
    s.set_bytes(12, b"xy").unwrap();
    let before = s.marshal().unwrap().len();
    s.set_str(11, "hi").unwrap();
    let after = s.marshal().unwrap().len();
    assert_eq!(before - after, 8);
    assert_eq!(s.get_str(11).unwrap(), "hi");
    assert_eq!(s.get_bytes(12).unwrap(), b"xy");
}

#[test]
fn test_growing_replacement() {
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_str(11, "hi").unwrap();
    s.set_bytes(12, b"xy").unwrap();
    s.set_str(11, "a considerably longer label").unwrap();
    assert_eq!(s.get_str(11).unwrap(), "a considerably longer label");
    assert_eq!(s.get_bytes(12).unwrap(), b"xy");
    walk_fields(&s.marshal().unwrap());
}

#[test]
fn test_scalar_roundtrip_through_wire() {
    let m = wide_mapping();
    let mut s = Struct::new(&m).unwrap();
    s.set_bool(0, true).unwrap();
    s.set_i8(1, -5).unwrap();
    s.set_i16(2, -300).unwrap();
    s.set_i32(3, 1 << 30).unwrap();
    s.set_i64(4, -(1 << 50)).unwrap();
    s.set_u8(5, 200).unwrap();
    s.set_u16(6, 60_000).unwrap();
    s.set_u32(7, 4_000_000_000).unwrap();
    s.set_u64(8, 1 << 60).unwrap();
    s.set_f32(9, 1.5).unwrap();
    s.set_f64(10, -2.25e300).unwrap();
    s.set_str(11, "gt").unwrap();
    s.set_bytes(12, &[0, 1, 2]).unwrap();
    let bytes = s.marshal().unwrap();

    let mut d = Struct::from_bytes(&m, bytes).unwrap();
    assert!(d.get_bool(0).unwrap());
    assert_eq!(d.get_i8(1).unwrap(), -5);
    assert_eq!(d.get_i16(2).unwrap(), -300);
    assert_eq!(d.get_i32(3).unwrap(), 1 << 30);
    assert_eq!(d.get_i64(4).unwrap(), -(1 << 50));
    assert_eq!(d.get_u8(5).unwrap(), 200);
    assert_eq!(d.get_u16(6).unwrap(), 60_000);
    assert_eq!(d.get_u32(7).unwrap(), 4_000_000_000);
    assert_eq!(d.get_u64(8).unwrap(), 1 << 60);
    assert_eq!(d.get_f32(9).unwrap(), 1.5);
    assert_eq!(d.get_f64(10).unwrap(), -2.25e300);
    assert_eq!(d.get_str(11).unwrap(), "gt");
    assert_eq!(d.get_bytes(12).unwrap(), &[0, 1, 2]);
    assert!(d.content_eq(&mut s).unwrap());
}

#[test]
fn test_wrong_typed_accessor() {
    let mut s = Struct::new(&wide_mapping()).unwrap();
    assert_eq!(s.get_i32(11).unwrap_err().kind(), ErrorKind::TypeMismatch);
    assert_eq!(s.set_str(3, "x").unwrap_err().kind(), ErrorKind::TypeMismatch);
    assert_eq!(s.get_i32(200).unwrap_err().kind(), ErrorKind::OutOfBounds);
}

#[test]
fn test_unmarshal_rejects_malformed_roots() {
    let m = wide_mapping();
    let mut s = Struct::new(&m).unwrap();
    assert_eq!(
        s.unmarshal(vec![0; 4]).unwrap_err().kind(),
        ErrorKind::MalformedHeader
    );

    // Declared size exceeding the buffer.
    let mut good = car(2023, "gt").marshal().unwrap();
    crate::header::set_final40(&mut good, 1 << 20).unwrap();
    let mut c = Struct::new(&car_mapping()).unwrap();
    assert_eq!(
        c.unmarshal(good).unwrap_err().kind(),
        ErrorKind::MalformedHeader
    );

    // Root that is not a struct.
    let mut bad = car(2023, "gt").marshal().unwrap();
    bad[2] = FieldType::Bytes as u8;
    assert_eq!(
        c.unmarshal(bad).unwrap_err().kind(),
        ErrorKind::MalformedHeader
    );
}

#[test]
fn test_unmarshal_truncates_to_declared_size() {
    let mut c = car(2023, "gt");
    let mut bytes = c.marshal().unwrap();
    let declared = bytes.len();
    bytes.extend_from_slice(&[0xaa; 16]);
    let mut d = Struct::from_bytes(&car_mapping(), bytes).unwrap();
    assert_eq!(d.marshal().unwrap().len(), declared);
    assert!(d.content_eq(&mut c).unwrap());
}

#[test]
fn test_nested_struct_embed_and_view() {
    let mut g = Struct::new(&garage_mapping()).unwrap();
    let mut c = car(2023, "gt");
    g.set_struct(0, &mut c).unwrap();

    let bytes = g.marshal().unwrap();
    let mut g2 = Struct::from_bytes(&garage_mapping(), bytes).unwrap();
    let mut view = g2.struct_view(0).unwrap();
    assert_eq!(view.get_i32(0).unwrap(), 2023);
    assert_eq!(view.get_str(1).unwrap(), "gt");

    // Mutating the view does not touch the parent until re-embedded.
    view.set_i32(0, 2024).unwrap();
    assert_eq!(g2.struct_view(0).unwrap().get_i32(0).unwrap(), 2023);
    g2.set_struct(0, &mut view).unwrap();
    assert_eq!(g2.struct_view(0).unwrap().get_i32(0).unwrap(), 2024);
}

#[test]
fn test_empty_nested_struct_clears_field() {
    let mut g = Struct::new(&garage_mapping()).unwrap();
    let mut c = car(2023, "gt");
    g.set_struct(0, &mut c).unwrap();
    let mut empty = Struct::new(&car_mapping()).unwrap();
    g.set_struct(0, &mut empty).unwrap();
    assert!(!g.has_field(0).unwrap());
    assert_eq!(g.marshal().unwrap().len(), HEADER_LEN);
}

#[test]
fn test_self_referential_chain() {
    let m = node_mapping();
    let mut tail = Struct::new(&m).unwrap();
    tail.set_i32(0, 3).unwrap();
    let mut mid = Struct::new(&m).unwrap();
    mid.set_i32(0, 2).unwrap();
    mid.set_struct(1, &mut tail).unwrap();
    let mut head = Struct::new(&m).unwrap();
    head.set_i32(0, 1).unwrap();
    head.set_struct(1, &mut mid).unwrap();

    let mut back = Struct::from_bytes(&m, head.marshal().unwrap()).unwrap();
    assert_eq!(back.get_i32(0).unwrap(), 1);
    let mut l1 = back.struct_view(1).unwrap();
    assert_eq!(l1.get_i32(0).unwrap(), 2);
    let mut l2 = l1.struct_view(1).unwrap();
    assert_eq!(l2.get_i32(0).unwrap(), 3);
    assert!(!l2.has_field(1).unwrap());
}

#[test]
fn test_presence_distinguishes_zero_from_unset() {
    let m = wide_mapping();
    let mut s = Struct::new(&m).unwrap();
    s.enable_presence().unwrap();
    s.set_i32(3, 0).unwrap();
    assert!(s.is_set(3).unwrap());
    assert!(!s.is_set(2).unwrap());

    let bytes = s.marshal().unwrap();
    assert_eq!(bytes.len() % 8, 0);
    let mut d = Struct::new(&m).unwrap();
    d.enable_presence().unwrap();
    d.unmarshal(bytes).unwrap();
    assert!(d.is_set(3).unwrap());
    assert!(!d.is_set(2).unwrap());
    assert_eq!(d.get_i32(3).unwrap(), 0);
}

#[test]
fn test_presence_tail_stripped_on_mutation() {
    let m = wide_mapping();
    let mut s = Struct::new(&m).unwrap();
    s.enable_presence().unwrap();
    s.set_i32(3, 7).unwrap();
    let first = s.marshal().unwrap();
    // Marshal twice without mutation: the tail is appended exactly once.
    assert_eq!(s.marshal().unwrap(), first);
    s.set_i32(3, 9).unwrap();
    let second = s.marshal().unwrap();
    assert_eq!(first.len(), second.len());
    let mut d = Struct::new(&m).unwrap();
    d.enable_presence().unwrap();
    d.unmarshal(second).unwrap();
    assert_eq!(d.get_i32(3).unwrap(), 9);
}

#[test]
fn test_reader_writer_roundtrip() {
    let mut s = car(2024, "venza");
    let mut buf = Vec::new();
    s.marshal_writer(&mut buf).unwrap();
    // Trailing garbage after the struct stays untouched by the reader.
    buf.extend_from_slice(b"trailer");
    let mut cur = Cursor::new(buf);
    let mut d = Struct::new(&car_mapping()).unwrap();
    d.unmarshal_reader(&mut cur).unwrap();
    assert!(d.content_eq(&mut s).unwrap());
    assert_eq!(cur.position() as usize, s.marshal().unwrap().len());
}

#[test]
fn test_reader_short_input() {
    let mut s = car(2024, "venza");
    let bytes = s.marshal().unwrap();
    let mut cur = Cursor::new(bytes[..bytes.len() - 4].to_vec());
    let mut d = Struct::new(&car_mapping()).unwrap();
    assert_eq!(
        d.unmarshal_reader(&mut cur).unwrap_err().kind(),
        ErrorKind::ReadShort
    );
}

#[test]
fn test_any_roundtrip_and_mismatch() {
    let h1 = [1u8; 16];
    let h2 = [2u8; 16];
    let mut g = Struct::new(&garage_mapping()).unwrap();
    let mut v = HashedCar::new(h1);
    v.s = car(1999, "mr2");
    g.set_any(7, &mut v).unwrap();

    let mut g2 = Struct::from_bytes(&garage_mapping(), g.marshal().unwrap()).unwrap();
    let mut out = HashedCar::new(h1);
    g2.get_any(7, &mut out).unwrap();
    assert_eq!(out.s.get_i32(0).unwrap(), 1999);
    assert_eq!(out.s.get_str(1).unwrap(), "mr2");

    let mut wrong = HashedCar::new(h2);
    assert_eq!(
        g2.get_any(7, &mut wrong).unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
}

#[test]
fn test_pooled_lifecycle() {
    let m = wide_mapping();
    let mut a = Struct::new_pooled(&m).unwrap();
    a.set_i32(3, 1).unwrap();
    let bytes = a.marshal().unwrap();
    a.release();
    let mut b = Struct::new_pooled(&m).unwrap();
    assert_eq!(b.marshal().unwrap().len(), HEADER_LEN);
    b.unmarshal(bytes).unwrap();
    assert_eq!(b.get_i32(3).unwrap(), 1);
    b.release();
}

#[test]
fn test_recording_tape() {
    use crate::record::{OpType, NO_LIST_INDEX};
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_recording(true);
    s.set_i32(3, 42).unwrap();
    s.set_str(11, "gt").unwrap();
    s.set_i32(3, 0).unwrap();
    let ops = s.drain_recorded_ops();
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0].op, OpType::Set);
    assert_eq!(ops[0].field_num, 3);
    assert_eq!(ops[0].index, NO_LIST_INDEX);
    assert_eq!(ops[0].data, 42i32.to_le_bytes().to_vec());
    assert_eq!(ops[1].op, OpType::Set);
    assert_eq!(ops[1].data, b"gt".to_vec());
    assert_eq!(ops[2].op, OpType::Clear);
    assert!(s.drain_recorded_ops().is_empty());
}

#[test]
fn test_set_field_wire() {
    let mut s = Struct::new(&wide_mapping()).unwrap();
    s.set_field_wire(3, &42i32.to_le_bytes()).unwrap();
    assert_eq!(s.get_i32(3).unwrap(), 42);
    s.set_field_wire(11, b"venza").unwrap();
    assert_eq!(s.get_str(11).unwrap(), "venza");
    assert_eq!(
        s.set_field_wire(4, &[1, 2]).unwrap_err().kind(),
        ErrorKind::InvalidEncoding
    );
}

#[test]
fn test_parse_rejects_unknown_field_and_disorder() {
    let mut s = car(2023, "gt");
    let bytes = s.marshal().unwrap();

    // Rewrite the first field's number to something the schema lacks.
    let mut unknown = bytes.clone();
    crate::header::set_field_num(&mut unknown[8..], 40).unwrap();
    let mut d = Struct::new(&car_mapping()).unwrap();
    d.unmarshal(unknown).unwrap();
    assert_eq!(d.parse_index().unwrap_err().kind(), ErrorKind::InvalidEncoding);

    // Swap the two fields to break sorted order. Both are 8-byte fields
    // only if the string is short, so rebuild a fixture where they are.
    let mut c = Struct::new(&car_mapping()).unwrap();
    c.set_i32(0, 5).unwrap();
    c.set_str(1, "venza..").unwrap();
    let bytes = c.marshal().unwrap();
    let (year_field, rest) = bytes[8..].split_at(8);
    let mut swapped = bytes[..8].to_vec();
    swapped.extend_from_slice(rest);
    swapped.extend_from_slice(year_field);
    let mut d = Struct::new(&car_mapping()).unwrap();
    d.unmarshal(swapped).unwrap();
    assert_eq!(d.parse_index().unwrap_err().kind(), ErrorKind::InvalidEncoding);
}
