// Claw is a zero-marshal wire format: a struct's byte buffer _is_ its
// serialized form. Setters encode fields directly into a contiguous
// segment in sorted field-number order, so marshal is a memcpy and
// unmarshal adopts the input bytes and parses a field index lazily.
//
// The runtime splits into three layers:
//
//  - claw-base: errors and the presence bitfield.
//  - claw-seg:  the segment itself: header codec, splicing buffer, schema
//               mappings, the struct runtime, and the typed list, map and
//               any views.
//  - claw-patch: schema-driven structural diff, the patch wire form, the
//               applier, and the recording-based patch producer.
//
// Generated bindings sit on top of this crate, which re-exports the whole
// public surface.

pub use claw_base::{err, kerr, Error, ErrorKind, PresenceBits, Result};
pub use claw_patch::{
    apply, apply_bytes, diff, patch_from_recording, Op, Patch, MAX_PATCH_NESTING_DEPTH,
    MAX_PATCH_OPS, PATCH_VERSION,
};
pub use claw_seg::{
    decode_header, encode_header, lookup_mapping, register_mapping, set_field_num, set_final40,
    AnyList, AnyValue, BlobList, BoolList, ClawStruct, FieldDescriptor, FieldType, MapKey, MapVal,
    MapView, Mapping, NumList, OpType, Prim, RecordedOp, SchemaField, SchemaFile, SchemaStruct,
    Segment, Struct, StructGetter, StructList, TypeHasher, HEADER_LEN, MAX_FINAL40, MAX_MAP_SIZE,
    NO_LIST_INDEX, TYPE_HASH_LEN,
};
