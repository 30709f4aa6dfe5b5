// The segment layer: a struct's wire representation is one contiguous
// byte buffer, and setters write directly into it.
//
// Every field starts with an 8-byte little-endian header:
//
//   bits 0..16   field number (u16)
//   bits 16..24  type tag (u8)
//   bits 24..64  "final40", a 40-bit payload holding the scalar value,
//                the byte length, or the total size, depending on type
//
// A struct body is a header (type Struct, final40 = total size including
// the header) followed by child fields in strictly ascending field-number
// order. Everything is 8-byte aligned: each field's total footprint and
// the buffer length are multiples of 8. Scalars at their zero value are
// omitted entirely; an optional trailing presence bitfield records
// "set to zero" when a schema needs the distinction.
//
// Mutation is a splice: growing or shrinking a field shifts everything
// after it and the parsed field index is patched with the delta. List,
// map and any views buffer their items outside the segment and encode
// the canonical wire form in a sync step before marshal.
//
// Layering inside this crate, leaves first: header (field-header codec),
// segment (splicing byte buffer), mapping (schema descriptors, dispatch
// tables, registry), then the struct runtime and its typed views, with
// pools, schema-descriptor loading and stream I/O around the edges.

mod any;
mod header;
mod ioutil;
mod lists;
mod mapping;
mod maps;
mod pool;
mod prim;
mod record;
mod schema;
mod segment;
mod structs;

#[cfg(test)]
mod test;

pub use any::{AnyList, AnyValue, ClawStruct, StructGetter, TypeHasher, TYPE_HASH_LEN};
pub use header::{
    decode_header, encode_header, set_field_num, set_final40, FieldType, HEADER_LEN, MAX_FINAL40,
    MAX_MAP_SIZE,
};
pub use lists::{BlobList, BoolList, NumList, StructList};
pub use mapping::{lookup_mapping, register_mapping, FieldDescriptor, Mapping};
pub use maps::{decode_map_op_data, encode_map_op_data, MapKey, MapVal, MapView};
pub use prim::Prim;
pub use record::{OpType, RecordedOp, NO_LIST_INDEX};
pub use schema::{SchemaField, SchemaFile, SchemaStruct};
pub use segment::{pad8, Segment};
pub use structs::Struct;
