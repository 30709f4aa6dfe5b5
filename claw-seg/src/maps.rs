use crate::header::{
    decode_header, encode_header, pack_map_final40, unpack_map_final40, FieldType, HEADER_LEN,
};
use crate::mapping::{FieldDescriptor, Mapping};
use crate::record::{OpType, RecordedOp, NO_LIST_INDEX};
use crate::segment::pad8;
use crate::structs::Struct;
use claw_base::{kerr, ErrorKind, Result};
use ordered_float::OrderedFloat;
use std::sync::Arc;

/// A map key. Keys sort under the key type's natural order: false before
/// true, numeric order for integers, the IEEE-754 total order for floats
/// (hence `OrderedFloat`), lexicographic for strings and byte strings. A
/// map never mixes key variants; the view checks every key against the
/// schema's key type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
    Str(String),
    Bytes(Vec<u8>),
}

impl MapKey {
    pub fn ty(&self) -> FieldType {
        match self {
            MapKey::Bool(_) => FieldType::Bool,
            MapKey::I8(_) => FieldType::Int8,
            MapKey::I16(_) => FieldType::Int16,
            MapKey::I32(_) => FieldType::Int32,
            MapKey::I64(_) => FieldType::Int64,
            MapKey::U8(_) => FieldType::Uint8,
            MapKey::U16(_) => FieldType::Uint16,
            MapKey::U32(_) => FieldType::Uint32,
            MapKey::U64(_) => FieldType::Uint64,
            MapKey::F32(_) => FieldType::Float32,
            MapKey::F64(_) => FieldType::Float64,
            MapKey::Str(_) => FieldType::String,
            MapKey::Bytes(_) => FieldType::Bytes,
        }
    }

    /// The key's bare value bytes, with no length prefix.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            MapKey::Bool(v) => vec![*v as u8],
            MapKey::I8(v) => v.to_le_bytes().to_vec(),
            MapKey::I16(v) => v.to_le_bytes().to_vec(),
            MapKey::I32(v) => v.to_le_bytes().to_vec(),
            MapKey::I64(v) => v.to_le_bytes().to_vec(),
            MapKey::U8(v) => v.to_le_bytes().to_vec(),
            MapKey::U16(v) => v.to_le_bytes().to_vec(),
            MapKey::U32(v) => v.to_le_bytes().to_vec(),
            MapKey::U64(v) => v.to_le_bytes().to_vec(),
            MapKey::F32(v) => v.0.to_le_bytes().to_vec(),
            MapKey::F64(v) => v.0.to_le_bytes().to_vec(),
            MapKey::Str(v) => v.as_bytes().to_vec(),
            MapKey::Bytes(v) => v.clone(),
        }
    }

    /// Reassemble a key of type `ty` from its bare value bytes.
    pub fn from_raw(ty: FieldType, bytes: &[u8]) -> Result<MapKey> {
        fn arr<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
            if bytes.len() != N {
                return Err(kerr(ErrorKind::InvalidEncoding, "bad map key width"));
            }
            let mut a = [0u8; N];
            a.copy_from_slice(bytes);
            Ok(a)
        }
        Ok(match ty {
            FieldType::Bool => MapKey::Bool(*bytes.first().ok_or_else(|| {
                kerr(ErrorKind::InvalidEncoding, "bad map key width")
            })? != 0),
            FieldType::Int8 => MapKey::I8(i8::from_le_bytes(arr(bytes)?)),
            FieldType::Int16 => MapKey::I16(i16::from_le_bytes(arr(bytes)?)),
            FieldType::Int32 => MapKey::I32(i32::from_le_bytes(arr(bytes)?)),
            FieldType::Int64 => MapKey::I64(i64::from_le_bytes(arr(bytes)?)),
            FieldType::Uint8 => MapKey::U8(u8::from_le_bytes(arr(bytes)?)),
            FieldType::Uint16 => MapKey::U16(u16::from_le_bytes(arr(bytes)?)),
            FieldType::Uint32 => MapKey::U32(u32::from_le_bytes(arr(bytes)?)),
            FieldType::Uint64 => MapKey::U64(u64::from_le_bytes(arr(bytes)?)),
            FieldType::Float32 => MapKey::F32(OrderedFloat(f32::from_le_bytes(arr(bytes)?))),
            FieldType::Float64 => MapKey::F64(OrderedFloat(f64::from_le_bytes(arr(bytes)?))),
            FieldType::String => MapKey::Str(
                std::str::from_utf8(bytes)
                    .map_err(|_| kerr(ErrorKind::InvalidEncoding, "map key is not valid utf-8"))?
                    .to_owned(),
            ),
            FieldType::Bytes => MapKey::Bytes(bytes.to_vec()),
            _ => {
                return Err(kerr(ErrorKind::SchemaInvalid, "invalid map key type"));
            }
        })
    }

    /// Entry encoding inside a map body: bare bytes for fixed-width keys,
    /// `(u32 length, bytes)` for strings and byte strings.
    fn encode_entry(&self, out: &mut Vec<u8>) {
        match self {
            MapKey::Str(_) | MapKey::Bytes(_) => {
                let raw = self.raw_bytes();
                out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
                out.extend_from_slice(&raw);
            }
            _ => out.extend_from_slice(&self.raw_bytes()),
        }
    }

    fn decode_entry(ty: FieldType, bytes: &[u8], off: usize) -> Result<(MapKey, usize)> {
        match ty {
            FieldType::String | FieldType::Bytes => {
                if off + 4 > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map entry ends mid-key"));
                }
                let len = u32::from_le_bytes([
                    bytes[off],
                    bytes[off + 1],
                    bytes[off + 2],
                    bytes[off + 3],
                ]) as usize;
                if off + 4 + len > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map key overruns body"));
                }
                Ok((
                    MapKey::from_raw(ty, &bytes[off + 4..off + 4 + len])?,
                    off + 4 + len,
                ))
            }
            _ => {
                let w = fixed_width(ty)?;
                if off + w > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map entry ends mid-key"));
                }
                Ok((MapKey::from_raw(ty, &bytes[off..off + w])?, off + w))
            }
        }
    }
}

fn fixed_width(ty: FieldType) -> Result<usize> {
    Ok(match ty {
        FieldType::Bool | FieldType::Int8 | FieldType::Uint8 => 1,
        FieldType::Int16 | FieldType::Uint16 => 2,
        FieldType::Int32 | FieldType::Uint32 | FieldType::Float32 => 4,
        FieldType::Int64 | FieldType::Uint64 | FieldType::Float64 => 8,
        _ => {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "type has no fixed entry width",
            ))
        }
    })
}

/// A map value: any scalar, a string or byte string, or a nested struct.
#[derive(Clone, Debug)]
pub enum MapVal {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Struct(Struct),
}

impl MapVal {
    pub fn ty(&self) -> FieldType {
        match self {
            MapVal::Bool(_) => FieldType::Bool,
            MapVal::I8(_) => FieldType::Int8,
            MapVal::I16(_) => FieldType::Int16,
            MapVal::I32(_) => FieldType::Int32,
            MapVal::I64(_) => FieldType::Int64,
            MapVal::U8(_) => FieldType::Uint8,
            MapVal::U16(_) => FieldType::Uint16,
            MapVal::U32(_) => FieldType::Uint32,
            MapVal::U64(_) => FieldType::Uint64,
            MapVal::F32(_) => FieldType::Float32,
            MapVal::F64(_) => FieldType::Float64,
            MapVal::Str(_) => FieldType::String,
            MapVal::Bytes(_) => FieldType::Bytes,
            MapVal::Struct(_) => FieldType::Struct,
        }
    }

    /// The value's bare bytes: little-endian for fixed-width scalars, raw
    /// contents for strings and byte strings, canonical wire bytes for
    /// struct values.
    pub fn raw_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(match self {
            MapVal::Bool(v) => vec![*v as u8],
            MapVal::I8(v) => v.to_le_bytes().to_vec(),
            MapVal::I16(v) => v.to_le_bytes().to_vec(),
            MapVal::I32(v) => v.to_le_bytes().to_vec(),
            MapVal::I64(v) => v.to_le_bytes().to_vec(),
            MapVal::U8(v) => v.to_le_bytes().to_vec(),
            MapVal::U16(v) => v.to_le_bytes().to_vec(),
            MapVal::U32(v) => v.to_le_bytes().to_vec(),
            MapVal::U64(v) => v.to_le_bytes().to_vec(),
            MapVal::F32(v) => v.to_le_bytes().to_vec(),
            MapVal::F64(v) => v.to_le_bytes().to_vec(),
            MapVal::Str(v) => v.as_bytes().to_vec(),
            MapVal::Bytes(v) => v.clone(),
            MapVal::Struct(s) => {
                s.prepare_embed()?;
                let mut b = s.segment_bytes().to_vec();
                crate::header::set_field_num(&mut b, 0)?;
                b
            }
        })
    }

    pub fn from_raw(
        ty: FieldType,
        mapping: Option<&Arc<Mapping>>,
        bytes: &[u8],
    ) -> Result<MapVal> {
        if ty == FieldType::Struct {
            let mapping = mapping.ok_or_else(|| {
                kerr(ErrorKind::SchemaInvalid, "map value mapping is missing")
            })?;
            let mut s = Struct::new(mapping)?;
            s.unmarshal(bytes.to_vec())?;
            return Ok(MapVal::Struct(s));
        }
        if ty == FieldType::Bool {
            let b = bytes
                .first()
                .ok_or_else(|| kerr(ErrorKind::InvalidEncoding, "bad map value width"))?;
            return Ok(MapVal::Bool(*b != 0));
        }
        let key_form = MapKey::from_raw(ty, bytes)?;
        Ok(match key_form {
            MapKey::I8(v) => MapVal::I8(v),
            MapKey::I16(v) => MapVal::I16(v),
            MapKey::I32(v) => MapVal::I32(v),
            MapKey::I64(v) => MapVal::I64(v),
            MapKey::U8(v) => MapVal::U8(v),
            MapKey::U16(v) => MapVal::U16(v),
            MapKey::U32(v) => MapVal::U32(v),
            MapKey::U64(v) => MapVal::U64(v),
            MapKey::F32(v) => MapVal::F32(v.0),
            MapKey::F64(v) => MapVal::F64(v.0),
            MapKey::Str(v) => MapVal::Str(v),
            MapKey::Bytes(v) => MapVal::Bytes(v),
            MapKey::Bool(v) => MapVal::Bool(v),
        })
    }

    fn encode_entry(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            MapVal::Str(_) | MapVal::Bytes(_) => {
                let raw = self.raw_bytes()?;
                out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
                out.extend_from_slice(&raw);
            }
            _ => out.extend_from_slice(&self.raw_bytes()?),
        }
        Ok(())
    }

    fn decode_entry(
        ty: FieldType,
        mapping: Option<&Arc<Mapping>>,
        bytes: &[u8],
        off: usize,
    ) -> Result<(MapVal, usize)> {
        match ty {
            FieldType::String | FieldType::Bytes => {
                if off + 4 > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map entry ends mid-value"));
                }
                let len = u32::from_le_bytes([
                    bytes[off],
                    bytes[off + 1],
                    bytes[off + 2],
                    bytes[off + 3],
                ]) as usize;
                if off + 4 + len > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map value overruns body"));
                }
                Ok((
                    MapVal::from_raw(ty, mapping, &bytes[off + 4..off + 4 + len])?,
                    off + 4 + len,
                ))
            }
            FieldType::Struct => {
                if off + HEADER_LEN > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map entry ends mid-value"));
                }
                let (_, sty, total) = decode_header(&bytes[off..])?;
                let total = total as usize;
                if sty != FieldType::Struct
                    || total < HEADER_LEN
                    || total % 8 != 0
                    || off + total > bytes.len()
                {
                    return Err(kerr(
                        ErrorKind::InvalidEncoding,
                        "map struct value overruns body",
                    ));
                }
                Ok((
                    MapVal::from_raw(ty, mapping, &bytes[off..off + total])?,
                    off + total,
                ))
            }
            _ => {
                let w = fixed_width(ty)?;
                if off + w > bytes.len() {
                    return Err(kerr(ErrorKind::InvalidEncoding, "map entry ends mid-value"));
                }
                Ok((MapVal::from_raw(ty, mapping, &bytes[off..off + w])?, off + w))
            }
        }
    }
}

/// Encode the payload of a map mutation op: `(u32 key length, key bytes,
/// value bytes)`, with the value absent for deletes.
pub fn encode_map_op_data(key: &MapKey, val: Option<&mut MapVal>) -> Result<Vec<u8>> {
    let kraw = key.raw_bytes();
    let mut out = Vec::with_capacity(4 + kraw.len());
    out.extend_from_slice(&(kraw.len() as u32).to_le_bytes());
    out.extend_from_slice(&kraw);
    if let Some(val) = val {
        out.extend_from_slice(&val.raw_bytes()?);
    }
    Ok(out)
}

/// Inverse of `encode_map_op_data`.
pub fn decode_map_op_data(
    key_ty: FieldType,
    val_ty: FieldType,
    val_mapping: Option<&Arc<Mapping>>,
    data: &[u8],
    want_val: bool,
) -> Result<(MapKey, Option<MapVal>)> {
    if data.len() < 4 {
        return Err(kerr(ErrorKind::InvalidEncoding, "map op data too short"));
    }
    let klen = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if 4 + klen > data.len() {
        return Err(kerr(ErrorKind::InvalidEncoding, "map op key overruns data"));
    }
    let key = MapKey::from_raw(key_ty, &data[4..4 + klen])?;
    if !want_val {
        return Ok((key, None));
    }
    let val = MapVal::from_raw(val_ty, val_mapping, &data[4 + klen..])?;
    Ok((key, Some(val)))
}

/// Sorted map view: parallel key/value vectors in ascending key order,
/// looked up by binary search. The wire form writes entries in key order,
/// making the encoding deterministic.
#[derive(Clone, Debug)]
pub struct MapView {
    field_num: u16,
    key_ty: FieldType,
    val_ty: FieldType,
    val_mapping: Option<Arc<Mapping>>,
    keys: Vec<MapKey>,
    vals: Vec<MapVal>,
    dirty: bool,
    rec: bool,
    ops: Vec<RecordedOp>,
}

impl MapView {
    pub(crate) fn new(
        field_num: u16,
        fd: &FieldDescriptor,
        val_mapping: Option<Arc<Mapping>>,
    ) -> Result<MapView> {
        Ok(MapView {
            field_num,
            key_ty: fd.key_type,
            val_ty: fd.value_type,
            val_mapping,
            keys: Vec::new(),
            vals: Vec::new(),
            dirty: false,
            rec: false,
            ops: Vec::new(),
        })
    }

    pub(crate) fn parse(
        field_num: u16,
        fd: &FieldDescriptor,
        val_mapping: Option<Arc<Mapping>>,
        bytes: &[u8],
    ) -> Result<MapView> {
        let (_, _, final40) = decode_header(bytes)?;
        let (key_ty, val_ty, total) = unpack_map_final40(final40);
        if key_ty != fd.key_type || val_ty != fd.value_type {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                "map header types disagree with schema",
            ));
        }
        let total = total as usize;
        if total < HEADER_LEN || HEADER_LEN + pad8(total - HEADER_LEN) > bytes.len() {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated map body"));
        }
        let mut view = MapView::new(field_num, fd, val_mapping)?;
        let body = &bytes[..total];
        let mut off = HEADER_LEN;
        while off < total {
            let (key, next) = MapKey::decode_entry(key_ty, body, off)?;
            let (val, next) =
                MapVal::decode_entry(val_ty, view.val_mapping.as_ref(), body, next)?;
            if let Some(last) = view.keys.last() {
                if *last >= key {
                    return Err(kerr(
                        ErrorKind::InvalidEncoding,
                        "map keys out of order or duplicated",
                    ));
                }
            }
            view.keys.push(key);
            view.vals.push(val);
            off = next;
        }
        Ok(view)
    }

    pub fn encode_field(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for (key, val) in self.keys.iter().zip(self.vals.iter_mut()) {
            key.encode_entry(&mut body);
            val.encode_entry(&mut body)?;
        }
        let total = HEADER_LEN + body.len();
        let mut buf = vec![0u8; HEADER_LEN];
        let final40 = pack_map_final40(self.key_ty, self.val_ty, total as u64)?;
        encode_header(&mut buf, self.field_num, FieldType::Map, final40)?;
        buf.extend_from_slice(&body);
        buf.resize(HEADER_LEN + pad8(body.len()), 0);
        Ok(buf)
    }

    pub(crate) fn dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn set_recording(&mut self, on: bool) {
        self.rec = on;
    }

    pub(crate) fn take_ops(&mut self) -> Vec<RecordedOp> {
        std::mem::take(&mut self.ops)
    }

    fn record(&mut self, op: OpType, data: Vec<u8>) {
        if self.rec {
            self.ops
                .push(RecordedOp::new(self.field_num, op, NO_LIST_INDEX, data));
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All keys, in ascending order.
    pub fn keys(&self) -> &[MapKey] {
        &self.keys
    }

    pub fn key_type(&self) -> FieldType {
        self.key_ty
    }

    pub fn value_type(&self) -> FieldType {
        self.val_ty
    }

    pub fn value_mapping(&self) -> Option<&Arc<Mapping>> {
        self.val_mapping.as_ref()
    }

    fn check_key(&self, key: &MapKey) -> Result<()> {
        if key.ty() != self.key_ty {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                format!("map keys are {:?}, not {:?}", self.key_ty, key.ty()),
            ));
        }
        Ok(())
    }

    fn check_val(&self, val: &MapVal) -> Result<()> {
        if val.ty() != self.val_ty {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                format!("map values are {:?}, not {:?}", self.val_ty, val.ty()),
            ));
        }
        if let (MapVal::Struct(s), Some(m)) = (val, self.val_mapping.as_ref()) {
            if s.mapping().path != m.path {
                return Err(kerr(
                    ErrorKind::TypeMismatch,
                    format!("map values embed {}, not {}", m.path, s.mapping().path),
                ));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &MapKey) -> Option<&MapVal> {
        let i = self.keys.binary_search(key).ok()?;
        Some(&self.vals[i])
    }

    /// Mutable access to a value. Marks the map dirty, since the value may
    /// be edited through the borrow.
    pub fn get_mut(&mut self, key: &MapKey) -> Option<&mut MapVal> {
        let i = self.keys.binary_search(key).ok()?;
        self.dirty = true;
        Some(&mut self.vals[i])
    }

    pub fn value_at(&self, i: usize) -> Option<&MapVal> {
        self.vals.get(i)
    }

    pub fn value_at_mut(&mut self, i: usize) -> Option<&mut MapVal> {
        self.dirty = true;
        self.vals.get_mut(i)
    }

    pub fn contains(&self, key: &MapKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Insert or update. Keys stay unique and sorted.
    pub fn set(&mut self, key: MapKey, mut val: MapVal) -> Result<()> {
        self.check_key(&key)?;
        self.check_val(&val)?;
        if let MapVal::Struct(s) = &mut val {
            s.prepare_embed()?;
        }
        let data = if self.rec {
            Some(encode_map_op_data(&key, Some(&mut val))?)
        } else {
            None
        };
        match self.keys.binary_search(&key) {
            Ok(i) => self.vals[i] = val,
            Err(i) => {
                self.keys.insert(i, key);
                self.vals.insert(i, val);
            }
        }
        self.dirty = true;
        if let Some(data) = data {
            self.record(OpType::MapSet, data);
        }
        Ok(())
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &MapKey) -> Result<bool> {
        self.check_key(key)?;
        match self.keys.binary_search(key) {
            Ok(i) => {
                self.keys.remove(i);
                self.vals.remove(i);
                self.dirty = true;
                let data = encode_map_op_data(key, None)?;
                self.record(OpType::MapDelete, data);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.vals.clear();
        self.dirty = true;
        self.record(OpType::Clear, Vec::new());
    }
}
