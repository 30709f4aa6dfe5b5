use crate::any::{AnyList, AnyValue, ClawStruct};
use crate::header::{
    decode_header, encode_header, pack_any_final40, set_field_num, set_final40,
    unpack_any_final40, FieldType, HEADER_LEN,
};
use crate::ioutil::{read_exact_short, write_all_short};
use crate::lists::{BlobList, BoolList, NumList, StructList};
use crate::mapping::{FieldDescriptor, Mapping};
use crate::maps::MapView;
use crate::pool;
use crate::prim::Prim;
use crate::record::{OpType, RecordedOp, NO_LIST_INDEX};
use crate::segment::{pad8, Segment};
use claw_base::{err, kerr, ErrorKind, PresenceBits, Result};
use std::io::{Read, Write};
use std::sync::Arc;

/// One parsed field-index entry: where the field currently sits in the
/// segment and how many bytes it occupies, header and padding included.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub(crate) struct FieldSlot {
    pub(crate) offset: u32,
    pub(crate) size: u32,
    pub(crate) set: bool,
}

/// Cached typed view over one list/map/any-list field. The view owns its
/// items outside the segment; `sync_dirty_views` writes the canonical wire
/// form back before marshal.
#[derive(Clone, Debug)]
pub(crate) enum ViewSlot {
    Bools(BoolList),
    I8(NumList<i8>),
    I16(NumList<i16>),
    I32(NumList<i32>),
    I64(NumList<i64>),
    U8(NumList<u8>),
    U16(NumList<u16>),
    U32(NumList<u32>),
    U64(NumList<u64>),
    F32(NumList<f32>),
    F64(NumList<f64>),
    Bytes(BlobList),
    Strings(BlobList),
    Structs(StructList),
    Map(MapView),
    Anys(AnyList),
}

macro_rules! each_view {
    ($slot:expr, $v:ident => $e:expr) => {
        match $slot {
            ViewSlot::Bools($v) => $e,
            ViewSlot::I8($v) => $e,
            ViewSlot::I16($v) => $e,
            ViewSlot::I32($v) => $e,
            ViewSlot::I64($v) => $e,
            ViewSlot::U8($v) => $e,
            ViewSlot::U16($v) => $e,
            ViewSlot::U32($v) => $e,
            ViewSlot::U64($v) => $e,
            ViewSlot::F32($v) => $e,
            ViewSlot::F64($v) => $e,
            ViewSlot::Bytes($v) => $e,
            ViewSlot::Strings($v) => $e,
            ViewSlot::Structs($v) => $e,
            ViewSlot::Map($v) => $e,
            ViewSlot::Anys($v) => $e,
        }
    };
}

impl ViewSlot {
    fn parse(
        fd: &FieldDescriptor,
        owner: &Arc<Mapping>,
        n: u16,
        bytes: &[u8],
    ) -> Result<ViewSlot> {
        Ok(match fd.field_type {
            FieldType::ListBools => ViewSlot::Bools(BoolList::parse(n, bytes)?),
            FieldType::ListInt8 => ViewSlot::I8(NumList::parse(n, bytes)?),
            FieldType::ListInt16 => ViewSlot::I16(NumList::parse(n, bytes)?),
            FieldType::ListInt32 => ViewSlot::I32(NumList::parse(n, bytes)?),
            FieldType::ListInt64 => ViewSlot::I64(NumList::parse(n, bytes)?),
            FieldType::ListUint8 => ViewSlot::U8(NumList::parse(n, bytes)?),
            FieldType::ListUint16 => ViewSlot::U16(NumList::parse(n, bytes)?),
            FieldType::ListUint32 => ViewSlot::U32(NumList::parse(n, bytes)?),
            FieldType::ListUint64 => ViewSlot::U64(NumList::parse(n, bytes)?),
            FieldType::ListFloat32 => ViewSlot::F32(NumList::parse(n, bytes)?),
            FieldType::ListFloat64 => ViewSlot::F64(NumList::parse(n, bytes)?),
            FieldType::ListBytes => {
                ViewSlot::Bytes(BlobList::parse(n, FieldType::ListBytes, bytes)?)
            }
            FieldType::ListStrings => {
                ViewSlot::Strings(BlobList::parse(n, FieldType::ListStrings, bytes)?)
            }
            FieldType::ListStructs => {
                let child = fd
                    .child(owner)
                    .ok_or_else(|| kerr(ErrorKind::SchemaInvalid, "struct list has no mapping"))?;
                ViewSlot::Structs(StructList::parse(n, child, bytes)?)
            }
            FieldType::Map => ViewSlot::Map(MapView::parse(n, fd, fd.child(owner), bytes)?),
            FieldType::ListAny => ViewSlot::Anys(AnyList::parse(n, bytes)?),
            _ => {
                return Err(kerr(
                    ErrorKind::TypeMismatch,
                    format!("field {} is not a list or map", fd.name),
                ))
            }
        })
    }

    fn new_empty(fd: &FieldDescriptor, owner: &Arc<Mapping>, n: u16) -> Result<ViewSlot> {
        Ok(match fd.field_type {
            FieldType::ListBools => ViewSlot::Bools(BoolList::new(n)),
            FieldType::ListInt8 => ViewSlot::I8(NumList::new(n)),
            FieldType::ListInt16 => ViewSlot::I16(NumList::new(n)),
            FieldType::ListInt32 => ViewSlot::I32(NumList::new(n)),
            FieldType::ListInt64 => ViewSlot::I64(NumList::new(n)),
            FieldType::ListUint8 => ViewSlot::U8(NumList::new(n)),
            FieldType::ListUint16 => ViewSlot::U16(NumList::new(n)),
            FieldType::ListUint32 => ViewSlot::U32(NumList::new(n)),
            FieldType::ListUint64 => ViewSlot::U64(NumList::new(n)),
            FieldType::ListFloat32 => ViewSlot::F32(NumList::new(n)),
            FieldType::ListFloat64 => ViewSlot::F64(NumList::new(n)),
            FieldType::ListBytes => ViewSlot::Bytes(BlobList::new(n, FieldType::ListBytes)),
            FieldType::ListStrings => ViewSlot::Strings(BlobList::new(n, FieldType::ListStrings)),
            FieldType::ListStructs => {
                let child = fd
                    .child(owner)
                    .ok_or_else(|| kerr(ErrorKind::SchemaInvalid, "struct list has no mapping"))?;
                ViewSlot::Structs(StructList::new(n, child))
            }
            FieldType::Map => ViewSlot::Map(MapView::new(n, fd, fd.child(owner))?),
            FieldType::ListAny => ViewSlot::Anys(AnyList::new(n)),
            _ => {
                return Err(kerr(
                    ErrorKind::TypeMismatch,
                    format!("field {} is not a list or map", fd.name),
                ))
            }
        })
    }

    fn dirty(&self) -> bool {
        each_view!(self, v => v.dirty())
    }

    fn clear_dirty(&mut self) {
        each_view!(self, v => v.clear_dirty())
    }

    fn is_empty(&self) -> bool {
        each_view!(self, v => v.is_empty())
    }

    fn encode_field(&mut self) -> Result<Vec<u8>> {
        each_view!(self, v => v.encode_field())
    }

    fn set_recording(&mut self, on: bool) {
        each_view!(self, v => v.set_recording(on))
    }

    fn take_ops(&mut self) -> Vec<RecordedOp> {
        each_view!(self, v => v.take_ops())
    }
}

/// A live handle over one struct's segment. Single-owner; all operations
/// are synchronous. Concurrent read-only sharing is safe once
/// `parse_index` has run.
#[derive(Clone, Debug)]
pub struct Struct {
    mapping: Arc<Mapping>,
    seg: Segment,
    index: Vec<FieldSlot>,
    index_parsed: bool,
    views: Vec<Option<ViewSlot>>,
    presence: Option<PresenceBits>,
    /// Bytes of presence bitfield currently appended to the segment tail.
    presence_appended: usize,
    recording: bool,
    tape: Vec<RecordedOp>,
}

macro_rules! scalar_accessors {
    ($get:ident, $set:ident, $t:ty) => {
        pub fn $get(&mut self, n: u16) -> Result<$t> {
            self.get_num::<$t>(n)
        }

        pub fn $set(&mut self, n: u16, v: $t) -> Result<()> {
            self.set_num::<$t>(n, v)
        }
    };
}

macro_rules! num_list_accessor {
    ($fn_name:ident, $t:ty, $variant:ident, $tag:ident) => {
        pub fn $fn_name(&mut self, n: u16) -> Result<&mut NumList<$t>> {
            self.check_field(n, FieldType::$tag)?;
            self.ensure_view(n)?;
            match self.views[n as usize].as_mut() {
                Some(ViewSlot::$variant(v)) => Ok(v),
                _ => Err(err("list view cache out of sync")),
            }
        }
    };
}

impl Struct {
    pub fn new(mapping: &Arc<Mapping>) -> Result<Struct> {
        mapping.init()?;
        let nf = mapping.num_fields();
        let mut root = vec![0u8; HEADER_LEN];
        encode_header(&mut root, 0, FieldType::Struct, HEADER_LEN as u64)?;
        Ok(Struct {
            mapping: mapping.clone(),
            seg: Segment::from_vec(root),
            index: vec![FieldSlot::default(); nf],
            index_parsed: true,
            views: vec![None; nf],
            presence: None,
            presence_appended: 0,
            recording: false,
            tape: Vec::new(),
        })
    }

    /// A pooled variant of `new`: reuses a segment and field index released
    /// earlier for the same mapping, when any are available.
    pub fn new_pooled(mapping: &Arc<Mapping>) -> Result<Struct> {
        mapping.init()?;
        let nf = mapping.num_fields();
        let (mut seg, mut index) = pool::take(mapping).unwrap_or_default();
        seg.reset();
        index.clear();
        index.resize(nf, FieldSlot::default());
        let mut root = [0u8; HEADER_LEN];
        encode_header(&mut root, 0, FieldType::Struct, HEADER_LEN as u64)?;
        seg.insert_at(0, &root)?;
        Ok(Struct {
            mapping: mapping.clone(),
            seg,
            index,
            index_parsed: true,
            views: vec![None; nf],
            presence: None,
            presence_appended: 0,
            recording: false,
            tape: Vec::new(),
        })
    }

    /// Return the segment and field index to their per-mapping pools.
    pub fn release(self) {
        let Struct {
            mapping,
            mut seg,
            mut index,
            ..
        } = self;
        seg.reset();
        index.clear();
        pool::put(&mapping, seg, index);
    }

    pub fn from_bytes(mapping: &Arc<Mapping>, bytes: Vec<u8>) -> Result<Struct> {
        let mut s = Struct::new(mapping)?;
        s.unmarshal(bytes)?;
        Ok(s)
    }

    pub(crate) fn from_parts(mapping: Arc<Mapping>, seg: Segment) -> Struct {
        let nf = mapping.num_fields();
        Struct {
            mapping,
            seg,
            index: vec![FieldSlot::default(); nf],
            index_parsed: false,
            views: vec![None; nf],
            presence: None,
            presence_appended: 0,
            recording: false,
            tape: Vec::new(),
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// The raw segment bytes as they currently stand. Callers that need
    /// the canonical form run `prepare_embed` first.
    pub(crate) fn segment_bytes(&self) -> &[u8] {
        self.seg.bytes()
    }

    pub fn descriptor(&self, n: u16) -> Option<&FieldDescriptor> {
        self.mapping.fields.get(n as usize)
    }

    /// Turn on presence tracking: a trailing bitfield distinguishing
    /// "explicitly set to zero" from "never set" is appended during
    /// marshal. Both producer and consumer of a wire buffer must agree on
    /// this setting.
    pub fn enable_presence(&mut self) -> Result<()> {
        if self.presence.is_some() {
            return Ok(());
        }
        self.ensure_index_parsed()?;
        let mut bits = PresenceBits::new(self.mapping.num_fields());
        for (i, slot) in self.index.iter().enumerate() {
            if slot.set {
                bits.set(i, true);
            }
        }
        self.presence = Some(bits);
        Ok(())
    }

    pub fn presence_enabled(&self) -> bool {
        self.presence.is_some()
    }

    /// True when field `n` was explicitly set. Without presence tracking
    /// this cannot tell "set to zero" from "never set".
    pub fn is_set(&mut self, n: u16) -> Result<bool> {
        if self.descriptor(n).is_none() {
            return Err(kerr(ErrorKind::OutOfBounds, format!("no field numbered {}", n)));
        }
        self.ensure_index_parsed()?;
        if let Some(p) = &self.presence {
            return Ok(p.get(n as usize));
        }
        Ok(self.index[n as usize].set)
    }

    /// True when field `n` is materialised in the segment.
    pub fn has_field(&mut self, n: u16) -> Result<bool> {
        if self.descriptor(n).is_none() {
            return Err(kerr(ErrorKind::OutOfBounds, format!("no field numbered {}", n)));
        }
        self.ensure_index_parsed()?;
        Ok(self.index[n as usize].set)
    }

    /// Pre-parse the field index so later read-only access is safe to
    /// share across threads.
    pub fn parse_index(&mut self) -> Result<()> {
        self.ensure_index_parsed()
    }

    pub fn set_recording(&mut self, on: bool) {
        self.recording = on;
        for v in self.views.iter_mut().flatten() {
            v.set_recording(on);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Return the accumulated mutation tape and clear it. Ops recorded by
    /// list and map views are merged after the struct's own tape: ops on
    /// distinct fields commute under apply, and same-field order is kept.
    pub fn drain_recorded_ops(&mut self) -> Vec<RecordedOp> {
        let mut out = std::mem::take(&mut self.tape);
        for v in self.views.iter_mut().flatten() {
            out.append(&mut v.take_ops());
        }
        out
    }

    // ---- field index management ----

    fn ensure_index_parsed(&mut self) -> Result<()> {
        if self.index_parsed {
            return Ok(());
        }
        let mapping = self.mapping.clone();
        let nf = mapping.num_fields();
        let mut index = vec![FieldSlot::default(); nf];
        let mut presence_area = 0usize;
        let mut presence_bits = None;
        {
            let bytes = self.seg.bytes();
            if bytes.len() < HEADER_LEN {
                return Err(kerr(
                    ErrorKind::MalformedHeader,
                    "segment shorter than a root header",
                ));
            }
            let (_, ty, final40) = decode_header(bytes)?;
            if ty != FieldType::Struct {
                return Err(kerr(ErrorKind::MalformedHeader, "root header is not a struct"));
            }
            if final40 as usize != bytes.len() {
                return Err(kerr(
                    ErrorKind::MalformedHeader,
                    "root size disagrees with segment length",
                ));
            }
            let mut body_end = bytes.len();
            if let Some(p) = &self.presence {
                presence_area = pad8(p.encoded_len());
                if body_end < HEADER_LEN + presence_area {
                    return Err(kerr(
                        ErrorKind::InvalidEncoding,
                        "segment too short to hold its presence bitfield",
                    ));
                }
                body_end -= presence_area;
                presence_bits = Some(PresenceBits::decode(&bytes[body_end..], nf)?);
            }
            let mut off = HEADER_LEN;
            let mut prev_num: i32 = -1;
            while off < body_end {
                let (num, ty, final40) = decode_header(&bytes[off..])?;
                let fd = match mapping.fields.get(num as usize) {
                    Some(fd) => fd,
                    None => {
                        return Err(kerr(
                            ErrorKind::InvalidEncoding,
                            "unknown field number in segment",
                        ))
                    }
                };
                if fd.field_type != ty {
                    return Err(kerr(
                        ErrorKind::TypeMismatch,
                        format!(
                            "field {} encoded as {:?} but schema says {:?}",
                            fd.name, ty, fd.field_type
                        ),
                    ));
                }
                if (num as i32) <= prev_num {
                    return Err(kerr(
                        ErrorKind::InvalidEncoding,
                        "fields out of order in segment",
                    ));
                }
                prev_num = num as i32;
                let size = (mapping.field_ops(num)?.scan_size)(&bytes[off..body_end], final40)?;
                if size == 0 || size % 8 != 0 || off + size > body_end {
                    return Err(kerr(
                        ErrorKind::InvalidEncoding,
                        "field size overruns struct body",
                    ));
                }
                index[num as usize] = FieldSlot {
                    offset: off as u32,
                    size: size as u32,
                    set: true,
                };
                off += size;
            }
        }
        self.index = index;
        if let Some(bits) = presence_bits {
            self.presence = Some(bits);
        }
        self.presence_appended = presence_area;
        self.index_parsed = true;
        Ok(())
    }

    /// Position that keeps fields sorted: just after the last occupied
    /// slot below `n`, or just after the root header when there is none.
    fn find_insert_position(&self, n: u16) -> usize {
        let mut pos = HEADER_LEN;
        for slot in self.index[..n as usize].iter() {
            if slot.set {
                pos = (slot.offset + slot.size) as usize;
            }
        }
        pos
    }

    /// Shift index entries at or after `after` by `delta`, applied after
    /// every splice.
    fn update_field_offsets(&mut self, after: u32, delta: i64) {
        for slot in self.index.iter_mut() {
            if slot.set && slot.offset >= after {
                slot.offset = (slot.offset as i64 + delta) as u32;
            }
        }
    }

    fn refresh_root(&mut self) -> Result<()> {
        let len = self.seg.len() as u64;
        set_final40(self.seg.bytes_mut(0, HEADER_LEN)?, len)
    }

    /// Insert or replace the full encoding of field `n`. Does not record;
    /// callers record at their own granularity.
    pub(crate) fn insert_field_raw(&mut self, n: u16, field: &[u8]) -> Result<()> {
        self.ensure_index_parsed()?;
        self.strip_presence_tail()?;
        let slot = self.index[n as usize];
        if slot.set {
            let old = slot.size as usize;
            if old == field.len() {
                self.seg
                    .bytes_mut(slot.offset as usize, old)?
                    .copy_from_slice(field);
            } else {
                self.seg.replace_at(slot.offset as usize, old, field)?;
                self.update_field_offsets(slot.offset + 1, field.len() as i64 - old as i64);
                self.index[n as usize].size = field.len() as u32;
            }
        } else {
            let pos = self.find_insert_position(n);
            self.seg.insert_at(pos, field)?;
            self.update_field_offsets(pos as u32, field.len() as i64);
            self.index[n as usize] = FieldSlot {
                offset: pos as u32,
                size: field.len() as u32,
                set: true,
            };
        }
        self.refresh_root()
    }

    /// Remove field `n` from the segment if present, and clear its
    /// presence bit. Does not record.
    pub(crate) fn remove_field_raw(&mut self, n: u16) -> Result<()> {
        self.ensure_index_parsed()?;
        self.strip_presence_tail()?;
        let slot = self.index[n as usize];
        if slot.set {
            self.seg
                .remove_at(slot.offset as usize, slot.size as usize)?;
            self.index[n as usize] = FieldSlot::default();
            self.update_field_offsets(slot.offset + 1, -(slot.size as i64));
            self.refresh_root()?;
        }
        if let Some(p) = &mut self.presence {
            p.set(n as usize, false);
        }
        Ok(())
    }

    fn check_field(&self, n: u16, want: FieldType) -> Result<()> {
        let fd = self
            .descriptor(n)
            .ok_or_else(|| kerr(ErrorKind::OutOfBounds, format!("no field numbered {}", n)))?;
        if fd.field_type != want {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                format!("field {} is {:?}, not {:?}", fd.name, fd.field_type, want),
            ));
        }
        Ok(())
    }

    fn note_set(&mut self, n: u16) {
        if let Some(p) = &mut self.presence {
            p.set(n as usize, true);
        }
    }

    fn record(&mut self, n: u16, op: OpType, index: i32, data: Vec<u8>) {
        if self.recording {
            self.tape.push(RecordedOp::new(n, op, index, data));
        }
    }

    // ---- scalars ----

    fn get_num<T: Prim>(&mut self, n: u16) -> Result<T> {
        self.check_field(n, T::SCALAR_TY)?;
        self.ensure_index_parsed()?;
        let slot = self.index[n as usize];
        if !slot.set {
            return Ok(T::default());
        }
        let off = slot.offset as usize;
        let (_, _, final40) = decode_header(self.seg.slice(off, HEADER_LEN)?)?;
        if T::PACKED {
            Ok(T::from_final40(final40))
        } else {
            Ok(T::read_wire(self.seg.slice(off + HEADER_LEN, 8)?))
        }
    }

    fn set_num<T: Prim>(&mut self, n: u16, v: T) -> Result<()> {
        self.check_field(n, T::SCALAR_TY)?;
        if v.is_zero() && self.presence.is_none() {
            self.remove_field_raw(n)?;
            self.record(n, OpType::Clear, NO_LIST_INDEX, Vec::new());
            return Ok(());
        }
        let mut buf = [0u8; 16];
        let len = if T::PACKED {
            encode_header(&mut buf, n, T::SCALAR_TY, v.to_final40())?;
            HEADER_LEN
        } else {
            encode_header(&mut buf, n, T::SCALAR_TY, 0)?;
            v.write_wire(&mut buf[HEADER_LEN..]);
            HEADER_LEN + 8
        };
        self.insert_field_raw(n, &buf[..len])?;
        self.note_set(n);
        self.record(n, OpType::Set, NO_LIST_INDEX, v.wire_bytes());
        Ok(())
    }

    scalar_accessors!(get_i8, set_i8, i8);
    scalar_accessors!(get_i16, set_i16, i16);
    scalar_accessors!(get_i32, set_i32, i32);
    scalar_accessors!(get_i64, set_i64, i64);
    scalar_accessors!(get_u8, set_u8, u8);
    scalar_accessors!(get_u16, set_u16, u16);
    scalar_accessors!(get_u32, set_u32, u32);
    scalar_accessors!(get_u64, set_u64, u64);
    scalar_accessors!(get_f32, set_f32, f32);
    scalar_accessors!(get_f64, set_f64, f64);

    pub fn get_bool(&mut self, n: u16) -> Result<bool> {
        self.check_field(n, FieldType::Bool)?;
        self.ensure_index_parsed()?;
        let slot = self.index[n as usize];
        if !slot.set {
            return Ok(false);
        }
        let (_, _, final40) = decode_header(self.seg.slice(slot.offset as usize, HEADER_LEN)?)?;
        Ok(final40 != 0)
    }

    pub fn set_bool(&mut self, n: u16, v: bool) -> Result<()> {
        self.check_field(n, FieldType::Bool)?;
        if !v && self.presence.is_none() {
            self.remove_field_raw(n)?;
            self.record(n, OpType::Clear, NO_LIST_INDEX, Vec::new());
            return Ok(());
        }
        let mut buf = [0u8; HEADER_LEN];
        encode_header(&mut buf, n, FieldType::Bool, v as u64)?;
        self.insert_field_raw(n, &buf)?;
        self.note_set(n);
        self.record(n, OpType::Set, NO_LIST_INDEX, vec![v as u8]);
        Ok(())
    }

    // ---- strings and bytes ----

    fn get_blob(&mut self, n: u16, ty: FieldType) -> Result<&[u8]> {
        self.check_field(n, ty)?;
        self.ensure_index_parsed()?;
        let slot = self.index[n as usize];
        if !slot.set {
            return Ok(&[]);
        }
        let off = slot.offset as usize;
        let (_, _, final40) = decode_header(self.seg.slice(off, HEADER_LEN)?)?;
        let len = final40 as usize;
        if HEADER_LEN + len > slot.size as usize {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "truncated variable-length payload",
            ));
        }
        self.seg.slice(off + HEADER_LEN, len)
    }

    fn set_blob(&mut self, n: u16, ty: FieldType, v: &[u8]) -> Result<()> {
        self.check_field(n, ty)?;
        if v.is_empty() && self.presence.is_none() {
            self.remove_field_raw(n)?;
            self.record(n, OpType::Clear, NO_LIST_INDEX, Vec::new());
            return Ok(());
        }
        let total = HEADER_LEN + pad8(v.len());
        let mut buf = vec![0u8; total];
        encode_header(&mut buf, n, ty, v.len() as u64)?;
        buf[HEADER_LEN..HEADER_LEN + v.len()].copy_from_slice(v);
        self.insert_field_raw(n, &buf)?;
        self.note_set(n);
        self.record(n, OpType::Set, NO_LIST_INDEX, v.to_vec());
        Ok(())
    }

    pub fn get_bytes(&mut self, n: u16) -> Result<&[u8]> {
        self.get_blob(n, FieldType::Bytes)
    }

    pub fn set_bytes(&mut self, n: u16, v: &[u8]) -> Result<()> {
        self.set_blob(n, FieldType::Bytes, v)
    }

    pub fn get_str(&mut self, n: u16) -> Result<&str> {
        let b = self.get_blob(n, FieldType::String)?;
        std::str::from_utf8(b)
            .map_err(|_| kerr(ErrorKind::InvalidEncoding, "string field is not valid utf-8"))
    }

    pub fn set_str(&mut self, n: u16, v: &str) -> Result<()> {
        self.set_blob(n, FieldType::String, v.as_bytes())
    }

    /// Set a field from op-payload bytes: the primitive's little-endian
    /// form for scalars (one byte for bools), raw contents for strings and
    /// byte strings, a whole encoded struct for struct fields, and
    /// hash-plus-struct for any fields. Used when replaying recorded or
    /// patched mutations.
    pub fn set_field_wire(&mut self, n: u16, data: &[u8]) -> Result<()> {
        let fd = self
            .descriptor(n)
            .ok_or_else(|| kerr(ErrorKind::OutOfBounds, format!("no field numbered {}", n)))?
            .clone();
        macro_rules! prim_arm {
            ($t:ty, $set:ident) => {{
                if data.len() < <$t as Prim>::WIDTH {
                    return Err(kerr(
                        ErrorKind::InvalidEncoding,
                        format!("set payload too short for field {}", fd.name),
                    ));
                }
                self.$set(n, <$t as Prim>::read_wire(data))
            }};
        }
        match fd.field_type {
            FieldType::Bool => {
                let b = data.first().ok_or_else(|| {
                    kerr(
                        ErrorKind::InvalidEncoding,
                        format!("set payload too short for field {}", fd.name),
                    )
                })?;
                self.set_bool(n, *b != 0)
            }
            FieldType::Int8 => prim_arm!(i8, set_i8),
            FieldType::Int16 => prim_arm!(i16, set_i16),
            FieldType::Int32 => prim_arm!(i32, set_i32),
            FieldType::Int64 => prim_arm!(i64, set_i64),
            FieldType::Uint8 => prim_arm!(u8, set_u8),
            FieldType::Uint16 => prim_arm!(u16, set_u16),
            FieldType::Uint32 => prim_arm!(u32, set_u32),
            FieldType::Uint64 => prim_arm!(u64, set_u64),
            FieldType::Float32 => prim_arm!(f32, set_f32),
            FieldType::Float64 => prim_arm!(f64, set_f64),
            FieldType::String => {
                let s = std::str::from_utf8(data).map_err(|_| {
                    kerr(
                        ErrorKind::InvalidEncoding,
                        format!("set payload for field {} is not valid utf-8", fd.name),
                    )
                })?;
                self.set_str(n, s)
            }
            FieldType::Bytes => self.set_bytes(n, data),
            FieldType::Struct => {
                let child_mapping = fd.child(&self.mapping).ok_or_else(|| {
                    kerr(ErrorKind::SchemaInvalid, "struct field has no nested mapping")
                })?;
                let mut child = Struct::new(&child_mapping)?;
                child.unmarshal(data.to_vec())?;
                self.set_struct(n, &mut child)
            }
            FieldType::Any => self.set_any_raw(n, data),
            _ => Err(kerr(
                ErrorKind::TypeMismatch,
                format!("field {} cannot be set from scalar payload", fd.name),
            )),
        }
    }

    /// Remove field `n` regardless of type.
    pub fn clear_field(&mut self, n: u16) -> Result<()> {
        if self.descriptor(n).is_none() {
            return Err(kerr(ErrorKind::OutOfBounds, format!("no field numbered {}", n)));
        }
        self.views[n as usize] = None;
        self.remove_field_raw(n)?;
        self.record(n, OpType::Clear, NO_LIST_INDEX, Vec::new());
        Ok(())
    }

    // ---- nested structs ----

    /// Bring a struct's segment up to date for embedding: sync deferred
    /// views, drop any appended presence tail, refresh the root size.
    pub(crate) fn prepare_embed(&mut self) -> Result<()> {
        self.sync_dirty_views()?;
        self.strip_presence_tail()?;
        self.refresh_root()
    }

    /// Embed `child` as field `n`. The child's canonical bytes are copied
    /// into this struct's segment; an empty child clears the field.
    pub fn set_struct(&mut self, n: u16, child: &mut Struct) -> Result<()> {
        self.check_field(n, FieldType::Struct)?;
        let mapping = self.mapping.clone();
        let fd = &mapping.fields[n as usize];
        if let Some(cm) = fd.child(&mapping) {
            if cm.path != child.mapping.path {
                return Err(kerr(
                    ErrorKind::TypeMismatch,
                    format!("field {} embeds {}, not {}", fd.name, cm.path, child.mapping.path),
                ));
            }
        }
        child.prepare_embed()?;
        if child.seg.len() <= HEADER_LEN {
            self.remove_field_raw(n)?;
            self.record(n, OpType::Clear, NO_LIST_INDEX, Vec::new());
            return Ok(());
        }
        let data = child.seg.bytes().to_vec();
        let mut buf = data.clone();
        set_field_num(&mut buf, n)?;
        self.insert_field_raw(n, &buf)?;
        self.note_set(n);
        self.record(n, OpType::Set, NO_LIST_INDEX, data);
        Ok(())
    }

    /// A struct over the byte range of field `n`, sharing this segment's
    /// allocation (copy-on-write on the child's first mutation). The view's
    /// field index is parsed eagerly. Mutations do not propagate back until
    /// the caller re-embeds with `set_struct`. An absent field yields an
    /// empty struct.
    pub fn struct_view(&mut self, n: u16) -> Result<Struct> {
        self.check_field(n, FieldType::Struct)?;
        let mapping = self.mapping.clone();
        let child_mapping = mapping.fields[n as usize]
            .child(&mapping)
            .ok_or_else(|| kerr(ErrorKind::SchemaInvalid, "struct field has no nested mapping"))?;
        self.ensure_index_parsed()?;
        let slot = self.index[n as usize];
        if !slot.set {
            return Struct::new(&child_mapping);
        }
        let seg = self.seg.view(slot.offset as usize, slot.size as usize)?;
        let mut child = Struct::from_parts(child_mapping, seg);
        child.ensure_index_parsed()?;
        Ok(child)
    }

    // ---- list, map and any views ----

    fn ensure_view(&mut self, n: u16) -> Result<()> {
        if self.views[n as usize].is_some() {
            return Ok(());
        }
        self.ensure_index_parsed()?;
        let mapping = self.mapping.clone();
        let fd = &mapping.fields[n as usize];
        let slot = self.index[n as usize];
        let mut view = if slot.set {
            let seg = self.seg.view(slot.offset as usize, slot.size as usize)?;
            ViewSlot::parse(fd, &mapping, n, seg.bytes())?
        } else {
            ViewSlot::new_empty(fd, &mapping, n)?
        };
        view.set_recording(self.recording);
        self.views[n as usize] = Some(view);
        Ok(())
    }

    pub fn list_bools(&mut self, n: u16) -> Result<&mut BoolList> {
        self.check_field(n, FieldType::ListBools)?;
        self.ensure_view(n)?;
        match self.views[n as usize].as_mut() {
            Some(ViewSlot::Bools(v)) => Ok(v),
            _ => Err(err("list view cache out of sync")),
        }
    }

    num_list_accessor!(list_i8, i8, I8, ListInt8);
    num_list_accessor!(list_i16, i16, I16, ListInt16);
    num_list_accessor!(list_i32, i32, I32, ListInt32);
    num_list_accessor!(list_i64, i64, I64, ListInt64);
    num_list_accessor!(list_u8, u8, U8, ListUint8);
    num_list_accessor!(list_u16, u16, U16, ListUint16);
    num_list_accessor!(list_u32, u32, U32, ListUint32);
    num_list_accessor!(list_u64, u64, U64, ListUint64);
    num_list_accessor!(list_f32, f32, F32, ListFloat32);
    num_list_accessor!(list_f64, f64, F64, ListFloat64);

    pub fn list_bytes(&mut self, n: u16) -> Result<&mut BlobList> {
        self.check_field(n, FieldType::ListBytes)?;
        self.ensure_view(n)?;
        match self.views[n as usize].as_mut() {
            Some(ViewSlot::Bytes(v)) => Ok(v),
            _ => Err(err("list view cache out of sync")),
        }
    }

    pub fn list_strings(&mut self, n: u16) -> Result<&mut BlobList> {
        self.check_field(n, FieldType::ListStrings)?;
        self.ensure_view(n)?;
        match self.views[n as usize].as_mut() {
            Some(ViewSlot::Strings(v)) => Ok(v),
            _ => Err(err("list view cache out of sync")),
        }
    }

    pub fn list_structs(&mut self, n: u16) -> Result<&mut StructList> {
        self.check_field(n, FieldType::ListStructs)?;
        self.ensure_view(n)?;
        match self.views[n as usize].as_mut() {
            Some(ViewSlot::Structs(v)) => Ok(v),
            _ => Err(err("list view cache out of sync")),
        }
    }

    pub fn map(&mut self, n: u16) -> Result<&mut MapView> {
        self.check_field(n, FieldType::Map)?;
        self.ensure_view(n)?;
        match self.views[n as usize].as_mut() {
            Some(ViewSlot::Map(v)) => Ok(v),
            _ => Err(err("list view cache out of sync")),
        }
    }

    pub fn list_any(&mut self, n: u16) -> Result<&mut AnyList> {
        self.check_field(n, FieldType::ListAny)?;
        self.ensure_view(n)?;
        match self.views[n as usize].as_mut() {
            Some(ViewSlot::Anys(v)) => Ok(v),
            _ => Err(err("list view cache out of sync")),
        }
    }

    /// Encode every dirty view back into the segment, in field order.
    pub fn sync_dirty_views(&mut self) -> Result<()> {
        for n in 0..self.views.len() {
            let Some(mut view) = self.views[n].take() else {
                continue;
            };
            if !view.dirty() {
                self.views[n] = Some(view);
                continue;
            }
            let res = if view.is_empty() && self.presence.is_none() {
                self.remove_field_raw(n as u16)
            } else {
                match view.encode_field() {
                    Ok(bytes) => {
                        let r = self.insert_field_raw(n as u16, &bytes);
                        if r.is_ok() {
                            self.note_set(n as u16);
                        }
                        r
                    }
                    Err(e) => Err(e),
                }
            };
            view.clear_dirty();
            self.views[n] = Some(view);
            res?;
        }
        Ok(())
    }

    /// Wholesale-replace a list or map field from its full wire encoding
    /// (header included; the field number is rewritten). The data is parsed
    /// completely before any mutation.
    pub fn apply_list_replace(&mut self, n: u16, data: &[u8]) -> Result<()> {
        let mapping = self.mapping.clone();
        let fd = mapping
            .fields
            .get(n as usize)
            .ok_or_else(|| kerr(ErrorKind::OutOfBounds, format!("no field numbered {}", n)))?;
        if !fd.field_type.is_list() && fd.field_type != FieldType::Map {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                format!("field {} is not a list or map", fd.name),
            ));
        }
        let (_, ty, final40) = decode_header(data)?;
        if ty != fd.field_type {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                format!("replacement data is {:?}, field {} is {:?}", ty, fd.name, fd.field_type),
            ));
        }
        let size = (mapping.field_ops(n)?.scan_size)(data, final40)?;
        if size != data.len() {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "replacement data length disagrees with its header",
            ));
        }
        let mut view = ViewSlot::parse(fd, &mapping, n, data)?;
        if view.is_empty() && self.presence.is_none() {
            // An empty list is not materialised, matching the sync step.
            self.remove_field_raw(n)?;
        } else {
            let mut buf = data.to_vec();
            set_field_num(&mut buf, n)?;
            self.insert_field_raw(n, &buf)?;
            self.note_set(n);
        }
        view.set_recording(self.recording);
        self.views[n as usize] = Some(view);
        self.record(n, OpType::ListReplace, NO_LIST_INDEX, data.to_vec());
        Ok(())
    }

    // ---- any ----

    pub fn set_any<H: ClawStruct>(&mut self, n: u16, value: &mut H) -> Result<()> {
        let hash = value.type_hash();
        self.set_any_parts(n, hash, value.get_struct_mut())
    }

    /// Write an any field from its parts: the 16-byte type hash and the
    /// value's underlying struct.
    pub fn set_any_parts(&mut self, n: u16, hash: [u8; 16], inner: &mut Struct) -> Result<()> {
        self.check_field(n, FieldType::Any)?;
        inner.prepare_embed()?;
        let inner_len = inner.seg.len();
        let body_len = 16 + inner_len;
        let total = HEADER_LEN + pad8(body_len);
        let mut buf = vec![0u8; total];
        let final40 = pack_any_final40(FieldType::Struct, body_len as u64)?;
        encode_header(&mut buf, n, FieldType::Any, final40)?;
        buf[HEADER_LEN..HEADER_LEN + 16].copy_from_slice(&hash);
        buf[HEADER_LEN + 16..HEADER_LEN + body_len].copy_from_slice(inner.seg.bytes());
        let data = buf[HEADER_LEN..HEADER_LEN + body_len].to_vec();
        self.insert_field_raw(n, &buf)?;
        self.note_set(n);
        self.record(n, OpType::Set, NO_LIST_INDEX, data);
        Ok(())
    }

    /// Write an any field from its already-encoded body (hash followed by
    /// the inner struct bytes).
    pub fn set_any_raw(&mut self, n: u16, data: &[u8]) -> Result<()> {
        self.check_field(n, FieldType::Any)?;
        if data.len() < 16 + HEADER_LEN {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "any body shorter than hash and inner header",
            ));
        }
        let (_, ty, inner_total) = decode_header(&data[16..])?;
        if ty != FieldType::Struct || inner_total as usize != data.len() - 16 {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "any body does not hold one whole struct",
            ));
        }
        let total = HEADER_LEN + pad8(data.len());
        let mut buf = vec![0u8; total];
        let final40 = pack_any_final40(FieldType::Struct, data.len() as u64)?;
        encode_header(&mut buf, n, FieldType::Any, final40)?;
        buf[HEADER_LEN..HEADER_LEN + data.len()].copy_from_slice(data);
        self.insert_field_raw(n, &buf)?;
        self.note_set(n);
        self.record(n, OpType::Set, NO_LIST_INDEX, data.to_vec());
        Ok(())
    }

    /// The stored hash and inner bytes of an any field, or `None` when the
    /// field is absent.
    pub fn any_value(&mut self, n: u16) -> Result<Option<AnyValue>> {
        self.check_field(n, FieldType::Any)?;
        self.ensure_index_parsed()?;
        let slot = self.index[n as usize];
        if !slot.set {
            return Ok(None);
        }
        let off = slot.offset as usize;
        let (_, _, final40) = decode_header(self.seg.slice(off, HEADER_LEN)?)?;
        let (_, data_size) = unpack_any_final40(final40);
        let data_size = data_size as usize;
        if data_size < 16 || HEADER_LEN + data_size > slot.size as usize {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated any body"));
        }
        let body = self.seg.slice(off + HEADER_LEN, data_size)?;
        let mut type_hash = [0u8; 16];
        type_hash.copy_from_slice(&body[..16]);
        Ok(Some(AnyValue {
            type_hash,
            bytes: body[16..].to_vec(),
        }))
    }

    /// Read an any field into `target` after verifying that the stored
    /// type hash matches the target's.
    pub fn get_any<H: ClawStruct>(&mut self, n: u16, target: &mut H) -> Result<()> {
        let av = self
            .any_value(n)?
            .ok_or_else(|| kerr(ErrorKind::TypeMismatch, "any field is not set"))?;
        if av.type_hash != target.type_hash() {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                "stored any hash does not match the target type",
            ));
        }
        target.get_struct_mut().unmarshal(av.bytes)
    }

    // ---- presence tail ----

    fn append_presence_tail(&mut self) -> Result<()> {
        let Some(p) = &self.presence else {
            return Ok(());
        };
        if self.presence_appended > 0 {
            return Ok(());
        }
        let mut tail = Vec::with_capacity(pad8(p.encoded_len()));
        p.encode_into(&mut tail);
        tail.resize(pad8(tail.len()), 0);
        let at = self.seg.len();
        self.seg.insert_at(at, &tail)?;
        self.presence_appended = tail.len();
        Ok(())
    }

    fn strip_presence_tail(&mut self) -> Result<()> {
        if self.presence_appended == 0 {
            return Ok(());
        }
        let new_len = self.seg.len() - self.presence_appended;
        self.seg.truncate(new_len)?;
        self.presence_appended = 0;
        self.refresh_root()
    }

    // ---- marshal / unmarshal ----

    /// The canonical wire bytes, copied out.
    pub fn marshal(&mut self) -> Result<Vec<u8>> {
        Ok(self.marshal_view()?.to_vec())
    }

    /// The canonical wire bytes without copying. The slice aliases the
    /// internal segment; it must not outlive the next mutation.
    pub fn marshal_view(&mut self) -> Result<&[u8]> {
        self.sync_dirty_views()?;
        self.append_presence_tail()?;
        self.refresh_root()?;
        Ok(self.seg.bytes())
    }

    pub fn marshal_writer<W: Write>(&mut self, w: &mut W) -> Result<()> {
        self.sync_dirty_views()?;
        self.append_presence_tail()?;
        self.refresh_root()?;
        write_all_short(w, self.seg.bytes())
    }

    /// Adopt `bytes` as this struct's segment. The buffer is truncated to
    /// the root header's declared size; the field index parses lazily on
    /// first access.
    pub fn unmarshal(&mut self, bytes: Vec<u8>) -> Result<()> {
        let (_, ty, final40) = decode_header(&bytes)?;
        if ty != FieldType::Struct {
            return Err(kerr(ErrorKind::MalformedHeader, "root header is not a struct"));
        }
        let total = final40 as usize;
        if total > bytes.len() {
            return Err(kerr(
                ErrorKind::MalformedHeader,
                "declared size exceeds buffer",
            ));
        }
        if total < HEADER_LEN || total % 8 != 0 {
            return Err(kerr(ErrorKind::InvalidEncoding, "bad root size"));
        }
        let mut v = bytes;
        v.truncate(total);
        self.seg = Segment::from_vec(v);
        self.invalidate();
        Ok(())
    }

    pub fn unmarshal_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.unmarshal(bytes.to_vec())
    }

    /// Read one struct from `r`, reusing the current allocation when
    /// nothing else shares it.
    pub fn unmarshal_reader<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let mut head = [0u8; HEADER_LEN];
        read_exact_short(r, &mut head)?;
        let (_, ty, final40) = decode_header(&head)?;
        if ty != FieldType::Struct {
            return Err(kerr(ErrorKind::MalformedHeader, "root header is not a struct"));
        }
        let total = final40 as usize;
        if total < HEADER_LEN || total % 8 != 0 {
            return Err(kerr(ErrorKind::InvalidEncoding, "bad root size"));
        }
        let mut v = self.seg.take_buf();
        v.reserve(total);
        v.extend_from_slice(&head);
        v.resize(total, 0);
        read_exact_short(r, &mut v[HEADER_LEN..])?;
        self.seg = Segment::from_vec(v);
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        self.index_parsed = false;
        for s in self.index.iter_mut() {
            *s = FieldSlot::default();
        }
        for v in self.views.iter_mut() {
            *v = None;
        }
        self.presence_appended = 0;
        if let Some(p) = &mut self.presence {
            p.clear_all();
        }
    }

    /// Structural equality via canonical bytes. Both sides must use the
    /// same presence setting. The root header's field number is embedding
    /// context rather than content, so it is excluded from the compare.
    pub fn content_eq(&mut self, other: &mut Struct) -> Result<bool> {
        if self.mapping.path != other.mapping.path {
            return Ok(false);
        }
        let a = self.marshal_view()?;
        let b = other.marshal_view()?;
        Ok(a.len() == b.len() && a[2..] == b[2..])
    }
}
