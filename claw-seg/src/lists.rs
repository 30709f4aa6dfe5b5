use crate::header::{decode_header, encode_header, set_field_num, FieldType, HEADER_LEN};
use crate::mapping::Mapping;
use crate::prim::Prim;
use crate::record::{OpType, RecordedOp, NO_LIST_INDEX};
use crate::segment::pad8;
use crate::structs::Struct;
use claw_base::{kerr, ErrorKind, Result};
use std::sync::Arc;

// Every view buffers its items outside the segment and carries a dirty
// flag; the owning struct encodes dirty views back in a sync step before
// marshal. Views also keep a local recording tape because the struct hands
// them out as exclusive borrows.

macro_rules! view_plumbing {
    () => {
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

        fn record(&mut self, op: OpType, index: i32, data: Vec<u8>) {
            if self.rec {
                self.ops.push(RecordedOp::new(self.field_num, op, index, data));
            }
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }
    };
}

pub(crate) use view_plumbing;

fn check_get(i: usize, len: usize) -> Result<()> {
    if i >= len {
        return Err(kerr(
            ErrorKind::OutOfBounds,
            format!("index {} past end of list of {}", i, len),
        ));
    }
    Ok(())
}

fn check_insert(i: usize, len: usize) -> Result<()> {
    if i > len {
        return Err(kerr(
            ErrorKind::OutOfBounds,
            format!("insert index {} past end of list of {}", i, len),
        ));
    }
    Ok(())
}

/// Bit-packed boolean list. The wire header's payload carries the item
/// count; the body packs bits little-endian within each byte.
#[derive(Clone, Debug)]
pub struct BoolList {
    field_num: u16,
    items: Vec<bool>,
    dirty: bool,
    rec: bool,
    ops: Vec<RecordedOp>,
}

impl BoolList {
    view_plumbing!();

    pub(crate) fn new(field_num: u16) -> BoolList {
        BoolList {
            field_num,
            items: Vec::new(),
            dirty: false,
            rec: false,
            ops: Vec::new(),
        }
    }

    pub(crate) fn parse(field_num: u16, bytes: &[u8]) -> Result<BoolList> {
        let (_, _, final40) = decode_header(bytes)?;
        let count = final40 as usize;
        let body_len = count.div_ceil(8);
        if HEADER_LEN + body_len > bytes.len() {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated bool list"));
        }
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            items.push(bytes[HEADER_LEN + i / 8] & (1 << (i % 8)) != 0);
        }
        let mut list = BoolList::new(field_num);
        list.items = items;
        Ok(list)
    }

    pub fn encode_field(&mut self) -> Result<Vec<u8>> {
        let body_len = self.items.len().div_ceil(8);
        let mut buf = vec![0u8; HEADER_LEN + pad8(body_len)];
        encode_header(
            &mut buf,
            self.field_num,
            FieldType::ListBools,
            self.items.len() as u64,
        )?;
        for (i, &b) in self.items.iter().enumerate() {
            if b {
                buf[HEADER_LEN + i / 8] |= 1 << (i % 8);
            }
        }
        Ok(buf)
    }

    pub fn get(&self, i: usize) -> Result<bool> {
        check_get(i, self.items.len())?;
        Ok(self.items[i])
    }

    pub fn set(&mut self, i: usize, v: bool) -> Result<()> {
        check_get(i, self.items.len())?;
        self.items[i] = v;
        self.dirty = true;
        self.record(OpType::ListSet, i as i32, vec![v as u8]);
        Ok(())
    }

    pub fn push(&mut self, v: bool) {
        let i = self.items.len();
        self.items.push(v);
        self.dirty = true;
        self.record(OpType::ListInsert, i as i32, vec![v as u8]);
    }

    pub fn insert(&mut self, i: usize, v: bool) -> Result<()> {
        check_insert(i, self.items.len())?;
        self.items.insert(i, v);
        self.dirty = true;
        self.record(OpType::ListInsert, i as i32, vec![v as u8]);
        Ok(())
    }

    pub fn remove(&mut self, i: usize) -> Result<bool> {
        check_get(i, self.items.len())?;
        let v = self.items.remove(i);
        self.dirty = true;
        self.record(OpType::ListRemove, i as i32, Vec::new());
        Ok(v)
    }

    pub fn set_all(&mut self, items: Vec<bool>) -> Result<()> {
        self.items = items;
        self.dirty = true;
        if self.rec {
            let data = self.encode_field()?;
            self.record(OpType::ListReplace, NO_LIST_INDEX, data);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.dirty = true;
        self.record(OpType::Clear, NO_LIST_INDEX, Vec::new());
    }

    pub fn values(&self) -> &[bool] {
        &self.items
    }
}

/// Fixed-width numeric list, monomorphised per primitive.
#[derive(Clone, Debug)]
pub struct NumList<T: Prim> {
    field_num: u16,
    items: Vec<T>,
    dirty: bool,
    rec: bool,
    ops: Vec<RecordedOp>,
}

impl<T: Prim> NumList<T> {
    view_plumbing!();

    pub(crate) fn new(field_num: u16) -> NumList<T> {
        NumList {
            field_num,
            items: Vec::new(),
            dirty: false,
            rec: false,
            ops: Vec::new(),
        }
    }

    pub(crate) fn parse(field_num: u16, bytes: &[u8]) -> Result<NumList<T>> {
        let (_, _, final40) = decode_header(bytes)?;
        let total = final40 as usize;
        if total < HEADER_LEN {
            return Err(kerr(ErrorKind::InvalidEncoding, "list size below header"));
        }
        let body = total - HEADER_LEN;
        if body % T::WIDTH != 0 {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "list body is not a whole number of items",
            ));
        }
        if HEADER_LEN + body > bytes.len() {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated numeric list"));
        }
        let count = body / T::WIDTH;
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            items.push(T::read_wire(&bytes[HEADER_LEN + i * T::WIDTH..]));
        }
        let mut list = NumList::new(field_num);
        list.items = items;
        Ok(list)
    }

    pub fn encode_field(&mut self) -> Result<Vec<u8>> {
        let body = self.items.len() * T::WIDTH;
        let mut buf = vec![0u8; HEADER_LEN + pad8(body)];
        encode_header(
            &mut buf,
            self.field_num,
            T::LIST_TY,
            (HEADER_LEN + body) as u64,
        )?;
        for (i, v) in self.items.iter().enumerate() {
            v.write_wire(&mut buf[HEADER_LEN + i * T::WIDTH..]);
        }
        Ok(buf)
    }

    pub fn get(&self, i: usize) -> Result<T> {
        check_get(i, self.items.len())?;
        Ok(self.items[i])
    }

    pub fn set(&mut self, i: usize, v: T) -> Result<()> {
        check_get(i, self.items.len())?;
        self.items[i] = v;
        self.dirty = true;
        self.record(OpType::ListSet, i as i32, v.wire_bytes());
        Ok(())
    }

    pub fn push(&mut self, v: T) {
        let i = self.items.len();
        self.items.push(v);
        self.dirty = true;
        self.record(OpType::ListInsert, i as i32, v.wire_bytes());
    }

    pub fn insert(&mut self, i: usize, v: T) -> Result<()> {
        check_insert(i, self.items.len())?;
        self.items.insert(i, v);
        self.dirty = true;
        self.record(OpType::ListInsert, i as i32, v.wire_bytes());
        Ok(())
    }

    pub fn remove(&mut self, i: usize) -> Result<T> {
        check_get(i, self.items.len())?;
        let v = self.items.remove(i);
        self.dirty = true;
        self.record(OpType::ListRemove, i as i32, Vec::new());
        Ok(v)
    }

    pub fn set_all(&mut self, items: Vec<T>) -> Result<()> {
        self.items = items;
        self.dirty = true;
        if self.rec {
            let data = self.encode_field()?;
            self.record(OpType::ListReplace, NO_LIST_INDEX, data);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.dirty = true;
        self.record(OpType::Clear, NO_LIST_INDEX, Vec::new());
    }

    pub fn values(&self) -> &[T] {
        &self.items
    }
}

/// Byte-string or text list. Entries encode as `(u32 length, bytes)`
/// back to back, padded to 8 as a whole. Text entries are checked UTF-8
/// at the accessor boundary.
#[derive(Clone, Debug)]
pub struct BlobList {
    field_num: u16,
    ty: FieldType,
    items: Vec<Vec<u8>>,
    dirty: bool,
    rec: bool,
    ops: Vec<RecordedOp>,
}

impl BlobList {
    view_plumbing!();

    pub(crate) fn new(field_num: u16, ty: FieldType) -> BlobList {
        BlobList {
            field_num,
            ty,
            items: Vec::new(),
            dirty: false,
            rec: false,
            ops: Vec::new(),
        }
    }

    pub(crate) fn parse(field_num: u16, ty: FieldType, bytes: &[u8]) -> Result<BlobList> {
        let (_, _, final40) = decode_header(bytes)?;
        let total = final40 as usize;
        if total < HEADER_LEN || HEADER_LEN + pad8(total - HEADER_LEN) > bytes.len() {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated blob list"));
        }
        let mut items = Vec::new();
        let mut off = HEADER_LEN;
        while off < total {
            if off + 4 > total {
                return Err(kerr(ErrorKind::InvalidEncoding, "blob list ends mid-entry"));
            }
            let len = u32::from_le_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]) as usize;
            off += 4;
            if off + len > total {
                return Err(kerr(ErrorKind::InvalidEncoding, "blob list entry overruns body"));
            }
            items.push(bytes[off..off + len].to_vec());
            off += len;
        }
        let mut list = BlobList::new(field_num, ty);
        list.items = items;
        Ok(list)
    }

    pub fn encode_field(&mut self) -> Result<Vec<u8>> {
        let body: usize = self.items.iter().map(|b| 4 + b.len()).sum();
        let mut buf = Vec::with_capacity(HEADER_LEN + pad8(body));
        buf.resize(HEADER_LEN, 0);
        encode_header(&mut buf, self.field_num, self.ty, (HEADER_LEN + body) as u64)?;
        for item in &self.items {
            buf.extend_from_slice(&(item.len() as u32).to_le_bytes());
            buf.extend_from_slice(item);
        }
        buf.resize(HEADER_LEN + pad8(body), 0);
        Ok(buf)
    }

    fn check_text(&self, v: &[u8]) -> Result<()> {
        if self.ty == FieldType::ListStrings && std::str::from_utf8(v).is_err() {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "string list entry is not valid utf-8",
            ));
        }
        Ok(())
    }

    pub fn get_bytes(&self, i: usize) -> Result<&[u8]> {
        check_get(i, self.items.len())?;
        Ok(&self.items[i])
    }

    pub fn get_str(&self, i: usize) -> Result<&str> {
        let b = self.get_bytes(i)?;
        std::str::from_utf8(b)
            .map_err(|_| kerr(ErrorKind::InvalidEncoding, "string list entry is not valid utf-8"))
    }

    pub fn set(&mut self, i: usize, v: &[u8]) -> Result<()> {
        check_get(i, self.items.len())?;
        self.check_text(v)?;
        self.items[i] = v.to_vec();
        self.dirty = true;
        self.record(OpType::ListSet, i as i32, v.to_vec());
        Ok(())
    }

    pub fn push(&mut self, v: &[u8]) -> Result<()> {
        self.check_text(v)?;
        let i = self.items.len();
        self.items.push(v.to_vec());
        self.dirty = true;
        self.record(OpType::ListInsert, i as i32, v.to_vec());
        Ok(())
    }

    pub fn push_str(&mut self, v: &str) -> Result<()> {
        self.push(v.as_bytes())
    }

    pub fn insert(&mut self, i: usize, v: &[u8]) -> Result<()> {
        check_insert(i, self.items.len())?;
        self.check_text(v)?;
        self.items.insert(i, v.to_vec());
        self.dirty = true;
        self.record(OpType::ListInsert, i as i32, v.to_vec());
        Ok(())
    }

    pub fn remove(&mut self, i: usize) -> Result<Vec<u8>> {
        check_get(i, self.items.len())?;
        let v = self.items.remove(i);
        self.dirty = true;
        self.record(OpType::ListRemove, i as i32, Vec::new());
        Ok(v)
    }

    pub fn set_all(&mut self, items: Vec<Vec<u8>>) -> Result<()> {
        for v in &items {
            self.check_text(v)?;
        }
        self.items = items;
        self.dirty = true;
        if self.rec {
            let data = self.encode_field()?;
            self.record(OpType::ListReplace, NO_LIST_INDEX, data);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.dirty = true;
        self.record(OpType::Clear, NO_LIST_INDEX, Vec::new());
    }

    pub fn values(&self) -> &[Vec<u8>] {
        &self.items
    }
}

/// List of nested structs. On sync each child's root header gets its
/// field number rewritten to the child's index in the list.
#[derive(Clone, Debug)]
pub struct StructList {
    field_num: u16,
    mapping: Arc<Mapping>,
    items: Vec<Struct>,
    dirty: bool,
    rec: bool,
    ops: Vec<RecordedOp>,
}

impl StructList {
    view_plumbing!();

    pub(crate) fn new(field_num: u16, mapping: Arc<Mapping>) -> StructList {
        StructList {
            field_num,
            mapping,
            items: Vec::new(),
            dirty: false,
            rec: false,
            ops: Vec::new(),
        }
    }

    pub(crate) fn parse(field_num: u16, mapping: Arc<Mapping>, bytes: &[u8]) -> Result<StructList> {
        let (_, _, final40) = decode_header(bytes)?;
        let total = final40 as usize;
        if total < HEADER_LEN || total > bytes.len() {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated struct list"));
        }
        let mut items = Vec::new();
        let mut off = HEADER_LEN;
        while off < total {
            let (num, ty, child_total) = decode_header(&bytes[off..])?;
            if ty != FieldType::Struct {
                return Err(kerr(
                    ErrorKind::InvalidEncoding,
                    "struct list item is not a struct",
                ));
            }
            if num as usize != items.len() {
                return Err(kerr(
                    ErrorKind::InvalidEncoding,
                    "struct list item numbered out of sequence",
                ));
            }
            let size = child_total as usize;
            if size < HEADER_LEN || size % 8 != 0 || off + size > total {
                return Err(kerr(
                    ErrorKind::InvalidEncoding,
                    "struct list item overruns body",
                ));
            }
            let mut child = Struct::new(&mapping)?;
            child.unmarshal(bytes[off..off + size].to_vec())?;
            items.push(child);
            off += size;
        }
        let mut list = StructList::new(field_num, mapping);
        list.items = items;
        Ok(list)
    }

    pub fn encode_field(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HEADER_LEN];
        for (i, item) in self.items.iter_mut().enumerate() {
            item.prepare_embed()?;
            let start = buf.len();
            buf.extend_from_slice(item.segment_bytes());
            set_field_num(&mut buf[start..], i as u16)?;
        }
        let total = buf.len() as u64;
        encode_header(&mut buf, self.field_num, FieldType::ListStructs, total)?;
        Ok(buf)
    }

    pub fn item_mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    fn check_item(&self, child: &Struct) -> Result<()> {
        if child.mapping().path != self.mapping.path {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                format!(
                    "list holds {}, not {}",
                    self.mapping.path,
                    child.mapping().path
                ),
            ));
        }
        Ok(())
    }

    fn item_data(&mut self, i: usize) -> Result<Vec<u8>> {
        self.items[i].prepare_embed()?;
        Ok(self.items[i].segment_bytes().to_vec())
    }

    pub fn get(&self, i: usize) -> Result<&Struct> {
        check_get(i, self.items.len())?;
        Ok(&self.items[i])
    }

    /// Mutable access to one child. Marks the list dirty, since the child
    /// may be edited through the borrow.
    pub fn get_mut(&mut self, i: usize) -> Result<&mut Struct> {
        check_get(i, self.items.len())?;
        self.dirty = true;
        Ok(&mut self.items[i])
    }

    pub fn set(&mut self, i: usize, child: Struct) -> Result<()> {
        check_get(i, self.items.len())?;
        self.check_item(&child)?;
        self.items[i] = child;
        self.dirty = true;
        if self.rec {
            let data = self.item_data(i)?;
            self.record(OpType::ListSet, i as i32, data);
        }
        Ok(())
    }

    pub fn push(&mut self, child: Struct) -> Result<()> {
        self.check_item(&child)?;
        let i = self.items.len();
        self.items.push(child);
        self.dirty = true;
        if self.rec {
            let data = self.item_data(i)?;
            self.record(OpType::ListInsert, i as i32, data);
        }
        Ok(())
    }

    pub fn insert(&mut self, i: usize, child: Struct) -> Result<()> {
        check_insert(i, self.items.len())?;
        self.check_item(&child)?;
        self.items.insert(i, child);
        self.dirty = true;
        if self.rec {
            let data = self.item_data(i)?;
            self.record(OpType::ListInsert, i as i32, data);
        }
        Ok(())
    }

    pub fn remove(&mut self, i: usize) -> Result<Struct> {
        check_get(i, self.items.len())?;
        let v = self.items.remove(i);
        self.dirty = true;
        self.record(OpType::ListRemove, i as i32, Vec::new());
        Ok(v)
    }

    pub fn set_all(&mut self, items: Vec<Struct>) -> Result<()> {
        for child in &items {
            self.check_item(child)?;
        }
        self.items = items;
        self.dirty = true;
        if self.rec {
            let data = self.encode_field()?;
            self.record(OpType::ListReplace, NO_LIST_INDEX, data);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.dirty = true;
        self.record(OpType::Clear, NO_LIST_INDEX, Vec::new());
    }
}
