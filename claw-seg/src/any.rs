use crate::header::{decode_header, encode_header, FieldType, HEADER_LEN};
use crate::lists::view_plumbing;
use crate::record::{OpType, RecordedOp, NO_LIST_INDEX};
use crate::structs::Struct;
use claw_base::{kerr, ErrorKind, Result};

/// Length of the opaque type-identity digest (a SHAKE-128 hash produced by
/// the schema compiler; the runtime never interprets it).
pub const TYPE_HASH_LEN: usize = 16;

/// Produced by generated code: a value's 16-byte type identity.
pub trait TypeHasher {
    fn type_hash(&self) -> [u8; TYPE_HASH_LEN];
}

/// Produced by generated code: access to the value's underlying struct.
/// These accessors exist for the runtime's benefit; application code
/// should use the generated typed surface instead.
pub trait StructGetter {
    #[doc(hidden)]
    fn get_struct(&self) -> &Struct;
    #[doc(hidden)]
    fn get_struct_mut(&mut self) -> &mut Struct;
}

/// The contract dynamic (`any`) fields and the patch engine program
/// against. Blanket-implemented for everything that hashes and embeds.
pub trait ClawStruct: TypeHasher + StructGetter {
    fn marshal(&mut self) -> Result<Vec<u8>> {
        self.get_struct_mut().marshal()
    }

    fn unmarshal(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.get_struct_mut().unmarshal(bytes)
    }
}

impl<T: TypeHasher + StructGetter> ClawStruct for T {}

/// One dynamic value: its type hash and the encoded bytes of its
/// underlying struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnyValue {
    pub type_hash: [u8; TYPE_HASH_LEN],
    pub bytes: Vec<u8>,
}

impl AnyValue {
    pub fn from_struct<H: ClawStruct>(value: &mut H) -> Result<AnyValue> {
        let type_hash = value.type_hash();
        let inner = value.get_struct_mut();
        inner.prepare_embed()?;
        Ok(AnyValue {
            type_hash,
            bytes: inner.segment_bytes().to_vec(),
        })
    }

    /// Check that `bytes` holds exactly one whole struct.
    pub fn validate(&self) -> Result<()> {
        let (_, ty, total) = decode_header(&self.bytes)?;
        if ty != FieldType::Struct || total as usize != self.bytes.len() {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "any value does not hold one whole struct",
            ));
        }
        Ok(())
    }

    /// The item encoding inside a list body and in op payloads: the hash
    /// followed by the inner struct bytes.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TYPE_HASH_LEN + self.bytes.len());
        out.extend_from_slice(&self.type_hash);
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn decode(data: &[u8]) -> Result<AnyValue> {
        if data.len() < TYPE_HASH_LEN + HEADER_LEN {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "any value shorter than hash and inner header",
            ));
        }
        let mut type_hash = [0u8; TYPE_HASH_LEN];
        type_hash.copy_from_slice(&data[..TYPE_HASH_LEN]);
        let value = AnyValue {
            type_hash,
            bytes: data[TYPE_HASH_LEN..].to_vec(),
        };
        value.validate()?;
        Ok(value)
    }

    /// Read this value into `target` after verifying the type hash.
    pub fn read_into<H: ClawStruct>(&self, target: &mut H) -> Result<()> {
        if self.type_hash != target.type_hash() {
            return Err(kerr(
                ErrorKind::TypeMismatch,
                "stored any hash does not match the target type",
            ));
        }
        target.get_struct_mut().unmarshal(self.bytes.clone())
    }
}

/// In-order sequence of `(hash, struct bytes)` pairs. The wire header's
/// payload carries the item count.
#[derive(Clone, Debug)]
pub struct AnyList {
    field_num: u16,
    items: Vec<AnyValue>,
    dirty: bool,
    rec: bool,
    ops: Vec<RecordedOp>,
}

impl AnyList {
    view_plumbing!();

    pub(crate) fn new(field_num: u16) -> AnyList {
        AnyList {
            field_num,
            items: Vec::new(),
            dirty: false,
            rec: false,
            ops: Vec::new(),
        }
    }

    pub(crate) fn parse(field_num: u16, bytes: &[u8]) -> Result<AnyList> {
        let (_, _, final40) = decode_header(bytes)?;
        let mut items = Vec::with_capacity(final40 as usize);
        let mut off = HEADER_LEN;
        for _ in 0..final40 {
            let inner_off = off + TYPE_HASH_LEN;
            if inner_off + HEADER_LEN > bytes.len() {
                return Err(kerr(ErrorKind::InvalidEncoding, "truncated any list"));
            }
            let (_, ty, inner_total) = decode_header(&bytes[inner_off..])?;
            let inner_total = inner_total as usize;
            if ty != FieldType::Struct
                || inner_total < HEADER_LEN
                || inner_total % 8 != 0
                || inner_off + inner_total > bytes.len()
            {
                return Err(kerr(
                    ErrorKind::InvalidEncoding,
                    "any list item is not a whole struct",
                ));
            }
            let mut type_hash = [0u8; TYPE_HASH_LEN];
            type_hash.copy_from_slice(&bytes[off..off + TYPE_HASH_LEN]);
            items.push(AnyValue {
                type_hash,
                bytes: bytes[inner_off..inner_off + inner_total].to_vec(),
            });
            off = inner_off + inner_total;
        }
        let mut list = AnyList::new(field_num);
        list.items = items;
        Ok(list)
    }

    pub fn encode_field(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HEADER_LEN];
        for item in &self.items {
            buf.extend_from_slice(&item.encoded());
        }
        encode_header(
            &mut buf,
            self.field_num,
            FieldType::ListAny,
            self.items.len() as u64,
        )?;
        Ok(buf)
    }

    pub fn get(&self, i: usize) -> Result<&AnyValue> {
        if i >= self.items.len() {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                format!("index {} past end of list of {}", i, self.items.len()),
            ));
        }
        Ok(&self.items[i])
    }

    /// Read item `i` into `target` after verifying the type hash.
    pub fn get_into<H: ClawStruct>(&self, i: usize, target: &mut H) -> Result<()> {
        self.get(i)?.read_into(target)
    }

    pub fn set(&mut self, i: usize, value: AnyValue) -> Result<()> {
        if i >= self.items.len() {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                format!("index {} past end of list of {}", i, self.items.len()),
            ));
        }
        value.validate()?;
        self.dirty = true;
        if self.rec {
            let data = value.encoded();
            self.record(OpType::ListSet, i as i32, data);
        }
        self.items[i] = value;
        Ok(())
    }

    pub fn push(&mut self, value: AnyValue) -> Result<()> {
        value.validate()?;
        let i = self.items.len();
        self.dirty = true;
        if self.rec {
            let data = value.encoded();
            self.record(OpType::ListInsert, i as i32, data);
        }
        self.items.push(value);
        Ok(())
    }

    pub fn push_struct<H: ClawStruct>(&mut self, value: &mut H) -> Result<()> {
        self.push(AnyValue::from_struct(value)?)
    }

    pub fn insert(&mut self, i: usize, value: AnyValue) -> Result<()> {
        if i > self.items.len() {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                format!("insert index {} past end of list of {}", i, self.items.len()),
            ));
        }
        value.validate()?;
        self.dirty = true;
        if self.rec {
            let data = value.encoded();
            self.record(OpType::ListInsert, i as i32, data);
        }
        self.items.insert(i, value);
        Ok(())
    }

    pub fn remove(&mut self, i: usize) -> Result<AnyValue> {
        if i >= self.items.len() {
            return Err(kerr(
                ErrorKind::OutOfBounds,
                format!("index {} past end of list of {}", i, self.items.len()),
            ));
        }
        let v = self.items.remove(i);
        self.dirty = true;
        self.record(OpType::ListRemove, i as i32, Vec::new());
        Ok(v)
    }

    pub fn set_all(&mut self, items: Vec<AnyValue>) -> Result<()> {
        for v in &items {
            v.validate()?;
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

    pub fn values(&self) -> &[AnyValue] {
        &self.items
    }
}
