use claw_base::{kerr, ErrorKind, Result};
use claw_seg::{FieldDescriptor, FieldType, Mapping, OpType, RecordedOp, Struct};
use std::sync::{Arc, OnceLock};

/// Current patch wire version.
pub const PATCH_VERSION: u8 = 1;

/// Largest op count a patch may carry; checked before any mutation.
pub const MAX_PATCH_OPS: usize = 10_000;

/// Deepest `StructPatch` recursion apply will follow.
pub const MAX_PATCH_NESTING_DEPTH: usize = 100;

/// The patch message is a claw struct itself; these are its mappings.
pub(crate) fn op_mapping() -> &'static Arc<Mapping> {
    static M: OnceLock<Arc<Mapping>> = OnceLock::new();
    M.get_or_init(|| {
        Mapping::new(
            "Op",
            "claw.patch",
            vec![
                FieldDescriptor::scalar("field_num", 0, FieldType::Uint16),
                FieldDescriptor::scalar("op_type", 1, FieldType::Uint8),
                FieldDescriptor::scalar("index", 2, FieldType::Int32),
                FieldDescriptor::scalar("data", 3, FieldType::Bytes),
            ],
        )
    })
}

pub(crate) fn patch_mapping() -> &'static Arc<Mapping> {
    static M: OnceLock<Arc<Mapping>> = OnceLock::new();
    M.get_or_init(|| {
        Mapping::new(
            "Patch",
            "claw.patch",
            vec![
                FieldDescriptor::scalar("version", 0, FieldType::Uint8),
                FieldDescriptor::struct_list("ops", 1, op_mapping()),
            ],
        )
    })
}

/// One operation in a patch. `op_type` stays a raw byte on the wire so
/// that unknown future ops can be carried and skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Op {
    pub field_num: u16,
    pub op_type: u8,
    /// List element index; -1 for non-list ops.
    pub index: i32,
    pub data: Vec<u8>,
}

impl Op {
    pub fn new(field_num: u16, op: OpType, index: i32, data: Vec<u8>) -> Op {
        Op {
            field_num,
            op_type: op as u8,
            index,
            data,
        }
    }

    pub fn op(&self) -> Option<OpType> {
        OpType::from_u8(self.op_type)
    }
}

impl From<RecordedOp> for Op {
    fn from(r: RecordedOp) -> Op {
        Op {
            field_num: r.field_num,
            op_type: r.op as u8,
            index: r.index,
            data: r.data,
        }
    }
}

/// An ordered operation log transforming one struct into another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub version: u8,
    pub ops: Vec<Op>,
}

impl Default for Patch {
    fn default() -> Patch {
        Patch::new()
    }
}

impl Patch {
    pub fn new() -> Patch {
        Patch {
            version: PATCH_VERSION,
            ops: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        if self.ops.len() > MAX_PATCH_OPS {
            return Err(kerr(
                ErrorKind::PatchTooLarge,
                format!("{} ops exceeds the {} limit", self.ops.len(), MAX_PATCH_OPS),
            ));
        }
        let mut s = Struct::new(patch_mapping())?;
        s.set_u8(0, self.version)?;
        let list = s.list_structs(1)?;
        for op in &self.ops {
            let mut os = Struct::new(op_mapping())?;
            os.set_u16(0, op.field_num)?;
            os.set_u8(1, op.op_type)?;
            os.set_i32(2, op.index)?;
            os.set_bytes(3, &op.data)?;
            list.push(os)?;
        }
        s.marshal()
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Patch> {
        Patch::decode(bytes).map_err(|e| match e.kind() {
            ErrorKind::PatchVersionMismatch | ErrorKind::PatchTooLarge => e,
            _ => kerr(ErrorKind::PatchMalformed, "undecodable patch"),
        })
    }

    fn decode(bytes: &[u8]) -> Result<Patch> {
        let mut s = Struct::from_bytes(patch_mapping(), bytes.to_vec())?;
        let version = s.get_u8(0)?;
        if version != PATCH_VERSION {
            return Err(kerr(
                ErrorKind::PatchVersionMismatch,
                format!("patch version {} is not {}", version, PATCH_VERSION),
            ));
        }
        let list = s.list_structs(1)?;
        if list.len() > MAX_PATCH_OPS {
            return Err(kerr(
                ErrorKind::PatchTooLarge,
                format!("{} ops exceeds the {} limit", list.len(), MAX_PATCH_OPS),
            ));
        }
        let mut ops = Vec::with_capacity(list.len());
        for i in 0..list.len() {
            let os = list.get_mut(i)?;
            ops.push(Op {
                field_num: os.get_u16(0)?,
                op_type: os.get_u8(1)?,
                index: os.get_i32(2)?,
                data: os.get_bytes(3)?.to_vec(),
            });
        }
        Ok(Patch { version, ops })
    }
}
