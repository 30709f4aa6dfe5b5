/// Operation taxonomy shared by the mutation recorder and the patch engine.
/// The numeric values are wire contract for the patch encoding; they start
/// at 1 so zero-value compression can never drop an op tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpType {
    Set = 1,
    Clear = 2,
    StructPatch = 3,
    ListReplace = 4,
    ListSet = 5,
    ListInsert = 6,
    ListRemove = 7,
    ListStructPatch = 8,
    MapSet = 9,
    MapDelete = 10,
}

impl OpType {
    pub fn from_u8(v: u8) -> Option<OpType> {
        match v {
            1 => Some(OpType::Set),
            2 => Some(OpType::Clear),
            3 => Some(OpType::StructPatch),
            4 => Some(OpType::ListReplace),
            5 => Some(OpType::ListSet),
            6 => Some(OpType::ListInsert),
            7 => Some(OpType::ListRemove),
            8 => Some(OpType::ListStructPatch),
            9 => Some(OpType::MapSet),
            10 => Some(OpType::MapDelete),
            _ => None,
        }
    }
}

/// Index value used by ops that do not address a list element.
pub const NO_LIST_INDEX: i32 = -1;

/// One mutation as observed by a recording struct. Every setter and
/// list/map mutation appends exactly one of these; the tape is not
/// minimised (run the diff engine for minimal patches).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedOp {
    pub field_num: u16,
    pub op: OpType,
    pub index: i32,
    pub data: Vec<u8>,
}

impl RecordedOp {
    pub fn new(field_num: u16, op: OpType, index: i32, data: Vec<u8>) -> RecordedOp {
        RecordedOp {
            field_num,
            op,
            index,
            data,
        }
    }
}
