use claw_base::{kerr, ErrorKind, Result};

/// Every field starts with one of these.
pub const HEADER_LEN: usize = 8;

/// Largest value the 40-bit header payload can carry.
pub const MAX_FINAL40: u64 = (1 << 40) - 1;

/// Largest encodable map field, header included. The map header spends 16 of
/// its payload bits on key/value type tags, leaving 24 bits of size.
pub const MAX_MAP_SIZE: u64 = (1 << 24) - 1;

/// Wire type tags. These are wire contract and must not be renumbered.
/// 15..=40 are reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldType {
    Unknown = 0,
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    Uint8 = 6,
    Uint16 = 7,
    Uint32 = 8,
    Uint64 = 9,
    Float32 = 10,
    Float64 = 11,
    String = 12,
    Bytes = 13,
    Struct = 14,
    ListBools = 41,
    ListInt8 = 42,
    ListInt16 = 43,
    ListInt32 = 44,
    ListInt64 = 45,
    ListUint8 = 46,
    ListUint16 = 47,
    ListUint32 = 48,
    ListUint64 = 49,
    ListFloat32 = 50,
    ListFloat64 = 51,
    ListBytes = 52,
    ListStrings = 53,
    ListStructs = 54,
    Map = 55,
    Any = 56,
    ListAny = 57,
}

impl FieldType {
    pub fn from_u8(v: u8) -> FieldType {
        match v {
            1 => FieldType::Bool,
            2 => FieldType::Int8,
            3 => FieldType::Int16,
            4 => FieldType::Int32,
            5 => FieldType::Int64,
            6 => FieldType::Uint8,
            7 => FieldType::Uint16,
            8 => FieldType::Uint32,
            9 => FieldType::Uint64,
            10 => FieldType::Float32,
            11 => FieldType::Float64,
            12 => FieldType::String,
            13 => FieldType::Bytes,
            14 => FieldType::Struct,
            41 => FieldType::ListBools,
            42 => FieldType::ListInt8,
            43 => FieldType::ListInt16,
            44 => FieldType::ListInt32,
            45 => FieldType::ListInt64,
            46 => FieldType::ListUint8,
            47 => FieldType::ListUint16,
            48 => FieldType::ListUint32,
            49 => FieldType::ListUint64,
            50 => FieldType::ListFloat32,
            51 => FieldType::ListFloat64,
            52 => FieldType::ListBytes,
            53 => FieldType::ListStrings,
            54 => FieldType::ListStructs,
            55 => FieldType::Map,
            56 => FieldType::Any,
            57 => FieldType::ListAny,
            _ => FieldType::Unknown,
        }
    }

    /// Scalars whose value is stored entirely in the header payload.
    pub fn is_packed_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::Bool
                | FieldType::Int8
                | FieldType::Int16
                | FieldType::Int32
                | FieldType::Uint8
                | FieldType::Uint16
                | FieldType::Uint32
                | FieldType::Float32
        )
    }

    /// Scalars that spill 8 bytes after the header.
    pub fn is_wide_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::Int64 | FieldType::Uint64 | FieldType::Float64
        )
    }

    pub fn is_scalar(&self) -> bool {
        self.is_packed_scalar() || self.is_wide_scalar()
    }

    pub fn is_numeric_list(&self) -> bool {
        matches!(
            *self as u8,
            v if (FieldType::ListInt8 as u8..=FieldType::ListFloat64 as u8).contains(&v)
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(
            *self as u8,
            v if (FieldType::ListBools as u8..=FieldType::ListStructs as u8).contains(&v)
        ) || *self == FieldType::ListAny
    }
}

/// Write an 8-byte field header. The payload region (bytes 3..8) is written
/// whole, so repeated updates of the same header stay idempotent.
pub fn encode_header(buf: &mut [u8], field_num: u16, ty: FieldType, final40: u64) -> Result<()> {
    if buf.len() < HEADER_LEN {
        return Err(kerr(
            ErrorKind::MalformedHeader,
            "header buffer shorter than 8 bytes",
        ));
    }
    if final40 > MAX_FINAL40 {
        return Err(kerr(ErrorKind::InvalidEncoding, "final40 overflow"));
    }
    buf[0..2].copy_from_slice(&field_num.to_le_bytes());
    buf[2] = ty as u8;
    buf[3..8].copy_from_slice(&final40.to_le_bytes()[0..5]);
    Ok(())
}

pub fn decode_header(buf: &[u8]) -> Result<(u16, FieldType, u64)> {
    if buf.len() < HEADER_LEN {
        return Err(kerr(
            ErrorKind::MalformedHeader,
            "buffer too short to hold a field header",
        ));
    }
    let field_num = u16::from_le_bytes([buf[0], buf[1]]);
    let ty = FieldType::from_u8(buf[2]);
    let mut b = [0u8; 8];
    b[0..5].copy_from_slice(&buf[3..8]);
    Ok((field_num, ty, u64::from_le_bytes(b)))
}

pub fn set_field_num(buf: &mut [u8], field_num: u16) -> Result<()> {
    if buf.len() < HEADER_LEN {
        return Err(kerr(
            ErrorKind::MalformedHeader,
            "header buffer shorter than 8 bytes",
        ));
    }
    buf[0..2].copy_from_slice(&field_num.to_le_bytes());
    Ok(())
}

pub fn set_final40(buf: &mut [u8], final40: u64) -> Result<()> {
    if buf.len() < HEADER_LEN {
        return Err(kerr(
            ErrorKind::MalformedHeader,
            "header buffer shorter than 8 bytes",
        ));
    }
    if final40 > MAX_FINAL40 {
        return Err(kerr(ErrorKind::InvalidEncoding, "final40 overflow"));
    }
    buf[3..8].copy_from_slice(&final40.to_le_bytes()[0..5]);
    Ok(())
}

// Map headers subdivide the payload: key type (8 bits), value type (8 bits),
// total size including the header (24 bits).

pub fn pack_map_final40(key: FieldType, value: FieldType, total_size: u64) -> Result<u64> {
    if total_size > MAX_MAP_SIZE {
        return Err(kerr(
            ErrorKind::InvalidEncoding,
            "map larger than the 24-bit size field allows",
        ));
    }
    Ok((key as u8 as u64) | ((value as u8 as u64) << 8) | (total_size << 16))
}

pub fn unpack_map_final40(final40: u64) -> (FieldType, FieldType, u64) {
    let key = FieldType::from_u8((final40 & 0xff) as u8);
    let value = FieldType::from_u8(((final40 >> 8) & 0xff) as u8);
    let total_size = final40 >> 16;
    (key, value, total_size)
}

// Any headers subdivide the payload: inner type tag (8 bits), body size
// before padding (32 bits).

pub fn pack_any_final40(inner: FieldType, data_size: u64) -> Result<u64> {
    if data_size > u32::MAX as u64 {
        return Err(kerr(
            ErrorKind::InvalidEncoding,
            "any body larger than the 32-bit size field allows",
        ));
    }
    Ok((inner as u8 as u64) | (data_size << 8))
}

pub fn unpack_any_final40(final40: u64) -> (FieldType, u64) {
    (FieldType::from_u8((final40 & 0xff) as u8), final40 >> 8)
}
