use crate::header::{
    decode_header, unpack_any_final40, unpack_map_final40, FieldType, HEADER_LEN,
};
use crate::segment::pad8;
use claw_base::{err, kerr, ErrorKind, Result};
use rapidhash::RapidHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// One field of a struct schema. Field numbers are 0-based positions in the
/// descriptor list; `validate` enforces the correspondence.
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_num: u16,
    pub field_type: FieldType,
    /// Child mapping for `Struct`, `ListStructs`, and maps with struct
    /// values. `None` with `self_referential` set means "this struct's own
    /// mapping", which avoids an ownership cycle for recursive types.
    pub nested: Option<Arc<Mapping>>,
    pub self_referential: bool,
    /// Maps only; `Unknown` otherwise.
    pub key_type: FieldType,
    pub value_type: FieldType,
}

impl FieldDescriptor {
    pub fn scalar(name: &str, field_num: u16, field_type: FieldType) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_owned(),
            field_num,
            field_type,
            nested: None,
            self_referential: false,
            key_type: FieldType::Unknown,
            value_type: FieldType::Unknown,
        }
    }

    pub fn nested_struct(name: &str, field_num: u16, mapping: &Arc<Mapping>) -> FieldDescriptor {
        let mut fd = FieldDescriptor::scalar(name, field_num, FieldType::Struct);
        fd.nested = Some(mapping.clone());
        fd
    }

    pub fn struct_list(name: &str, field_num: u16, mapping: &Arc<Mapping>) -> FieldDescriptor {
        let mut fd = FieldDescriptor::scalar(name, field_num, FieldType::ListStructs);
        fd.nested = Some(mapping.clone());
        fd
    }

    pub fn self_struct(name: &str, field_num: u16) -> FieldDescriptor {
        let mut fd = FieldDescriptor::scalar(name, field_num, FieldType::Struct);
        fd.self_referential = true;
        fd
    }

    pub fn map(
        name: &str,
        field_num: u16,
        key_type: FieldType,
        value_type: FieldType,
        value_mapping: Option<&Arc<Mapping>>,
    ) -> FieldDescriptor {
        let mut fd = FieldDescriptor::scalar(name, field_num, FieldType::Map);
        fd.key_type = key_type;
        fd.value_type = value_type;
        fd.nested = value_mapping.cloned();
        fd
    }

    /// Resolve the child mapping, substituting `owner` for self-references.
    pub fn child(&self, owner: &Arc<Mapping>) -> Option<Arc<Mapping>> {
        if self.self_referential {
            Some(owner.clone())
        } else {
            self.nested.clone()
        }
    }
}

/// Schema descriptor for one struct type. Initialised once, then read-only
/// and freely shared across structs and threads.
#[derive(Debug)]
pub struct Mapping {
    pub name: String,
    pub package: String,
    pub path: String,
    pub fields: Vec<FieldDescriptor>,
    init_done: AtomicBool,
    ops: OnceLock<Vec<&'static FieldOps>>,
}

impl Mapping {
    pub fn new(
        name: &str,
        package: &str,
        fields: Vec<FieldDescriptor>,
    ) -> Arc<Mapping> {
        Arc::new(Mapping {
            name: name.to_owned(),
            package: package.to_owned(),
            path: format!("{}.{}", package, name),
            fields,
            init_done: AtomicBool::new(false),
            ops: OnceLock::new(),
        })
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Idempotent: validates the descriptors and populates the per-field
    /// dispatch table, recursing through nested mappings. The done flag is
    /// set before recursion so self-referential mappings do not loop.
    pub fn init(self: &Arc<Self>) -> Result<()> {
        if self.init_done.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.validate() {
            self.init_done.store(false, Ordering::Release);
            return Err(e);
        }
        let mut ops = Vec::with_capacity(self.fields.len());
        for fd in &self.fields {
            ops.push(ops_for(fd.field_type));
        }
        let _ = self.ops.set(ops);
        for fd in &self.fields {
            if let Some(child) = fd.nested.as_ref() {
                child.init()?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (i, fd) in self.fields.iter().enumerate() {
            if fd.field_num as usize != i {
                return Err(kerr(
                    ErrorKind::SchemaInvalid,
                    format!(
                        "field {} has number {} but sits at position {}",
                        fd.name, fd.field_num, i
                    ),
                ));
            }
            match fd.field_type {
                FieldType::Unknown => {
                    return Err(kerr(
                        ErrorKind::SchemaInvalid,
                        format!("field {} has unknown type", fd.name),
                    ));
                }
                FieldType::Struct | FieldType::ListStructs => {
                    if fd.nested.is_none() && !fd.self_referential {
                        return Err(kerr(
                            ErrorKind::SchemaInvalid,
                            format!("struct field {} has no nested mapping", fd.name),
                        ));
                    }
                }
                FieldType::Map => {
                    if !valid_map_key_type(fd.key_type) {
                        return Err(kerr(
                            ErrorKind::SchemaInvalid,
                            format!("map field {} has invalid key type", fd.name),
                        ));
                    }
                    if !valid_map_value_type(fd.value_type) {
                        return Err(kerr(
                            ErrorKind::SchemaInvalid,
                            format!("map field {} has invalid value type", fd.name),
                        ));
                    }
                    if fd.value_type == FieldType::Struct
                        && fd.nested.is_none()
                        && !fd.self_referential
                    {
                        return Err(kerr(
                            ErrorKind::SchemaInvalid,
                            format!(
                                "map field {} with struct values has no value mapping",
                                fd.name
                            ),
                        ));
                    }
                }
                _ => {
                    if fd.nested.is_some() {
                        return Err(kerr(
                            ErrorKind::SchemaInvalid,
                            format!("non-struct field {} carries a nested mapping", fd.name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn field_ops(&self, field_num: u16) -> Result<&'static FieldOps> {
        self.ops
            .get()
            .and_then(|v| v.get(field_num as usize))
            .copied()
            .ok_or_else(|| err("mapping not initialised before use"))
    }
}

fn valid_map_key_type(ty: FieldType) -> bool {
    ty.is_scalar() || matches!(ty, FieldType::String | FieldType::Bytes)
}

fn valid_map_value_type(ty: FieldType) -> bool {
    ty.is_scalar() || matches!(ty, FieldType::String | FieldType::Bytes | FieldType::Struct)
}

/// Per-field dispatch entries, selected by type tag at init time so the hot
/// paths (index parse, apply) never re-match on the tag.
#[derive(Debug)]
pub(crate) struct FieldOps {
    /// Total encoded footprint of a field whose bytes start at `bytes[0]`,
    /// header and padding included. `bytes` extends to the end of the
    /// enclosing body.
    pub(crate) scan_size: fn(bytes: &[u8], final40: u64) -> Result<usize>,
}

fn scan_packed_scalar(_bytes: &[u8], _final40: u64) -> Result<usize> {
    Ok(HEADER_LEN)
}

fn scan_wide_scalar(_bytes: &[u8], _final40: u64) -> Result<usize> {
    Ok(HEADER_LEN + 8)
}

fn scan_blob(_bytes: &[u8], final40: u64) -> Result<usize> {
    Ok(HEADER_LEN + pad8(final40 as usize))
}

fn scan_struct(_bytes: &[u8], final40: u64) -> Result<usize> {
    let total = final40 as usize;
    if total < HEADER_LEN || total % 8 != 0 {
        return Err(kerr(ErrorKind::InvalidEncoding, "bad struct total size"));
    }
    Ok(total)
}

fn scan_bool_list(_bytes: &[u8], final40: u64) -> Result<usize> {
    // final40 carries the item count for packed bools.
    Ok(HEADER_LEN + pad8((final40 as usize).div_ceil(8)))
}

fn scan_sized_list(_bytes: &[u8], final40: u64) -> Result<usize> {
    let total = final40 as usize;
    if total < HEADER_LEN {
        return Err(kerr(ErrorKind::InvalidEncoding, "list size below header"));
    }
    Ok(HEADER_LEN + pad8(total - HEADER_LEN))
}

fn scan_map(_bytes: &[u8], final40: u64) -> Result<usize> {
    let (_, _, total) = unpack_map_final40(final40);
    let total = total as usize;
    if total < HEADER_LEN {
        return Err(kerr(ErrorKind::InvalidEncoding, "map size below header"));
    }
    Ok(HEADER_LEN + pad8(total - HEADER_LEN))
}

fn scan_any(_bytes: &[u8], final40: u64) -> Result<usize> {
    let (_, data_size) = unpack_any_final40(final40);
    Ok(HEADER_LEN + pad8(data_size as usize))
}

fn scan_any_list(bytes: &[u8], final40: u64) -> Result<usize> {
    // final40 carries the item count; each item is a 16-byte type hash
    // followed by an inner struct whose own header sizes it.
    let mut off = HEADER_LEN;
    for _ in 0..final40 {
        let inner_off = off + 16;
        if inner_off + HEADER_LEN > bytes.len() {
            return Err(kerr(ErrorKind::InvalidEncoding, "truncated any list"));
        }
        let (_, ty, inner_total) = decode_header(&bytes[inner_off..])?;
        if ty != FieldType::Struct {
            return Err(kerr(
                ErrorKind::InvalidEncoding,
                "any list item is not a struct",
            ));
        }
        off = inner_off + scan_struct(&bytes[inner_off..], inner_total)?;
    }
    Ok(off)
}

static PACKED_SCALAR_OPS: FieldOps = FieldOps {
    scan_size: scan_packed_scalar,
};
static WIDE_SCALAR_OPS: FieldOps = FieldOps {
    scan_size: scan_wide_scalar,
};
static BLOB_OPS: FieldOps = FieldOps { scan_size: scan_blob };
static STRUCT_OPS: FieldOps = FieldOps {
    scan_size: scan_struct,
};
static BOOL_LIST_OPS: FieldOps = FieldOps {
    scan_size: scan_bool_list,
};
static SIZED_LIST_OPS: FieldOps = FieldOps {
    scan_size: scan_sized_list,
};
static MAP_OPS: FieldOps = FieldOps { scan_size: scan_map };
static ANY_OPS: FieldOps = FieldOps { scan_size: scan_any };
static ANY_LIST_OPS: FieldOps = FieldOps {
    scan_size: scan_any_list,
};

fn ops_for(ty: FieldType) -> &'static FieldOps {
    match ty {
        FieldType::Int64 | FieldType::Uint64 | FieldType::Float64 => &WIDE_SCALAR_OPS,
        FieldType::String | FieldType::Bytes => &BLOB_OPS,
        FieldType::Struct => &STRUCT_OPS,
        FieldType::ListBools => &BOOL_LIST_OPS,
        FieldType::Map => &MAP_OPS,
        FieldType::Any => &ANY_OPS,
        FieldType::ListAny => &ANY_LIST_OPS,
        t if t.is_list() => &SIZED_LIST_OPS,
        _ => &PACKED_SCALAR_OPS,
    }
}

// Process-wide descriptor registry, keyed by `package.name` path. Lazily
// created, never torn down.

static REGISTRY: OnceLock<RwLock<RapidHashMap<String, Arc<Mapping>>>> = OnceLock::new();

fn registry() -> &'static RwLock<RapidHashMap<String, Arc<Mapping>>> {
    REGISTRY.get_or_init(Default::default)
}

pub fn register_mapping(mapping: &Arc<Mapping>) -> Result<()> {
    mapping.init()?;
    let mut reg = registry()
        .write()
        .map_err(|_| err("mapping registry poisoned"))?;
    reg.insert(mapping.path.clone(), mapping.clone());
    Ok(())
}

pub fn lookup_mapping(path: &str) -> Option<Arc<Mapping>> {
    registry().read().ok()?.get(path).cloned()
}
