use crate::ops::{Op, Patch, MAX_PATCH_NESTING_DEPTH, MAX_PATCH_OPS, PATCH_VERSION};
use claw_base::{kerr, ErrorKind, Result};
use claw_seg::{
    decode_map_op_data, AnyValue, FieldDescriptor, FieldType, OpType, Prim, Struct,
};

/// Apply `patch` to `target` in place. Unknown op types and unknown field
/// numbers are skipped for forward compatibility; oversized or over-deep
/// patches are refused; bad op payloads abort with an error naming the
/// field, leaving the target in an undefined but safe state the caller
/// should discard.
pub fn apply(target: &mut Struct, patch: &Patch) -> Result<()> {
    if patch.version != PATCH_VERSION {
        return Err(kerr(
            ErrorKind::PatchVersionMismatch,
            format!("patch version {} is not {}", patch.version, PATCH_VERSION),
        ));
    }
    if patch.ops.len() > MAX_PATCH_OPS {
        return Err(kerr(
            ErrorKind::PatchTooLarge,
            format!("{} ops exceeds the {} limit", patch.ops.len(), MAX_PATCH_OPS),
        ));
    }
    apply_ops(target, &patch.ops, 0)
}

/// Decode a serialized patch and apply it.
pub fn apply_bytes(target: &mut Struct, patch_bytes: &[u8]) -> Result<()> {
    let patch = Patch::unmarshal(patch_bytes)?;
    apply(target, &patch)
}

fn apply_ops(target: &mut Struct, ops: &[Op], depth: usize) -> Result<()> {
    if depth > MAX_PATCH_NESTING_DEPTH {
        return Err(kerr(
            ErrorKind::PatchTooDeep,
            format!("struct patches nested beyond {}", MAX_PATCH_NESTING_DEPTH),
        ));
    }
    for op in ops {
        apply_op(target, op, depth)?;
    }
    Ok(())
}

fn apply_op(target: &mut Struct, op: &Op, depth: usize) -> Result<()> {
    let Some(kind) = OpType::from_u8(op.op_type) else {
        return Ok(());
    };
    let n = op.field_num;
    let fd = match target.descriptor(n) {
        Some(fd) => fd.clone(),
        None => return Ok(()),
    };
    match kind {
        OpType::Set => target.set_field_wire(n, &op.data).map_err(|e| match e.kind() {
            ErrorKind::InvalidEncoding | ErrorKind::MalformedHeader => kerr(
                ErrorKind::PatchMalformed,
                format!("bad set payload for field {}", fd.name),
            ),
            _ => e,
        }),
        OpType::Clear => target.clear_field(n),
        OpType::StructPatch => {
            if fd.field_type != FieldType::Struct {
                return Err(kerr(
                    ErrorKind::PatchMalformed,
                    format!("struct patch on non-struct field {}", fd.name),
                ));
            }
            let sub = Patch::unmarshal(&op.data)?;
            let mut child = target.struct_view(n)?;
            apply_ops(&mut child, &sub.ops, depth + 1)?;
            target.set_struct(n, &mut child)
        }
        OpType::ListReplace => target
            .apply_list_replace(n, &op.data)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidEncoding | ErrorKind::MalformedHeader => kerr(
                    ErrorKind::PatchMalformed,
                    format!("bad replacement list for field {}", fd.name),
                ),
                _ => e,
            }),
        OpType::ListSet | OpType::ListInsert | OpType::ListRemove | OpType::ListStructPatch => {
            apply_list_op(target, &fd, op, kind, depth)
        }
        OpType::MapSet | OpType::MapDelete => apply_map_op(target, &fd, op, kind),
    }
}

fn short_item(fd: &FieldDescriptor) -> claw_base::Error {
    kerr(
        ErrorKind::PatchMalformed,
        format!("list op payload too short for field {}", fd.name),
    )
}

fn apply_list_op(
    target: &mut Struct,
    fd: &FieldDescriptor,
    op: &Op,
    kind: OpType,
    depth: usize,
) -> Result<()> {
    if op.index < 0 {
        return Err(kerr(
            ErrorKind::OutOfBounds,
            format!("negative list index on field {}", fd.name),
        ));
    }
    let n = op.field_num;
    let i = op.index as usize;

    macro_rules! num_arm {
        ($t:ty, $acc:ident) => {{
            let list = target.$acc(n)?;
            match kind {
                OpType::ListSet => {
                    if op.data.len() < <$t as Prim>::WIDTH {
                        return Err(short_item(fd));
                    }
                    list.set(i, <$t as Prim>::read_wire(&op.data))
                }
                OpType::ListInsert => {
                    if op.data.len() < <$t as Prim>::WIDTH {
                        return Err(short_item(fd));
                    }
                    list.insert(i, <$t as Prim>::read_wire(&op.data))
                }
                OpType::ListRemove => list.remove(i).map(|_| ()),
                _ => Err(kerr(
                    ErrorKind::PatchMalformed,
                    format!("struct patch on non-struct list field {}", fd.name),
                )),
            }
        }};
    }

    match fd.field_type {
        FieldType::ListBools => {
            let list = target.list_bools(n)?;
            match kind {
                OpType::ListSet => {
                    let b = op.data.first().ok_or_else(|| short_item(fd))?;
                    list.set(i, *b != 0)
                }
                OpType::ListInsert => {
                    let b = op.data.first().ok_or_else(|| short_item(fd))?;
                    list.insert(i, *b != 0)
                }
                OpType::ListRemove => list.remove(i).map(|_| ()),
                _ => Err(kerr(
                    ErrorKind::PatchMalformed,
                    format!("struct patch on non-struct list field {}", fd.name),
                )),
            }
        }
        FieldType::ListInt8 => num_arm!(i8, list_i8),
        FieldType::ListInt16 => num_arm!(i16, list_i16),
        FieldType::ListInt32 => num_arm!(i32, list_i32),
        FieldType::ListInt64 => num_arm!(i64, list_i64),
        FieldType::ListUint8 => num_arm!(u8, list_u8),
        FieldType::ListUint16 => num_arm!(u16, list_u16),
        FieldType::ListUint32 => num_arm!(u32, list_u32),
        FieldType::ListUint64 => num_arm!(u64, list_u64),
        FieldType::ListFloat32 => num_arm!(f32, list_f32),
        FieldType::ListFloat64 => num_arm!(f64, list_f64),
        FieldType::ListBytes | FieldType::ListStrings => {
            let list = if fd.field_type == FieldType::ListBytes {
                target.list_bytes(n)?
            } else {
                target.list_strings(n)?
            };
            match kind {
                OpType::ListSet => list.set(i, &op.data),
                OpType::ListInsert => list.insert(i, &op.data),
                OpType::ListRemove => list.remove(i).map(|_| ()),
                _ => Err(kerr(
                    ErrorKind::PatchMalformed,
                    format!("struct patch on non-struct list field {}", fd.name),
                )),
            }
        }
        FieldType::ListStructs => {
            let child_mapping = fd.child(target.mapping()).ok_or_else(|| {
                kerr(ErrorKind::SchemaInvalid, "struct list has no mapping")
            })?;
            match kind {
                OpType::ListSet | OpType::ListInsert => {
                    let child =
                        Struct::from_bytes(&child_mapping, op.data.clone()).map_err(|_| {
                            kerr(
                                ErrorKind::PatchMalformed,
                                format!("bad struct payload for list field {}", fd.name),
                            )
                        })?;
                    let list = target.list_structs(n)?;
                    if kind == OpType::ListSet {
                        list.set(i, child)
                    } else {
                        list.insert(i, child)
                    }
                }
                OpType::ListRemove => target.list_structs(n)?.remove(i).map(|_| ()),
                OpType::ListStructPatch => {
                    let sub = Patch::unmarshal(&op.data)?;
                    let list = target.list_structs(n)?;
                    let child = list.get_mut(i)?;
                    apply_ops(child, &sub.ops, depth + 1)
                }
                _ => unreachable!(),
            }
        }
        FieldType::ListAny => {
            let list = target.list_any(n)?;
            match kind {
                OpType::ListSet => {
                    let v = AnyValue::decode(&op.data).map_err(|_| short_item(fd))?;
                    list.set(i, v)
                }
                OpType::ListInsert => {
                    let v = AnyValue::decode(&op.data).map_err(|_| short_item(fd))?;
                    list.insert(i, v)
                }
                OpType::ListRemove => list.remove(i).map(|_| ()),
                _ => Err(kerr(
                    ErrorKind::PatchMalformed,
                    format!("struct patch on non-struct list field {}", fd.name),
                )),
            }
        }
        _ => Err(kerr(
            ErrorKind::PatchMalformed,
            format!("list op on non-list field {}", fd.name),
        )),
    }
}

fn apply_map_op(target: &mut Struct, fd: &FieldDescriptor, op: &Op, kind: OpType) -> Result<()> {
    if fd.field_type != FieldType::Map {
        return Err(kerr(
            ErrorKind::PatchMalformed,
            format!("map op on non-map field {}", fd.name),
        ));
    }
    let n = op.field_num;
    let child_mapping = fd.child(target.mapping());
    let want_val = kind == OpType::MapSet;
    let (key, val) = decode_map_op_data(
        fd.key_type,
        fd.value_type,
        child_mapping.as_ref(),
        &op.data,
        want_val,
    )
    .map_err(|_| {
        kerr(
            ErrorKind::PatchMalformed,
            format!("bad map op payload for field {}", fd.name),
        )
    })?;
    let map = target.map(n)?;
    match kind {
        OpType::MapSet => {
            let val = val.ok_or_else(|| {
                kerr(
                    ErrorKind::PatchMalformed,
                    format!("map set without a value for field {}", fd.name),
                )
            })?;
            map.set(key, val)
        }
        OpType::MapDelete => map.delete(&key).map(|_| ()),
        _ => unreachable!(),
    }
}
