use crate::ops::{Op, Patch};
use claw_base::{kerr, ErrorKind, Result};
use claw_seg::{FieldType, MapKey, OpType, Prim, Struct, NO_LIST_INDEX};

/// Compute the minimal operation log turning `from` into `to`. Both
/// structs must share a schema. Diffing identical structs yields an empty
/// patch; NaN floats compare equal to themselves.
pub fn diff(from: &mut Struct, to: &mut Struct) -> Result<Patch> {
    if from.mapping().path != to.mapping().path {
        return Err(kerr(
            ErrorKind::SchemaInvalid,
            format!(
                "cannot diff {} against {}",
                from.mapping().path,
                to.mapping().path
            ),
        ));
    }
    let mut patch = Patch::new();
    diff_fields(from, to, &mut patch.ops)?;
    Ok(patch)
}

macro_rules! diff_scalar {
    ($from:expr, $to:expr, $n:expr, $ops:expr, $get:ident, $t:ty) => {{
        let a: $t = $from.$get($n)?;
        let b: $t = $to.$get($n)?;
        if !<$t as Prim>::same(a, b) {
            if b.is_zero() {
                $ops.push(Op::new($n, OpType::Clear, NO_LIST_INDEX, Vec::new()));
            } else {
                $ops.push(Op::new($n, OpType::Set, NO_LIST_INDEX, b.wire_bytes()));
            }
        }
    }};
}

macro_rules! diff_num_list {
    ($from:expr, $to:expr, $n:expr, $ops:expr, $acc:ident, $t:ty) => {{
        let a: Vec<$t> = $from.$acc($n)?.values().to_vec();
        let b: Vec<$t> = $to.$acc($n)?.values().to_vec();
        diff_items(
            $n,
            $ops,
            &a,
            &b,
            |x, y| <$t as Prim>::same(*x, *y),
            |x| x.wire_bytes(),
            || $to.$acc($n)?.encode_field(),
        )?;
    }};
}

fn diff_fields(from: &mut Struct, to: &mut Struct, ops: &mut Vec<Op>) -> Result<()> {
    let mapping = from.mapping().clone();
    for n in 0..mapping.num_fields() as u16 {
        let ty = mapping.fields[n as usize].field_type;
        match ty {
            FieldType::Bool => {
                let a = from.get_bool(n)?;
                let b = to.get_bool(n)?;
                if a != b {
                    if b {
                        ops.push(Op::new(n, OpType::Set, NO_LIST_INDEX, vec![1]));
                    } else {
                        ops.push(Op::new(n, OpType::Clear, NO_LIST_INDEX, Vec::new()));
                    }
                }
            }
            FieldType::Int8 => diff_scalar!(from, to, n, ops, get_i8, i8),
            FieldType::Int16 => diff_scalar!(from, to, n, ops, get_i16, i16),
            FieldType::Int32 => diff_scalar!(from, to, n, ops, get_i32, i32),
            FieldType::Int64 => diff_scalar!(from, to, n, ops, get_i64, i64),
            FieldType::Uint8 => diff_scalar!(from, to, n, ops, get_u8, u8),
            FieldType::Uint16 => diff_scalar!(from, to, n, ops, get_u16, u16),
            FieldType::Uint32 => diff_scalar!(from, to, n, ops, get_u32, u32),
            FieldType::Uint64 => diff_scalar!(from, to, n, ops, get_u64, u64),
            FieldType::Float32 => diff_scalar!(from, to, n, ops, get_f32, f32),
            FieldType::Float64 => diff_scalar!(from, to, n, ops, get_f64, f64),
            FieldType::String => {
                let a = from.get_str(n)?.to_owned();
                let b = to.get_str(n)?.to_owned();
                if a != b {
                    if b.is_empty() {
                        ops.push(Op::new(n, OpType::Clear, NO_LIST_INDEX, Vec::new()));
                    } else {
                        ops.push(Op::new(n, OpType::Set, NO_LIST_INDEX, b.into_bytes()));
                    }
                }
            }
            FieldType::Bytes => {
                let a = from.get_bytes(n)?.to_vec();
                let b = to.get_bytes(n)?.to_vec();
                if a != b {
                    if b.is_empty() {
                        ops.push(Op::new(n, OpType::Clear, NO_LIST_INDEX, Vec::new()));
                    } else {
                        ops.push(Op::new(n, OpType::Set, NO_LIST_INDEX, b));
                    }
                }
            }
            FieldType::Struct => diff_struct_field(from, to, n, ops)?,
            FieldType::ListBools => {
                let a = from.list_bools(n)?.values().to_vec();
                let b = to.list_bools(n)?.values().to_vec();
                diff_items(
                    n,
                    ops,
                    &a,
                    &b,
                    |x, y| x == y,
                    |x| vec![*x as u8],
                    || to.list_bools(n)?.encode_field(),
                )?;
            }
            FieldType::ListInt8 => diff_num_list!(from, to, n, ops, list_i8, i8),
            FieldType::ListInt16 => diff_num_list!(from, to, n, ops, list_i16, i16),
            FieldType::ListInt32 => diff_num_list!(from, to, n, ops, list_i32, i32),
            FieldType::ListInt64 => diff_num_list!(from, to, n, ops, list_i64, i64),
            FieldType::ListUint8 => diff_num_list!(from, to, n, ops, list_u8, u8),
            FieldType::ListUint16 => diff_num_list!(from, to, n, ops, list_u16, u16),
            FieldType::ListUint32 => diff_num_list!(from, to, n, ops, list_u32, u32),
            FieldType::ListUint64 => diff_num_list!(from, to, n, ops, list_u64, u64),
            FieldType::ListFloat32 => diff_num_list!(from, to, n, ops, list_f32, f32),
            FieldType::ListFloat64 => diff_num_list!(from, to, n, ops, list_f64, f64),
            FieldType::ListBytes => {
                let a = from.list_bytes(n)?.values().to_vec();
                let b = to.list_bytes(n)?.values().to_vec();
                diff_items(
                    n,
                    ops,
                    &a,
                    &b,
                    |x, y| x == y,
                    |x| x.clone(),
                    || to.list_bytes(n)?.encode_field(),
                )?;
            }
            FieldType::ListStrings => {
                let a = from.list_strings(n)?.values().to_vec();
                let b = to.list_strings(n)?.values().to_vec();
                diff_items(
                    n,
                    ops,
                    &a,
                    &b,
                    |x, y| x == y,
                    |x| x.clone(),
                    || to.list_strings(n)?.encode_field(),
                )?;
            }
            FieldType::ListStructs => diff_struct_list(from, to, n, ops)?,
            FieldType::Map => diff_map(from, to, n, ops)?,
            FieldType::Any => {
                let a = from.any_value(n)?;
                let b = to.any_value(n)?;
                match (&a, &b) {
                    (None, None) => {}
                    (Some(_), None) => {
                        ops.push(Op::new(n, OpType::Clear, NO_LIST_INDEX, Vec::new()))
                    }
                    (_, Some(bv)) => {
                        if a.as_ref() != Some(bv) {
                            ops.push(Op::new(n, OpType::Set, NO_LIST_INDEX, bv.encoded()));
                        }
                    }
                }
            }
            FieldType::ListAny => {
                let a = from.list_any(n)?.values().to_vec();
                let b = to.list_any(n)?.values().to_vec();
                diff_items(
                    n,
                    ops,
                    &a,
                    &b,
                    |x, y| x == y,
                    |x| x.encoded(),
                    || to.list_any(n)?.encode_field(),
                )?;
            }
            FieldType::Unknown => {}
        }
    }
    Ok(())
}

fn diff_struct_field(from: &mut Struct, to: &mut Struct, n: u16, ops: &mut Vec<Op>) -> Result<()> {
    let a = from.has_field(n)?;
    let b = to.has_field(n)?;
    match (a, b) {
        (false, false) => {}
        (true, false) => ops.push(Op::new(n, OpType::Clear, NO_LIST_INDEX, Vec::new())),
        (false, true) => {
            let mut child = to.struct_view(n)?;
            ops.push(Op::new(n, OpType::Set, NO_LIST_INDEX, child.marshal()?));
        }
        (true, true) => {
            let mut fa = from.struct_view(n)?;
            let mut fb = to.struct_view(n)?;
            let sub = diff(&mut fa, &mut fb)?;
            if !sub.is_empty() {
                ops.push(Op::new(n, OpType::StructPatch, NO_LIST_INDEX, sub.marshal()?));
            }
        }
    }
    Ok(())
}

fn diff_struct_list(from: &mut Struct, to: &mut Struct, n: u16, ops: &mut Vec<Op>) -> Result<()> {
    let from_len = from.list_structs(n)?.len();
    let to_len = to.list_structs(n)?.len();
    let overlap = from_len.min(to_len);
    for i in 0..overlap {
        let sub = {
            let fa = from.list_structs(n)?.get_mut(i)?;
            let fb = to.list_structs(n)?.get_mut(i)?;
            diff(fa, fb)?
        };
        if !sub.is_empty() {
            ops.push(Op::new(n, OpType::ListStructPatch, i as i32, sub.marshal()?));
        }
    }
    for i in overlap..to_len {
        let data = to.list_structs(n)?.get_mut(i)?.marshal()?;
        ops.push(Op::new(n, OpType::ListInsert, i as i32, data));
    }
    for i in (overlap..from_len).rev() {
        ops.push(Op::new(n, OpType::ListRemove, i as i32, Vec::new()));
    }
    Ok(())
}

/// Snapshot a map as `(key, raw value bytes)` pairs in key order.
fn map_snapshot(s: &mut Struct, n: u16) -> Result<Vec<(MapKey, Vec<u8>)>> {
    let m = s.map(n)?;
    let keys = m.keys().to_vec();
    let mut out = Vec::with_capacity(keys.len());
    for (i, key) in keys.into_iter().enumerate() {
        let raw = m
            .value_at_mut(i)
            .ok_or_else(|| kerr(ErrorKind::Other, "map view lost a value"))?
            .raw_bytes()?;
        out.push((key, raw));
    }
    Ok(out)
}

fn map_op_data(key: &MapKey, val: Option<&[u8]>) -> Vec<u8> {
    let kraw = key.raw_bytes();
    let mut out = Vec::with_capacity(4 + kraw.len());
    out.extend_from_slice(&(kraw.len() as u32).to_le_bytes());
    out.extend_from_slice(&kraw);
    if let Some(val) = val {
        out.extend_from_slice(val);
    }
    out
}

fn diff_map(from: &mut Struct, to: &mut Struct, n: u16, ops: &mut Vec<Op>) -> Result<()> {
    let a = map_snapshot(from, n)?;
    let b = map_snapshot(to, n)?;
    let mut i = 0;
    let mut j = 0;
    // Both snapshots are in ascending key order; one merge pass finds
    // additions, changes and removals deterministically.
    while i < a.len() || j < b.len() {
        if i < a.len() && (j >= b.len() || a[i].0 < b[j].0) {
            ops.push(Op::new(
                n,
                OpType::MapDelete,
                NO_LIST_INDEX,
                map_op_data(&a[i].0, None),
            ));
            i += 1;
        } else if j < b.len() && (i >= a.len() || b[j].0 < a[i].0) {
            ops.push(Op::new(
                n,
                OpType::MapSet,
                NO_LIST_INDEX,
                map_op_data(&b[j].0, Some(&b[j].1)),
            ));
            j += 1;
        } else {
            if a[i].1 != b[j].1 {
                ops.push(Op::new(
                    n,
                    OpType::MapSet,
                    NO_LIST_INDEX,
                    map_op_data(&b[j].0, Some(&b[j].1)),
                ));
            }
            i += 1;
            j += 1;
        }
    }
    Ok(())
}

/// Index-wise list diff with the wholesale-replacement heuristic: when the
/// per-index op count exceeds half the combined lengths, one `ListReplace`
/// carrying the entire new list is cheaper.
fn diff_items<T>(
    n: u16,
    ops: &mut Vec<Op>,
    from: &[T],
    to: &[T],
    same: impl Fn(&T, &T) -> bool,
    enc: impl Fn(&T) -> Vec<u8>,
    replace: impl FnOnce() -> Result<Vec<u8>>,
) -> Result<()> {
    let overlap = from.len().min(to.len());
    let mut item_ops = Vec::new();
    for i in 0..overlap {
        if !same(&from[i], &to[i]) {
            item_ops.push(Op::new(n, OpType::ListSet, i as i32, enc(&to[i])));
        }
    }
    for (i, item) in to.iter().enumerate().skip(overlap) {
        item_ops.push(Op::new(n, OpType::ListInsert, i as i32, enc(item)));
    }
    for i in (overlap..from.len()).rev() {
        item_ops.push(Op::new(n, OpType::ListRemove, i as i32, Vec::new()));
    }
    if item_ops.is_empty() {
        return Ok(());
    }
    if item_ops.len() > (from.len() + to.len()) / 2 {
        ops.push(Op::new(n, OpType::ListReplace, NO_LIST_INDEX, replace()?));
    } else {
        ops.append(&mut item_ops);
    }
    Ok(())
}
