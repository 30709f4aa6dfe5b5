use crate::diff::diff;
use crate::ops::Patch;
use crate::test::{assert_same, car, garage_mapping};
use claw_seg::{MapKey, MapVal, OpType, Struct, NO_LIST_INDEX};
use test_log::test;

#[test]
fn test_two_scalar_sets() {
    let mut base = car(2023, "gt");
    let mut target = car(2024, "venza");
    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.len(), 2);
    assert_eq!(patch.ops[0].op(), Some(OpType::Set));
    assert_eq!(patch.ops[0].field_num, 0);
    assert_eq!(patch.ops[0].index, NO_LIST_INDEX);
    assert_eq!(patch.ops[0].data, 2024i32.to_le_bytes().to_vec());
    assert_eq!(patch.ops[1].op(), Some(OpType::Set));
    assert_eq!(patch.ops[1].data, b"venza".to_vec());

    // Serialise the patch, reparse it, and apply: the reference scenario.
    let wire = patch.marshal().unwrap();
    let back = Patch::unmarshal(&wire).unwrap();
    assert_eq!(back, patch);
    crate::apply::apply(&mut base, &back).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_diff_of_identical_is_empty() {
    let mut a = Struct::new(&garage_mapping()).unwrap();
    let mut c = car(2023, "gt");
    a.set_struct(0, &mut c).unwrap();
    a.list_i32(3).unwrap().set_all(vec![1, 2, 3]).unwrap();
    a.map(5)
        .unwrap()
        .set(MapKey::Str("gt".into()), MapVal::I64(60_000))
        .unwrap();
    a.set_f64(6, 4.5).unwrap();
    a.set_bool(7, true).unwrap();
    let mut b = Struct::from_bytes(&garage_mapping(), a.marshal().unwrap()).unwrap();
    let patch = diff(&mut a, &mut b).unwrap();
    assert!(patch.is_empty(), "unexpected ops: {:?}", patch.ops);
}

#[test]
fn test_nan_compares_equal() {
    let mut a = Struct::new(&garage_mapping()).unwrap();
    a.set_f64(6, f64::NAN).unwrap();
    let mut b = Struct::new(&garage_mapping()).unwrap();
    b.set_f64(6, f64::NAN).unwrap();
    assert!(diff(&mut a, &mut b).unwrap().is_empty());

    // A NaN against a number still diffs.
    let mut c = Struct::new(&garage_mapping()).unwrap();
    c.set_f64(6, 1.0).unwrap();
    assert_eq!(diff(&mut a, &mut c).unwrap().len(), 1);
}

#[test]
fn test_clear_emitted_for_dropped_fields() {
    let mut base = car(2023, "gt");
    let mut target = car(2023, "");
    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.ops[0].op(), Some(OpType::Clear));
    assert_eq!(patch.ops[0].field_num, 1);
    crate::apply::apply(&mut base, &patch).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_nested_struct_patch() {
    let mut base = Struct::new(&garage_mapping()).unwrap();
    let mut c = car(2023, "gt");
    base.set_struct(0, &mut c).unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    let mut c2 = car(2024, "gt");
    target.set_struct(0, &mut c2).unwrap();

    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.ops[0].op(), Some(OpType::StructPatch));
    let inner = Patch::unmarshal(&patch.ops[0].data).unwrap();
    assert_eq!(inner.len(), 1);
    assert_eq!(inner.ops[0].op(), Some(OpType::Set));

    crate::apply::apply(&mut base, &patch).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_struct_appears_and_disappears() {
    let mut base = Struct::new(&garage_mapping()).unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    let mut c = car(2023, "gt");
    target.set_struct(0, &mut c).unwrap();

    let forward = diff(&mut base, &mut target).unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward.ops[0].op(), Some(OpType::Set));
    crate::apply::apply(&mut base, &forward).unwrap();
    assert_same(&mut base, &mut target);

    let mut empty = Struct::new(&garage_mapping()).unwrap();
    let backward = diff(&mut base, &mut empty).unwrap();
    assert_eq!(backward.len(), 1);
    assert_eq!(backward.ops[0].op(), Some(OpType::Clear));
    crate::apply::apply(&mut base, &backward).unwrap();
    assert_same(&mut base, &mut empty);
}

#[test]
fn test_list_stays_per_index_under_threshold() {
    // One changed index and one tail removal: 2 ops, threshold (5+4)/2=4.
    let mut base = Struct::new(&garage_mapping()).unwrap();
    base.list_bools(2)
        .unwrap()
        .set_all(vec![true, false, true, false, true])
        .unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    target
        .list_bools(2)
        .unwrap()
        .set_all(vec![false, false, true, false])
        .unwrap();

    let patch = diff(&mut base, &mut target).unwrap();
    let kinds: Vec<_> = patch.ops.iter().map(|o| o.op().unwrap()).collect();
    assert_eq!(kinds, vec![OpType::ListSet, OpType::ListRemove]);
    assert_eq!(patch.ops[0].index, 0);
    assert_eq!(patch.ops[1].index, 4);
    crate::apply::apply(&mut base, &patch).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_list_collapses_to_replace_over_threshold() {
    // Three inserts against an empty list: 3 > (0+3)/2, so one replace.
    let mut base = Struct::new(&garage_mapping()).unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    target
        .list_i32(3)
        .unwrap()
        .set_all(vec![10, 20, 30])
        .unwrap();

    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.ops[0].op(), Some(OpType::ListReplace));
    assert_eq!(patch.ops[0].index, NO_LIST_INDEX);
    crate::apply::apply(&mut base, &patch).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_emptied_list_ends_up_absent() {
    // Draining a list collapses to one replace, and applying it leaves
    // the field unmaterialised, same as the target.
    let mut base = Struct::new(&garage_mapping()).unwrap();
    base.list_i32(3).unwrap().set_all(vec![1, 2, 3, 4]).unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.ops[0].op(), Some(OpType::ListReplace));
    crate::apply::apply(&mut base, &patch).unwrap();
    assert!(!base.has_field(3).unwrap());
    assert_same(&mut base, &mut target);
}

#[test]
fn test_threshold_boundary() {
    // One differing index out of one: 1 op, threshold (1+1)/2=1, not over.
    let mut base = Struct::new(&garage_mapping()).unwrap();
    base.list_i32(3).unwrap().set_all(vec![1]).unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    target.list_i32(3).unwrap().set_all(vec![2]).unwrap();
    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.ops[0].op(), Some(OpType::ListSet));

    // Two differing indexes out of one overlap plus one insert: 2 > 1.
    let mut base = Struct::new(&garage_mapping()).unwrap();
    base.list_i32(3).unwrap().set_all(vec![1]).unwrap();
    let mut target = Struct::new(&garage_mapping()).unwrap();
    target.list_i32(3).unwrap().set_all(vec![2, 3]).unwrap();
    let patch = diff(&mut base, &mut target).unwrap();
    assert_eq!(patch.len(), 1);
    assert_eq!(patch.ops[0].op(), Some(OpType::ListReplace));
}

#[test]
fn test_struct_list_diff() {
    let mut base = Struct::new(&garage_mapping()).unwrap();
    {
        let cars = base.list_structs(1).unwrap();
        cars.push(car(2020, "corolla")).unwrap();
        cars.push(car(2023, "gt")).unwrap();
        cars.push(car(2019, "rav4")).unwrap();
    }
    let mut target = Struct::new(&garage_mapping()).unwrap();
    {
        let cars = target.list_structs(1).unwrap();
        cars.push(car(2021, "corolla")).unwrap();
        cars.push(car(2023, "gt")).unwrap();
    }

    let patch = diff(&mut base, &mut target).unwrap();
    let kinds: Vec<_> = patch.ops.iter().map(|o| o.op().unwrap()).collect();
    assert_eq!(kinds, vec![OpType::ListStructPatch, OpType::ListRemove]);
    assert_eq!(patch.ops[0].index, 0);
    assert_eq!(patch.ops[1].index, 2);
    crate::apply::apply(&mut base, &patch).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_map_diff() {
    let mut base = Struct::new(&garage_mapping()).unwrap();
    {
        let m = base.map(5).unwrap();
        m.set(MapKey::Str("corolla".into()), MapVal::I64(25_000))
            .unwrap();
        m.set(MapKey::Str("gt".into()), MapVal::I64(60_000)).unwrap();
    }
    let mut target = Struct::new(&garage_mapping()).unwrap();
    {
        let m = target.map(5).unwrap();
        m.set(MapKey::Str("gt".into()), MapVal::I64(65_000)).unwrap();
        m.set(MapKey::Str("venza".into()), MapVal::I64(40_000))
            .unwrap();
    }

    let patch = diff(&mut base, &mut target).unwrap();
    let kinds: Vec<_> = patch.ops.iter().map(|o| o.op().unwrap()).collect();
    assert_eq!(
        kinds,
        vec![OpType::MapDelete, OpType::MapSet, OpType::MapSet]
    );
    crate::apply::apply(&mut base, &patch).unwrap();
    assert_same(&mut base, &mut target);
}

#[test]
fn test_rejects_mismatched_schemas() {
    let mut a = car(2023, "gt");
    let mut b = Struct::new(&garage_mapping()).unwrap();
    assert!(diff(&mut a, &mut b).is_err());
}

#[test]
fn test_full_roundtrip_across_field_kinds() {
    let mut base = Struct::new(&garage_mapping()).unwrap();
    let mut c = car(2023, "gt");
    base.set_struct(0, &mut c).unwrap();
    base.list_structs(1).unwrap().push(car(2019, "rav4")).unwrap();
    base.list_bools(2).unwrap().set_all(vec![true, true]).unwrap();
    base.list_i32(3).unwrap().set_all(vec![1, 2]).unwrap();
    base.list_strings(4).unwrap().push_str("north").unwrap();
    base.map(5)
        .unwrap()
        .set(MapKey::Str("gt".into()), MapVal::I64(1))
        .unwrap();
    base.set_f64(6, 0.25).unwrap();
    base.set_bool(7, true).unwrap();

    let mut target = Struct::new(&garage_mapping()).unwrap();
    let mut c2 = car(2024, "venza");
    target.set_struct(0, &mut c2).unwrap();
    {
        let cars = target.list_structs(1).unwrap();
        cars.push(car(2019, "rav4")).unwrap();
        cars.push(car(2022, "mirai")).unwrap();
    }
    target.list_bools(2).unwrap().set_all(vec![true]).unwrap();
    target.list_i32(3).unwrap().set_all(vec![1, 5, 9]).unwrap();
    {
        let names = target.list_strings(4).unwrap();
        names.push_str("north").unwrap();
        names.push_str("south").unwrap();
    }
    target
        .map(5)
        .unwrap()
        .set(MapKey::Str("venza".into()), MapVal::I64(2))
        .unwrap();
    target.set_f64(6, 0.75).unwrap();

    let patch = diff(&mut base, &mut target).unwrap();
    let wire = patch.marshal().unwrap();
    let back = Patch::unmarshal(&wire).unwrap();
    crate::apply::apply(&mut base, &back).unwrap();
    assert_same(&mut base, &mut target);
}
