use claw_seg::{FieldDescriptor, FieldType, Mapping, Struct};
use std::sync::Arc;

pub(crate) mod diff;

pub(crate) fn car_mapping() -> Arc<Mapping> {
    Mapping::new(
        "Car",
        "claw.patch.test",
        vec![
            FieldDescriptor::scalar("year", 0, FieldType::Int32),
            FieldDescriptor::scalar("model", 1, FieldType::String),
        ],
    )
}

pub(crate) fn garage_mapping() -> Arc<Mapping> {
    let car = car_mapping();
    Mapping::new(
        "Garage",
        "claw.patch.test",
        vec![
            FieldDescriptor::nested_struct("car", 0, &car),
            FieldDescriptor::struct_list("cars", 1, &car),
            FieldDescriptor::scalar("open_days", 2, FieldType::ListBools),
            FieldDescriptor::scalar("mileages", 3, FieldType::ListInt32),
            FieldDescriptor::scalar("names", 4, FieldType::ListStrings),
            FieldDescriptor::map("prices", 5, FieldType::String, FieldType::Int64, None),
            FieldDescriptor::scalar("rating", 6, FieldType::Float64),
            FieldDescriptor::scalar("open", 7, FieldType::Bool),
        ],
    )
}

pub(crate) fn node_mapping() -> Arc<Mapping> {
    Mapping::new(
        "Node",
        "claw.patch.test",
        vec![
            FieldDescriptor::scalar("val", 0, FieldType::Int32),
            FieldDescriptor::self_struct("next", 1),
        ],
    )
}

pub(crate) fn car(year: i32, model: &str) -> Struct {
    let mut c = Struct::new(&car_mapping()).unwrap();
    c.set_i32(0, year).unwrap();
    c.set_str(1, model).unwrap();
    c
}

pub(crate) fn assert_same(a: &mut Struct, b: &mut Struct) {
    assert!(
        a.content_eq(b).unwrap(),
        "structs differ:\n  left:  {:?}\n  right: {:?}",
        a.marshal().unwrap(),
        b.marshal().unwrap()
    );
}
