use crate::any::{StructGetter, TypeHasher};
use crate::header::FieldType;
use crate::mapping::{FieldDescriptor, Mapping};
use crate::structs::Struct;
use std::sync::Arc;

pub(crate) mod header;
pub(crate) mod schema;
pub(crate) mod segment;
pub(crate) mod structs;

pub(crate) fn wide_mapping() -> Arc<Mapping> {
    Mapping::new(
        "Wide",
        "claw.test",
        vec![
            FieldDescriptor::scalar("flag", 0, FieldType::Bool),
            FieldDescriptor::scalar("tiny", 1, FieldType::Int8),
            FieldDescriptor::scalar("short", 2, FieldType::Int16),
            FieldDescriptor::scalar("count", 3, FieldType::Int32),
            FieldDescriptor::scalar("big", 4, FieldType::Int64),
            FieldDescriptor::scalar("utiny", 5, FieldType::Uint8),
            FieldDescriptor::scalar("ushort", 6, FieldType::Uint16),
            FieldDescriptor::scalar("ucount", 7, FieldType::Uint32),
            FieldDescriptor::scalar("ubig", 8, FieldType::Uint64),
            FieldDescriptor::scalar("ratio", 9, FieldType::Float32),
            FieldDescriptor::scalar("precise", 10, FieldType::Float64),
            FieldDescriptor::scalar("label", 11, FieldType::String),
            FieldDescriptor::scalar("blob", 12, FieldType::Bytes),
        ],
    )
}

pub(crate) fn car_mapping() -> Arc<Mapping> {
    Mapping::new(
        "Car",
        "claw.test",
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
        "claw.test",
        vec![
            FieldDescriptor::nested_struct("car", 0, &car),
            FieldDescriptor::struct_list("cars", 1, &car),
            FieldDescriptor::scalar("open_days", 2, FieldType::ListBools),
            FieldDescriptor::scalar("mileages", 3, FieldType::ListInt32),
            FieldDescriptor::scalar("names", 4, FieldType::ListStrings),
            FieldDescriptor::scalar("plates", 5, FieldType::ListBytes),
            FieldDescriptor::map("prices", 6, FieldType::String, FieldType::Int64, None),
            FieldDescriptor::scalar("extra", 7, FieldType::Any),
            FieldDescriptor::scalar("extras", 8, FieldType::ListAny),
            FieldDescriptor::scalar("ratings", 9, FieldType::ListFloat64),
        ],
    )
}

pub(crate) fn node_mapping() -> Arc<Mapping> {
    Mapping::new(
        "Node",
        "claw.test",
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

/// Stand-in for a generated binding: a typed wrapper carrying its type
/// hash and underlying struct.
pub(crate) struct HashedCar {
    pub(crate) hash: [u8; 16],
    pub(crate) s: Struct,
}

impl HashedCar {
    pub(crate) fn new(hash: [u8; 16]) -> HashedCar {
        HashedCar {
            hash,
            s: Struct::new(&car_mapping()).unwrap(),
        }
    }
}

impl TypeHasher for HashedCar {
    fn type_hash(&self) -> [u8; 16] {
        self.hash
    }
}

impl StructGetter for HashedCar {
    fn get_struct(&self) -> &Struct {
        &self.s
    }

    fn get_struct_mut(&mut self) -> &mut Struct {
        &mut self.s
    }
}
