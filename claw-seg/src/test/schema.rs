use crate::header::FieldType;
use crate::mapping::{lookup_mapping, register_mapping, Mapping, FieldDescriptor};
use crate::schema::{SchemaField, SchemaFile, SchemaStruct};
use crate::structs::Struct;
use claw_base::ErrorKind;
use test_log::test;

fn field(name: &str, num: u16, ty: FieldType) -> SchemaField {
    SchemaField {
        name: name.into(),
        field_num: num,
        field_type: ty as u8,
        nested: None,
        key_type: 0,
        value_type: 0,
    }
}

#[test]
fn test_compile_and_use() {
    let file = SchemaFile {
        package: "fleet.one".into(),
        structs: vec![
            SchemaStruct {
                name: "Engine".into(),
                fields: vec![
                    field("cylinders", 0, FieldType::Uint8),
                    field("code", 1, FieldType::String),
                ],
            },
            SchemaStruct {
                name: "Truck".into(),
                fields: vec![
                    field("year", 0, FieldType::Int32),
                    SchemaField {
                        nested: Some("Engine".into()),
                        ..field("engine", 1, FieldType::Struct)
                    },
                    SchemaField {
                        nested: Some("Truck".into()),
                        ..field("trailer", 2, FieldType::Struct)
                    },
                ],
            },
        ],
    };
    let mappings = file.compile().unwrap();
    assert_eq!(mappings.len(), 2);
    assert_eq!(mappings[1].path, "fleet.one.Truck");
    assert!(mappings[1].fields[2].self_referential);
    assert!(lookup_mapping("fleet.one.Engine").is_some());

    let truck = lookup_mapping("fleet.one.Truck").unwrap();
    let mut t = Struct::new(&truck).unwrap();
    t.set_i32(0, 1994).unwrap();
    let mut e = Struct::new(&lookup_mapping("fleet.one.Engine").unwrap()).unwrap();
    e.set_u8(0, 8).unwrap();
    e.set_str(1, "1fz").unwrap();
    t.set_struct(1, &mut e).unwrap();
    let mut back = Struct::from_bytes(&truck, t.marshal().unwrap()).unwrap();
    assert_eq!(back.struct_view(1).unwrap().get_str(1).unwrap(), "1fz");
}

#[test]
fn test_msgpack_roundtrip() {
    let file = SchemaFile {
        package: "fleet.two".into(),
        structs: vec![SchemaStruct {
            name: "Tag".into(),
            fields: vec![field("id", 0, FieldType::Uint64)],
        }],
    };
    let bytes = file.to_msgpack().unwrap();
    let back = SchemaFile::from_msgpack(&bytes).unwrap();
    assert_eq!(back, file);
    assert_eq!(
        SchemaFile::from_msgpack(&[0xc1]).unwrap_err().kind(),
        ErrorKind::SchemaInvalid
    );
}

#[test]
fn test_unresolved_reference() {
    let file = SchemaFile {
        package: "fleet.three".into(),
        structs: vec![SchemaStruct {
            name: "Lot".into(),
            fields: vec![SchemaField {
                nested: Some("Missing".into()),
                ..field("thing", 0, FieldType::Struct)
            }],
        }],
    };
    assert_eq!(file.compile().unwrap_err().kind(), ErrorKind::SchemaInvalid);
}

#[test]
fn test_bad_type_tag() {
    let file = SchemaFile {
        package: "fleet.four".into(),
        structs: vec![SchemaStruct {
            name: "Odd".into(),
            fields: vec![field("x", 0, FieldType::Unknown)],
        }],
    };
    assert_eq!(file.compile().unwrap_err().kind(), ErrorKind::SchemaInvalid);
}

#[test]
fn test_validate_rejects_misnumbered_fields() {
    let m = Mapping::new(
        "Bad",
        "claw.test",
        vec![FieldDescriptor::scalar("x", 3, FieldType::Int32)],
    );
    assert_eq!(m.init().unwrap_err().kind(), ErrorKind::SchemaInvalid);

    let m = Mapping::new(
        "NoChild",
        "claw.test",
        vec![FieldDescriptor::scalar("child", 0, FieldType::Struct)],
    );
    assert_eq!(m.init().unwrap_err().kind(), ErrorKind::SchemaInvalid);

    let m = Mapping::new(
        "BadKey",
        "claw.test",
        vec![FieldDescriptor::map(
            "m",
            0,
            FieldType::Struct,
            FieldType::Int32,
            None,
        )],
    );
    assert_eq!(m.init().unwrap_err().kind(), ErrorKind::SchemaInvalid);
}

#[test]
fn test_registry_register_and_lookup() {
    let m = Mapping::new(
        "Registered",
        "claw.test.registry",
        vec![FieldDescriptor::scalar("x", 0, FieldType::Int32)],
    );
    register_mapping(&m).unwrap();
    let found = lookup_mapping("claw.test.registry.Registered").unwrap();
    assert_eq!(found.name, "Registered");
    assert!(lookup_mapping("claw.test.registry.Absent").is_none());
}
