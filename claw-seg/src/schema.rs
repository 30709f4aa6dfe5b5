use crate::header::FieldType;
use crate::mapping::{lookup_mapping, register_mapping, FieldDescriptor, Mapping};
use claw_base::{kerr, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// The flat, data-only descriptor form the schema compiler emits. Compiling
// turns it into the linked Mapping graph the runtime dispatches on.
// MessagePack is the interchange encoding.

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFile {
    pub package: String,
    pub structs: Vec<SchemaStruct>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaStruct {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_num: u16,
    /// Wire type tag, as carried in field headers.
    pub field_type: u8,
    /// Referenced struct for struct-typed slots: a bare name within this
    /// package, or a full `package.Name` path.
    #[serde(default)]
    pub nested: Option<String>,
    #[serde(default)]
    pub key_type: u8,
    #[serde(default)]
    pub value_type: u8,
}

impl SchemaFile {
    pub fn from_msgpack(bytes: &[u8]) -> Result<SchemaFile> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| kerr(ErrorKind::SchemaInvalid, format!("bad schema descriptor: {}", e)))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self)
            .map_err(|e| kerr(ErrorKind::SchemaInvalid, format!("unencodable schema: {}", e)))
    }

    /// Compile every struct into a registered `Mapping`. Struct references
    /// resolve against earlier structs in this file, the struct itself
    /// (self-referential types), or the process registry.
    pub fn compile(&self) -> Result<Vec<Arc<Mapping>>> {
        let mut done: Vec<Arc<Mapping>> = Vec::new();
        for st in &self.structs {
            let own_path = format!("{}.{}", self.package, st.name);
            let mut fields = Vec::with_capacity(st.fields.len());
            for f in &st.fields {
                let ty = FieldType::from_u8(f.field_type);
                if ty == FieldType::Unknown {
                    return Err(kerr(
                        ErrorKind::SchemaInvalid,
                        format!("field {} has unknown type tag {}", f.name, f.field_type),
                    ));
                }
                let mut fd = FieldDescriptor::scalar(&f.name, f.field_num, ty);
                fd.key_type = FieldType::from_u8(f.key_type);
                fd.value_type = FieldType::from_u8(f.value_type);
                if let Some(refname) = &f.nested {
                    let full = if refname.contains('.') {
                        refname.clone()
                    } else {
                        format!("{}.{}", self.package, refname)
                    };
                    if full == own_path {
                        fd.self_referential = true;
                    } else if let Some(m) = done.iter().find(|m| m.path == full) {
                        fd.nested = Some(m.clone());
                    } else if let Some(m) = lookup_mapping(&full) {
                        fd.nested = Some(m);
                    } else {
                        return Err(kerr(
                            ErrorKind::SchemaInvalid,
                            format!("unresolved struct reference {} in field {}", full, f.name),
                        ));
                    }
                }
                fields.push(fd);
            }
            let mapping = Mapping::new(&st.name, &self.package, fields);
            register_mapping(&mapping)?;
            done.push(mapping);
        }
        Ok(done)
    }
}
