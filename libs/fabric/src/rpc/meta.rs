//! Service and message descriptors as produced by the schema compiler

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A possibly namespaced name, e.g. `hello_world` + `HelloService`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    pub namespace: String,
    pub name: String,
}

impl Name {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace.name`, or just `name` without a namespace.
    pub fn full_name(&self) -> String {
        let namespace = self.namespace.trim_start_matches('.');
        if namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{namespace}.{}", self.name)
        }
    }
}

/// How a field's type is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Primitive = 1,
    String = 2,
    Bytes = 3,
    Enum = 4,
    EmbeddedMessage = 5,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub id: u32,
    /// Primitive kind name, or full name of the referenced enum or message.
    pub type_full_name: String,
    pub is_optional: bool,
    pub is_repeated: bool,
    /// One-of group this field belongs to.
    pub part_of: Option<String>,
    pub classification: Classification,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMeta {
    pub name: Name,
    pub fields: Vec<FieldMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValueMeta {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMeta {
    pub name: Name,
    pub fields: Vec<EnumValueMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMeta {
    pub name: String,
    pub req_full_type_name: String,
    pub res_full_type_name: String,
    pub is_req_streamed: bool,
    pub is_res_streamed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMeta {
    pub name: Name,
    pub methods: Vec<MethodMeta>,
}

/// Everything one schema file contributes to a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub services: Vec<ServiceMeta>,
    pub types: Vec<TypeMeta>,
    pub enums: Vec<EnumMeta>,
}

impl Meta {
    /// Standard base64 of the bincode encoding, the form embedded in
    /// generated code.
    pub fn to_base64(&self) -> Result<String> {
        let bytes = bincode::serialize(self).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn from_base64(blob: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(blob.trim())
            .map_err(|e| Error::Registry(format!("invalid base64 meta: {e}")))?;
        bincode::deserialize(&bytes).map_err(|e| Error::Registry(format!("invalid meta: {e}")))
    }
}
