//! Name-indexed descriptor tables

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::rpc::meta::{Classification, EnumValueMeta, FieldMeta, Meta, ServiceMeta, TypeMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
}

impl FromStr for PrimitiveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "double" => Self::Double,
            "float" => Self::Float,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "sint32" => Self::Sint32,
            "sint64" => Self::Sint64,
            "fixed32" => Self::Fixed32,
            "fixed64" => Self::Fixed64,
            "sfixed32" => Self::Sfixed32,
            "sfixed64" => Self::Sfixed64,
            "bool" => Self::Bool,
            other => return Err(Error::Registry(format!("unknown primitive type {other:?}"))),
        })
    }
}

/// Resolved type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    String,
    Bytes,
    /// Full name of an enum descriptor.
    Enum(String),
    /// Full name of a message descriptor.
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub id: u32,
    pub kind: FieldKind,
    pub optional: bool,
    pub repeated: bool,
    pub one_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub full_name: String,
    pub fields: Vec<FieldDescriptor>,
    /// One-of group name to its member field names, in declaration order.
    pub one_ofs: BTreeMap<String, Vec<String>>,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub full_name: String,
    pub values: Vec<EnumValueMeta>,
}

impl EnumDescriptor {
    pub fn value(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }
}

/// Shape of a method as seen by handlers and clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    /// `package.Service.Method`, the exchange type of calls to it.
    pub full_name: String,
    pub service: String,
    pub request_type: String,
    pub response_type: String,
    pub request_streaming: bool,
    pub response_streaming: bool,
}

impl MethodDescriptor {
    pub fn kind(&self) -> MethodKind {
        match (self.request_streaming, self.response_streaming) {
            (false, false) => MethodKind::Unary,
            (true, false) => MethodKind::ClientStreaming,
            (false, true) => MethodKind::ServerStreaming,
            (true, true) => MethodKind::BidiStreaming,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub full_name: String,
    pub methods: Vec<Arc<MethodDescriptor>>,
}

impl ServiceDescriptor {
    /// Find a method by its declared name or its snake_case or camelCase
    /// spelling.
    pub fn method(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        if let Some(method) = self.methods.iter().find(|m| m.name == name) {
            return Some(method.clone());
        }
        let wanted = normalize(name);
        self.methods
            .iter()
            .find(|m| normalize(&m.name) == wanted)
            .cloned()
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn strip(name: &str) -> &str {
    name.trim_start_matches('.')
}

#[derive(Default)]
struct Tables {
    types: HashMap<String, Arc<TypeDescriptor>>,
    enums: HashMap<String, Arc<EnumDescriptor>>,
    services: HashMap<String, Arc<ServiceDescriptor>>,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

/// Registry of the types, enums and services known to a node.
///
/// Names are fully qualified without a leading dot. Adding a descriptor
/// whose name is already known keeps the existing one.
#[derive(Default)]
pub struct ProtoRegistry {
    tables: RwLock<Tables>,
}

impl ProtoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_meta(meta: &Meta) -> Result<Self> {
        let registry = Self::new();
        registry.add_meta(meta)?;
        Ok(registry)
    }

    /// Add every descriptor of `meta`. Nothing is added if any of them is
    /// malformed.
    pub fn add_meta(&self, meta: &Meta) -> Result<()> {
        let types = meta
            .types
            .iter()
            .map(build_type)
            .collect::<Result<Vec<_>>>()?;
        let enums: Vec<EnumDescriptor> = meta
            .enums
            .iter()
            .map(|e| EnumDescriptor {
                full_name: e.name.full_name(),
                values: e.fields.clone(),
            })
            .collect();
        let services: Vec<ServiceDescriptor> = meta.services.iter().map(build_service).collect();

        let mut tables = self.tables.write();
        for descriptor in types {
            tables
                .types
                .entry(descriptor.full_name.clone())
                .or_insert_with(|| Arc::new(descriptor));
        }
        for descriptor in enums {
            tables
                .enums
                .entry(descriptor.full_name.clone())
                .or_insert_with(|| Arc::new(descriptor));
        }
        for descriptor in services {
            if tables.services.contains_key(&descriptor.full_name) {
                continue;
            }
            for method in &descriptor.methods {
                tables
                    .methods
                    .entry(method.full_name.clone())
                    .or_insert_with(|| method.clone());
            }
            debug!(service = %descriptor.full_name, methods = descriptor.methods.len(), "registered service");
            tables
                .services
                .insert(descriptor.full_name.clone(), Arc::new(descriptor));
        }
        Ok(())
    }

    /// Add a base64 blob as emitted by the schema compiler.
    pub fn add_meta_base64(&self, blob: &str) -> Result<()> {
        self.add_meta(&Meta::from_base64(blob)?)
    }

    pub fn lookup_type(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.tables.read().types.get(strip(name)).cloned()
    }

    pub fn lookup_enum(&self, name: &str) -> Option<Arc<EnumDescriptor>> {
        self.tables.read().enums.get(strip(name)).cloned()
    }

    pub fn lookup_service(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.tables.read().services.get(strip(name)).cloned()
    }

    pub fn lookup_method(&self, full_name: &str) -> Option<Arc<MethodDescriptor>> {
        self.tables.read().methods.get(strip(full_name)).cloned()
    }

    /// Full names of all registered services, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check that every field and method refers to a registered type or
    /// enum.
    pub fn validate(&self) -> Result<()> {
        let tables = self.tables.read();
        for descriptor in tables.types.values() {
            for field in &descriptor.fields {
                let resolved = match &field.kind {
                    FieldKind::Enum(name) => tables.enums.contains_key(name),
                    FieldKind::Message(name) => tables.types.contains_key(name),
                    _ => true,
                };
                if !resolved {
                    return Err(Error::Registry(format!(
                        "{}.{} refers to unknown type {:?}",
                        descriptor.full_name, field.name, field.kind
                    )));
                }
            }
        }
        for method in tables.methods.values() {
            for name in [&method.request_type, &method.response_type] {
                if !tables.types.contains_key(name) {
                    return Err(Error::Registry(format!(
                        "{} refers to unknown message {name}",
                        method.full_name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn build_type(meta: &TypeMeta) -> Result<TypeDescriptor> {
    let full_name = meta.name.full_name();
    let mut one_ofs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let fields = meta
        .fields
        .iter()
        .map(|field| {
            let descriptor = build_field(field)
                .map_err(|e| Error::Registry(format!("{full_name}.{}: {e}", field.name)))?;
            if let Some(group) = &descriptor.one_of {
                one_ofs
                    .entry(group.clone())
                    .or_default()
                    .push(descriptor.name.clone());
            }
            Ok(descriptor)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TypeDescriptor {
        full_name,
        fields,
        one_ofs,
    })
}

fn build_field(meta: &FieldMeta) -> Result<FieldDescriptor> {
    let kind = match meta.classification {
        Classification::Primitive => FieldKind::Primitive(meta.type_full_name.parse()?),
        Classification::String => FieldKind::String,
        Classification::Bytes => FieldKind::Bytes,
        Classification::Enum => FieldKind::Enum(strip(&meta.type_full_name).to_string()),
        Classification::EmbeddedMessage => {
            FieldKind::Message(strip(&meta.type_full_name).to_string())
        }
    };
    Ok(FieldDescriptor {
        name: meta.name.clone(),
        id: meta.id,
        kind,
        optional: meta.is_optional,
        repeated: meta.is_repeated,
        one_of: meta.part_of.clone().filter(|group| !group.is_empty()),
    })
}

fn build_service(meta: &ServiceMeta) -> ServiceDescriptor {
    let full_name = meta.name.full_name();
    let methods = meta
        .methods
        .iter()
        .map(|method| {
            Arc::new(MethodDescriptor {
                name: method.name.clone(),
                full_name: format!("{full_name}.{}", method.name),
                service: full_name.clone(),
                request_type: strip(&method.req_full_type_name).to_string(),
                response_type: strip(&method.res_full_type_name).to_string(),
                request_streaming: method.is_req_streamed,
                response_streaming: method.is_res_streamed,
            })
        })
        .collect();
    ServiceDescriptor { full_name, methods }
}
