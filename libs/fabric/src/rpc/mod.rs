//! Typed services on top of sessions
//!
//! A [`ProtoRegistry`] describes services and their methods. Handlers for
//! them are registered in a [`ServiceHandlerDispatch`], which resolves the
//! exchange type of every incoming exchange to a handler. [`ServiceClient`]
//! is the calling side.

use serde::de::DeserializeOwned;
use serde::Serialize;
use switchboard_core::StatusError;

use crate::codec::Codec;

pub mod client;
pub mod dispatch;
pub mod handler;
pub mod meta;
pub mod registry;

pub use self::client::{call_unary, CallOptions, ServiceClient};
pub use self::dispatch::{CallContext, Registration, ServiceHandlerDispatch};
pub use self::handler::ServiceHandler;
pub use self::meta::{
    Classification, EnumMeta, EnumValueMeta, FieldMeta, Meta, MethodMeta, Name, ServiceMeta,
    TypeMeta,
};
pub use self::registry::{
    EnumDescriptor, FieldDescriptor, FieldKind, MethodDescriptor, MethodKind, PrimitiveKind,
    ProtoRegistry, ServiceDescriptor, TypeDescriptor,
};

pub(crate) fn encode_payload<C: Codec, T: Serialize>(
    codec: &C,
    value: &T,
) -> Result<Vec<u8>, StatusError> {
    codec
        .encode(value)
        .map_err(|e| StatusError::internal(e.to_string()))
}

pub(crate) fn decode_payload<C: Codec, T: DeserializeOwned>(
    codec: &C,
    bytes: &[u8],
) -> Result<T, StatusError> {
    codec
        .decode(bytes)
        .map_err(|e| StatusError::invalid_argument(e.to_string()))
}
