//! Pluggable payload codec applied at the wire boundary.
//!
//! Procedures and the transport core only ever see `serde_json::Value`;
//! the transformer decides how values cross the socket as text.

use serde_json::Value;

use crate::rpc::error::BoxError;

/// Two-stage codec: an inbound deserialize and an outbound serialize.
pub trait DataTransformer: Send + Sync + 'static {
    /// Inbound stage: raw socket text to a structured value.
    fn deserialize(&self, raw: &str) -> Result<Value, BoxError>;

    /// Outbound stage: a structured value to socket text.
    fn serialize(&self, value: &Value) -> Result<String, BoxError>;
}

/// Plain JSON, the default wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTransformer;

impl DataTransformer for JsonTransformer {
    fn deserialize(&self, raw: &str) -> Result<Value, BoxError> {
        serde_json::from_str(raw).map_err(Into::into)
    }

    fn serialize(&self, value: &Value) -> Result<String, BoxError> {
        serde_json::to_string(value).map_err(Into::into)
    }
}
