//! Envelope codec: wire envelopes in, wire envelopes out.
//!
//! # Responsibilities
//! - Validate and decode one inbound message into a request descriptor
//! - Encode success and error results into outbound envelopes
//!
//! # Wire format
//! ```text
//! request:  { "jsonrpc": "2.0", "id": <number>, "method": "query"|"mutation"|"subscription",
//!             "params": { "path": <string>, "input": <any> } }
//! success:  { "jsonrpc": "2.0", "id": <number>, "result": { "ok": true, "data": <any> } }
//! error:    { "jsonrpc": "2.0", "id": <number?>, "error": <shape> }
//! ```
//!
//! # Design Decisions
//! - Validation returns a tagged `ParseError` per failed check instead of
//!   throwing; parse failures stay on the normal control path
//! - Payloads (`input`, `data`) are opaque and pass through untouched
//! - The `id` key is omitted entirely when no identifier is known

use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::{json, Map, Number, Value};
use tokio::sync::mpsc;

use crate::router::DataTransformer;
use crate::rpc::error::ParseError;

/// Numeric request identifier. JSON numbers are finite by construction,
/// so a well-formed `RequestId` always satisfies the wire invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Number);

impl RequestId {
    pub fn as_number(&self) -> &Number {
        &self.0
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self(Number::from(n))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The three procedure kinds carried in the `method` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Query,
    Mutation,
    Subscription,
}

impl ProcedureKind {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "query" => Some(Self::Query),
            "mutation" => Some(Self::Mutation),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

/// The validated form of one inbound message.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: RequestId,
    pub kind: ProcedureKind,
    pub path: String,
    /// Opaque procedure input, not interpreted by the transport.
    pub input: Value,
}

/// Decode one raw text message through the transformer's inbound stage.
///
/// Checks run in a fixed order and each failure maps to its own
/// [`ParseError`] variant: object shape, `method`, `params`, `id`,
/// `params.path`.
pub fn decode(raw: &str, transformer: &dyn DataTransformer) -> Result<RequestDescriptor, ParseError> {
    let value = transformer
        .deserialize(raw)
        .map_err(|e| ParseError::Deserialize(e.to_string()))?;

    let obj = match &value {
        Value::Object(map) => map,
        _ => return Err(ParseError::NotAnObject),
    };

    let kind = match obj.get("method") {
        Some(Value::String(method)) => ProcedureKind::from_method(method)
            .ok_or_else(|| ParseError::InvalidMethod(Some(method.clone())))?,
        _ => return Err(ParseError::InvalidMethod(None)),
    };

    let params = match obj.get("params") {
        Some(Value::Object(map)) => map,
        _ => return Err(ParseError::InvalidParams),
    };

    let id = match obj.get("id") {
        Some(Value::Number(n)) => RequestId(n.clone()),
        _ => return Err(ParseError::InvalidId),
    };

    let path = match params.get("path") {
        Some(Value::String(path)) => path.clone(),
        _ => return Err(ParseError::InvalidPath),
    };

    let input = params.get("input").cloned().unwrap_or(Value::Null);

    Ok(RequestDescriptor { id, kind, path, input })
}

/// Encoder half of the codec, bound to one connection's outbound channel.
///
/// Sends are best-effort: once the writer task is gone the channel is
/// closed and envelopes are silently dropped, which is the defined
/// behavior for a connection torn down mid-flight.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Message>,
    transformer: Arc<dyn DataTransformer>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<Message>, transformer: Arc<dyn DataTransformer>) -> Self {
        Self { tx, transformer }
    }

    /// Whether the socket writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send `{ result: { ok: true, data } }` for the given id.
    ///
    /// Queries and mutations call this exactly once per request;
    /// subscriptions call it once per pushed value, reusing the id.
    pub fn send_ok(&self, id: &RequestId, data: Value) {
        self.send_envelope(envelope(
            Some(id),
            "result",
            json!({ "ok": true, "data": data }),
        ));
    }

    /// Send `{ error: <shape> }`, with the `id` key omitted when the
    /// failure predates a parsed identifier.
    pub fn send_error(&self, id: Option<&RequestId>, shape: Value) {
        self.send_envelope(envelope(id, "error", shape));
    }

    fn send_envelope(&self, value: Value) {
        let raw = match self.transformer.serialize(&value) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::error!(%error, "Failed to serialize outbound envelope");
                return;
            }
        };
        let _ = self.tx.send(Message::Text(raw.into()));
    }
}

fn envelope(id: Option<&RequestId>, key: &str, body: Value) -> Value {
    let mut map = Map::new();
    map.insert("jsonrpc".to_string(), json!("2.0"));
    if let Some(id) = id {
        map.insert("id".to_string(), Value::Number(id.as_number().clone()));
    }
    map.insert(key.to_string(), body);
    Value::Object(map)
}
