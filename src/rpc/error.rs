//! Failure taxonomy for the RPC transport.
//!
//! # Responsibilities
//! - Distinct, named parse/validation failures (one variant per check)
//! - Transport-level error classification for envelope shaping
//!
//! # Design Decisions
//! - Parse failures are values on the normal control path, never panics
//! - Business-logic errors from procedures are carried opaquely (boxed)
//!   and shaped by the router's error shaper, not interpreted here

use thiserror::Error;

use crate::rpc::envelope::RequestId;

/// Boxed error type used at every collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A malformed inbound message, detected by the envelope codec.
///
/// Each variant corresponds to exactly one validation step, in the order
/// the codec applies them.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The socket frame was not a text message.
    #[error("expected a text frame")]
    NonText,

    /// The transformer's inbound stage could not deserialize the payload.
    #[error("payload is not valid JSON: {0}")]
    Deserialize(String),

    /// The top-level value was not a plain object.
    #[error("request envelope must be an object")]
    NotAnObject,

    /// The `method` field was missing or not a recognized procedure kind.
    #[error("unknown procedure kind: {0:?}")]
    InvalidMethod(Option<String>),

    /// The `params` field was missing or not a plain object.
    #[error("params must be an object")]
    InvalidParams,

    /// The `id` field was missing or not a finite number.
    #[error("id must be a number")]
    InvalidId,

    /// The `params.path` field was missing or not a string.
    #[error("path must be a string")]
    InvalidPath,
}

/// A failure surfaced while handling one connection or one message.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The inbound envelope failed validation.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Per-connection context construction failed; fatal for the connection.
    #[error("context construction failed: {0}")]
    ContextSetup(#[source] BoxError),

    /// A query, mutation, or subscription-setup call failed.
    #[error("procedure failed: {0}")]
    Procedure(#[source] BoxError),

    /// A subscription is already registered under this request id.
    #[error("duplicate subscription id {0:?}")]
    DuplicateSubscription(RequestId),
}

impl RpcError {
    /// JSON-RPC error code for the default error shape.
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(ParseError::NonText | ParseError::Deserialize(_)) => -32700,
            RpcError::Parse(_) => -32600,
            // Internal error for everything the transport cannot classify.
            RpcError::ContextSetup(_) | RpcError::Procedure(_) => -32603,
            RpcError::DuplicateSubscription(_) => -32600,
        }
    }
}
