//! Collaborator interfaces consumed by the transport core.
//!
//! # Responsibilities
//! - Define the procedure router seam (query/mutation/subscription + error shaping)
//! - Define per-connection context construction
//! - Define the subscription handle returned by subscription procedures
//!
//! # Design Decisions
//! - The transport never interprets procedure results; payloads stay opaque
//!   `serde_json::Value`s on both sides of the seam
//! - A `Caller` binds a router to one connection's context so message
//!   handlers never touch the context directly
//! - A subscription is an explicit stream plus a destroy callback, not a
//!   live object with ad hoc event wiring

pub mod transformer;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use futures_util::stream::BoxStream;
use futures_util::Stream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::rpc::envelope::ProcedureKind;
use crate::rpc::error::{BoxError, RpcError};

pub use transformer::{DataTransformer, JsonTransformer};

/// Callback run exactly once when a subscription terminates.
pub type DestroyFn = Box<dyn FnOnce() + Send>;

/// A live subscription handle: a lazy, possibly-infinite sequence of
/// opaque values with an explicit teardown hook.
///
/// An `Err` item is delivered to the client as an error envelope and
/// terminates the subscription.
pub struct Subscription {
    stream: BoxStream<'static, Result<Value, BoxError>>,
    on_destroy: Option<DestroyFn>,
}

impl Subscription {
    /// Wrap a value stream into a subscription handle.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            on_destroy: None,
        }
    }

    /// Attach a teardown hook, releasing whatever resources back the stream.
    pub fn on_destroy(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_destroy = Some(Box::new(f));
        self
    }

    /// Run the teardown hook without consuming any values.
    ///
    /// Used when the handle is rejected before registration (duplicate id,
    /// socket already closed).
    pub(crate) fn destroy(mut self) {
        if let Some(f) = self.on_destroy.take() {
            f();
        }
    }

    pub(crate) fn into_parts(mut self) -> (BoxStream<'static, Result<Value, BoxError>>, Option<DestroyFn>) {
        let destroy = self.on_destroy.take();
        (self.stream, destroy)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("has_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

/// Inputs to [`ProcedureRouter::shape_error`].
///
/// `kind`, `path`, and `input` are `None` when the failure occurred before
/// procedure-level detail was known (parse failures, context setup).
pub struct ErrorShapeParams<'a, Ctx> {
    pub error: &'a RpcError,
    pub kind: Option<ProcedureKind>,
    pub path: Option<&'a str>,
    pub input: Option<&'a Value>,
    pub ctx: Option<&'a Ctx>,
}

/// The procedure-execution engine, seen from the transport.
#[async_trait]
pub trait ProcedureRouter: Send + Sync + 'static {
    /// Per-connection context produced by the [`ContextFactory`].
    type Ctx: Send + Sync + 'static;

    /// Resolve a read-only procedure.
    async fn query(&self, ctx: &Self::Ctx, path: &str, input: Value) -> Result<Value, BoxError>;

    /// Resolve a mutating procedure.
    async fn mutation(&self, ctx: &Self::Ctx, path: &str, input: Value) -> Result<Value, BoxError>;

    /// Set up a subscription procedure. The setup itself may suspend; the
    /// returned handle produces the pushed values.
    async fn subscription(
        &self,
        ctx: &Self::Ctx,
        path: &str,
        input: Value,
    ) -> Result<Subscription, BoxError>;

    /// Normalize any transport- or procedure-level failure into the wire
    /// error shape. Every error envelope passes through here so clients
    /// see one uniform structure regardless of origin.
    fn shape_error(&self, params: ErrorShapeParams<'_, Self::Ctx>) -> Value {
        json!({
            "message": params.error.to_string(),
            "code": params.error.code(),
            "data": {
                "type": params.kind.map_or("unknown", ProcedureKind::as_str),
                "path": params.path,
            },
        })
    }
}

/// Transport-level details handed to context construction.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Peer address of the upgraded socket.
    pub remote_addr: SocketAddr,
    /// Headers from the upgrade request.
    pub headers: HeaderMap,
}

/// Builds the per-connection context before any message is processed.
#[async_trait]
pub trait ContextFactory: Send + Sync + 'static {
    type Ctx: Send + Sync + 'static;

    /// May fail; failure is fatal for the connection (one error envelope,
    /// then an abnormal close).
    async fn create_context(&self, info: &ConnectionInfo) -> Result<Self::Ctx, BoxError>;
}

/// A router bound to one connection's context.
pub struct Caller<R: ProcedureRouter> {
    router: Arc<R>,
    ctx: Arc<R::Ctx>,
}

impl<R: ProcedureRouter> Clone for Caller<R> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<R: ProcedureRouter> Caller<R> {
    pub fn new(router: Arc<R>, ctx: R::Ctx) -> Self {
        Self {
            router,
            ctx: Arc::new(ctx),
        }
    }

    pub async fn query(&self, path: &str, input: Value) -> Result<Value, BoxError> {
        self.router.query(&self.ctx, path, input).await
    }

    pub async fn mutation(&self, path: &str, input: Value) -> Result<Value, BoxError> {
        self.router.mutation(&self.ctx, path, input).await
    }

    pub async fn subscription(&self, path: &str, input: Value) -> Result<Subscription, BoxError> {
        self.router.subscription(&self.ctx, path, input).await
    }

    /// Shape an error with this connection's context attached.
    pub fn shape_error(
        &self,
        error: &RpcError,
        kind: Option<ProcedureKind>,
        path: Option<&str>,
        input: Option<&Value>,
    ) -> Value {
        self.router.shape_error(ErrorShapeParams {
            error,
            kind,
            path,
            input,
            ctx: Some(&self.ctx),
        })
    }
}
