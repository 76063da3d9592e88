//! Connection lifecycle orchestration.
//!
//! # Responsibilities
//! - Build per-connection context; reject the connection on failure
//! - Bind a caller and wire the outbound writer task
//! - Spawn one task per inbound message (no ordering between them)
//! - Shape every recoverable failure into an error envelope
//! - Tear down the subscription registry exactly once when the socket goes
//!
//! # Data Flow
//! ```text
//! socket ──▶ read loop ──spawn──▶ decode ──▶ dispatch ──▶ send_ok
//!                                              │
//!                                              └─▶ registry.register ──pump──▶ send_ok per value
//! ```
//!
//! # Design Decisions
//! - Close handling is registered once, at connection establishment: the
//!   read loop ending is the single close event, whatever caused it
//! - A per-message failure keeps the connection open; only context-setup
//!   failure or transport loss closes it
//! - At the transport layer a failure is shaped with kind "unknown" and no
//!   path/input, since procedure-level detail is not guaranteed known here

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::router::{
    Caller, ConnectionInfo, ContextFactory, DataTransformer, ErrorShapeParams, ProcedureRouter,
};
use crate::rpc::dispatch::{dispatch, DispatchOutcome};
use crate::rpc::envelope::{self, Outbound, RequestId};
use crate::rpc::error::{ParseError, RpcError};
use crate::rpc::subscription::{ShapeFn, SubscriptionRegistry};

/// Everything needed to run one connection, shared across all of them.
pub struct ConnectionHandler<R, F> {
    router: Arc<R>,
    context_factory: Arc<F>,
    transformer: Arc<dyn DataTransformer>,
}

impl<R, F> Clone for ConnectionHandler<R, F> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            context_factory: self.context_factory.clone(),
            transformer: self.transformer.clone(),
        }
    }
}

impl<R, F> ConnectionHandler<R, F>
where
    R: ProcedureRouter,
    F: ContextFactory<Ctx = R::Ctx>,
{
    pub fn new(
        router: Arc<R>,
        context_factory: Arc<F>,
        transformer: Arc<dyn DataTransformer>,
    ) -> Self {
        Self {
            router,
            context_factory,
            transformer,
        }
    }

    /// Drive one accepted socket to completion.
    pub async fn serve(self, socket: WebSocket, info: ConnectionInfo) {
        let connection_id = Uuid::new_v4();
        tracing::info!(
            connection_id = %connection_id,
            remote_addr = %info.remote_addr,
            "Connection established"
        );

        let (mut sink, mut inbound) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });
        let outbound = Outbound::new(tx.clone(), self.transformer.clone());

        // (1) Context construction: fatal on failure. One error envelope,
        // then an abnormal close.
        let ctx = match self.context_factory.create_context(&info).await {
            Ok(ctx) => ctx,
            Err(source) => {
                let error = RpcError::ContextSetup(source);
                tracing::warn!(
                    connection_id = %connection_id,
                    %error,
                    "Rejecting connection"
                );
                let shape = self.router.shape_error(ErrorShapeParams {
                    error: &error,
                    kind: None,
                    path: None,
                    input: None,
                    ctx: None,
                });
                outbound.send_error(None, shape);
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: close_code::ABNORMAL,
                    reason: "context construction failed".into(),
                })));
                drop(outbound);
                drop(tx);
                let _ = writer.await;
                return;
            }
        };

        // (2) Bind the caller and the per-connection registry. The close
        // path below is the only teardown site for this connection.
        let caller = Caller::new(self.router.clone(), ctx);
        let registry = SubscriptionRegistry::new();
        let shape: ShapeFn = {
            let caller = caller.clone();
            Arc::new(move |error| caller.shape_error(error, None, None, None))
        };

        // (3) One independently scheduled task per inbound message; no
        // ordering is imposed between in-flight requests.
        while let Some(frame) = inbound.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(error) => {
                    tracing::debug!(connection_id = %connection_id, %error, "Transport error");
                    break;
                }
            };
            match msg {
                Message::Text(raw) => {
                    let caller = caller.clone();
                    let registry = registry.clone();
                    let outbound = outbound.clone();
                    let transformer = self.transformer.clone();
                    let shape = shape.clone();
                    tokio::spawn(async move {
                        handle_message(raw.as_str(), &caller, &registry, &outbound, transformer, shape)
                            .await;
                    });
                }
                Message::Binary(_) => {
                    // The wire protocol is text-only; a binary frame is a
                    // malformed message like any other.
                    let error = RpcError::Parse(ParseError::NonText);
                    tracing::debug!(connection_id = %connection_id, %error, "Rejected frame");
                    outbound.send_error(None, caller.shape_error(&error, None, None, None));
                }
                Message::Close(_) => break,
                // Ping/pong are handled by the transport.
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        // (4) Close: destroy every live subscription before the connection
        // task finishes. Synchronous; no envelope can follow it.
        registry.close();
        writer.abort();
        tracing::info!(connection_id = %connection_id, "Connection closed");
    }
}

/// Process one inbound message end to end, shaping any failure into an
/// error envelope. The connection stays open regardless of the outcome.
async fn handle_message<R: ProcedureRouter>(
    raw: &str,
    caller: &Caller<R>,
    registry: &Arc<SubscriptionRegistry>,
    outbound: &Outbound,
    transformer: Arc<dyn DataTransformer>,
    shape: ShapeFn,
) {
    if let Err((id, error)) = process(raw, caller, registry, outbound, transformer, shape).await {
        tracing::warn!(%error, id = ?id, "Request failed");
        let shaped = caller.shape_error(&error, None, None, None);
        outbound.send_error(id.as_ref(), shaped);
    }
}

async fn process<R: ProcedureRouter>(
    raw: &str,
    caller: &Caller<R>,
    registry: &Arc<SubscriptionRegistry>,
    outbound: &Outbound,
    transformer: Arc<dyn DataTransformer>,
    shape: ShapeFn,
) -> Result<(), (Option<RequestId>, RpcError)> {
    let descriptor = envelope::decode(raw, transformer.as_ref())
        .map_err(|e| (None, RpcError::Parse(e)))?;
    let id = descriptor.id.clone();

    let outcome = dispatch(caller, &descriptor)
        .await
        .map_err(|e| (Some(id.clone()), e))?;

    match outcome {
        DispatchOutcome::Response(data) => {
            outbound.send_ok(&id, data);
            Ok(())
        }
        DispatchOutcome::Subscription(subscription) => registry
            .clone()
            .register(id.clone(), subscription, outbound.clone(), shape)
            .map_err(|e| (Some(id), e)),
    }
}
