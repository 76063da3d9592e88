//! HTTP server hosting the WebSocket RPC endpoint.
//!
//! # Responsibilities
//! - Create the Axum router with the upgrade handler
//! - Wire up middleware (tracing)
//! - Bind the server to a listener with graceful shutdown
//! - Hand each upgraded socket to the connection handler

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::HeaderMap,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::router::{ConnectionInfo, ContextFactory, DataTransformer, JsonTransformer, ProcedureRouter};
use crate::rpc::ConnectionHandler;

/// WebSocket RPC server: one upgrade route, one connection task per client.
pub struct RpcServer<R, F> {
    config: ServerConfig,
    handler: ConnectionHandler<R, F>,
}

impl<R, F> RpcServer<R, F>
where
    R: ProcedureRouter,
    F: ContextFactory<Ctx = R::Ctx>,
{
    /// Create a server with the default JSON payload transformer.
    pub fn new(config: ServerConfig, router: Arc<R>, context_factory: Arc<F>) -> Self {
        Self::with_transformer(config, router, context_factory, Arc::new(JsonTransformer))
    }

    /// Create a server with a custom payload transformer.
    pub fn with_transformer(
        config: ServerConfig,
        router: Arc<R>,
        context_factory: Arc<F>,
        transformer: Arc<dyn DataTransformer>,
    ) -> Self {
        let handler = ConnectionHandler::new(router, context_factory, transformer);
        Self { config, handler }
    }

    /// Build the Axum router with all middleware layers.
    pub fn app(&self) -> Router {
        Router::new()
            .route(&self.config.endpoint.path, any(ws_handler::<R, F>))
            .with_state(self.handler.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            endpoint = %self.config.endpoint.path,
            "RPC server starting"
        );

        let app = self
            .app()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("RPC server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Upgrade handler: completes the handshake and hands the socket off.
async fn ws_handler<R, F>(
    State(handler): State<ConnectionHandler<R, F>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response
where
    R: ProcedureRouter,
    F: ContextFactory<Ctx = R::Ctx>,
{
    let info = ConnectionInfo {
        remote_addr,
        headers,
    };
    ws.on_upgrade(move |socket| handler.serve(socket, info))
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
