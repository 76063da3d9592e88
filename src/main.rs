//! WebSocket RPC server binary.
//!
//! Serves a small demo router over the configured endpoint:
//! - `ping` query returns `"pong"`
//! - `whoami` query returns the peer address from the connection context
//! - `echo` mutation returns its input
//! - `tick` subscription pushes `1..=count` at a fixed interval

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use futures_util::stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use wsrpc::config::{load_config, ServerConfig};
use wsrpc::rpc::error::BoxError;
use wsrpc::{ConnectionInfo, ContextFactory, ProcedureRouter, RpcServer, Subscription};

#[derive(Parser, Debug)]
#[command(name = "wsrpc", about = "WebSocket RPC transport server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Per-connection context for the demo router.
struct DemoContext {
    remote_addr: std::net::SocketAddr,
}

struct DemoContextFactory;

#[async_trait]
impl ContextFactory for DemoContextFactory {
    type Ctx = DemoContext;

    async fn create_context(&self, info: &ConnectionInfo) -> Result<DemoContext, BoxError> {
        Ok(DemoContext {
            remote_addr: info.remote_addr,
        })
    }
}

struct DemoRouter;

#[async_trait]
impl ProcedureRouter for DemoRouter {
    type Ctx = DemoContext;

    async fn query(&self, ctx: &DemoContext, path: &str, _input: Value) -> Result<Value, BoxError> {
        match path {
            "ping" => Ok(json!("pong")),
            "whoami" => Ok(json!(ctx.remote_addr.to_string())),
            _ => Err(format!("no such query: {}", path).into()),
        }
    }

    async fn mutation(
        &self,
        _ctx: &DemoContext,
        path: &str,
        input: Value,
    ) -> Result<Value, BoxError> {
        match path {
            "echo" => Ok(input),
            _ => Err(format!("no such mutation: {}", path).into()),
        }
    }

    async fn subscription(
        &self,
        _ctx: &DemoContext,
        path: &str,
        input: Value,
    ) -> Result<Subscription, BoxError> {
        match path {
            "tick" => {
                let count = input.get("count").and_then(Value::as_u64).unwrap_or(5);
                let interval_ms = input
                    .get("interval_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(1000);
                let ticks = stream::unfold(0u64, move |n| async move {
                    if n >= count {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                    Some((Ok(json!(n + 1)), n + 1))
                });
                Ok(Subscription::new(ticks)
                    .on_destroy(|| tracing::debug!("tick subscription destroyed")))
            }
            _ => Err(format!("no such subscription: {}", path).into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    wsrpc::observability::logging::init(&config.observability.log_filter);

    tracing::info!("wsrpc v0.1.0 starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        endpoint = %config.endpoint.path,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let server = RpcServer::new(config, Arc::new(DemoRouter), Arc::new(DemoContextFactory));
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
