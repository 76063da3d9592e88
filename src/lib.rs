//! WebSocket RPC Transport Server Library

pub mod config;
pub mod http;
pub mod observability;
pub mod router;
pub mod rpc;

pub use config::schema::ServerConfig;
pub use http::RpcServer;
pub use router::{Caller, ConnectionInfo, ContextFactory, ProcedureRouter, Subscription};
pub use rpc::error::{ParseError, RpcError};
