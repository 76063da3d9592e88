//! HTTP/WebSocket server surface.

pub mod server;

pub use server::RpcServer;
