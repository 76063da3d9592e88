//! RPC transport core.
//!
//! # Data Flow
//! ```text
//! inbound message
//!     → envelope.rs (decode & validate)
//!     → dispatch.rs (invoke query/mutation/subscription on the caller)
//!     → immediate result: envelope.rs encodes one response
//!     → subscription:     subscription.rs registers the handle and pumps
//!                         pushed values back through the encoder
//! connection close
//!     → subscription.rs destroys every live entry for the connection
//! ```
//!
//! # Design Decisions
//! - Every recoverable failure passes through the router's error shaper so
//!   clients see one uniform error envelope regardless of origin
//! - Per-message tasks run concurrently; responses may be reordered

pub mod connection;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod subscription;

pub use connection::ConnectionHandler;
pub use envelope::{ProcedureKind, RequestDescriptor, RequestId};
pub use subscription::SubscriptionRegistry;
