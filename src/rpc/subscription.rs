//! Per-connection subscription registry.
//!
//! # Responsibilities
//! - Track live subscriptions keyed by request id
//! - Enforce at most one active subscription per id (atomic check-then-insert)
//! - Pump each subscription's values out as success envelopes reusing its id
//! - Destroy every live subscription exactly once when the connection closes
//!
//! # State machine per id
//! ```text
//! unregistered ──handle arrives, socket open, id vacant──▶ active
//! unregistered ──socket already closed──▶ destroyed        (silent drop)
//! active       ──same id arrives again──▶ new handle destroyed, error raised
//! active       ──connection close / stream end / stream error──▶ destroyed
//! ```
//!
//! # Design Decisions
//! - Mutations go through the dashmap entry API so concurrent
//!   registrations for one id cannot both succeed
//! - `close()` is synchronous: it aborts pump tasks and runs destroy
//!   callbacks without suspending, then clears the map
//! - A stream error is delivered as one error envelope reusing the
//!   subscription's id, after which the subscription counts as destroyed

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::router::{DestroyFn, Subscription};
use crate::rpc::envelope::{Outbound, RequestId};
use crate::rpc::error::{BoxError, RpcError};

/// Shapes a transport-level error into the wire error shape. The
/// connection manager builds one of these from its caller so the registry
/// stays independent of the router type.
pub type ShapeFn = Arc<dyn Fn(&RpcError) -> Value + Send + Sync>;

/// Runs the destroy callback at most once, from whichever side gets
/// there first (pump task, duplicate rejection, or connection close).
struct DestroyOnce(Mutex<Option<DestroyFn>>);

impl DestroyOnce {
    fn new(f: Option<DestroyFn>) -> Self {
        Self(Mutex::new(f))
    }

    fn run(&self) {
        let f = self.0.lock().ok().and_then(|mut slot| slot.take());
        if let Some(f) = f {
            f();
        }
    }
}

struct ActiveSubscription {
    abort: AbortHandle,
    destroy: Arc<DestroyOnce>,
}

/// Live subscription table for one connection.
pub struct SubscriptionRegistry {
    entries: DashMap<RequestId, ActiveSubscription>,
    closed: AtomicBool,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a subscription handle under a request id and start pumping
    /// its values to the client.
    ///
    /// If the socket is already gone the handle is destroyed and the call
    /// succeeds silently; this race has no client-visible outcome by
    /// contract. An occupied id destroys the new handle and returns
    /// [`RpcError::DuplicateSubscription`], leaving the existing entry
    /// untouched.
    pub fn register(
        self: Arc<Self>,
        id: RequestId,
        subscription: Subscription,
        outbound: Outbound,
        shape: ShapeFn,
    ) -> Result<(), RpcError> {
        if self.is_closed() || outbound.is_closed() {
            tracing::debug!(id = %id, "Socket closed before subscription registration; dropping");
            subscription.destroy();
            return Ok(());
        }

        let (stream, destroy) = subscription.into_parts();
        let destroy = Arc::new(DestroyOnce::new(destroy));

        // The pump holds the stream but stays parked until the entry is in
        // place, so a duplicate rejection can never leak a data envelope.
        let (ready_tx, ready_rx) = oneshot::channel();
        let pump = tokio::spawn(Self::pump(
            self.clone(),
            id.clone(),
            stream,
            outbound,
            shape,
            ready_rx,
        ));
        let abort = pump.abort_handle();

        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => {
                abort.abort();
                destroy.run();
                return Err(RpcError::DuplicateSubscription(id));
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveSubscription {
                    abort,
                    destroy: destroy.clone(),
                });
            }
        }

        // close() may have drained the map between the closed check and
        // the insert; finish the teardown it could not see.
        if self.is_closed() {
            self.remove_and_destroy(&id);
            return Ok(());
        }

        let _ = ready_tx.send(());
        tracing::debug!(id = %id, "Subscription registered");
        Ok(())
    }

    /// Destroy every live subscription and refuse further registrations.
    /// Synchronous and idempotent; called exactly once per connection in
    /// practice, from the close path.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<RequestId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        let count = ids.len();
        for id in ids {
            self.remove_and_destroy(&id);
        }
        if count > 0 {
            tracing::debug!(subscriptions = count, "Destroyed subscriptions on close");
        }
    }

    fn remove_and_destroy(&self, id: &RequestId) {
        if let Some((_, active)) = self.entries.remove(id) {
            active.abort.abort();
            active.destroy.run();
        }
    }

    async fn pump(
        registry: Arc<Self>,
        id: RequestId,
        mut stream: BoxStream<'static, Result<Value, BoxError>>,
        outbound: Outbound,
        shape: ShapeFn,
        ready: oneshot::Receiver<()>,
    ) {
        if ready.await.is_err() {
            return;
        }
        while let Some(item) = stream.next().await {
            match item {
                Ok(value) => outbound.send_ok(&id, value),
                Err(error) => {
                    let error = RpcError::Procedure(error);
                    tracing::warn!(id = %id, %error, "Subscription stream failed");
                    outbound.send_error(Some(&id), shape(&error));
                    break;
                }
            }
        }
        registry.remove_and_destroy(&id);
    }
}
