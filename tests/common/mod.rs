//! Shared utilities for integration testing: a fixture router and an
//! in-process server plus a thin WebSocket client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use wsrpc::rpc::error::BoxError;
use wsrpc::{ConnectionInfo, ContextFactory, ProcedureRouter, RpcServer, ServerConfig, Subscription};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Router fixture covering all three procedure kinds plus failure paths.
pub struct TestRouter {
    /// Incremented once per destroyed subscription.
    pub destroyed: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcedureRouter for TestRouter {
    type Ctx = ();

    async fn query(&self, _ctx: &(), path: &str, _input: Value) -> Result<Value, BoxError> {
        match path {
            "ping" => Ok(json!("pong")),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!("slow done"))
            }
            _ => Err(format!("no such query: {}", path).into()),
        }
    }

    async fn mutation(&self, _ctx: &(), path: &str, input: Value) -> Result<Value, BoxError> {
        match path {
            "echo" => Ok(input),
            _ => Err(format!("no such mutation: {}", path).into()),
        }
    }

    async fn subscription(
        &self,
        _ctx: &(),
        path: &str,
        input: Value,
    ) -> Result<Subscription, BoxError> {
        let destroyed = self.destroyed.clone();
        let track = move || {
            destroyed.fetch_add(1, Ordering::SeqCst);
        };
        match path {
            // Emits the given values immediately, then ends.
            "emit" => {
                let values: Vec<Value> = input
                    .get("values")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let items = stream::iter(values.into_iter().map(Ok));
                Ok(Subscription::new(items).on_destroy(track))
            }
            // Pushes 1.. at a fixed interval, forever.
            "tick" => {
                let interval_ms = input
                    .get("interval_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(50);
                let ticks = stream::unfold(0u64, move |n| async move {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                    Some((Ok(json!(n + 1)), n + 1))
                });
                Ok(Subscription::new(ticks).on_destroy(track))
            }
            // Never emits anything.
            "pending" => Ok(Subscription::new(stream::pending()).on_destroy(track)),
            // Emits one value, then fails.
            "broken" => {
                let items: Vec<Result<Value, BoxError>> =
                    vec![Ok(json!(1)), Err("producer failed".into())];
                Ok(Subscription::new(stream::iter(items)).on_destroy(track))
            }
            _ => Err(format!("no such subscription: {}", path).into()),
        }
    }
}

/// Rejects connections carrying an `x-deny` header; accepts the rest.
pub struct TestContextFactory;

#[async_trait]
impl ContextFactory for TestContextFactory {
    type Ctx = ();

    async fn create_context(&self, info: &ConnectionInfo) -> Result<(), BoxError> {
        if info.headers.contains_key("x-deny") {
            return Err("connection denied".into());
        }
        Ok(())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub destroyed: Arc<AtomicUsize>,
}

/// Start a server on an ephemeral port with the fixture router.
pub async fn start_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let destroyed = Arc::new(AtomicUsize::new(0));
    let router = Arc::new(TestRouter {
        destroyed: destroyed.clone(),
    });
    let server = RpcServer::new(ServerConfig::default(), router, Arc::new(TestContextFactory));

    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    TestServer { addr, destroyed }
}

/// Open a client connection to the server's RPC endpoint.
pub async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/rpc", addr)).await.unwrap();
    client
}

/// Open a client connection carrying the `x-deny` header, which the test
/// context factory rejects.
pub async fn connect_denied(addr: SocketAddr) -> Client {
    let mut request = format!("ws://{}/rpc", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-deny", HeaderValue::from_static("1"));
    let (client, _) = connect_async(request).await.unwrap();
    client
}

pub async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Receive the next text frame as JSON, skipping control frames.
pub async fn recv_json(client: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("connection closed")
            .expect("transport error");
        match msg {
            Message::Text(raw) => return serde_json::from_str(raw.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Build a well-formed request envelope.
pub fn request(id: i64, method: &str, path: &str, input: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": { "path": path, "input": input },
    })
}

/// Poll until the destroyed-subscription counter reaches `expected`.
pub async fn wait_for_destroyed(counter: &Arc<AtomicUsize>, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while counter.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriptions were not destroyed in time");
}
