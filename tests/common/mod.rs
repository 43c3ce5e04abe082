//! Shared harness: real listeners on loopback, driven by websocket clients.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use salvo::async_trait;
use salvo::conn::Acceptor;
use salvo::prelude::*;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use logfabric::aggregator::{self, MetriczEndpoint, TailEndpoint};
use logfabric::proxy::{self, FanOutProxy, HashGroup, LogAccessAuthorizer};
use logfabric::sinks::SinkManager;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serves `router` on an ephemeral loopback port.
pub async fn serve(router: Router) -> SocketAddr {
    let acceptor = TcpListener::new(("127.0.0.1", 0)).bind().await;
    let addr = acceptor.holdings()[0]
        .local_addr
        .clone()
        .into_std()
        .expect("listener has a socket address");
    tokio::spawn(async move {
        Server::new(acceptor).serve(Service::new(router)).await;
    });
    addr
}

pub struct AggregatorHarness {
    pub addr: SocketAddr,
    pub manager: Arc<SinkManager>,
}

pub async fn start_aggregator(keep_alive: Duration, buffer_capacity: usize) -> AggregatorHarness {
    let manager = SinkManager::start();
    let tail = TailEndpoint::new(Arc::clone(&manager), keep_alive, buffer_capacity);
    let metricz = MetriczEndpoint::new(Arc::clone(&manager), None);
    let addr = serve(aggregator::router(tail, metricz)).await;
    AggregatorHarness { addr, manager }
}

pub async fn start_proxy(
    groups: Vec<HashGroup>,
    authorizer: Arc<dyn LogAccessAuthorizer>,
) -> SocketAddr {
    let fan_out = Arc::new(FanOutProxy::new(groups, authorizer));
    serve(proxy::router(fan_out)).await
}

/// Answers every access check the same way.
pub struct StaticAuthorizer(pub bool);

#[async_trait]
impl LogAccessAuthorizer for StaticAuthorizer {
    async fn authorize(&self, _auth_token: &str, _app_id: &str) -> bool {
        self.0
    }
}

/// Fails the session loudly if the gate consults it at all.
pub struct PanicAuthorizer;

#[async_trait]
impl LogAccessAuthorizer for PanicAuthorizer {
    async fn authorize(&self, _auth_token: &str, _app_id: &str) -> bool {
        panic!("authorizer must not be consulted");
    }
}

pub async fn connect(addr: SocketAddr, path_query: &str) -> WsClient {
    let url = format!("ws://{addr}{path_query}");
    let (client, _response) = connect_async(url.as_str()).await.expect("websocket connect");
    client
}

/// Next binary payload within `timeout`; `None` once the stream closes.
pub async fn next_binary(client: &mut WsClient, timeout: Duration) -> Option<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let frame = tokio::time::timeout(remaining, client.next()).await.ok()??.ok()?;
        match frame {
            Message::Binary(payload) => return Some(payload.to_vec()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Asserts the stream ends (close frame, EOF, or error) within `timeout`.
pub async fn expect_closed(client: &mut WsClient, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, client.next()).await {
            Err(_) => panic!("stream did not close in time"),
            Ok(None) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(Message::Close(_)))) => return,
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// Polls `condition` for up to two seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
