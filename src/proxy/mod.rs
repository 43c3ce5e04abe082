//! Edge-side fan-out proxy.
//!
//! ```text
//!                       ┌───────────────────────────────┐
//!   viewer ⇄ WebSocket  │          FanOutProxy          │
//!                       │                               │
//!      ▲                │  group 0 ──▶ aggregator A ─┐  │
//!      │ write queue    │  group 1 ──▶ aggregator B ─┤  │
//!      └─ writer task ◀─┤  group 2 ──▶ (dial failed) │  │
//!                       │        forwarder tasks ◀───┘  │
//!                       │  keep-alive fan-out ──▶ A, B  │
//!                       └───────────────────────────────┘
//! ```
//!
//! One session per viewer connection: the request is authorized, the app id
//! is hashed to one aggregator per group, and every opened upstream gets its
//! own forwarder task. Forwarders never touch the client stream directly;
//! they enqueue frames for a single writer task, which keeps client writes
//! serialized. The session ends once every opened upstream has reported a
//! done-signal.

use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use salvo::prelude::*;
use salvo::websocket::{Message, WebSocket, WebSocketUpgrade};
use salvo::{Depot, FlowCtrl, Handler, async_trait};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::record;

mod authorization;
mod hash_group;

pub use authorization::{ApiLogAccessAuthorizer, LogAccessAuthorizer};
pub use hash_group::HashGroup;

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames in flight to the client while it drains slowly.
const CLIENT_WRITE_QUEUE: usize = 64;

pub fn router(proxy: Arc<FanOutProxy>) -> Router {
    Router::with_path("{*path}")
        .hoop(crate::utils::logger::Logger)
        .goal(SubscribeEndpoint { proxy })
}

/// One viewer subscription, as extracted from the upgrade request.
pub struct SubscribeRequest {
    pub app_id: String,
    pub auth_token: String,
    /// Original path and query, forwarded verbatim so upstream filters
    /// keep working.
    pub request_uri: String,
    pub remote_addr: String,
}

pub struct FanOutProxy {
    hash_groups: Vec<HashGroup>,
    authorizer: Arc<dyn LogAccessAuthorizer>,
}

impl FanOutProxy {
    pub fn new(hash_groups: Vec<HashGroup>, authorizer: Arc<dyn LogAccessAuthorizer>) -> Self {
        Self {
            hash_groups,
            authorizer,
        }
    }

    /// Runs one viewer session to completion on the calling task.
    pub async fn handle(&self, mut ws: WebSocket, request: SubscribeRequest) {
        if let Err(reason) = self.check_access(&request).await {
            tracing::warn!(
                remote = %request.remote_addr,
                app_id = %request.app_id,
                reason,
                "rejected subscription"
            );
            let frame = record::error_frame(&request.app_id, reason);
            let _ = ws.send(Message::binary(frame)).await;
            let _ = ws.close().await;
            return;
        }

        let upstreams = self.dial_upstreams(&request).await;
        splice(ws, upstreams, &request).await;
    }

    /// The authorization gate. The authorizer is only consulted once both
    /// the app id and a token are present.
    async fn check_access(&self, request: &SubscribeRequest) -> Result<(), &'static str> {
        if request.app_id.is_empty() {
            return Err("Error: Invalid target");
        }
        if request.auth_token.is_empty() {
            return Err("Error: Authorization not provided");
        }
        if !self
            .authorizer
            .authorize(&request.auth_token, &request.app_id)
            .await
        {
            return Err("Error: Invalid authorization");
        }
        Ok(())
    }

    /// Dials one upstream per hash group, in parallel.
    ///
    /// A failed dial leaves its slot empty; partial availability beats a
    /// total outage.
    async fn dial_upstreams(&self, request: &SubscribeRequest) -> Vec<Option<UpstreamStream>> {
        let dials = self.hash_groups.iter().enumerate().map(|(group, members)| {
            let server = members.server_for(&request.app_id).to_owned();
            let url = format!("ws://{}{}", server, request.request_uri);
            let app_id = request.app_id.clone();
            async move {
                match connect_async(url.as_str()).await {
                    Ok((stream, _response)) => {
                        tracing::debug!(group, %server, %app_id, "upstream opened");
                        Some(stream)
                    }
                    Err(error) => {
                        tracing::error!(group, %server, %error, "error connecting to aggregator");
                        None
                    }
                }
            }
        });
        futures::future::join_all(dials).await
    }
}

/// Splices the opened upstreams onto the client until all of them are done.
async fn splice(ws: WebSocket, upstreams: Vec<Option<UpstreamStream>>, request: &SubscribeRequest) {
    let opened: Vec<UpstreamStream> = upstreams.into_iter().flatten().collect();
    let opened_count = opened.len();

    let (client_sink, client_stream) = ws.split();
    let (client_tx, client_rx) = mpsc::channel(CLIENT_WRITE_QUEUE);
    tokio::spawn(write_client(client_sink, client_rx));

    let (done_tx, mut done_rx) = mpsc::channel(opened_count.max(1));
    let mut upstream_writers = Vec::with_capacity(opened_count);
    for (slot, upstream) in opened.into_iter().enumerate() {
        let (upstream_sink, upstream_stream) = upstream.split();
        upstream_writers.push(upstream_sink);
        tokio::spawn(forward_upstream(
            upstream_stream,
            client_tx.clone(),
            done_tx.clone(),
            slot,
        ));
    }
    drop(client_tx);
    drop(done_tx);

    tokio::spawn(fan_out_keep_alives(client_stream, upstream_writers));

    for _ in 0..opened_count {
        if done_rx.recv().await.is_none() {
            break;
        }
    }
    tracing::debug!(
        remote = %request.remote_addr,
        app_id = %request.app_id,
        upstreams = opened_count,
        "all upstreams terminated, closing session"
    );
}

/// Forwards one upstream's frames into the client write queue.
///
/// Emits exactly one done-signal on exit, whichever way it exits.
async fn forward_upstream(
    mut upstream: SplitStream<UpstreamStream>,
    client: mpsc::Sender<Message>,
    done: mpsc::Sender<()>,
    slot: usize,
) {
    loop {
        match upstream.next().await {
            Some(Ok(frame)) if frame.is_binary() || frame.is_text() => {
                let payload = frame.into_data();
                if client.send(Message::binary(payload.to_vec())).await.is_err() {
                    tracing::debug!(slot, "client writer gone, stopping forwarder");
                    break;
                }
            }
            // Control frames carry no log payloads.
            Some(Ok(_)) => {}
            Some(Err(error)) => {
                tracing::error!(slot, %error, "error reading from aggregator");
                break;
            }
            None => {
                tracing::debug!(slot, "upstream closed");
                break;
            }
        }
    }
    let _ = done.send(()).await;
}

/// Single owner of the client's write half; everything reaches the viewer
/// through its queue, one frame at a time.
async fn write_client(
    mut client: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Message>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(error) = client.send(frame).await {
            tracing::debug!(%error, "client write failed");
            break;
        }
    }
    let _ = client.close().await;
}

/// Broadcasts every client frame to all upstreams as a liveness signal.
///
/// Write failures are ignored: a dead upstream's forwarder already handles
/// the loss, and viewer liveness is best-effort by design of the protocol.
/// Exits when the client stream ends, dropping the upstream write halves.
async fn fan_out_keep_alives(
    mut client: SplitStream<WebSocket>,
    mut upstreams: Vec<SplitSink<UpstreamStream, UpstreamMessage>>,
) {
    while let Some(inbound) = client.next().await {
        let frame = match inbound {
            Ok(frame) => frame,
            Err(error) => {
                tracing::debug!(%error, "error reading from viewer");
                break;
            }
        };
        if !(frame.is_binary() || frame.is_text()) {
            continue;
        }
        let payload = frame.as_bytes().to_vec();
        for upstream in upstreams.iter_mut() {
            let _ = upstream.send(UpstreamMessage::binary(payload.clone())).await;
        }
    }
}

/// WebSocket upgrade endpoint for viewer subscriptions.
struct SubscribeEndpoint {
    proxy: Arc<FanOutProxy>,
}

impl SubscribeEndpoint {
    async fn serve(&self, req: &mut Request, res: &mut Response) -> Result<(), StatusError> {
        let app_id = req.query::<String>("app").unwrap_or_default();
        // The header wins when both carry a token.
        let auth_token = match req.header::<String>("Authorization") {
            Some(token) if !token.is_empty() => token,
            _ => req.query::<String>("authorization").unwrap_or_default(),
        };
        let request_uri = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| req.uri().path().to_owned());
        let remote_addr = req.remote_addr().to_string();
        let proxy = Arc::clone(&self.proxy);

        WebSocketUpgrade::new()
            .upgrade(req, res, move |ws| async move {
                proxy
                    .handle(
                        ws,
                        SubscribeRequest {
                            app_id,
                            auth_token,
                            request_uri,
                            remote_addr,
                        },
                    )
                    .await;
            })
            .await
    }
}

#[async_trait]
impl Handler for SubscribeEndpoint {
    async fn handle(
        &self,
        req: &mut Request,
        _depot: &mut Depot,
        res: &mut Response,
        _ctrl: &mut FlowCtrl,
    ) {
        if let Err(error) = self.serve(req, res).await {
            res.render(error);
        }
    }
}
