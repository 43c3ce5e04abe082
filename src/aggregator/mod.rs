//! Aggregator HTTP surface: viewer subscriptions and counter snapshots.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use salvo::prelude::*;
use salvo::websocket::{Message, WebSocketUpgrade};
use salvo::{Depot, FlowCtrl, Handler, async_trait};
use tokio::sync::mpsc;

use crate::record;
use crate::sinks::{SinkManager, WebsocketSink};

mod ingest;
pub use ingest::IngestListener;

pub fn router(tail: TailEndpoint, metricz: MetriczEndpoint) -> Router {
    Router::new()
        .hoop(crate::utils::logger::Logger)
        .push(Router::with_path("tail").goal(tail))
        .push(Router::with_path("metricz").get(metricz))
}

/// `GET /tail?app=<id>` with WebSocket upgrade.
///
/// Creates a [`WebsocketSink`] for the connection and registers it with the
/// manager; the handler task then becomes the sink's delivery loop.
pub struct TailEndpoint {
    manager: Arc<SinkManager>,
    keep_alive: Duration,
    buffer_capacity: usize,
}

impl TailEndpoint {
    pub fn new(manager: Arc<SinkManager>, keep_alive: Duration, buffer_capacity: usize) -> Self {
        Self {
            manager,
            keep_alive,
            buffer_capacity,
        }
    }

    async fn serve(&self, req: &mut Request, res: &mut Response) -> Result<(), StatusError> {
        let app_id = req.query::<String>("app").unwrap_or_default();
        let remote_addr = req.remote_addr().to_string();
        let manager = Arc::clone(&self.manager);
        let keep_alive = self.keep_alive;
        let buffer_capacity = self.buffer_capacity;

        WebSocketUpgrade::new()
            .upgrade(req, res, move |mut ws| async move {
                if app_id.is_empty() {
                    tracing::warn!(remote = %remote_addr, "rejected subscription with invalid app id");
                    let frame = record::error_frame("", "Error: Invalid target");
                    let _ = ws.send(Message::binary(frame)).await;
                    let _ = ws.close().await;
                    return;
                }

                let sink = Arc::new(WebsocketSink::new(
                    app_id,
                    remote_addr,
                    keep_alive,
                    buffer_capacity,
                    manager.close_sender(),
                ));
                let (input_tx, input_rx) = mpsc::unbounded_channel();
                manager.register(Arc::clone(&sink), input_tx);
                sink.run(ws, input_rx).await;
            })
            .await
    }
}

#[async_trait]
impl Handler for TailEndpoint {
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

/// `GET /metricz`: JSON counter snapshots for sinks and ingest.
pub struct MetriczEndpoint {
    manager: Arc<SinkManager>,
    ingest: Option<Arc<IngestListener>>,
}

impl MetriczEndpoint {
    pub fn new(manager: Arc<SinkManager>, ingest: Option<Arc<IngestListener>>) -> Self {
        Self { manager, ingest }
    }
}

#[async_trait]
impl Handler for MetriczEndpoint {
    async fn handle(
        &self,
        _req: &mut Request,
        _depot: &mut Depot,
        res: &mut Response,
        _ctrl: &mut FlowCtrl,
    ) {
        let mut snapshots = self.manager.emit();
        if let Some(ingest) = &self.ingest {
            snapshots.extend(ingest.emit());
        }
        res.render(Json(snapshots));
    }
}
