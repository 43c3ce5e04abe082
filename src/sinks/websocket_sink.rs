//! Per-viewer delivery endpoint on an aggregator.
//!
//! A [`WebsocketSink`] owns one upgraded viewer connection. Envelopes arrive
//! on an input channel, traverse a [`TruncatingBuffer`], and are written to
//! the stream as binary frames. Inbound frames are never interpreted: each
//! successful read is only a liveness pulse for the keep-alive watchdog, so
//! an idle application does not disconnect a present viewer.
//!
//! Lifecycle: the sink terminates on the first of keep-alive failure, write
//! error, or input-channel closure. On the first two it announces itself on
//! the shared close-request channel (at most once, ever) so the owning
//! [`SinkManager`](super::SinkManager) can unregister it; on the last the
//! owner has already dropped it and no announcement is made.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use salvo::websocket::{Message, WebSocket};
use tokio::sync::{mpsc, oneshot};

use crate::metrics::MetricSnapshot;
use crate::record::Envelope;
use crate::sinks::truncating_buffer::TruncatingBuffer;

pub struct WebsocketSink {
    app_id: String,
    remote_addr: String,
    keep_alive: Duration,
    buffer_capacity: usize,
    sent_messages: AtomicU64,
    sent_bytes: AtomicU64,
    close_requests: mpsc::Sender<Arc<WebsocketSink>>,
}

impl WebsocketSink {
    pub fn new(
        app_id: String,
        remote_addr: String,
        keep_alive: Duration,
        buffer_capacity: usize,
        close_requests: mpsc::Sender<Arc<WebsocketSink>>,
    ) -> Self {
        Self {
            app_id,
            remote_addr,
            keep_alive,
            buffer_capacity,
            sent_messages: AtomicU64::new(0),
            sent_bytes: AtomicU64::new(0),
            close_requests,
        }
    }

    /// The remote address of the viewer, stable for the sink's lifetime.
    pub fn identifier(&self) -> &str {
        &self.remote_addr
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Point-in-time counter snapshot. Never blocks delivery.
    pub fn emit(&self) -> Vec<MetricSnapshot> {
        vec![
            MetricSnapshot::new(
                format!("sentMessageCount:{}", self.app_id),
                self.sent_messages.load(Ordering::Relaxed),
            ),
            MetricSnapshot::new(
                format!("sentByteCount:{}", self.app_id),
                self.sent_bytes.load(Ordering::Relaxed),
            ),
        ]
    }

    /// Drains `input` into the viewer stream until terminated.
    ///
    /// Runs on the calling task and returns after cleanup.
    pub async fn run(self: Arc<Self>, ws: WebSocket, input: mpsc::UnboundedReceiver<Envelope>) {
        tracing::debug!(remote = %self.remote_addr, app_id = %self.app_id, "sink created");

        let (mut ws_tx, ws_rx) = ws.split();
        let (pulse_tx, pulse_rx) = mpsc::channel(1);
        spawn_pulse_reader(ws_rx, pulse_tx, self.remote_addr.clone());
        let mut keep_alive_failed = spawn_watchdog(self.keep_alive, pulse_rx);

        let buffer = TruncatingBuffer::start(input, self.buffer_capacity);
        let mut close_requested = false;

        loop {
            tokio::select! {
                _ = &mut keep_alive_failed => {
                    tracing::debug!(remote = %self.remote_addr, "no keep-alive received, requesting close");
                    let _ = ws_tx.close().await;
                    Self::request_close(&self, &mut close_requested).await;
                    return;
                }
                next = buffer.recv() => match next {
                    Some(envelope) => {
                        let frame = Message::binary(envelope.payload().to_vec());
                        if let Err(error) = ws_tx.send(frame).await {
                            tracing::debug!(remote = %self.remote_addr, %error, "write failed, requesting close");
                            Self::request_close(&self, &mut close_requested).await;
                            return;
                        }
                        self.sent_messages.fetch_add(1, Ordering::Relaxed);
                        self.sent_bytes.fetch_add(envelope.len() as u64, Ordering::Relaxed);
                    }
                    None => {
                        tracing::debug!(
                            remote = %self.remote_addr,
                            dropped = buffer.dropped(),
                            "input closed, closing stream"
                        );
                        let _ = ws_tx.close().await;
                        return;
                    }
                }
            }
        }
    }

    async fn request_close(this: &Arc<Self>, already_requested: &mut bool) {
        if *already_requested {
            tracing::debug!(app_id = %this.app_id, "close previously requested, doing nothing");
            return;
        }
        *already_requested = true;
        if this.close_requests.send(Arc::clone(this)).await.is_err() {
            tracing::debug!(app_id = %this.app_id, "dispatcher gone, close request dropped");
        }
    }
}

/// Reads inbound frames and turns each successful read into a pulse.
///
/// Exits on read error, stream end, or when the watchdog has gone away.
fn spawn_pulse_reader(
    mut ws_rx: SplitStream<WebSocket>,
    pulses: mpsc::Sender<()>,
    remote_addr: String,
) {
    tokio::spawn(async move {
        while let Some(inbound) = ws_rx.next().await {
            if let Err(error) = inbound {
                tracing::debug!(remote = %remote_addr, %error, "keep-alive read failed, stopping listener");
                return;
            }
            if pulses.send(()).await.is_err() {
                return;
            }
        }
    });
}

/// Raises keep-alive failure, exactly once, after `interval` without a pulse.
fn spawn_watchdog(interval: Duration, mut pulses: mpsc::Receiver<()>) -> oneshot::Receiver<()> {
    let (failure_tx, failure_rx) = oneshot::channel();
    tokio::spawn(async move {
        loop {
            match tokio::time::timeout(interval, pulses.recv()).await {
                // Pulse received, interval starts over.
                Ok(Some(())) => {}
                // Reader gone; the last pulse still buys one full interval.
                Ok(None) => {
                    tokio::time::sleep(interval).await;
                    let _ = failure_tx.send(());
                    return;
                }
                Err(_) => {
                    let _ = failure_tx.send(());
                    return;
                }
            }
        }
    });
    failure_rx
}
