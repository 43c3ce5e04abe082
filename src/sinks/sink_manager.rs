//! Registry and dispatcher for the sinks owned by one aggregator.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::metrics::MetricSnapshot;
use crate::record::Envelope;
use crate::sinks::websocket_sink::WebsocketSink;

/// Close requests are tiny and the manager drains them continuously.
const CLOSE_CHANNEL_CAPACITY: usize = 8;

struct SinkEntry {
    sink: Arc<WebsocketSink>,
    input: mpsc::UnboundedSender<Envelope>,
}

/// Owns every active sink, keyed by application id.
///
/// The manager is the single reader of the shared close-request channel:
/// when a sink announces itself there, the manager removes it from the
/// registry and drops its input sender, which lets the sink drain whatever
/// is still buffered and exit.
pub struct SinkManager {
    sinks: DashMap<String, Vec<SinkEntry>>,
    close_requests: mpsc::Sender<Arc<WebsocketSink>>,
}

impl SinkManager {
    /// Creates the manager and starts its close-request loop.
    pub fn start() -> Arc<Self> {
        let (close_tx, mut close_rx) = mpsc::channel(CLOSE_CHANNEL_CAPACITY);
        let manager = Arc::new(Self {
            sinks: DashMap::new(),
            close_requests: close_tx,
        });

        let owner = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(sink) = close_rx.recv().await {
                tracing::debug!(
                    remote = %sink.identifier(),
                    app_id = %sink.app_id(),
                    "sink requested close"
                );
                owner.unregister(&sink);
            }
        });

        manager
    }

    /// The sender half new sinks announce their termination on.
    pub fn close_sender(&self) -> mpsc::Sender<Arc<WebsocketSink>> {
        self.close_requests.clone()
    }

    pub fn register(&self, sink: Arc<WebsocketSink>, input: mpsc::UnboundedSender<Envelope>) {
        tracing::info!(
            remote = %sink.identifier(),
            app_id = %sink.app_id(),
            "registered sink"
        );
        self.sinks
            .entry(sink.app_id().to_owned())
            .or_default()
            .push(SinkEntry { sink, input });
    }

    fn unregister(&self, sink: &Arc<WebsocketSink>) {
        if let Some(mut entries) = self.sinks.get_mut(sink.app_id()) {
            let before = entries.len();
            entries.retain(|entry| !Arc::ptr_eq(&entry.sink, sink));
            if entries.len() < before {
                tracing::info!(
                    remote = %sink.identifier(),
                    app_id = %sink.app_id(),
                    "unregistered sink"
                );
            }
        }
        self.sinks
            .remove_if(sink.app_id(), |_, entries| entries.is_empty());
    }

    /// Hands one envelope to every sink subscribed to `app_id`.
    ///
    /// Never blocks: sink inputs are unbounded and each sink bounds its own
    /// memory through its truncating buffer. Sends to sinks that are mid
    /// teardown are silently lost, which is fine, the viewer is gone.
    pub fn dispatch(&self, app_id: &str, envelope: Envelope) {
        if let Some(entries) = self.sinks.get(app_id) {
            for entry in entries.iter() {
                let _ = entry.input.send(envelope.clone());
            }
        }
    }

    pub fn sink_count(&self, app_id: &str) -> usize {
        self.sinks.get(app_id).map(|entries| entries.len()).unwrap_or(0)
    }

    /// Counter snapshots for every registered sink.
    pub fn emit(&self) -> Vec<MetricSnapshot> {
        let mut snapshots = Vec::new();
        for entry in self.sinks.iter() {
            for sink_entry in entry.value() {
                snapshots.extend(sink_entry.sink.emit());
            }
        }
        snapshots
    }
}
