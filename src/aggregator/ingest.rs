//! UDP ingestion of emitter records.
//!
//! One datagram is one encoded [`LogRecord`]. The record is decoded only to
//! learn the routing app id; subscribers receive the raw datagram bytes
//! unchanged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use prost::Message as _;
use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::error::FabricResult;
use crate::metrics::MetricSnapshot;
use crate::record::{Envelope, LogRecord};
use crate::sinks::SinkManager;

/// Maximum UDP payload; larger records must be split by the emitter.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

pub struct IngestListener {
    socket: UdpSocket,
    manager: Arc<SinkManager>,
    received_messages: AtomicU64,
    received_bytes: AtomicU64,
    invalid_datagrams: AtomicU64,
}

impl IngestListener {
    pub async fn bind(addr: impl ToSocketAddrs, manager: Arc<SinkManager>) -> FabricResult<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(local = %socket.local_addr()?, "ingest listener bound");
        Ok(Arc::new(Self {
            socket,
            manager,
            received_messages: AtomicU64::new(0),
            received_bytes: AtomicU64::new(0),
            invalid_datagrams: AtomicU64::new(0),
        }))
    }

    pub fn local_addr(&self) -> FabricResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives datagrams until the process shuts down.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(error) => {
                    tracing::warn!(%error, "ingest receive failed");
                    continue;
                }
            };

            let raw = Bytes::copy_from_slice(&buf[..len]);
            let record = match LogRecord::decode(raw.clone()) {
                Ok(record) => record,
                Err(error) => {
                    self.invalid_datagrams.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%from, %error, "dropping undecodable datagram");
                    continue;
                }
            };
            if record.app_id.is_empty() {
                self.invalid_datagrams.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%from, "dropping record without app id");
                continue;
            }

            self.received_messages.fetch_add(1, Ordering::Relaxed);
            self.received_bytes.fetch_add(len as u64, Ordering::Relaxed);
            self.manager.dispatch(&record.app_id, Envelope::new(raw));
        }
    }

    pub fn emit(&self) -> Vec<MetricSnapshot> {
        vec![
            MetricSnapshot::new(
                "receivedMessageCount",
                self.received_messages.load(Ordering::Relaxed),
            ),
            MetricSnapshot::new(
                "receivedByteCount",
                self.received_bytes.load(Ordering::Relaxed),
            ),
            MetricSnapshot::new(
                "invalidDatagramCount",
                self.invalid_datagrams.load(Ordering::Relaxed),
            ),
        ]
    }
}
