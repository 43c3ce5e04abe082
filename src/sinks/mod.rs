//! Aggregator-side fan-out: per-viewer sinks and their dispatcher.
//!
//! ```text
//!                      ┌──────────────────────────┐
//!   ingest ──────────▶ │       SinkManager        │
//!   (app id routing)   │  app id -> [SinkEntry]   │◀── close-request channel
//!                      └─────┬──────────┬─────────┘        ▲
//!                            │          │ input channels   │
//!                            ▼          ▼                  │
//!                      ┌──────────┐ ┌──────────┐           │
//!                      │   sink   │ │   sink   │ ──────────┘
//!                      │ (3 tasks │ │  + pump) │
//!                      └────┬─────┘ └────┬─────┘
//!                           │ WebSocket  │
//!                           ▼            ▼
//!                        viewer        viewer
//! ```
//!
//! Each sink runs a delivery loop, a keep-alive reader and watchdog, and a
//! truncating-buffer pump. All coordination is by channels and stream
//! closure; the only shared mutable state is the registry map and the
//! per-sink atomic counters.

mod sink_manager;
mod truncating_buffer;
mod websocket_sink;

pub use sink_manager::SinkManager;
pub use truncating_buffer::TruncatingBuffer;
pub use websocket_sink::WebsocketSink;
