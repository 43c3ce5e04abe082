//! Real-time log-streaming fabric for a multi-tenant platform.
//!
//! Aggregator nodes fan application log messages out to subscribed viewers
//! over WebSocket; an edge proxy authorizes viewer subscriptions, picks one
//! aggregator per consistent-hash group, and splices the upstream streams
//! onto the viewer connection.
//!
//! The crate ships two binaries, `logfabric-aggregator` and
//! `logfabric-proxy`, both thin wiring around the [`aggregator`] and
//! [`proxy`] modules.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod record;
pub mod sinks;
pub mod utils;

pub use error::{FabricError, FabricResult};
