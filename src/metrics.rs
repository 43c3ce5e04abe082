//! Counter snapshots for the `/metricz` endpoint.

use serde::Serialize;

/// A point-in-time reading of one monotonic counter.
///
/// Names are tagged with the app id they belong to, e.g.
/// `sentMessageCount:my-app`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub name: String,
    pub value: u64,
}

impl MetricSnapshot {
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
