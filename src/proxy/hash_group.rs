//! Deterministic app-id placement over an ordered set of aggregators.

use crate::error::{FabricError, FabricResult};

/// An ordered set of aggregator endpoints forming one shard group.
///
/// Placement is a pure function of the app id and the membership snapshot:
/// the same app id always lands on the same endpoint while membership is
/// unchanged. Membership is ordered; reordering it changes placements.
pub struct HashGroup {
    members: Vec<String>,
}

impl HashGroup {
    pub fn new(members: Vec<String>) -> FabricResult<Self> {
        if members.is_empty() {
            return Err(FabricError::Config(
                "a hash group needs at least one aggregator endpoint".into(),
            ));
        }
        Ok(Self { members })
    }

    /// The endpoint responsible for `app_id` in this group.
    pub fn server_for(&self, app_id: &str) -> &str {
        let digest = blake3::hash(app_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        let index = (u64::from_be_bytes(prefix) % self.members.len() as u64) as usize;
        &self.members[index]
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}
