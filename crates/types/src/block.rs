use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chain record as produced by the node's console stream.
///
/// Owned by the pipeline from the moment the console reader emits it until it
/// has been archived and, optionally, published; then discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height, expected to be monotone within one run.
    pub number: u64,
    /// Opaque block identifier.
    pub id: String,
    /// Identifier of the parent block.
    pub previous_id: String,
    /// Last irreversible block number at the time this block was produced.
    pub lib_num: u64,
    /// Wall-clock instant the node produced this block.
    pub timestamp: DateTime<Utc>,
    /// Opaque chain-specific payload.
    pub payload: Vec<u8>,
}

impl Block {
    /// Age of the block relative to `now`, saturating to zero for blocks
    /// stamped in the future.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        now.signed_duration_since(self.timestamp).to_std().unwrap_or_default()
    }
}
