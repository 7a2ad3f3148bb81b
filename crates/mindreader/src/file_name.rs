//! Canonical one-block file naming.
//!
//! Names sort lexicographically in block-number order, which the uploader and
//! downstream mergers rely on.

use chrono::{DateTime, Utc};
use scribe_types::Block;

/// Error returned for an unusable one-block suffix.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SuffixError {
    /// The suffix was empty.
    #[error("oneblock_suffix is mandatory")]
    Empty,
    /// The suffix contained characters outside `[A-Za-z0-9_-]`.
    #[error("oneblock_suffix contains invalid characters: {0:?}")]
    InvalidCharacters(String),
}

/// Validates a producer-supplied one-block suffix.
pub fn validate_one_block_suffix(suffix: &str) -> Result<(), SuffixError> {
    if suffix.is_empty() {
        return Err(SuffixError::Empty);
    }
    if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(SuffixError::InvalidCharacters(suffix.to_string()));
    }
    Ok(())
}

/// The canonical file name for `block`.
pub fn block_file_name(block: &Block, suffix: &str) -> String {
    block_file_name_from_args(
        block.number,
        block.timestamp,
        &block.id,
        &block.previous_id,
        block.lib_num,
        suffix,
    )
}

/// Builds a one-block file name from its parts.
///
/// The number is zero-padded to ten digits and the timestamp rendered in a
/// sortable compact form; identifiers are truncated to an eight-character
/// prefix.
pub fn block_file_name_from_args(
    num: u64,
    timestamp: DateTime<Utc>,
    id: &str,
    previous_id: &str,
    lib_num: u64,
    suffix: &str,
) -> String {
    format!(
        "{num:010}-{}-{}-{}-{lib_num}-{suffix}",
        timestamp.format("%Y%m%dT%H%M%S%.1f"),
        short_id(id),
        short_id(previous_id),
    )
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
