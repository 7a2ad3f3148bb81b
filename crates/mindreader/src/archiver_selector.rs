//! Per-block routing between the one-block and merge archivers.

use crate::{
    archiver::{Archiver, ArchiverError, OneBlockArchiver},
    merge_archiver::{bundle_start, is_bundle_start, MergeArchiver},
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use scribe_types::Block;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct SelectorState {
    merging: bool,
    last_seen: Option<u64>,
}

/// Routes each incoming block to the one-block or merge archiver.
///
/// Merging is only profitable for fully historical, contiguous ranges:
/// the selector enters merge mode when an old block lands exactly on a
/// bundle boundary, or when a hole in the stream skipped the boundary
/// block and an old block arrives on the far side of it. It falls back to
/// the per-block layout on any evidence of being near the chain head (a
/// young block) or of a hole appearing mid-bundle. An incomplete merge
/// buffer is abandoned on the way out; downstream mergers re-consolidate
/// from the one-block files instead.
#[derive(Debug)]
pub struct ArchiverSelector {
    one_block: Arc<OneBlockArchiver>,
    merge: Arc<MergeArchiver>,
    merge_threshold_block_age: Duration,
    state: Mutex<SelectorState>,
}

impl ArchiverSelector {
    /// Creates a selector over the two archivers.
    ///
    /// A block is considered old once `now - block.timestamp` reaches
    /// `merge_threshold_block_age`.
    pub fn new(
        one_block: Arc<OneBlockArchiver>,
        merge: Arc<MergeArchiver>,
        merge_threshold_block_age: Duration,
    ) -> Self {
        Self {
            one_block,
            merge,
            merge_threshold_block_age,
            state: Mutex::new(SelectorState::default()),
        }
    }

    fn is_old(&self, block: &Block) -> bool {
        block.age(Utc::now()) >= self.merge_threshold_block_age
    }
}

#[async_trait]
impl Archiver for ArchiverSelector {
    fn init(&self) -> Result<(), ArchiverError> {
        self.one_block.init()?;
        self.merge.init()
    }

    fn store_block(&self, block: &Block) -> Result<(), ArchiverError> {
        let old = self.is_old(block);
        let mut state = self.state.lock();

        let result = if state.merging {
            if !old {
                if let Some((start, last)) = self.merge.discard_buffer() {
                    warn!(
                        target: "mindreader",
                        bundle_start = start,
                        last,
                        "live block reached, discarding incomplete merge buffer"
                    );
                }
                state.merging = false;
                self.one_block.store_block(block)
            } else if state.last_seen.is_some_and(|last| block.number != last + 1) {
                if let Some((start, last)) = self.merge.discard_buffer() {
                    warn!(
                        target: "mindreader",
                        bundle_start = start,
                        last,
                        block_num = block.number,
                        "hole in the stream, discarding incomplete merge buffer"
                    );
                }
                state.merging = false;
                self.one_block.store_block(block)
            } else {
                self.merge.store_block(block)
            }
        } else if old && is_bundle_start(block.number) {
            info!(target: "mindreader", block_num = block.number, "old boundary block, entering merge mode");
            state.merging = true;
            if state.last_seen.is_some() {
                // One-block files were already produced below this boundary;
                // keeping a one-block copy of the boundary block lets a
                // downstream merger consolidate that range. The duplicate is
                // deduplicated there.
                self.one_block
                    .store_block(block)
                    .and_then(|()| self.merge.store_block(block))
            } else {
                self.merge.store_block(block)
            }
        } else if old
            && state
                .last_seen
                .is_some_and(|last| bundle_start(block.number) != bundle_start(last))
        {
            // A hole swallowed the boundary block itself, yet the stream
            // crossed into a new bundle range: merging starts here, and the
            // seed block keeps its one-block copy like an exact boundary
            // entry does.
            info!(
                target: "mindreader",
                block_num = block.number,
                "old block crossed a bundle boundary, entering merge mode mid-range"
            );
            state.merging = true;
            self.one_block
                .store_block(block)
                .and_then(|()| self.merge.begin_bundle(block))
        } else {
            self.one_block.store_block(block)
        };

        state.last_seen = Some(block.number);
        result
    }

    async fn upload_files(&self) -> Result<(), ArchiverError> {
        let one_block = self.one_block.upload_files().await;
        let merge = self.merge.upload_files().await;
        one_block.and(merge)
    }

    async fn wait_for_all_files_to_upload(&self) {
        self.merge.wait_for_all_files_to_upload().await;
        self.one_block.wait_for_all_files_to_upload().await;
    }
}
