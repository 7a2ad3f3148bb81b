//! Accumulates contiguous historical blocks into fixed-boundary bundles.

use crate::archiver::{Archiver, ArchiverError, OneBlockArchiver};
use async_trait::async_trait;
use parking_lot::Mutex;
use scribe_store::ObjectStore;
use scribe_types::{Block, BlockCodec};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Number of blocks in one merged bundle.
pub const BLOCKS_PER_BUNDLE: u64 = 100;

/// Start of the bundle containing `num`.
pub const fn bundle_start(num: u64) -> u64 {
    (num / BLOCKS_PER_BUNDLE) * BLOCKS_PER_BUNDLE
}

/// Whether `num` sits on a bundle boundary.
pub const fn is_bundle_start(num: u64) -> bool {
    num % BLOCKS_PER_BUNDLE == 0
}

/// Object key for the bundle starting at `start`.
fn bundle_key(start: u64) -> String {
    format!("{start:010}.merged")
}

#[derive(Default)]
struct MergeBuffer {
    bytes: Vec<u8>,
    bundle_start: Option<u64>,
    last: Option<u64>,
}

/// Archives blocks as merged bundles of [`BLOCKS_PER_BUNDLE`] contiguous
/// frames aligned to a bundle boundary.
///
/// At most one bundle is ever in flight; the buffer is uploaded and
/// reinitialized the moment its last boundary block arrives. A bundle
/// normally begins exactly on a boundary; the selector may seed one
/// mid-range through [`MergeArchiver::begin_bundle`] when a hole swallowed
/// the boundary block, in which case the bundle start is aligned down and
/// the shorter bundle uploads at its range end. Blocks past the stop block
/// are handed to the overflow one-block archiver when one is configured,
/// and dropped otherwise.
pub struct MergeArchiver {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn BlockCodec>,
    stop_block_num: u64,
    overflow: Option<Arc<OneBlockArchiver>>,
    buffer: Mutex<MergeBuffer>,
}

impl fmt::Debug for MergeArchiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.buffer.lock();
        f.debug_struct("MergeArchiver")
            .field("stop_block_num", &self.stop_block_num)
            .field("bundle_start", &buffer.bundle_start)
            .field("last", &buffer.last)
            .finish_non_exhaustive()
    }
}

impl MergeArchiver {
    /// Creates a merge archiver uploading bundles to `store`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn BlockCodec>,
        stop_block_num: u64,
    ) -> Self {
        Self {
            store,
            codec,
            stop_block_num,
            overflow: None,
            buffer: Mutex::new(MergeBuffer::default()),
        }
    }

    /// Routes blocks past the stop block to `archiver` instead of dropping
    /// them.
    pub fn with_overflow_archiver(mut self, archiver: Arc<OneBlockArchiver>) -> Self {
        self.overflow = Some(archiver);
        self
    }

    /// Seeds a fresh bundle with `block` even though the range's boundary
    /// block never arrived; the bundle start is aligned down to the
    /// boundary. With blocks already buffered this is a regular append.
    pub(crate) fn begin_bundle(&self, block: &Block) -> Result<(), ArchiverError> {
        self.append_block(block, true)
    }

    fn append_block(&self, block: &Block, mid_range_seed: bool) -> Result<(), ArchiverError> {
        if self.stop_block_num > 0 && block.number > self.stop_block_num {
            return match &self.overflow {
                Some(overflow) => {
                    debug!(
                        target: "mindreader",
                        block_num = block.number,
                        "block is past the stop block, storing as one-block file"
                    );
                    overflow.store_block(block)
                }
                None => {
                    debug!(target: "mindreader", block_num = block.number, "block is past the stop block, dropping");
                    Ok(())
                }
            };
        }

        let mut buffer = self.buffer.lock();
        match buffer.last {
            None => {
                if !mid_range_seed && !is_bundle_start(block.number) {
                    return Err(ArchiverError::NotOnBoundary(block.number));
                }
                buffer.bundle_start = Some(bundle_start(block.number));
            }
            Some(last) => {
                if block.number != last + 1 {
                    return Err(ArchiverError::NonContiguous { last, got: block.number });
                }
            }
        }

        self.codec.encode(block, &mut buffer.bytes)?;
        buffer.last = Some(block.number);

        if block.number % BLOCKS_PER_BUNDLE == BLOCKS_PER_BUNDLE - 1 {
            self.upload_bundle(&mut buffer)?;
        }
        Ok(())
    }

    /// Abandons the in-flight bundle without uploading it.
    ///
    /// Returns the buffered block range, if there was one.
    pub(crate) fn discard_buffer(&self) -> Option<(u64, u64)> {
        let mut buffer = self.buffer.lock();
        let discarded = buffer.bundle_start.zip(buffer.last);
        *buffer = MergeBuffer::default();
        discarded
    }

    fn upload_bundle(&self, buffer: &mut MergeBuffer) -> Result<(), ArchiverError> {
        let Some(start) = buffer.bundle_start else { return Ok(()) };
        self.store.put(&bundle_key(start), &buffer.bytes)?;
        info!(
            target: "mindreader",
            bundle_start = start,
            bytes = buffer.bytes.len(),
            "uploaded merged bundle"
        );
        *buffer = MergeBuffer::default();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn buffered_bytes(&self) -> Vec<u8> {
        self.buffer.lock().bytes.clone()
    }
}

#[async_trait]
impl Archiver for MergeArchiver {
    fn init(&self) -> Result<(), ArchiverError> {
        if let Some(overflow) = &self.overflow {
            overflow.init()?;
        }
        Ok(())
    }

    fn store_block(&self, block: &Block) -> Result<(), ArchiverError> {
        self.append_block(block, false)
    }

    async fn upload_files(&self) -> Result<(), ArchiverError> {
        match &self.overflow {
            Some(overflow) => overflow.upload_files().await,
            None => Ok(()),
        }
    }

    async fn wait_for_all_files_to_upload(&self) {
        {
            let mut buffer = self.buffer.lock();
            match buffer.last {
                Some(last) if last % BLOCKS_PER_BUNDLE == BLOCKS_PER_BUNDLE - 1 => {
                    if let Err(err) = self.upload_bundle(&mut buffer) {
                        warn!(target: "mindreader", %err, "failed to flush complete bundle on shutdown");
                    }
                }
                Some(last) => {
                    info!(
                        target: "mindreader",
                        bundle_start = buffer.bundle_start,
                        last,
                        "incomplete bundle stays buffered, not persisted"
                    );
                }
                None => {}
            }
        }

        if let Some(overflow) = &self.overflow {
            overflow.wait_for_all_files_to_upload().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use scribe_store::FsStore;
    use scribe_types::{BlockCodec as _, JsonBlockCodec};

    fn block(number: u64) -> Block {
        Block {
            number,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            payload: vec![0x01],
            ..Default::default()
        }
    }

    fn new_archiver(store_dir: &std::path::Path, stop_block_num: u64) -> (MergeArchiver, Arc<FsStore>) {
        let store = Arc::new(FsStore::new(store_dir, true).unwrap());
        let archiver = MergeArchiver::new(store.clone(), Arc::new(JsonBlockCodec), stop_block_num);
        archiver.init().unwrap();
        (archiver, store)
    }

    #[test]
    fn buffer_requires_boundary_start() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, _) = new_archiver(dir.path(), 0);

        assert!(matches!(
            archiver.store_block(&block(101)),
            Err(ArchiverError::NotOnBoundary(101))
        ));
        archiver.store_block(&block(100)).unwrap();
    }

    #[test]
    fn buffer_requires_contiguity() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, _) = new_archiver(dir.path(), 0);

        archiver.store_block(&block(100)).unwrap();
        archiver.store_block(&block(101)).unwrap();
        assert!(matches!(
            archiver.store_block(&block(103)),
            Err(ArchiverError::NonContiguous { last: 101, got: 103 })
        ));
    }

    #[test]
    fn full_bundle_uploads_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, store) = new_archiver(dir.path(), 0);

        for num in 100..200 {
            archiver.store_block(&block(num)).unwrap();
        }

        assert_eq!(store.list("").unwrap(), vec!["0000000100.merged".to_string()]);
        assert!(archiver.buffered_bytes().is_empty());

        let data = store.get("0000000100.merged").unwrap();
        let decoded = JsonBlockCodec.decode_all(&mut data.as_slice()).unwrap();
        let numbers: Vec<u64> = decoded.iter().map(|b| b.number).collect();
        assert_eq!(numbers, (100..200).collect::<Vec<u64>>());

        // The next bundle starts fresh and must be boundary-aligned again.
        assert!(matches!(
            archiver.store_block(&block(201)),
            Err(ArchiverError::NotOnBoundary(201))
        ));
        archiver.store_block(&block(200)).unwrap();
    }

    #[test]
    fn mid_range_seed_uploads_a_short_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, store) = new_archiver(dir.path(), 0);

        archiver.begin_bundle(&block(150)).unwrap();
        for num in 151..200 {
            archiver.store_block(&block(num)).unwrap();
        }

        // The bundle key is the aligned range start, not the seed block.
        assert_eq!(store.list("").unwrap(), vec!["0000000100.merged".to_string()]);
        let data = store.get("0000000100.merged").unwrap();
        let decoded = JsonBlockCodec.decode_all(&mut data.as_slice()).unwrap();
        let numbers: Vec<u64> = decoded.iter().map(|b| b.number).collect();
        assert_eq!(numbers, (150..200).collect::<Vec<u64>>());
        assert!(archiver.buffered_bytes().is_empty());

        // Contiguity is still enforced after a mid-range seed.
        archiver.begin_bundle(&block(250)).unwrap();
        assert!(matches!(
            archiver.store_block(&block(252)),
            Err(ArchiverError::NonContiguous { last: 250, got: 252 })
        ));
    }

    #[tokio::test]
    async fn incomplete_bundle_is_not_persisted_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, store) = new_archiver(dir.path(), 0);

        archiver.store_block(&block(100)).unwrap();
        archiver.store_block(&block(101)).unwrap();
        archiver.wait_for_all_files_to_upload().await;

        assert!(store.list("").unwrap().is_empty());
        assert!(!archiver.buffered_bytes().is_empty());
    }

    #[test]
    fn discard_buffer_reports_the_lost_range() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, store) = new_archiver(dir.path(), 0);

        archiver.store_block(&block(100)).unwrap();
        archiver.store_block(&block(101)).unwrap();
        assert_eq!(archiver.discard_buffer(), Some((100, 101)));
        assert!(archiver.buffered_bytes().is_empty());
        assert!(store.list("").unwrap().is_empty());

        assert_eq!(archiver.discard_buffer(), None);
    }

    #[test]
    fn post_stop_blocks_go_to_overflow_archiver() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let overflow_store = tempfile::tempdir().unwrap();

        let overflow = Arc::new(OneBlockArchiver::new(
            work.path(),
            Arc::new(FsStore::new(overflow_store.path(), true).unwrap()),
            Arc::new(JsonBlockCodec),
            0,
            "default.dat",
        ));
        overflow.init().unwrap();

        let store = Arc::new(FsStore::new(dir.path(), true).unwrap());
        let archiver = MergeArchiver::new(store, Arc::new(JsonBlockCodec), 150)
            .with_overflow_archiver(overflow);

        archiver.store_block(&block(151)).unwrap();
        assert!(archiver.buffered_bytes().is_empty());

        let pending: Vec<String> = std::fs::read_dir(work.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].starts_with("0000000151-"));
    }

    #[test]
    fn post_stop_blocks_without_overflow_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (archiver, store) = new_archiver(dir.path(), 150);

        archiver.store_block(&block(151)).unwrap();
        assert!(archiver.buffered_bytes().is_empty());
        assert!(store.list("").unwrap().is_empty());
    }
}
