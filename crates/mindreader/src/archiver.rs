//! Block archiving: the [`Archiver`] seam and the per-block file layout.

use crate::file_name::block_file_name;
use async_trait::async_trait;
use scribe_store::{ObjectStore, StoreError};
use scribe_types::{Block, BlockCodec, CodecError};
use std::{fmt, fs, path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, info, trace, warn};

/// How long to wait between upload rounds while draining pending files.
pub(crate) const UPLOAD_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Errors surfaced while archiving blocks.
#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    /// Local file handling failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A block frame could not be serialized.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The object store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A merge buffer was seeded with a block off the bundle boundary.
    #[error("block {0} does not start a merge boundary")]
    NotOnBoundary(u64),
    /// A merge buffer append skipped ahead or moved backwards.
    #[error("block {got} does not follow buffered block {last}")]
    NonContiguous {
        /// Highest block currently buffered.
        last: u64,
        /// The offending block number.
        got: u64,
    },
}

/// Durable destination for the blocks flowing out of the pipeline.
///
/// `store_block` runs on the consume task and must not assume exclusive
/// access: uploads happen concurrently from the uploader task.
#[async_trait]
pub trait Archiver: fmt::Debug + Send + Sync {
    /// Prepares local state; called once before any block is stored.
    fn init(&self) -> Result<(), ArchiverError>;

    /// Persists one block locally (or buffers it for a later bundle upload).
    fn store_block(&self, block: &Block) -> Result<(), ArchiverError>;

    /// Pushes pending local files to the object store.
    ///
    /// Concurrent invocations collapse: while one upload round runs, others
    /// return immediately.
    async fn upload_files(&self) -> Result<(), ArchiverError>;

    /// Blocks until nothing archived remains only local. Invoked on
    /// shutdown, after the block channel has been drained; deadlines are the
    /// caller's concern.
    async fn wait_for_all_files_to_upload(&self);
}

/// Archives each block as one standalone file, uploaded in the background.
///
/// `store_block` writes into the working directory (write, fsync, rename);
/// `upload_files` drains the directory into the object store in lexicographic
/// order, deleting each file once stored.
pub struct OneBlockArchiver {
    work_dir: PathBuf,
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn BlockCodec>,
    stop_block_num: u64,
    suffix: String,
    upload_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for OneBlockArchiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneBlockArchiver")
            .field("work_dir", &self.work_dir)
            .field("stop_block_num", &self.stop_block_num)
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl OneBlockArchiver {
    /// Creates an archiver writing into `work_dir` and uploading to `store`.
    ///
    /// With `stop_block_num > 0`, blocks past the stop block are silently
    /// dropped.
    pub fn new(
        work_dir: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn BlockCodec>,
        stop_block_num: u64,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            store,
            codec,
            stop_block_num,
            suffix: suffix.into(),
            upload_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Pending one-block files, in upload (lexicographic) order.
    fn pending_files(&self) -> Result<Vec<String>, std::io::Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.work_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-progress writes and the continuity state are not uploads.
            if name.ends_with(".tmp") || name == "continuity_check" {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl Archiver for OneBlockArchiver {
    fn init(&self) -> Result<(), ArchiverError> {
        fs::create_dir_all(&self.work_dir)?;
        let pending = self.pending_files()?.len();
        if pending > 0 {
            info!(target: "mindreader", pending, "found existing one-block files pending upload");
        }
        Ok(())
    }

    fn store_block(&self, block: &Block) -> Result<(), ArchiverError> {
        if self.stop_block_num > 0 && block.number > self.stop_block_num {
            debug!(target: "mindreader", block_num = block.number, "block is past the stop block, dropping");
            return Ok(());
        }

        let name = block_file_name(block, &self.suffix);
        let path = self.work_dir.join(&name);
        let tmp = self.work_dir.join(format!("{name}.tmp"));

        let mut file = fs::File::create(&tmp)?;
        self.codec.encode(block, &mut file)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        trace!(target: "mindreader", file = %name, "stored one-block file");
        Ok(())
    }

    async fn upload_files(&self) -> Result<(), ArchiverError> {
        let Ok(_guard) = self.upload_lock.try_lock() else {
            // An upload round is already in flight.
            return Ok(());
        };

        let mut first_err = None;
        for name in self.pending_files()? {
            let upload = (|| -> Result<(), ArchiverError> {
                let path = self.work_dir.join(&name);
                let data = fs::read(&path)?;
                self.store.put(&name, &data)?;
                fs::remove_file(&path)?;
                Ok(())
            })();

            match upload {
                Ok(()) => trace!(target: "mindreader", file = %name, "uploaded one-block file"),
                Err(err) => {
                    warn!(target: "mindreader", file = %name, %err, "failed to upload one-block file, will retry");
                    first_err.get_or_insert(err);
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    async fn wait_for_all_files_to_upload(&self) {
        loop {
            if let Err(err) = self.upload_files().await {
                warn!(target: "mindreader", %err, "upload round failed while draining");
            }
            match self.pending_files() {
                Ok(pending) if pending.is_empty() => return,
                Ok(pending) => {
                    debug!(target: "mindreader", remaining = pending.len(), "waiting for one-block files to drain")
                }
                Err(err) => warn!(target: "mindreader", %err, "unable to scan working directory"),
            }
            tokio::time::sleep(UPLOAD_RETRY_INTERVAL).await;
        }
    }
}
