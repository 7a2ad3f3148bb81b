//! Persistent tracking of the highest block number seen by the pipeline,
//! used to detect gaps across restarts.

use parking_lot::Mutex;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Errors surfaced by the continuity checker.
#[derive(Debug, thiserror::Error)]
pub enum ContinuityError {
    /// The stream advanced non-contiguously. Non-fatal: the caller is
    /// expected to switch the node to maintenance mode and keep going.
    #[error("continuity broken: block {got} does not follow highest seen block {prior}")]
    Broken {
        /// Highest block number recorded before the offending write.
        prior: u64,
        /// The offending block number.
        got: u64,
    },
    /// The state file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write-through tracker of the highest checked block number.
///
/// The value only grows during normal operation; [`ContinuityChecker::reset`]
/// is the sole decreasing transition. A missing or corrupt state file is
/// treated as "no prior value".
#[derive(Debug)]
pub struct ContinuityChecker {
    path: PathBuf,
    highest: Mutex<Option<u64>>,
}

impl ContinuityChecker {
    /// Loads the checker state from `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let highest = match fs::read_to_string(&path) {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(target: "mindreader", path = %path.display(), "corrupt continuity state, starting fresh");
                    None
                }
            },
            Err(_) => None,
        };
        debug!(target: "mindreader", ?highest, "loaded continuity checker state");
        Self { path, highest: Mutex::new(highest) }
    }

    /// Records the arrival of block `num`.
    ///
    /// Succeeds when there is no prior value or `num` directly follows it; the
    /// new value is durable before this returns. A gap or reversal leaves the
    /// stored value untouched and returns [`ContinuityError::Broken`].
    pub fn write(&self, num: u64) -> Result<(), ContinuityError> {
        let mut highest = self.highest.lock();
        match *highest {
            Some(prior) if num != prior + 1 => Err(ContinuityError::Broken { prior, got: num }),
            _ => {
                self.persist(num)?;
                *highest = Some(num);
                Ok(())
            }
        }
    }

    /// Forgets all recorded state, on disk and in memory.
    pub fn reset(&self) -> Result<(), ContinuityError> {
        let mut highest = self.highest.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *highest = None;
        debug!(target: "mindreader", "continuity checker reset");
        Ok(())
    }

    /// The highest block number whose arrival was checked, if any.
    pub fn highest_seen(&self) -> Option<u64> {
        *self.highest.lock()
    }

    fn persist(&self, num: u64) -> Result<(), ContinuityError> {
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(num.to_string().as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
