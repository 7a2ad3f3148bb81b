//! Console-to-archive block ingestion.
//!
//! A node supervisor feeds structured console output line by line into the
//! [`MindReaderPlugin`], which parses each recognized line into a [`Block`]
//! record, archives it to an object store as per-block files or
//! fixed-boundary merged bundles, and optionally republishes it to a live
//! stream server. The [`ArchiverSelector`] decides the layout per block from
//! its age, boundary alignment and stream continuity; the
//! [`ContinuityChecker`] detects gaps across restarts.
//!
//! [`Block`]: scribe_types::Block

mod archiver;
mod archiver_selector;
mod continuity_checker;
mod file_name;
mod gator;
mod log_plugin;
mod merge_archiver;
mod metrics;
mod plugin;

pub use archiver::{Archiver, ArchiverError, OneBlockArchiver};
pub use archiver_selector::ArchiverSelector;
pub use continuity_checker::{ContinuityChecker, ContinuityError};
pub use file_name::{
    block_file_name, block_file_name_from_args, validate_one_block_suffix, SuffixError,
};
pub use gator::BlockNumberGate;
pub use log_plugin::{BlockStreamer, LogPlugin, LogPluginFunc};
pub use merge_archiver::{bundle_start, is_bundle_start, MergeArchiver, BLOCKS_PER_BUNDLE};
pub use plugin::{
    BlockStreamServer, ConsoleReader, HeadBlockUpdater, MindReaderConfig, MindReaderError,
    MindReaderPlugin, PublishError, ReadError, SetupError, TransformError,
};
