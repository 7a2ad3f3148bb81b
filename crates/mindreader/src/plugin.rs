//! The mindreader plugin: node console output in, archived blocks out.
//!
//! A supervisor feeds raw console lines through [`MindReaderPlugin::log_line`]
//! into an OS pipe; a console reader parses the other end into opaque
//! objects, a transformer turns those into [`Block`]s, and the consume task
//! fans each block out to the archiver, the continuity checker and an
//! optional live stream server. The kernel pipe buffer is the only
//! backpressure the node ever sees.

use crate::{
    archiver::{Archiver, ArchiverError, OneBlockArchiver},
    archiver_selector::ArchiverSelector,
    continuity_checker::ContinuityChecker,
    file_name::{validate_one_block_suffix, SuffixError},
    gator::BlockNumberGate,
    merge_archiver::MergeArchiver,
    metrics::MindReaderMetrics,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scribe_lifecycle::{Lifecycle, Shutdown, ShutdownError};
use scribe_store::ObjectStore;
use scribe_types::{Block, BlockCodec};
use std::{
    fmt, fs,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the uploader task pushes pending one-block files.
const UPLOAD_INTERVAL: Duration = Duration::from_millis(500);

/// Error produced by a block transformer.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

/// Errors surfaced while reading from the console stream.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Orderly end of the console stream; stops the read task.
    #[error("end of stream")]
    Eof,
    /// The underlying pipe failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A console object could not be turned into a block.
    #[error("unable to transform console object into a block: {0}")]
    Transform(#[from] TransformError),
    /// Reader-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Error returned by a live stream server rejecting a block.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PublishError(pub String);

/// Fatal pipeline failures, handed to the lifecycle as shutdown cause.
#[derive(Debug, thiserror::Error)]
pub enum MindReaderError {
    /// The archiver could not store a block.
    #[error("archiver store block failed: {0}")]
    Archive(#[from] ArchiverError),
    /// The live stream server rejected a block.
    #[error("failed writing to block stream server: {0}")]
    Publish(#[from] PublishError),
    /// The console pipe broke under `log_line`.
    #[error("writing to console pipe: {0}")]
    Pipe(#[from] io::Error),
}

/// Construction-time failures.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The configured one-block suffix is unusable.
    #[error(transparent)]
    Suffix(#[from] SuffixError),
    /// The working directory could not be created.
    #[error("unable to create working directory {path:?}: {source}")]
    WorkingDirectory {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },
    /// The console pipe could not be created.
    #[error("setting up console pipe: {0}")]
    Pipe(#[source] io::Error),
    /// The console reader factory failed.
    #[error("setting up console reader: {0}")]
    ConsoleReader(#[source] io::Error),
    /// The archiver could not prepare its local state.
    #[error("failed to init archiver: {0}")]
    ArchiverInit(#[source] ArchiverError),
}

/// Reads opaque objects out of the node console stream.
///
/// Built by a factory from the read end of the plugin's pipe; `read` blocks
/// until an object is available and returns [`ReadError::Eof`] once the
/// stream ends.
pub trait ConsoleReader: Send + 'static {
    /// The opaque object type this reader emits.
    type Item: Send + 'static;

    /// Reads the next object, blocking as needed.
    fn read(&mut self) -> Result<Self::Item, ReadError>;
}

/// Live stream server seam: republishes archived blocks to downstream
/// consumers.
pub trait BlockStreamServer: Send + Sync {
    /// Pushes one block. Errors are fatal to the pipeline.
    fn push_block(&self, block: &Block) -> Result<(), PublishError>;
}

/// Callback invoked with `(number, id, timestamp)` of each head block.
pub type HeadBlockUpdater = Box<dyn Fn(u64, &str, DateTime<Utc>) + Send + Sync>;

/// Static configuration of a [`MindReaderPlugin`].
#[derive(Debug, Clone)]
pub struct MindReaderConfig {
    /// Directory holding pending one-block files and the continuity state.
    pub working_directory: PathBuf,
    /// First block allowed through the start gate.
    pub start_block_num: u64,
    /// Block number that triggers a clean shutdown; 0 disables.
    pub stop_block_num: u64,
    /// With a stop block set, drop post-stop blocks instead of keeping them
    /// as one-block files for later merging.
    pub discard_after_stop_block: bool,
    /// Capacity of the bounded block channel between read and consume tasks.
    pub channel_capacity: usize,
    /// Enables the continuity checker; disabled, its state is reset instead.
    pub fail_on_non_contiguous_blocks: bool,
    /// Age at which a block is considered historical enough to merge.
    pub merge_threshold_block_age: Duration,
    /// Producer suffix carried by every one-block file name.
    pub one_block_suffix: String,
}

/// The block ingestion pipeline.
///
/// See the module docs for the dataflow. All methods take `&self`; the
/// plugin is shared behind an [`Arc`] between the host and its three
/// background tasks.
pub struct MindReaderPlugin<CR: ConsoleReader> {
    me: Weak<MindReaderPlugin<CR>>,
    lifecycle: Lifecycle,
    archiver: Arc<dyn Archiver>,
    continuity_checker: Option<Arc<ContinuityChecker>>,
    start_gate: Mutex<BlockNumberGate>,
    transformer: Box<dyn Fn(CR::Item) -> Result<Block, TransformError> + Send + Sync>,
    console_reader: Mutex<Option<CR>>,
    pipe_writer: Mutex<Option<io::PipeWriter>>,
    block_server: Mutex<Option<Arc<dyn BlockStreamServer>>>,
    head_block_updater: Option<HeadBlockUpdater>,
    set_maintenance: Arc<dyn Fn() + Send + Sync>,
    stop_block_reached: Arc<dyn Fn() + Send + Sync>,
    stop_block_num: u64,
    channel_capacity: usize,
    consume_done_rx: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    metrics: MindReaderMetrics,
}

impl<CR: ConsoleReader> fmt::Debug for MindReaderPlugin<CR> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MindReaderPlugin")
            .field("stop_block_num", &self.stop_block_num)
            .field("channel_capacity", &self.channel_capacity)
            .field("has_continuity_checker", &self.continuity_checker.is_some())
            .finish_non_exhaustive()
    }
}

impl<CR: ConsoleReader> MindReaderPlugin<CR> {
    /// Builds the pipeline: stores, archivers, selector, continuity checker,
    /// start gate, console pipe and reader.
    ///
    /// `console_reader_factory` receives the read end of the pipe that
    /// [`MindReaderPlugin::log_line`] writes into.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MindReaderConfig,
        archive_store: Arc<dyn ObjectStore>,
        merge_archive_store: Arc<dyn ObjectStore>,
        codec: Arc<dyn BlockCodec>,
        console_reader_factory: impl FnOnce(io::PipeReader) -> io::Result<CR>,
        transformer: impl Fn(CR::Item) -> Result<Block, TransformError> + Send + Sync + 'static,
        head_block_updater: Option<HeadBlockUpdater>,
        set_maintenance: impl Fn() + Send + Sync + 'static,
        stop_block_reached: impl Fn() + Send + Sync + 'static,
    ) -> Result<Arc<Self>, SetupError> {
        validate_one_block_suffix(&config.one_block_suffix)?;

        fs::create_dir_all(&config.working_directory).map_err(|source| {
            SetupError::WorkingDirectory { path: config.working_directory.clone(), source }
        })?;

        let continuity = ContinuityChecker::new(config.working_directory.join("continuity_check"));
        let continuity_checker = if config.fail_on_non_contiguous_blocks {
            Some(Arc::new(continuity))
        } else {
            // A later re-enable must start from a clean baseline.
            if let Err(err) = continuity.reset() {
                warn!(target: "mindreader", %err, "failed resetting continuity checker state");
            }
            None
        };

        let one_block_stop = if config.stop_block_num > 0 && config.discard_after_stop_block {
            info!(
                target: "mindreader",
                stop_block_num = config.stop_block_num,
                "blocks past the stop block will be discarded, leaving a hole in block files after restart"
            );
            config.stop_block_num
        } else {
            0
        };
        let one_block = Arc::new(OneBlockArchiver::new(
            config.working_directory.clone(),
            archive_store,
            codec.clone(),
            one_block_stop,
            config.one_block_suffix.clone(),
        ));

        let mut merge = MergeArchiver::new(merge_archive_store, codec, config.stop_block_num);
        if config.stop_block_num > 0 && !config.discard_after_stop_block {
            info!(
                target: "mindreader",
                stop_block_num = config.stop_block_num,
                "blocks past the stop block will be saved as one-block files to be merged afterwards"
            );
            merge = merge.with_overflow_archiver(one_block.clone());
        }

        let archiver: Arc<dyn Archiver> = Arc::new(ArchiverSelector::new(
            one_block,
            Arc::new(merge),
            config.merge_threshold_block_age,
        ));
        archiver.init().map_err(SetupError::ArchiverInit)?;

        let (pipe_reader, pipe_writer) = io::pipe().map_err(SetupError::Pipe)?;
        let console_reader =
            console_reader_factory(pipe_reader).map_err(SetupError::ConsoleReader)?;

        let plugin = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            lifecycle: Lifecycle::new(),
            archiver,
            continuity_checker,
            start_gate: Mutex::new(BlockNumberGate::new(config.start_block_num)),
            transformer: Box::new(transformer),
            console_reader: Mutex::new(Some(console_reader)),
            pipe_writer: Mutex::new(Some(pipe_writer)),
            block_server: Mutex::new(None),
            head_block_updater,
            set_maintenance: Arc::new(set_maintenance),
            stop_block_reached: Arc::new(stop_block_reached),
            stop_block_num: config.stop_block_num,
            channel_capacity: config.channel_capacity.max(1),
            consume_done_rx: Mutex::new(None),
            metrics: MindReaderMetrics::default(),
        });

        let weak = Arc::downgrade(&plugin);
        let stop_block_num = config.stop_block_num;
        plugin.lifecycle.on_terminating(move |_| {
            let Some(plugin) = weak.upgrade() else { return };
            info!(target: "mindreader", "mindreader plugin terminating");
            (plugin.set_maintenance)();
            plugin.wait_for_read_flow_to_complete();
            if stop_block_num != 0 {
                (plugin.stop_block_reached)();
            }
        });

        debug!(target: "mindreader", "created mindreader plugin");
        Ok(plugin)
    }

    /// Starts the read, consume and uploader tasks.
    ///
    /// Must be called from within a tokio runtime. `block_server`, when
    /// given, receives every archived block in order.
    pub fn run(&self, block_server: Option<Arc<dyn BlockStreamServer>>) {
        let Some(plugin) = self.me.upgrade() else { return };
        let Some(console_reader) = self.console_reader.lock().take() else {
            warn!(target: "mindreader", "plugin already running");
            return;
        };
        info!(target: "mindreader", "running mindreader plugin");
        *self.block_server.lock() = block_server;

        let (blocks_tx, blocks_rx) = mpsc::channel(self.channel_capacity);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        *self.consume_done_rx.lock() = Some(done_rx);

        let consumer = plugin.clone();
        tokio::spawn(async move { consumer.consume_read_flow(blocks_rx, done_tx).await });

        let uploader = plugin.clone();
        tokio::spawn(async move { uploader.always_upload_files().await });

        tokio::task::spawn_blocking(move || plugin.read_flow(console_reader, blocks_tx));
    }

    /// Hands one console line to the pipeline.
    ///
    /// Appends a newline and writes into the pipe; blocks only when the pipe
    /// is full, which is the intended backpressure on the node. A write
    /// error shuts the plugin down with that error.
    pub fn log_line(&self, line: &str) {
        let mut writer = self.pipe_writer.lock();
        let Some(pipe) = writer.as_mut() else { return };
        if let Err(err) =
            pipe.write_all(line.as_bytes()).and_then(|()| pipe.write_all(b"\n"))
        {
            error!(target: "mindreader", %err, "writing to console pipe");
            drop(writer);
            self.lifecycle.shutdown(Some(Arc::new(MindReaderError::Pipe(err))));
        }
    }

    /// Closes the console pipe (the read task unblocks with end of stream)
    /// and initiates shutdown with `err` as the cause.
    pub fn close(&self, err: Option<ShutdownError>) {
        info!(target: "mindreader", "closing console pipe and shutting down plugin");
        self.pipe_writer.lock().take();
        self.lifecycle.shutdown(err);
    }

    /// Whether continuity checking is enabled.
    pub fn has_continuity_checker(&self) -> bool {
        self.continuity_checker.is_some()
    }

    /// Forgets all recorded continuity state.
    pub fn reset_continuity_checker(&self) {
        if let Some(checker) = &self.continuity_checker {
            if let Err(err) = checker.reset() {
                warn!(target: "mindreader", %err, "failed resetting continuity checker");
            }
        }
    }

    /// Resolves when shutdown begins.
    pub fn terminating(&self) -> Shutdown {
        self.lifecycle.terminating()
    }

    /// Resolves once shutdown completed, blocks drained and uploads done.
    pub fn terminated(&self) -> Shutdown {
        self.lifecycle.terminated()
    }

    /// Registers a hook invoked when shutdown begins.
    pub fn on_terminating(&self, hook: impl FnOnce(Option<ShutdownError>) + Send + 'static) {
        self.lifecycle.on_terminating(hook);
    }

    /// Registers a hook invoked after shutdown completed.
    pub fn on_terminated(&self, hook: impl FnOnce(Option<ShutdownError>) + Send + 'static) {
        self.lifecycle.on_terminated(hook);
    }

    /// Whether shutdown has begun.
    pub fn is_terminating(&self) -> bool {
        self.lifecycle.is_terminating()
    }

    /// Initiates shutdown with the given cause.
    pub fn shutdown(&self, err: Option<ShutdownError>) {
        self.lifecycle.shutdown(err);
    }

    fn wait_for_read_flow_to_complete(&self) {
        let Some(done) = self.consume_done_rx.lock().take() else {
            debug!(target: "mindreader", "consume flow never started, nothing to wait for");
            return;
        };
        info!(target: "mindreader", "waiting until consume flow is done processing blocks");
        let _ = done.recv();
    }

    fn read_flow(&self, mut console_reader: CR, blocks: mpsc::Sender<Block>) {
        info!(target: "mindreader", "starting read flow");
        loop {
            // Always keep reading, otherwise the node stalls on a full pipe
            // during its own shutdown. Only end-of-stream stops this loop.
            match self.read_one_message(&mut console_reader, &blocks) {
                Ok(()) => {}
                Err(ReadError::Eof) => {
                    info!(target: "mindreader", "reached end of console stream, nothing more to do");
                    return;
                }
                Err(err) => {
                    error!(target: "mindreader", %err, "reading from console logs");
                    (self.set_maintenance)();
                }
            }
        }
    }

    fn read_one_message(
        &self,
        console_reader: &mut CR,
        blocks: &mpsc::Sender<Block>,
    ) -> Result<(), ReadError> {
        let obj = console_reader.read()?;
        let block = (self.transformer)(obj)?;

        if !self.start_gate.lock().pass(&block) {
            return Ok(());
        }

        if let Some(update) = &self.head_block_updater {
            update(block.number, &block.id, block.timestamp);
        }
        self.metrics.record_head_block(&block);

        let block_num = block.number;
        if blocks.blocking_send(block).is_err() {
            debug!(target: "mindreader", "blocks channel closed, stopping read flow");
            return Err(ReadError::Eof);
        }

        if self.stop_block_num > 0
            && block_num >= self.stop_block_num
            && !self.lifecycle.is_terminating()
        {
            info!(target: "mindreader", block_num, "stop block reached, initiating shutdown");
            self.lifecycle.shutdown(None);
        }

        Ok(())
    }

    // The consume flow is what holds termination back until every received
    // block has been archived and uploaded.
    async fn consume_read_flow(
        self: Arc<Self>,
        mut blocks: mpsc::Receiver<Block>,
        done: std::sync::mpsc::Sender<()>,
    ) {
        info!(target: "mindreader", "starting consume flow");
        self.consume_blocks(&mut blocks).await;
        self.archiver.wait_for_all_files_to_upload().await;
        debug!(target: "mindreader", "archiver finished uploading");
        let _ = done.send(());
    }

    async fn consume_blocks(&self, blocks: &mut mpsc::Receiver<Block>) {
        let mut terminating = self.lifecycle.terminating();
        loop {
            tokio::select! {
                _ = &mut terminating => {
                    let remaining = blocks.len();
                    if remaining > 0 {
                        info!(target: "mindreader", block_count = remaining, "draining blocks channel before finalizing");
                    }
                    while let Ok(block) = blocks.try_recv() {
                        if !self.process_block(block) {
                            return;
                        }
                    }
                    debug!(target: "mindreader", "all blocks in channel were drained, exiting consume flow");
                    return;
                }
                block = blocks.recv() => {
                    match block {
                        Some(block) => {
                            if !self.process_block(block) {
                                return;
                            }
                        }
                        None => {
                            debug!(target: "mindreader", "blocks channel closed, exiting consume flow");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Archives, continuity-checks and publishes one block. Returns `false`
    /// when the pipeline must stop.
    fn process_block(&self, block: Block) -> bool {
        if let Err(err) = self.archiver.store_block(&block) {
            error!(target: "mindreader", %err, "failed storing block in archiver");
            self.lifecycle.shutdown(Some(Arc::new(MindReaderError::Archive(err))));
            return false;
        }

        if let Some(checker) = &self.continuity_checker {
            if let Err(err) = checker.write(block.number) {
                error!(target: "mindreader", %err, "failed continuity check");
                (self.set_maintenance)();
                // The block is archived but not published.
                return true;
            }
        }

        let server = self.block_server.lock().clone();
        if let Some(server) = server {
            if let Err(err) = server.push_block(&block) {
                error!(target: "mindreader", %err, "failed passing block to block stream server");
                self.lifecycle.shutdown(Some(Arc::new(MindReaderError::Publish(err))));
                return false;
            }
        }

        true
    }

    async fn always_upload_files(&self) {
        debug!(target: "mindreader", "starting one-block file uploader");
        let mut terminating = self.lifecycle.terminating();
        loop {
            if self.lifecycle.is_terminating() {
                // The consume flow keeps uploading through
                // wait_for_all_files_to_upload, nothing left to do here.
                return;
            }

            if let Err(err) = self.archiver.upload_files().await {
                warn!(target: "mindreader", %err, "failed to upload stale files");
            }

            tokio::select! {
                _ = &mut terminating => return,
                _ = tokio::time::sleep(UPLOAD_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_store::FsStore;
    use scribe_types::JsonBlockCodec;
    use serde::Deserialize;
    use std::{
        io::{BufRead, BufReader},
        path::Path,
        sync::atomic::{AtomicBool, Ordering},
    };

    struct TestConsoleReader {
        lines: std::io::Lines<BufReader<io::PipeReader>>,
    }

    impl ConsoleReader for TestConsoleReader {
        type Item = String;

        fn read(&mut self) -> Result<String, ReadError> {
            match self.lines.next() {
                Some(Ok(line)) => Ok(line),
                Some(Err(err)) => Err(err.into()),
                None => Err(ReadError::Eof),
            }
        }
    }

    fn parse_dmlog(line: String) -> Result<Block, TransformError> {
        #[derive(Deserialize)]
        struct Raw {
            id: String,
        }

        let payload = line
            .strip_prefix("DMLOG ")
            .ok_or_else(|| TransformError(format!("unexpected console line: {line:?}")))?;
        let raw: Raw = serde_json::from_str(payload)
            .map_err(|err| TransformError(format!("parsing {payload:?}: {err}")))?;
        let number = u64::from_str_radix(raw.id.get(..8).unwrap_or_default(), 16)
            .map_err(|err| TransformError(format!("block id {:?}: {err}", raw.id)))?;
        Ok(Block { number, id: raw.id, timestamp: Utc::now(), ..Default::default() })
    }

    fn test_plugin_with(
        dir: &Path,
        start_block_num: u64,
        stop_block_num: u64,
        set_maintenance: impl Fn() + Send + Sync + 'static,
        stop_block_reached: impl Fn() + Send + Sync + 'static,
    ) -> Arc<MindReaderPlugin<TestConsoleReader>> {
        let config = MindReaderConfig {
            working_directory: dir.join("work"),
            start_block_num,
            stop_block_num,
            discard_after_stop_block: false,
            channel_capacity: 8,
            fail_on_non_contiguous_blocks: false,
            merge_threshold_block_age: Duration::from_secs(999 * 3600),
            one_block_suffix: "testing".to_string(),
        };
        MindReaderPlugin::new(
            config,
            Arc::new(FsStore::new(dir.join("store"), true).unwrap()),
            Arc::new(FsStore::new(dir.join("merged"), true).unwrap()),
            Arc::new(JsonBlockCodec),
            |pipe| Ok(TestConsoleReader { lines: BufReader::new(pipe).lines() }),
            parse_dmlog,
            None,
            set_maintenance,
            stop_block_reached,
        )
        .unwrap()
    }

    fn test_plugin(
        dir: &Path,
        start_block_num: u64,
        stop_block_num: u64,
    ) -> Arc<MindReaderPlugin<TestConsoleReader>> {
        test_plugin_with(dir, start_block_num, stop_block_num, || {}, || {})
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_flow_parses_log_lines_into_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = test_plugin(dir.path(), 1, 0);
        let (blocks_tx, mut blocks_rx) = mpsc::channel(1);

        plugin.log_line(r#"DMLOG {"id":"00000001a"}"#);

        let reader = plugin.clone();
        let read = tokio::task::spawn_blocking(move || {
            let mut console_reader = reader.console_reader.lock().take().unwrap();
            reader.read_one_message(&mut console_reader, &blocks_tx)
        });

        let block = tokio::time::timeout(Duration::from_secs(1), blocks_rx.recv())
            .await
            .expect("too long")
            .unwrap();
        assert_eq!(block.number, 1);
        read.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gate_holds_back_blocks_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = test_plugin(dir.path(), 2, 0);
        let (blocks_tx, mut blocks_rx) = mpsc::channel(2);

        plugin.log_line(r#"DMLOG {"id":"00000001a"}"#);
        plugin.log_line(r#"DMLOG {"id":"00000002a"}"#);

        let reader = plugin.clone();
        let read = tokio::task::spawn_blocking(move || {
            let mut console_reader = reader.console_reader.lock().take().unwrap();
            for _ in 0..2 {
                reader.read_one_message(&mut console_reader, &blocks_tx)?;
            }
            Ok::<(), ReadError>(())
        });

        let block = tokio::time::timeout(Duration::from_secs(1), blocks_rx.recv())
            .await
            .expect("too long")
            .unwrap();
        assert_eq!(block.number, 2);

        read.await.unwrap().unwrap();
        // Block 1 never made it through the gate.
        assert!(blocks_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_block_initiates_clean_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let stop_reached = Arc::new(AtomicBool::new(false));
        let stop_flag = stop_reached.clone();
        let plugin =
            test_plugin_with(dir.path(), 0, 2, || {}, move || stop_flag.store(true, Ordering::SeqCst));
        let (blocks_tx, blocks_rx) = mpsc::channel(2);

        plugin.log_line(r#"DMLOG {"id":"00000001a"}"#);
        plugin.log_line(r#"DMLOG {"id":"00000002a"}"#);

        let reader = plugin.clone();
        let read = tokio::task::spawn_blocking(move || {
            let mut console_reader = reader.console_reader.lock().take().unwrap();
            for _ in 0..2 {
                reader.read_one_message(&mut console_reader, &blocks_tx)?;
            }
            Ok::<(), ReadError>(())
        });

        tokio::time::timeout(Duration::from_secs(1), plugin.terminating())
            .await
            .expect("stop block must initiate shutdown");
        read.await.unwrap().unwrap();

        // A stop block is not an error, and the triggering block was still
        // delivered.
        tokio::time::timeout(Duration::from_secs(1), plugin.terminated())
            .await
            .expect("terminated");
        assert!(plugin.lifecycle.cause().is_none());
        assert!(stop_reached.load(Ordering::SeqCst));
        assert_eq!(blocks_rx.len(), 2);
    }
}
