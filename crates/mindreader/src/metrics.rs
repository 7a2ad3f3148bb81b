use chrono::Utc;
use metrics::{describe_gauge, gauge, Gauge};
use scribe_types::Block;

/// Head block gauges, refreshed on every message read from the console.
#[derive(Clone)]
pub(crate) struct MindReaderMetrics {
    head_block_number: Gauge,
    head_block_time_drift: Gauge,
}

impl Default for MindReaderMetrics {
    fn default() -> Self {
        describe_gauge!(
            "mindreader.head_block_number",
            "Number of the latest block read from the node console"
        );
        describe_gauge!(
            "mindreader.head_block_time_drift_seconds",
            "Seconds between wall clock and the latest head block timestamp"
        );
        Self {
            head_block_number: gauge!("mindreader.head_block_number"),
            head_block_time_drift: gauge!("mindreader.head_block_time_drift_seconds"),
        }
    }
}

impl MindReaderMetrics {
    pub(crate) fn record_head_block(&self, block: &Block) {
        self.head_block_number.set(block.number as f64);
        self.head_block_time_drift.set(block.age(Utc::now()).as_secs_f64());
    }
}
