use metrics::{counter, describe_counter, Counter};

/// Process-wide backup counters.
#[derive(Clone)]
pub(crate) struct OperatorMetrics {
    pub(crate) successful_backups: Counter,
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        describe_counter!(
            "operator.successful_backups",
            "Incremented every time a backup completes successfully"
        );
        Self { successful_backups: counter!("operator.successful_backups") }
    }
}
