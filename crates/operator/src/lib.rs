//! Scheduled backups of node state to pluggable backup modules.
//!
//! A [`BackupScheduler`] owns a registry of named [`BackupModule`]s and an
//! ordered list of [`BackupSchedule`]s. Each schedule fires independently on
//! block-count or wall-clock cadence, optionally gated to a single hostname;
//! modules that require a stopped node are bracketed by
//! [`NodeController::stop`] and [`NodeController::resume`].

mod backup;
mod metrics;
mod scheduler;

pub use backup::{
    BackupError, BackupModule, BackupSchedule, NodeControlError, NodeController,
    RestorableBackupModule, ScheduleError, MIN_TIME_BETWEEN_RUNS,
};
pub use scheduler::{BackupScheduler, OperatorError};
