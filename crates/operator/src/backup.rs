//! Backup module seams and schedule validation.

use std::time::Duration;

/// Smallest allowed wall-clock cadence for a backup schedule.
pub const MIN_TIME_BETWEEN_RUNS: Duration = Duration::from_secs(60);

/// Error reported by a backup module.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BackupError(pub String);

/// Error reported by the node controller.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NodeControlError(pub String);

/// A pluggable backup target.
pub trait BackupModule: Send + Sync {
    /// Captures node state up to `last_seen_block_num` and returns the name
    /// of the produced artifact.
    fn backup(&self, last_seen_block_num: u64) -> Result<String, BackupError>;

    /// Whether the node must be stopped and idle while the backup runs.
    fn requires_stop(&self) -> bool;
}

/// The restore-capable subset of backup modules.
pub trait RestorableBackupModule: BackupModule {
    /// Restores node state from the artifact called `name`.
    fn restore(&self, name: &str) -> Result<(), BackupError>;
}

/// Seam to the node-process supervisor, used for modules that require a
/// stopped node.
pub trait NodeController: Send + Sync {
    /// Stops the node process and returns once it is idle.
    fn stop(&self) -> Result<(), NodeControlError>;

    /// Brings the node process back up after a backup.
    fn resume(&self) -> Result<(), NodeControlError>;
}

/// Invalid backup schedule configurations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Neither a block nor a time frequency was given.
    #[error("backup schedule created without any frequency value")]
    MissingFrequency,
    /// Both frequencies were given; exactly one is allowed.
    #[error("backup schedule cannot combine block and time frequencies")]
    ConflictingFrequencies,
    /// The block frequency did not parse to a positive integer.
    #[error("invalid value for freq_blocks in backup schedule: {0:?}")]
    InvalidBlockFrequency(String),
    /// The time frequency did not parse to a duration.
    #[error("invalid value for freq_time in backup schedule: {0:?}")]
    InvalidTimeFrequency(String),
    /// The time frequency was below the allowed minimum.
    #[error("time between runs must be at least one minute, got {0:?}")]
    TimeBetweenRunsTooShort(Duration),
}

/// When and where one backup module should run.
///
/// Exactly one of the two cadences is set. An empty `required_hostname`
/// matches any host.
#[derive(Debug, Clone)]
pub struct BackupSchedule {
    /// Fire whenever the chain advanced by this many blocks.
    pub blocks_between_runs: Option<u64>,
    /// Fire whenever this much wall-clock time elapsed since the last run.
    pub time_between_runs: Option<Duration>,
    /// Only run on the host with this name; empty matches every host.
    pub required_hostname: String,
    /// Name of the backup module to dispatch, resolved at run time.
    pub backuper_name: String,
}

impl BackupSchedule {
    /// Builds a schedule, enforcing that exactly one cadence is set and that
    /// a time cadence is at least [`MIN_TIME_BETWEEN_RUNS`].
    pub fn new(
        blocks_between_runs: Option<u64>,
        time_between_runs: Option<Duration>,
        required_hostname: impl Into<String>,
        backuper_name: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        match (blocks_between_runs, time_between_runs) {
            (Some(_), Some(_)) => Err(ScheduleError::ConflictingFrequencies),
            (None, None) => Err(ScheduleError::MissingFrequency),
            (Some(0), None) => Err(ScheduleError::InvalidBlockFrequency("0".to_string())),
            (None, Some(interval)) if interval < MIN_TIME_BETWEEN_RUNS => {
                Err(ScheduleError::TimeBetweenRunsTooShort(interval))
            }
            (blocks, interval) => Ok(Self {
                blocks_between_runs: blocks,
                time_between_runs: interval,
                required_hostname: required_hostname.into(),
                backuper_name: backuper_name.into(),
            }),
        }
    }

    /// Builds a schedule from raw configuration strings.
    ///
    /// A non-empty `freq_blocks` takes precedence; otherwise `freq_time` is
    /// parsed as a human-readable duration.
    pub fn parse(
        freq_blocks: &str,
        freq_time: &str,
        required_hostname: &str,
        backuper_name: &str,
    ) -> Result<Self, ScheduleError> {
        if !freq_blocks.is_empty() {
            let blocks = freq_blocks
                .parse::<u64>()
                .ok()
                .filter(|&blocks| blocks > 0)
                .ok_or_else(|| ScheduleError::InvalidBlockFrequency(freq_blocks.to_string()))?;
            Self::new(Some(blocks), None, required_hostname, backuper_name)
        } else if !freq_time.is_empty() {
            let interval = humantime::parse_duration(freq_time)
                .map_err(|_| ScheduleError::InvalidTimeFrequency(freq_time.to_string()))?;
            Self::new(None, Some(interval), required_hostname, backuper_name)
        } else {
            Err(ScheduleError::MissingFrequency)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_cadence_is_required() {
        assert_eq!(
            BackupSchedule::new(None, None, "", "mod").unwrap_err(),
            ScheduleError::MissingFrequency
        );
        assert_eq!(
            BackupSchedule::new(Some(10), Some(Duration::from_secs(120)), "", "mod").unwrap_err(),
            ScheduleError::ConflictingFrequencies
        );
    }

    #[test]
    fn block_cadence_must_be_positive() {
        assert_eq!(
            BackupSchedule::new(Some(0), None, "", "mod").unwrap_err(),
            ScheduleError::InvalidBlockFrequency("0".to_string())
        );
        assert!(BackupSchedule::new(Some(1), None, "", "mod").is_ok());
    }

    #[test]
    fn time_cadence_has_a_floor() {
        assert_eq!(
            BackupSchedule::new(None, Some(Duration::from_secs(30)), "", "mod").unwrap_err(),
            ScheduleError::TimeBetweenRunsTooShort(Duration::from_secs(30))
        );
        assert!(BackupSchedule::new(None, Some(Duration::from_secs(60)), "", "mod").is_ok());
    }

    #[test]
    fn parse_from_config_strings() {
        let schedule = BackupSchedule::parse("500", "", "backup-host", "pitreos").unwrap();
        assert_eq!(schedule.blocks_between_runs, Some(500));
        assert_eq!(schedule.time_between_runs, None);
        assert_eq!(schedule.required_hostname, "backup-host");
        assert_eq!(schedule.backuper_name, "pitreos");

        let schedule = BackupSchedule::parse("", "2h", "", "pitreos").unwrap();
        assert_eq!(schedule.time_between_runs, Some(Duration::from_secs(7200)));

        assert_eq!(
            BackupSchedule::parse("abc", "", "", "pitreos").unwrap_err(),
            ScheduleError::InvalidBlockFrequency("abc".to_string())
        );
        assert_eq!(
            BackupSchedule::parse("", "soon", "", "pitreos").unwrap_err(),
            ScheduleError::InvalidTimeFrequency("soon".to_string())
        );
        assert_eq!(
            BackupSchedule::parse("", "30s", "", "pitreos").unwrap_err(),
            ScheduleError::TimeBetweenRunsTooShort(Duration::from_secs(30))
        );
        assert_eq!(
            BackupSchedule::parse("", "", "", "pitreos").unwrap_err(),
            ScheduleError::MissingFrequency
        );
    }
}
