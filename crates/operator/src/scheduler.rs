//! Cadence-driven dispatch of registered backup modules.

use crate::{
    backup::{
        BackupError, BackupModule, BackupSchedule, NodeControlError, NodeController,
        RestorableBackupModule,
    },
    metrics::OperatorMetrics,
};
use scribe_lifecycle::Shutdown;
use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors surfaced by the backup scheduler.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// A module with the same name was already registered.
    #[error("backup module {0:?} is already registered")]
    DuplicateModule(String),
    /// The registry is empty.
    #[error("no registered backup modules")]
    NoModules,
    /// The requested module does not exist.
    #[error("invalid backup module: {0}")]
    UnknownModule(String),
    /// No module name was given and several are registered.
    #[error("more than one backup module registered, and none specified ({0})")]
    AmbiguousModule(String),
    /// No registered module supports restore.
    #[error("none of the registered backup modules support restore")]
    NoRestorableModules,
    /// The requested restore-capable module does not exist.
    #[error("invalid restorable backup module: {0}")]
    UnknownRestorableModule(String),
    /// No module name was given and several restore-capable ones exist.
    #[error("more than one restorable backup module registered, and none specified ({0})")]
    AmbiguousRestorableModule(String),
    /// The module itself failed.
    #[error("backup module {name} failed: {source}")]
    Backup {
        /// Name of the failing module.
        name: String,
        /// The module's error.
        source: BackupError,
    },
    /// Stopping or resuming the node failed.
    #[error(transparent)]
    NodeControl(#[from] NodeControlError),
}

struct ScheduleState {
    schedule: BackupSchedule,
    last_run_block: Option<u64>,
    last_run_at: Option<Instant>,
}

/// Dispatches registered backup modules on block-count or wall-clock
/// cadence, gated by hostname.
///
/// Schedules fire independently of each other; a failed run leaves the
/// cadence state untouched so the next tick retries.
pub struct BackupScheduler {
    modules: BTreeMap<String, Arc<dyn BackupModule>>,
    restorable: BTreeMap<String, Arc<dyn RestorableBackupModule>>,
    schedules: Vec<ScheduleState>,
    hostname: String,
    node: Arc<dyn NodeController>,
    metrics: OperatorMetrics,
}

impl fmt::Debug for BackupScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupScheduler")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("restorable", &self.restorable.keys().collect::<Vec<_>>())
            .field("schedules", &self.schedules.len())
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl BackupScheduler {
    /// Creates a scheduler using the process hostname for schedule gating.
    pub fn new(node: Arc<dyn NodeController>) -> Self {
        let hostname = whoami::fallible::hostname().unwrap_or_else(|err| {
            warn!(
                target: "operator",
                %err,
                "unable to determine hostname, hostname-gated schedules will not fire"
            );
            String::new()
        });
        Self::with_hostname(node, hostname)
    }

    /// Creates a scheduler with an explicit hostname.
    pub fn with_hostname(node: Arc<dyn NodeController>, hostname: impl Into<String>) -> Self {
        Self {
            modules: BTreeMap::new(),
            restorable: BTreeMap::new(),
            schedules: Vec::new(),
            hostname: hostname.into(),
            node,
            metrics: OperatorMetrics::default(),
        }
    }

    /// Registers a backup module under a unique name.
    pub fn register_backup_module(
        &mut self,
        name: impl Into<String>,
        module: Arc<dyn BackupModule>,
    ) -> Result<(), OperatorError> {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(OperatorError::DuplicateModule(name));
        }
        self.modules.insert(name, module);
        Ok(())
    }

    /// Registers a restore-capable backup module under a unique name.
    pub fn register_restorable_backup_module<M>(
        &mut self,
        name: impl Into<String>,
        module: Arc<M>,
    ) -> Result<(), OperatorError>
    where
        M: RestorableBackupModule + 'static,
    {
        let name = name.into();
        self.register_backup_module(name.clone(), module.clone())?;
        self.restorable.insert(name, module);
        Ok(())
    }

    /// Appends a schedule; every registered schedule fires independently.
    pub fn register_backup_schedule(&mut self, schedule: BackupSchedule) {
        self.schedules.push(ScheduleState {
            schedule,
            last_run_block: None,
            last_run_at: None,
        });
    }

    /// Evaluates every schedule against the latest observed block and the
    /// wall clock, running whatever is due.
    pub fn tick(&mut self, current_block_num: u64) {
        self.tick_at(Instant::now(), current_block_num)
    }

    fn tick_at(&mut self, now: Instant, current_block_num: u64) {
        for state in &mut self.schedules {
            if !state.schedule.required_hostname.is_empty()
                && state.schedule.required_hostname != self.hostname
            {
                continue;
            }

            let due = if let Some(blocks) = state.schedule.blocks_between_runs {
                current_block_num.saturating_sub(state.last_run_block.unwrap_or(0)) >= blocks
            } else if let Some(interval) = state.schedule.time_between_runs {
                match state.last_run_at {
                    Some(last_run) => now.saturating_duration_since(last_run) >= interval,
                    None => {
                        // First observation; the first timed run happens one
                        // full interval from here.
                        state.last_run_at = Some(now);
                        false
                    }
                }
            } else {
                false
            };
            if !due {
                continue;
            }

            let name = &state.schedule.backuper_name;
            let Some(module) = self.modules.get(name) else {
                error!(
                    target: "operator",
                    backuper = %name,
                    "backup schedule references an unknown module, skipping"
                );
                continue;
            };

            info!(target: "operator", backuper = %name, current_block_num, "backup schedule due");
            match run_backup(self.node.as_ref(), name, module.as_ref(), current_block_num) {
                Ok(artifact) => {
                    info!(target: "operator", backuper = %name, %artifact, "backup completed");
                    self.metrics.successful_backups.increment(1);
                    state.last_run_block = Some(current_block_num);
                    state.last_run_at = Some(now);
                }
                Err(err) => {
                    error!(target: "operator", backuper = %name, %err, "scheduled backup failed")
                }
            }
        }
    }

    /// Drives [`BackupScheduler::tick`] from the head-block watch channel
    /// until the pipeline terminates.
    pub async fn run(mut self, mut terminating: Shutdown, mut head_block: watch::Receiver<u64>) {
        info!(target: "operator", schedules = self.schedules.len(), "starting backup scheduler");
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = &mut terminating => {
                    debug!(target: "operator", "backup scheduler stopping");
                    return;
                }
                _ = interval.tick() => {
                    let current_block_num = *head_block.borrow_and_update();
                    self.tick(current_block_num);
                }
            }
        }
    }

    /// Runs one backup on demand.
    ///
    /// With no name given, the single registered module is selected; several
    /// registered modules make the name mandatory.
    pub fn backup(
        &self,
        module_name: Option<&str>,
        last_seen_block_num: u64,
    ) -> Result<String, OperatorError> {
        let (name, module) = select_backup_module(&self.modules, module_name)?;
        let artifact =
            run_backup(self.node.as_ref(), &name, module.as_ref(), last_seen_block_num)?;
        self.metrics.successful_backups.increment(1);
        Ok(artifact)
    }

    /// Restores from the artifact called `artifact`, selecting among the
    /// restore-capable modules only.
    pub fn restore(&self, module_name: Option<&str>, artifact: &str) -> Result<(), OperatorError> {
        let (name, module) = select_restore_module(&self.restorable, module_name)?;
        info!(target: "operator", backuper = %name, %artifact, "restoring backup");
        module
            .restore(artifact)
            .map_err(|source| OperatorError::Backup { name, source })
    }
}

fn run_backup(
    node: &dyn NodeController,
    name: &str,
    module: &dyn BackupModule,
    last_seen_block_num: u64,
) -> Result<String, OperatorError> {
    let needs_stop = module.requires_stop();
    if needs_stop {
        info!(target: "operator", backuper = %name, "backup module requires a stopped node, stopping");
        node.stop()?;
    }

    let result = module
        .backup(last_seen_block_num)
        .map_err(|source| OperatorError::Backup { name: name.to_string(), source });

    if needs_stop {
        if let Err(err) = node.resume() {
            error!(target: "operator", %err, "failed to resume node after backup");
        }
    }

    result
}

fn select_backup_module(
    modules: &BTreeMap<String, Arc<dyn BackupModule>>,
    name: Option<&str>,
) -> Result<(String, Arc<dyn BackupModule>), OperatorError> {
    if modules.is_empty() {
        return Err(OperatorError::NoModules);
    }
    if let Some(name) = name {
        return modules
            .get(name)
            .map(|module| (name.to_string(), module.clone()))
            .ok_or_else(|| OperatorError::UnknownModule(name.to_string()));
    }
    if modules.len() > 1 {
        let names: Vec<_> = modules.keys().cloned().collect();
        return Err(OperatorError::AmbiguousModule(names.join(",")));
    }
    match modules.iter().next() {
        Some((name, module)) => Ok((name.clone(), module.clone())),
        None => Err(OperatorError::NoModules),
    }
}

fn select_restore_module(
    modules: &BTreeMap<String, Arc<dyn RestorableBackupModule>>,
    name: Option<&str>,
) -> Result<(String, Arc<dyn RestorableBackupModule>), OperatorError> {
    if modules.is_empty() {
        return Err(OperatorError::NoRestorableModules);
    }
    if let Some(name) = name {
        return modules
            .get(name)
            .map(|module| (name.to_string(), module.clone()))
            .ok_or_else(|| OperatorError::UnknownRestorableModule(name.to_string()));
    }
    if modules.len() > 1 {
        let names: Vec<_> = modules.keys().cloned().collect();
        return Err(OperatorError::AmbiguousRestorableModule(names.join(",")));
    }
    match modules.iter().next() {
        Some((name, module)) => Ok((name.clone(), module.clone())),
        None => Err(OperatorError::NoRestorableModules),
    }
}
