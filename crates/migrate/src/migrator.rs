//! Top-level facade wiring every component from one configuration object.

use sqlx::PgPool;

use crate::backup::{Backup, BackupManager, BackupTrigger};
use crate::config::MigratorConfig;
use crate::error::MigrateResult;
use crate::ledger::MigrationLedger;
use crate::registry::MigrationRegistry;
use crate::rollback::{MigrationRollback, RollbackOutcome};
use crate::runner::{MigrationRunReport, MigrationRunner, RunOptions};
use crate::status::{summarize, StatusReport, StatusReporter};

/// The whole subsystem behind one handle.
///
/// Every component receives its database handle and filesystem roots from
/// the single [`MigratorConfig`] passed here. The deployment layer must
/// guarantee at most one concurrent invocation of [`run`](Self::run),
/// [`rollback_last`](Self::rollback_last) or
/// [`create_backup`](Self::create_backup) against the same database; each
/// assumes it is the sole writer of the tracking table while it executes.
#[derive(Debug, Clone)]
pub struct Migrator {
    reporter: StatusReporter,
    runner: MigrationRunner,
    backups: BackupManager,
}

impl Migrator {
    pub fn new(config: MigratorConfig, pool: PgPool) -> Self {
        let registry = MigrationRegistry::new(config.migrations_dir.clone());
        let ledger = MigrationLedger::new(pool, config.tracking_table.clone());
        let reporter = StatusReporter::new(registry.clone(), ledger.clone());
        let runner = MigrationRunner::new(registry, ledger, config.statement_timeout);
        let backups = BackupManager::new(&config);

        Self {
            reporter,
            runner,
            backups,
        }
    }

    /// Merged migration status plus the backup catalog, ready for the
    /// surrounding application's status endpoint.
    pub async fn status_report(&self) -> MigrateResult<StatusReport> {
        let migrations = self.reporter.get_status().await?;
        let backups = self.backups.get_backups()?;
        Ok(StatusReport {
            summary: summarize(&migrations),
            migrations,
            backups,
        })
    }

    /// Apply all outstanding migrations in order; see
    /// [`MigrationRunner::run`].
    pub async fn run(&self, options: RunOptions) -> MigrateResult<MigrationRunReport> {
        self.runner.run(options).await
    }

    /// Revert the most recently applied migration, preceded by an automatic
    /// backup; see [`MigrationRollback::rollback_last`].
    pub async fn rollback_last(&self) -> MigrateResult<RollbackOutcome> {
        self.runner.rollback_last(&self.backups).await
    }

    /// Take a snapshot on demand.
    pub async fn create_backup(&self, trigger: BackupTrigger) -> MigrateResult<Backup> {
        self.backups.create_backup(trigger).await
    }

    /// Snapshot catalog, newest first.
    pub fn backups(&self) -> MigrateResult<Vec<Backup>> {
        self.backups.get_backups()
    }

    /// Filesystem registry, exposed for script scaffolding.
    pub fn registry(&self) -> &MigrationRegistry {
        self.runner.registry()
    }
}
