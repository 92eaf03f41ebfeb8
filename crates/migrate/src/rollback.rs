//! Rollback engine - reverts the single most recently applied migration.
//!
//! A rollback is destructive, so it is gated twice: the migration must have
//! a paired down script, and a fresh automatic backup must exist before the
//! down script runs. If backup creation fails, nothing else happens. The
//! down script and the ledger delete commit in one transaction; if the
//! script fails, the ledger is untouched and the migration remains applied,
//! with the already-taken backup left in the catalog for manual recovery.

use std::fs;

use serde::Serialize;

use crate::backup::{Backup, BackupManager, BackupTrigger};
use crate::error::{MigrateError, MigrateResult};
use crate::runner::MigrationRunner;
use crate::status::{MigrationState, MigrationStatus};

/// Outcome of a `rollback_last` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub success: bool,
    /// The migration that was (or failed to be) reverted. `None` when there
    /// was nothing to roll back.
    pub migration: Option<MigrationStatus>,
    /// The automatic snapshot taken before the destructive step.
    pub backup: Option<Backup>,
    pub message: String,
}

/// Rollback capability, layered on the executor's transaction primitives.
#[allow(async_fn_in_trait)]
pub trait MigrationRollback {
    /// Revert the most recently applied successful migration.
    async fn rollback_last(&self, backups: &BackupManager) -> MigrateResult<RollbackOutcome>;
}

impl MigrationRollback for MigrationRunner {
    async fn rollback_last(&self, backups: &BackupManager) -> MigrateResult<RollbackOutcome> {
        self.ledger().ensure_tracking_table().await?;

        let Some(record) = self.ledger().latest_successful().await? else {
            return Ok(RollbackOutcome {
                success: false,
                migration: None,
                backup: None,
                message: "nothing to roll back".to_string(),
            });
        };

        // The ledger alone is not evidence of a valid migration; intent is
        // reconstructed only from the registry.
        let Some(file) = self.registry().find(&record.name)? else {
            return Err(MigrateError::configuration(format!(
                "applied migration '{}' has no file on disk; refusing to roll back an orphaned record",
                record.name
            )));
        };

        let Some(down_path) = file.down_path.as_ref() else {
            return Err(MigrateError::NoDownScript {
                migration: file.name.clone(),
            });
        };

        // The destructive step never runs without a verified snapshot.
        let backup = backups.create_backup(BackupTrigger::Automatic).await?;

        let sql = fs::read_to_string(down_path)?;
        let mut tx = self.pool().begin().await.map_err(MigrateError::connectivity)?;

        if let Err(err) = self
            .execute_script(&mut tx, &sql)
            .await
            .map_err(|message| MigrateError::execution(&file.name, message))
        {
            let message = err.to_string();
            tracing::error!(migration = %file.name, "rollback failed: {}", message);
            // Transaction drops and rolls back; the migration stays applied.
            return Ok(RollbackOutcome {
                success: false,
                migration: Some(MigrationStatus {
                    name: file.name.clone(),
                    sequence: Some(file.sequence),
                    state: MigrationState::Executed,
                    executed_at: Some(record.executed_at),
                    error: None,
                }),
                backup: Some(backup),
                message,
            });
        }

        self.ledger()
            .remove_execution_in(&mut tx, &file.name)
            .await?;
        tx.commit().await.map_err(MigrateError::connectivity)?;

        tracing::info!(migration = %file.name, backup = %backup.name, "rolled back migration");

        Ok(RollbackOutcome {
            success: true,
            migration: Some(MigrationStatus {
                name: file.name.clone(),
                sequence: Some(file.sequence),
                state: MigrationState::Pending,
                executed_at: None,
                error: None,
            }),
            backup: Some(backup),
            message: format!("rolled back {}", file.name),
        })
    }
}
