//! Executor - applies outstanding migrations in order.
//!
//! Each up script runs verbatim as a single unit inside its own transaction,
//! with the ledger write committed in that same transaction. On failure the
//! transaction rolls back, the failure is recorded, and the run stops: later
//! scripts may assume the schema state left by earlier ones, so fail-fast
//! preserves the ordering invariant instead of skipping ahead.
//!
//! Failed records are re-attemptable: the runnable set is pending plus
//! error, and the ledger upserts, so fixing the script and re-invoking
//! `run` retries the failed migration without manual ledger surgery.

use std::fs;
use std::time::Duration;

use serde::Serialize;
use sqlx::{Executor, PgConnection, PgPool};
use tokio::time::timeout;

use crate::error::{MigrateError, MigrateResult};
use crate::ledger::MigrationLedger;
use crate::registry::{MigrationFile, MigrationRegistry};
use crate::status::{merge_status, MigrationState};

/// Options for a single `run` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Report what would execute without touching the database or ledger.
    pub dry_run: bool,
}

/// Outcome of one attempted (or dry-run) migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub name: String,
    pub success: bool,
    pub message: String,
}

/// Outcome of a whole `run` invocation. `success` is true iff every
/// attempted migration in this run succeeded; an empty result list is a
/// successful no-op.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRunReport {
    pub results: Vec<MigrationResult>,
    pub success: bool,
}

/// Applies outstanding migrations in ascending sequence order.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    registry: MigrationRegistry,
    ledger: MigrationLedger,
    statement_timeout: Duration,
}

impl MigrationRunner {
    pub fn new(
        registry: MigrationRegistry,
        ledger: MigrationLedger,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            statement_timeout,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub(crate) fn pool(&self) -> &PgPool {
        self.ledger.pool()
    }

    /// Run all outstanding migrations. Re-invoking after everything is
    /// applied is a true no-op.
    pub async fn run(&self, options: RunOptions) -> MigrateResult<MigrationRunReport> {
        self.ledger.ensure_tracking_table().await?;

        let files = self.registry.list_migrations()?;
        let records = self.ledger.get_executed_migrations().await?;
        let statuses = merge_status(&files, &records);

        let runnable: Vec<&MigrationFile> = files
            .iter()
            .filter(|file| {
                statuses
                    .iter()
                    .find(|s| s.name == file.name)
                    .is_some_and(|s| is_runnable(s.state))
            })
            .collect();

        if runnable.is_empty() {
            return Ok(MigrationRunReport {
                results: Vec::new(),
                success: true,
            });
        }

        if options.dry_run {
            let results = runnable
                .iter()
                .map(|file| MigrationResult {
                    name: file.name.clone(),
                    success: true,
                    message: dry_run_message(&file.name),
                })
                .collect();
            return Ok(MigrationRunReport {
                results,
                success: true,
            });
        }

        let mut results = Vec::with_capacity(runnable.len());
        for file in runnable {
            match self.apply(file).await {
                Ok(()) => {
                    tracing::info!(migration = %file.name, sequence = file.sequence, "applied migration");
                    results.push(MigrationResult {
                        name: file.name.clone(),
                        success: true,
                        message: format!("executed {}", file.name),
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    tracing::error!(migration = %file.name, "{}", message);
                    // The schema transaction already rolled back; record the
                    // failure on its own connection.
                    self.ledger
                        .record_execution(&file.name, false, Some(&message))
                        .await?;
                    results.push(MigrationResult {
                        name: file.name.clone(),
                        success: false,
                        message,
                    });
                    break;
                }
            }
        }

        let success = results.iter().all(|r| r.success);
        Ok(MigrationRunReport { results, success })
    }

    /// Apply one up script and its ledger write atomically. Script failures
    /// surface as `Execution` errors; the caller records and reports them.
    async fn apply(&self, file: &MigrationFile) -> MigrateResult<()> {
        let sql = fs::read_to_string(&file.up_path).map_err(|e| {
            MigrateError::execution(
                &file.name,
                format!("failed to read {}: {}", file.up_path.display(), e),
            )
        })?;

        let mut tx = self.pool().begin().await.map_err(MigrateError::connectivity)?;

        self.execute_script(&mut tx, &sql)
            .await
            .map_err(|message| MigrateError::execution(&file.name, message))?;

        self.ledger
            .record_execution_in(&mut tx, &file.name, true, None)
            .await?;

        tx.commit().await.map_err(MigrateError::connectivity)?;
        Ok(())
    }

    /// Execute a script verbatim as a single unit, bounded by the
    /// configured statement timeout. Shared with the rollback engine.
    pub(crate) async fn execute_script(
        &self,
        conn: &mut PgConnection,
        sql: &str,
    ) -> Result<(), String> {
        match timeout(self.statement_timeout, (&mut *conn).execute(sql)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.statement_timeout.as_secs()
            )),
        }
    }
}

/// Whether a migration in this state should be picked up by `run`.
pub(crate) fn is_runnable(state: MigrationState) -> bool {
    matches!(state, MigrationState::Pending | MigrationState::Error)
}

pub(crate) fn dry_run_message(name: &str) -> String {
    format!("DRY RUN: would execute {}", name)
}
