//! # encore-migrate: Schema Migration & Backup Orchestration
//!
//! Database change management for the Encore event-management platform:
//! discovery of versioned SQL script pairs on disk, a tracking ledger inside
//! the target database, ordered fail-fast application with dry-run support,
//! single-step rollback guarded by an automatic backup, and a `pg_dump`
//! based snapshot catalog.
//!
//! The filesystem is authoritative for which migrations exist; the ledger is
//! authoritative for what has been applied. Everything is a short-lived,
//! blocking administrative operation: no background work, no internal
//! concurrency. The deployment layer must ensure at most one concurrent
//! invocation per database (an advisory lock around the operation is
//! enough).

pub mod backup;
pub mod config;
pub mod error;
pub mod ledger;
pub mod migrator;
pub mod registry;
pub mod rollback;
pub mod runner;
pub mod status;

// Re-export the types callers actually touch.
pub use backup::{Backup, BackupManager, BackupTrigger};
pub use config::MigratorConfig;
pub use error::{MigrateError, MigrateResult};
pub use ledger::{MigrationLedger, MigrationRecord};
pub use migrator::Migrator;
pub use registry::{MigrationFile, MigrationRegistry};
pub use rollback::{MigrationRollback, RollbackOutcome};
pub use runner::{MigrationResult, MigrationRunReport, MigrationRunner, RunOptions};
pub use status::{
    merge_status, summarize, MigrationState, MigrationStatus, StatusReport, StatusReporter,
    StatusSummary,
};
