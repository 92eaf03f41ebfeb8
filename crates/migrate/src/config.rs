//! Configuration for the migration and backup subsystem.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every component of the subsystem.
///
/// There is no hidden global state: the registry, ledger, runner, rollback
/// engine and backup manager all receive this object (or the relevant pieces
/// of it) explicitly at construction time, which keeps each component
/// testable with a temporary directory and a throwaway database.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Directory containing the versioned migration scripts.
    pub migrations_dir: PathBuf,
    /// Directory where database snapshots are written.
    pub backups_dir: PathBuf,
    /// Name of the tracking table inside the target database.
    pub tracking_table: String,
    /// Upper bound on the execution of a single up or down script.
    pub statement_timeout: Duration,
    /// Upper bound on a full database dump.
    pub backup_timeout: Duration,
    /// Path to the `pg_dump` executable.
    pub pg_dump_path: PathBuf,
    /// Connection string handed to `pg_dump`. The rest of the subsystem
    /// works through an already-connected pool.
    pub database_url: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            backups_dir: PathBuf::from("backups"),
            tracking_table: "schema_migrations".to_string(),
            statement_timeout: Duration::from_secs(30),
            backup_timeout: Duration::from_secs(600),
            pg_dump_path: PathBuf::from("pg_dump"),
            database_url: String::new(),
        }
    }
}
