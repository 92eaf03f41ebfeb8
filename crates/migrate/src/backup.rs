//! Backup manager - full logical snapshots of the target database.
//!
//! Snapshots are produced with `pg_dump` in custom format and catalogued by
//! filename convention: `backup_<YYYYMMDD_HHMMSS>_<trigger>.dump`. A failed
//! or timed-out dump never leaves a partial artifact behind, so anything the
//! catalog lists is a complete snapshot. Retention is an operational
//! concern; nothing here auto-deletes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::MigratorConfig;
use crate::error::{MigrateError, MigrateResult};

const BACKUP_PREFIX: &str = "backup_";
const BACKUP_EXTENSION: &str = "dump";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupTrigger {
    /// Operator-requested.
    Manual,
    /// Taken by the rollback engine before a destructive change.
    Automatic,
}

impl BackupTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupTrigger::Manual => "manual",
            BackupTrigger::Automatic => "automatic",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(BackupTrigger::Manual),
            "automatic" => Some(BackupTrigger::Automatic),
            _ => None,
        }
    }
}

impl fmt::Display for BackupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of one catalogued snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    /// Artifact filename; embeds the timestamp and trigger.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub trigger: BackupTrigger,
}

/// Produces and catalogs database snapshots.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backups_dir: PathBuf,
    database_url: String,
    pg_dump_path: PathBuf,
    backup_timeout: std::time::Duration,
}

impl BackupManager {
    pub fn new(config: &MigratorConfig) -> Self {
        Self {
            backups_dir: config.backups_dir.clone(),
            database_url: config.database_url.clone(),
            pg_dump_path: config.pg_dump_path.clone(),
            backup_timeout: config.backup_timeout,
        }
    }

    /// Take a full logical snapshot, bounded by the configured timeout.
    ///
    /// On any failure (spawn error, nonzero exit, timeout) the partial
    /// artifact is removed before the error is returned, so a failed backup
    /// is never listed as available.
    pub async fn create_backup(&self, trigger: BackupTrigger) -> MigrateResult<Backup> {
        if self.database_url.is_empty() {
            return Err(MigrateError::backup("no database URL configured"));
        }
        fs::create_dir_all(&self.backups_dir)?;

        let created_at = Utc::now();
        let name = format!(
            "{}{}_{}.{}",
            BACKUP_PREFIX,
            created_at.format(TIMESTAMP_FORMAT),
            trigger,
            BACKUP_EXTENSION
        );
        let path = self.backups_dir.join(&name);
        if path.exists() {
            return Err(MigrateError::backup(format!(
                "backup artifact {} already exists",
                name
            )));
        }

        tracing::info!(backup = %name, %trigger, "creating database snapshot");

        let child = Command::new(&self.pg_dump_path)
            .arg("--format=custom")
            .arg("--file")
            .arg(&path)
            .arg(&self.database_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MigrateError::backup(format!(
                    "failed to start {}: {}",
                    self.pg_dump_path.display(),
                    e
                ))
            })?;

        let output = match timeout(self.backup_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                remove_partial(&path);
                return Err(MigrateError::backup(format!("pg_dump failed: {}", e)));
            }
            Err(_) => {
                // kill_on_drop has reaped the child by now.
                remove_partial(&path);
                return Err(MigrateError::backup(format!(
                    "backup timed out after {}s",
                    self.backup_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            remove_partial(&path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MigrateError::backup(format!(
                "pg_dump exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let size_bytes = fs::metadata(&path)?.len();
        tracing::info!(backup = %name, size_bytes, "snapshot complete");

        Ok(Backup {
            name,
            created_at,
            size_bytes,
            trigger,
        })
    }

    /// Catalog of completed snapshots, newest first. Files outside the
    /// naming convention are ignored; a missing directory is an empty
    /// catalog.
    pub fn get_backups(&self) -> MigrateResult<Vec<Backup>> {
        if !self.backups_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((created_at, trigger)) = parse_backup_name(file_name) else {
                continue;
            };
            backups.push(Backup {
                name: file_name.to_string(),
                created_at,
                size_bytes: fs::metadata(&path)?.len(),
                trigger,
            });
        }

        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(backups)
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "failed to remove partial backup: {}", e);
        }
    }
}

/// Parse `backup_<YYYYMMDD_HHMMSS>_<trigger>.dump` back into its parts.
fn parse_backup_name(file_name: &str) -> Option<(DateTime<Utc>, BackupTrigger)> {
    let stem = file_name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(&format!(".{}", BACKUP_EXTENSION))?;
    let (timestamp, trigger) = stem.rsplit_once('_')?;
    let trigger = BackupTrigger::parse(trigger)?;
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((DateTime::from_naive_utc_and_offset(naive, Utc), trigger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &Path) -> BackupManager {
        let config = MigratorConfig {
            backups_dir: dir.to_path_buf(),
            ..MigratorConfig::default()
        };
        BackupManager::new(&config)
    }

    #[test]
    fn parses_the_naming_convention() {
        let (created_at, trigger) =
            parse_backup_name("backup_20260826_101530_automatic.dump").unwrap();
        assert_eq!(trigger, BackupTrigger::Automatic);
        assert_eq!(
            created_at.format(TIMESTAMP_FORMAT).to_string(),
            "20260826_101530"
        );

        assert!(parse_backup_name("backup_20260826_101530_hourly.dump").is_none());
        assert!(parse_backup_name("snapshot.dump").is_none());
        assert!(parse_backup_name("backup_notadate_manual.dump").is_none());
    }

    #[test]
    fn catalog_is_newest_first_and_ignores_foreign_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("backup_20260101_000000_manual.dump"), b"a").unwrap();
        fs::write(
            tmp.path().join("backup_20260301_120000_automatic.dump"),
            b"bb",
        )
        .unwrap();
        fs::write(tmp.path().join("backup_20260201_060000_manual.dump"), b"ccc").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"not a backup").unwrap();

        let backups = manager(tmp.path()).get_backups().unwrap();
        assert_eq!(backups.len(), 3);
        assert_eq!(backups[0].name, "backup_20260301_120000_automatic.dump");
        assert_eq!(backups[0].trigger, BackupTrigger::Automatic);
        assert_eq!(backups[0].size_bytes, 2);
        assert_eq!(backups[2].name, "backup_20260101_000000_manual.dump");
    }

    #[test]
    fn missing_directory_is_an_empty_catalog() {
        let manager = manager(Path::new("/nonexistent/backups"));
        assert!(manager.get_backups().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_dump_leaves_no_artifact() {
        let tmp = TempDir::new().unwrap();
        let config = MigratorConfig {
            backups_dir: tmp.path().to_path_buf(),
            database_url: "postgres://localhost/ignored".to_string(),
            pg_dump_path: PathBuf::from("/nonexistent/pg_dump"),
            ..MigratorConfig::default()
        };
        let manager = BackupManager::new(&config);

        let err = manager.create_backup(BackupTrigger::Manual).await.unwrap_err();
        assert!(matches!(err, MigrateError::Backup { .. }));
        assert!(manager.get_backups().unwrap().is_empty());
    }
}
