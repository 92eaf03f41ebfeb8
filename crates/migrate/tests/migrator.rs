//! End-to-end tests against a real PostgreSQL instance.
//!
//! These run only when `DATABASE_URL` is set; rollback paths that take a
//! snapshot additionally need `pg_dump` on PATH. Each test uses its own
//! tracking table and uniquely named schema objects so tests can share one
//! database.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::PgPool;
use tempfile::TempDir;

use encore_migrate::{
    BackupTrigger, MigrateError, MigrationState, Migrator, MigratorConfig, RunOptions,
};

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{}_{}", nanos, COUNTER.fetch_add(1, Ordering::Relaxed))
}

fn pg_dump_available() -> bool {
    std::process::Command::new("pg_dump")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

struct Harness {
    _tmp: TempDir,
    migrations_dir: PathBuf,
    backups_dir: PathBuf,
    migrator: Migrator,
    pool: PgPool,
    suffix: String,
}

impl Harness {
    /// `None` when no database is configured; the calling test then passes
    /// vacuously.
    async fn connect() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;

        let tmp = TempDir::new().ok()?;
        let migrations_dir = tmp.path().join("migrations");
        let backups_dir = tmp.path().join("backups");
        fs::create_dir_all(&migrations_dir).ok()?;

        let suffix = unique_suffix();
        let config = MigratorConfig {
            migrations_dir: migrations_dir.clone(),
            backups_dir: backups_dir.clone(),
            tracking_table: format!("encore_test_ledger_{}", suffix),
            database_url: url,
            ..MigratorConfig::default()
        };
        let migrator = Migrator::new(config, pool.clone());

        Some(Self {
            _tmp: tmp,
            migrations_dir,
            backups_dir,
            migrator,
            pool,
            suffix,
        })
    }

    /// Like `connect`, but with pg_dump pointed somewhere that cannot work.
    async fn connect_with_broken_pg_dump() -> Option<Self> {
        let mut harness = Self::connect().await?;
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = MigratorConfig {
            migrations_dir: harness.migrations_dir.clone(),
            backups_dir: harness.backups_dir.clone(),
            tracking_table: format!("encore_test_ledger_{}", harness.suffix),
            database_url: url,
            pg_dump_path: PathBuf::from("/nonexistent/pg_dump"),
            ..MigratorConfig::default()
        };
        harness.migrator = Migrator::new(config, harness.pool.clone());
        Some(harness)
    }

    fn table(&self, base: &str) -> String {
        format!("encore_test_{}_{}", base, self.suffix)
    }

    fn write_pair(&self, stem: &str, table: &str) {
        write_sql(
            &self.migrations_dir,
            &format!("{}.sql", stem),
            &format!("CREATE TABLE {} (id BIGINT PRIMARY KEY);", table),
        );
        write_sql(
            &self.migrations_dir,
            &format!("{}.down.sql", stem),
            &format!("DROP TABLE {};", table),
        );
    }

    async fn table_exists(&self, table: &str) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .unwrap_or(false)
    }

    async fn cleanup(&self, tables: &[String]) {
        for table in tables {
            let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await;
        }
        let _ = sqlx::query(&format!(
            "DROP TABLE IF EXISTS encore_test_ledger_{}",
            self.suffix
        ))
        .execute(&self.pool)
        .await;
    }
}

fn write_sql(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).unwrap();
}

// Scenario A: two pending migrations apply in order, and a second run is a
// true no-op.
#[tokio::test]
async fn apply_all_then_rerun_is_noop() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    let t0 = h.table("init");
    let t1 = h.table("users");
    h.write_pair("000_init", &t0);
    h.write_pair("001_add_users", &t1);

    let report = h.migrator.status_report().await.unwrap();
    assert_eq!(report.summary.pending, 2);
    assert!(report
        .migrations
        .iter()
        .all(|m| m.state == MigrationState::Pending));

    let run = h.migrator.run(RunOptions::default()).await.unwrap();
    assert!(run.success);
    assert_eq!(run.results.len(), 2);
    assert_eq!(run.results[0].name, "000_init");
    assert_eq!(run.results[1].name, "001_add_users");
    assert!(h.table_exists(&t0).await);
    assert!(h.table_exists(&t1).await);

    let report = h.migrator.status_report().await.unwrap();
    assert_eq!(report.summary.executed, 2);
    assert_eq!(report.summary.pending, 0);

    let rerun = h.migrator.run(RunOptions::default()).await.unwrap();
    assert!(rerun.success);
    assert!(rerun.results.is_empty());

    h.cleanup(&[t0, t1]).await;
}

// Scenario B: dry run reports without mutating the ledger or schema.
#[tokio::test]
async fn dry_run_is_pure() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    let t0 = h.table("init");
    let t1 = h.table("users");
    h.write_pair("000_init", &t0);

    assert!(h.migrator.run(RunOptions::default()).await.unwrap().success);

    h.write_pair("001_add_users", &t1);
    let before = h.migrator.status_report().await.unwrap();

    let dry = h
        .migrator
        .run(RunOptions { dry_run: true })
        .await
        .unwrap();
    assert!(dry.success);
    assert_eq!(dry.results.len(), 1);
    assert_eq!(dry.results[0].name, "001_add_users");
    assert!(dry.results[0].message.contains("DRY RUN"));
    assert!(!h.table_exists(&t1).await);

    let after = h.migrator.status_report().await.unwrap();
    assert_eq!(after.summary.executed, before.summary.executed);
    assert_eq!(after.summary.pending, before.summary.pending);
    assert_eq!(after.summary.executed, 1);

    h.cleanup(&[t0, t1]).await;
}

// Scenario C: rollback takes an automatic backup, runs the down script, and
// the reverted migration is pending again.
#[tokio::test]
async fn rollback_reverts_only_the_latest() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    if !pg_dump_available() {
        return;
    }
    let t0 = h.table("init");
    let t1 = h.table("users");
    h.write_pair("000_init", &t0);
    h.write_pair("001_add_users", &t1);
    assert!(h.migrator.run(RunOptions::default()).await.unwrap().success);

    let outcome = h.migrator.rollback_last().await.unwrap();
    assert!(outcome.success, "{}", outcome.message);
    let reverted = outcome.migration.unwrap();
    assert_eq!(reverted.name, "001_add_users");

    let backup = outcome.backup.unwrap();
    assert_eq!(backup.trigger, BackupTrigger::Automatic);
    assert!(backup.size_bytes > 0);
    let catalog = h.migrator.backups().unwrap();
    assert!(catalog.iter().any(|b| b.name == backup.name));

    assert!(h.table_exists(&t0).await);
    assert!(!h.table_exists(&t1).await);

    let report = h.migrator.status_report().await.unwrap();
    let by_name = |name: &str| {
        report
            .migrations
            .iter()
            .find(|m| m.name == name)
            .unwrap()
            .state
    };
    assert_eq!(by_name("000_init"), MigrationState::Executed);
    assert_eq!(by_name("001_add_users"), MigrationState::Pending);

    h.cleanup(&[t0, t1]).await;
}

// A failing script halts the run, is recorded, and is re-attempted once the
// operator fixes it.
#[tokio::test]
async fn failure_is_recorded_and_reattemptable() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    let t0 = h.table("init");
    let t2 = h.table("deals");
    h.write_pair("000_init", &t0);
    write_sql(&h.migrations_dir, "001_broken.sql", "THIS IS NOT SQL;");
    h.write_pair("002_add_deals", &t2);

    let run = h.migrator.run(RunOptions::default()).await.unwrap();
    assert!(!run.success);
    assert_eq!(run.results.len(), 2, "002 must not be attempted");
    assert!(run.results[0].success);
    assert!(!run.results[1].success);

    let report = h.migrator.status_report().await.unwrap();
    let broken = report
        .migrations
        .iter()
        .find(|m| m.name == "001_broken")
        .unwrap();
    assert_eq!(broken.state, MigrationState::Error);
    assert!(broken.error.is_some());
    assert_eq!(report.summary.pending, 1);

    // Fix the script; the failed record is picked up again.
    let t1 = h.table("fixed");
    write_sql(
        &h.migrations_dir,
        "001_broken.sql",
        &format!("CREATE TABLE {} (id BIGINT PRIMARY KEY);", t1),
    );
    let rerun = h.migrator.run(RunOptions::default()).await.unwrap();
    assert!(rerun.success);
    assert_eq!(rerun.results.len(), 2);
    assert!(h.table_exists(&t1).await);
    assert!(h.table_exists(&t2).await);

    h.cleanup(&[t0, t1, t2]).await;
}

// A successful ledger row whose files were deleted from disk is an orphaned
// record; rollback refuses it outright, before any backup is taken. The
// ledger alone is never treated as evidence of a valid migration.
#[tokio::test]
async fn rollback_refuses_orphaned_record() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    let t0 = h.table("init");
    let t1 = h.table("users");
    h.write_pair("000_init", &t0);
    h.write_pair("001_add_users", &t1);
    assert!(h.migrator.run(RunOptions::default()).await.unwrap().success);

    fs::remove_file(h.migrations_dir.join("001_add_users.sql")).unwrap();
    fs::remove_file(h.migrations_dir.join("001_add_users.down.sql")).unwrap();

    let err = h.migrator.rollback_last().await.unwrap_err();
    assert!(matches!(err, MigrateError::Configuration { .. }));

    // Nothing destructive happened and no backup was taken.
    assert!(h.table_exists(&t1).await);
    assert!(h.migrator.backups().unwrap().is_empty());
    let report = h.migrator.status_report().await.unwrap();
    assert_eq!(report.summary.orphaned, 1);
    assert_eq!(report.summary.executed, 1);

    h.cleanup(&[t0, t1]).await;
}

// A migration without a down script deterministically refuses to roll back,
// before any backup or destructive step.
#[tokio::test]
async fn rollback_without_down_script_refuses() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    let t0 = h.table("init");
    write_sql(
        &h.migrations_dir,
        "000_init.sql",
        &format!("CREATE TABLE {} (id BIGINT PRIMARY KEY);", t0),
    );
    assert!(h.migrator.run(RunOptions::default()).await.unwrap().success);

    let err = h.migrator.rollback_last().await.unwrap_err();
    assert!(matches!(err, MigrateError::NoDownScript { .. }));

    // Nothing happened: schema intact, no backup taken.
    assert!(h.table_exists(&t0).await);
    assert!(h.migrator.backups().unwrap().is_empty());
    let report = h.migrator.status_report().await.unwrap();
    assert_eq!(report.summary.executed, 1);

    h.cleanup(&[t0]).await;
}

// A failed backup aborts the rollback entirely.
#[tokio::test]
async fn rollback_aborts_when_backup_fails() {
    let Some(h) = Harness::connect_with_broken_pg_dump().await else {
        return;
    };
    let t0 = h.table("init");
    h.write_pair("000_init", &t0);
    assert!(h.migrator.run(RunOptions::default()).await.unwrap().success);

    let err = h.migrator.rollback_last().await.unwrap_err();
    assert!(matches!(err, MigrateError::Backup { .. }));

    assert!(h.table_exists(&t0).await);
    let report = h.migrator.status_report().await.unwrap();
    assert_eq!(report.summary.executed, 1);
    assert!(h.migrator.backups().unwrap().is_empty());

    h.cleanup(&[t0]).await;
}

// Empty ledger: nothing to roll back is a structured outcome, not an error.
#[tokio::test]
async fn rollback_with_empty_ledger_is_a_noop() {
    let Some(h) = Harness::connect().await else {
        return;
    };
    let outcome = h.migrator.rollback_last().await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.migration.is_none());
    assert!(outcome.backup.is_none());
    assert_eq!(outcome.message, "nothing to roll back");

    h.cleanup(&[]).await;
}
