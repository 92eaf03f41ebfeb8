//! Migration ledger - the tracking table inside the target database.
//!
//! Single source of truth for "has this migration ever been applied".
//! Success-path writes go through the `_in` variants so they commit in the
//! same transaction as the schema change itself; a crash between the schema
//! change and the ledger write is therefore impossible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::{MigrateError, MigrateResult};

/// One row of the tracking table: a single attempted migration. Failures
/// are recorded too, never silently dropped.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRecord {
    pub name: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Owner of the tracking table. All reads and writes of migration state go
/// through here; no other component touches the table.
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    pool: PgPool,
    table: String,
}

impl MigrationLedger {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotently create the tracking table. Safe to call on every
    /// invocation.
    pub async fn ensure_tracking_table(&self) -> MigrateResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                name TEXT PRIMARY KEY,\n    \
                executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n    \
                success BOOLEAN NOT NULL,\n    \
                error TEXT\n\
            )",
            self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(MigrateError::connectivity)?;
        Ok(())
    }

    /// All rows, oldest attempt first.
    pub async fn get_executed_migrations(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT name, executed_at, success, error FROM {} ORDER BY executed_at, name",
            self.table
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrateError::connectivity)?;

        rows.iter().map(record_from_row).collect()
    }

    /// Most recently applied successful migration, if any. Rollback pivots
    /// on this row.
    pub async fn latest_successful(&self) -> MigrateResult<Option<MigrationRecord>> {
        let sql = format!(
            "SELECT name, executed_at, success, error FROM {} \
             WHERE success ORDER BY executed_at DESC, name DESC LIMIT 1",
            self.table
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrateError::connectivity)?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Upsert an attempt outcome outside any schema-change transaction.
    /// Used for failures, where the schema transaction has already rolled
    /// back.
    pub async fn record_execution(
        &self,
        name: &str,
        success: bool,
        error: Option<&str>,
    ) -> MigrateResult<()> {
        sqlx::query(&self.upsert_sql())
            .bind(name)
            .bind(success)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(MigrateError::connectivity)?;
        Ok(())
    }

    /// Upsert an attempt outcome on an open transaction, so the ledger
    /// write commits atomically with the schema change.
    pub async fn record_execution_in(
        &self,
        conn: &mut PgConnection,
        name: &str,
        success: bool,
        error: Option<&str>,
    ) -> MigrateResult<()> {
        sqlx::query(&self.upsert_sql())
            .bind(name)
            .bind(success)
            .bind(error)
            .execute(conn)
            .await
            .map_err(MigrateError::connectivity)?;
        Ok(())
    }

    /// Remove a row inside the rollback transaction. Used only by the
    /// rollback engine.
    pub async fn remove_execution_in(
        &self,
        conn: &mut PgConnection,
        name: &str,
    ) -> MigrateResult<()> {
        let sql = format!("DELETE FROM {} WHERE name = $1", self.table);
        sqlx::query(&sql)
            .bind(name)
            .execute(conn)
            .await
            .map_err(MigrateError::connectivity)?;
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (name, executed_at, success, error) \
             VALUES ($1, NOW(), $2, $3) \
             ON CONFLICT (name) DO UPDATE SET \
                executed_at = EXCLUDED.executed_at, \
                success = EXCLUDED.success, \
                error = EXCLUDED.error",
            self.table
        )
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> MigrateResult<MigrationRecord> {
    Ok(MigrationRecord {
        name: row.try_get("name").map_err(MigrateError::connectivity)?,
        executed_at: row
            .try_get("executed_at")
            .map_err(MigrateError::connectivity)?,
        success: row.try_get("success").map_err(MigrateError::connectivity)?,
        error: row.try_get("error").map_err(MigrateError::connectivity)?,
    })
}
