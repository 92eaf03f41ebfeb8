//! Status reporter - merges registry output with ledger contents.
//!
//! The filesystem is authoritative for which migrations exist; the ledger is
//! authoritative for what has been applied. The two are merged as
//! independent read-only projections, never by inference: a ledger row
//! without a file on disk is reported as `orphaned`, not treated as a valid
//! prior migration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backup::Backup;
use crate::error::MigrateResult;
use crate::ledger::{MigrationLedger, MigrationRecord};
use crate::registry::{MigrationFile, MigrationRegistry};

/// Projection of one migration's state across both sources of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// Present on disk, no successful or failed attempt recorded.
    Pending,
    /// A ledger row exists with `success = true`.
    Executed,
    /// A ledger row exists with `success = false`.
    Error,
    /// A ledger row exists but the file is gone from disk.
    Orphaned,
}

/// Computed status entry. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    /// `None` only for orphaned ledger rows, which no longer have a file to
    /// carry a sequence number.
    pub sequence: Option<u32>,
    pub state: MigrationState,
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counts for the operator-facing summary.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub executed: usize,
    pub pending: usize,
    pub errors: usize,
    pub orphaned: usize,
}

/// Everything the surrounding application's status endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub summary: StatusSummary,
    pub migrations: Vec<MigrationStatus>,
    pub backups: Vec<Backup>,
}

/// Merge the two projections: one entry per registry file in registry
/// order, then any orphaned ledger rows sorted by name.
pub fn merge_status(files: &[MigrationFile], records: &[MigrationRecord]) -> Vec<MigrationStatus> {
    let by_name: HashMap<&str, &MigrationRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut statuses: Vec<MigrationStatus> = files
        .iter()
        .map(|file| match by_name.get(file.name.as_str()) {
            Some(record) => MigrationStatus {
                name: file.name.clone(),
                sequence: Some(file.sequence),
                state: if record.success {
                    MigrationState::Executed
                } else {
                    MigrationState::Error
                },
                executed_at: Some(record.executed_at),
                error: record.error.clone(),
            },
            None => MigrationStatus {
                name: file.name.clone(),
                sequence: Some(file.sequence),
                state: MigrationState::Pending,
                executed_at: None,
                error: None,
            },
        })
        .collect();

    let mut orphans: Vec<MigrationStatus> = records
        .iter()
        .filter(|r| !files.iter().any(|f| f.name == r.name))
        .map(|record| MigrationStatus {
            name: record.name.clone(),
            sequence: None,
            state: MigrationState::Orphaned,
            executed_at: Some(record.executed_at),
            error: record.error.clone(),
        })
        .collect();
    orphans.sort_by(|a, b| a.name.cmp(&b.name));
    statuses.extend(orphans);

    statuses
}

/// Count states for the summary line.
pub fn summarize(statuses: &[MigrationStatus]) -> StatusSummary {
    let mut summary = StatusSummary {
        total: statuses.len(),
        executed: 0,
        pending: 0,
        errors: 0,
        orphaned: 0,
    };
    for status in statuses {
        match status.state {
            MigrationState::Executed => summary.executed += 1,
            MigrationState::Pending => summary.pending += 1,
            MigrationState::Error => summary.errors += 1,
            MigrationState::Orphaned => summary.orphaned += 1,
        }
    }
    summary
}

/// Read-side component combining the registry and the ledger.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    registry: MigrationRegistry,
    ledger: MigrationLedger,
}

impl StatusReporter {
    pub fn new(registry: MigrationRegistry, ledger: MigrationLedger) -> Self {
        Self { registry, ledger }
    }

    /// One entry per registry file, in registry order, plus orphans.
    ///
    /// Ensures the tracking table first so a fresh database naturally
    /// reports every migration as pending instead of failing.
    pub async fn get_status(&self) -> MigrateResult<Vec<MigrationStatus>> {
        self.ledger.ensure_tracking_table().await?;
        let files = self.registry.list_migrations()?;
        let records = self.ledger.get_executed_migrations().await?;
        Ok(merge_status(&files, &records))
    }
}
