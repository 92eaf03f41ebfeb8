//! Migration file registry - filesystem discovery of migration scripts.
//!
//! A migration is an up script named `NNN_description.sql` plus an optional
//! down script named `NNN_description.down.sql`, grouped by the leading
//! numeric sequence. Sequence `000` is conventionally the bootstrap
//! migration. The registry is a pure directory-to-model mapping: it
//! performs no database access and has no knowledge of what has been
//! applied.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{MigrateError, MigrateResult};

/// A migration pair discovered on disk. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Numeric sequence parsed from the filename prefix.
    pub sequence: u32,
    /// Filename without the `.down` marker or extension, e.g.
    /// `000_migration_system`. This is the ledger key.
    pub name: String,
    /// Path of the forward script.
    pub up_path: PathBuf,
    /// Path of the reversal script, if one exists. A migration without a
    /// down script is valid for forward application but non-revertible.
    pub down_path: Option<PathBuf>,
}

impl MigrationFile {
    /// Whether this migration can be rolled back.
    pub fn revertible(&self) -> bool {
        self.down_path.is_some()
    }
}

/// Scans a configured directory for sequence-numbered migration scripts.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    dir: PathBuf,
}

#[derive(Default)]
struct SequenceEntry {
    up: Option<(String, PathBuf)>,
    down: Option<(String, PathBuf)>,
}

impl MigrationRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory this registry scans.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Discover all migrations, ordered by ascending sequence number.
    ///
    /// A missing directory yields an empty list; an unreadable directory or
    /// two scripts claiming the same sequence is a `Configuration` error.
    /// Files without the numeric prefix or the `.sql` extension are ignored.
    pub fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        // BTreeMap keys give numeric (not lexical) ordering for free.
        let mut by_sequence: BTreeMap<u32, SequenceEntry> = BTreeMap::new();

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::configuration(format!(
                "failed to read migrations directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrateError::configuration(format!("failed to read directory entry: {}", e))
            })?;
            let path = entry.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
                continue;
            }

            let Some(parsed) = parse_filename(&path) else {
                continue;
            };

            let slot = by_sequence.entry(parsed.sequence).or_default();
            if parsed.is_down {
                if slot.down.is_some() {
                    return Err(MigrateError::configuration(format!(
                        "duplicate down script for sequence {:03}: {}",
                        parsed.sequence,
                        path.display()
                    )));
                }
                slot.down = Some((parsed.name, path));
            } else {
                if slot.up.is_some() {
                    return Err(MigrateError::configuration(format!(
                        "duplicate migration sequence {:03}: {}",
                        parsed.sequence,
                        path.display()
                    )));
                }
                slot.up = Some((parsed.name, path));
            }
        }

        let mut migrations = Vec::with_capacity(by_sequence.len());
        for (sequence, slot) in by_sequence {
            let Some((name, up_path)) = slot.up else {
                return Err(MigrateError::configuration(format!(
                    "down script for sequence {:03} has no matching up script",
                    sequence
                )));
            };
            // A down script must pair with its up script by full stem, not
            // just sequence; otherwise rollback would execute the wrong
            // reversal.
            let down_path = match slot.down {
                Some((down_name, down_path)) => {
                    if down_name != name {
                        return Err(MigrateError::configuration(format!(
                            "down script {}.down.sql does not match up script {}.sql",
                            down_name, name
                        )));
                    }
                    Some(down_path)
                }
                None => None,
            };
            migrations.push(MigrationFile {
                sequence,
                name,
                up_path,
                down_path,
            });
        }

        Ok(migrations)
    }

    /// Look up a single migration by name.
    pub fn find(&self, name: &str) -> MigrateResult<Option<MigrationFile>> {
        Ok(self
            .list_migrations()?
            .into_iter()
            .find(|m| m.name == name))
    }

    /// Create a blank up/down script pair with the next free sequence
    /// number. Returns the paths of the two files written.
    pub fn create_migration(&self, name: &str) -> MigrateResult<(PathBuf, PathBuf)> {
        fs::create_dir_all(&self.dir)?;

        let next = self
            .list_migrations()?
            .last()
            .map(|m| m.sequence + 1)
            .unwrap_or(0);

        let slug = name.trim().replace(' ', "_").to_lowercase();
        if slug.is_empty() {
            return Err(MigrateError::configuration("migration name is empty"));
        }

        let stem = format!("{:03}_{}", next, slug);
        let up_path = self.dir.join(format!("{}.sql", stem));
        let down_path = self.dir.join(format!("{}.down.sql", stem));

        let header = format!(
            "-- Migration: {}\n-- Created: {}\n",
            stem,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        fs::write(&up_path, format!("{}\n-- Forward schema change\n", header))?;
        fs::write(&down_path, format!("{}\n-- Reversal of {}.sql\n", header, stem))?;

        Ok((up_path, down_path))
    }
}

struct ParsedName {
    sequence: u32,
    name: String,
    is_down: bool,
}

/// Parse `NNN_name.sql` / `NNN_name.down.sql`. Returns `None` for files
/// that do not follow the convention.
fn parse_filename(path: &Path) -> Option<ParsedName> {
    let stem = path.file_stem()?.to_str()?;
    let (stem, is_down) = match stem.strip_suffix(".down") {
        Some(base) => (base, true),
        None => (stem, false),
    };

    let (prefix, rest) = stem.split_once('_')?;
    if prefix.is_empty() || rest.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sequence = prefix.parse().ok()?;

    Some(ParsedName {
        sequence,
        name: stem.to_string(),
        is_down,
    })
}
