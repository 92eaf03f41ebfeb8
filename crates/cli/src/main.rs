use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use encore_migrate::{BackupTrigger, MigrationState, Migrator, MigratorConfig, RunOptions};

#[derive(Parser)]
#[command(name = "encore-migrate")]
#[command(about = "Schema migration and backup tooling for the Encore platform")]
struct Cli {
    /// Target database URL (falls back to DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Directory containing migration scripts
    #[arg(long, default_value = "migrations")]
    migrations_dir: PathBuf,

    /// Directory where snapshots are written
    #[arg(long, default_value = "backups")]
    backups_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status and the backup catalog
    Status {
        /// Emit the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply all pending migrations
    Up {
        /// Report what would run without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert the most recently applied migration (takes a backup first)
    Rollback,

    /// Backup management
    Backup {
        #[command(subcommand)]
        backup_command: BackupCommands,
    },

    /// Create a blank up/down migration pair
    New {
        /// Migration name
        name: String,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Take a manual snapshot now
    Create,
    /// List catalogued snapshots, newest first
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let database_url = cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let config = MigratorConfig {
        migrations_dir: cli.migrations_dir,
        backups_dir: cli.backups_dir,
        database_url: database_url.clone().unwrap_or_default(),
        ..MigratorConfig::default()
    };

    // `new` is pure filesystem work; no database needed.
    if let Commands::New { name } = &cli.command {
        let registry = encore_migrate::MigrationRegistry::new(config.migrations_dir.clone());
        let (up, down) = registry.create_migration(name)?;
        println!("Created {}", up.display());
        println!("Created {}", down.display());
        return Ok(true);
    }

    let database_url =
        database_url.context("no database URL: pass --database-url or set DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to the database")?;
    let migrator = Migrator::new(config, pool);

    match cli.command {
        Commands::Status { json } => {
            let report = migrator.status_report().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(true);
            }
            println!(
                "Migrations: {} total, {} executed, {} pending, {} errors, {} orphaned",
                report.summary.total,
                report.summary.executed,
                report.summary.pending,
                report.summary.errors,
                report.summary.orphaned
            );
            for migration in &report.migrations {
                let glyph = match migration.state {
                    MigrationState::Executed => "✓",
                    MigrationState::Pending => "⏳",
                    MigrationState::Error => "✗",
                    MigrationState::Orphaned => "?",
                };
                let when = migration
                    .executed_at
                    .map(|t| t.format(" (%Y-%m-%d %H:%M:%S UTC)").to_string())
                    .unwrap_or_default();
                println!("  {} {}{}", glyph, migration.name, when);
                if let Some(error) = &migration.error {
                    println!("      {}", error);
                }
            }
            println!("\nBackups: {}", report.backups.len());
            for backup in &report.backups {
                println!(
                    "  {} ({} bytes, {})",
                    backup.name, backup.size_bytes, backup.trigger
                );
            }
            Ok(true)
        }

        Commands::Up { dry_run } => {
            let report = migrator.run(RunOptions { dry_run }).await?;
            if report.results.is_empty() {
                println!("Nothing to migrate");
            }
            for result in &report.results {
                let glyph = if result.success { "✓" } else { "✗" };
                println!("  {} {}: {}", glyph, result.name, result.message);
            }
            Ok(report.success)
        }

        Commands::Rollback => {
            let outcome = migrator.rollback_last().await?;
            println!("{}", outcome.message);
            if let Some(backup) = &outcome.backup {
                println!(
                    "Backup taken: {} ({} bytes)",
                    backup.name, backup.size_bytes
                );
            }
            Ok(outcome.success)
        }

        Commands::Backup { backup_command } => match backup_command {
            BackupCommands::Create => {
                let backup = migrator.create_backup(BackupTrigger::Manual).await?;
                println!("Created {} ({} bytes)", backup.name, backup.size_bytes);
                Ok(true)
            }
            BackupCommands::List => {
                let backups = migrator.backups()?;
                if backups.is_empty() {
                    println!("No backups");
                }
                for backup in &backups {
                    println!(
                        "  {} ({} bytes, {}, {})",
                        backup.name,
                        backup.size_bytes,
                        backup.trigger,
                        backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                Ok(true)
            }
        },

        Commands::New { .. } => unreachable!("handled before connecting"),
    }
}
