//! mongo-pg-migrate CLI - drive the migration engine from a YAML config.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use mongo_pg_migrate::analyze::CollectionAnalyzer;
use mongo_pg_migrate::backup::{BackupOptions, BackupService};
use mongo_pg_migrate::recovery::{RecoveryConfig, RecoveryService};
use mongo_pg_migrate::rollback::{RollbackConfig, RollbackService, RollbackType};
use mongo_pg_migrate::{Config, MigrateError, MigrationEngine};

#[derive(Parser)]
#[command(name = "mongo-pg-migrate")]
#[command(about = "MongoDB to PostgreSQL migration engine for clinical record stores")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration
    Run {
        /// Validate and plan without writing to the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Resume a previously interrupted migration from its checkpoints
    Resume {
        /// Migration identifier to resume
        migration_id: String,
    },

    /// Run pre-migration validation only
    Validate,

    /// Report per-collection document counts and date ranges
    Analyze,

    /// Back up the source store or the target database
    Backup {
        /// Which store to back up: source or target
        #[arg(long, default_value = "source")]
        store: String,

        /// Directory the archive lands in
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Dump timeout in seconds
        #[arg(long, default_value = "3600")]
        timeout: u64,
    },

    /// Roll back a migration
    Rollback {
        /// Migration identifier to roll back
        migration_id: String,

        /// Rollback type: full, schema-only, partial, point-in-time
        #[arg(long, default_value = "full")]
        r#type: String,

        /// Confirm destructive actions
        #[arg(long)]
        confirmed: bool,

        /// Validate and report without destructive actions
        #[arg(long)]
        dry_run: bool,

        /// Truncate tables instead of dropping them
        #[arg(long)]
        keep_tables: bool,

        /// Restore the source store from this backup archive
        #[arg(long)]
        restore_archive: Option<PathBuf>,

        /// Partial: restrict to these collections
        #[arg(long)]
        collections: Vec<String>,

        /// Point-in-time: rollback point identifier
        #[arg(long)]
        rollback_point: Option<uuid::Uuid>,
    },

    /// Analyze a failed migration and execute a recovery strategy
    Recover {
        /// Migration identifier to recover
        migration_id: String,

        /// Strategy id to execute (defaults to the best applicable)
        #[arg(long)]
        strategy: Option<String>,

        /// Take a target backup before recovering
        #[arg(long)]
        backup_first: bool,

        /// Only analyze and print applicable strategies
        #[arg(long)]
        analyze_only: bool,
    },
}

fn init_tracing(format: &str, verbosity: &str) {
    let level = match verbosity {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; finishing the current batch then stopping");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_format, &cli.verbosity);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), MigrateError> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { dry_run } => {
            let mut config = config;
            if dry_run {
                config.migration.dry_run = true;
            }
            let engine = MigrationEngine::new(config).await?;
            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());

            let result = engine.migrate(cancel).await?;
            if cli.output_json {
                println!("{}", result.to_json()?);
            }
            if !result.success {
                return Err(MigrateError::Validation(
                    result.message.unwrap_or_else(|| "migration failed".into()),
                ));
            }
        }

        Commands::Resume { migration_id } => {
            let engine = MigrationEngine::new(config).await?;
            let cancel = CancellationToken::new();
            spawn_signal_handler(cancel.clone());

            let result = engine.resume(migration_id, cancel).await?;
            if cli.output_json {
                println!("{}", result.to_json()?);
            }
            if !result.success {
                return Err(MigrateError::Validation(
                    result.message.unwrap_or_else(|| "migration failed".into()),
                ));
            }
        }

        Commands::Validate => {
            let mut config = config;
            config.migration.dry_run = true;
            let engine = MigrationEngine::new(config).await?;
            let result = engine.migrate(CancellationToken::new()).await?;
            if cli.output_json {
                println!("{}", result.to_json()?);
            }
            match result.success {
                true => info!("Validation passed"),
                false => {
                    return Err(MigrateError::Validation(
                        result.message.unwrap_or_else(|| "validation failed".into()),
                    ))
                }
            }
        }

        Commands::Analyze => {
            let source = mongo_pg_migrate::MongoSource::connect(&config.source).await?;
            let analyzer = CollectionAnalyzer::new(&source);
            let collections = source.list_collections().await?;
            let analyses = analyzer.analyze_all(&collections, &config.migration).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&analyses)?);
            }
        }

        Commands::Backup {
            store,
            output_dir,
            timeout,
        } => {
            let service = BackupService::new();
            let options = BackupOptions {
                output_dir,
                compress: true,
                timeout: Duration::from_secs(timeout),
            };
            let metadata = match store.as_str() {
                "source" => service.backup_source(&config.source, &options).await?,
                "target" => service.backup_target(&config.target, &options).await?,
                other => {
                    return Err(MigrateError::Config(format!(
                        "unknown store '{}', expected 'source' or 'target'",
                        other
                    )))
                }
            };
            info!(
                "Backup complete: {} ({} bytes)",
                metadata.archive_path.display(),
                metadata.size_bytes
            );
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
        }

        Commands::Rollback {
            migration_id,
            r#type,
            confirmed,
            dry_run,
            keep_tables,
            restore_archive,
            collections,
            rollback_point,
        } => {
            let rollback_type = match r#type.as_str() {
                "full" => RollbackType::Full,
                "schema-only" => RollbackType::SchemaOnly,
                "partial" => RollbackType::Partial,
                "point-in-time" => RollbackType::PointInTime,
                other => {
                    return Err(MigrateError::Config(format!(
                        "unknown rollback type '{}'",
                        other
                    )))
                }
            };

            let engine = MigrationEngine::new(config.clone()).await?;
            let service = RollbackService::new(
                std::sync::Arc::new(config),
                engine.source(),
                engine.target(),
                engine.tracking(),
            );

            let rollback_config = RollbackConfig {
                rollback_type,
                drop_tables: !keep_tables,
                restore_source_archive: restore_archive,
                collections,
                rollback_point_id: rollback_point,
                dry_run,
                confirmed,
                ..RollbackConfig::full(migration_id)
            };

            let result = service.rollback(&rollback_config).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            info!(
                "Rollback {}: {}/{} tables, {} rows deleted",
                if result.success { "succeeded" } else { "finished with failures" },
                result.tables_dropped,
                result.tables_attempted,
                result.rows_deleted
            );
        }

        Commands::Recover {
            migration_id,
            strategy,
            backup_first,
            analyze_only,
        } => {
            let engine = MigrationEngine::new(config.clone()).await?;
            let service = RecoveryService::new(
                std::sync::Arc::new(config),
                engine.source(),
                engine.target(),
                engine.tracking(),
            );

            if analyze_only {
                let analysis = service.analyze_failure(&migration_id).await?;
                info!(
                    "Failure classified as {:?}: {}",
                    analysis.failure_type, analysis.message
                );
                for s in &analysis.strategies {
                    info!(
                        "  [{}] {} (success ~{:.0}%, risk {:?})",
                        s.id,
                        s.name,
                        s.success_rate * 100.0,
                        s.risk
                    );
                }
                return Ok(());
            }

            let recovery_config = RecoveryConfig {
                strategy_id: strategy,
                pre_recovery_backup: backup_first,
                ..RecoveryConfig::new(migration_id)
            };

            let result = service.recover(&recovery_config).await?;
            info!(
                "Recovery {} via '{}': can_resume={}",
                if result.success { "succeeded" } else { "failed" },
                result.strategy_id,
                result.can_resume
            );
            if let Some(checkpoint) = result.resume_checkpoint {
                info!("Resume from checkpoint {}", checkpoint);
            }
        }
    }

    Ok(())
}
