//! keel-migrate - apply, validate and scaffold SQL migrations

mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use keel_core::application::Migrator;
use keel_core::config::Settings;
use keel_core::error::{AppError, ErrorKind};
use keel_core::port::{SystemTimeProvider, TimeProvider, UuidProvider};
use keel_infra_fs::FsMigrationSource;
use keel_infra_sql::{QueryRunner, SqlMigrationJournal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tabled::{Table, Tabled};
use telemetry::Telemetry;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "keel=info,sqlx=warn";

#[derive(Parser)]
#[command(name = "keel-migrate")]
#[command(about = "Apply, validate and scaffold SQL migrations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overrides the config file
    #[arg(long, global = true, env = "KEEL_DATABASE_URL")]
    url: Option<String>,

    /// Migration directory
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Journal table name
    #[arg(long, global = true)]
    table: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate,

    /// Create an empty timestamped migration file
    Create {
        /// Human-readable name, slugified into the file name
        name: String,
    },

    /// Run pending migrations and roll everything back
    #[command(alias = "dryRun")]
    DryRun,

    /// Show applied and pending migrations
    Status,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Applied At")]
    applied_at: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match init_logging() {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    let result = run(cli, &telemetry).await;
    telemetry.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Structured logging to stderr, plus the OpenTelemetry layer when configured
fn init_logging() -> Result<Telemetry> {
    let log_format = std::env::var("KEEL_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let (telemetry, otel_layer) =
        telemetry::init_telemetry().context("Failed to initialize OpenTelemetry")?;

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(otel_layer)
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()?;
        }
        _ => {
            // Development: compact human-readable lines
            tracing_subscriber::registry()
                .with(otel_layer)
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
    }

    match (telemetry.is_active(), telemetry.endpoint()) {
        (true, Some(endpoint)) => info!(endpoint, "OpenTelemetry export enabled"),
        (false, Some(_)) => {
            warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
            warn!("Rebuild with: cargo build --features telemetry");
        }
        _ => {}
    }

    Ok(telemetry)
}

async fn run(cli: Cli, telemetry: &Telemetry) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(url) = cli.url {
        settings.database.url = Some(url);
    }
    if let Some(dir) = cli.dir {
        settings.migrations.directory = dir;
    }
    if let Some(table) = cli.table {
        settings.migrations.table = table;
    }

    let source = Arc::new(FsMigrationSource::new(&settings.migrations.directory));

    if let Commands::Create { name } = &cli.command {
        let path = source.create(name, SystemTimeProvider.now()).await?;
        println!("{} {}", "✓ Created".green().bold(), path.display());
        return Ok(());
    }

    let table = settings.migrations.journal_table()?;
    let runner = QueryRunner::connect(&settings.database)
        .await
        .context("Failed to connect to database")?;
    let runner = Arc::new(if telemetry.is_active() {
        runner.traced()
    } else {
        runner
    });

    let journal = Arc::new(SqlMigrationJournal::new(runner.clone(), table));
    let migrator = Migrator::new(journal, source, Arc::new(UuidProvider));

    let result = match cli.command {
        Commands::Migrate => migrate(&migrator).await,
        Commands::DryRun => dry_run(&migrator).await,
        Commands::Status => status(&migrator).await,
        Commands::Create { .. } => Ok(()),
    };

    if let Err(e) = runner.close().await {
        warn!(error = %e, "Failed to close connection pool");
    }
    result
}

async fn migrate(migrator: &Migrator) -> Result<()> {
    let report = migrator.migrate().await.context("Migration failed")?;

    if report.applied.is_empty() {
        println!("{}", "Nothing to migrate".yellow());
        return Ok(());
    }
    for version in &report.applied {
        println!("{} {}", "✓ Applied".green(), version);
    }
    println!();
    println!(
        "{}",
        format!("{} migration(s) applied", report.applied.len())
            .green()
            .bold()
    );
    Ok(())
}

async fn dry_run(migrator: &Migrator) -> Result<()> {
    let report = migrator.dry_run().await.context("Dry run failed")?;

    for version in &report.validated {
        println!("{} {}", "✓ Valid".green(), version);
    }
    println!();
    println!(
        "{}",
        format!("{} migration(s) validated", report.validated.len())
            .green()
            .bold()
    );
    if report.rolled_back {
        println!("{}", "All changes rolled back".cyan());
    }
    Ok(())
}

async fn status(migrator: &Migrator) -> Result<()> {
    let status = migrator.status().await.context("Failed to read status")?;

    let mut rows: Vec<StatusRow> = status
        .applied
        .iter()
        .map(|row| StatusRow {
            version: row.version.to_string(),
            file: row.file_name.clone(),
            state: "applied".to_string(),
            applied_at: row.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .collect();
    rows.extend(status.pending.iter().map(|record| StatusRow {
        version: record.version.to_string(),
        file: record.file_name.clone(),
        state: "pending".to_string(),
        applied_at: "-".to_string(),
    }));

    println!("{}", "Migration Status".cyan().bold());
    println!();
    if rows.is_empty() {
        println!("{}", "No migrations found".yellow());
    } else {
        println!("{}", Table::new(rows));
    }
    println!();
    println!(
        "{} applied, {} pending",
        status.applied.len(),
        status.pending.len()
    );
    Ok(())
}

/// 0 success, 1 data/transaction/driver, 2 configuration or usage, 3 I/O
fn exit_code(err: &anyhow::Error) -> u8 {
    let Some(app) = err.downcast_ref::<AppError>() else {
        return 1;
    };
    match app.kind() {
        ErrorKind::IllegalState
        | ErrorKind::DomainData
        | ErrorKind::Transaction
        | ErrorKind::Driver
        | ErrorKind::Connection => 1,
        ErrorKind::Config | ErrorKind::Domain => 2,
        ErrorKind::Io => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use keel_core::domain::DomainError;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dry_run_alias() {
        let cli = Cli::try_parse_from(["keel-migrate", "dryRun", "--dir", "db"]).unwrap();
        assert!(matches!(cli.command, Commands::DryRun));
        assert_eq!(cli.dir, Some(PathBuf::from("db")));
    }

    #[test]
    fn test_exit_codes() {
        let io = anyhow::Error::new(AppError::Io(std::io::Error::other("disk")));
        assert_eq!(exit_code(&io), 3);

        let config = anyhow::Error::new(AppError::Config("no url".to_string()))
            .context("Failed to load settings");
        assert_eq!(exit_code(&config), 2);

        let domain = anyhow::Error::new(AppError::Domain(DomainError::InvalidTableName(
            "1bad".to_string(),
        )));
        assert_eq!(exit_code(&domain), 2);

        let tx = anyhow::Error::new(AppError::transaction(AppError::illegal_state("nested")));
        assert_eq!(exit_code(&tx), 1);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
