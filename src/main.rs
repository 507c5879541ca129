//! repo-sync - Reconcile externally hosted repository metadata into a local store
//!
//! This is the command-line entry point.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use repo_sync::cache;
use repo_sync::config::Config;
use repo_sync::database::{RepositoryStore, SqliteStore};
use repo_sync::error::AppError;
use repo_sync::models::{Owner, OwnerId};
use repo_sync::notify::EventDispatcher;
use repo_sync::providers::ProviderRegistry;
use repo_sync::sync::{
    BatchCoordinator, HttpClientWithRateLimit, OwnerFilter, OwnerTaskStatus, RepositorySyncService,
    SyncOutcome, SyncScheduler, SyncServiceConfig,
};
use repo_sync::telemetry::init_tracing;

/// repo-sync - Reconcile externally hosted repository metadata into a local store
#[derive(Parser, Debug)]
#[command(name = "repo-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "REPO_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile one owner, or every active owner
    Sync {
        #[arg(long, value_parser = parse_owner_id)]
        owner: Option<OwnerId>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check candidate URLs for an owner
    Validate {
        #[arg(long, value_parser = parse_owner_id)]
        owner: OwnerId,

        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Manage owners
    #[command(subcommand)]
    Owner(OwnerCommand),

    /// Open-issue totals
    Stats {
        #[arg(long, value_parser = parse_owner_id)]
        owner: Option<OwnerId>,
    },

    /// Print the accepted URL formats
    HelpText,

    /// Run the scheduler until interrupted
    Run,
}

#[derive(Subcommand, Debug)]
enum OwnerCommand {
    /// Create or replace an owner
    Add {
        #[arg(long, value_parser = parse_owner_id)]
        id: OwnerId,

        #[arg(long)]
        label: String,

        #[arg(long = "url")]
        urls: Vec<String>,

        #[arg(long)]
        inactive: bool,
    },

    /// Validate and replace an owner's URL list
    SetUrls {
        #[arg(long, value_parser = parse_owner_id)]
        id: OwnerId,

        urls: Vec<String>,
    },
}

fn parse_owner_id(value: &str) -> Result<OwnerId, String> {
    let id: OwnerId = value
        .parse()
        .map_err(|_| format!("{} is not a valid owner id", value))?;
    if id == 0 {
        return Err("You may not select the Anonymous user.".to_string());
    }
    Ok(id)
}

struct App {
    store: Arc<SqliteStore>,
    service: Arc<RepositorySyncService<SqliteStore>>,
    coordinator: Arc<BatchCoordinator<SqliteStore>>,
}

async fn build_app(config: &Config) -> Result<App, AppError> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(SqliteStore::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let http = Arc::new(HttpClientWithRateLimit::new(&config.http)?);
    let registry = Arc::new(ProviderRegistry::from_config(
        &config.providers,
        http,
        &config.http.retry,
    )?);

    let cache = cache::from_config(&config.cache).await?;
    info!(backend = cache.name(), "Cache initialized");

    let service = Arc::new(RepositorySyncService::new(
        store.clone(),
        registry,
        cache,
        Arc::new(EventDispatcher::with_logging()),
        SyncServiceConfig::from(&config.sync),
    ));
    let coordinator = Arc::new(BatchCoordinator::new(service.clone(), config.batch.clone()));

    Ok(App {
        store,
        service,
        coordinator,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args)?;
    if let Command::Sync { dry_run: true, .. } = args.command {
        config.sync.dry_run = true;
    }

    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting repo-sync");

    let app = build_app(&config).await?;
    let succeeded = execute(&app, &config, args.command).await?;

    info!("repo-sync finished");
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Run one subcommand; `Ok(false)` means it completed but reported problems
async fn execute(app: &App, config: &Config, command: Command) -> Result<bool, AppError> {
    match command {
        Command::Sync {
            owner: Some(owner_id),
            ..
        } => {
            let outcome = app.service.synchronize_owner(owner_id).await?;
            print_outcome(&outcome);
            Ok(outcome.is_success())
        }
        Command::Sync { owner: None, .. } => {
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(());
            });

            let report = app
                .coordinator
                .synchronize_all_until(OwnerFilter::AllActive, shutdown_rx)
                .await?;
            for result in &report.results {
                match &result.status {
                    OwnerTaskStatus::Succeeded(outcome) => print_outcome(outcome),
                    OwnerTaskStatus::Failed(reason) => {
                        println!("owner {}: failed: {}", result.owner_id, reason)
                    }
                    OwnerTaskStatus::Skipped(reason) => {
                        println!("owner {}: skipped: {}", result.owner_id, reason)
                    }
                }
            }
            println!(
                "{} succeeded, {} failed, {} skipped{}",
                report.succeeded(),
                report.failed(),
                report.skipped(),
                if report.cancelled { " (cancelled)" } else { "" }
            );
            Ok(report.failed() == 0)
        }
        Command::Validate { owner, urls } => {
            let summary = app.service.validate_urls(&urls, owner).await?;
            if summary.is_empty() {
                println!("All repository urls are valid.");
                Ok(true)
            } else {
                println!("{}", summary);
                Ok(false)
            }
        }
        Command::Owner(OwnerCommand::Add {
            id,
            label,
            urls,
            inactive,
        }) => {
            let mut owner = Owner::new(id, label).with_urls(urls);
            owner.active = !inactive;
            app.store.upsert_owner(&owner).await?;
            app.service.invalidate_owner(id).await;
            println!("Saved owner {}", id);
            Ok(true)
        }
        Command::Owner(OwnerCommand::SetUrls { id, urls }) => {
            app.service.update_owner_urls(id, &urls).await?;
            println!("Updated repository urls for owner {}", id);
            Ok(true)
        }
        Command::Stats { owner } => {
            let stats = app.service.open_issue_stats(owner).await?;
            println!("Total open issues: {}", stats.total_open_issues);
            if let (Some(id), Some(count)) = (owner, stats.owner_open_issues) {
                println!("Open issues for owner {}: {}", id, count);
            }
            Ok(true)
        }
        Command::HelpText => {
            println!("{}", app.service.help_text());
            Ok(true)
        }
        Command::Run => {
            let (shutdown_tx, _) = broadcast::channel(1);
            let scheduler = SyncScheduler::new(
                config.scheduler.clone(),
                app.coordinator.clone(),
                shutdown_tx.clone(),
            );
            let handle = tokio::spawn(scheduler.run());

            shutdown_signal().await;
            let _ = shutdown_tx.send(());
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task failed");
            }
            Ok(true)
        }
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    let prefix = if outcome.dry_run { "would be " } else { "" };
    for event in &outcome.events {
        println!(
            "owner {}: {} {}{} ({})",
            outcome.owner_id, event.record.machine_name, prefix, event.action, event.record.url
        );
    }
    for failure in &outcome.fetch_failures {
        println!(
            "owner {}: {} could not fetch {}: {}",
            outcome.owner_id, failure.provider, failure.url, failure.error
        );
    }
    println!(
        "owner {}: {} created, {} updated, {} deleted, {} unchanged",
        outcome.owner_id, outcome.created, outcome.updated, outcome.deleted, outcome.unchanged
    );
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> Result<Config, AppError> {
    let config = match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path)?
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env()?
        }
    };
    Ok(config)
}

/// Resolves when Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
