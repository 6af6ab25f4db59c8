//! repomon - live uncommitted-change monitor for git repositories
//!
//! Entry point for the monitoring daemon.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use repomon::git::{GitCli, StatusComputer};
use repomon::observability::init_tracing;
use repomon::registry::{RegistryEvent, RepoRegistry};
use repomon::storage::{init_storage, Database, SqliteStore};
use repomon::watcher::NotifyBackend;
use repomon::{Config, Result};

/// repomon - live uncommitted-change monitor for git repositories
#[derive(Parser, Debug)]
#[command(name = "repomon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for the `SQLite` state database
    #[arg(short, long, env = "REPOMON_DATA_DIR", default_value = "./data")]
    data_dir: std::path::PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REPOMON_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "REPOMON_LOG_JSON")]
    log_json: bool,

    /// Repositories to register on startup, in addition to restored ones
    #[arg(short, long, env = "REPOMON_ADD", value_delimiter = ',')]
    add: Vec<std::path::PathBuf>,

    /// Debounce window for working-tree changes, in milliseconds
    #[arg(long, env = "REPOMON_CONTENT_DEBOUNCE_MS", default_value = "400")]
    content_debounce_ms: u64,

    /// Debounce window for `.git` metadata changes, in milliseconds
    #[arg(long, env = "REPOMON_METADATA_DEBOUNCE_MS", default_value = "800")]
    metadata_debounce_ms: u64,

    /// Quiet period a file needs before its change is noticed, in milliseconds
    #[arg(long, env = "REPOMON_STABILIZATION_MS", default_value = "300")]
    stabilization_ms: u64,

    /// Timeout for each git command, in seconds
    #[arg(long, env = "REPOMON_GIT_TIMEOUT_SECS", default_value = "10")]
    git_timeout_secs: u64,

    /// Git executable
    #[arg(long, env = "REPOMON_GIT", default_value = "git")]
    git: String,

    /// Extra gitignore-style globs to ignore in working trees
    #[arg(long, env = "REPOMON_IGNORE", value_delimiter = ',')]
    ignore: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    tracing::info!("repomon v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config {
        data_dir: cli.data_dir,
        log_level: cli.log_level,
        content_debounce: Duration::from_millis(cli.content_debounce_ms),
        metadata_debounce: Duration::from_millis(cli.metadata_debounce_ms),
        stabilization_delay: Duration::from_millis(cli.stabilization_ms),
        oracle_timeout: Duration::from_secs(cli.git_timeout_secs),
        git_binary: cli.git,
        extra_ignores: cli.ignore,
    };

    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    let db = Database::open(config.database_path())?;
    init_storage(&db)?;

    let computer = Arc::new(StatusComputer::new(Arc::new(GitCli::from_config(&config))));
    let registry = RepoRegistry::new(
        computer,
        Arc::new(NotifyBackend::new()),
        Arc::new(SqliteStore::new(db)),
        config.session_config(),
    )?;

    let mut events = registry.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    registry.restore().await?;
    for path in &cli.add {
        match registry.add_repository(path).await {
            Ok(id) => tracing::info!(repo = %id, "Watching repository"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to add repository"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    registry.shutdown().await;
    let _ = printer.await;
    Ok(())
}

/// Write one event as a JSON line on stdout.
fn print_event(event: &RegistryEvent) {
    match serde_json::to_string(event) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if writeln!(stdout, "{line}").and_then(|()| stdout.flush()).is_err() {
                tracing::warn!("stdout closed; dropping event");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode event"),
    }
}
