//! Pathgate Daemon
//!
//! Permission-filtered file browsing, media streaming and archive downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::files::Grant;
use daemon::server::{self, AppState};
use daemon::GrantStore;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Pathgate - serve a directory tree behind per-principal grants.
#[derive(Parser, Debug)]
#[command(name = "pathgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Directory to expose (overrides files.root)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Address to bind (overrides server.listen)
        #[arg(long, short, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Manage principal grants
    #[command(subcommand)]
    Grants(GrantsCommands),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for grant management.
#[derive(Subcommand, Debug, Clone)]
pub enum GrantsCommands {
    /// List principals with grants
    List,

    /// Show the grants of one principal
    Show {
        /// Principal identifier
        principal: String,
    },

    /// Grant access to a path prefix
    Add {
        /// Principal identifier
        principal: String,

        /// Virtual path prefix, e.g. /photos/2024
        prefix: String,

        /// Allow writes as well as reads
        #[arg(long, short)]
        write: bool,
    },

    /// Remove all grants of a principal
    Remove {
        /// Principal identifier
        principal: String,
    },
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Validate the effective configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let _log_guard = init_logging(&level, config.daemon.log_dir.as_deref())?;

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    // Apply environment variable overrides
    config.apply_env_overrides();

    match cli.command.unwrap_or(Commands::Serve {
        root: None,
        listen: None,
    }) {
        Commands::Serve { root, listen } => {
            if let Some(root) = root {
                config.files.root = root;
            }
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            config.validate()?;
            run_serve(config).await?;
        }
        Commands::Grants(command) => run_grants(&config, command)?,
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Check) => match config.validate() {
            Ok(()) => println!("Configuration OK"),
            Err(e) => {
                eprintln!("Invalid configuration: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Initialize tracing: console output plus optional daily rolling files.
///
/// `RUST_LOG` takes precedence over `level`. The returned guard flushes the
/// file writer and must be held until exit.
fn init_logging(level: &str, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},tower_http={level}")));

    let console = tracing_subscriber::fmt::layer();

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "pathgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            Ok(None)
        }
    }
}

/// Run the HTTP server until SIGINT or SIGTERM.
async fn run_serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Pathgate starting...");

    let grants = Arc::new(GrantStore::new(config.grants_path()));
    grants.load()?;
    if grants.list_principals()?.is_empty() {
        tracing::warn!(
            "No grants configured in {:?}; every request will be denied",
            grants.path()
        );
    }

    let state = AppState::from_config(&config, grants)?;
    let addr = config.listen_addr()?;
    let shutdown = CancellationToken::new();

    let serve = server::serve(state, addr, shutdown.clone());
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => return result,
        _ = wait_for_shutdown_signal() => {
            shutdown.cancel();
        }
    }

    serve.await?;
    tracing::info!("Pathgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Execute a grant management command against the configured store.
fn run_grants(config: &Config, command: GrantsCommands) -> anyhow::Result<()> {
    let store = GrantStore::new(config.grants_path());
    store.load()?;

    match command {
        GrantsCommands::List => {
            let principals = store.list_principals()?;
            if principals.is_empty() {
                println!("No principals configured.");
                return Ok(());
            }
            for principal in principals {
                let table = store.grants_for(&principal)?;
                println!("{} ({} grants)", principal, table.grants().len());
            }
        }
        GrantsCommands::Show { principal } => {
            let table = store.grants_for(&principal)?;
            if table.is_empty() {
                println!("No grants for {}.", principal);
                return Ok(());
            }
            println!("{:<40} ACCESS", "PREFIX");
            for grant in table.grants() {
                let access = if grant.can_write { "read-write" } else { "read" };
                println!("{:<40} {}", grant.path_prefix, access);
            }
        }
        GrantsCommands::Add {
            principal,
            prefix,
            write,
        } => {
            let grant = Grant::new(&prefix, write)?;
            let prefix = grant.path_prefix.clone();
            store.add_grant(&principal, grant)?;
            store.save()?;
            println!(
                "Granted {} on {} to {}",
                if write { "read-write" } else { "read" },
                prefix,
                principal
            );
        }
        GrantsCommands::Remove { principal } => match store.remove_principal(&principal)? {
            Some(_) => {
                store.save()?;
                println!("Removed grants for {}", principal);
            }
            None => {
                eprintln!("No grants found for {}", principal);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
