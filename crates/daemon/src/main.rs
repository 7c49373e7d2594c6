//! editd Daemon
//!
//! Edit-session arbitration and file serving for editor clients.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::files::LocalFiles;
use daemon::session::SessionCore;
use daemon::transport;
use protocol::CapabilityIdGen;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// editd - edit-session daemon for editor clients.
#[derive(Parser, Debug)]
#[command(name = "editd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Start the editd daemon
    Start {
        /// Override the listen address from the configuration
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();

    match cli.command {
        Commands::CheckConfig => {
            config.validate()?;
            println!(
                "Configuration OK: {} root(s), listening on {}",
                config.roots.len(),
                config.daemon.listen_addr
            );
            Ok(())
        }
        Commands::Start { listen } => {
            if let Some(listen) = listen {
                config.daemon.listen_addr = listen;
            }
            config.validate()?;
            let _guard = init_tracing(&config, cli.verbose)?;
            run(config).await
        }
    }
}

/// Set up the tracing subscriber, optionally writing to rotated files.
///
/// The returned guard must stay alive for the daemon's lifetime so the
/// non-blocking file writer flushes on exit.
fn init_tracing(config: &Config, verbose: bool) -> Result<Option<WorkerGuard>> {
    let level: &str = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.daemon.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "editd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Run the daemon until ctrl-c.
async fn run(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %default_config_path().display(),
        "Starting editd"
    );

    let files = LocalFiles::new(config.root_paths());
    let session = SessionCore::spawn(files, Arc::new(CapabilityIdGen::new()));
    session.initialize(config.session_config());

    let listener = TcpListener::bind(&config.daemon.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.daemon.listen_addr))?;

    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(transport::serve(listener, session, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Received ctrl-c; shutting down");
    shutdown.cancel();
    serving.await.context("Transport task panicked")??;

    info!("editd stopped");
    Ok(())
}
