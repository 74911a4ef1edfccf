//! Turku API Server
//!
//! HTTP broker that registers machines and storage units and schedules
//! their backups.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use turku_api::auth::SecretHasher;
use turku_api::broker::{Broker, SystemClock};
use turku_api::routes::{AppState, build_router};
use turku_api::storage::TurkuDatabase;
use turku_core::config::{Config, default_database_path, load_config};
use turku_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "turku-api")]
#[command(
    version,
    about = "Turku API server - backup registration, scheduling and check-in broker"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, global = true, env = "TURKU_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Address to listen on.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Output logs as JSON (for structured log aggregation).
        #[arg(long)]
        log_json: bool,
    },
    /// Print a Nagios-style health report and exit with its status.
    CheckHealth,
    /// Delete backup log entries older than the given number of days.
    CleanLogs {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

fn database_path(args: &Args, config: &Config) -> anyhow::Result<PathBuf> {
    args.db_path
        .clone()
        .or_else(|| config.server.database_path.clone())
        .or_else(default_database_path)
        .context("Cannot determine database path; pass --db-path")
}

async fn open_broker(path: &Path) -> anyhow::Result<Broker> {
    info!(path = %path.display(), "Opening registry database");
    let db = TurkuDatabase::open(path).await?;
    Ok(Broker::new(
        db,
        Arc::new(SecretHasher::new()),
        Arc::new(SystemClock),
    ))
}

async fn serve(broker: Broker, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(AppState {
        broker: Arc::new(broker),
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Turku API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

#[tokio::main]
#[allow(clippy::print_stdout)]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;

    if let Command::Serve { log_json: true, .. } = args.command {
        config.server.log_json = true;
    }
    init_tracing("turku_api=info,tower_http=info", config.server.log_json)?;

    let db_path = database_path(&args, &config)?;
    let broker = open_broker(&db_path).await?;

    match args.command {
        Command::Serve { addr, .. } => {
            let addr = match addr {
                Some(addr) => addr,
                None => config
                    .server
                    .listen_addr
                    .parse()
                    .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?,
            };
            info!(version = env!("CARGO_PKG_VERSION"), "Starting turku-api");
            serve(broker, addr).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckHealth => {
            let report = broker.health_report(&config.health).await?;
            let (text, code) = report.render();
            println!("{text}");
            Ok(ExitCode::from(code))
        }
        Command::CleanLogs { days } => {
            let deleted = broker.clean_logs(days).await?;
            println!("Deleted {deleted} backup log entries older than {days} days");
            Ok(ExitCode::SUCCESS)
        }
    }
}
