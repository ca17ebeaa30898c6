//! lockrelayd - relay between a lock device and its observers
//!
//! ```bash
//! lockrelayd start                          # foreground
//! lockrelayd start -d --listen 127.0.0.1:4000
//! lockrelayd status                         # PID plus the live lock status
//! lockrelayd stop
//! ```
//!
//! Every subcommand reads the same configuration, so `status` and `stop`
//! find the PID file and address of the relay that `start` launched.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lockctl::{describe, ClientConfig, RelayClient};
use lockrelay_protocol::{ClientMessage, ServerMessage};
use lockrelayd::config::RelayConfig;
use lockrelayd::daemon::{self, PidFile};
use lockrelayd::notify::spawn_dispatcher;
use lockrelayd::relay::spawn_relay;
use lockrelayd::server::RelayServer;

/// Used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "lockrelayd=info,lockrelay_core=info,lockrelay_protocol=info";

/// How long `stop` waits for the relay to exit
const STOP_WAIT: Duration = Duration::from_secs(5);

/// How long `status` waits for the relay's snapshot
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "lockrelayd", version, about)]
struct Args {
    /// TOML config file (default: $XDG_CONFIG_HOME/lockrelay/lockrelayd.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (the default)
    Start {
        /// Detach and log to the state directory
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Listen address, overrides config and environment
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Stop a detached relay
    Stop,
    /// Show whether the relay runs and what it reports
    Status,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let mut config =
        RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command.unwrap_or(Command::Start {
        daemon: false,
        listen: None,
    }) {
        Command::Start { daemon, listen } => {
            if let Some(addr) = listen {
                config.listen_addr = addr.to_string();
            }
            start(config, daemon)
        }
        Command::Stop => stop(&config),
        Command::Status => status(&config),
    }
}

// ============================================================================
// Subcommands
// ============================================================================

fn start(config: RelayConfig, background: bool) -> Result<ExitCode> {
    let addr = config.listen_socket_addr().context("Invalid listen address")?;

    // Checked before detaching so the message reaches the terminal
    if let Some(pid) = daemon::running_pid(&config.pid_file()) {
        eprintln!("lockrelayd is already running (PID {pid}); stop it with `lockrelayd stop`");
        return Ok(ExitCode::FAILURE);
    }

    if background {
        daemon::detach(&config.log_file())?;
    }

    // Acquired after detaching so the file holds the daemon's PID
    let _pid_file = PidFile::acquire(&config.pid_file())?;
    serve(config, addr)
}

fn stop(config: &RelayConfig) -> Result<ExitCode> {
    let Some(pid) = daemon::running_pid(&config.pid_file()) else {
        println!("lockrelayd is not running");
        return Ok(ExitCode::SUCCESS);
    };

    daemon::request_stop(pid)?;
    if daemon::wait_for_exit(pid, STOP_WAIT) {
        println!("Stopped lockrelayd (PID {pid})");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("lockrelayd (PID {pid}) still running after {}s", STOP_WAIT.as_secs());
        Ok(ExitCode::FAILURE)
    }
}

fn status(config: &RelayConfig) -> Result<ExitCode> {
    let Some(pid) = daemon::running_pid(&config.pid_file()) else {
        println!("lockrelayd is not running");
        return Ok(ExitCode::FAILURE);
    };
    println!("lockrelayd running (PID {pid}), log {}", config.log_file().display());

    let addr = config.client_addr().context("Invalid listen address")?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    match runtime.block_on(query_relay(addr)) {
        Ok(snapshot) => {
            println!("{addr}: {}", describe(&snapshot));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{addr}: not answering ({e:#})");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Joins as an observer just long enough to read the current lock status.
async fn query_relay(addr: SocketAddr) -> Result<ServerMessage> {
    let client_config = ClientConfig {
        addr,
        max_attempts: 1,
        ..ClientConfig::default()
    };
    let mut client = RelayClient::connect(&client_config).await?;

    client.send(&ClientMessage::signup_client()).await?;
    let snapshot = tokio::time::timeout(SNAPSHOT_TIMEOUT, client.recv())
        .await
        .context("No snapshot from relay")??;
    client.close().await?;

    Ok(snapshot)
}

// ============================================================================
// Relay Runtime
// ============================================================================

#[tokio::main]
async fn serve(config: RelayConfig, addr: SocketAddr) -> Result<ExitCode> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        addr = %addr,
        notify_command = ?config.notify_command,
        "lockrelayd starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let relay = spawn_relay(spawn_dispatcher(config.notifier(), config.notify_queue));
    let server = RelayServer::bind(addr, relay, shutdown, config.liveness()).await?;
    server.run().await?;

    info!("lockrelayd stopped");
    Ok(ExitCode::SUCCESS)
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    match wait_for_signal().await {
        Ok(name) => info!(signal = name, "Shutting down"),
        Err(e) => error!(error = %e, "Cannot install signal handlers, shutting down"),
    }
    shutdown.cancel();
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    })
}
