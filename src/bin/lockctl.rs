//! lockctl - talk to a running lockrelay daemon
//!
//! # Usage
//!
//! ```text
//! lockctl watch              # Follow lock status as an observer
//! lockctl unlock             # Ask the lock to unlock
//! lockctl lock               # Ask the lock to lock
//! lockctl say "back at 5"    # Broadcast a message to everyone connected
//! lockctl test-notify        # Fire a test push notification
//! lockctl ping               # Check the relay is answering
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lockctl::{describe, is_keepalive, ClientConfig, ClientError, RelayClient};
use lockrelay_core::ControlCommand;
use lockrelay_protocol::{ClientMessage, ServerMessage};

/// How long `ping` waits for its pong
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// How often `watch` pings the relay
const WATCH_PING_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// CLI Arguments
// ============================================================================

/// lockctl - client for the lockrelay daemon
#[derive(Parser, Debug)]
#[command(name = "lockctl", version, about)]
struct Args {
    /// Relay address (default: $LOCKRELAY_ADDR or 127.0.0.1:3015)
    #[arg(short, long, global = true)]
    addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow lock status updates
    Watch,
    /// Ask the lock to unlock
    Unlock,
    /// Ask the lock to lock
    Lock,
    /// Broadcast a free-form message to every connection
    Say {
        /// Message text
        text: String,
    },
    /// Fire a test push notification
    TestNotify,
    /// Check that the relay answers
    Ping,
}

fn resolve_addr(flag: Option<SocketAddr>) -> Result<SocketAddr> {
    if let Some(addr) = flag {
        return Ok(addr);
    }

    match std::env::var("LOCKRELAY_ADDR") {
        Ok(value) if !value.trim().is_empty() => {
            let mut addr: SocketAddr = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid LOCKRELAY_ADDR `{value}`"))?;
            // A wildcard bind address is reachable on loopback
            if addr.ip().is_unspecified() {
                addr.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
            }
            Ok(addr)
        }
        _ => Ok(ClientConfig::default().addr),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig {
        addr: resolve_addr(args.addr)?,
        ..ClientConfig::default()
    };
    debug!(addr = %config.addr, command = ?args.command, "lockctl starting");

    let mut client = RelayClient::connect(&config).await?;

    match args.command {
        Command::Watch => watch(client).await,
        Command::Unlock => send_and_close(client, ClientMessage::control(ControlCommand::Unlock)).await,
        Command::Lock => send_and_close(client, ClientMessage::control(ControlCommand::Lock)).await,
        Command::Say { text } => {
            send_and_close(client, ClientMessage::snd_message(serde_json::Value::String(text))).await
        }
        Command::TestNotify => send_and_close(client, ClientMessage::test_notification()).await,
        Command::Ping => {
            let started = Instant::now();
            client.send(&ClientMessage::ping(1)).await?;
            let reply = tokio::time::timeout(PING_TIMEOUT, client.recv())
                .await
                .context("No pong from relay")??;
            match reply {
                ServerMessage::Pong { seq: 1 } => {
                    println!("pong from {} in {:?}", config.addr, started.elapsed());
                    client.close().await?;
                    Ok(())
                }
                other => bail!("Unexpected reply: {}", describe(&other)),
            }
        }
    }
}

/// Announces as an observer and prints every message until the relay closes.
///
/// Pings periodically so a relay that vanished without closing the socket
/// surfaces as a write error.
async fn watch(mut client: RelayClient) -> Result<()> {
    client.send(&ClientMessage::signup_client()).await?;

    let mut pings = tokio::time::interval_at(
        tokio::time::Instant::now() + WATCH_PING_INTERVAL,
        WATCH_PING_INTERVAL,
    );
    let mut seq = 0u64;

    loop {
        tokio::select! {
            _ = pings.tick() => {
                seq = seq.wrapping_add(1);
                client.send(&ClientMessage::ping(seq)).await?;
            }
            result = client.recv() => match result {
                Ok(message) if is_keepalive(&message) => {
                    debug!(message = %describe(&message), "Keepalive");
                }
                Ok(message) => println!("{}", describe(&message)),
                Err(ClientError::Closed) => {
                    println!("relay closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                client.close().await?;
                return Ok(());
            }
        }
    }
}

async fn send_and_close(mut client: RelayClient, message: ClientMessage) -> Result<()> {
    client.send(&message).await?;
    client.close().await?;
    Ok(())
}
