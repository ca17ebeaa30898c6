//! TCP server for the lock relay.
//!
//! The server:
//! - Listens on a TCP address for lock and observer connections
//! - Spawns a ConnectionHandler for each peer
//! - Supports graceful shutdown via CancellationToken
//!
//! # Liveness
//!
//! A peer that has announced its role may stay silent forever; lock
//! firmware only reports on change and observers only listen. Dead peers
//! are found on the write side instead: a connection with no outbound
//! traffic for `heartbeat_interval` gets a `heartbeat` line, and a failed
//! or stalled write closes it. Only connections that never announce a
//! role are closed for read silence, after `handshake_timeout`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   RelayHandle   │
//! │   (per peer)    │◀────│    (outbox)     │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use lockrelay_core::ConnectionId;

use crate::relay::RelayHandle;

/// Timing rules applied to every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// Read silence allowed before a connection announces its role
    pub handshake_timeout: Duration,

    /// Outbound silence after which a heartbeat is written
    pub heartbeat_interval: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// TCP server for the relay.
pub struct RelayServer {
    /// Bound listener
    listener: TcpListener,

    /// Handle to the relay actor
    relay: RelayHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection IDs
    connection_counter: AtomicU64,

    /// Handshake and heartbeat timing for each connection
    liveness: Liveness,
}

impl RelayServer {
    /// Binds the listener.
    ///
    /// Binding happens up front so callers learn about a taken port before
    /// anything else starts, and so tests can bind port 0.
    pub async fn bind(
        addr: SocketAddr,
        relay: RelayHandle,
        cancel_token: CancellationToken,
        liveness: Liveness,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            relay,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            liveness,
        })
    }

    /// Returns the address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// Connections already open keep running until their peer leaves.
    pub async fn run(&self) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Relay server listening");
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer, connection = conn_num, "Accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Handles a new peer by spawning a handler task.
    fn handle_connection(&self, stream: TcpStream, connection_number: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let connection = ConnectionId::new(format!("conn-{connection_number}"));
        let handler = ConnectionHandler::new(stream, self.relay.clone(), connection, self.liveness);

        tokio::spawn(handler.run());
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}
