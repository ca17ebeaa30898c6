//! Error types for the lockctl client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Client errors.
///
/// Connection errors carry the address so the user can check whether the
/// relay is running where they think it is.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not reach the relay after every retry.
    #[error("Failed to connect to relay at {addr} after {attempts} attempts: {reason}")]
    Connect {
        addr: SocketAddr,
        attempts: u32,
        reason: String,
    },

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or a reply could not be parsed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The relay closed the connection.
    #[error("Relay closed the connection")]
    Closed,
}

impl From<lockrelay_protocol::ProtocolError> for ClientError {
    fn from(e: lockrelay_protocol::ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
