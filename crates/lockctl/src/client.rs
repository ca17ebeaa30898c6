//! Relay connection client.
//!
//! This module provides the `RelayClient` which handles:
//! - Connecting to the relay over TCP with exponential backoff
//! - Sending client messages as JSON lines
//! - Reading relay messages one line at a time
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::debug;

use lockrelay_protocol::{decode_line, encode_line, ClientMessage, ServerMessage};

use crate::error::{ClientError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Connection behavior for the client.
///
/// # Example
///
/// ```rust
/// use lockctl::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     retry_initial_delay: Duration::from_millis(100),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address the relay listens on.
    pub addr: SocketAddr,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,

    /// Connection attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3015)),
            retry_initial_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(5),
            retry_multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

// ============================================================================
// Relay Client
// ============================================================================

/// An open connection to the relay.
pub struct RelayClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Bytes of a line not yet complete
    pending: Vec<u8>,
}

impl RelayClient {
    /// Connects with exponential backoff, giving up after `max_attempts`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let mut delay = config.retry_initial_delay;
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            debug!(attempt, addr = %config.addr, "Attempting to connect to relay");

            match TcpStream::connect(config.addr).await {
                Ok(stream) => {
                    debug!(attempt, "Connection successful");
                    return Ok(Self::from_stream(stream));
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(ClientError::Connect {
                        addr: config.addr,
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Connection attempt failed");
                }
            }

            sleep(delay).await;
            let next_delay_ms = (delay.as_millis() as f64 * config.retry_multiplier) as u64;
            delay = Duration::from_millis(next_delay_ms).min(config.retry_max_delay);
        }
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
        }
    }

    /// Sends one message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let line = encode_line(message)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to relay");
        Ok(())
    }

    /// Waits for the next message from the relay.
    ///
    /// Blank lines are skipped. Returns `ClientError::Closed` at end of stream.
    /// Cancel safe: a partly read line is kept for the next call.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        loop {
            if self.reader.read_until(b'\n', &mut self.pending).await? == 0 {
                return Err(ClientError::Closed);
            }
            if self.pending.last() != Some(&b'\n') {
                // EOF in the middle of a line
                return Err(ClientError::Closed);
            }

            let line = std::mem::take(&mut self.pending);
            let line = String::from_utf8(line).map_err(|e| ClientError::Protocol(e.to_string()))?;
            if !line.trim().is_empty() {
                return Ok(decode_line(&line)?);
            }
        }
    }

    /// Says goodbye and closes the write side.
    pub async fn close(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
