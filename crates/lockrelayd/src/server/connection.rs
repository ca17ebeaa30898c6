//! Connection handler for individual peer connections.
//!
//! Each TCP connection gets its own `ConnectionHandler` that:
//! - Attaches an outbox to the relay and drains it to the socket
//! - Parses incoming lines and checks protocol versions
//! - Turns messages into relay events
//! - Reports the disconnect exactly once, however the connection ends
//! - Writes heartbeats on quiet connections and closes on a failed write
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lockrelay_core::{ConnectionId, ControlCommand};
use lockrelay_protocol::{
    decode_line, encode_line, text_from_value, ClientMessage, MessageType, ProtocolError,
    ProtocolVersion, ServerMessage, MAX_LINE_BYTES,
};

use super::Liveness;
use crate::relay::{RelayError, RelayHandle, OUTBOX_CAPACITY};

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single peer.
pub struct ConnectionHandler {
    /// Buffered reader for incoming lines
    reader: BufReader<OwnedReadHalf>,

    /// Write half, moved into the writer task on start
    writer: Option<OwnedWriteHalf>,

    /// Handle to the relay actor
    relay: RelayHandle,

    /// Identifier of this connection
    connection: ConnectionId,

    /// Handshake and heartbeat timing
    liveness: Liveness,

    /// Set once the peer announced itself as lock or observer
    announced: bool,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted TCP stream
    /// * `relay` - Handle to the relay actor
    /// * `connection` - Identifier assigned by the server
    /// * `liveness` - Handshake timeout and heartbeat interval
    pub fn new(
        stream: TcpStream,
        relay: RelayHandle,
        connection: ConnectionId,
        liveness: Liveness,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: Some(writer),
            relay,
            connection,
            liveness,
            announced: false,
        }
    }

    /// Runs the connection until the peer leaves, stops accepting writes,
    /// misses the handshake, or the relay stops.
    pub async fn run(mut self) {
        debug!(connection = %self.connection, "Peer connected");

        let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);
        let writer_failed = CancellationToken::new();
        let writer_task = match self.writer.take() {
            Some(writer) => spawn_writer(
                self.connection.clone(),
                writer,
                inbox,
                self.liveness.heartbeat_interval,
                writer_failed.clone(),
            ),
            None => return,
        };

        if self.relay.attach(self.connection.clone(), outbox.clone()).await.is_err() {
            warn!(connection = %self.connection, "Relay unavailable, closing connection");
            writer_task.abort();
            return;
        }

        match self.process_messages(&outbox, &writer_failed).await {
            Ok(()) => debug!(connection = %self.connection, "Peer closed connection"),
            Err(e) => debug!(connection = %self.connection, error = %e, "Connection closed"),
        }

        if let Err(e) = self.relay.disconnect(self.connection.clone()).await {
            warn!(connection = %self.connection, error = %e, "Failed to report disconnect");
        }

        // The actor drops its clone on disconnect; the writer ends once the queue drains
        drop(outbox);
        if timeout(WRITE_TIMEOUT, writer_task).await.is_err() {
            debug!(connection = %self.connection, "Writer did not drain in time");
        }

        info!(connection = %self.connection, "Peer disconnected");
    }

    /// Main message processing loop.
    ///
    /// Bad lines are answered with an error and the loop continues. Read
    /// errors, a failed writer, a missed handshake, and a stopped relay end
    /// the connection.
    async fn process_messages(
        &mut self,
        outbox: &mpsc::Sender<ServerMessage>,
        writer_failed: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        loop {
            let read = tokio::select! {
                _ = writer_failed.cancelled() => return Err(ConnectionError::WriterClosed),
                read = self.next_line() => read,
            };

            let line = match read {
                Ok(line) => line,
                Err(ConnectionError::Eof) => return Ok(()),
                Err(ConnectionError::Parse(reason)) => {
                    reply(outbox, ServerMessage::error_with_code(&reason, "parse_error")).await?;
                    continue;
                }
                Err(e @ ConnectionError::MessageTooLarge { .. }) => {
                    warn!(connection = %self.connection, error = %e, "Skipping oversized line");
                    reply(outbox, ServerMessage::error_with_code(&e.to_string(), "too_large")).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if line.trim().is_empty() {
                continue;
            }

            let msg: ClientMessage = match decode_line(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(connection = %self.connection, error = %e, "Malformed message");
                    reply(outbox, ServerMessage::error_with_code(&e.to_string(), "parse_error")).await?;
                    continue;
                }
            };

            if !msg.is_supported() {
                warn!(
                    connection = %self.connection,
                    client_version = %msg.protocol_version,
                    server_version = %ProtocolVersion::CURRENT,
                    "Protocol version mismatch"
                );
                let err = ConnectionError::VersionMismatch {
                    client: msg.protocol_version,
                    server: ProtocolVersion::CURRENT,
                };
                reply(outbox, ServerMessage::error_with_code(&err.to_string(), "version_mismatch"))
                    .await?;
                continue;
            }

            if self.handle_message(msg.message, outbox).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Handles a single peer message.
    async fn handle_message(
        &mut self,
        message: MessageType,
        outbox: &mpsc::Sender<ServerMessage>,
    ) -> Result<Flow, ConnectionError> {
        let id = self.connection.clone();

        match message {
            MessageType::SignupLock { lock_id } => match text_from_value(&lock_id) {
                Some(lock_id) => {
                    info!(connection = %id, lock_id = %lock_id, "Lock signed up");
                    self.relay.announce_lock(id, lock_id).await?;
                    self.announced = true;
                }
                None => {
                    warn!(connection = %id, "Lock signup without lockId");
                    reply(outbox, ServerMessage::error_with_code("signup_lock requires lockId", "missing_lock_id"))
                        .await?;
                }
            },

            MessageType::SignupClient => {
                debug!(connection = %id, "Observer signed up");
                self.relay.announce_observer(id).await?;
                self.announced = true;
            }

            MessageType::LockStatusChange(raw) => {
                self.relay.telegram(id, raw.to_telegram()).await?;
            }

            MessageType::UnlockRequest => {
                self.relay.control(id, ControlCommand::Unlock).await?;
            }

            MessageType::LockRequest => {
                self.relay.control(id, ControlCommand::Lock).await?;
            }

            MessageType::SndMessage { payload } => {
                self.relay.broadcast(id, payload).await?;
            }

            MessageType::TestNotification => {
                info!(connection = %id, "Test notification requested");
                self.relay.test_notification().await?;
            }

            MessageType::Ping { seq } => {
                reply(outbox, ServerMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(connection = %id, "Peer requested disconnect");
                return Ok(Flow::Close);
            }
        }

        Ok(Flow::Continue)
    }

    /// Reads the next line. Until the peer announces a role, silence longer
    /// than the handshake timeout ends the connection.
    async fn next_line(&mut self) -> Result<String, ConnectionError> {
        if self.announced {
            return self.read_line().await;
        }

        match timeout(self.liveness.handshake_timeout, self.read_line()).await {
            Ok(read) => read,
            Err(_) => {
                debug!(connection = %self.connection, "No role announced in time, closing");
                Err(ConnectionError::HandshakeTimeout)
            }
        }
    }

    /// Reads one line, enforcing the line length limit.
    ///
    /// An oversized line is skipped up to its newline so the stream stays
    /// in sync.
    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        let mut buf = Vec::new();
        let limit = MAX_LINE_BYTES as u64 + 1;

        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if bytes_read as u64 >= limit && buf.last() != Some(&b'\n') {
            let skipped = self.discard_rest_of_line().await?;
            return Err(ConnectionError::MessageTooLarge {
                size: bytes_read + skipped,
                max: MAX_LINE_BYTES,
            });
        }

        String::from_utf8(buf).map_err(|e| ConnectionError::Parse(e.to_string()))
    }

    /// Consumes input up to and including the next newline.
    async fn discard_rest_of_line(&mut self) -> Result<usize, ConnectionError> {
        let mut scratch = Vec::new();
        let mut skipped = 0;

        loop {
            scratch.clear();
            let n = (&mut self.reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut scratch)
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
            skipped += n;

            if n == 0 || scratch.last() == Some(&b'\n') {
                return Ok(skipped);
            }
        }
    }

    /// Returns the connection identifier.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection
    }
}

/// Whether the read loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Queues a direct reply to this connection.
async fn reply(
    outbox: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
) -> Result<(), ConnectionError> {
    outbox
        .send(message)
        .await
        .map_err(|_| ConnectionError::WriterClosed)
}

/// Drains the outbox to the socket until every sender is dropped or a write
/// fails. A heartbeat is written whenever the outbox stays empty for
/// `heartbeat_interval`. A failed write cancels `failed`.
fn spawn_writer(
    connection: ConnectionId,
    writer: OwnedWriteHalf,
    mut inbox: mpsc::Receiver<ServerMessage>,
    heartbeat_interval: Duration,
    failed: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);

        loop {
            let message = match timeout(heartbeat_interval, inbox.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => ServerMessage::Heartbeat,
            };

            if let Err(e) = write_message(&mut writer, &message).await {
                debug!(connection = %connection, error = %e, "Write failed, stopping writer");
                failed.cancel();
                break;
            }
        }

        let _ = writer.shutdown().await;
    })
}

/// Writes one message as a JSON line.
async fn write_message(
    writer: &mut BufWriter<OwnedWriteHalf>,
    message: &ServerMessage,
) -> Result<(), ConnectionError> {
    let line = encode_line(message)?;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("No role announced before the handshake timeout")]
    HandshakeTimeout,

    #[error("Peer stopped accepting writes")]
    WriterClosed,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::TooLarge { size, max } => Self::MessageTooLarge { size, max },
            ProtocolError::Malformed(reason) => Self::Parse(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));
    }

    #[test]
    fn test_message_size_error() {
        let err = ConnectionError::MessageTooLarge {
            size: 70_000,
            max: MAX_LINE_BYTES,
        };
        assert!(err.to_string().contains("70000"));
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err = ConnectionError::from(ProtocolError::Malformed("eof".to_string()));
        assert!(matches!(err, ConnectionError::Parse(_)));

        let err = ConnectionError::from(ProtocolError::TooLarge { size: 2, max: 1 });
        assert!(matches!(err, ConnectionError::MessageTooLarge { size: 2, max: 1 }));
    }

    #[test]
    fn test_liveness_errors_display() {
        assert!(ConnectionError::HandshakeTimeout.to_string().contains("handshake"));
        assert!(ConnectionError::WriterClosed.to_string().contains("writes"));
    }

    #[test]
    fn test_relay_error_conversion() {
        let err = ConnectionError::from(RelayError::ChannelClosed);
        assert!(err.to_string().contains("relay channel closed"));
    }
}
