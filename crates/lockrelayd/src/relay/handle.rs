//! Client interface for interacting with the RelayActor.
//!
//! The `RelayHandle` is a cheap-to-clone interface that connection handlers
//! use to feed events into the relay. Event methods return once the command
//! is queued; they never wait for delivery to other peers.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RelayError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use lockrelay_core::{ConnectionId, ControlCommand, RelayEvent, StatusReport, Telegram};

use super::commands::{Outbox, RelayCommand, RelayError, RelaySummary};

// ============================================================================
// Relay Handle
// ============================================================================

/// Handle for interacting with the relay actor.
///
/// # Usage
///
/// ```ignore
/// let (outbox, mut inbox) = mpsc::channel(OUTBOX_CAPACITY);
/// relay.attach(id.clone(), outbox).await?;
/// relay.announce_observer(id.clone()).await?;
///
/// while let Some(message) = inbox.recv().await {
///     // write message to the peer
/// }
/// ```
#[derive(Clone)]
pub struct RelayHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub fn new(sender: mpsc::Sender<RelayCommand>) -> Self {
        Self { sender }
    }

    /// Registers a new connection with no role.
    ///
    /// Messages addressed to the connection are pushed into `outbox`.
    pub async fn attach(&self, connection: ConnectionId, outbox: Outbox) -> Result<(), RelayError> {
        self.send(RelayCommand::Attach { connection, outbox }).await
    }

    /// The connection declares itself the lock device.
    pub async fn announce_lock(
        &self,
        connection: ConnectionId,
        lock_id: String,
    ) -> Result<(), RelayError> {
        self.apply(RelayEvent::LockAnnounced {
            connection,
            lock_id,
        })
        .await
    }

    /// The connection declares itself an observer.
    pub async fn announce_observer(&self, connection: ConnectionId) -> Result<(), RelayError> {
        self.apply(RelayEvent::ObserverAnnounced { connection }).await
    }

    /// Feeds a pin telegram received on `connection`.
    pub async fn telegram(
        &self,
        connection: ConnectionId,
        telegram: Telegram,
    ) -> Result<(), RelayError> {
        self.apply(RelayEvent::Telegram {
            connection,
            telegram,
        })
        .await
    }

    /// Asks the relay to forward a control command to the lock.
    pub async fn control(
        &self,
        connection: ConnectionId,
        command: ControlCommand,
    ) -> Result<(), RelayError> {
        self.apply(RelayEvent::ControlRequested {
            connection,
            command,
        })
        .await
    }

    /// Re-broadcasts a free-form payload to every connection.
    pub async fn broadcast(
        &self,
        connection: ConnectionId,
        payload: serde_json::Value,
    ) -> Result<(), RelayError> {
        self.apply(RelayEvent::BroadcastRequested {
            connection,
            payload,
        })
        .await
    }

    /// Fires a test push notification.
    pub async fn test_notification(&self) -> Result<(), RelayError> {
        self.apply(RelayEvent::TestNotification).await
    }

    /// Removes the connection from every group and drops its outbox.
    ///
    /// Safe to call for connections that never announced a role.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), RelayError> {
        self.apply(RelayEvent::Disconnected { connection }).await
    }

    /// Current status as an observer would receive it.
    ///
    /// Returns `None` if the actor has shut down.
    pub async fn status(&self) -> Option<StatusReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::GetStatus { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Connection counts and the current lock connection.
    ///
    /// Returns `None` if the actor has shut down.
    pub async fn summary(&self) -> Option<RelaySummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::GetSummary { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn apply(&self, event: RelayEvent) -> Result<(), RelayError> {
        self.send(RelayCommand::Apply {
            event: Box::new(event),
        })
        .await
    }

    async fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }
}
