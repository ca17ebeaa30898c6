//! Relay actor commands and errors.
//!
//! - `RelayCommand`: Commands sent to the actor
//! - `RelayError`: Errors that can occur talking to the actor
//! - `Outbox`: Per-connection queue the actor delivers messages into

use lockrelay_core::{ConnectionId, RelayEvent, StatusReport};
use lockrelay_protocol::ServerMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Sender half of a connection's outgoing message queue.
pub type Outbox = mpsc::Sender<ServerMessage>;

// ============================================================================
// Relay Commands
// ============================================================================

/// Commands sent to the relay actor.
///
/// Events are fire-and-forget: the sender does not wait for the actor to
/// apply them, only for the command to be queued. Queries carry a oneshot
/// channel for the response.
#[derive(Debug)]
pub enum RelayCommand {
    /// A transport session opened. Registers its outbox and tracks it with
    /// no role.
    Attach {
        /// Identifier of the new session
        connection: ConnectionId,
        /// Queue for messages addressed to this session
        outbox: Outbox,
    },

    /// Apply an inbound domain event.
    ///
    /// `RelayEvent::Disconnected` also drops the session's outbox.
    Apply {
        /// The event to apply (boxed to keep the enum small)
        event: Box<RelayEvent>,
    },

    /// Get the current status as an observer would see it.
    GetStatus {
        /// Channel to send the result
        respond_to: oneshot::Sender<StatusReport>,
    },

    /// Get counts and the current lock connection.
    GetSummary {
        /// Channel to send the result
        respond_to: oneshot::Sender<RelaySummary>,
    },
}

/// Point-in-time view of the relay's connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    /// Live connections of any role
    pub connections: usize,
    /// Members of the observer group
    pub observers: usize,
    /// Session currently holding the lock role
    pub lock_connection: Option<ConnectionId>,
}

// ============================================================================
// Relay Errors
// ============================================================================

/// Errors that can occur during relay operations.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// The actor's channel is closed.
    ///
    /// This typically indicates the actor was shut down.
    #[error("relay channel closed")]
    ChannelClosed,
}
