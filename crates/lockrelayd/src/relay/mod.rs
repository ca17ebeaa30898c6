//! Relay state using the Actor pattern.
//!
//! The relay actor is the single owner of the connection registry and the
//! lock state. Connection handlers talk to it through a `RelayHandle`; it
//! answers by pushing messages into each connection's outbox.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   RelayActor    │────▶│ Outbox (per     │
//! └─────────────────┘     └─────────────────┘     │  connection)    │
//!         │                       │               └─────────────────┘
//!         │   RelayCommand        │   Notification
//!         │   (mpsc channel)      ▼
//!         │               ┌─────────────────┐
//!         │               │   Dispatcher    │
//!         │               └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

use crate::notify::NotificationQueue;

mod actor;
mod commands;
mod handle;

pub use actor::RelayActor;
pub use commands::{Outbox, RelayCommand, RelayError, RelaySummary};
pub use handle::RelayHandle;

/// Channel buffer size for actor commands
const COMMAND_BUFFER: usize = 256;

/// Messages a single connection may have queued before new ones are dropped
pub const OUTBOX_CAPACITY: usize = 64;

/// Spawn the relay actor and return a handle for interaction.
///
/// The actor stops once every handle is dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use lockrelayd::notify::{spawn_dispatcher, LogNotifier, DEFAULT_QUEUE_CAPACITY};
/// use lockrelayd::relay::spawn_relay;
///
/// #[tokio::main]
/// async fn main() {
///     let notifications = spawn_dispatcher(Arc::new(LogNotifier), DEFAULT_QUEUE_CAPACITY);
///     let relay = spawn_relay(notifications);
///
///     let status = relay.status().await;
/// }
/// ```
pub fn spawn_relay(notifications: NotificationQueue) -> RelayHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RelayActor::new(cmd_rx, notifications);
    tokio::spawn(actor.run());

    RelayHandle::new(cmd_tx)
}
