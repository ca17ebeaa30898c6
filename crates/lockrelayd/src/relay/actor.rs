//! Relay actor - owns the registry and lock state and applies events.
//!
//! The RelayActor is the single owner of relay state. It receives commands
//! over an mpsc channel and processes them one at a time, so no two events
//! ever interleave their mutations. Outbound work is handed off without
//! awaiting: messages go into per-connection outboxes with `try_send`,
//! notifications into the dispatcher queue.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Delivery failures are logged but don't panic

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lockrelay_core::{ConnectionId, Effect, Outbound, RelayCore, RelayEvent};
use lockrelay_protocol::ServerMessage;

use super::commands::{Outbox, RelayCommand, RelaySummary};
use crate::notify::NotificationQueue;

/// The relay actor.
///
/// # Ownership
///
/// The actor owns:
/// - `core`: connection registry and lock state
/// - `outboxes`: delivery queue for every attached connection
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct RelayActor {
    /// Command receiver
    receiver: mpsc::Receiver<RelayCommand>,

    /// Registry and lock state
    core: RelayCore,

    /// Outgoing queues keyed by connection
    outboxes: HashMap<ConnectionId, Outbox>,

    /// Push notification dispatcher
    notifications: NotificationQueue,
}

impl RelayActor {
    pub fn new(receiver: mpsc::Receiver<RelayCommand>, notifications: NotificationQueue) -> Self {
        Self {
            receiver,
            core: RelayCore::new(),
            outboxes: HashMap::new(),
            notifications,
        }
    }

    /// Runs the actor event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!("Relay actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(connections = self.outboxes.len(), "Relay actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Attach { connection, outbox } => {
                self.outboxes.insert(connection.clone(), outbox);
                self.apply(RelayEvent::Connected { connection });
            }
            RelayCommand::Apply { event } => {
                let detached = match event.as_ref() {
                    RelayEvent::Disconnected { connection } => Some(connection.clone()),
                    _ => None,
                };

                self.apply(*event);

                if let Some(connection) = detached {
                    self.outboxes.remove(&connection);
                }
            }
            RelayCommand::GetStatus { respond_to } => {
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(self.core.status_report());
            }
            RelayCommand::GetSummary { respond_to } => {
                let registry = self.core.registry();
                let _ = respond_to.send(RelaySummary {
                    connections: registry.len(),
                    observers: registry.observers().len(),
                    lock_connection: registry.current_lock_connection_id().cloned(),
                });
            }
        }
    }

    /// Applies one event to the core and carries out its effects.
    fn apply(&mut self, event: RelayEvent) {
        for effect in self.core.handle(event) {
            match effect {
                Effect::Deliver { to, message } => self.deliver(&to, message),
                Effect::Notify(notification) => {
                    if let Err(e) = self.notifications.enqueue(notification) {
                        warn!(error = %e, "Dropping push notification");
                    }
                }
            }
        }
    }

    /// Queues a message for one connection without waiting.
    fn deliver(&self, to: &ConnectionId, message: Outbound) {
        let Some(outbox) = self.outboxes.get(to) else {
            debug!(connection = %to, "No outbox for connection, dropping message");
            return;
        };

        match outbox.try_send(ServerMessage::from(message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %to, "Outbox full, dropping message for slow peer");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %to, "Outbox closed, peer is going away");
            }
        }
    }

    #[cfg(test)]
    pub fn outbox_count(&self) -> usize {
        self.outboxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{spawn_dispatcher, LogNotifier};
    use lockrelay_core::{Connectivity, LockStatus, PinState, Telegram};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn create_actor() -> RelayActor {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let notifications = spawn_dispatcher(Arc::new(LogNotifier), 16);
        RelayActor::new(cmd_rx, notifications)
    }

    fn attach(actor: &mut RelayActor, id: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(16);
        actor.handle_command(RelayCommand::Attach {
            connection: ConnectionId::new(id),
            outbox: tx,
        });
        rx
    }

    fn apply(actor: &mut RelayActor, event: RelayEvent) {
        actor.handle_command(RelayCommand::Apply {
            event: Box::new(event),
        });
    }

    #[tokio::test]
    async fn test_observer_receives_snapshot_in_outbox() {
        let mut actor = create_actor();
        let mut rx = attach(&mut actor, "o1");

        apply(
            &mut actor,
            RelayEvent::ObserverAnnounced {
                connection: ConnectionId::new("o1"),
            },
        );

        match rx.try_recv().unwrap() {
            ServerMessage::LockStatusChange(report) => {
                assert_eq!(report.lock_status, LockStatus::Unknown);
                assert_eq!(report.connectivity, Connectivity::Offline);
            }
            other => panic!("Expected LockStatusChange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_drops_outbox() {
        let mut actor = create_actor();
        let _rx = attach(&mut actor, "c1");
        assert_eq!(actor.outbox_count(), 1);

        apply(
            &mut actor,
            RelayEvent::Disconnected {
                connection: ConnectionId::new("c1"),
            },
        );

        assert_eq!(actor.outbox_count(), 0);
    }

    #[tokio::test]
    async fn test_full_outbox_does_not_block() {
        let mut actor = create_actor();
        let (tx, _rx) = mpsc::channel(1);
        actor.handle_command(RelayCommand::Attach {
            connection: ConnectionId::new("slow"),
            outbox: tx,
        });
        apply(
            &mut actor,
            RelayEvent::LockAnnounced {
                connection: ConnectionId::new("lock"),
                lock_id: "L1".to_string(),
            },
        );
        apply(
            &mut actor,
            RelayEvent::ObserverAnnounced {
                connection: ConnectionId::new("slow"),
            },
        );

        // Outbox already holds the snapshot; further telegrams are dropped, not awaited
        for _ in 0..3 {
            apply(
                &mut actor,
                RelayEvent::Telegram {
                    connection: ConnectionId::new("lock"),
                    telegram: Telegram {
                        lock_id: None,
                        lock_pin: PinState::Asserted,
                        unlock_pin: PinState::Clear,
                    },
                },
            );
        }

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RelayCommand::GetStatus { respond_to: tx });
        assert_eq!(rx.await.unwrap().lock_status, LockStatus::Locked);
    }

    #[tokio::test]
    async fn test_summary() {
        let mut actor = create_actor();
        let _l = attach(&mut actor, "lock");
        let _o = attach(&mut actor, "o1");
        apply(
            &mut actor,
            RelayEvent::LockAnnounced {
                connection: ConnectionId::new("lock"),
                lock_id: "L1".to_string(),
            },
        );
        apply(
            &mut actor,
            RelayEvent::ObserverAnnounced {
                connection: ConnectionId::new("o1"),
            },
        );

        let (tx, rx) = oneshot::channel();
        actor.handle_command(RelayCommand::GetSummary { respond_to: tx });
        let summary = rx.await.unwrap();

        assert_eq!(summary.connections, 2);
        assert_eq!(summary.observers, 1);
        assert_eq!(summary.lock_connection, Some(ConnectionId::new("lock")));
    }
}
