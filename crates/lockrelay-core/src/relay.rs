//! The relay orchestrator.
//!
//! `RelayCore` owns the connection registry and the lock state. Each inbound
//! event is applied in one call to [`RelayCore::handle`], which returns the
//! outbound [`Effect`]s instead of performing them. The caller delivers
//! messages and dispatches notifications after the state mutation is done,
//! so no I/O ever happens while the state is borrowed.

use tracing::{debug, info, warn};

use crate::connection::{ConnectionId, ConnectionRegistry, ObserverRegistration, Role};
use crate::lock::{Connectivity, LockState, PinState, StatusReport};

// ============================================================================
// Inbound
// ============================================================================

/// Remote-control command addressed to the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Unlock,
    Lock,
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlock => write!(f, "unlock"),
            Self::Lock => write!(f, "lock"),
        }
    }
}

/// Two-pin status report from the lock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    /// Device identifier carried in the telegram, if any.
    pub lock_id: Option<String>,
    pub lock_pin: PinState,
    pub unlock_pin: PinState,
}

/// Events delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A transport session opened.
    Connected { connection: ConnectionId },

    /// The session declared itself as the lock.
    LockAnnounced {
        connection: ConnectionId,
        lock_id: String,
    },

    /// The session declared itself as an observer.
    ObserverAnnounced { connection: ConnectionId },

    /// Pin telegram from the session.
    Telegram {
        connection: ConnectionId,
        telegram: Telegram,
    },

    /// Any session asked the lock to lock or unlock.
    ControlRequested {
        connection: ConnectionId,
        command: ControlCommand,
    },

    /// Free-form message to re-broadcast to everyone.
    BroadcastRequested {
        connection: ConnectionId,
        payload: serde_json::Value,
    },

    /// Operator asked for a test push notification.
    TestNotification,

    /// The transport session ended. Delivered exactly once per session.
    Disconnected { connection: ConnectionId },
}

// ============================================================================
// Outbound
// ============================================================================

/// Push notification handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn lock_online() -> Self {
        Self::new("Lock Online", "Lock is now connected")
    }

    pub fn lock_offline() -> Self {
        Self::new("Lock Offline", "Lock is now disconnected")
    }

    pub fn status_change(status: crate::LockStatus) -> Self {
        Self::new("Lock Status Change", format!("Lock is now {status}"))
    }

    pub fn test() -> Self {
        Self::new("Test", "Test message")
    }
}

/// Message content addressed to a single connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Status(StatusReport),
    Control(ControlCommand),
    Broadcast(serde_json::Value),
}

/// Work the caller must carry out after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Deliver {
        to: ConnectionId,
        message: Outbound,
    },
    Notify(Notification),
}

// ============================================================================
// Relay Core
// ============================================================================

/// Connection registry plus lock state, mutated one event at a time.
#[derive(Debug, Default)]
pub struct RelayCore {
    registry: ConnectionRegistry,
    lock_state: LockState,
}

impl RelayCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event and returns the resulting effects in order.
    pub fn handle(&mut self, event: RelayEvent) -> Vec<Effect> {
        match event {
            RelayEvent::Connected { connection } => {
                debug!(connection = %connection, "Connection opened");
                self.registry.connect(connection);
                Vec::new()
            }
            RelayEvent::LockAnnounced {
                connection,
                lock_id,
            } => self.on_lock_announced(connection, lock_id),
            RelayEvent::ObserverAnnounced { connection } => self.on_observer_announced(connection),
            RelayEvent::Telegram {
                connection,
                telegram,
            } => self.on_telegram(&connection, telegram),
            RelayEvent::ControlRequested {
                connection,
                command,
            } => self.on_control(&connection, command),
            RelayEvent::BroadcastRequested {
                connection,
                payload,
            } => {
                debug!(connection = %connection, "Re-broadcasting message to all connections");
                self.deliver_to_all(&Outbound::Broadcast(payload))
            }
            RelayEvent::TestNotification => vec![Effect::Notify(Notification::test())],
            RelayEvent::Disconnected { connection } => self.on_disconnected(&connection),
        }
    }

    /// Current state as observers see it.
    pub fn status_report(&self) -> StatusReport {
        StatusReport::from_snapshot(
            self.registry.current_lock_id().map(str::to_string),
            self.lock_state.snapshot(),
        )
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn lock_state(&self) -> &LockState {
        &self.lock_state
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn on_lock_announced(&mut self, connection: ConnectionId, lock_id: String) -> Vec<Effect> {
        info!(connection = %connection, lock_id = %lock_id, "Lock registered");

        if let Some(previous) = self.registry.register_lock(connection, lock_id) {
            info!(previous = %previous, "Previous lock connection superseded");
        }
        self.lock_state.set_connectivity(Connectivity::Online);

        vec![Effect::Notify(Notification::lock_online())]
    }

    fn on_observer_announced(&mut self, connection: ConnectionId) -> Vec<Effect> {
        match self.registry.register_observer(connection.clone()) {
            ObserverRegistration::RefusedLock => {
                warn!(
                    connection = %connection,
                    "Lock connection announced itself as observer, ignoring"
                );
                return Vec::new();
            }
            ObserverRegistration::Added => info!(
                connection = %connection,
                observers = self.registry.observers().len(),
                "Observer registered"
            ),
            ObserverRegistration::AlreadyObserver => {}
        }

        vec![Effect::Deliver {
            to: connection,
            message: Outbound::Status(self.status_report()),
        }]
    }

    fn on_telegram(&mut self, connection: &ConnectionId, telegram: Telegram) -> Vec<Effect> {
        if self.registry.current_lock_connection_id() != Some(connection) {
            warn!(
                connection = %connection,
                role = %self.registry.role_of(connection),
                "Telegram from a connection that is not the lock, ignoring"
            );
            return Vec::new();
        }

        let outcome = self
            .lock_state
            .evaluate_telegram(telegram.lock_pin, telegram.unlock_pin);

        let registered = self.registry.current_lock_id();
        if let Some(reported) = telegram.lock_id.as_deref().filter(|r| Some(*r) != registered) {
            debug!(
                connection = %connection,
                reported = %reported,
                registered = ?registered,
                "Telegram lockId differs from signup, using the signup id"
            );
        }

        info!(
            lock_id = ?registered,
            status = %outcome.status,
            changed = outcome.changed,
            "Lock status evaluated"
        );

        let report = self.status_report();
        let mut effects = self.deliver_to_observers(&Outbound::Status(report));

        if outcome.changed && outcome.status.is_actionable() {
            effects.push(Effect::Notify(Notification::status_change(outcome.status)));
        }

        effects
    }

    fn on_control(&mut self, connection: &ConnectionId, command: ControlCommand) -> Vec<Effect> {
        match self.registry.current_lock_connection_id() {
            Some(lock) => {
                info!(from = %connection, to = %lock, command = %command, "Forwarding control request");
                vec![Effect::Deliver {
                    to: lock.clone(),
                    message: Outbound::Control(command),
                }]
            }
            None => {
                info!(from = %connection, command = %command, "No lock registered, dropping control request");
                Vec::new()
            }
        }
    }

    fn on_disconnected(&mut self, connection: &ConnectionId) -> Vec<Effect> {
        let departing_lock_id = self
            .registry
            .lock_slot()
            .filter(|slot| &slot.connection == connection)
            .map(|slot| slot.lock_id.clone());

        let role = self.registry.unregister(connection);
        debug!(connection = %connection, role = %role, "Connection closed");

        if role != Role::Lock {
            return Vec::new();
        }

        info!(connection = %connection, lock_id = ?departing_lock_id, "Lock went offline");
        self.lock_state.set_connectivity(Connectivity::Offline);

        let report = StatusReport::from_snapshot(departing_lock_id, self.lock_state.snapshot());
        let mut effects = self.deliver_to_observers(&Outbound::Status(report));
        effects.push(Effect::Notify(Notification::lock_offline()));
        effects
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    fn deliver_to_observers(&self, message: &Outbound) -> Vec<Effect> {
        fan_out(self.registry.observers().iter(), message)
    }

    fn deliver_to_all(&self, message: &Outbound) -> Vec<Effect> {
        fan_out(self.registry.connections(), message)
    }
}

/// One `Deliver` per recipient, in id order so output is deterministic.
fn fan_out<'a>(recipients: impl Iterator<Item = &'a ConnectionId>, message: &Outbound) -> Vec<Effect> {
    let mut recipients: Vec<&ConnectionId> = recipients.collect();
    recipients.sort();
    recipients
        .into_iter()
        .map(|to| Effect::Deliver {
            to: to.clone(),
            message: message.clone(),
        })
        .collect()
}
