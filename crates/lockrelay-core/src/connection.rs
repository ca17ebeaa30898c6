//! Connection identities, roles, and the connection registry.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Opaque identifier for one live transport session.
///
/// Stable for the lifetime of the session. The daemon assigns these as
/// `conn-<n>` but nothing in the core depends on the format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new ConnectionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a connection holds in the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Connected but has not declared itself yet.
    #[default]
    Unassigned,
    /// The single connection representing the physical lock.
    Lock,
    /// A monitoring client.
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => write!(f, "unassigned"),
            Self::Lock => write!(f, "lock"),
            Self::Observer => write!(f, "observer"),
        }
    }
}

// ============================================================================
// Observer Group
// ============================================================================

/// Unordered set of connections that receive lock status broadcasts.
#[derive(Debug, Clone, Default)]
pub struct ObserverGroup {
    members: HashSet<ConnectionId>,
}

impl ObserverGroup {
    /// Adds a member. Returns `true` if it was not already present.
    pub fn add(&mut self, id: ConnectionId) -> bool {
        self.members.insert(id)
    }

    /// Removes a member. Returns `true` if it was present.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.members.remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// ============================================================================
// Connection Registry
// ============================================================================

/// The connection currently holding the lock role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSlot {
    /// Transport session of the lock.
    pub connection: ConnectionId,
    /// Identifier the device announced for itself.
    pub lock_id: String,
}

/// Outcome of [`ConnectionRegistry::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverRegistration {
    /// Newly joined the observer group.
    Added,
    /// Was already an observer; nothing changed.
    AlreadyObserver,
    /// The connection holds the lock role and keeps it.
    RefusedLock,
}

/// Tracks every live connection and the role it holds.
///
/// At most one connection holds [`Role::Lock`] at any time. Registering a
/// second lock supersedes the first: the old connection drops back to
/// [`Role::Unassigned`] but stays tracked until its transport disconnects.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Role>,
    lock: Option<LockSlot>,
    observers: ObserverGroup,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a connection with no role. No-op if already tracked.
    pub fn connect(&mut self, id: ConnectionId) {
        self.connections.entry(id).or_default();
    }

    /// Gives `id` the lock role.
    ///
    /// Returns the connection that was superseded, if the role was held by
    /// a different connection.
    pub fn register_lock(&mut self, id: ConnectionId, lock_id: impl Into<String>) -> Option<ConnectionId> {
        let superseded = match self.lock.take() {
            Some(previous) if previous.connection != id => {
                if let Some(role) = self.connections.get_mut(&previous.connection) {
                    *role = Role::Unassigned;
                }
                debug!(
                    previous = %previous.connection,
                    next = %id,
                    "Lock role superseded"
                );
                Some(previous.connection)
            }
            _ => None,
        };

        self.observers.remove(&id);
        self.connections.insert(id.clone(), Role::Lock);
        self.lock = Some(LockSlot {
            connection: id,
            lock_id: lock_id.into(),
        });

        superseded
    }

    /// Adds `id` to the observer group. Idempotent.
    ///
    /// The current lock connection cannot demote itself; its lock slot
    /// would otherwise point at an observer.
    pub fn register_observer(&mut self, id: ConnectionId) -> ObserverRegistration {
        if self.role_of(&id) == Role::Lock {
            return ObserverRegistration::RefusedLock;
        }

        self.connections.insert(id.clone(), Role::Observer);
        if self.observers.add(id) {
            ObserverRegistration::Added
        } else {
            ObserverRegistration::AlreadyObserver
        }
    }

    /// Forgets a connection and returns the role it held.
    ///
    /// Unknown ids are a no-op returning [`Role::Unassigned`]. Removing the
    /// lock connection vacates the lock slot.
    pub fn unregister(&mut self, id: &ConnectionId) -> Role {
        let role = self.connections.remove(id).unwrap_or_default();

        match role {
            Role::Lock => {
                if self.lock.as_ref().is_some_and(|slot| &slot.connection == id) {
                    self.lock = None;
                }
            }
            Role::Observer => {
                self.observers.remove(id);
            }
            Role::Unassigned => {}
        }

        role
    }

    pub fn current_lock_connection_id(&self) -> Option<&ConnectionId> {
        self.lock.as_ref().map(|slot| &slot.connection)
    }

    /// Identifier announced by the current lock device.
    pub fn current_lock_id(&self) -> Option<&str> {
        self.lock.as_ref().map(|slot| slot.lock_id.as_str())
    }

    pub fn lock_slot(&self) -> Option<&LockSlot> {
        self.lock.as_ref()
    }

    /// Role of a connection; untracked connections report `Unassigned`.
    pub fn role_of(&self, id: &ConnectionId) -> Role {
        self.connections.get(id).copied().unwrap_or_default()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn observers(&self) -> &ObserverGroup {
        &self.observers
    }

    /// Every live connection regardless of role.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.connections.keys()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
