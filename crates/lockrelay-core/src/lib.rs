//! lockrelay core - connection roles and lock state
//!
//! This crate holds the pure domain of the relay: which connection is the
//! lock, which are observers, how pin telegrams map to a lock status, and
//! which messages each inbound event produces. It performs no I/O; the
//! daemon (`lockrelayd`) drives it and carries out the returned effects.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod lock;
pub mod relay;

// Re-exports for convenience
pub use connection::{
    ConnectionId, ConnectionRegistry, LockSlot, ObserverGroup, ObserverRegistration, Role,
};
pub use lock::{
    derive_status, Connectivity, LockSnapshot, LockState, LockStatus, PinState, StatusReport,
    TelegramOutcome,
};
pub use relay::{ControlCommand, Effect, Notification, Outbound, RelayCore, RelayEvent, Telegram};
