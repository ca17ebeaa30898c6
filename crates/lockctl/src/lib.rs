//! lockctl - command-line client for the lockrelay daemon.
//!
//! Connects to the relay like an observer UI does: announce, watch status
//! broadcasts, and send lock/unlock requests or free-form messages.
//!
//! - `client` - TCP connection with retry and JSON line framing
//! - `display` - One-line rendering of relay messages
//! - `error` - Client error type

pub mod client;
pub mod display;
pub mod error;

pub use client::{ClientConfig, RelayClient};
pub use display::{describe, is_keepalive};
pub use error::{ClientError, Result};
