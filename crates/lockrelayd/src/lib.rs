//! lockrelay daemon - role registry and lock status broadcast server
//!
//! This crate provides the runtime around `lockrelay-core`:
//! - `relay` - Relay actor that applies every event in sequence
//! - `notify` - Push notification dispatcher (fire-and-forget)
//! - `server` - TCP server and per-connection handlers
//! - `config` - Daemon configuration
//! - `daemon` - PID file, stop signal, and detaching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      lockrelayd                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  events  ┌─────────────────────────┐   │
//! │  │  RelayServer    │─────────▶│      RelayActor         │   │
//! │  │ (TcpListener)   │          │ (registry + lock state) │   │
//! │  └────────┬────────┘          └─────┬─────────────┬─────┘   │
//! │           │ accept                  │ deliver     │ notify  │
//! │           ▼                         ▼             ▼         │
//! │  ┌─────────────────┐       ┌──────────────┐ ┌───────────┐   │
//! │  │ConnectionHandler│◀──────│ per-conn     │ │Dispatcher │   │
//! │  │  (per peer)     │ outbox│ outbox queue │ │  queue    │   │
//! │  └─────────────────┘       └──────────────┘ └───────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod daemon;
pub mod notify;
pub mod relay;
pub mod server;
