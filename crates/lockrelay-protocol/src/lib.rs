//! lockrelay protocol - wire format for relay connections
//!
//! This crate provides the message types exchanged between the relay and
//! its peers (the lock device and observing clients), plus lenient parsing
//! of the lock's pin telegrams. Messages are JSON objects, one per line.

pub mod message;
pub mod parse;

pub use message::{ClientMessage, MessageType, ProtocolVersion, ServerMessage};
pub use parse::{decode_line, encode_line, pin_from_value, text_from_value, ProtocolError, RawTelegram, MAX_LINE_BYTES};
