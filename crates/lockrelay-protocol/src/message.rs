//! Protocol message types for relay communication.

use std::fmt;

use crate::parse::RawTelegram;
use lockrelay_core::{ControlCommand, Outbound, StatusReport};
use serde::{Deserialize, Serialize};

/// `{major, minor}` carried by every client message.
///
/// The relay serves any client with its own major version. Minor bumps only
/// add optional fields and message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

/// Lock firmware predates versioning and sends none.
impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Message types that peers send to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// First message of a lock device connection
    SignupLock {
        /// Device identifier (string or number on the wire)
        #[serde(rename = "lockId", default)]
        lock_id: serde_json::Value,
    },

    /// First message of an observer connection
    SignupClient,

    /// Pin telegram from the lock device
    LockStatusChange(RawTelegram),

    /// Ask the lock to unlock
    UnlockRequest,

    /// Ask the lock to lock
    LockRequest,

    /// Free-form message for everyone connected
    SndMessage {
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Fire a test push notification
    TestNotification,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Peer disconnecting gracefully
    Disconnect,
}

/// Messages sent from peers to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Whether this relay can serve the sender's protocol version.
    pub fn is_supported(&self) -> bool {
        self.protocol_version.major == ProtocolVersion::CURRENT.major
    }

    pub fn signup_lock(lock_id: impl Into<String>) -> Self {
        Self::new(MessageType::SignupLock {
            lock_id: serde_json::Value::String(lock_id.into()),
        })
    }

    pub fn signup_client() -> Self {
        Self::new(MessageType::SignupClient)
    }

    /// Creates a telegram with numeric pin levels.
    pub fn lock_status_change(lock_id: impl Into<String>, lock_pin: u8, unlock_pin: u8) -> Self {
        Self::new(MessageType::LockStatusChange(RawTelegram {
            lock_id: serde_json::Value::String(lock_id.into()),
            lock_pin_state: serde_json::Value::from(lock_pin),
            unlock_pin_state: serde_json::Value::from(unlock_pin),
        }))
    }

    pub fn control(command: ControlCommand) -> Self {
        match command {
            ControlCommand::Unlock => Self::new(MessageType::UnlockRequest),
            ControlCommand::Lock => Self::new(MessageType::LockRequest),
        }
    }

    pub fn snd_message(payload: serde_json::Value) -> Self {
        Self::new(MessageType::SndMessage { payload })
    }

    pub fn test_notification() -> Self {
        Self::new(MessageType::TestNotification)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from the relay to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current lock status (to observers)
    LockStatusChange(StatusReport),

    /// Forwarded unlock request (to the lock)
    UnlockRequest,

    /// Forwarded lock request (to the lock)
    LockRequest,

    /// Re-broadcast free-form message (to everyone)
    Message {
        payload: serde_json::Value,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Written when a connection has had no traffic for a while, so a
    /// vanished peer shows up as a failed write
    Heartbeat,

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

impl From<Outbound> for ServerMessage {
    fn from(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Status(report) => Self::LockStatusChange(report),
            Outbound::Control(ControlCommand::Unlock) => Self::UnlockRequest,
            Outbound::Control(ControlCommand::Lock) => Self::LockRequest,
            Outbound::Broadcast(payload) => Self::Message { payload },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lockrelay_core::{Connectivity, LockStatus};
    use serde_json::json;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
    }

    #[test]
    fn test_signup_lock_from_firmware_json() {
        // Firmware sends no protocol_version
        let parsed: ClientMessage =
            serde_json::from_value(json!({"type": "signup_lock", "lockId": "L1"})).unwrap();

        assert_eq!(parsed.protocol_version, ProtocolVersion::CURRENT);
        assert_eq!(
            parsed.message,
            MessageType::SignupLock {
                lock_id: json!("L1")
            }
        );
    }

    #[test]
    fn test_telegram_from_firmware_json() {
        let parsed: ClientMessage = serde_json::from_value(json!({
            "type": "lock_status_change",
            "lockId": "L1",
            "lockPinState": 1,
            "unlockPinState": 0
        }))
        .unwrap();

        match parsed.message {
            MessageType::LockStatusChange(raw) => {
                assert_eq!(raw.lock_pin_state, json!(1));
                assert_eq!(raw.unlock_pin_state, json!(0));
            }
            other => panic!("Expected LockStatusChange, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_requests() {
        let unlock: ClientMessage = serde_json::from_str(r#"{"type":"unlock_request"}"#).unwrap();
        let lock: ClientMessage = serde_json::from_str(r#"{"type":"lock_request"}"#).unwrap();

        assert_eq!(unlock.message, MessageType::UnlockRequest);
        assert_eq!(lock.message, MessageType::LockRequest);
        assert_eq!(ClientMessage::control(ControlCommand::Unlock), unlock);
    }

    #[test]
    fn test_status_broadcast_shape() {
        let report = StatusReport {
            lock_id: Some("L1".to_string()),
            lock_status: LockStatus::Locked,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).single().unwrap(),
            connectivity: Connectivity::Online,
        };

        let json = serde_json::to_value(ServerMessage::LockStatusChange(report)).unwrap();

        assert_eq!(
            json,
            json!({
                "type": "lock_status_change",
                "lockId": "L1",
                "lock_status": "LOCKED",
                "lockStatusUpdatedTime": "2024-03-09T08:30:00.000Z",
                "lockConnectionStatus": "ONLINE"
            })
        );
    }

    #[test]
    fn test_outbound_mapping() {
        assert_eq!(
            ServerMessage::from(Outbound::Control(ControlCommand::Lock)),
            ServerMessage::LockRequest
        );
        assert_eq!(
            ServerMessage::from(Outbound::Broadcast(json!("hi"))),
            ServerMessage::Message { payload: json!("hi") }
        );
    }

    #[test]
    fn test_missing_version_is_current() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"signup_client"}"#).unwrap();
        assert_eq!(msg.protocol_version, ProtocolVersion::CURRENT);
        assert!(msg.is_supported());
    }

    #[test]
    fn test_minor_version_skew_supported() {
        let newer: ClientMessage = serde_json::from_value(json!({
            "type": "ping",
            "seq": 1,
            "protocol_version": {"major": 1, "minor": 7}
        }))
        .unwrap();
        assert_eq!(newer.protocol_version, ProtocolVersion::new(1, 7));
        assert!(newer.is_supported());
    }

    #[test]
    fn test_major_version_mismatch_unsupported() {
        let msg = ClientMessage {
            protocol_version: ProtocolVersion::new(2, 0),
            message: MessageType::SignupClient,
        };
        assert!(!msg.is_supported());
        assert_eq!(msg.protocol_version.to_string(), "2.0");
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let json = serde_json::to_value(ServerMessage::Heartbeat).unwrap();
        assert_eq!(json, json!({"type": "heartbeat"}));
    }

    #[test]
    fn test_error_code_omitted_when_absent() {
        let json = serde_json::to_string(&ServerMessage::error("bad")).unwrap();
        assert!(!json.contains("code"));

        let json = serde_json::to_string(&ServerMessage::error_with_code("bad", "E1")).unwrap();
        assert!(json.contains("\"code\":\"E1\""));
    }
}
