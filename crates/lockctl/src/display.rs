//! Human-readable rendering of relay messages.

use lockrelay_core::Connectivity;
use lockrelay_protocol::ServerMessage;

/// One line describing a message from the relay.
pub fn describe(message: &ServerMessage) -> String {
    match message {
        ServerMessage::LockStatusChange(report) => {
            let connectivity = match report.connectivity {
                Connectivity::Online => "online",
                Connectivity::Offline => "offline",
            };
            format!(
                "[{}] lock {} is {} ({})",
                report.updated_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
                report.lock_id.as_deref().unwrap_or("-"),
                report.lock_status,
                connectivity,
            )
        }
        ServerMessage::UnlockRequest => "unlock requested".to_string(),
        ServerMessage::LockRequest => "lock requested".to_string(),
        ServerMessage::Message { payload } => match payload.as_str() {
            Some(text) => format!("message: {text}"),
            None => format!("message: {payload}"),
        },
        ServerMessage::Pong { seq } => format!("pong {seq}"),
        ServerMessage::Heartbeat => "heartbeat".to_string(),
        ServerMessage::Error { message, code } => match code {
            Some(code) => format!("error [{code}]: {message}"),
            None => format!("error: {message}"),
        },
    }
}

/// Liveness traffic that `watch` does not print.
pub fn is_keepalive(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::Heartbeat | ServerMessage::Pong { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockrelay_core::{LockStatus, StatusReport};
    use serde_json::json;

    #[test]
    fn test_describe_status() {
        let report: StatusReport = serde_json::from_value(json!({
            "lockId": "L1",
            "lock_status": "LOCKED",
            "lockStatusUpdatedTime": "2024-03-09T08:30:00.000Z",
            "lockConnectionStatus": "ONLINE"
        }))
        .unwrap();
        assert_eq!(report.lock_status, LockStatus::Locked);

        let line = describe(&ServerMessage::LockStatusChange(report));
        assert_eq!(line, "[2024-03-09 08:30:00.000 UTC] lock L1 is LOCKED (online)");
    }

    #[test]
    fn test_describe_message_payloads() {
        let text = ServerMessage::Message { payload: json!("hi") };
        assert_eq!(describe(&text), "message: hi");

        let object = ServerMessage::Message { payload: json!({"a": 1}) };
        assert_eq!(describe(&object), "message: {\"a\":1}");
    }

    #[test]
    fn test_keepalive_traffic() {
        assert!(is_keepalive(&ServerMessage::Heartbeat));
        assert!(is_keepalive(&ServerMessage::pong(3)));
        assert!(!is_keepalive(&ServerMessage::UnlockRequest));
        assert!(!is_keepalive(&ServerMessage::error("bad")));
    }

    #[test]
    fn test_describe_error() {
        assert_eq!(
            describe(&ServerMessage::error_with_code("bad", "parse_error")),
            "error [parse_error]: bad"
        );
    }
}
