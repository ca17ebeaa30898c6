//! Lenient parsing of device telegrams and line framing.
//!
//! Lock firmware is loose about types: pins arrive as numbers, numeric
//! strings, or booleans, and the device id may be a string or a number.
//! Nothing in a telegram is rejected; anything that is not a clear "1"
//! reads as a clear pin, which the lock state maps to `Stuck`.

use lockrelay_core::{PinState, Telegram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum accepted line length in bytes (64 KiB).
pub const MAX_LINE_BYTES: usize = 65_536;

/// Raw telegram JSON as sent by the lock device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTelegram {
    #[serde(rename = "lockId", default)]
    pub lock_id: Value,
    #[serde(rename = "lockPinState", default)]
    pub lock_pin_state: Value,
    #[serde(rename = "unlockPinState", default)]
    pub unlock_pin_state: Value,
}

impl RawTelegram {
    pub fn to_telegram(&self) -> Telegram {
        Telegram {
            lock_id: text_from_value(&self.lock_id),
            lock_pin: pin_from_value(&self.lock_pin_state),
            unlock_pin: pin_from_value(&self.unlock_pin_state),
        }
    }
}

/// Reads a pin level: `1`, `1.0`, `"1"`, and `true` assert; all else is clear.
pub fn pin_from_value(value: &Value) -> PinState {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(level) => PinState::from_level(level),
            None => PinState::from(n.as_f64() == Some(1.0)),
        },
        Value::String(s) => PinState::from(s.trim().parse::<f64>().is_ok_and(|f| f == 1.0)),
        Value::Bool(b) => PinState::from(*b),
        Value::Null | Value::Array(_) | Value::Object(_) => PinState::Clear,
    }
}

/// Reads an identifier that may be sent as a string or a number.
///
/// Empty strings, null, and structured values yield `None`.
pub fn text_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Line Framing
// ============================================================================

/// Errors decoding or encoding a protocol line.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Decodes one JSON line, enforcing [`MAX_LINE_BYTES`].
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge {
            size: line.len(),
            max: MAX_LINE_BYTES,
        });
    }

    serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Encodes a message as one JSON line including the trailing newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut json = serde_json::to_string(message).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    json.push('\n');
    Ok(json)
}
