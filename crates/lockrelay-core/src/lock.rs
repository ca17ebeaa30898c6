//! Lock status derivation and the process-wide lock state.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ============================================================================
// Value Types
// ============================================================================

/// Canonical lock status derived from pin telegrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    /// No telegram has been evaluated yet.
    #[default]
    Unknown,
    Locked,
    Unlocked,
    /// Pins are contradictory (both asserted) or indeterminate (both clear).
    Stuck,
}

impl LockStatus {
    /// Whether a transition into this status is worth a push notification.
    ///
    /// `Stuck` is a fault signal for live observers only.
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Locked | Self::Unlocked)
    }

    /// Upper-case label used on the wire and in notification bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Locked => "LOCKED",
            Self::Unlocked => "UNLOCKED",
            Self::Stuck => "STUCK",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a lock connection is currently registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Connectivity {
    Online,
    #[default]
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Level of one sense pin in a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinState {
    #[default]
    Clear,
    Asserted,
}

impl PinState {
    /// Maps a raw numeric level: only `1` asserts the pin.
    pub fn from_level(level: i64) -> Self {
        if level == 1 {
            Self::Asserted
        } else {
            Self::Clear
        }
    }
}

impl From<bool> for PinState {
    fn from(asserted: bool) -> Self {
        if asserted {
            Self::Asserted
        } else {
            Self::Clear
        }
    }
}

/// Derives the canonical status from a pin pair.
///
/// | lock pin | unlock pin | status   |
/// |----------|------------|----------|
/// | 1        | 0          | Locked   |
/// | 0        | 1          | Unlocked |
/// | other    |            | Stuck    |
pub fn derive_status(lock_pin: PinState, unlock_pin: PinState) -> LockStatus {
    match (lock_pin, unlock_pin) {
        (PinState::Asserted, PinState::Clear) => LockStatus::Locked,
        (PinState::Clear, PinState::Asserted) => LockStatus::Unlocked,
        _ => LockStatus::Stuck,
    }
}

// ============================================================================
// Lock State
// ============================================================================

/// Result of evaluating one telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelegramOutcome {
    pub status: LockStatus,
    /// Whether `status` differs from the value before this telegram.
    pub changed: bool,
}

/// Read-only copy of the lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    pub status: LockStatus,
    pub status_updated_at: DateTime<Utc>,
    pub connectivity: Connectivity,
}

/// Current lock status, its last evaluation time, and lock connectivity.
///
/// Only the current value is kept; there is no history.
#[derive(Debug, Clone)]
pub struct LockState {
    status: LockStatus,
    status_updated_at: DateTime<Utc>,
    connectivity: Connectivity,
}

impl LockState {
    /// Timestamp reported before any telegram has been evaluated.
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn new() -> Self {
        Self {
            status: LockStatus::Unknown,
            status_updated_at: Self::epoch(),
            connectivity: Connectivity::Offline,
        }
    }

    /// Evaluates a telegram against the wall clock.
    pub fn evaluate_telegram(&mut self, lock_pin: PinState, unlock_pin: PinState) -> TelegramOutcome {
        self.evaluate_telegram_at(lock_pin, unlock_pin, Utc::now())
    }

    /// Evaluates a telegram as of `now`.
    ///
    /// The timestamp is refreshed on every call, even when the status is
    /// unchanged, and never moves backwards or stands still: a `now` at or
    /// before the previous value is bumped one microsecond past it.
    pub fn evaluate_telegram_at(
        &mut self,
        lock_pin: PinState,
        unlock_pin: PinState,
        now: DateTime<Utc>,
    ) -> TelegramOutcome {
        let status = derive_status(lock_pin, unlock_pin);
        let changed = status != self.status;

        self.status = status;
        self.status_updated_at = if now > self.status_updated_at {
            now
        } else {
            self.status_updated_at + Duration::microseconds(1)
        };

        debug!(
            status = %status,
            changed,
            updated_at = %self.status_updated_at,
            "Telegram evaluated"
        );

        TelegramOutcome { status, changed }
    }

    pub fn set_connectivity(&mut self, connectivity: Connectivity) {
        self.connectivity = connectivity;
    }

    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            status: self.status,
            status_updated_at: self.status_updated_at,
            connectivity: self.connectivity,
        }
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Status Report (wire view)
// ============================================================================

/// Lock status as broadcast to observers.
///
/// Field names match what deployed clients already read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "lockId", default, skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<String>,

    pub lock_status: LockStatus,

    #[serde(rename = "lockStatusUpdatedTime", with = "rfc3339_millis")]
    pub updated_at: DateTime<Utc>,

    #[serde(rename = "lockConnectionStatus")]
    pub connectivity: Connectivity,
}

impl StatusReport {
    pub fn from_snapshot(lock_id: Option<String>, snapshot: LockSnapshot) -> Self {
        Self {
            lock_id,
            lock_status: snapshot.status,
            updated_at: snapshot.status_updated_at,
            connectivity: snapshot.connectivity,
        }
    }
}

/// RFC 3339 UTC timestamps with millisecond precision (`...T00:00:00.000Z`).
mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
