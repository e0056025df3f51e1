//! Connection states and disconnect causes.

use serde::Serialize;
use std::fmt;

/// Why a session closed. Drives the reconnect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectCause {
    /// Credentials were invalidated; only a new pairing recovers.
    LoggedOut,
    /// Network or transport trouble that a retry can fix.
    Transient,
    /// A pairing challenge went unscanned.
    PairingExpired,
    Unknown,
}

impl DisconnectCause {
    pub const ALL: [DisconnectCause; 4] = [
        DisconnectCause::LoggedOut,
        DisconnectCause::Transient,
        DisconnectCause::PairingExpired,
        DisconnectCause::Unknown,
    ];

    /// Classify a reason string reported by the chat network.
    pub fn from_reason(reason: &str) -> Self {
        let r = reason.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match r.as_str() {
            "LOGOUT" | "LOGGED_OUT" | "UNPAIRED" | "AUTH_FAILURE" | "BANNED" => {
                DisconnectCause::LoggedOut
            }
            "QR_EXPIRED" | "PAIRING_TIMEOUT" | "PAIRING_EXPIRED" => {
                DisconnectCause::PairingExpired
            }
            "CONNECTION_LOST" | "CONNECTION_CLOSED" | "TIMEOUT" | "TIMED_OUT" | "NETWORK"
            | "CONFLICT" | "NAVIGATION" | "RESTART_REQUIRED" => DisconnectCause::Transient,
            _ => DisconnectCause::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectCause::LoggedOut => "loggedOut",
            DisconnectCause::Transient => "transient",
            DisconnectCause::PairingExpired => "pairingExpired",
            DisconnectCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the single chat-network session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    AwaitingPairing,
    Ready,
    /// Tearing down the session for a logout, delete, or forced reconnect.
    Closing,
    Disconnected(DisconnectCause),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingPairing => "awaitingPairing",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Disconnected(_) => "disconnected",
        }
    }

    /// States in which a session attempt is in flight or established.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::AwaitingPairing | ConnectionState::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(cause) => write!(f, "disconnected({})", cause),
            other => f.write_str(other.name()),
        }
    }
}
