//! JSON bodies for the HTTP API.

use crate::activity::ActivityEntry;
use crate::connection::DisconnectCause;
use crate::error::GatewayError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

pub const QR_AVAILABLE: &str = "QR code available. Scan with your phone.";
pub const QR_ALREADY_AUTHENTICATED: &str = "Already authenticated. No QR code needed.";
pub const QR_NOT_READY: &str = "QR code not ready yet. Please wait...";

/// `GET /status` and `GET /info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub status: &'static str,
    pub ready: bool,
    pub qr_available: bool,
    pub qr_expires_in: u64,
    pub connection_attempts: u32,
    pub uptime_seconds: u64,
    pub state: &'static str,
    pub last_disconnect: Option<DisconnectCause>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeBody {
    pub uptime: String,
    pub uptime_seconds: u64,
}

/// `GET /qr`. Token, image and expiry are only present while a challenge is live.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    pub message: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBody {
    pub success: bool,
    pub logs: Vec<ActivityEntry>,
    pub total: usize,
    pub capacity: usize,
    pub connection_attempts: u32,
    pub ready: bool,
}

/// Outcome of an action (send, logout, reconnect, delete-session) and of every error.
#[derive(Debug, Clone, Serialize)]
pub struct ActionBody {
    pub success: bool,
    pub message: String,
}

impl ActionBody {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// `POST /send-message` body. Both fields are required; they are optional here so a missing one
/// maps to a 400 with our own message instead of an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SendMessageRequest {
    /// Non-empty `(phone, message)` or an input error.
    pub fn require(&self) -> Result<(&str, &str), GatewayError> {
        let phone = self.phone.as_deref().map(str::trim).unwrap_or("");
        let message = self.message.as_deref().unwrap_or("");
        if phone.is_empty() || message.trim().is_empty() {
            return Err(GatewayError::input("phone and message are required"));
        }
        Ok((phone, message))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ActionBody::failed(self.to_string()))).into_response()
    }
}

/// `"2h 3m 4s"`.
pub fn format_uptime(seconds: u64) -> String {
    format!(
        "{}h {}m {}s",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3725), "1h 2m 5s");
        assert_eq!(format_uptime(90061), "25h 1m 1s");
    }

    #[test]
    fn send_request_requires_both_fields() {
        let ok: SendMessageRequest =
            serde_json::from_str(r#"{"phone":" 6281234 ","message":"hi"}"#).expect("parse");
        assert_eq!(ok.require(), Ok(("6281234", "hi")));

        let missing: SendMessageRequest =
            serde_json::from_str(r#"{"phone":"6281234"}"#).expect("parse");
        assert!(matches!(missing.require(), Err(GatewayError::Input(_))));

        let blank: SendMessageRequest =
            serde_json::from_str(r#"{"phone":"","message":"hi"}"#).expect("parse");
        assert!(blank.require().is_err());
    }

    #[test]
    fn qr_body_omits_absent_fields() {
        let body = QrBody {
            success: false,
            qr: None,
            qr_image: None,
            expires_in: None,
            message: QR_NOT_READY,
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert!(v.get("qr").is_none());
        assert!(v.get("expiresIn").is_none());
        assert_eq!(v["message"], QR_NOT_READY);
    }

    #[test]
    fn status_body_is_camel_case() {
        let body = StatusBody {
            status: "online",
            ready: false,
            qr_available: true,
            qr_expires_in: 42,
            connection_attempts: 1,
            uptime_seconds: 7,
            state: "awaitingPairing",
            last_disconnect: Some(DisconnectCause::Transient),
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert_eq!(v["qrAvailable"], true);
        assert_eq!(v["qrExpiresIn"], 42);
        assert_eq!(v["lastDisconnect"], "transient");
    }
}
