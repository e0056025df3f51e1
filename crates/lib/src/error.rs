//! Errors surfaced by gateway operations.
//!
//! Connection-lifecycle failures never reach callers as errors; they are absorbed by the
//! connection manager and show up in the activity log and status snapshot instead.

/// Failure of a caller-initiated operation (send, logout, credential access).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Missing or malformed request input. Never retried.
    #[error("{0}")]
    Input(String),

    /// The session is not `Ready`; the caller should retry later.
    #[error("client is not ready yet")]
    NotReady,

    /// An action needs a live session and there is none.
    #[error("no active session")]
    NoSession,

    /// The chat network or bridge rejected or failed the request.
    #[error("{0}")]
    Transport(String),

    /// Loading, saving, or wiping credentials failed.
    #[error("credential storage: {0}")]
    Storage(String),
}

impl GatewayError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// HTTP status the gateway answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Input(_) | GatewayError::NoSession => 400,
            GatewayError::NotReady => 503,
            GatewayError::Transport(_) | GatewayError::Storage(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_http_status() {
        assert_eq!(GatewayError::input("phone is required").status_code(), 400);
        assert_eq!(GatewayError::NoSession.status_code(), 400);
        assert_eq!(GatewayError::NotReady.status_code(), 503);
        assert_eq!(GatewayError::Transport("boom".into()).status_code(), 500);
        assert_eq!(GatewayError::Storage("disk full".into()).status_code(), 500);
    }
}
