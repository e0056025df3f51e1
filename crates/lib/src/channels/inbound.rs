//! Inbound message from the chat network, surfaced to the gateway's activity log.

/// A text message someone sent to the paired account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender chat id (e.g. `6281234@c.us`).
    pub from: String,
    pub text: String,
}
