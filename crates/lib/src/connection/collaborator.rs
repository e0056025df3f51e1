//! The chat network as the connection manager sees it: a connector that opens sessions, and
//! session handles that send, log out, and end.
//!
//! Lifecycle signals travel back through an [`EventSink`] bound to the connect attempt that
//! produced them, so signals from a superseded session are recognisable and dropped.

use crate::channels::InboundMessage;
use crate::connection::manager::Input;
use crate::connection::state::DisconnectCause;
use crate::credentials::Credentials;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Asynchronous signal from a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A pairing token the user must scan.
    PairingChallenge(String),
    /// Authenticated and ready to send.
    Open,
    Close(DisconnectCause),
    CredentialsChanged(Credentials),
    MessageReceived(InboundMessage),
}

/// Sender half handed to the collaborator on each connect.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<Input>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::Sender<Input>) -> Self {
        Self { generation, tx }
    }

    /// Connect attempt this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns false once the connection manager has stopped.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(Input::Session {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// A live session with the chat network.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Send a text message to a chat id.
    async fn send(&self, address: &str, content: &str) -> Result<(), String>;
    /// Invalidate the credentials server-side.
    async fn logout(&self) -> Result<(), String>;
    /// Tear the session down locally.
    async fn end(&self) -> Result<(), String>;
}

/// Opens sessions. `credentials` is whatever the store last saved, if anything.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn SessionHandle>, String>;
}
