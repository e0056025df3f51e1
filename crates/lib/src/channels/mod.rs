//! Chat-network collaborators.
//!
//! The bridge connector speaks to a sidecar process that runs the network client and relays
//! its lifecycle over WebSocket. Inbound messages are delivered to the connection manager.

mod bridge;
mod inbound;
mod protocol;

pub use bridge::{event_to_session, BridgeConnector};
pub use inbound::InboundMessage;
pub use protocol::{BridgeFrame, BridgeRequest};
