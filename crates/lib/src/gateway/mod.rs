//! Gateway: HTTP control plane over the connection manager.
//!
//! Status and pairing reads come from the published snapshot and never wait on the session;
//! sends and session actions go through the manager.

mod api;
mod server;

pub use api::{
    format_uptime, ActionBody, ActivityBody, QrBody, SendMessageRequest, StatusBody, UptimeBody,
};
pub use server::{run_gateway, run_gateway_with, GatewayState};
