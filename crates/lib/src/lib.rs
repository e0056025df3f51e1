//! Chatgate core library: connection lifecycle, pairing, bridge client and HTTP gateway
//! used by the CLI.

pub mod activity;
pub mod address;
pub mod channels;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod init;
pub mod qr;
