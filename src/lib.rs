//! Minimal WebSocket relay for the [`monoio`](https://github.com/bytedance/monoio) runtime.
//!
//! Peers join as clients or servers, picked from a request header during the opening
//! handshake. Every text message a server sends is relayed to all connected clients.

#![deny(
    missing_docs,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub mod error;
pub use error::{Error, Result};

pub mod client;
pub mod config;
pub mod connection;
pub mod handler;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod server;

// re-export bytes since used in the registry API.
pub use bytes::Bytes;

pub use crate::{
    client::{RelayClient, connect, connect_with},
    config::RelayConfig,
    connection::{ConnectionHandle, Identity},
    handler::relay_message,
    protocol::Role,
    registry::{BroadcastReport, Registry},
    server::Server,
};
