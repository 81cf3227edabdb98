//! WebSocket protocol implementation.

use std::{fmt, str::FromStr};

use crate::error::HandshakeError;

pub mod frame;

/// Indicates whether a peer joined the relay as a client or as a server.
///
/// Servers push messages, clients receive every message any server pushes. The role is
/// decided once, from a request header, during the opening handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The peer publishes messages to all clients.
    Server,
    /// The peer receives messages from all servers.
    Client,
}

impl Role {
    /// The header value that selects this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            other => Err(HandshakeError::UnknownRole(other.to_owned())),
        }
    }
}
