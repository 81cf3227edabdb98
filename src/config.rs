//! Relay configuration.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::connection::DEFAULT_MAX_QUEUED_BYTES;

/// Port the relay listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 10090;

/// Header whose value (`client` or `server`) selects the role of a peer.
pub const DEFAULT_ROLE_HEADER: &str = "User-Agent";

/// The configuration of a relay server.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RelayConfig {
    /// Address to bind the listener to.
    ///
    /// The default value is `0.0.0.0:10090`.
    pub listen: SocketAddr,
    /// Name of the request header that selects the role of a peer.
    ///
    /// The default value is `User-Agent`.
    pub role_header: String,
    /// Maximum number of live connections. Sockets accepted beyond the bound are closed
    /// before the handshake. `None` means no limit.
    ///
    /// The default value is `None`.
    pub max_connections: Option<usize>,
    /// Time a peer has to send its complete opening request.
    ///
    /// The default value is 10 seconds.
    pub handshake_timeout: Duration,
    /// The maximum size of the opening request head.
    ///
    /// The default value is 8 KiB.
    pub max_handshake_size: usize,
    /// The maximum payload size of a single incoming frame. `None` means no size limit.
    ///
    /// The default value is 16 MiB.
    pub max_frame_size: Option<usize>,
    /// The initial capacity of each connection's read buffer.
    ///
    /// The default value is 4 KiB.
    pub read_buffer_capacity: usize,
    /// Bytes of frames that may wait to be written to one peer. A broadcast that would go
    /// past it evicts the peer. One frame is always accepted into an empty queue.
    ///
    /// The default value is 1 MiB.
    pub max_queued_bytes: usize,
    /// When set to `true`, unmasked frames from peers are accepted.
    ///
    /// RFC 6455 requires the server to fail such connections, so this is `false` by default.
    pub accept_unmasked_frames: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            role_header: DEFAULT_ROLE_HEADER.to_owned(),
            max_connections: None,
            handshake_timeout: Duration::from_secs(10),
            max_handshake_size: 8 * 1024,
            max_frame_size: Some(16 << 20),
            read_buffer_capacity: 4 * 1024,
            max_queued_bytes: DEFAULT_MAX_QUEUED_BYTES,
            accept_unmasked_frames: false,
        }
    }
}

impl RelayConfig {
    /// Sets [`Self::listen`].
    pub fn listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Sets [`Self::role_header`].
    pub fn role_header(mut self, role_header: impl Into<String>) -> Self {
        self.role_header = role_header.into();
        self
    }

    /// Sets [`Self::max_connections`].
    pub fn max_connections(mut self, max_connections: Option<usize>) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Sets [`Self::handshake_timeout`].
    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets [`Self::max_handshake_size`].
    pub fn max_handshake_size(mut self, max_handshake_size: usize) -> Self {
        self.max_handshake_size = max_handshake_size;
        self
    }

    /// Sets [`Self::max_frame_size`].
    pub fn max_frame_size(mut self, max_frame_size: Option<usize>) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Sets [`Self::read_buffer_capacity`].
    pub fn read_buffer_capacity(mut self, read_buffer_capacity: usize) -> Self {
        self.read_buffer_capacity = read_buffer_capacity;
        self
    }

    /// Sets [`Self::max_queued_bytes`].
    pub fn max_queued_bytes(mut self, max_queued_bytes: usize) -> Self {
        self.max_queued_bytes = max_queued_bytes;
        self
    }

    /// Sets [`Self::accept_unmasked_frames`].
    pub fn accept_unmasked_frames(mut self, accept_unmasked_frames: bool) -> Self {
        self.accept_unmasked_frames = accept_unmasked_frames;
        self
    }
}
