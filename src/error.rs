//! Error handling.

use std::io;

use thiserror::Error;

use crate::connection::Identity;

/// Result type of all relay operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible relay errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The opening handshake was refused. The socket is closed without upgrading.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// An inbound frame could not be decoded. Fatal for the connection that sent it.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
    /// Input-output error on the underlying socket.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// An inbound frame exceeds the configured frame size limit.
    #[error("message too large: {size} > {max_size}")]
    MessageTooLarge {
        /// The size of the frame payload.
        size: usize,
        /// The maximum allowed payload size.
        max_size: usize,
    },
    /// One recipient of a broadcast is gone. Other recipients are not affected.
    #[error("delivery to {0} failed: connection is gone")]
    Delivery(Identity),
}

/// Reasons to refuse an opening handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The request line or head could not be parsed.
    #[error("invalid request: {0}")]
    Parse(#[from] httparse::Error),
    /// The request head did not end within the configured size.
    #[error("request head exceeds {max_size} bytes")]
    RequestTooLarge {
        /// The configured limit.
        max_size: usize,
    },
    /// The peer closed the socket before sending a complete request.
    #[error("connection closed before the request was complete")]
    Incomplete,
    /// The peer did not finish the request in time.
    #[error("timed out waiting for the request")]
    Timeout,
    /// The header selecting the connection role is absent.
    #[error("missing role header `{0}`")]
    MissingRoleHeader(String),
    /// The role header names neither a client nor a server.
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    /// No `Sec-WebSocket-Key` header in the request.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// The peer answered the client handshake with something other than a valid upgrade.
    #[error("upgrade rejected: {0}")]
    Rejected(String),
}

/// Reasons to reject an inbound frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the declared header, mask key or payload.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required by the declared layout.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// A client frame arrived without a masking key.
    #[error("client frame is not masked")]
    Unmasked,
    /// RSV bits set while no extension is negotiated.
    #[error("reserved bits are non-zero")]
    NonZeroReservedBits,
    /// The 64-bit length has its most significant bit set or does not fit in memory.
    #[error("invalid payload length {0}")]
    InvalidLength(u64),
    /// A continuation or non-final frame. Only single-frame messages are relayed.
    #[error("fragmented messages are not supported")]
    Fragmented,
    /// A control frame with a payload over 125 bytes.
    #[error("control frame payload of {0} bytes")]
    ControlFrameTooBig(usize),
    /// An opcode reserved by RFC 6455.
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
}
