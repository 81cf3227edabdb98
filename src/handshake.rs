//! WebSocket handshake control.

pub mod client;
pub mod server;

use http::{HeaderMap, HeaderName, HeaderValue};
use sha1::{Digest, Sha1};

/// Maximum number of header lines read from a handshake.
pub(crate) const MAX_HEADERS: usize = 124;

/// Derives the `Sec-WebSocket-Accept` response header from a `Sec-WebSocket-Key` request header.
pub fn derive_accept_key(request_key: &[u8]) -> String {
    // ... field is constructed by concatenating /key/ ...
    // ... with the string "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(request_key);
    sha1.update(WS_GUID);
    data_encoding::BASE64.encode(&sha1.finalize())
}

/// Collects parsed header lines into a map.
///
/// Header names are case-insensitive. The last of duplicate headers wins, and lines
/// whose name or value is not a valid header are skipped.
pub(crate) fn header_map(raw: &[httparse::Header<'_>]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for header in raw {
        let Ok(name) = HeaderName::from_bytes(header.name.as_bytes()) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_bytes(header.value) else {
            continue;
        };
        headers.insert(name, value);
    }
    headers
}
