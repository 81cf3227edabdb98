//! Server handshake.

use bytes::{Buf, BytesMut};
use http::Request as HttpRequest;
use httparse::Status;
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, stream::Stream};
use monoio_codec::{Decoded, Decoder, FramedRead};

use super::{MAX_HEADERS, derive_accept_key, header_map};
use crate::{
    config::RelayConfig,
    error::{Error, HandshakeError, Result},
    protocol::{Role, frame::codec::FrameDecoder},
};

/// Server request type.
pub type Request = HttpRequest<()>;

/// Status line of the upgrade response.
pub const SWITCHING_PROTOCOLS: &str = "HTTP/1.1 101 Web Socket Protocol Handshake";

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// A handshake the server agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Role the peer asked for.
    pub role: Role,
    /// Value of the `Sec-WebSocket-Accept` response header.
    pub accept_key: String,
}

impl Accepted {
    /// Raw bytes of the `101` response completing the upgrade.
    pub fn response(&self) -> Vec<u8> {
        format!(
            "{SWITCHING_PROTOCOLS}\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             Connection: Upgrade\r\n\
             \r\n",
            self.accept_key
        )
        .into_bytes()
    }
}

/// The read side of a socket past a successful handshake.
#[derive(Debug)]
pub struct Upgraded<R> {
    /// Role of the peer.
    pub role: Role,
    /// The opening request.
    pub request: Request,
    /// Framed read half. Bytes the peer sent right after its request are already buffered.
    pub framed: FramedRead<R, FrameDecoder>,
}

/// Performs a server handshake over the two halves of a socket.
///
/// The request is read from `reader` and the reply written to `writer`. A refused
/// handshake is answered with `400 Bad Request` and `writer` is shut down.
pub async fn server_handshake<R, W>(
    reader: R,
    writer: &mut W,
    config: &RelayConfig,
) -> Result<Upgraded<R>>
where
    R: AsyncReadRent,
    W: AsyncWriteRent,
{
    let mut framed = FramedRead::with_capacity(
        reader,
        RequestDecoder::new(config.max_handshake_size),
        config.read_buffer_capacity,
    );

    let outcome = match monoio::time::timeout(config.handshake_timeout, framed.next()).await {
        Ok(Some(Ok((size, request)))) => create_response(&request, &config.role_header)
            .map(|accepted| (size, request, accepted))
            .map_err(Error::from),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Err(HandshakeError::Incomplete.into()),
        Err(_) => Err(HandshakeError::Timeout.into()),
    };

    match outcome {
        Ok((size, request, accepted)) => {
            let (res, _) = writer.write_all(accepted.response()).await;
            res?;
            writer.flush().await?;

            framed.read_buffer_mut().advance(size);
            let decoder = FrameDecoder::new(config.max_frame_size, !config.accept_unmasked_frames);
            Ok(Upgraded {
                role: accepted.role,
                request,
                framed: framed.map_decoder(|_| decoder),
            })
        }

        Err(e) => {
            if matches!(e, Error::Handshake(ref reason) if is_refusal(reason)) {
                let _ = writer.write_all(BAD_REQUEST).await;
            }
            let _ = writer.shutdown().await;
            Err(e)
        }
    }
}

/// Whether the peer is still listening for a response after this failure.
fn is_refusal(reason: &HandshakeError) -> bool {
    !matches!(reason, HandshakeError::Incomplete | HandshakeError::Timeout)
}

/// Picks the role from `role_header` and computes the accept token.
///
/// Fails if the role header is absent or names no role, or if `Sec-WebSocket-Key` is absent.
pub fn create_response(request: &Request, role_header: &str) -> Result<Accepted, HandshakeError> {
    let role = classify(request, role_header)?;

    let key = request
        .headers()
        .get("Sec-WebSocket-Key")
        .ok_or(HandshakeError::MissingKey)?;

    Ok(Accepted {
        role,
        accept_key: derive_accept_key(key.as_bytes()),
    })
}

/// Reads the role a peer asks for from `role_header`.
pub fn classify(request: &Request, role_header: &str) -> Result<Role, HandshakeError> {
    let value = request
        .headers()
        .get(role_header)
        .ok_or_else(|| HandshakeError::MissingRoleHeader(role_header.to_owned()))?;

    value
        .to_str()
        .map_err(|_| HandshakeError::UnknownRole(String::from_utf8_lossy(value.as_bytes()).into()))?
        .parse()
}

/// Parses a request head off the front of `raw`.
///
/// Returns `Ok(None)` if the head is not complete yet, otherwise its length in bytes and
/// the request. Malformed header lines are skipped.
pub fn parse_request(raw: &[u8]) -> Result<Option<(usize, Request)>, HandshakeError> {
    let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut hbuffer);
    let mut parser = httparse::ParserConfig::default();
    parser.ignore_invalid_headers_in_requests(true);

    let size = match parser.parse_request(&mut req, raw)? {
        Status::Partial => return Ok(None),
        Status::Complete(size) => size,
    };

    let mut request = Request::new(());
    if let Some(method) = req
        .method
        .and_then(|m| http::Method::from_bytes(m.as_bytes()).ok())
    {
        *request.method_mut() = method;
    }
    if let Some(uri) = req.path.and_then(|p| p.parse().ok()) {
        *request.uri_mut() = uri;
    }
    // httparse only reads HTTP/1.0 and HTTP/1.1 request lines.
    if req.version == Some(0) {
        *request.version_mut() = http::Version::HTTP_10;
    }
    *request.headers_mut() = header_map(req.headers);

    Ok(Some((size, request)))
}

/// Decoder for Request.
#[derive(Debug, Clone, Copy)]
pub struct RequestDecoder {
    max_size: usize,
}

impl RequestDecoder {
    /// Creates a decoder accepting request heads of up to `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Decoder for RequestDecoder {
    type Item = (usize, Request);
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Decoded<Self::Item>, Self::Error> {
        match parse_request(src)? {
            Some(parsed) => Ok(Decoded::Some(parsed)),
            None if src.len() > self.max_size => Err(HandshakeError::RequestTooLarge {
                max_size: self.max_size,
            }
            .into()),
            None => Ok(Decoded::Insufficient),
        }
    }
}
