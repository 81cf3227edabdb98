//! Client handshake.

use bytes::{Buf, BytesMut};
use http::HeaderMap;
use httparse::Status;
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, stream::Stream};
use monoio_codec::{Decoded, Decoder, FramedRead};

use super::{MAX_HEADERS, derive_accept_key, header_map};
use crate::{
    error::{Error, HandshakeError, Result},
    protocol::{Role, frame::codec::FrameDecoder},
};

/// Generates a random key for the `Sec-WebSocket-Key` header.
pub fn generate_key() -> String {
    // a base64-encoded (see Section 4 of [RFC4648]) value that,
    // when decoded, is 16 bytes in length (RFC 6455)
    let r: [u8; 16] = rand::random();
    data_encoding::BASE64.encode(&r)
}

/// Builds the opening request of a peer joining the relay with `role`.
pub fn build_request(host: &str, role: Role, role_header: &str, key: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}\r\n\
         {role_header}: {role}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         \r\n"
    )
}

/// Status code and headers of a handshake response.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Performs a client handshake over `stream`.
///
/// Returns the framed socket, ready to read server frames, and the verified response.
pub async fn client_handshake<S>(
    stream: S,
    host: &str,
    role: Role,
    role_header: &str,
) -> Result<(FramedRead<S, FrameDecoder>, Response)>
where
    S: AsyncReadRent + AsyncWriteRent,
{
    let key = generate_key();
    let mut framed = FramedRead::new(stream, ResponseDecoder);

    let request = build_request(host, role, role_header, &key).into_bytes();
    let (res, _) = framed.get_mut().write_all(request).await;
    res?;
    framed.get_mut().flush().await?;

    match framed.next().await {
        Some(Ok((size, response))) => {
            verify_response(&response, &key)?;
            framed.read_buffer_mut().advance(size);
            let framed = framed.map_decoder(|_| FrameDecoder::new(None, false));
            Ok((framed, response))
        }

        Some(Err(e)) => Err(e),

        None => Err(HandshakeError::Incomplete.into()),
    }
}

fn verify_response(response: &Response, key: &str) -> Result<(), HandshakeError> {
    if response.status != 101 {
        return Err(HandshakeError::Rejected(format!(
            "status {}",
            response.status
        )));
    }

    let expected = derive_accept_key(key.as_bytes());
    match response.headers.get("Sec-WebSocket-Accept") {
        Some(accept) if accept.as_bytes() == expected.as_bytes() => Ok(()),
        Some(_) => Err(HandshakeError::Rejected(
            "Sec-WebSocket-Accept mismatch".into(),
        )),
        None => Err(HandshakeError::Rejected(
            "missing Sec-WebSocket-Accept".into(),
        )),
    }
}

/// Decoder for a handshake response head.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseDecoder;

impl Decoder for ResponseDecoder {
    type Item = (usize, Response);
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Decoded<Self::Item>, Self::Error> {
        let mut hbuffer = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut hbuffer);

        Ok(match resp.parse(src).map_err(HandshakeError::from)? {
            Status::Partial => Decoded::Insufficient,
            Status::Complete(size) => Decoded::Some((
                size,
                Response {
                    status: resp.code.unwrap_or_default(),
                    headers: header_map(resp.headers),
                },
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_keys() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1, k2);
        assert_eq!(k1.len(), 24);
        assert!(k1.ends_with("=="));
    }

    #[test]
    fn request_carries_role() {
        let request = build_request("localhost:10090", Role::Server, "User-Agent", "abc");
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("\r\nUser-Agent: server\r\n"));
        assert!(request.contains("\r\nSec-WebSocket-Key: abc\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn response_verification() {
        const DATA: &[u8] = b"\
            HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
            Upgrade: websocket\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            Connection: Upgrade\r\n\
            \r\n\x81\x00";
        let mut buf = BytesMut::from(DATA);
        let Decoded::Some((size, response)) = ResponseDecoder.decode(&mut buf).unwrap() else {
            panic!("response not decoded");
        };
        assert_eq!(size, DATA.len() - 2);
        verify_response(&response, "dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        assert!(matches!(
            verify_response(&response, "AQIDBAUGBwgJCgsMDQ4PEC=="),
            Err(HandshakeError::Rejected(_))
        ));
    }

    #[test]
    fn rejected_upgrade() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n"[..]);
        let Decoded::Some((_, response)) = ResponseDecoder.decode(&mut buf).unwrap() else {
            panic!("response not decoded");
        };
        assert!(matches!(
            verify_response(&response, "x"),
            Err(HandshakeError::Rejected(reason)) if reason == "status 400"
        ));
    }
}
