//! A relay peer: joins as a client or a server, sends text and reads relayed text.

use std::net::SocketAddr;

use bytes::BytesMut;
use monoio::{
    io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, stream::Stream},
    net::TcpStream,
};
use monoio_codec::FramedRead;

use crate::{
    config::DEFAULT_ROLE_HEADER,
    error::Result,
    handshake::client::{Response, client_handshake},
    protocol::{
        Role,
        frame::{
            Frame,
            codec::{FrameDecoder, FrameEncoder},
            coding::OpCode,
        },
    },
};

/// Connects to the relay at `addr` with the given role.
pub async fn connect(addr: SocketAddr, role: Role) -> Result<RelayClient<TcpStream>> {
    connect_with(addr, role, DEFAULT_ROLE_HEADER).await
}

/// Same as [`connect`], with the role sent in `role_header`.
pub async fn connect_with(
    addr: SocketAddr,
    role: Role,
    role_header: &str,
) -> Result<RelayClient<TcpStream>> {
    let stream = TcpStream::connect(addr).await?;
    RelayClient::handshake(stream, &addr.to_string(), role, role_header).await
}

/// The peer side of a relay connection.
#[derive(Debug)]
pub struct RelayClient<S> {
    role: Role,
    framed: FramedRead<S, FrameDecoder>,
    response: Response,
}

impl<S> RelayClient<S>
where
    S: AsyncReadRent + AsyncWriteRent,
{
    /// Performs the opening handshake over an established stream.
    pub async fn handshake(stream: S, host: &str, role: Role, role_header: &str) -> Result<Self> {
        let (framed, response) = client_handshake(stream, host, role, role_header).await?;
        Ok(Self {
            role,
            framed,
            response,
        })
    }

    /// Role this peer joined with.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The verified handshake response.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Sends `text` as a single masked text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.write(Frame::text(text.to_owned())).await
    }

    /// Reads the next text or binary message as text.
    ///
    /// Pings are answered on the way. Returns `None` once the relay closes the connection.
    pub async fn read_text(&mut self) -> Result<Option<String>> {
        while let Some(frame) = self.framed.next().await {
            let frame = frame?;
            let opcode = frame.header().opcode;
            match opcode {
                OpCode::Text | OpCode::Binary => return Ok(Some(frame.into_text())),
                OpCode::Ping => self.write(Frame::pong(frame.into_payload())).await?,
                OpCode::Close => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Sends a close frame and shuts the stream down.
    pub async fn close(mut self) -> Result<()> {
        self.write(Frame::close(1000u16.to_be_bytes().to_vec())).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }

    async fn write(&mut self, mut frame: Frame) -> Result<()> {
        // 5. If the data is being sent by the client, the frame(s) MUST be
        // masked as defined in Section 5.3. (RFC 6455)
        frame.set_random_mask();

        let mut buf = BytesMut::with_capacity(frame.len());
        FrameEncoder::write_frame(frame, &mut buf);
        let (res, _) = self.framed.get_mut().write_all(buf).await;
        res?;
        self.framed.get_mut().flush().await?;
        Ok(())
    }
}
