//! Per-connection read and write loops.

use bytes::{Bytes, BytesMut};
use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, stream::Stream};
use monoio_codec::FramedRead;
use tracing::{debug, info, warn};

use crate::{
    connection::{Command, ConnectionHandle, Identity, Inbox},
    error::{Error, FrameError, Result},
    protocol::{
        Role,
        frame::{
            Frame,
            codec::{FrameDecoder, FrameEncoder},
            coding::OpCode,
        },
    },
    registry::Registry,
};

/// Lifecycle of a handled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Reading frames.
    Active,
    /// Reading stopped, deregistration pending.
    Closing(CloseReason),
    /// Deregistered and the socket released.
    Removed,
}

/// Why a connection left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Empty read or a close frame from the peer.
    PeerClosed,
    /// Deactivated by a newer connection with the same identity.
    Replaced,
    /// The peer sent a frame that could not be decoded.
    Malformed,
    /// Reading from or writing to the socket failed, or the peer fell too far behind.
    Transport,
}

impl From<&Error> for CloseReason {
    fn from(error: &Error) -> Self {
        match error {
            Error::Io(_) | Error::Delivery(_) => CloseReason::Transport,
            _ => CloseReason::Malformed,
        }
    }
}

/// The JSON string relayed to every client when a server sends `text`.
pub fn relay_message(server: Identity, text: &str) -> String {
    serde_json::Value::String(format!("this is server {server}: {text}")).to_string()
}

/// A live connection, owned by the task that runs it.
///
/// The socket is split: frames are read from `reader` while `writer` drains the inbox.
#[derive(Debug)]
pub struct Connection<R, W> {
    handle: ConnectionHandle,
    inbox: Inbox,
    reader: FramedRead<R, FrameDecoder>,
    writer: W,
    state: HandlerState,
}

impl<R, W> Connection<R, W>
where
    R: AsyncReadRent,
    W: AsyncWriteRent,
{
    /// Wraps the two halves of an upgraded socket.
    pub fn new(
        handle: ConnectionHandle,
        inbox: Inbox,
        reader: FramedRead<R, FrameDecoder>,
        writer: W,
    ) -> Self {
        Self {
            handle,
            inbox,
            reader,
            writer,
            state: HandlerState::Active,
        }
    }

    /// Current state of the connection.
    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Runs the connection until it closes, then deregisters it.
    ///
    /// Reading and writing run side by side for the whole life of the connection. A frame
    /// arriving in several pieces is never cut short by a broadcast. Deactivation ends the
    /// writer, which abandons the pending read at once.
    pub async fn run(mut self, registry: &Registry) -> CloseReason {
        let reason = {
            let reading = read_side(&self.handle, &mut self.reader, registry);
            let writing = write_side(&self.handle, &mut self.inbox, &mut self.writer);
            monoio::select! {
                reason = reading => reason,
                reason = writing => reason,
            }
        };

        self.state = HandlerState::Closing(reason);
        self.remove(registry, reason).await;
        reason
    }

    /// `Closing -> Removed`: deregisters and releases the socket.
    async fn remove(&mut self, registry: &Registry, reason: CloseReason) {
        self.inbox.mark_inactive();
        let deregistered = registry.release(&self.handle);
        let _ = self.writer.shutdown().await;
        self.state = HandlerState::Removed;

        info!(
            role = %self.handle.role(),
            identity = %self.handle.identity(),
            ?reason,
            deregistered,
            "connection removed"
        );
    }
}

/// Reads frames until the peer leaves or misbehaves, then hands the reason to the writer.
///
/// Never completes: the writer ends the connection once it has flushed the replies queued
/// before the stop.
async fn read_side<R: AsyncReadRent>(
    handle: &ConnectionHandle,
    reader: &mut FramedRead<R, FrameDecoder>,
    registry: &Registry,
) -> CloseReason {
    let reason = loop {
        let state = match reader.next().await {
            Some(Ok(frame)) => on_frame(handle, frame, registry),
            Some(Err(error)) => Err(error),
            None => Ok(HandlerState::Closing(CloseReason::PeerClosed)),
        };

        match state {
            Ok(HandlerState::Active) => {}
            Ok(HandlerState::Closing(reason)) => break reason,
            Ok(HandlerState::Removed) => break CloseReason::PeerClosed,
            Err(error) => break fail(handle, error),
        }
    };

    handle.stop(reason);
    std::future::pending().await
}

/// Writes queued frames in order until told to stop.
async fn write_side<W: AsyncWriteRent>(
    handle: &ConnectionHandle,
    inbox: &mut Inbox,
    writer: &mut W,
) -> CloseReason {
    loop {
        if !inbox.is_active() {
            return CloseReason::Replaced;
        }

        match inbox.recv().await {
            Some(Command::Deliver(frame)) => {
                let len = frame.len();
                let res = send(writer, frame).await;
                inbox.written(len);
                if let Err(error) = res {
                    return fail(handle, error);
                }
            }
            Some(Command::Stop(reason)) => return reason,
            Some(Command::Deactivate) | None => return CloseReason::Replaced,
        }
    }
}

fn on_frame(handle: &ConnectionHandle, frame: Frame, registry: &Registry) -> Result<HandlerState> {
    let header = frame.header().clone();
    if header.opcode.is_control() {
        if !header.is_final {
            return Err(FrameError::Fragmented.into());
        }
        if frame.payload().len() > 125 {
            return Err(FrameError::ControlFrameTooBig(frame.payload().len()).into());
        }
    }

    match header.opcode {
        OpCode::Text | OpCode::Binary if header.is_final => {
            on_message(handle, &frame.into_text(), registry);
            Ok(HandlerState::Active)
        }
        OpCode::Text | OpCode::Binary | OpCode::Continue => Err(FrameError::Fragmented.into()),
        OpCode::Ping => {
            handle.deliver(encode(Frame::pong(frame.into_payload())))?;
            Ok(HandlerState::Active)
        }
        OpCode::Pong => Ok(HandlerState::Active),
        OpCode::Close => {
            // echo the close, the peer may already be gone
            let _ = handle.deliver(encode(Frame::close(frame.into_payload())));
            Ok(HandlerState::Closing(CloseReason::PeerClosed))
        }
        OpCode::Reserved(code) => Err(FrameError::UnknownOpcode(code).into()),
    }
}

fn on_message(handle: &ConnectionHandle, text: &str, registry: &Registry) {
    let identity = handle.identity();
    match handle.role() {
        Role::Client => info!(%identity, message = text, "message from client"),
        Role::Server => {
            info!(%identity, message = text, "message from server");
            let report = registry.broadcast(Role::Client, &relay_message(identity, text));
            debug!(
                %identity,
                delivered = report.delivered,
                failed = report.failed.len(),
                "relayed to clients"
            );
        }
    }
}

fn fail(handle: &ConnectionHandle, error: Error) -> CloseReason {
    let reason = CloseReason::from(&error);
    warn!(
        role = %handle.role(),
        identity = %handle.identity(),
        %error,
        "closing connection"
    );
    reason
}

fn encode(frame: Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.len());
    FrameEncoder::write_frame(frame, &mut buf);
    buf.freeze()
}

async fn send<W: AsyncWriteRent>(writer: &mut W, frame: Bytes) -> Result<()> {
    let (res, _) = writer.write_all(frame).await;
    res?;
    writer.flush().await?;
    Ok(())
}
