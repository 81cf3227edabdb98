//! Connection identity and the handle a registry keeps for each live connection.

use std::{
    cell::Cell,
    fmt,
    net::SocketAddr,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use local_sync::mpsc::unbounded;

use crate::{
    error::{Error, Result},
    handler::CloseReason,
    protocol::Role,
};

/// Bytes a connection may have queued for writing unless configured otherwise.
pub const DEFAULT_MAX_QUEUED_BYTES: usize = 1 << 20;

/// Key of a connection within the registry of its role.
///
/// Derived from the remote port at accept time: a peer reconnecting from the same port
/// replaces its previous connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(pub u16);

impl From<SocketAddr> for Identity {
    fn from(peer: SocketAddr) -> Self {
        Identity(peer.port())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Work queued for the task owning a connection's socket.
#[derive(Debug)]
pub(crate) enum Command {
    /// Write an encoded frame.
    Deliver(Bytes),
    /// Stop reading and shut the connection down.
    Deactivate,
    /// The read side has finished. Sent after any reply it queued.
    Stop(CloseReason),
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

struct Shared {
    id: u64,
    identity: Identity,
    role: Role,
    active: Cell<bool>,
    queued: Cell<usize>,
    max_queued: usize,
    commands: unbounded::Tx<Command>,
}

/// Non-owning reference to a live connection.
///
/// The socket itself belongs to the handler task. The handle can only queue frames for
/// that task and tell it to stop. Clones refer to the same connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Rc<Shared>,
}

/// Receiving end of a connection's command queue, held by its handler.
pub struct Inbox {
    commands: unbounded::Rx<Command>,
    shared: Rc<Shared>,
}

impl ConnectionHandle {
    /// Creates a handle for a new connection and the inbox its handler reads from.
    pub fn new(identity: Identity, role: Role) -> (ConnectionHandle, Inbox) {
        Self::bounded(identity, role, DEFAULT_MAX_QUEUED_BYTES)
    }

    /// Same as [`ConnectionHandle::new`], with at most `max_queued` bytes of frames waiting
    /// to be written. A single frame is always accepted into an empty queue.
    pub fn bounded(identity: Identity, role: Role, max_queued: usize) -> (ConnectionHandle, Inbox) {
        let (tx, rx) = unbounded::channel();
        let shared = Rc::new(Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            role,
            active: Cell::new(true),
            queued: Cell::new(0),
            max_queued,
            commands: tx,
        });

        let inbox = Inbox {
            commands: rx,
            shared: shared.clone(),
        };
        (ConnectionHandle { shared }, inbox)
    }

    /// Process-unique id of this connection. Differs between a connection and the one
    /// replacing it under the same identity.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Registry key of the connection.
    pub fn identity(&self) -> Identity {
        self.shared.identity
    }

    /// Role of the connection.
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Whether the connection is still live.
    pub fn is_active(&self) -> bool {
        self.shared.active.get()
    }

    /// Marks the connection inactive and wakes its handler, which exits promptly even
    /// while it waits on a read.
    pub fn deactivate(&self) {
        if self.shared.active.replace(false) {
            // the handler may already be gone
            let _ = self.shared.commands.send(Command::Deactivate);
        }
    }

    /// Bytes queued and not yet written.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued.get()
    }

    /// Queues an encoded frame for the handler to write.
    ///
    /// Fails if the connection is inactive, its handler is gone, or the frame would push the
    /// queue past its byte budget.
    pub(crate) fn deliver(&self, frame: Bytes) -> Result<()> {
        if !self.is_active() {
            return Err(Error::Delivery(self.identity()));
        }

        let queued = self.shared.queued.get();
        if queued > 0 && queued + frame.len() > self.shared.max_queued {
            return Err(Error::Delivery(self.identity()));
        }

        let len = frame.len();
        self.shared
            .commands
            .send(Command::Deliver(frame))
            .map_err(|_| Error::Delivery(self.identity()))?;
        self.shared.queued.set(queued + len);
        Ok(())
    }

    /// Tells the writer that reading is over. Commands queued before are still served.
    pub(crate) fn stop(&self, reason: CloseReason) {
        let _ = self.shared.commands.send(Command::Stop(reason));
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("identity", &self.shared.identity)
            .field("role", &self.shared.role)
            .field("active", &self.shared.active.get())
            .field("queued", &self.shared.queued.get())
            .finish()
    }
}

impl Inbox {
    /// Waits for the next command.
    pub(crate) async fn recv(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    /// Whether the connection is still live.
    pub fn is_active(&self) -> bool {
        self.shared.active.get()
    }

    /// Marks the connection inactive from the handler's side.
    pub(crate) fn mark_inactive(&self) {
        self.shared.active.set(false);
    }

    /// Returns `len` bytes of a written frame to the queue budget.
    pub(crate) fn written(&self, len: usize) {
        let queued = &self.shared.queued;
        queued.set(queued.get().saturating_sub(len));
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("id", &self.shared.id)
            .field("identity", &self.shared.identity)
            .finish_non_exhaustive()
    }
}
