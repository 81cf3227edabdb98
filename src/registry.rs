//! Live connections of both roles, and fan-out from servers to clients.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionHandle, Identity},
    protocol::{Role, frame::codec},
};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of connections the frame was queued for.
    pub delivered: usize,
    /// Connections that were gone or too far behind. They have been deactivated and
    /// removed from the registry.
    pub failed: Vec<Identity>,
}

/// Connections of a single role, keyed by identity.
#[derive(Debug, Default)]
struct RoleRegistry {
    connections: Mutex<HashMap<Identity, ConnectionHandle>>,
}

/// The two role registries.
///
/// Every operation locks the registry of one role for its whole duration and never
/// awaits while holding the lock. Sockets are not touched here: frames are queued for the
/// handler task that owns each socket.
#[derive(Debug, Default)]
pub struct Registry {
    clients: RoleRegistry,
    servers: RoleRegistry,
}

impl Registry {
    /// Creates empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    fn of(&self, role: Role) -> &RoleRegistry {
        match role {
            Role::Client => &self.clients,
            Role::Server => &self.servers,
        }
    }

    /// Inserts a connection under its role and identity.
    ///
    /// A connection already registered under the same identity is deactivated first and
    /// then replaced. The replaced connection is returned.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let role = handle.role();
        let identity = handle.identity();

        let mut connections = self.of(role).connections.lock();
        let previous = connections.remove(&identity);
        if let Some(previous) = &previous {
            previous.deactivate();
            info!(%role, %identity, replaced = previous.id(), "peer reconnected, previous connection replaced");
        }
        connections.insert(identity, handle);
        debug!(%role, %identity, live = connections.len(), "connection registered");

        previous
    }

    /// Removes whatever is registered under `identity`. Does nothing if absent.
    pub fn deregister(&self, role: Role, identity: Identity) -> Option<ConnectionHandle> {
        self.of(role).connections.lock().remove(&identity)
    }

    /// Removes `handle`, unless its identity is already held by a newer connection.
    ///
    /// Returns whether the handle was removed.
    pub fn release(&self, handle: &ConnectionHandle) -> bool {
        let mut connections = self.of(handle.role()).connections.lock();
        match connections.get(&handle.identity()) {
            Some(current) if current.id() == handle.id() => {
                connections.remove(&handle.identity());
                true
            }
            _ => false,
        }
    }

    /// Returns the connection registered under `identity`.
    pub fn lookup(&self, role: Role, identity: Identity) -> Option<ConnectionHandle> {
        self.of(role).connections.lock().get(&identity).cloned()
    }

    /// Returns the identities registered under `role`, in no particular order.
    pub fn identities(&self, role: Role) -> Vec<Identity> {
        self.of(role).connections.lock().keys().copied().collect()
    }

    /// Number of connections registered under `role`.
    pub fn len(&self, role: Role) -> usize {
        self.of(role).connections.lock().len()
    }

    /// Whether no connection of either role is registered.
    pub fn is_empty(&self) -> bool {
        self.len(Role::Client) == 0 && self.len(Role::Server) == 0
    }

    /// Sends `text` as a text frame to every active connection under `role`.
    ///
    /// The frame is encoded once. A recipient that is gone, or whose write queue is over
    /// budget, does not stop delivery to the others; it is logged, deactivated and removed.
    pub fn broadcast(&self, role: Role, text: &str) -> BroadcastReport {
        self.broadcast_frame(role, codec::encode(text))
    }

    /// Sends an already encoded frame to every active connection under `role`.
    pub fn broadcast_frame(&self, role: Role, frame: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut connections = self.of(role).connections.lock();

        for (identity, handle) in connections.iter() {
            match handle.deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(%role, %identity, %error, "broadcast delivery failed");
                    report.failed.push(*identity);
                }
            }
        }

        for identity in &report.failed {
            if let Some(handle) = connections.remove(identity) {
                handle.deactivate();
            }
        }

        debug!(
            %role,
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast"
        );
        report
    }
}
