//! Accepting peers: admission, handshake, registration and the per-connection task.

use std::{cell::Cell, io, net::SocketAddr, rc::Rc};

use monoio::{
    io::{AsyncWriteRent, Splitable},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    connection::{ConnectionHandle, Identity},
    error::Result,
    handler::Connection,
    handshake::server::{Upgraded, server_handshake},
    registry::Registry,
};

/// Counts live connections against [`RelayConfig::max_connections`].
#[derive(Debug, Clone)]
struct Admission {
    live: Rc<Cell<usize>>,
    limit: Option<usize>,
}

/// Slot held by one connection for as long as its task runs.
#[derive(Debug)]
struct Permit {
    live: Rc<Cell<usize>>,
}

impl Admission {
    fn new(limit: Option<usize>) -> Self {
        Self {
            live: Rc::new(Cell::new(0)),
            limit,
        }
    }

    fn try_acquire(&self) -> Option<Permit> {
        let live = self.live.get();
        if self.limit.is_some_and(|limit| live >= limit) {
            return None;
        }
        self.live.set(live + 1);
        Some(Permit {
            live: self.live.clone(),
        })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

/// The relay listener.
pub struct Server {
    listener: TcpListener,
    config: Rc<RelayConfig>,
    registry: Rc<Registry>,
    admission: Admission,
}

impl Server {
    /// Binds the listener. A bind failure is the only error that stops the relay.
    pub fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)?;
        let admission = Admission::new(config.max_connections);
        Ok(Self {
            listener,
            config: Rc::new(config),
            registry: Rc::new(Registry::new()),
            admission,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The registries shared by all connections of this server.
    pub fn registry(&self) -> Rc<Registry> {
        self.registry.clone()
    }

    /// Accepts peers forever, one task per connection.
    ///
    /// Failures of a single peer, from accept to its last read, never stop the loop.
    pub async fn run(self) {
        info!(addr = ?self.local_addr().ok(), "websocket relay started");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "accept failed");
                    continue;
                }
            };

            let Some(permit) = self.admission.try_acquire() else {
                warn!(%peer, limit = ?self.config.max_connections, "connection limit reached, refusing peer");
                refuse(stream).await;
                continue;
            };

            debug!(%peer, "peer accepted");
            monoio::spawn(accept_connection(
                stream,
                peer,
                self.config.clone(),
                self.registry.clone(),
                permit,
            ));
        }
    }
}

async fn refuse(mut stream: TcpStream) {
    let _ = stream.shutdown().await;
}

async fn accept_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Rc<RelayConfig>,
    registry: Rc<Registry>,
    _permit: Permit,
) {
    let (reader, mut writer) = stream.into_split();
    let Upgraded { role, framed, .. } = match server_handshake(reader, &mut writer, &config).await {
        Ok(upgraded) => upgraded,
        Err(error) => {
            warn!(%peer, %error, "handshake refused");
            return;
        }
    };

    let identity = Identity::from(peer);
    let (handle, inbox) = ConnectionHandle::bounded(identity, role, config.max_queued_bytes);
    registry.register(handle.clone());
    info!(%peer, %role, %identity, "peer joined");

    Connection::new(handle, inbox, framed, writer).run(&registry).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_bounds_live_connections() {
        let admission = Admission::new(Some(2));
        let first = admission.try_acquire().unwrap();
        let _second = admission.try_acquire().unwrap();
        assert!(admission.try_acquire().is_none());

        drop(first);
        assert!(admission.try_acquire().is_some());
    }

    #[test]
    fn unbounded_admission() {
        let admission = Admission::new(None);
        let permits: Vec<_> = (0..100).filter_map(|_| admission.try_acquire()).collect();
        assert_eq!(permits.len(), 100);
        assert_eq!(admission.live.get(), 100);
    }
}
