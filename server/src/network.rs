//! Server network layer: accept loop, drain and broadcast

use crate::registry::ConnectionRegistry;
use log::{debug, error, info, warn};
use shared::reactor::StopSignal;
use shared::{Connection, ConnectionId, Message, Reactor, ReactorHandle, TransportError};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Pause after a failed accept so a persistent fault (e.g. out of file
/// descriptors) does not turn the loop into a busy spin
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// TCP server tracking many client connections
///
/// The accept loop and every read loop run on the server's own reactor
/// thread. Everything else is called from the application thread once per
/// tick: [`read_all`](Self::read_all) to drain, then
/// [`send_to_all`](Self::send_to_all) to broadcast.
///
/// The registry lock is taken asynchronously by the accept loop and with
/// `blocking_*` by the application thread, so a broadcast holding the lock
/// never stalls the reactor that completes its writes.
pub struct Server {
    reactor: Reactor,
    clients: Arc<RwLock<ConnectionRegistry>>,
    local_addr: Option<SocketAddr>,
    max_clients: usize,
}

impl Server {
    pub fn new(max_clients: usize) -> Result<Self, TransportError> {
        Ok(Server {
            reactor: Reactor::new("server-reactor")?,
            clients: Arc::new(RwLock::new(ConnectionRegistry::new())),
            local_addr: None,
            max_clients,
        })
    }

    /// Binds `0.0.0.0:port`, starts the reactor and begins accepting
    ///
    /// Port 0 binds an ephemeral port; the bound address is returned.
    pub fn start(&mut self, port: u16) -> Result<SocketAddr, TransportError> {
        if self.local_addr.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = bind(addr, &self.reactor.handle())?;
        let local_addr = listener.local_addr()?;

        self.reactor.start()?;
        self.local_addr = Some(local_addr);
        info!("Server listening on {} ({})", local_addr, self.reactor.name());

        let reactor = self.reactor.handle();
        self.reactor.handle().spawn(accept_loop(
            listener,
            Arc::clone(&self.clients),
            reactor,
            self.max_clients,
        ));

        Ok(local_addr)
    }

    /// Drains every connection's inbound queue
    ///
    /// Each connection's messages keep their arrival order; connections are
    /// visited in identifier order. There is no global ordering across
    /// connections.
    pub fn read_all(&self) -> Vec<Message> {
        self.clients.blocking_read().drain_messages()
    }

    /// Drains every inbound queue, tagging each message with its source
    pub fn read_all_tagged(&self) -> Vec<(ConnectionId, Message)> {
        self.clients.blocking_read().drain_tagged()
    }

    /// Sends to every connection, removing those whose send fails
    ///
    /// Returns the number of connections the message reached.
    pub fn send_to_all(&self, message: &[u8]) -> usize {
        let mut clients = self.clients.blocking_write();
        if clients.is_empty() {
            return 0;
        }

        let before = clients.len();
        let delivered = clients.broadcast(message, None);
        if clients.len() < before {
            debug!("Pruned {} connections", before - clients.len());
        }
        delivered
    }

    /// Sends to every connection except one, removing those whose send fails
    pub fn send_to_all_except(&self, message: &[u8], exclude: ConnectionId) -> usize {
        self.clients.blocking_write().broadcast(message, Some(exclude))
    }

    /// Sends to one connection, removing it if the send fails
    pub fn send_to(&self, id: ConnectionId, message: &[u8]) -> bool {
        self.clients.blocking_write().send_to(id, message)
    }

    pub fn connection_count(&self) -> usize {
        self.clients.blocking_read().len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.clients.blocking_read().ids()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    /// Stops accepting and reading, then joins the reactor thread
    pub fn stop(&mut self) {
        if self.reactor.is_running() {
            info!("Server shutting down");
        }
        self.reactor.stop();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds synchronously so that failures reach the caller of `start`
fn bind(addr: SocketAddr, reactor: &ReactorHandle) -> Result<TcpListener, TransportError> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
    listener.set_nonblocking(true)?;

    let _guard = reactor.enter();
    Ok(TcpListener::from_std(listener)?)
}

/// Accepts connections until the reactor stops
///
/// Every accepted socket is registered first and then started. A failed
/// accept is logged and never ends the loop.
async fn accept_loop(
    listener: TcpListener,
    clients: Arc<RwLock<ConnectionRegistry>>,
    reactor: ReactorHandle,
    max_clients: usize,
) {
    let mut stop: StopSignal = reactor.stop_signal();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let connection = match Connection::new(stream, reactor.clone()) {
                        Ok(connection) => connection,
                        Err(e) => {
                            warn!("Failed to set up connection from {}: {}", addr, e);
                            continue;
                        }
                    };

                    let mut clients = clients.write().await;
                    if clients.len() >= max_clients && clients.prune_closed() > 0 {
                        debug!("Freed slots held by departed clients");
                    }
                    if clients.len() >= max_clients {
                        warn!("Rejecting {}: server full ({} clients)", addr, max_clients);
                        continue;
                    }

                    let id = clients.register(connection);
                    if let Some(connection) = clients.get_mut(id) {
                        connection.start();
                    }
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            },

            _ = stop.wait() => {
                debug!("Accept loop stopped");
                break;
            }
        }
    }
}
