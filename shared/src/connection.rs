//! A single TCP connection: background reads, synchronous writes
//!
//! The socket is split in two. The read half moves into a dedicated task on
//! the reactor that keeps exactly one read in flight and pushes every
//! completed chunk into the connection's [`InboundQueue`]. The write half
//! stays with the [`Connection`] and is written from the application thread.
//!
//! The read task never holds the connection itself, only its queue and its
//! state, so whoever owns the connection (the server's registry or a client)
//! can drop it at any time. Dropping aborts the read task.

use crate::error::{classify, is_disconnect, TransportError};
use crate::queue::InboundQueue;
use crate::reactor::{ReactorHandle, StopSignal};
use crate::{Message, RECV_BUFFER_SIZE};
use log::{debug, error, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Identifier assigned by the server registry, never reused
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket is open but the read loop has not been started
    Connecting,
    /// Read loop is running
    Reading,
    /// Terminal: peer closed, read failed, or closed locally
    Closed,
}

/// State shared between a connection and its read task
#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<ConnectionState>>);

impl SharedState {
    fn new(state: ConnectionState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    fn get(&self) -> ConnectionState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: ConnectionState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

pub struct Connection {
    id: Option<ConnectionId>,
    peer_addr: SocketAddr,
    /// Taken by the read task on start
    reader: Option<OwnedReadHalf>,
    /// Released on local close
    writer: Option<OwnedWriteHalf>,
    queue: Arc<InboundQueue>,
    state: SharedState,
    reactor: ReactorHandle,
    read_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Wraps a stream accepted on the reactor.
    pub fn new(stream: TcpStream, reactor: ReactorHandle) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle for {}: {}", peer_addr, e);
        }
        let (reader, writer) = stream.into_split();

        Ok(Self {
            id: None,
            peer_addr,
            reader: Some(reader),
            writer: Some(writer),
            queue: Arc::new(InboundQueue::new()),
            state: SharedState::new(ConnectionState::Connecting),
            reactor,
            read_task: None,
        })
    }

    /// Registers a blocking-connected std stream with the reactor.
    pub fn from_std(
        stream: std::net::TcpStream,
        reactor: ReactorHandle,
    ) -> Result<Self, TransportError> {
        stream.set_nonblocking(true)?;
        let stream = {
            let _guard = reactor.enter();
            TcpStream::from_std(stream)?
        };
        Self::new(stream, reactor)
    }

    pub fn id(&self) -> Option<ConnectionId> {
        self.id
    }

    /// Stamps the registry identifier on this connection.
    pub fn assign_id(&mut self, id: ConnectionId) {
        self.id = Some(id);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Starts the perpetual read loop on the reactor.
    pub fn start(&mut self) {
        let Some(reader) = self.reader.take() else {
            warn!("{} already started", self);
            return;
        };

        if self.is_closed() {
            debug!("{} closed before its read loop started", self);
            return;
        }

        self.state.set(ConnectionState::Reading);
        let task = read_loop(
            self.to_string(),
            reader,
            Arc::clone(&self.queue),
            self.state.clone(),
            self.reactor.stop_signal(),
        );
        self.read_task = Some(self.reactor.spawn(task));
    }

    /// Writes the whole message, returning `false` on any failure.
    ///
    /// Disconnects are expected: the caller is meant to drop the connection
    /// and move on.
    pub fn send(&mut self, message: &[u8]) -> bool {
        match self.try_send(message) {
            Ok(()) => true,
            Err(e) if e.is_disconnect() => {
                info!("[send] {} disconnected", self);
                false
            }
            Err(e) => {
                warn!("[send] {} failed: {}", self, e);
                false
            }
        }
    }

    /// Writes the whole message, reporting why it failed.
    pub fn try_send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.reactor.is_running() {
            return Err(TransportError::ReactorNotRunning);
        }
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;

        match self.reactor.block_on(writer.write_all(message)) {
            Ok(()) => Ok(()),
            Err(e) => {
                let error = classify(e);
                if error.is_disconnect() {
                    self.state.set(ConnectionState::Closed);
                }
                Err(error)
            }
        }
    }

    pub fn has_messages(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Removes the oldest inbound message, failing with
    /// [`TransportError::EmptyQueue`] when none is pending.
    pub fn pop_message(&self) -> Result<Message, TransportError> {
        self.queue.pop()
    }

    /// Number of inbound messages waiting to be drained
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Closes the connection locally. Idempotent.
    pub fn close(&mut self) {
        self.state.set(ConnectionState::Closed);
        self.writer.take();
        self.reader.take();
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "connection {} ({})", id, self.peer_addr),
            None => write!(f, "connection {}", self.peer_addr),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Reads until end-of-stream, a read error, or a reactor stop
///
/// Each completed read becomes exactly one queued message holding the bytes
/// that read returned. End-of-stream and read errors leave the connection
/// `Closed` without telling anyone; the owner finds out on its next send.
async fn read_loop<R>(
    label: String,
    mut reader: R,
    queue: Arc<InboundQueue>,
    state: SharedState,
    mut stop: StopSignal,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = reader.read(&mut buffer) => match result {
                Ok(0) => {
                    info!("{} closed by peer", label);
                    state.set(ConnectionState::Closed);
                    break;
                }
                Ok(len) => {
                    queue.push(buffer[..len].to_vec());
                }
                Err(e) if is_disconnect(&e) => {
                    info!("{} dropped: {}", label, e);
                    state.set(ConnectionState::Closed);
                    break;
                }
                Err(e) => {
                    error!("{} read failed: {}", label, e);
                    state.set(ConnectionState::Closed);
                    break;
                }
            },

            _ = stop.wait() => {
                debug!("{} read loop stopped", label);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::watch;
    use tokio_test::io::Builder;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// Connected pair: the connection side wrapped for the reactor, the peer
    /// side left as a plain std stream driven by the test.
    fn connection_pair(reactor: &Reactor) -> (Connection, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        let connection = Connection::from_std(accepted, reactor.handle()).unwrap();
        (connection, peer)
    }

    fn idle_signal() -> (watch::Sender<bool>, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, StopSignal::new(rx))
    }

    #[test]
    fn test_read_loop_queues_each_chunk() {
        let reader = Builder::new()
            .read(b"ping\n")
            .read(b"po")
            .read(b"ng\n")
            .build();
        let queue = Arc::new(InboundQueue::new());
        let state = SharedState::new(ConnectionState::Reading);
        let (_stop_tx, stop) = idle_signal();

        tokio_test::block_on(read_loop(
            "test".to_string(),
            reader,
            Arc::clone(&queue),
            state.clone(),
            stop,
        ));

        assert_eq!(queue.pop().unwrap(), b"ping\n".to_vec());
        assert_eq!(queue.pop().unwrap(), b"po".to_vec());
        assert_eq!(queue.pop().unwrap(), b"ng\n".to_vec());
        assert!(queue.is_empty());
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_read_loop_stops_on_error_without_queuing() {
        let reader = Builder::new()
            .read(b"first")
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
            .build();
        let queue = Arc::new(InboundQueue::new());
        let state = SharedState::new(ConnectionState::Reading);
        let (_stop_tx, stop) = idle_signal();

        tokio_test::block_on(read_loop(
            "test".to_string(),
            reader,
            Arc::clone(&queue),
            state.clone(),
            stop,
        ));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap(), b"first".to_vec());
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_read_loop_stops_on_reset() {
        let reader = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let queue = Arc::new(InboundQueue::new());
        let state = SharedState::new(ConnectionState::Reading);
        let (_stop_tx, stop) = idle_signal();

        tokio_test::block_on(read_loop(
            "test".to_string(),
            reader,
            Arc::clone(&queue),
            state.clone(),
            stop,
        ));

        assert!(queue.is_empty());
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_read_loop_exits_on_stop() {
        // Peer stays open, so only the stop can end the loop
        let (_peer, reader) = tokio::io::duplex(64);
        let queue = Arc::new(InboundQueue::new());
        let state = SharedState::new(ConnectionState::Reading);
        let (stop_tx, stop) = idle_signal();

        tokio_test::block_on(async {
            stop_tx.send_replace(true);
            let finished = tokio::time::timeout(
                Duration::from_secs(5),
                read_loop(
                    "test".to_string(),
                    reader,
                    Arc::clone(&queue),
                    state.clone(),
                    stop,
                ),
            )
            .await;
            assert!(finished.is_ok(), "read loop ignored the stop signal");
        });

        // Stopping is not a disconnect
        assert_eq!(state.get(), ConnectionState::Reading);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_new_connection_state() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (connection, peer) = connection_pair(&reactor);

        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(connection.id(), None);
        assert_eq!(connection.peer_addr(), peer.local_addr().unwrap());
        assert!(!connection.has_messages());
        assert!(matches!(
            connection.pop_message(),
            Err(TransportError::EmptyQueue)
        ));
    }

    #[test]
    fn test_receives_bytes_from_peer() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (mut connection, mut peer) = connection_pair(&reactor);

        connection.start();
        assert_eq!(connection.state(), ConnectionState::Reading);

        peer.write_all(b"ping\n").unwrap();
        assert!(wait_until(|| connection.has_messages()));

        let mut received = Vec::new();
        while let Ok(message) = connection.pop_message() {
            received.extend(message);
        }
        assert_eq!(received, b"ping\n".to_vec());
    }

    #[test]
    fn test_send_reaches_peer() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (mut connection, mut peer) = connection_pair(&reactor);
        connection.start();

        assert!(connection.send(b"hello"));

        let mut buffer = [0u8; 5];
        peer.read_exact(&mut buffer).unwrap();
        assert_eq!(&buffer, b"hello");
    }

    #[test]
    fn test_peer_close_marks_connection_closed() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (mut connection, peer) = connection_pair(&reactor);
        connection.start();

        drop(peer);
        assert!(wait_until(|| connection.is_closed()));

        assert!(!connection.send(b"anyone there?"));
        assert!(matches!(
            connection.try_send(b"anyone there?"),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_send_after_local_close_fails() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (mut connection, _peer) = connection_pair(&reactor);
        connection.start();

        connection.close();
        connection.close();

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.send(b"x"));
    }

    #[test]
    fn test_send_without_running_reactor_fails() {
        let reactor = Reactor::new("test-reactor").unwrap();
        let (mut connection, _peer) = connection_pair(&reactor);

        assert!(matches!(
            connection.try_send(b"x"),
            Err(TransportError::ReactorNotRunning)
        ));
        assert!(!connection.send(b"x"));
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (mut connection, mut peer) = connection_pair(&reactor);

        connection.start();
        connection.start();

        peer.write_all(b"once").unwrap();
        assert!(wait_until(|| connection.has_messages()));
        assert_eq!(connection.state(), ConnectionState::Reading);
    }

    #[test]
    fn test_display_includes_id_once_assigned() {
        let mut reactor = Reactor::new("test-reactor").unwrap();
        reactor.start().unwrap();
        let (mut connection, _peer) = connection_pair(&reactor);

        assert!(!connection.to_string().contains("connection 7"));
        connection.assign_id(7);
        assert_eq!(connection.id(), Some(7));
        assert!(connection.to_string().starts_with("connection 7 ("));
    }
}
