use log::{debug, info};
use shared::{Connection, ConnectionState, Message, Reactor, TransportError};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

/// Single connection to a server
///
/// Connecting is synchronous. After [`start`](Client::start) the client's own
/// reactor thread reads into the inbound queue, which the application polls
/// with [`has_messages`](Client::has_messages) and
/// [`pop_message`](Client::pop_message).
pub struct Client {
    reactor: Reactor,
    connection: Connection,
}

impl Client {
    /// Resolves `host` to an IPv4 address and connects to it.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let resolve_error = |source| TransportError::Resolve {
            host: host.to_string(),
            port,
            source,
        };

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(resolve_error)?
            .filter(SocketAddr::is_ipv4)
            .collect();

        if addrs.is_empty() {
            return Err(resolve_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no IPv4 address",
            )));
        }

        let stream = TcpStream::connect(&addrs[..]).map_err(|source| TransportError::Connection {
            addr: format!("{}:{}", host, port),
            source,
        })?;
        info!("Connected to {}", stream.peer_addr()?);

        let reactor = Reactor::new("client-reactor")?;
        let connection = Connection::from_std(stream, reactor.handle())?;

        Ok(Client {
            reactor,
            connection,
        })
    }

    /// Starts the reactor thread and the read loop.
    pub fn start(&mut self) -> Result<(), TransportError> {
        self.reactor.start()?;
        self.connection.start();
        debug!("Client started on {}", self.reactor.name());
        Ok(())
    }

    /// Writes the whole message to the server.
    ///
    /// Unlike a server-side connection there is nothing to prune, so every
    /// failure is returned to the caller.
    pub fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.connection.try_send(message)
    }

    pub fn has_messages(&self) -> bool {
        self.connection.has_messages()
    }

    /// Removes and returns the oldest message from the server.
    pub fn pop_message(&self) -> Result<Message, TransportError> {
        self.connection.pop_message()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_running(&self) -> bool {
        self.reactor.is_running()
    }
}

impl Drop for Client {
    // Runs before the fields drop: the reactor is stopped and joined while
    // the connection and its socket are still alive.
    fn drop(&mut self) {
        self.reactor.stop();
        debug!("Client network thread stopped");
    }
}
