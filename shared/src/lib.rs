//! Transport primitives shared by the server and the client.
//!
//! Both sides of the connection are built from the same three pieces:
//!
//! - [`queue::InboundQueue`]: the thread-safe FIFO that decouples the I/O
//!   thread from the application tick
//! - [`connection::Connection`]: one TCP socket with a background read loop
//!   feeding its queue and a synchronous send
//! - [`reactor::Reactor`]: the dedicated thread that drives every accept and
//!   read completion for one server or client instance
//!
//! Messages are raw byte chunks. One message is exactly what one receive call
//! returned, so an application-level unit may be split across several
//! messages or several units may arrive coalesced in one.

pub mod connection;
pub mod error;
pub mod queue;
pub mod reactor;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use error::TransportError;
pub use queue::InboundQueue;
pub use reactor::{Reactor, ReactorHandle};

/// Well-known port shared by the paired client and server binaries.
pub const DEFAULT_PORT: u16 = 9000;

/// Capacity of the per-connection receive buffer, i.e. the largest message a
/// single read can produce.
pub const RECV_BUFFER_SIZE: usize = 8192;

/// A raw chunk of bytes produced by one completed read.
pub type Message = Vec<u8>;
