//! Error taxonomy for the transport layer.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// A message was popped from a queue with nothing pending. This is a
    /// usage error: callers check `has_messages` first.
    #[error("no messages pending")]
    EmptyQueue,

    /// The peer went away (end-of-stream, reset or broken pipe).
    #[error("peer disconnected: {0}")]
    Disconnected(#[source] io::Error),

    /// The connection was already closed before the operation started.
    #[error("connection is closed")]
    Closed,

    #[error("failed to resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("reactor is not running")]
    ReactorNotRunning,

    #[error("already started")]
    AlreadyStarted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Returns true for errors that mean the peer is gone and the
    /// connection should be dropped.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected(_) | TransportError::Closed)
    }
}

/// Classifies an I/O error as an orderly or abrupt peer departure.
pub fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}

/// Wraps an I/O error from a send, separating disconnects from other faults.
pub fn classify(error: io::Error) -> TransportError {
    if is_disconnect(&error) {
        TransportError::Disconnected(error)
    } else {
        TransportError::Io(error)
    }
}
