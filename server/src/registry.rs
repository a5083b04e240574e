//! Connection registry for the server
//!
//! This module tracks every connection the server believes is alive:
//! - Identifier assignment (monotonic, never reused)
//! - Draining inbound queues in a stable order
//! - Broadcasting with pruning of connections whose send fails
//!
//! The registry owns each [`Connection`] by value. Read tasks on the reactor
//! only hold the connection's queue, so removing an entry here is the single
//! point where a connection stops existing.

use log::info;
use shared::{Connection, ConnectionId, Message};
use std::collections::BTreeMap;

/// Table of live connections keyed by identifier
///
/// Identifiers increase with every registration, so iterating the ordered map
/// visits connections in insertion order.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Live connections indexed by their identifier
    connections: BTreeMap<ConnectionId, Connection>,
    /// Identifier handed to the next registration
    next_id: ConnectionId,
}

impl ConnectionRegistry {
    /// Creates an empty registry. The first identifier handed out is 1.
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Assigns the next identifier to the connection and takes ownership of it
    pub fn register(&mut self, mut connection: Connection) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        connection.assign_id(id);
        info!("Client {} connected from {}", id, connection.peer_addr());
        self.connections.insert(id, connection);

        id
    }

    /// Removes a connection, returning true if it was present
    ///
    /// Removing an unknown or already removed identifier is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        if let Some(connection) = self.connections.remove(&id) {
            info!("Client {} removed ({})", id, connection.peer_addr());
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ConnectionId, &Connection),
    {
        for (id, connection) in &self.connections {
            f(*id, connection);
        }
    }

    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(ConnectionId, &mut Connection),
    {
        for (id, connection) in &mut self.connections {
            f(*id, connection);
        }
    }

    /// Pops every pending message from every connection
    ///
    /// Messages from one connection keep their arrival order; connections are
    /// visited in identifier order.
    pub fn drain_messages(&self) -> Vec<Message> {
        self.drain_tagged()
            .into_iter()
            .map(|(_, message)| message)
            .collect()
    }

    /// Like [`drain_messages`](Self::drain_messages), keeping the source of
    /// each message
    pub fn drain_tagged(&self) -> Vec<(ConnectionId, Message)> {
        let mut messages = Vec::new();

        self.for_each(|id, connection| {
            while let Ok(message) = connection.pop_message() {
                messages.push((id, message));
            }
        });

        messages
    }

    /// Sends to every connection except `exclude`, pruning failures
    ///
    /// Any connection whose send fails is removed in the same pass. There is
    /// no retry. Returns the number of successful deliveries.
    pub fn broadcast(&mut self, message: &[u8], exclude: Option<ConnectionId>) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;

        self.for_each_mut(|id, connection| {
            if Some(id) == exclude {
                return;
            }

            if connection.send(message) {
                delivered += 1;
            } else {
                failed.push(id);
            }
        });

        for id in failed {
            self.remove(id);
        }

        delivered
    }

    /// Sends to a single connection, pruning it if the send fails
    pub fn send_to(&mut self, id: ConnectionId, message: &[u8]) -> bool {
        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };

        if connection.send(message) {
            true
        } else {
            self.remove(id);
            false
        }
    }

    /// Removes every connection whose read loop has already seen it close
    ///
    /// Returns the number of connections removed.
    pub fn prune_closed(&mut self) -> usize {
        let closed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_closed())
            .map(|(id, _)| *id)
            .collect();

        for id in &closed {
            self.remove(*id);
        }

        closed.len()
    }

    /// Identifiers of all tracked connections in insertion order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Returns the number of tracked connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no connections are tracked
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
