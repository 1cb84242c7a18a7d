//! Live transport connections and their session bindings
//!
//! This module tracks every open WebSocket connection, including:
//! - The outbound queue used to push `ServerMessage`s to the client
//! - The (role, session, identity) triple the connection is bound to
//! - Capacity limits and activity timestamps
//!
//! A connection is only a transient attachment. Identity lives in the session
//! roster; dropping a connection never deletes a participant.

use crate::error::{SessionError, SessionResult};
use log::{debug, info, warn};
use shared::{IdentityToken, ServerMessage};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Player,
}

/// What a connection speaks for, fixed for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub role: Role,
    pub session: String,
    pub identity: IdentityToken,
}

/// Represents one open connection and its outbound queue
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    pub binding: Option<Binding>,
    pub connected_at: Instant,
    /// Last time we received any message on this connection
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            sender,
            binding: None,
            connected_at: now,
            last_seen: now,
        }
    }

    /// Queues a message. Returns false if the connection task is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Manages every open connection
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
    /// Maximum number of concurrent connections allowed
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns false when the server is at capacity.
    pub fn insert(
        &mut self,
        id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> bool {
        if self.connections.len() >= self.max_connections {
            warn!("Rejecting connection {} from {}: server full", id, addr);
            return false;
        }

        info!("Connection {} opened from {}", id, addr);
        self.connections
            .insert(id, Connection::new(id, addr, sender));
        true
    }

    /// Binds a connection to exactly one (role, session, identity) triple.
    pub fn bind(&mut self, id: ConnectionId, binding: Binding) -> SessionResult<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(SessionError::NotBound)?;
        if let Some(existing) = &connection.binding {
            return Err(SessionError::AlreadyBound(existing.session.clone()));
        }

        debug!(
            "Connection {} bound as {:?} of session {}",
            id, binding.role, binding.session
        );
        connection.binding = Some(binding);
        Ok(())
    }

    /// Detaches a connection from its session without closing it.
    pub fn unbind(&mut self, id: ConnectionId) -> Option<Binding> {
        self.connections
            .get_mut(&id)
            .and_then(|c| c.binding.take())
    }

    pub fn binding(&self, id: ConnectionId) -> Option<&Binding> {
        self.connections.get(&id).and_then(|c| c.binding.as_ref())
    }

    /// Forgets a closed connection and returns what it was bound to.
    pub fn on_disconnect(&mut self, id: ConnectionId) -> Option<Binding> {
        let connection = self.connections.remove(&id)?;
        info!("Connection {} closed ({})", id, connection.addr);
        connection.binding
    }

    pub fn touch(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.last_seen = Instant::now();
        }
    }

    pub fn send(&self, id: ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get(&id) {
            Some(connection) => {
                let delivered = connection.send(message);
                if !delivered {
                    debug!("Dropping message for closed connection {}", id);
                }
                delivered
            }
            None => false,
        }
    }

    /// Sends to every open connection, bound or not.
    pub fn send_all(&self, message: &ServerMessage) {
        for connection in self.connections.values() {
            connection.send(message.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn binding(session: &str) -> Binding {
        Binding {
            role: Role::Player,
            session: session.to_string(),
            identity: IdentityToken::from("p1"),
        }
    }

    #[test]
    fn test_insert_respects_capacity() {
        let mut table = ConnectionTable::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(table.insert(ConnectionId(1), test_addr(), tx.clone()));
        assert!(!table.insert(ConnectionId(2), test_addr(), tx));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bind_once() {
        let mut table = ConnectionTable::new(4);
        let (tx, _rx) = mpsc::unbounded_channel();
        table.insert(ConnectionId(1), test_addr(), tx);

        assert!(table.bind(ConnectionId(1), binding("ABCDEF")).is_ok());
        let err = table.bind(ConnectionId(1), binding("ZZZZZZ")).unwrap_err();
        assert_eq!(err, SessionError::AlreadyBound("ABCDEF".into()));
        assert_eq!(table.binding(ConnectionId(1)).unwrap().session, "ABCDEF");

        assert_eq!(
            table.bind(ConnectionId(9), binding("ABCDEF")),
            Err(SessionError::NotBound)
        );
    }

    #[test]
    fn test_disconnect_returns_binding() {
        let mut table = ConnectionTable::new(4);
        let (tx, _rx) = mpsc::unbounded_channel();
        table.insert(ConnectionId(1), test_addr(), tx);
        table.bind(ConnectionId(1), binding("ABCDEF")).unwrap();

        let released = table.on_disconnect(ConnectionId(1)).unwrap();
        assert_eq!(released.identity, IdentityToken::from("p1"));
        assert!(table.is_empty());
        assert!(table.on_disconnect(ConnectionId(1)).is_none());
    }

    #[test]
    fn test_send_reaches_queue() {
        let mut table = ConnectionTable::new(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.insert(ConnectionId(1), test_addr(), tx);

        assert!(table.send(ConnectionId(1), ServerMessage::toast("hi", 1000)));
        assert!(!table.send(ConnectionId(2), ServerMessage::toast("nobody", 1000)));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::toast("hi", 1000));

        drop(rx);
        assert!(!table.send(ConnectionId(1), ServerMessage::toast("gone", 1000)));
    }

    #[test]
    fn test_unbind_keeps_connection_open() {
        let mut table = ConnectionTable::new(4);
        let (tx, _rx) = mpsc::unbounded_channel();
        table.insert(ConnectionId(1), test_addr(), tx);
        table.bind(ConnectionId(1), binding("ABCDEF")).unwrap();

        assert!(table.unbind(ConnectionId(1)).is_some());
        assert!(table.binding(ConnectionId(1)).is_none());
        assert_eq!(table.len(), 1);
    }
}
