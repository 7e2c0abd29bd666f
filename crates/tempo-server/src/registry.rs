use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use tempo_core::ids::UserId;

/// Unique identifier for one registered connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The registry's view of one live channel: its id plus the sender half of
/// the connection's outbound queue. The receiver half is owned by the
/// connection's writer task.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    /// Queue a message for this connection. Returns false when the
    /// receiving side is gone, which is the only failure mode of an
    /// unbounded channel and means the connection is dead.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Live connections grouped by user. A user key exists only while that
/// user has at least one registered connection; empty entries are pruned
/// immediately.
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Vec<ConnectionHandle>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new connection for a user. The connection is a broadcast
    /// target as soon as this returns.
    pub fn register(&self, user_id: &UserId) -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        self.connections
            .entry(user_id.clone())
            .or_default()
            .push(handle.clone());
        (handle, rx)
    }

    /// Remove a connection. Unregistering an absent connection is a no-op.
    pub fn unregister(&self, user_id: &UserId, connection_id: &ConnectionId) {
        let now_empty = match self.connections.get_mut(user_id) {
            Some(mut handles) => {
                handles.retain(|handle| handle.id != *connection_id);
                handles.is_empty()
            }
            None => return,
        };

        if now_empty {
            // Conditional removal: a concurrent register may have re-added
            // a handle after the guard above was released.
            self.connections
                .remove_if(user_id, |_, handles| handles.is_empty());
        }
    }

    /// Send `text` to every connection currently registered for `user_id`,
    /// iterating over a point-in-time snapshot of the set. A failed send
    /// marks that connection dead: it is unregistered and the rest of the
    /// fan-out proceeds. Returns the number of successful deliveries; a
    /// user with no connections is a silent no-op.
    pub fn broadcast_to_user(&self, user_id: &UserId, text: &str) -> usize {
        let targets: Vec<ConnectionHandle> = match self.connections.get(user_id) {
            Some(handles) => handles.value().clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut dead: Vec<ConnectionId> = Vec::new();
        for handle in &targets {
            if handle.send(Message::Text(text.to_owned().into())) {
                delivered += 1;
            } else {
                dead.push(handle.id.clone());
            }
        }

        for id in dead {
            tracing::warn!(user_id = %user_id, connection_id = %id, "pruning dead connection");
            self.unregister(user_id, &id);
        }

        delivered
    }

    /// Number of live connections for a user.
    pub fn connection_count(&self, user_id: &UserId) -> usize {
        self.connections
            .get(user_id)
            .map(|handles| handles.len())
            .unwrap_or(0)
    }

    /// Number of users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.connections.len()
    }
}
