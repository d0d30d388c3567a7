use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use duet_types::events::GatewayEvent;

use crate::presence::PresenceRegistry;

/// Manages all connected clients: per-connection send channels, explicit
/// room membership, and the presence registry handed in at construction.
///
/// Rooms are plain `conversation -> {connection}` state with join and
/// unregister as the only mutators, so fan-out is testable without a live
/// socket. Membership is per connection, not per user — a user's several
/// tabs join a room independently.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct ConnectionHandle {
    user_id: String,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

struct DispatcherInner {
    presence: PresenceRegistry,

    /// conn_id -> live connection
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,

    /// conversation_id -> connections currently joined to its room
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                presence,
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection for a user. Returns the connection id, the
    /// event receiver to drain into the socket, and whether the user just
    /// came online.
    pub async fn register(
        &self,
        user_id: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionHandle {
                user_id: user_id.to_string(),
                tx,
            },
        );
        let came_online = self.inner.presence.connect(user_id, conn_id).await;

        (conn_id, rx, came_online)
    }

    /// Remove a connection from every room and from presence. Returns the
    /// user id when this was their last connection (they went offline).
    /// Idempotent: a second call for the same connection does nothing.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<String> {
        let handle = self.inner.connections.write().await.remove(&conn_id)?;

        {
            let mut rooms = self.inner.rooms.write().await;
            rooms.retain(|_, members| {
                members.remove(&conn_id);
                !members.is_empty()
            });
        }

        let went_offline = self.inner.presence.disconnect(&handle.user_id, conn_id).await;
        went_offline.then_some(handle.user_id)
    }

    pub async fn join_room(&self, chat_id: Uuid, conn_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .insert(conn_id);
    }

    /// Send an event to every connection. Dead receivers are skipped.
    pub async fn broadcast_all(&self, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        for handle in connections.values() {
            let _ = handle.tx.send(event.clone());
        }
    }

    /// Fan an event out to every connection joined to the room.
    pub async fn broadcast_room(&self, chat_id: Uuid, event: GatewayEvent) {
        self.broadcast_room_inner(chat_id, None, event).await;
    }

    /// Room fan-out that skips one connection (the sender, for typing).
    pub async fn broadcast_room_except(&self, chat_id: Uuid, skip: Uuid, event: GatewayEvent) {
        self.broadcast_room_inner(chat_id, Some(skip), event).await;
    }

    async fn broadcast_room_inner(&self, chat_id: Uuid, skip: Option<Uuid>, event: GatewayEvent) {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(&chat_id) else {
            return;
        };

        let connections = self.inner.connections.read().await;
        for conn_id in members {
            if Some(*conn_id) == skip {
                continue;
            }
            if let Some(handle) = connections.get(conn_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    /// Send a targeted event to one connection.
    pub async fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(handle) = connections.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.inner.presence.snapshot().await
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.presence.is_online(user_id).await
    }
}
