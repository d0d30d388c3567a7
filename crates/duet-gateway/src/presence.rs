use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Online/offline tracking across multiple simultaneous connections per
/// user (several tabs or devices share one identity).
///
/// Process-local and never persisted; a horizontally scaled deployment
/// needs an external shared presence store. All mutation goes through
/// these methods — the map is never reachable as ambient state.
pub struct PresenceRegistry {
    inner: Mutex<HashMap<String, HashSet<Uuid>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Track a connection. Returns true only on the offline -> online
    /// transition (the user's first live connection).
    pub async fn connect(&self, user_id: &str, conn_id: Uuid) -> bool {
        let mut map = self.inner.lock().await;
        let connections = map.entry(user_id.to_string()).or_default();
        let was_offline = connections.is_empty();
        connections.insert(conn_id);
        was_offline
    }

    /// Drop a connection. Returns true only on the online -> offline
    /// transition (the last connection went away). Unknown users or
    /// connection ids are no-ops, so duplicate disconnects are harmless.
    pub async fn disconnect(&self, user_id: &str, conn_id: Uuid) -> bool {
        let mut map = self.inner.lock().await;
        let Some(connections) = map.get_mut(user_id) else {
            return false;
        };
        if !connections.remove(&conn_id) {
            return false;
        }
        if connections.is_empty() {
            map.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Current set of online users, for populating a new client.
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().await.contains_key(user_id)
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_fire_only_at_the_edges() {
        let presence = PresenceRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        // Two tabs for the same user: one online transition
        assert!(presence.connect("alice", first).await);
        assert!(!presence.connect("alice", second).await);
        assert!(presence.is_online("alice").await);

        // Closing one tab is not an offline transition
        assert!(!presence.disconnect("alice", first).await);
        assert!(presence.is_online("alice").await);

        // Closing the last one is
        assert!(presence.disconnect("alice", second).await);
        assert!(!presence.is_online("alice").await);
    }

    #[tokio::test]
    async fn duplicate_disconnects_are_no_ops() {
        let presence = PresenceRegistry::new();
        let conn = Uuid::new_v4();

        presence.connect("alice", conn).await;
        assert!(presence.disconnect("alice", conn).await);
        assert!(!presence.disconnect("alice", conn).await);
        assert!(!presence.disconnect("ghost", conn).await);
    }

    #[tokio::test]
    async fn snapshot_lists_each_online_user_once() {
        let presence = PresenceRegistry::new();
        presence.connect("alice", Uuid::new_v4()).await;
        presence.connect("alice", Uuid::new_v4()).await;
        presence.connect("bob", Uuid::new_v4()).await;

        let mut online = presence.snapshot().await;
        online.sort();
        assert_eq!(online, vec!["alice".to_string(), "bob".to_string()]);
    }
}
