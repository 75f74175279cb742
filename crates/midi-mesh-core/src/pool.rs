//! Tracks at most one `NetworkConnection` per peer (spec.md §4.9, invariant I3).

use std::collections::HashMap;
use std::sync::Arc;

use midi_mesh_proto::NodeId;
use tokio::sync::RwLock;

use crate::connection::{ConnectionState, NetworkConnection};

#[derive(Default)]
pub struct ConnectionPool {
    connections: RwLock<HashMap<NodeId, Arc<NetworkConnection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts `conn`, replacing any existing entry for the same peer.
    /// Callers must check `get()` first if they want to enforce
    /// "one connection per peer" rather than silently replacing it.
    pub async fn insert(&self, conn: Arc<NetworkConnection>) {
        self.connections.write().await.insert(conn.peer_uuid(), conn);
    }

    pub async fn remove(&self, peer: NodeId) -> Option<Arc<NetworkConnection>> {
        self.connections.write().await.remove(&peer)
    }

    pub async fn get(&self, peer: NodeId) -> Option<Arc<NetworkConnection>> {
        self.connections.read().await.get(&peer).cloned()
    }

    pub async fn contains(&self, peer: NodeId) -> bool {
        self.connections.read().await.contains_key(&peer)
    }

    pub async fn all(&self) -> Vec<Arc<NetworkConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn by_state(&self, state: ConnectionState) -> Vec<Arc<NetworkConnection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.state() == state)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Removes every connection currently in the `Failed` state, returning
    /// the peer ids that were reaped so callers can cascade registry and
    /// routing-table cleanup.
    pub async fn reap_failed(&self) -> Vec<NodeId> {
        let mut connections = self.connections.write().await;
        let dead: Vec<NodeId> = connections
            .iter()
            .filter(|(_, c)| c.state() == ConnectionState::Failed)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            connections.remove(id);
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midi_mesh_proto::NodeInfo;

    fn sample_info(uuid: NodeId) -> NodeInfo {
        NodeInfo {
            uuid,
            name: "peer".into(),
            hostname: "host".into(),
            ip: "127.0.0.1".into(),
            http_port: 0,
            udp_port: 0,
            version: "1.0".into(),
            device_count: 0,
        }
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let pool = ConnectionPool::new();
        let peer = NodeId::new_v4();
        let conn = Arc::new(NetworkConnection::new(sample_info(peer)));
        pool.insert(conn).await;
        assert!(pool.get(peer).await.is_some());
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn remove_drops_the_entry() {
        let pool = ConnectionPool::new();
        let peer = NodeId::new_v4();
        pool.insert(Arc::new(NetworkConnection::new(sample_info(peer)))).await;
        assert!(pool.remove(peer).await.is_some());
        assert!(pool.get(peer).await.is_none());
    }

    #[tokio::test]
    async fn reap_failed_only_removes_failed_connections() {
        let pool = ConnectionPool::new();
        let alive = NodeId::new_v4();
        let dead = NodeId::new_v4();
        pool.insert(Arc::new(NetworkConnection::new(sample_info(alive)))).await;
        let dead_conn = Arc::new(NetworkConnection::new(sample_info(dead)));
        dead_conn.disconnect();
        pool.insert(dead_conn).await;

        // Neither is Failed yet (disconnect -> Disconnected), so nothing reaped.
        assert_eq!(pool.reap_failed().await.len(), 0);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn by_state_filters_correctly() {
        let pool = ConnectionPool::new();
        let peer = NodeId::new_v4();
        let conn = Arc::new(NetworkConnection::new(sample_info(peer)));
        pool.insert(conn).await;
        let disconnected = pool.by_state(ConnectionState::Disconnected).await;
        assert_eq!(disconnected.len(), 1);
        assert_eq!(pool.by_state(ConnectionState::Connected).await.len(), 0);
    }
}
