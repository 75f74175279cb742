//! Top-level glue: reacts to discovery events, drives connection setup and
//! teardown, and keeps the device registry / routing table in sync
//! (spec.md §4.11).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use midi_mesh_proto::{HandshakeRequest, NodeId, NodeInfo};
use reqwest::Client;
use tracing::{info, warn};

use crate::connection::NetworkConnection;
use crate::pool::ConnectionPool;
use crate::registry::DeviceRegistry;
use crate::routing::{Route, RoutingTable};
use midi_mesh_proto::Owner;

pub struct MeshStatistics {
    pub peers_appeared: u64,
    pub peers_gone: u64,
    pub self_connects_suppressed: u64,
}

pub struct MeshManager {
    self_id: NodeId,
    self_request: HandshakeRequest,
    client: Client,
    pool: Arc<ConnectionPool>,
    registry: Arc<DeviceRegistry>,
    routing: Arc<RoutingTable>,
    peers_appeared: AtomicU64,
    peers_gone: AtomicU64,
    self_connects_suppressed: AtomicU64,
}

impl MeshManager {
    pub fn new(
        self_id: NodeId,
        self_request: HandshakeRequest,
        pool: Arc<ConnectionPool>,
        registry: Arc<DeviceRegistry>,
        routing: Arc<RoutingTable>,
    ) -> Self {
        Self {
            self_id,
            self_request,
            client: Client::new(),
            pool,
            registry,
            routing,
            peers_appeared: AtomicU64::new(0),
            peers_gone: AtomicU64::new(0),
            self_connects_suppressed: AtomicU64::new(0),
        }
    }

    pub fn statistics(&self) -> MeshStatistics {
        MeshStatistics {
            peers_appeared: self.peers_appeared.load(Ordering::Relaxed),
            peers_gone: self.peers_gone.load(Ordering::Relaxed),
            self_connects_suppressed: self.self_connects_suppressed.load(Ordering::Relaxed),
        }
    }

    /// Handles a peer announcing itself (mDNS resolve or multicast announce).
    /// Suppresses attempts to connect to ourselves (invariant I4) and never
    /// opens a second connection to an already-known peer (invariant I3).
    pub async fn on_peer_appeared(&self, peer: NodeInfo) {
        if peer.uuid == self.self_id {
            self.self_connects_suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self.pool.contains(peer.uuid).await {
            return;
        }

        self.peers_appeared.fetch_add(1, Ordering::Relaxed);
        info!(peer = %peer.uuid, name = %peer.name, "Peer appeared");

        let http_addr: SocketAddr = match format!("{}:{}", peer.ip, peer.http_port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(peer = %peer.uuid, error = %e, "Invalid peer HTTP address");
                return;
            }
        };

        let conn = Arc::new(NetworkConnection::new(peer.clone()));
        self.pool.insert(Arc::clone(&conn)).await;

        if let Err(e) = conn.connect(&self.client, http_addr, &self.self_request).await {
            warn!(peer = %peer.uuid, error = %e, "Failed to connect to peer");
            return;
        }

        for device in conn.devices() {
            self.registry
                .add_remote(peer.uuid, device.id, device.name.clone(), device.device_type)
                .await;
            self.routing
                .add_route(Route {
                    device_id: device.id,
                    owner: Owner::Remote(peer.uuid),
                    name: device.name,
                    device_type: device.device_type,
                })
                .await;
        }
    }

    /// Handles a peer disappearing (mDNS remove or two missed multicast
    /// announces), cascading removal through the pool, registry, and
    /// routing table (invariant I5).
    pub async fn on_peer_gone(&self, peer: NodeId) {
        if self.pool.remove(peer).await.is_none() {
            return;
        }

        self.peers_gone.fetch_add(1, Ordering::Relaxed);
        info!(peer = %peer, "Peer gone");

        let removed_devices = self.registry.remove_all_from(peer).await;
        for device_id in removed_devices {
            self.routing.remove_route(device_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HandshakeRequest {
        HandshakeRequest {
            node_id: NodeId::new_v4(),
            node_name: "self".into(),
            udp_endpoint: "127.0.0.1:0".into(),
            version: "1.0".into(),
        }
    }

    fn manager(self_id: NodeId) -> MeshManager {
        MeshManager::new(
            self_id,
            request(),
            Arc::new(ConnectionPool::new()),
            Arc::new(DeviceRegistry::new()),
            Arc::new(RoutingTable::new()),
        )
    }

    fn peer_info(uuid: NodeId) -> NodeInfo {
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
    async fn self_appearance_is_suppressed() {
        let self_id = NodeId::new_v4();
        let mgr = manager(self_id);
        mgr.on_peer_appeared(peer_info(self_id)).await;
        assert_eq!(mgr.statistics().self_connects_suppressed, 1);
        assert_eq!(mgr.pool.len().await, 0);
    }

    #[tokio::test]
    async fn peer_gone_for_unknown_peer_is_a_no_op() {
        let mgr = manager(NodeId::new_v4());
        mgr.on_peer_gone(NodeId::new_v4()).await;
        assert_eq!(mgr.statistics().peers_gone, 0);
    }
}
