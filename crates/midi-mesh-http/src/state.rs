//! Shared application state for the HTTP surface (spec.md §4.16, §6).

use std::sync::Arc;
use std::time::Instant;

use midi_mesh_core::{ConnectionPool, DeviceRegistry, MeshManager, MidiRouter, RoutingTable};
use midi_mesh_proto::NodeId;

/// Everything a view handler needs, reachable without blocking on worker
/// threads (every field behind it is an async-aware lock or an atomic).
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub node_id: NodeId,
    pub node_name: String,
    pub hostname: String,
    pub http_port: u16,
    pub udp_port: u16,
    /// `"<ip>:<port>"` form handed back verbatim in the handshake response
    /// (spec.md §6: "MUST be ip:port, not a bare port number").
    pub udp_endpoint: String,
    pub start_time: Instant,
    pub pool: Arc<ConnectionPool>,
    pub registry: Arc<DeviceRegistry>,
    pub routing: Arc<RoutingTable>,
    pub mesh: Arc<MeshManager>,
    pub router: Arc<MidiRouter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        node_name: String,
        hostname: String,
        http_port: u16,
        udp_port: u16,
        udp_endpoint: String,
        pool: Arc<ConnectionPool>,
        registry: Arc<DeviceRegistry>,
        routing: Arc<RoutingTable>,
        mesh: Arc<MeshManager>,
        router: Arc<MidiRouter>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                node_id,
                node_name,
                hostname,
                http_port,
                udp_port,
                udp_endpoint,
                start_time: Instant::now(),
                pool,
                registry,
                routing,
                mesh,
                router,
            }),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
