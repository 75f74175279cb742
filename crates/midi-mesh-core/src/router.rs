//! Delivers MIDI byte vectors to the right destination, local or remote
//! (spec.md §4.14).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use midi_mesh_backend::OutputPort;
use midi_mesh_proto::{DeviceId, MidiPacket, Owner};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::registry::DeviceRegistry;
use crate::routing::RoutingTable;

#[derive(Debug, Default, Clone, Copy)]
pub struct RouterStatistics {
    pub local_sent: u64,
    pub local_received: u64,
    pub network_sent: u64,
    pub network_received: u64,
    pub routing_errors: u64,
    pub unknown_device: u64,
}

/// A MIDI packet addressed to a remote peer, handed off to whichever
/// transport (reliable or plain) is appropriate for its flags.
pub struct OutboundPacket {
    pub packet: MidiPacket,
    pub reliable: bool,
}

pub struct MidiRouter {
    self_node: midi_mesh_proto::NodeId,
    routing: Arc<RoutingTable>,
    registry: Arc<DeviceRegistry>,
    local_ports: Mutex<std::collections::HashMap<DeviceId, Arc<dyn OutputPort>>>,
    next_sequence: Mutex<std::collections::HashMap<midi_mesh_proto::NodeId, u16>>,
    local_sent: AtomicU64,
    local_received: AtomicU64,
    network_sent: AtomicU64,
    network_received: AtomicU64,
    routing_errors: AtomicU64,
    unknown_device: AtomicU64,
}

impl MidiRouter {
    pub fn new(self_node: midi_mesh_proto::NodeId, routing: Arc<RoutingTable>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            self_node,
            routing,
            registry,
            local_ports: Mutex::new(std::collections::HashMap::new()),
            next_sequence: Mutex::new(std::collections::HashMap::new()),
            local_sent: AtomicU64::new(0),
            local_received: AtomicU64::new(0),
            network_sent: AtomicU64::new(0),
            network_received: AtomicU64::new(0),
            routing_errors: AtomicU64::new(0),
            unknown_device: AtomicU64::new(0),
        }
    }

    pub fn statistics(&self) -> RouterStatistics {
        RouterStatistics {
            local_sent: self.local_sent.load(Ordering::Relaxed),
            local_received: self.local_received.load(Ordering::Relaxed),
            network_sent: self.network_sent.load(Ordering::Relaxed),
            network_received: self.network_received.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            unknown_device: self.unknown_device.load(Ordering::Relaxed),
        }
    }

    pub async fn register_local_port(&self, id: DeviceId, port: Arc<dyn OutputPort>) {
        self.local_ports.lock().await.insert(id, port);
    }

    fn is_reliable(bytes: &[u8]) -> bool {
        bytes.first() == Some(&0xF0) || bytes.len() > 3
    }

    async fn next_sequence_for(&self, peer: midi_mesh_proto::NodeId) -> u16 {
        let mut sequences = self.next_sequence.lock().await;
        let seq = sequences.entry(peer).or_insert(0);
        let value = *seq;
        *seq = seq.wrapping_add(1);
        value
    }

    /// Dispatches `bytes` addressed to `device_id`: locally if the route
    /// owner is this node, otherwise packaged for the network transport.
    pub async fn send(&self, device_id: DeviceId, bytes: &[u8]) -> Option<OutboundPacket> {
        let Some(route) = self.routing.get_route(device_id).await else {
            self.routing_errors.fetch_add(1, Ordering::Relaxed);
            warn!(device_id = %device_id, "No route for outbound send");
            return None;
        };

        match route.owner {
            Owner::Local => {
                let ports = self.local_ports.lock().await;
                match ports.get(&device_id) {
                    Some(port) => {
                        if let Err(e) = port.send(bytes) {
                            warn!(device_id = %device_id, error = %e, "Local port send failed");
                            self.routing_errors.fetch_add(1, Ordering::Relaxed);
                            return None;
                        }
                        self.local_sent.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                    None => {
                        self.routing_errors.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
            Owner::Remote(owner) => {
                let sequence = self.next_sequence_for(owner).await;
                let packet = MidiPacket {
                    flags: midi_mesh_proto::PacketFlags {
                        reliable: Self::is_reliable(bytes),
                        ack: false,
                        heartbeat: false,
                    },
                    source_node: self.self_node,
                    dest_node: owner,
                    sequence,
                    timestamp_us: 0,
                    device_id,
                    payload: bytes.to_vec(),
                };
                self.network_sent.fetch_add(1, Ordering::Relaxed);
                Some(OutboundPacket {
                    reliable: packet.flags.reliable,
                    packet,
                })
            }
        }
    }

    /// Handles a packet decoded off the network and bound for a local device.
    pub async fn deliver(&self, from_peer: midi_mesh_proto::NodeId, device_id: DeviceId, bytes: &[u8]) {
        self.network_received.fetch_add(1, Ordering::Relaxed);

        let Some(record) = self.registry.get(device_id).await else {
            self.unknown_device.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %from_peer, device_id = %device_id, "Dropping packet for unknown device");
            return;
        };

        if record.owner != Owner::Local {
            self.unknown_device.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let ports = self.local_ports.lock().await;
        match ports.get(&device_id) {
            Some(port) => {
                if port.send(bytes).is_ok() {
                    self.local_received.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                self.unknown_device.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
