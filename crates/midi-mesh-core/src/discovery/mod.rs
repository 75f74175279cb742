//! Advertise this node and observe others on the LAN (spec.md §4.4).
//!
//! Two implementations exist — [`mdns`] (preferred) and [`multicast`] (the
//! fallback used on networks where mDNS multicast doesn't reach). Both
//! speak the same sink-event vocabulary below so `MeshManager` never has
//! to know which one is running.

pub mod mdns;
pub mod multicast;

use midi_mesh_proto::{NodeId, NodeInfo};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerAppeared(NodeInfo),
    PeerGone(NodeId),
}

pub type DiscoverySink = mpsc::UnboundedSender<DiscoveryEvent>;

#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryStats {
    pub peers_seen: u64,
    pub peers_active: u64,
    pub self_advertisements_ignored: u64,
}
