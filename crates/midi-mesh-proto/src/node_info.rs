use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// Information about a node, produced by discovery and consumed by the
/// mesh manager and the HTTP views (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub uuid: NodeId,
    pub name: String,
    pub hostname: String,
    pub ip: String,
    pub http_port: u16,
    pub udp_port: u16,
    pub version: String,
    pub device_count: u32,
}
