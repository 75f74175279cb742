//! JSON shapes for the `POST /network/handshake` exchange (spec.md §6).
//! Shared between the client side (`midi_mesh_core::connection`) and the
//! server side (the `midi-mesh-http` crate) so both speak the same wire
//! contract without a dependency cycle.

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, DeviceType, NodeId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeDeviceView {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub node_id: NodeId,
    pub node_name: String,
    /// `"<ip>:<port>"` — never a bare port number.
    pub udp_endpoint: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub node_id: NodeId,
    pub node_name: String,
    pub udp_endpoint: String,
    pub version: String,
    pub devices: Vec<HandshakeDeviceView>,
}
