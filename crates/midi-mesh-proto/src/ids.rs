use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit node identifier. Generated once per host install and persisted
/// (see `midi_mesh_core::identity::NodeIdentity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Distinguished value meaning "owned by this node" rather than a peer.
    /// Used as `DeviceRecord::owner` / `Route::owner` for local devices.
    pub const LOCAL: NodeId = NodeId(Uuid::nil());

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_local_sentinel(&self) -> bool {
        *self == Self::LOCAL
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// ASCII, 32 hex chars, no dashes — the on-disk/wire string form.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    pub fn from_hex(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of a device: either this node, or a specific peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    Local,
    Remote(NodeId),
}

impl Owner {
    pub fn node_id(&self) -> NodeId {
        match self {
            Owner::Local => NodeId::LOCAL,
            Owner::Remote(id) => *id,
        }
    }

    pub fn from_node_id(id: NodeId) -> Self {
        if id.is_local_sentinel() {
            Owner::Local
        } else {
            Owner::Remote(id)
        }
    }
}

/// Device id, scoped to its owning node. `0` is reserved ("none"),
/// `0xFFFF` means "unknown / lookup failed". Valid assigned ids are `1..=0xFFFE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u16);

impl DeviceId {
    pub const NONE: DeviceId = DeviceId(0);
    pub const UNKNOWN: DeviceId = DeviceId(0xFFFF);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MIDI device direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Input,
    Output,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_sentinel_is_nil_uuid() {
        assert_eq!(NodeId::LOCAL.0, Uuid::nil());
        assert!(NodeId::LOCAL.is_local_sentinel());
        assert!(!NodeId::new_v4().is_local_sentinel());
    }

    #[test]
    fn device_id_reserved_values() {
        assert!(DeviceId::NONE.is_none());
        assert!(DeviceId::UNKNOWN.is_unknown());
        assert!(!DeviceId(1).is_none());
    }

    #[test]
    fn node_id_hex_roundtrip() {
        let id = NodeId::new_v4();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(NodeId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn owner_from_node_id() {
        assert_eq!(Owner::from_node_id(NodeId::LOCAL), Owner::Local);
        let remote = NodeId::new_v4();
        assert_eq!(Owner::from_node_id(remote), Owner::Remote(remote));
    }
}
