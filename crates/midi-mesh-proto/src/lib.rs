pub mod handshake;
pub mod ids;
pub mod node_info;
pub mod packet;

pub use handshake::{HandshakeDeviceView, HandshakeRequest, HandshakeResponse};
pub use ids::{DeviceId, DeviceType, NodeId, Owner};
pub use node_info::NodeInfo;
pub use packet::{DecodeError, MidiPacket, PacketFlags};

/// Protocol version string advertised in discovery records and handshakes.
pub const PROTOCOL_VERSION: &str = "1.0";

/// mDNS service type this mesh advertises and browses for.
pub const MDNS_SERVICE_TYPE: &str = "_midi-network._tcp.local.";

/// UDP multicast fallback group (spec.md §6). Chosen in the unprivileged range.
pub const DEFAULT_MULTICAST_GROUP: &str = "239.255.42.99";
pub const DEFAULT_MULTICAST_PORT: u16 = 15353;

pub const MULTICAST_ANNOUNCE_INTERVAL_MS: u64 = 1000;
pub const MULTICAST_MISSED_INTERVALS_GONE: u32 = 2;

pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 3000;

pub const RELIABLE_RETRY_MS: u64 = 100;
pub const RELIABLE_MAX_ATTEMPTS: u32 = 3;

pub const REORDER_LOOKAHEAD: u16 = 32;
pub const REORDER_TIMEOUT_MS: u64 = 50;
pub const DEDUP_WINDOW: usize = 256;
pub const GAP_THRESHOLD: i32 = 50;
