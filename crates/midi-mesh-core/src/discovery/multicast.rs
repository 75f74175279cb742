//! UDP multicast fallback discovery for networks where mDNS multicast
//! doesn't reach (spec.md §4.4). Periodically broadcasts a JSON
//! announcement on `239.255.42.99:15353` (configurable) and maintains a
//! last-seen timestamp per peer; a peer not heard from in `2 x interval`
//! fires `PeerGone`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use midi_mesh_proto::{NodeId, NodeInfo};

use super::{DiscoveryEvent, DiscoverySink};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Announcement {
    uuid: String,
    name: String,
    hostname: String,
    ip: String,
    http_port: u16,
    udp_port: u16,
    version: String,
    device_count: u32,
}

impl From<&NodeInfo> for Announcement {
    fn from(info: &NodeInfo) -> Self {
        Self {
            uuid: info.uuid.to_hex(),
            name: info.name.clone(),
            hostname: info.hostname.clone(),
            ip: info.ip.clone(),
            http_port: info.http_port,
            udp_port: info.udp_port,
            version: info.version.clone(),
            device_count: info.device_count,
        }
    }
}

impl Announcement {
    fn into_node_info(self) -> Option<NodeInfo> {
        Some(NodeInfo {
            uuid: NodeId::from_hex(&self.uuid).ok()?,
            name: self.name,
            hostname: self.hostname,
            ip: self.ip,
            http_port: self.http_port,
            udp_port: self.udp_port,
            version: self.version,
            device_count: self.device_count,
        })
    }
}

fn bind_multicast_socket(group: Ipv4Addr, port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Runs the periodic announce loop and the receive-and-age-out loop
/// concurrently until either task errors.
pub async fn run(
    node_info: NodeInfo,
    sink: DiscoverySink,
    group: Ipv4Addr,
    port: u16,
    announce_interval: Duration,
) -> anyhow::Result<()> {
    let socket = Arc::new(bind_multicast_socket(group, port)?);
    let dest: SocketAddr = SocketAddr::V4(SocketAddrV4::new(group, port));
    info!(%group, port, "Multicast discovery listening");

    let last_seen: Arc<Mutex<HashMap<NodeId, Instant>>> = Arc::new(Mutex::new(HashMap::new()));

    let announcer = {
        let socket = Arc::clone(&socket);
        let announcement = Announcement::from(&node_info);
        let self_uuid = node_info.uuid;
        async move {
            let body = match serde_json::to_vec(&announcement) {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "Failed to serialize multicast announcement");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(announce_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&body, dest).await {
                    warn!(error = %e, peer = %self_uuid, "Multicast announce send failed");
                }
            }
        }
    };

    let receiver = {
        let socket = Arc::clone(&socket);
        let self_uuid = node_info.uuid;
        let sink = sink.clone();
        let last_seen = Arc::clone(&last_seen);
        async move {
            let mut buf = [0u8; 1024];
            loop {
                let (len, _from) = match socket.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "Multicast recv error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                let Ok(announcement) = serde_json::from_slice::<Announcement>(&buf[..len]) else {
                    continue;
                };
                let Some(peer) = announcement.into_node_info() else {
                    continue;
                };
                if peer.uuid == self_uuid {
                    continue;
                }

                let is_new = {
                    let mut seen = last_seen.lock().await;
                    let is_new = !seen.contains_key(&peer.uuid);
                    seen.insert(peer.uuid, Instant::now());
                    is_new
                };

                if is_new {
                    debug!(peer = %peer.uuid, "Multicast peer discovered");
                    let _ = sink.send(DiscoveryEvent::PeerAppeared(peer));
                }
            }
        }
    };

    let reaper = {
        let last_seen = Arc::clone(&last_seen);
        let gone_after = announce_interval * midi_mesh_proto::MULTICAST_MISSED_INTERVALS_GONE;
        async move {
            let mut ticker = tokio::time::interval(announce_interval);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut seen = last_seen.lock().await;
                let gone: Vec<NodeId> = seen
                    .iter()
                    .filter(|(_, last)| now.duration_since(**last) > gone_after)
                    .map(|(id, _)| *id)
                    .collect();
                for id in gone {
                    seen.remove(&id);
                    debug!(peer = %id, "Multicast peer timed out");
                    let _ = sink.send(DiscoveryEvent::PeerGone(id));
                }
            }
        }
    };

    tokio::select! {
        _ = announcer => {}
        _ = receiver => {}
        _ = reaper => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_roundtrips_through_json() {
        let info = NodeInfo {
            uuid: NodeId::new_v4(),
            name: "node-a".into(),
            hostname: "host-a".into(),
            ip: "127.0.0.1".into(),
            http_port: 8080,
            udp_port: 9000,
            version: "1.0".into(),
            device_count: 2,
        };
        let announcement = Announcement::from(&info);
        let bytes = serde_json::to_vec(&announcement).unwrap();
        let decoded: Announcement = serde_json::from_slice(&bytes).unwrap();
        let restored = decoded.into_node_info().unwrap();
        assert_eq!(restored.uuid, info.uuid);
        assert_eq!(restored.name, info.name);
        assert_eq!(restored.udp_port, info.udp_port);
    }
}
