//! mDNS-based discovery via `mdns-sd`, advertising and browsing
//! `_midi-network._tcp.local.` (spec.md §4.4).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use midi_mesh_proto::{NodeId, NodeInfo, MDNS_SERVICE_TYPE};

use super::{DiscoveryEvent, DiscoverySink};

/// Registers `node_info` with the local mDNS daemon and browses for peers,
/// forwarding `PeerAppeared`/`PeerGone` to `sink` until the daemon shuts
/// down or the task is aborted. Filters out this node's own advertisement
/// by comparing the `uuid` TXT property, never the hostname, so two
/// instances on the same host are still visible to each other.
pub async fn run(node_info: NodeInfo, sink: DiscoverySink) -> anyhow::Result<()> {
    let mdns = ServiceDaemon::new()?;
    let self_uuid = node_info.uuid;

    let instance_name = format!("midi-mesh-{}", node_info.uuid.to_hex());
    let mut properties = HashMap::new();
    properties.insert("uuid".to_string(), node_info.uuid.to_hex());
    properties.insert("version".to_string(), node_info.version.clone());
    properties.insert("udp_port".to_string(), node_info.udp_port.to_string());
    properties.insert("device_count".to_string(), node_info.device_count.to_string());
    properties.insert("name".to_string(), node_info.name.clone());

    let ip: Ipv4Addr = node_info.ip.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
    let service = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance_name,
        &format!("{}.local.", instance_name),
        ip,
        node_info.http_port,
        properties,
    )?;
    mdns.register(service)?;
    info!(uuid = %self_uuid, service_type = MDNS_SERVICE_TYPE, "mDNS advertisement registered");

    let receiver = mdns.browse(MDNS_SERVICE_TYPE)?;

    // mDNS ServiceRemoved events only carry the fullname, not the TXT
    // record, so the uuid has to be remembered from the resolve event.
    let known: Arc<Mutex<HashMap<String, NodeId>>> = Arc::new(Mutex::new(HashMap::new()));

    loop {
        let event = match receiver.recv_async().await {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "mDNS browse channel closed");
                return Err(anyhow::anyhow!("mDNS browse channel closed: {e}"));
            }
        };

        match event {
            ServiceEvent::ServiceResolved(info) => {
                if let Some(peer) = parse_peer(&info) {
                    if peer.uuid == self_uuid {
                        continue;
                    }
                    known.lock().await.insert(info.get_fullname().to_string(), peer.uuid);
                    debug!(peer = %peer.uuid, "mDNS peer resolved");
                    let _ = sink.send(DiscoveryEvent::PeerAppeared(peer));
                }
            }
            ServiceEvent::ServiceRemoved(_service_type, fullname) => {
                if let Some(peer_id) = known.lock().await.remove(&fullname) {
                    debug!(peer = %peer_id, "mDNS peer removed");
                    let _ = sink.send(DiscoveryEvent::PeerGone(peer_id));
                }
            }
            ServiceEvent::SearchStarted(service_type) => {
                info!(service_type = %service_type, "mDNS search started");
            }
            other => {
                debug!(?other, "mDNS event");
            }
        }
    }
}

fn parse_peer(info: &ServiceInfo) -> Option<NodeInfo> {
    let props = info.get_properties();
    let uuid = NodeId::from_hex(props.get_property_val_str("uuid")?).ok()?;
    let version = props.get_property_val_str("version").unwrap_or("unknown").to_string();
    let udp_port: u16 = props.get_property_val_str("udp_port")?.parse().ok()?;
    let device_count: u32 = props
        .get_property_val_str("device_count")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let name = props.get_property_val_str("name").unwrap_or("unknown").to_string();
    let ip = info.get_addresses().iter().next().map(|a| a.to_string())?;

    if ip.is_empty() {
        warn!(peer = %uuid, "Resolved mDNS peer with no addresses");
        return None;
    }

    Some(NodeInfo {
        uuid,
        name,
        hostname: info.get_hostname().trim_end_matches('.').to_string(),
        ip,
        http_port: info.get_port(),
        udp_port,
        version,
        device_count,
    })
}
