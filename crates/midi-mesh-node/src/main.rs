//! `midi-mesh-node` — the binary. CLI parsing, config loading, tracing
//! init, wiring of every core component, and graceful shutdown.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use midi_mesh_backend::{InputCallback, InputSubscription};
use midi_mesh_core::discovery::{self, DiscoveryEvent};
use midi_mesh_core::router::OutboundPacket;
use midi_mesh_core::transport::reliable::ReliableTransport;
use midi_mesh_core::transport::udp::UdpMidiTransport;
use midi_mesh_core::{
    ConnectionPool, DeviceRegistry, HeartbeatMonitor, MeshManager, MessageBuffer, MidiRouter, NodeConfig,
    NodeIdentity, Route, RoutingTable,
};
use midi_mesh_proto::{DeviceId, DeviceType, HandshakeRequest, MidiPacket, NodeInfo, Owner, PROTOCOL_VERSION};

#[derive(Parser, Debug)]
#[command(name = "midi-mesh-node", about = "Zero-configuration network MIDI mesh node")]
struct Args {
    /// HTTP port to bind (0 = OS-assigned)
    #[arg(default_value_t = 0)]
    http_port: u16,
}

/// Finds a non-loopback local IPv4 address by connecting a UDP socket to a
/// public address; no packet actually leaves the host.
fn local_ipv4() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn config_dir() -> anyhow::Result<std::path::PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "midi-mesh")
        .context("could not determine a config directory for this platform")?;
    Ok(dirs.config_dir().to_path_buf())
}

async fn send_outbound(
    pool: &ConnectionPool,
    transport: &UdpMidiTransport,
    reliable: &ReliableTransport,
    outbound: OutboundPacket,
) {
    let Some(conn) = pool.get(outbound.packet.dest_node).await else {
        warn!(dest = %outbound.packet.dest_node, "No connection for outbound packet");
        return;
    };
    let Some(addr) = conn.udp_endpoint() else {
        warn!(dest = %outbound.packet.dest_node, "Peer has no known UDP endpoint yet");
        return;
    };

    let result = if outbound.reliable {
        reliable.send_reliable(addr, outbound.packet).await
    } else {
        transport.send(addr, &outbound.packet).await
    };
    if let Err(e) = result {
        warn!(dest = %addr, error = %e, "Failed to send outbound packet");
    }
}

async fn handle_inbound(
    addr: std::net::SocketAddr,
    packet: MidiPacket,
    transport: Arc<UdpMidiTransport>,
    reliable: Arc<ReliableTransport>,
    router: Arc<MidiRouter>,
    pool: Arc<ConnectionPool>,
    buffer: Arc<MessageBuffer<MidiPacket>>,
) {
    if let Some(conn) = pool.get(packet.source_node).await {
        conn.touch_heartbeat();
    }

    if packet.flags.heartbeat {
        return;
    }

    if packet.flags.ack {
        if let Some(sequence) = packet.acked_sequence() {
            reliable.handle_ack(packet.source_node, sequence).await;
        }
        return;
    }

    if packet.flags.reliable && reliable.should_ack(packet.source_node, packet.sequence).await {
        let ack = MidiPacket::ack(packet.dest_node, packet.source_node, packet.sequence, 0);
        if let Err(e) = transport.send(addr, &ack).await {
            warn!(peer = %packet.source_node, error = %e, "Failed to send ack");
        }
    }

    let source = packet.source_node;
    let sequence = packet.sequence;
    for delivered in buffer.push(source, sequence, packet) {
        router.deliver(delivered.source_node, delivered.device_id, &delivered.payload).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config_dir = config_dir()?;
    let config = NodeConfig::load_or_default(&config_dir.join("midi-mesh.toml"))
        .context("failed to load node configuration")?
        .with_http_port_override(Some(args.http_port));

    let identity = match NodeIdentity::load_or_create(&config_dir) {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "Failed to load node identity");
            std::process::exit(1);
        }
    };

    let instance_guard = match midi_mesh_core::InstanceManager::acquire(identity.uuid()) {
        Ok(guard) => guard,
        Err(e) => {
            error!(error = %e, "Another instance is already running for this identity");
            std::process::exit(1);
        }
    };

    let node_name = config
        .node
        .name_override
        .clone()
        .unwrap_or_else(|| identity.name().to_string());
    info!(node = %identity.uuid(), name = %node_name, "midi-mesh node starting");

    let registry = Arc::new(DeviceRegistry::new());
    let routing = Arc::new(RoutingTable::new());
    let router = Arc::new(MidiRouter::new(identity.uuid(), Arc::clone(&routing), Arc::clone(&registry)));

    let backend = midi_mesh_backend::create_backend();
    let (midi_in_tx, mut midi_in_rx) = mpsc::unbounded_channel::<(DeviceId, Vec<u8>)>();
    let mut input_subscriptions: Vec<Box<dyn InputSubscription>> = Vec::new();
    let next_device_id = AtomicU16::new(1);

    for device in backend.enumerate() {
        let id = DeviceId(next_device_id.fetch_add(1, Ordering::Relaxed));
        registry
            .add_local(id, device.name.clone(), device.device_type, Some(device.token))
            .await;
        routing
            .add_route(Route {
                device_id: id,
                owner: Owner::Local,
                name: device.name.clone(),
                device_type: device.device_type,
            })
            .await;

        match device.device_type {
            DeviceType::Output => match backend.open_output(device.token) {
                Ok(port) => router.register_local_port(id, Arc::from(port)).await,
                Err(e) => warn!(device = %device.name, error = %e, "Failed to open output port"),
            },
            DeviceType::Input => {
                let tx = midi_in_tx.clone();
                let callback: InputCallback = Arc::new(move |bytes: &[u8]| {
                    let _ = tx.send((id, bytes.to_vec()));
                });
                match backend.open_input(device.token, callback) {
                    Ok(subscription) => input_subscriptions.push(subscription),
                    Err(e) => warn!(device = %device.name, error = %e, "Failed to open input port"),
                }
            }
        }
    }
    drop(midi_in_tx);

    let udp_transport = Arc::new(
        UdpMidiTransport::bind(config.transport.udp_port)
            .await
            .context("failed to bind UDP transport")?,
    );
    let udp_port = udp_transport.local_port().context("failed to read bound UDP port")?;
    let reliable = Arc::new(ReliableTransport::new(
        Arc::clone(&udp_transport),
        Duration::from_millis(config.transport.reliable_retry_ms),
        config.transport.reliable_max_attempts,
    ));

    let ip = local_ipv4();
    let listener = tokio::net::TcpListener::bind(&config.http.listen)
        .await
        .context("failed to bind HTTP listener")?;
    let http_port = listener.local_addr()?.port();

    let self_info = NodeInfo {
        uuid: identity.uuid(),
        name: node_name.clone(),
        hostname: identity.hostname().to_string(),
        ip: ip.clone(),
        http_port,
        udp_port,
        version: PROTOCOL_VERSION.to_string(),
        device_count: registry.len().await as u32,
    };

    let self_request = HandshakeRequest {
        node_id: identity.uuid(),
        node_name: node_name.clone(),
        udp_endpoint: format!("{ip}:{udp_port}"),
        version: PROTOCOL_VERSION.to_string(),
    };

    let pool = Arc::new(ConnectionPool::new());
    let mesh = Arc::new(MeshManager::new(
        identity.uuid(),
        self_request,
        Arc::clone(&pool),
        Arc::clone(&registry),
        Arc::clone(&routing),
    ));

    let app_state = midi_mesh_http::AppState::new(
        identity.uuid(),
        node_name.clone(),
        identity.hostname().to_string(),
        http_port,
        udp_port,
        format!("{ip}:{udp_port}"),
        Arc::clone(&pool),
        Arc::clone(&registry),
        Arc::clone(&routing),
        Arc::clone(&mesh),
        Arc::clone(&router),
    );
    let http_router = midi_mesh_http::build_router(app_state);
    let http_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, http_router).await {
            error!(error = %e, "HTTP server exited");
        }
    });

    let (discovery_tx, mut discovery_rx) = mpsc::unbounded_channel::<DiscoveryEvent>();

    let mdns_task = {
        let info = self_info.clone();
        let tx = discovery_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = discovery::mdns::run(info, tx).await {
                warn!(error = %e, "mDNS discovery ended; relying on multicast fallback");
            }
        })
    };

    let multicast_task = {
        let info = self_info.clone();
        let tx = discovery_tx.clone();
        let group: Ipv4Addr = config
            .discovery
            .multicast_group
            .parse()
            .unwrap_or(Ipv4Addr::new(239, 255, 42, 99));
        let port = config.discovery.multicast_port;
        let interval = Duration::from_millis(config.discovery.announce_interval_ms);
        tokio::spawn(async move {
            if let Err(e) = discovery::multicast::run(info, tx, group, port, interval).await {
                error!(error = %e, "Multicast discovery failed; node may be isolated");
            }
        })
    };
    drop(discovery_tx);

    let mesh_task = {
        let mesh = Arc::clone(&mesh);
        tokio::spawn(async move {
            while let Some(event) = discovery_rx.recv().await {
                match event {
                    DiscoveryEvent::PeerAppeared(peer) => mesh.on_peer_appeared(peer).await,
                    DiscoveryEvent::PeerGone(peer) => mesh.on_peer_gone(peer).await,
                }
            }
        })
    };

    let heartbeat_monitor = Arc::new(HeartbeatMonitor::with_defaults(
        Arc::clone(&pool),
        Arc::clone(&registry),
        Arc::clone(&routing),
    ));
    let heartbeat_task = {
        let monitor = Arc::clone(&heartbeat_monitor);
        let pool = Arc::clone(&pool);
        let transport = Arc::clone(&udp_transport);
        let self_id = identity.uuid();
        let next_seq = AtomicU16::new(0);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(midi_mesh_proto::HEARTBEAT_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let mut due = Vec::new();
                monitor.tick_once(&mut |peer| due.push(peer)).await;
                for peer in due {
                    let Some(conn) = pool.get(peer).await else { continue };
                    let Some(addr) = conn.udp_endpoint() else { continue };
                    let seq = next_seq.fetch_add(1, Ordering::Relaxed);
                    let packet = MidiPacket::heartbeat(self_id, peer, seq, 0);
                    if let Err(e) = transport.send(addr, &packet).await {
                        warn!(peer = %peer, error = %e, "Failed to send heartbeat");
                    }
                }
            }
        })
    };

    let reliable_tick_task = {
        let reliable = Arc::clone(&reliable);
        let retry_ms = config.transport.reliable_retry_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(retry_ms.max(1)));
            loop {
                ticker.tick().await;
                for failure in reliable.tick(Instant::now()).await {
                    warn!(dest = %failure.dest, sequence = failure.sequence, "Reliable delivery exhausted retries");
                }
            }
        })
    };

    let reorder_buffer: Arc<MessageBuffer<MidiPacket>> = Arc::new(MessageBuffer::with_defaults());

    let expire_task = {
        let buffer = Arc::clone(&reorder_buffer);
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(midi_mesh_proto::REORDER_TIMEOUT_MS));
            loop {
                ticker.tick().await;
                for (source, packet) in buffer.expire_overdue(Instant::now()) {
                    router.deliver(source, packet.device_id, &packet.payload).await;
                }
            }
        })
    };

    let receive_task = {
        let transport_for_recv = Arc::clone(&udp_transport);
        let transport_for_ack = Arc::clone(&udp_transport);
        let reliable = Arc::clone(&reliable);
        let router = Arc::clone(&router);
        let pool = Arc::clone(&pool);
        let buffer = Arc::clone(&reorder_buffer);
        tokio::spawn(async move {
            let result = transport_for_recv
                .run(move |addr, packet| {
                    let transport = Arc::clone(&transport_for_ack);
                    let reliable = Arc::clone(&reliable);
                    let router = Arc::clone(&router);
                    let pool = Arc::clone(&pool);
                    let buffer = Arc::clone(&buffer);
                    tokio::spawn(async move {
                        handle_inbound(addr, packet, transport, reliable, router, pool, buffer).await;
                    });
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "UDP receive loop ended");
            }
        })
    };

    let midi_in_task = {
        let router = Arc::clone(&router);
        let pool = Arc::clone(&pool);
        let transport = Arc::clone(&udp_transport);
        let reliable = Arc::clone(&reliable);
        tokio::spawn(async move {
            while let Some((device_id, bytes)) = midi_in_rx.recv().await {
                if let Some(outbound) = router.send(device_id, &bytes).await {
                    send_outbound(&pool, &transport, &reliable, outbound).await;
                }
            }
        })
    };

    info!(http_port, udp_port, ip = %ip, "midi-mesh node ready");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping");

    // Graceful shutdown order per the concurrency model: discovery, then
    // heartbeat, then transport, then the instance lock.
    mdns_task.abort();
    multicast_task.abort();
    mesh_task.abort();

    heartbeat_task.abort();
    reliable_tick_task.abort();

    receive_task.abort();
    expire_task.abort();
    midi_in_task.abort();
    http_task.abort();
    drop(input_subscriptions);

    drop(instance_guard);
    info!("midi-mesh node stopped");
    Ok(())
}
