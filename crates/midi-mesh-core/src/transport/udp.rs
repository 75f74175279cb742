//! Plain (unreliable) UDP transport for `MidiPacket`s (spec.md §4.5).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};

use midi_mesh_proto::MidiPacket;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct UdpMidiTransport {
    socket: UdpSocket,
    decode_failures: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
}

impl UdpMidiTransport {
    /// Binds a UDP socket on `port` (`0` for an OS-assigned ephemeral port).
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            decode_failures: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        })
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub async fn send(&self, dest: SocketAddr, packet: &MidiPacket) -> Result<(), TransportError> {
        let mut buf = Vec::new();
        packet.encode(&mut buf);
        self.socket.send_to(&buf, dest).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Runs forever, decoding incoming datagrams and handing successfully
    /// decoded packets to `handler(peer_addr, packet)`. Decode failures are
    /// counted and dropped, never propagated as an error.
    pub async fn run<F>(&self, mut handler: F) -> Result<(), TransportError>
    where
        F: FnMut(SocketAddr, MidiPacket),
    {
        let mut buf = [0u8; 1500];
        loop {
            let (len, peer_addr) = self.socket.recv_from(&mut buf).await?;
            self.received.fetch_add(1, Ordering::Relaxed);
            match MidiPacket::decode(&buf[..len]) {
                Ok(packet) => {
                    debug!(from = %peer_addr, sequence = packet.sequence, "Decoded inbound packet");
                    handler(peer_addr, packet);
                }
                Err(e) => {
                    self.decode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(from = %peer_addr, error = %e, "Dropping undecodable datagram");
                }
            }
        }
    }
}
