//! One peer's connection lifecycle (spec.md §4.9).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use midi_mesh_proto::{HandshakeDeviceView, HandshakeRequest, HandshakeResponse, NodeId, NodeInfo};
use reqwest::Client;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Failed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("malformed handshake response: {0}")]
    MalformedJson(String),
    #[error("protocol version mismatch: peer={peer}, self={ours}")]
    VersionMismatch { peer: String, ours: String },
    #[error("handshake timed out")]
    Timeout,
}

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// One peer's connection state machine. Cheap to snapshot: `state()` reads
/// a single atomic so the HTTP mesh view never blocks on the mesh worker.
pub struct NetworkConnection {
    peer_uuid: NodeId,
    peer_info: Mutex<NodeInfo>,
    state: AtomicU8,
    failure_reason: Mutex<Option<String>>,
    udp_endpoint: Mutex<Option<SocketAddr>>,
    devices: Mutex<Vec<HandshakeDeviceView>>,
    last_heartbeat: Mutex<Instant>,
    on_state_change: Option<Arc<dyn Fn(NodeId, ConnectionState) + Send + Sync>>,
}

impl NetworkConnection {
    pub fn new(peer_info: NodeInfo) -> Self {
        Self {
            peer_uuid: peer_info.uuid,
            peer_info: Mutex::new(peer_info),
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            failure_reason: Mutex::new(None),
            udp_endpoint: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
            last_heartbeat: Mutex::new(Instant::now()),
            on_state_change: None,
        }
    }

    pub fn with_state_change_callback(mut self, cb: Arc<dyn Fn(NodeId, ConnectionState) + Send + Sync>) -> Self {
        self.on_state_change = Some(cb);
        self
    }

    pub fn peer_uuid(&self) -> NodeId {
        self.peer_uuid
    }

    pub fn peer_info(&self) -> NodeInfo {
        self.peer_info.lock().unwrap().clone()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn udp_endpoint(&self) -> Option<SocketAddr> {
        *self.udp_endpoint.lock().unwrap()
    }

    pub fn devices(&self) -> Vec<HandshakeDeviceView> {
        self.devices.lock().unwrap().clone()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.lock().unwrap().clone()
    }

    fn set_state(&self, new_state: ConnectionState) {
        self.state.store(new_state.to_u8(), Ordering::Release);
        // Invoked after the atomic store completes and with no internal
        // lock held, per spec.md §4.9's callback-safety requirement.
        if let Some(cb) = &self.on_state_change {
            cb(self.peer_uuid, new_state);
        }
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock().unwrap()
    }

    pub fn time_since_last_heartbeat(&self) -> Duration {
        self.last_heartbeat().elapsed()
    }

    pub fn is_alive(&self, threshold: Duration) -> bool {
        self.time_since_last_heartbeat() < threshold
    }

    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(peer = %self.peer_uuid, reason = %reason, "Connection failed");
        *self.failure_reason.lock().unwrap() = Some(reason);
        self.set_state(ConnectionState::Failed);
    }

    /// Performs the HTTP handshake (spec.md §6) against `http_addr`,
    /// transitioning Disconnected → Connecting → Connected/Failed.
    pub async fn connect(
        &self,
        client: &Client,
        http_addr: SocketAddr,
        request: &HandshakeRequest,
    ) -> Result<(), HandshakeError> {
        self.set_state(ConnectionState::Connecting);

        let url = format!("http://{http_addr}/network/handshake");
        let result = client
            .post(&url)
            .json(request)
            .timeout(HANDSHAKE_TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let err = HandshakeError::Http(format!("status {}", resp.status()));
                self.fail(err.to_string());
                return Err(err);
            }
            Err(e) if e.is_timeout() => {
                self.fail(HandshakeError::Timeout.to_string());
                return Err(HandshakeError::Timeout);
            }
            Err(e) => {
                let err = HandshakeError::Http(e.to_string());
                self.fail(err.to_string());
                return Err(err);
            }
        };

        let body: HandshakeResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                let err = HandshakeError::MalformedJson(e.to_string());
                self.fail(err.to_string());
                return Err(err);
            }
        };

        if body.version != request.version {
            warn!(peer = %self.peer_uuid, peer_version = %body.version, our_version = %request.version, "Protocol version mismatch");
            let err = HandshakeError::VersionMismatch {
                peer: body.version.clone(),
                ours: request.version.clone(),
            };
            self.fail(err.to_string());
            return Err(err);
        }

        let udp_addr: Option<SocketAddr> = body.udp_endpoint.parse().ok();
        *self.udp_endpoint.lock().unwrap() = udp_addr;
        *self.devices.lock().unwrap() = body.devices.clone();
        self.touch_heartbeat();

        info!(peer = %self.peer_uuid, devices = body.devices.len(), "Handshake succeeded");
        self.set_state(ConnectionState::Connected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> NodeInfo {
        NodeInfo {
            uuid: NodeId::new_v4(),
            name: "peer".into(),
            hostname: "host".into(),
            ip: "127.0.0.1".into(),
            http_port: 0,
            udp_port: 0,
            version: "1.0".into(),
            device_count: 0,
        }
    }

    #[test]
    fn initial_state_is_disconnected() {
        let conn = NetworkConnection::new(sample_info());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let conn = NetworkConnection::new(sample_info());
        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn state_change_callback_fires_without_holding_lock() {
        use std::sync::atomic::{AtomicUsize, Ordering as O};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let conn = NetworkConnection::new(sample_info())
            .with_state_change_callback(Arc::new(move |_id, _state| {
                calls2.fetch_add(1, O::SeqCst);
            }));
        conn.disconnect();
        assert_eq!(calls.load(O::SeqCst), 1);
    }

    #[test]
    fn is_alive_reflects_threshold() {
        let conn = NetworkConnection::new(sample_info());
        conn.touch_heartbeat();
        assert!(conn.is_alive(Duration::from_secs(1)));
        assert!(!conn.is_alive(Duration::from_nanos(0)));
    }
}
