//! Layered TOML configuration (Ambient — Configuration, SPEC_FULL.md).

use serde::Deserialize;

fn default_announce_interval_ms() -> u64 {
    midi_mesh_proto::MULTICAST_ANNOUNCE_INTERVAL_MS
}

fn default_multicast_group() -> String {
    midi_mesh_proto::DEFAULT_MULTICAST_GROUP.to_string()
}

fn default_multicast_port() -> u16 {
    midi_mesh_proto::DEFAULT_MULTICAST_PORT
}

fn default_service_type() -> String {
    midi_mesh_proto::MDNS_SERVICE_TYPE.to_string()
}

fn default_udp_port() -> u16 {
    0
}

fn default_retry_ms() -> u64 {
    midi_mesh_proto::RELIABLE_RETRY_MS
}

fn default_max_attempts() -> u32 {
    midi_mesh_proto::RELIABLE_MAX_ATTEMPTS
}

fn default_heartbeat_interval_ms() -> u64 {
    midi_mesh_proto::HEARTBEAT_INTERVAL_MS
}

fn default_heartbeat_timeout_ms() -> u64 {
    midi_mesh_proto::HEARTBEAT_TIMEOUT_MS
}

fn default_http_listen() -> String {
    "0.0.0.0:8420".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeSection {
    /// Overrides the derived `"<hostname>-<uuid prefix>"` display name.
    #[serde(default)]
    pub name_override: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            announce_interval_ms: default_announce_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_retry_ms")]
    pub reliable_retry_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub reliable_max_attempts: u32,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            reliable_retry_ms: default_retry_ms(),
            reliable_max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_http_listen")]
    pub listen: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
        }
    }
}

impl NodeConfig {
    /// Parses a config file, falling back to all defaults if absent.
    pub fn load_or_default(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
    }

    /// Applies a CLI-supplied HTTP port override, replacing only the port
    /// component of `http.listen`.
    pub fn with_http_port_override(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            let host = self.http.listen.rsplit_once(':').map(|(h, _)| h).unwrap_or("0.0.0.0");
            self.http.listen = format!("{host}:{port}");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_proto_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.discovery.multicast_port, midi_mesh_proto::DEFAULT_MULTICAST_PORT);
        assert_eq!(config.heartbeat.interval_ms, midi_mesh_proto::HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.transport.reliable_max_attempts, midi_mesh_proto::RELIABLE_MAX_ATTEMPTS);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = NodeConfig::load_or_default(std::path::Path::new("/nonexistent/midi-mesh.toml")).unwrap();
        assert_eq!(config.http.listen, default_http_listen());
    }

    #[test]
    fn http_port_override_replaces_only_the_port() {
        let config = NodeConfig::default().with_http_port_override(Some(9999));
        assert_eq!(config.http.listen, "0.0.0.0:9999");
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml_str = r#"
            [node]
            name_override = "studio-a"

            [http]
            listen = "0.0.0.0:8888"
        "#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.name_override.as_deref(), Some("studio-a"));
        assert_eq!(config.http.listen, "0.0.0.0:8888");
        // Untouched sections still pick up their defaults.
        assert_eq!(config.discovery.multicast_port, midi_mesh_proto::DEFAULT_MULTICAST_PORT);
    }
}
