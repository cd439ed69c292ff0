//! orama.toml configuration parser.
//!
//! Every node carries one config file describing its identity, where it
//! stores deployment working directories, and how it reaches its peers.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Header value shared by all nodes for internal replica RPC.
pub const INTERNAL_AUTH_TOKEN: &str = "replica-coordination";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub cluster: ClusterSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Stable node identity, unique across the fleet.
    pub id: String,
    /// Address peers use to reach this node.
    pub ip_address: IpAddr,
    /// Domain under which deployment URLs are minted.
    pub base_domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Bind address for the HTTP server.
    pub bind: String,
    /// Port for both the internal replica RPC and the status API.
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9440,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Root under which deployment workdirs, the embedded state store,
    /// and the content object store live.
    pub data_root: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/orama"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    /// Shared secret carried in `X-Orama-Internal-Auth`.
    pub internal_auth_token: String,
    /// Seconds between node registry heartbeats.
    pub heartbeat_interval_s: u64,
    /// Total replicas per deployment (primary included).
    pub replica_count: u32,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            internal_auth_token: INTERNAL_AUTH_TOKEN.to_string(),
            heartbeat_interval_s: 30,
            replica_count: 2,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// State store path under the data root.
    pub fn state_path(&self) -> PathBuf {
        self.storage.data_root.join("orama.redb")
    }

    /// Content object store path under the data root.
    pub fn objects_path(&self) -> PathBuf {
        self.storage.data_root.join("objects")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
[node]
id = "node-a"
ip_address = "10.0.0.1"
base_domain = "orama.host"
"#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.id, "node-a");
        assert_eq!(config.server.port, 9440);
        assert_eq!(config.cluster.replica_count, 2);
        assert_eq!(config.cluster.internal_auth_token, INTERNAL_AUTH_TOKEN);
    }

    #[test]
    fn parse_full_roundtrip() {
        let toml_str = r#"
[node]
id = "node-b"
ip_address = "10.0.0.2"
base_domain = "orama.host"

[server]
bind = "127.0.0.1"
port = 9500

[storage]
data_root = "/tmp/orama-test"

[cluster]
internal_auth_token = "replica-coordination"
heartbeat_interval_s = 10
replica_count = 3
"#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9500);
        assert_eq!(config.cluster.replica_count, 3);
        assert_eq!(config.state_path(), PathBuf::from("/tmp/orama-test/orama.redb"));

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("node-b"));
    }
}
