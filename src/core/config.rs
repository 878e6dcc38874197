use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Port to listen on; `None` runs a dial-only peer.
    pub port: Option<u16>,
    pub max_connections: usize,
    pub node_name: String,
    pub dht_enabled: bool,
    /// DHT bootstrap node as `host:port`.
    pub dht_bootstrap: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            max_connections: 200,
            node_name: "peermesh".to_string(),
            dht_enabled: false,
            dht_bootstrap: None,
        }
    }
}
