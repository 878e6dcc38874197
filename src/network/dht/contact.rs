use std::time::Instant;

use super::node_id::NodeId;

/// A known remote peer: id, textual address, TCP port, and when we last
/// observed traffic from it.
#[derive(Clone, Debug)]
pub struct Contact {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
    pub last_seen: Instant,
}

impl Contact {
    pub fn new(id: NodeId, address: &str, port: u16) -> Self {
        Self {
            id,
            address: address.to_string(),
            port,
            last_seen: Instant::now(),
        }
    }

    /// Refresh the last seen time
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Check if the contact has not been seen for a while
    pub fn is_stale(&self, timeout_secs: u64) -> bool {
        self.last_seen.elapsed().as_secs() > timeout_secs
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address && self.port == other.port
    }
}

impl Eq for Contact {}
