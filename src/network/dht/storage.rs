use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::node_id::NodeId;

/// Default lifetime of a stored value.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// A stored value and the instant it stops being served.
#[derive(Clone, Debug)]
pub struct DhtEntry {
    pub value: Vec<u8>,
    pub expiry: Instant,
}

impl DhtEntry {
    pub fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expiry: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiry
    }
}

/// The local key/value store. Expired entries are never returned to callers;
/// the maintenance task reaps them.
pub struct DhtStorage {
    entries: Mutex<HashMap<NodeId, DhtEntry>>,
}

impl DhtStorage {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: NodeId, value: Vec<u8>, ttl: Duration) {
        self.entries
            .lock()
            .unwrap()
            .insert(key, DhtEntry::new(value, ttl));
    }

    /// The stored value, only while unexpired.
    pub fn get_fresh(&self, key: &NodeId) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    pub fn remove(&self, key: &NodeId) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    /// Drop every expired entry, returning how many were reaped.
    pub fn reap_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn expired_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.is_expired())
            .count()
    }
}

impl Default for DhtStorage {
    fn default() -> Self {
        Self::new()
    }
}
