use log::debug;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::contact::Contact;
use super::node_id::NodeId;

/// Maximum number of contacts held per bucket (Kademlia K).
pub const K: usize = 20;

/// An LRU-ordered set of at most K contacts: least recently seen at the
/// front, most recently seen at the back.
pub struct KBucket {
    contacts: Mutex<VecDeque<Contact>>,
    last_touched: Mutex<Instant>,
}

impl KBucket {
    pub fn new() -> Self {
        Self {
            contacts: Mutex::new(VecDeque::new()),
            last_touched: Mutex::new(Instant::now()),
        }
    }

    /// Add or refresh a contact. A known id moves to the tail with its
    /// address and port refreshed; a new contact is appended while there is
    /// room; a full bucket drops the newcomer (the classic rule would ping
    /// the head first).
    pub fn update(&self, contact: Contact) -> bool {
        self.touch();
        let mut contacts = self.contacts.lock().unwrap();

        if let Some(pos) = contacts.iter().position(|c| c.id == contact.id) {
            let mut existing = contacts.remove(pos).unwrap();
            existing.address = contact.address;
            existing.port = contact.port;
            existing.touch();
            contacts.push_back(existing);
            return true;
        }

        if contacts.len() < K {
            contacts.push_back(contact);
            return true;
        }

        debug!("K-bucket full, dropping new contact");
        false
    }

    pub fn remove(&self, id: &NodeId) -> bool {
        let mut contacts = self.contacts.lock().unwrap();
        if let Some(pos) = contacts.iter().position(|c| &c.id == id) {
            contacts.remove(pos);
            return true;
        }
        false
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.contacts.lock().unwrap().iter().any(|c| &c.id == id)
    }

    pub fn least_recently_seen(&self) -> Option<Contact> {
        self.contacts.lock().unwrap().front().cloned()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.contacts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= K
    }

    /// Mark the bucket as recently active (an update or a refresh lookup).
    pub fn touch(&self) {
        *self.last_touched.lock().unwrap() = Instant::now();
    }

    /// How long since the bucket last saw an update or refresh.
    pub fn idle_for(&self) -> Duration {
        self.last_touched.lock().unwrap().elapsed()
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(seed: u8) -> Contact {
        let mut bytes = [0u8; 20];
        bytes[19] = seed;
        Contact::new(NodeId::new(bytes), "127.0.0.1", 8000 + seed as u16)
    }

    #[test]
    fn test_capacity_is_bounded() {
        let bucket = KBucket::new();
        for i in 0..K as u8 {
            assert!(bucket.update(contact(i + 1)));
        }
        assert!(bucket.is_full());

        // The newcomer is dropped, not the head.
        assert!(!bucket.update(contact(200)));
        assert_eq!(bucket.len(), K);
        assert!(!bucket.contains(&contact(200).id));
        assert!(bucket.contains(&contact(1).id));
    }

    #[test]
    fn test_update_moves_to_tail() {
        let bucket = KBucket::new();
        for i in 1..=3u8 {
            bucket.update(contact(i));
        }
        assert_eq!(bucket.least_recently_seen().unwrap().id, contact(1).id);

        // Re-observing the head makes it most recently seen.
        bucket.update(contact(1));
        assert_eq!(bucket.least_recently_seen().unwrap().id, contact(2).id);
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn test_update_refreshes_endpoint() {
        let bucket = KBucket::new();
        let id = contact(7).id;
        bucket.update(contact(7));
        bucket.update(Contact::new(id, "10.1.1.1", 9999));

        let stored = bucket
            .contacts()
            .into_iter()
            .find(|c| c.id == id)
            .unwrap();
        assert_eq!(stored.address, "10.1.1.1");
        assert_eq!(stored.port, 9999);
    }

    #[test]
    fn test_no_duplicates() {
        let bucket = KBucket::new();
        for _ in 0..5 {
            bucket.update(contact(3));
        }
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn test_remove() {
        let bucket = KBucket::new();
        bucket.update(contact(1));
        assert!(bucket.remove(&contact(1).id));
        assert!(!bucket.remove(&contact(1).id));
        assert!(bucket.is_empty());
    }
}
