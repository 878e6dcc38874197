use log::debug;
use std::collections::BTreeMap;
use std::time::Duration;

use super::contact::Contact;
use super::kbucket::KBucket;
use super::node_id::{NodeId, ID_BITS};

/// The 160 K-buckets, indexed by the most significant bit in which a
/// contact's id differs from ours. Locking lives in the buckets; the table
/// itself holds none.
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId) -> Self {
        let buckets = (0..ID_BITS).map(|_| KBucket::new()).collect();
        Self { self_id, buckets }
    }

    /// Record an observation of a contact. Our own id, empty addresses, and
    /// port 0 are ignored.
    pub fn update(&self, id: NodeId, address: &str, port: u16) -> bool {
        if id == self.self_id {
            return false;
        }

        if address.is_empty() || port == 0 {
            return false;
        }

        match self.self_id.bucket_index(&id) {
            Some(index) => {
                debug!("Updating contact {} in bucket {}", id, index);
                self.buckets[index].update(Contact::new(id, address, port))
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &NodeId) -> bool {
        match self.self_id.bucket_index(id) {
            Some(index) => self.buckets[index].remove(id),
            None => false,
        }
    }

    /// The `count` known contacts closest to `target`, ascending by XOR
    /// distance. Keying by distance also deduplicates.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        if count == 0 {
            return Vec::new();
        }

        let mut by_distance = BTreeMap::new();
        for bucket in &self.buckets {
            for contact in bucket.contacts() {
                by_distance.insert(contact.id.distance(target), contact);
            }
        }

        by_distance.into_values().take(count).collect()
    }

    pub fn find_contact(&self, id: &NodeId) -> Option<Contact> {
        let index = self.self_id.bucket_index(id)?;
        self.buckets[index]
            .contacts()
            .into_iter()
            .find(|c| &c.id == id)
    }

    pub fn all_contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.contacts())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Indices of the populated buckets that have seen no update or refresh
    /// for `max_idle`.
    pub fn stale_bucket_indices(&self, max_idle: Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty() && bucket.idle_for() > max_idle)
            .map(|(index, _)| index)
            .collect()
    }

    /// Mark a bucket as freshly refreshed.
    pub fn touch_bucket(&self, index: usize) {
        if let Some(bucket) = self.buckets.get(index) {
            bucket.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_is_never_inserted() {
        let self_id = NodeId::random();
        let table = RoutingTable::new(self_id);

        assert!(!table.update(self_id, "127.0.0.1", 8080));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_invalid_endpoints_are_ignored() {
        let table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();

        assert!(!table.update(id, "", 8080));
        assert!(!table.update(id, "127.0.0.1", 0));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_contact_lands_in_its_bucket_only() {
        let self_id = NodeId::new([0u8; 20]);
        let table = RoutingTable::new(self_id);

        for k in [0usize, 7, 63, 159] {
            let id = NodeId::at_distance(&self_id, k).unwrap();
            assert!(table.update(id, "127.0.0.1", 8080));
            assert!(table.find_contact(&id).is_some());
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_find_closest_is_ascending() {
        let self_id = NodeId::random();
        let table = RoutingTable::new(self_id);

        for i in 0..50u16 {
            let id = NodeId::from_key(&format!("contact-{}", i));
            table.update(id, "127.0.0.1", 8000 + i);
        }

        let target = NodeId::from_key("target");
        let closest = table.find_closest(&target, 20);
        assert_eq!(closest.len(), 20);

        for pair in closest.windows(2) {
            let d0 = pair[0].id.distance(&target);
            let d1 = pair[1].id.distance(&target);
            assert!(d0 < d1);
        }
    }

    #[test]
    fn test_find_closest_caps_count() {
        let table = RoutingTable::new(NodeId::random());
        for i in 0..5u16 {
            table.update(NodeId::from_key(&format!("c{}", i)), "127.0.0.1", 9000 + i);
        }

        assert_eq!(table.find_closest(&NodeId::random(), 3).len(), 3);
        assert_eq!(table.find_closest(&NodeId::random(), 20).len(), 5);
        assert!(table.find_closest(&NodeId::random(), 0).is_empty());
    }

    #[test]
    fn test_update_refreshes_existing_endpoint() {
        let table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();

        table.update(id, "127.0.0.1", 8080);
        table.update(id, "10.0.0.2", 8081);

        assert_eq!(table.len(), 1);
        let contact = table.find_contact(&id).unwrap();
        assert_eq!(contact.address, "10.0.0.2");
        assert_eq!(contact.port, 8081);
    }

    #[test]
    fn test_remove() {
        let table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();

        table.update(id, "127.0.0.1", 8080);
        assert!(table.remove(&id));
        assert!(!table.remove(&id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_bucket_tracking() {
        let table = RoutingTable::new(NodeId::random());

        // Empty buckets are never reported stale.
        assert!(table.stale_bucket_indices(Duration::ZERO).is_empty());

        table.update(NodeId::random(), "127.0.0.1", 8080);
        std::thread::sleep(Duration::from_millis(5));

        let stale = table.stale_bucket_indices(Duration::ZERO);
        assert_eq!(stale.len(), 1);

        table.touch_bucket(stale[0]);
        assert!(table.stale_bucket_indices(Duration::from_secs(1)).is_empty());
    }
}
