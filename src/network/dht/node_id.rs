use sha1::{Digest, Sha1};
use std::fmt;

use crate::utils::{P2pError, Result};

/// Number of bytes in a node identifier.
pub const NODE_ID_SIZE: usize = 20;

/// Number of bits, and therefore routing table buckets.
pub const ID_BITS: usize = NODE_ID_SIZE * 8;

/// 160-bit node identifier.
///
/// XOR distance between two ids is the Kademlia metric; the derived ordering
/// is lexicographic over the raw bytes, which makes a distance usable as an
/// ordered map key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    pub fn new(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NODE_ID_SIZE {
            return Err(P2pError::InvalidArgument(format!(
                "Node id must be {} bytes, got {}",
                NODE_ID_SIZE,
                bytes.len()
            )));
        }
        let mut array = [0u8; NODE_ID_SIZE];
        array.copy_from_slice(bytes);
        Ok(Self(array))
    }

    /// Generate a random NodeId
    pub fn random() -> Self {
        let bytes: [u8; NODE_ID_SIZE] = rand::random();
        Self(bytes)
    }

    /// Derive a NodeId from a storage key (SHA-1 of the key bytes).
    pub fn from_key(key: &str) -> Self {
        let digest = Sha1::digest(key.as_bytes());
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Parse a strict 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != NODE_ID_SIZE * 2 {
            return Err(P2pError::InvalidArgument(format!(
                "Invalid hex string length: {}",
                s.len()
            )));
        }

        let bytes = hex::decode(s)
            .map_err(|_| P2pError::InvalidArgument("Invalid hex character in string".to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Bytewise XOR distance to another id.
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; NODE_ID_SIZE];
        for (out, (a, b)) in result.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *out = a ^ b;
        }
        NodeId(result)
    }

    /// Index of the most significant differing bit, scanning from the most
    /// significant byte: 0 means the top bit differs, 159 the bottom bit.
    /// `None` iff the ids are equal.
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let distance = self.distance(other);

        distance
            .0
            .iter()
            .position(|&byte| byte != 0)
            .map(|byte_idx| byte_idx * 8 + distance.0[byte_idx].leading_zeros() as usize)
    }

    /// An id differing from `from` in exactly bit `distance` (MSB-relative).
    pub fn at_distance(from: &NodeId, distance: usize) -> Result<Self> {
        if distance >= ID_BITS {
            return Err(P2pError::InvalidArgument(format!(
                "Distance out of bounds: {}",
                distance
            )));
        }

        let mut bytes = from.0;
        let byte_pos = distance / 8;
        let bit_pos = 7 - (distance % 8);
        bytes[byte_pos] ^= 1 << bit_pos;

        Ok(Self(bytes))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeId").field(&self.to_hex()).finish()
    }
}

// Log lines only need a recognizable prefix.
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_symmetric_and_zero_to_self() {
        let id1 = NodeId::from_key("node1");
        let id2 = NodeId::from_key("node2");

        assert_eq!(id1.distance(&id2), id2.distance(&id1));
        assert_eq!(id1.distance(&id1).0, [0u8; NODE_ID_SIZE]);
    }

    #[test]
    fn test_bucket_index() {
        let id1 = NodeId::new([0xFF; NODE_ID_SIZE]);
        let id2 = NodeId::new([0x7F; NODE_ID_SIZE]);

        // The very first bit differs
        assert_eq!(id1.bucket_index(&id2), Some(0));

        let mut bytes = [0xFF; NODE_ID_SIZE];
        bytes[19] = 0xFE;
        let id3 = NodeId::new(bytes);

        // Only the very last bit differs
        assert_eq!(id1.bucket_index(&id3), Some(159));

        // Equal ids have no bucket
        assert_eq!(id1.bucket_index(&id1), None);
    }

    #[test]
    fn test_at_distance_round_trip() {
        let id = NodeId::random();
        for k in 0..ID_BITS {
            let other = NodeId::at_distance(&id, k).unwrap();
            assert_ne!(id, other);
            assert_eq!(id.bucket_index(&other), Some(k));
        }
    }

    #[test]
    fn test_at_distance_out_of_bounds() {
        let id = NodeId::random();
        assert!(matches!(
            NodeId::at_distance(&id, ID_BITS),
            Err(P2pError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_hex_conversion() {
        let id = NodeId::random();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(NodeId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert!(NodeId::from_hex("abc").is_err());
        assert!(NodeId::from_hex(&"g".repeat(40)).is_err());
        assert!(NodeId::from_hex(&"a".repeat(39)).is_err());
        assert!(NodeId::from_hex(&"a".repeat(41)).is_err());
        assert!(NodeId::from_hex(&"a".repeat(40)).is_ok());
    }

    #[test]
    fn test_key_derivation_is_stable() {
        let a = NodeId::from_key("alpha");
        let b = NodeId::from_key("alpha");
        assert_eq!(a, b);
        assert_ne!(a, NodeId::from_key("beta"));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut low = [0u8; NODE_ID_SIZE];
        low[0] = 1;
        let mut high = [0u8; NODE_ID_SIZE];
        high[0] = 2;
        assert!(NodeId::new(low) < NodeId::new(high));
    }
}
