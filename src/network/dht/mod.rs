//! Kademlia-style Distributed Hash Table
//!
//! Runs over the mesh's framed TCP connections: control messages are
//! type-tagged frames with JSON payloads, routed to the engine by the
//! session dispatcher.

mod contact;
mod engine;
mod kbucket;
mod node_id;
mod payload;
mod routing_table;
mod storage;

pub use contact::Contact;
pub use engine::{Dht, ALPHA, K, MAX_VALUE_SIZE, REPLICATION_FACTOR};
pub use kbucket::KBucket;
pub use node_id::{NodeId, ID_BITS, NODE_ID_SIZE};
pub use routing_table::RoutingTable;
pub use storage::{DhtEntry, DhtStorage, DEFAULT_TTL};
