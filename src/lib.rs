//! Peermesh
//!
//! A peer-to-peer TCP mesh: framed messages over persistent connections, a
//! session registry with broadcast, and a Kademlia-style DHT on top.

pub mod core;
pub mod network;
pub mod utils;

// Re-export main types
pub use crate::core::{Config, Peer};
pub use network::dht::{Dht, NodeId};
pub use network::{Message, MessageType};
pub use utils::{
    setup_logging,
    error::{P2pError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
