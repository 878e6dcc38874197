pub mod connection;
pub mod dht;
pub mod message;
pub mod session;

pub use connection::{Connection, SessionEvent};
pub use message::{Message, MessageType, HEADER_SIZE, MAX_BODY_SIZE};
pub use session::Session;
