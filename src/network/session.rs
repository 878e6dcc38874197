use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use tokio::sync::{mpsc, RwLock};

use crate::network::connection::{Connection, SessionEvent};
use crate::network::message::{Message, MessageType};
use crate::utils::{MetricsCollector, P2pError, Result};

/// A DHT control frame handed off to the DHT engine.
pub struct DhtRequest {
    pub message: Message,
    pub sender: Arc<Connection>,
}

/// Registry of live connections keyed by a monotonically assigned local id.
///
/// Ids are never reused within a process lifetime. The id is stored on the
/// connection itself so that disconnect handling finds the entry in O(1).
pub struct Session {
    connections: RwLock<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    metrics: Arc<MetricsCollector>,
    dht_tx: StdRwLock<Option<mpsc::UnboundedSender<DhtRequest>>>,
}

impl Session {
    pub fn new(
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            events_tx,
            metrics,
            dht_tx: StdRwLock::new(None),
        }
    }

    /// Register a connection: assign its id, start its I/O tasks, greet it,
    /// and announce it to the rest of the mesh.
    pub async fn add(&self, connection: Arc<Connection>) -> Result<u64> {
        if !connection.is_connected() {
            return Err(P2pError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        connection.set_id(id);

        self.connections.write().await.insert(id, connection.clone());
        self.metrics.record_connection_established();

        info!("New connection from {}", connection.remote_endpoint());
        info!("Connection ID: {}", id);

        connection.start(self.events_tx.clone(), self.metrics.clone());

        let welcome = format!("Welcome! Your connection ID is {}", id);
        match Message::from_text(MessageType::Handshake, &welcome) {
            Ok(message) => {
                if let Err(e) = connection.send(&message) {
                    error!("Error during connection setup: {}", e);
                }
            }
            Err(e) => error!("Error during connection setup: {}", e),
        }

        let joined = format!("Peer {} joined from {}", id, connection.remote_endpoint());
        if let Ok(message) = Message::from_text(MessageType::Data, &joined) {
            self.broadcast(&message, Some(id)).await;
        }

        Ok(id)
    }

    /// Remove a connection from the registry. Idempotent.
    pub async fn remove(&self, connection: &Arc<Connection>) {
        let id = match connection.id() {
            Some(id) => id,
            None => return,
        };

        if self.connections.write().await.remove(&id).is_none() {
            return;
        }
        self.metrics.record_connection_closed();

        info!("Connection closed: {}", connection.remote_endpoint());
        info!("Connection ID: {}", id);

        let left = format!("Peer {} left", id);
        if let Ok(message) = Message::from_text(MessageType::Data, &left) {
            self.broadcast(&message, None).await;
        }
    }

    /// Send a message to every live connection, optionally skipping one id.
    /// The map is snapshotted under the lock; sends happen outside it.
    pub async fn broadcast(&self, message: &Message, except: Option<u64>) {
        let targets: Vec<Arc<Connection>> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(id, conn)| Some(**id) != except && conn.is_connected())
                .map(|(_, conn)| conn.clone())
                .collect()
        };

        for conn in targets {
            if let Err(e) = conn.send(message) {
                debug!("Broadcast error to {}: {}", conn.remote_endpoint(), e);
            }
        }
    }

    pub async fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .await
            .get(&id)
            .filter(|conn| conn.is_connected())
            .cloned()
    }

    pub async fn get_by_address(&self, address: &str, port: u16) -> Option<Arc<Connection>> {
        if address.is_empty() || port == 0 {
            return None;
        }

        let connections = self.connections.read().await;
        connections
            .values()
            .find(|conn| {
                conn.is_connected()
                    && conn.remote_port() == port
                    && conn.remote_address() == address
            })
            .cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// (id, remote endpoint) pairs for the live connections.
    pub async fn list_connections(&self) -> Vec<(u64, String)> {
        let connections = self.connections.read().await;
        let mut listing: Vec<(u64, String)> = connections
            .iter()
            .filter(|(_, conn)| conn.is_connected())
            .map(|(id, conn)| (*id, conn.remote_endpoint()))
            .collect();
        listing.sort_by_key(|(id, _)| *id);
        listing
    }

    /// Snapshot of every registered connection, for shutdown.
    pub async fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Install the channel that receives DHT control frames.
    pub fn set_dht_handler(&self, tx: mpsc::UnboundedSender<DhtRequest>) {
        *self.dht_tx.write().unwrap() = Some(tx);
    }

    pub fn clear_dht_handler(&self) {
        *self.dht_tx.write().unwrap() = None;
    }

    /// Central dispatcher for inbound frames, invoked by the peer's dispatch
    /// task in per-connection arrival order.
    pub async fn handle_message(&self, message: Message, sender: Arc<Connection>) {
        if !sender.is_connected() {
            return;
        }

        match message.msg_type() {
            MessageType::Handshake => self.handle_handshake(&message, &sender),
            MessageType::Data => self.handle_data(message, sender).await,
            MessageType::Ping => self.handle_ping(message, &sender),
            MessageType::Pong => {
                debug!("Pong from {}", sender.remote_endpoint());
            }
            MessageType::Disconnect => {
                info!("Disconnect message from {}", sender.remote_endpoint());
                sender.disconnect();
            }
            msg_type if msg_type.is_dht() => self.handle_dht(message, sender),
            msg_type => {
                error!("Unhandled message type: {:?}", msg_type);
            }
        }
    }

    fn handle_handshake(&self, message: &Message, sender: &Arc<Connection>) {
        if message.payload().is_empty() {
            return;
        }
        info!(
            "Handshake from {}: {}",
            sender.remote_endpoint(),
            String::from_utf8_lossy(message.payload())
        );
    }

    async fn handle_data(&self, message: Message, sender: Arc<Connection>) {
        if message.payload().is_empty() {
            return;
        }

        let sender_id = sender.id().unwrap_or(0);
        let text = String::from_utf8_lossy(message.payload());
        info!("Data from peer {}: {}", sender_id, text);

        let forwarded = format!("Peer {} says: {}", sender_id, text);
        match Message::from_text(MessageType::Data, &forwarded) {
            Ok(message) => self.broadcast(&message, Some(sender_id)).await,
            Err(e) => error!("Error forwarding message: {}", e),
        }
    }

    fn handle_ping(&self, message: Message, sender: &Arc<Connection>) {
        match Message::new(MessageType::Pong, message.into_payload()) {
            Ok(pong) => {
                if let Err(e) = sender.send(&pong) {
                    error!("Error sending pong: {}", e);
                }
            }
            Err(e) => error!("Error sending pong: {}", e),
        }
    }

    fn handle_dht(&self, message: Message, sender: Arc<Connection>) {
        let guard = self.dht_tx.read().unwrap();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(DhtRequest { message, sender }).is_err() {
                    error!("DHT handler channel closed");
                }
            }
            None => error!("DHT message received but no handler is set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{timeout, Duration};

    struct Harness {
        session: Arc<Session>,
        _events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn harness() -> Harness {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Harness {
            session: Arc::new(Session::new(events_tx, Arc::new(MetricsCollector::new()))),
            _events_rx: events_rx,
        }
    }

    async fn accepted_conn(listener: &TcpListener) -> (Arc<Connection>, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        (Connection::new(stream).unwrap(), client)
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_never_reused() {
        let h = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (c1, _k1) = accepted_conn(&listener).await;
        let (c2, _k2) = accepted_conn(&listener).await;
        assert_eq!(h.session.add(c1.clone()).await.unwrap(), 0);
        assert_eq!(h.session.add(c2.clone()).await.unwrap(), 1);
        assert_eq!(h.session.connection_count().await, 2);

        h.session.remove(&c1).await;
        h.session.remove(&c1).await; // idempotent
        assert_eq!(h.session.connection_count().await, 1);

        // A later connection never reuses the removed id.
        let (c3, _k3) = accepted_conn(&listener).await;
        assert_eq!(h.session.add(c3).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_add_rejects_dead_connection() {
        let h = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (conn, _client) = accepted_conn(&listener).await;
        conn.disconnect();
        assert!(matches!(
            h.session.add(conn).await,
            Err(P2pError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_lookups_skip_disconnected_entries() {
        let h = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (conn, _client) = accepted_conn(&listener).await;
        let id = h.session.add(conn.clone()).await.unwrap();

        let address = conn.remote_address();
        let port = conn.remote_port();
        assert!(h.session.get(id).await.is_some());
        assert!(h.session.get_by_address(&address, port).await.is_some());
        assert!(h.session.get_by_address("", port).await.is_none());
        assert!(h.session.get_by_address(&address, 0).await.is_none());

        conn.disconnect();
        assert!(h.session.get(id).await.is_none());
        assert!(h.session.get_by_address(&address, port).await.is_none());
    }

    #[tokio::test]
    async fn test_dht_frames_route_to_installed_handler() {
        let h = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (conn, _client) = accepted_conn(&listener).await;

        let (dht_tx, mut dht_rx) = mpsc::unbounded_channel();
        h.session.set_dht_handler(dht_tx);

        let frame = Message::new(MessageType::DhtFindNode, b"{}".to_vec()).unwrap();
        h.session.handle_message(frame.clone(), conn.clone()).await;

        let request = timeout(Duration::from_secs(1), dht_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.message, frame);

        // Without a handler the frame is dropped with a log entry.
        h.session.clear_dht_handler();
        h.session.handle_message(frame, conn).await;
        let idle = timeout(Duration::from_millis(100), dht_rx.recv()).await;
        assert!(idle.is_err() || idle.unwrap().is_none());
    }
}
