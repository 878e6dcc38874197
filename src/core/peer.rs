use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::network::connection::{Connection, SessionEvent};
use crate::network::dht::{Dht, NodeId, DEFAULT_TTL};
use crate::network::message::{Message, MessageType};
use crate::network::session::Session;
use crate::utils::{MetricsCollector, P2pError, Result};

/// A mesh node: the listener, the outbound dialer, and the single dispatch
/// task that feeds the session and the DHT engine.
///
/// Must be created inside a tokio runtime; all socket work runs on it.
pub struct Peer {
    session: Arc<Session>,
    metrics: Arc<MetricsCollector>,
    running: AtomicBool,
    local_port: AtomicU16,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    dht: RwLock<Option<Arc<Dht>>>,
}

impl Peer {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(MetricsCollector::new());
        let session = Arc::new(Session::new(events_tx, metrics.clone()));

        let dispatch = tokio::spawn(Self::dispatch_loop(session.clone(), events_rx));

        Self {
            session,
            metrics,
            running: AtomicBool::new(false),
            local_port: AtomicU16::new(0),
            accept_task: Mutex::new(None),
            dispatch_task: Mutex::new(Some(dispatch)),
            dht: RwLock::new(None),
        }
    }

    /// The one consumer of connection events. Session and DHT state only
    /// mutate from here or from API calls, in per-connection arrival order.
    async fn dispatch_loop(
        session: Arc<Session>,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Inbound { conn, message } => {
                    session.handle_message(message, conn).await;
                }
                SessionEvent::Disconnected { conn } => {
                    session.remove(&conn).await;
                }
            }
        }
    }

    /// Bind the listener and start accepting. Connections past
    /// `max_connections` are rejected at accept time.
    pub async fn start_server(&self, port: u16, max_connections: usize) -> Result<()> {
        if self.accept_task.lock().unwrap().is_some() {
            error!("Server is already running");
            return Err(P2pError::InvalidArgument(
                "Server is already running".to_string(),
            ));
        }

        if port == 0 {
            error!("Invalid port (0)");
            return Err(P2pError::InvalidArgument("Invalid port (0)".to_string()));
        }

        if max_connections == 0 || max_connections > 1000 {
            error!("Invalid max_connections value");
            return Err(P2pError::InvalidArgument(
                "Invalid max_connections value".to_string(),
            ));
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        self.local_port
            .store(listener.local_addr()?.port(), Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        info!("Server started on port {}", port);
        info!("Maximum connections: {}", max_connections);

        let session = self.session.clone();
        let handle = tokio::spawn(Self::accept_loop(listener, session, max_connections));
        *self.accept_task.lock().unwrap() = Some(handle);

        Ok(())
    }

    async fn accept_loop(listener: TcpListener, session: Arc<Session>, max_connections: usize) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if session.connection_count().await >= max_connections {
                        error!("Connection limit reached, rejecting connection from {}", addr);
                        drop(stream);
                        continue;
                    }

                    match Connection::new(stream) {
                        Ok(conn) => {
                            if let Err(e) = session.add(conn).await {
                                error!("Failed to register connection from {}: {}", addr, e);
                            }
                        }
                        Err(e) => error!("Failed to accept connection from {}: {}", addr, e),
                    }
                }
                Err(e) => error!("Accept error: {}", e),
            }
        }
    }

    /// Dial a remote peer and register the connection. Returns the local
    /// connection id. Works without a listener.
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<u64> {
        if host.is_empty() || port == 0 {
            error!("Invalid host or port");
            return Err(P2pError::InvalidArgument("Invalid host or port".to_string()));
        }

        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            P2pError::ConnectionFailed(format!("Failed to connect to {}:{}: {}", host, port, e))
        })?;

        info!("Connected to {}:{}", host, port);
        self.running.store(true, Ordering::SeqCst);

        let conn = Connection::new(stream)?;
        self.session.add(conn).await
    }

    /// Send a DATA message to one connection by id.
    pub async fn send_message(&self, peer_id: u64, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(P2pError::InvalidArgument("Empty message".to_string()));
        }

        match self.session.get(peer_id).await {
            Some(conn) => conn.send(&Message::from_text(MessageType::Data, text)?),
            None => {
                error!("No connection with ID: {}", peer_id);
                Err(P2pError::NotConnected)
            }
        }
    }

    /// Send a DATA message to every connection.
    pub async fn broadcast_message(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(P2pError::InvalidArgument("Empty message".to_string()));
        }

        let message = Message::from_text(MessageType::Data, text)?;
        self.session.broadcast(&message, None).await;
        Ok(())
    }

    pub async fn connection_count(&self) -> usize {
        self.session.connection_count().await
    }

    pub async fn list_connections(&self) -> Vec<(u64, String)> {
        self.session.list_connections().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound listener port, once the server started.
    pub fn local_port(&self) -> u16 {
        self.local_port.load(Ordering::SeqCst)
    }

    pub fn metrics_summary(&self) -> String {
        self.metrics.summary()
    }

    /// Create the DHT engine and route DHT frames to it. Requires a running
    /// peer. Idempotent.
    pub async fn enable_dht(&self) -> Result<()> {
        if !self.is_running() {
            error!("Server must be running to enable DHT");
            return Err(P2pError::NotRunning);
        }

        let mut dht_guard = self.dht.write().await;
        if dht_guard.is_some() {
            warn!("DHT is already enabled");
            return Ok(());
        }

        let dht = Dht::new(self.session.clone());
        let tx = dht.start()?;
        self.session.set_dht_handler(tx);
        *dht_guard = Some(dht);

        info!("DHT enabled");
        Ok(())
    }

    /// Connect to a bootstrap node and seed the DHT routing table with it.
    pub async fn bootstrap_dht(&self, host: &str, port: u16) -> Result<()> {
        let dht = self.dht().await.ok_or_else(|| {
            error!("DHT is not enabled");
            P2pError::InvalidArgument("DHT is not enabled".to_string())
        })?;

        if host.is_empty() || port == 0 {
            return Err(P2pError::InvalidArgument("Invalid host or port".to_string()));
        }

        self.connect_to(host, port).await?;
        info!("Connected to bootstrap node {}:{}", host, port);

        dht.bootstrap(host, port).await
    }

    /// Bootstrap against several nodes; succeeds when any of them is
    /// reachable.
    pub async fn join_network(&self, nodes: &[(String, u16)]) -> Result<()> {
        if nodes.is_empty() {
            return Err(P2pError::InvalidArgument(
                "No bootstrap nodes provided".to_string(),
            ));
        }

        let mut reached = false;
        for (host, port) in nodes {
            match self.bootstrap_dht(host, *port).await {
                Ok(()) => reached = true,
                Err(e) => warn!("Bootstrap via {}:{} failed: {}", host, port, e),
            }
        }

        if reached {
            Ok(())
        } else {
            Err(P2pError::ConnectionFailed(
                "Could not reach any bootstrap node".to_string(),
            ))
        }
    }

    pub async fn dht_store(&self, key: &str, value: &[u8]) -> bool {
        match self.dht().await {
            Some(dht) => dht.store(key, value, DEFAULT_TTL).await,
            None => {
                error!("DHT is not enabled");
                false
            }
        }
    }

    pub async fn dht_retrieve(&self, key: &str) -> Option<Vec<u8>> {
        match self.dht().await {
            Some(dht) => dht.retrieve(key).await,
            None => {
                error!("DHT is not enabled");
                None
            }
        }
    }

    pub async fn dht_stats(&self) -> String {
        match self.dht().await {
            Some(dht) => dht.stats(),
            None => "DHT is not enabled".to_string(),
        }
    }

    pub async fn dht_node_id(&self) -> Option<NodeId> {
        self.dht().await.map(|dht| dht.node_id())
    }

    async fn dht(&self) -> Option<Arc<Dht>> {
        self.dht.read().await.clone()
    }

    /// Cancel the acceptor, stop the DHT, and close every connection.
    /// Idempotent.
    pub async fn stop_server(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut dht_guard = self.dht.write().await;
            if let Some(dht) = dht_guard.take() {
                dht.stop();
                self.session.clear_dht_handler();
            }
        }

        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }

        for conn in self.session.all_connections().await {
            conn.disconnect();
        }

        info!("Server stopped");
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.dispatch_task.lock().unwrap().take() {
            task.abort();
        }
    }
}
