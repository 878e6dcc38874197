use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};

use super::contact::Contact;
use super::kbucket;
use super::node_id::NodeId;
use super::payload::{
    decode_contacts, encode_contacts, ContactInfo, FindNodePayload, FindValuePayload,
    FindValueReply, StorePayload, StoreReply,
};
use super::routing_table::RoutingTable;
use super::storage::{DhtStorage, DEFAULT_TTL};
use crate::network::connection::Connection;
use crate::network::message::{Message, MessageType, MAX_BODY_SIZE};
use crate::network::session::{DhtRequest, Session};
use crate::utils::{P2pError, Result};

/// Lookup concurrency.
pub const ALPHA: usize = 3;

/// Closest-set width, shared with the bucket size.
pub const K: usize = kbucket::K;

/// How many nodes end up holding a stored value (the local copy counts).
pub const REPLICATION_FACTOR: usize = 3;

/// Largest value accepted for storage.
pub const MAX_VALUE_SIZE: usize = MAX_BODY_SIZE / 2;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);
const LOOKUP_DEADLINE: Duration = Duration::from_secs(5);
const LOOKUP_TICK: Duration = Duration::from_millis(100);
const BUCKET_REFRESH_IDLE: Duration = Duration::from_secs(3600);

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

pub type StoreCallback = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// The Kademlia engine: routing table, local storage, iterative lookups and
/// replication, driven by control frames delivered through the session.
///
/// Outbound queries reuse whatever live connection the session already holds
/// to a contact's observed endpoint; a contact without one is skipped.
pub struct Dht {
    node_id: NodeId,
    session: Arc<Session>,
    routing_table: RoutingTable,
    storage: DhtStorage,
    state: AtomicU8,
    store_callback: Mutex<Option<StoreCallback>>,
    // Last FIND_VALUE key sent per connection id; a found reply on that
    // connection is cached under this key.
    value_queries: Mutex<HashMap<u64, NodeId>>,
    // Retrieves waiting for a value to arrive.
    waiters: Mutex<HashMap<NodeId, Vec<oneshot::Sender<Vec<u8>>>>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    maintenance_task: Mutex<Option<JoinHandle<()>>>,
}

impl Dht {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        let node_id = NodeId::random();

        Arc::new(Self {
            node_id,
            session,
            routing_table: RoutingTable::new(node_id),
            storage: DhtStorage::new(),
            state: AtomicU8::new(STATE_CREATED),
            store_callback: Mutex::new(None),
            value_queries: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            handler_task: Mutex::new(None),
            maintenance_task: Mutex::new(None),
        })
    }

    /// Transition Created -> Started: spawn the inbound handler task and the
    /// maintenance timer, and return the sender the session forwards DHT
    /// frames to.
    pub fn start(self: &Arc<Self>) -> Result<mpsc::UnboundedSender<DhtRequest>> {
        if self
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_STARTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(P2pError::InvalidArgument(
                "DHT has already been started".to_string(),
            ));
        }

        info!("DHT started with node ID: {}", self.node_id.to_hex());

        let (tx, mut rx) = mpsc::unbounded_channel::<DhtRequest>();

        let dht = self.clone();
        let handler = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                dht.handle_message(request.message, request.sender).await;
            }
        });
        *self.handler_task.lock().unwrap() = Some(handler);

        let dht = self.clone();
        let maintenance = tokio::spawn(async move {
            let mut timer = interval(MAINTENANCE_INTERVAL);
            timer.tick().await; // the first tick completes immediately
            loop {
                timer.tick().await;
                dht.run_maintenance().await;
            }
        });
        *self.maintenance_task.lock().unwrap() = Some(maintenance);

        Ok(tx)
    }

    /// Transition Started -> Stopped and cancel the background tasks.
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                STATE_STARTED,
                STATE_STOPPED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Some(task) = self.handler_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.maintenance_task.lock().unwrap().take() {
            task.abort();
        }

        info!("DHT stopped");
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_STARTED
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Callback invoked (outside the storage lock) whenever a remote STORE
    /// lands locally.
    pub fn set_store_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        *self.store_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Seed the routing table with a freshly connected bootstrap node and
    /// look up our own id to populate nearby buckets. The connection itself
    /// is established by the peer before this is called.
    pub async fn bootstrap(&self, host: &str, port: u16) -> Result<()> {
        if !self.is_started() {
            return Err(P2pError::NotRunning);
        }
        if host.is_empty() || port == 0 {
            return Err(P2pError::InvalidArgument(
                "Invalid bootstrap host or port".to_string(),
            ));
        }

        // The bootstrap node's real id is unknown until it appears in a
        // contact list; a placeholder id keeps its endpoint reachable.
        let placeholder = NodeId::random();
        self.routing_table.update(placeholder, host, port);

        self.find_node(self.node_id).await;
        Ok(())
    }

    /// Store a value under a key: always written locally, then replicated to
    /// the closest known nodes until REPLICATION_FACTOR dispatches happened
    /// (the local write counts as one).
    pub async fn store(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        if !self.is_started() {
            error!("DHT is not started");
            return false;
        }

        if key.is_empty() || value.is_empty() {
            error!("Empty key or value not allowed");
            return false;
        }

        if value.len() > MAX_VALUE_SIZE {
            error!("Value too large to be stored in DHT: {} bytes", value.len());
            return false;
        }

        let key_id = NodeId::from_key(key);
        self.storage.insert(key_id, value.to_vec(), ttl);

        let closest = self.find_node(key_id).await;
        if closest.is_empty() {
            info!("No close nodes found to replicate the value");
            return true;
        }

        let payload = StorePayload {
            key: key_id.to_hex(),
            value: value.to_vec(),
            ttl: ttl.as_secs(),
        };
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error during store replication: {}", e);
                return true;
            }
        };

        let mut successful_stores = 1; // the local write
        for contact in &closest {
            if successful_stores >= REPLICATION_FACTOR {
                break;
            }

            if let Some(conn) = self
                .session
                .get_by_address(&contact.address, contact.port)
                .await
            {
                self.send_dht_message(&conn, MessageType::DhtStore, bytes.clone());
                successful_stores += 1;
            }
        }

        successful_stores >= 1
    }

    /// Look a value up: local storage first, then an iterative FIND_VALUE.
    /// Returns `None` once the 5 s deadline passes (or the lookup converges)
    /// without a hit.
    pub async fn retrieve(&self, key: &str) -> Option<Vec<u8>> {
        if !self.is_started() {
            error!("DHT is not started");
            return None;
        }

        if key.is_empty() {
            return None;
        }

        let key_id = NodeId::from_key(key);
        if let Some(value) = self.storage.get_fresh(&key_id) {
            return Some(value);
        }

        // A found reply resolves the waiter directly; the lookup future
        // drives the query fan-out and watches local storage.
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap()
            .entry(key_id)
            .or_default()
            .push(tx);

        let result = tokio::select! {
            reply = rx => reply.ok(),
            found = self.find_value(key_id) => found,
        };

        let mut waiters = self.waiters.lock().unwrap();
        if let Some(list) = waiters.get_mut(&key_id) {
            list.retain(|sender| !sender.is_closed());
            if list.is_empty() {
                waiters.remove(&key_id);
            }
        }

        result
    }

    /// Erase a key from local storage only.
    pub fn remove(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.storage.remove(&NodeId::from_key(key))
    }

    pub fn stats(&self) -> String {
        format!(
            "DHT Stats:\n  Node ID: {}\n  Contacts in routing table: {}\n  Locally stored entries: {} (including {} expired)\n",
            self.node_id.to_hex(),
            self.routing_table.len(),
            self.storage.len(),
            self.storage.expired_count(),
        )
    }

    /// Iterative node lookup. The routing table doubles as the shortlist:
    /// replies fold new contacts into it, and each tick queries whichever
    /// close contacts have not been queried yet. Terminates when a tick
    /// yields no newcomer or the deadline passes.
    pub async fn find_node(&self, target: NodeId) -> Vec<Contact> {
        let shortlist = self.routing_table.find_closest(&target, K);
        if shortlist.is_empty() {
            return Vec::new();
        }

        let payload = FindNodePayload {
            target: target.to_hex(),
            sender: self.node_id.to_hex(),
        };
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error during find_node: {}", e);
                return Vec::new();
            }
        };

        let mut queried: HashSet<NodeId> = HashSet::new();
        for contact in shortlist.iter().take(ALPHA) {
            queried.insert(contact.id);
            self.query_contact(contact, MessageType::DhtFindNode, &bytes, None)
                .await;
        }

        let deadline = Instant::now() + LOOKUP_DEADLINE;
        while Instant::now() < deadline {
            sleep(LOOKUP_TICK).await;

            let mut found_new = false;
            for contact in self.routing_table.find_closest(&target, K) {
                if queried.insert(contact.id) {
                    found_new = true;
                    self.query_contact(&contact, MessageType::DhtFindNode, &bytes, None)
                        .await;
                }
            }

            if !found_new {
                break;
            }
        }

        self.routing_table.find_closest(&target, K)
    }

    /// Iterative value lookup: same control structure as `find_node`, plus a
    /// local storage check on every tick (a found reply is cached locally by
    /// its handler, which this observes).
    async fn find_value(&self, key: NodeId) -> Option<Vec<u8>> {
        if let Some(value) = self.storage.get_fresh(&key) {
            return Some(value);
        }

        let shortlist = self.routing_table.find_closest(&key, K);
        if shortlist.is_empty() {
            return None;
        }

        let payload = FindValuePayload {
            key: key.to_hex(),
            sender: self.node_id.to_hex(),
        };
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error during find_value: {}", e);
                return None;
            }
        };

        let mut queried: HashSet<NodeId> = HashSet::new();
        for contact in shortlist.iter().take(ALPHA) {
            queried.insert(contact.id);
            self.query_contact(contact, MessageType::DhtFindValue, &bytes, Some(key))
                .await;
        }

        let deadline = Instant::now() + LOOKUP_DEADLINE;
        while Instant::now() < deadline {
            sleep(LOOKUP_TICK).await;

            if let Some(value) = self.storage.get_fresh(&key) {
                return Some(value);
            }

            let mut found_new = false;
            for contact in self.routing_table.find_closest(&key, K) {
                if queried.insert(contact.id) {
                    found_new = true;
                    self.query_contact(&contact, MessageType::DhtFindValue, &bytes, Some(key))
                        .await;
                }
            }

            if !found_new {
                break;
            }
        }

        self.storage.get_fresh(&key)
    }

    /// Send one query to a contact through its live connection, if any; a
    /// contact without one is skipped silently.
    async fn query_contact(
        &self,
        contact: &Contact,
        msg_type: MessageType,
        bytes: &[u8],
        value_key: Option<NodeId>,
    ) {
        if let Some(conn) = self
            .session
            .get_by_address(&contact.address, contact.port)
            .await
        {
            if let Some(key) = value_key {
                self.note_value_query(&conn, key);
            }
            self.send_dht_message(&conn, msg_type, bytes.to_vec());
        }
    }

    /// Entry point for inbound DHT control frames, called in arrival order by
    /// the handler task. A malformed payload discards the frame with a log
    /// entry; it never drops the connection.
    pub async fn handle_message(&self, message: Message, sender: Arc<Connection>) {
        if !self.is_started() {
            debug!("DHT message dropped: engine not started");
            return;
        }
        if !sender.is_connected() {
            return;
        }

        let result = match message.msg_type() {
            MessageType::DhtFindNode => self.handle_find_node(&message, &sender).await,
            MessageType::DhtFindNodeReply => self.handle_find_node_reply(&message),
            MessageType::DhtFindValue => self.handle_find_value(&message, &sender).await,
            MessageType::DhtFindValueReply => self.handle_find_value_reply(&message, &sender),
            MessageType::DhtStore => self.handle_store(&message, &sender),
            MessageType::DhtStoreReply => self.handle_store_reply(&message, &sender),
            other => {
                error!("Non-DHT message routed to DHT handler: {:?}", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(
                "Error handling DHT message from {}: {}",
                sender.remote_endpoint(),
                e
            );
        }
    }

    async fn handle_find_node(&self, message: &Message, sender: &Arc<Connection>) -> Result<()> {
        let payload: FindNodePayload = serde_json::from_slice(message.payload())?;
        let target = NodeId::from_hex(&payload.target)?;
        let sender_id = NodeId::from_hex(&payload.sender)?;

        self.routing_table
            .update(sender_id, &sender.remote_address(), sender.remote_port());

        let closest = self.routing_table.find_closest(&target, K);
        let reply = encode_contacts(&closest)?;
        self.send_dht_message(sender, MessageType::DhtFindNodeReply, reply);
        Ok(())
    }

    fn handle_find_node_reply(&self, message: &Message) -> Result<()> {
        let contacts = decode_contacts(message.payload())?;

        for contact in contacts {
            if contact.id != self.node_id {
                self.routing_table
                    .update(contact.id, &contact.address, contact.port);
            }
        }
        Ok(())
    }

    async fn handle_find_value(&self, message: &Message, sender: &Arc<Connection>) -> Result<()> {
        let payload: FindValuePayload = serde_json::from_slice(message.payload())?;
        let key = NodeId::from_hex(&payload.key)?;
        let sender_id = NodeId::from_hex(&payload.sender)?;

        self.routing_table
            .update(sender_id, &sender.remote_address(), sender.remote_port());

        if let Some(value) = self.storage.get_fresh(&key) {
            let reply = FindValueReply {
                found: true,
                value: Some(value),
                contacts: None,
            };
            self.send_dht_message(sender, MessageType::DhtFindValueReply, serde_json::to_vec(&reply)?);
            return Ok(());
        }

        let contacts: Vec<ContactInfo> = self
            .routing_table
            .find_closest(&key, K)
            .iter()
            .filter(|contact| contact.id != sender_id)
            .map(ContactInfo::from_contact)
            .collect();

        let reply = FindValueReply {
            found: false,
            value: None,
            contacts: Some(contacts),
        };
        self.send_dht_message(sender, MessageType::DhtFindValueReply, serde_json::to_vec(&reply)?);
        Ok(())
    }

    fn handle_find_value_reply(&self, message: &Message, sender: &Arc<Connection>) -> Result<()> {
        let reply: FindValueReply = serde_json::from_slice(message.payload())?;

        if reply.found {
            let value = reply.value.unwrap_or_default();
            if value.is_empty() {
                return Ok(());
            }

            // Cache under the key we actually asked this connection for.
            let key = sender
                .id()
                .and_then(|id| self.value_queries.lock().unwrap().get(&id).copied());

            match key {
                Some(key) => {
                    self.storage.insert(key, value.clone(), DEFAULT_TTL);
                    self.resolve_waiters(&key, &value);
                }
                None => debug!(
                    "Found reply from {} with no matching query",
                    sender.remote_endpoint()
                ),
            }
            return Ok(());
        }

        for info in reply.contacts.unwrap_or_default() {
            let contact = info.to_contact()?;
            if contact.id != self.node_id {
                self.routing_table
                    .update(contact.id, &contact.address, contact.port);
            }
        }
        Ok(())
    }

    fn handle_store(&self, message: &Message, sender: &Arc<Connection>) -> Result<()> {
        match self.apply_store(message) {
            Ok(()) => {
                let reply = StoreReply {
                    success: true,
                    error: None,
                };
                self.send_dht_message(sender, MessageType::DhtStoreReply, serde_json::to_vec(&reply)?);
                Ok(())
            }
            Err(e) => {
                error!("Error processing STORE: {}", e);
                let reply = StoreReply {
                    success: false,
                    error: Some(e.to_string()),
                };
                self.send_dht_message(sender, MessageType::DhtStoreReply, serde_json::to_vec(&reply)?);
                Ok(())
            }
        }
    }

    fn apply_store(&self, message: &Message) -> Result<()> {
        let payload: StorePayload = serde_json::from_slice(message.payload())?;
        let key = NodeId::from_hex(&payload.key)?;

        if payload.value.len() > MAX_VALUE_SIZE {
            return Err(P2pError::TooLarge(payload.value.len()));
        }

        self.storage
            .insert(key, payload.value.clone(), Duration::from_secs(payload.ttl));

        if let Some(callback) = self.store_callback.lock().unwrap().as_ref() {
            callback(&key.to_hex(), &payload.value);
        }

        self.resolve_waiters(&key, &payload.value);
        Ok(())
    }

    fn handle_store_reply(&self, message: &Message, sender: &Arc<Connection>) -> Result<()> {
        let reply: StoreReply = serde_json::from_slice(message.payload())?;

        if !reply.success {
            error!(
                "Storage error on {}: {}",
                sender.remote_endpoint(),
                reply.error.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn note_value_query(&self, conn: &Arc<Connection>, key: NodeId) {
        if let Some(id) = conn.id() {
            self.value_queries.lock().unwrap().insert(id, key);
        }
    }

    fn resolve_waiters(&self, key: &NodeId, value: &[u8]) {
        let senders = self.waiters.lock().unwrap().remove(key);
        if let Some(senders) = senders {
            for sender in senders {
                let _ = sender.send(value.to_vec());
            }
        }
    }

    fn send_dht_message(&self, conn: &Arc<Connection>, msg_type: MessageType, bytes: Vec<u8>) {
        if !conn.is_connected() || bytes.len() > MAX_BODY_SIZE {
            return;
        }

        match Message::new(msg_type, bytes) {
            Ok(message) => {
                if let Err(e) = conn.send(&message) {
                    warn!("Error sending DHT message: {}", e);
                }
            }
            Err(e) => error!("Error sending DHT message: {}", e),
        }
    }

    async fn run_maintenance(&self) {
        let reaped = self.storage.reap_expired();
        if reaped > 0 {
            info!("DHT maintenance: reaped {} expired entries", reaped);
        } else {
            debug!("DHT maintenance: nothing to reap");
        }

        // Forget query bookkeeping for connections that are gone.
        let ids: Vec<u64> = self.value_queries.lock().unwrap().keys().copied().collect();
        for id in ids {
            if self.session.get(id).await.is_none() {
                self.value_queries.lock().unwrap().remove(&id);
            }
        }

        self.refresh_stale_buckets().await;
    }

    /// Refresh buckets that have been idle for an hour by looking up an id
    /// inside each one's distance range.
    async fn refresh_stale_buckets(&self) {
        for index in self.routing_table.stale_bucket_indices(BUCKET_REFRESH_IDLE) {
            let target = match NodeId::at_distance(&self.node_id, index) {
                Ok(target) => target,
                Err(e) => {
                    error!("Bucket refresh failed for index {}: {}", index, e);
                    continue;
                }
            };

            debug!("Refreshing bucket {}", index);
            self.routing_table.touch_bucket(index);
            self.find_node(target).await;
        }
    }
}
