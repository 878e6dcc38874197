use log::{debug, error};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::network::message::{Message, HEADER_SIZE, MAX_BODY_SIZE};
use crate::utils::{MetricsCollector, P2pError, Result};

/// Events pushed by connection I/O tasks and consumed by the peer's
/// single dispatch task.
pub enum SessionEvent {
    Inbound {
        conn: Arc<Connection>,
        message: Message,
    },
    Disconnected {
        conn: Arc<Connection>,
    },
}

struct IoParts {
    stream: TcpStream,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Full-duplex framed I/O over one TCP endpoint.
///
/// A reader task consumes the socket frame by frame (header, then body) and
/// pushes `Inbound` events; a writer task drains the outbound FIFO so that at
/// most one write is in flight and frames leave in enqueue order. Any I/O
/// error or framing violation is fatal to the connection; the `Disconnected`
/// event fires exactly once.
pub struct Connection {
    remote_addr: SocketAddr,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    connected: AtomicBool,
    closing: AtomicBool,
    id: OnceLock<u64>,
    io: Mutex<Option<IoParts>>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Arc<Self>> {
        let remote_addr = stream.peer_addr()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            remote_addr,
            outbound_tx,
            shutdown_tx,
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            id: OnceLock::new(),
            io: Mutex::new(Some(IoParts {
                stream,
                outbound_rx,
            })),
        }))
    }

    /// Begin reading and writing. Invoked once, after registration.
    pub fn start(
        self: &Arc<Self>,
        events: mpsc::UnboundedSender<SessionEvent>,
        metrics: Arc<MetricsCollector>,
    ) {
        // A connection disconnected before starting never spawns its loops;
        // dropping the io parts closes the socket.
        if !self.is_connected() {
            self.io.lock().unwrap().take();
            return;
        }

        let parts = match self.io.lock().unwrap().take() {
            Some(parts) => parts,
            None => {
                error!("Connection to {} started twice", self.remote_addr);
                return;
            }
        };

        let (read_half, write_half) = parts.stream.into_split();

        let conn = self.clone();
        let events_tx = events.clone();
        let read_metrics = metrics.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            conn.clone()
                .read_loop(read_half, &events_tx, read_metrics, shutdown_rx)
                .await;
            conn.finish(&events_tx);
        });

        let conn = self.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            conn.clone()
                .write_loop(write_half, parts.outbound_rx, metrics, shutdown_rx)
                .await;
            conn.finish(&events);
        });
    }

    /// Enqueue a serialized frame without blocking the caller.
    pub fn send(&self, message: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(P2pError::NotConnected);
        }

        let bytes = message.serialize()?;
        self.outbound_tx
            .send(bytes)
            .map_err(|_| P2pError::NotConnected)
    }

    /// Close both directions and mark disconnected. The I/O tasks observe the
    /// shutdown signal, exit, and emit the single `Disconnected` event.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Textual remote address, without the port.
    pub fn remote_address(&self) -> String {
        self.remote_addr.ip().to_string()
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_addr.port()
    }

    /// Full remote endpoint, for logging.
    pub fn remote_endpoint(&self) -> String {
        self.remote_addr.to_string()
    }

    /// Local connection id, assigned by the session registry.
    pub fn id(&self) -> Option<u64> {
        self.id.get().copied()
    }

    pub(crate) fn set_id(&self, id: u64) {
        if self.id.set(id).is_err() {
            error!("Connection id assigned twice for {}", self.remote_addr);
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: OwnedReadHalf,
        events: &mpsc::UnboundedSender<SessionEvent>,
        metrics: Arc<MetricsCollector>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut header = [0u8; HEADER_SIZE];

        while self.is_connected() {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = reader.read_exact(&mut header) => {
                    if let Err(e) = result {
                        debug!("Connection to {} closed: {}", self.remote_addr, e);
                        break;
                    }

                    let msg_type = match Message::read_type(&header) {
                        Ok(msg_type) => msg_type,
                        Err(e) => {
                            error!("Rejecting frame from {}: {}", self.remote_addr, e);
                            break;
                        }
                    };

                    let body_size = match Message::read_size(&header) {
                        Ok(size) => size as usize,
                        Err(e) => {
                            error!("Failed to read frame size from {}: {}", self.remote_addr, e);
                            break;
                        }
                    };

                    if body_size > MAX_BODY_SIZE {
                        error!(
                            "Frame body too large from {}: {} bytes",
                            self.remote_addr, body_size
                        );
                        break;
                    }

                    let mut body = vec![0u8; body_size];
                    if let Err(e) = reader.read_exact(&mut body).await {
                        error!("Error reading frame body from {}: {}", self.remote_addr, e);
                        break;
                    }

                    let message = match Message::new(msg_type, body) {
                        Ok(message) => message,
                        Err(e) => {
                            error!("Error assembling frame from {}: {}", self.remote_addr, e);
                            break;
                        }
                    };

                    metrics.record_bytes_received((HEADER_SIZE + body_size) as u64);

                    // The dispatch task consumes these in arrival order.
                    let event = SessionEvent::Inbound {
                        conn: self.clone(),
                        message,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        metrics: Arc<MetricsCollector>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        while self.is_connected() {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = outbound_rx.recv() => {
                    let bytes = match frame {
                        Some(bytes) => bytes,
                        None => break,
                    };

                    if let Err(e) = writer.write_all(&bytes).await {
                        error!("Error writing to {}: {}", self.remote_addr, e);
                        break;
                    }

                    metrics.record_bytes_sent(bytes.len() as u64);
                }
            }
        }

        let _ = writer.shutdown().await;
    }

    fn finish(self: &Arc<Self>, events: &mpsc::UnboundedSender<SessionEvent>) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = events.send(SessionEvent::Disconnected { conn: self.clone() });
        }
    }
}
