//! Small TCP port helpers used by the CLI and the peer tests.

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration, Instant};

use crate::utils::{P2pError, Result};

pub struct NodeUtils;

impl NodeUtils {
    /// Probe whether `port` can currently be bound on the loopback interface.
    pub async fn is_port_available(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).await.is_ok()
    }

    /// Scan a window of 100 ports upward from `start_port` and return the
    /// first one that binds.
    pub async fn find_available_port(start_port: u16) -> Result<u16> {
        let end = start_port.saturating_add(100);
        for candidate in start_port..end {
            if Self::is_port_available(candidate).await {
                return Ok(candidate);
            }
        }
        Err(P2pError::IoError(format!(
            "No free port in {}..{}",
            start_port, end
        )))
    }

    /// Poll until something is listening on `port` or the deadline passes.
    pub async fn wait_for_port_ready(port: u16, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }
}
