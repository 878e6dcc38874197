use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A point-in-time copy of the traffic counters.
#[derive(Debug, Clone)]
pub struct NetworkMetrics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connections_established: u64,
    pub connections_closed: u64,
    pub uptime: Duration,
}

/// Process-local traffic counters, cheap enough to bump from the I/O tasks.
pub struct MetricsCollector {
    started_at: Instant,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    connections_established: AtomicU64,
    connections_closed: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
        }
    }

    /// One outbound frame of `bytes` bytes left the process.
    pub fn record_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// One inbound frame of `bytes` bytes was delivered.
    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkMetrics {
        NetworkMetrics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }

    /// One-line form for the `connections` REPL command.
    pub fn summary(&self) -> String {
        let m = self.snapshot();
        format!(
            "uptime {:.0?}, {} connections ({} closed), {} msgs in / {} msgs out, {} B in / {} B out",
            m.uptime,
            m.connections_established,
            m.connections_closed,
            m.messages_received,
            m.messages_sent,
            m.bytes_received,
            m.bytes_sent,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_bytes_sent(10);
        metrics.record_bytes_sent(5);
        metrics.record_bytes_received(7);
        metrics.record_connection_established();
        metrics.record_connection_closed();

        let m = metrics.snapshot();
        assert_eq!(m.bytes_sent, 15);
        assert_eq!(m.messages_sent, 2);
        assert_eq!(m.bytes_received, 7);
        assert_eq!(m.messages_received, 1);
        assert_eq!(m.connections_established, 1);
        assert_eq!(m.connections_closed, 1);
    }
}
