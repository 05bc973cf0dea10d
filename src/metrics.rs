//! Connection-level counters for diagnostics

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector shared by every listener and connection
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Sockets accepted by any listener
    pub connections_accepted: Arc<AtomicU64>,
    /// Connections that ran their close path
    pub connections_closed: Arc<AtomicU64>,
    /// ClientHello rejected (protocol or capacity)
    pub handshake_failures: Arc<AtomicU64>,
    /// Forward proxy or destination unreachable
    pub upstream_errors: Arc<AtomicU64>,
    /// Bytes pumped client -> upstream, head replay included
    pub bytes_uploaded: Arc<AtomicU64>,
    /// Bytes pumped upstream -> client
    pub bytes_downloaded: Arc<AtomicU64>,
    /// Running -> Idle transitions across both directions
    pub idle_transitions: Arc<AtomicU64>,
    /// Idle -> Running transitions across both directions
    pub resume_transitions: Arc<AtomicU64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: Arc::new(AtomicU64::new(0)),
            connections_closed: Arc::new(AtomicU64::new(0)),
            handshake_failures: Arc::new(AtomicU64::new(0)),
            upstream_errors: Arc::new(AtomicU64::new(0)),
            bytes_uploaded: Arc::new(AtomicU64::new(0)),
            bytes_downloaded: Arc::new(AtomicU64::new(0)),
            idle_transitions: Arc::new(AtomicU64::new(0)),
            resume_transitions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_download(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resume(&self) {
        self.resume_transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let accepted = self.connections_accepted.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);

        MetricsSnapshot {
            connections_accepted: accepted,
            connections_closed: closed,
            connections_open: accepted.saturating_sub(closed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            idle_transitions: self.idle_transitions.load(Ordering::Relaxed),
            resume_transitions: self.resume_transitions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub connections_open: u64,
    pub handshake_failures: u64,
    pub upstream_errors: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub idle_transitions: u64,
    pub resume_transitions: u64,
}
