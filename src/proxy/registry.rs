use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Set of live connections, keyed by connection number.
///
/// Only used to report how many connections are in flight; cloning shares
/// the same set.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    live: Arc<DashMap<u64, SocketAddr>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection from `peer` and return its number
    pub fn register(&self, peer: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.insert(id, peer);
        id
    }

    /// Returns false when `id` was not (or no longer) registered
    pub fn remove(&self, id: u64) -> bool {
        self.live.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
