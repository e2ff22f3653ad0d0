//! Channel-id allocation service

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Mints channel ids from a monotonic counter; ids are never reused
#[derive(Debug)]
pub struct ChannelAllocator {
    next: AtomicU64,
    live: RwLock<HashSet<String>>,
}

impl Default for ChannelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelAllocator {
    /// Create an allocator whose first id is `ch1`
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            live: RwLock::new(HashSet::new()),
        }
    }

    /// Mint a fresh channel id
    pub async fn create(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let id = format!("ch{n}");
        self.live.write().await.insert(id.clone());
        info!("Created channel: {}", id);
        id
    }

    /// Forget a channel id; unknown ids are ignored
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.live.write().await.remove(id);
        if removed {
            info!("Deleted channel: {}", id);
        } else {
            debug!("Delete for unknown channel: {}", id);
        }
        removed
    }

    /// Ids created and not yet deleted, sorted
    pub async fn live(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }
}
