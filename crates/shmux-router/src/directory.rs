//! Peer directory and forwarding

use shmux_proto::Envelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Sending side of a peer's connection writer
pub type PeerSender = mpsc::UnboundedSender<Envelope>;

/// Directory entry for one registered connection
#[derive(Debug)]
struct PeerEntry {
    /// Identifies the connection that registered this entry
    token: u64,
    /// Queue drained by the connection's writer task
    sender: PeerSender,
}

/// Outcome of a forwarding attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the destination's writer
    Delivered,
    /// Envelope had no `to`
    NoRecipient,
    /// `to` is not registered
    UnknownPeer,
    /// Destination is registered but its writer is gone
    PeerGone,
}

/// Map from peer id to the connection that last registered it
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, PeerEntry>>,
    next_token: AtomicU64,
}

impl PeerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `peer_id`, replacing any previous registration
    ///
    /// Returns the token the connection must present to unregister.
    pub async fn register(&self, peer_id: &str, sender: PeerSender) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut peers = self.peers.write().await;
            peers.insert(peer_id.to_string(), PeerEntry { token, sender })
        };
        if previous.is_some() {
            warn!("Peer {} re-registered, replacing previous connection", peer_id);
        }
        info!("Registered peer: {}", peer_id);
        token
    }

    /// Remove `peer_id` if it is still owned by the connection holding `token`
    pub async fn unregister(&self, peer_id: &str, token: u64) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get(peer_id) {
            Some(entry) if entry.token == token => {
                peers.remove(peer_id);
                info!("Unregistered peer: {}", peer_id);
                true
            }
            _ => {
                debug!("Peer {} already replaced, keeping newer registration", peer_id);
                false
            }
        }
    }

    /// Forward an envelope unchanged to the connection registered for `envelope.to`
    pub async fn forward(&self, envelope: Envelope) -> Delivery {
        if !envelope.is_routable() {
            debug!(
                "{} -> [no recipient]: channel={}, flag={}, length={}",
                envelope.from,
                envelope.channel,
                envelope.flag,
                envelope.data.len()
            );
            return Delivery::NoRecipient;
        }

        let peers = self.peers.read().await;
        let Some(entry) = peers.get(&envelope.to) else {
            debug!("{} -> {} [unknown peer]: dropping {}", envelope.from, envelope.to, envelope.flag);
            return Delivery::UnknownPeer;
        };

        debug!(
            "{} -> {}: channel={}, flag={}, length={}",
            envelope.from,
            envelope.to,
            envelope.channel,
            envelope.flag,
            envelope.data.len()
        );
        let to = envelope.to.clone();
        match entry.sender.send(envelope) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                warn!("Failed to deliver to {}: connection writer closed", to);
                Delivery::PeerGone
            }
        }
    }

    /// Check if a peer id is currently registered
    pub async fn contains(&self, peer_id: &str) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    /// Registered peer ids, sorted
    pub async fn peers(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        let mut ids: Vec<String> = peers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shmux_proto::Payload;

    #[tokio::test]
    async fn test_register_and_forward() {
        let directory = PeerDirectory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        directory.register("b", tx).await;

        let env = Envelope::new("ch1", "a", "b", Payload::Stdin(Bytes::from("x")));
        assert_eq!(directory.forward(env.clone()).await, Delivery::Delivered);
        assert_eq!(rx.recv().await.unwrap(), env);
    }

    #[tokio::test]
    async fn test_routing_misses() {
        let directory = PeerDirectory::new();
        let no_to = Envelope::new("ch1", "a", "", Payload::EofStdin);
        assert_eq!(directory.forward(no_to).await, Delivery::NoRecipient);

        let unknown = Envelope::new("ch1", "a", "ghost", Payload::EofStdin);
        assert_eq!(directory.forward(unknown).await, Delivery::UnknownPeer);
    }

    #[tokio::test]
    async fn test_writer_gone() {
        let directory = PeerDirectory::new();
        let (tx, rx) = mpsc::unbounded_channel();
        directory.register("b", tx).await;
        drop(rx);

        let env = Envelope::new("ch1", "a", "b", Payload::EofStdin);
        assert_eq!(directory.forward(env).await, Delivery::PeerGone);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let directory = PeerDirectory::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old_token = directory.register("b", old_tx).await;
        let new_token = directory.register("b", new_tx).await;
        assert_ne!(old_token, new_token);

        let env = Envelope::new("ch1", "a", "b", Payload::EofStdout);
        directory.forward(env.clone()).await;
        assert_eq!(new_rx.recv().await.unwrap(), env);
        // replaced entry's sender was dropped
        assert!(old_rx.recv().await.is_none());

        // the stale connection closing must not remove the newer one
        assert!(!directory.unregister("b", old_token).await);
        assert!(directory.contains("b").await);
        assert!(directory.unregister("b", new_token).await);
        assert!(!directory.contains("b").await);
    }

    #[tokio::test]
    async fn test_peers_listing() {
        let directory = PeerDirectory::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        directory.register("zeta", tx1).await;
        directory.register("alpha", tx2).await;
        assert_eq!(directory.peers().await, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
