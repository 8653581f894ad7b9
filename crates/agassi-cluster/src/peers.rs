//! PeerSet — the in-memory registry of live peers.
//!
//! Discovery writes into it, the bootstrap coordinator and certificate
//! sync read from it. Readers get an insertion-ordered snapshot, so
//! iterating never races with concurrent add/remove.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

/// A node seen on the discovery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: IpAddr,
    /// Node id the peer announces (empty until its first hello).
    pub node_id: String,
    /// Peer process start time, Unix millis. Used for election rank.
    pub started_at: u64,
    pub is_master: bool,
    /// Latest advertisement string (`ready`, `reconnected`, ...).
    pub advertisement: Option<String>,
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            node_id: String::new(),
            started_at: 0,
            is_master: false,
            advertisement: None,
            last_seen: Instant::now(),
        }
    }
}

/// Thread-safe, insertion-ordered set of peers keyed by address.
///
/// At most one peer is flagged master at any time.
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<Vec<Peer>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer by address. Returns true if it was not known before;
    /// an existing peer just has its `last_seen` refreshed.
    pub fn add(&self, address: IpAddr) -> bool {
        self.upsert(Peer::new(address))
    }

    /// Insert a peer or replace the metadata of the known one.
    /// Returns true if the address was not known before.
    pub fn upsert(&self, peer: Peer) -> bool {
        let mut peers = self.peers.write().expect("peer set lock");
        if peer.is_master {
            for other in peers.iter_mut() {
                other.is_master = false;
            }
        }

        match peers.iter_mut().find(|p| p.address == peer.address) {
            Some(existing) => {
                *existing = peer;
                false
            }
            None => {
                debug!(address = %peer.address, "peer added");
                peers.push(peer);
                true
            }
        }
    }

    /// Remove a peer. Returns it if it was present.
    pub fn remove(&self, address: IpAddr) -> Option<Peer> {
        let mut peers = self.peers.write().expect("peer set lock");
        let idx = peers.iter().position(|p| p.address == address)?;
        debug!(%address, "peer removed");
        Some(peers.remove(idx))
    }

    /// Snapshot of all peers in insertion order.
    pub fn all(&self) -> Vec<Peer> {
        self.peers.read().expect("peer set lock").clone()
    }

    /// The peer currently flagged master, if any.
    pub fn master_peer(&self) -> Option<Peer> {
        let peers = self.peers.read().expect("peer set lock");
        peers.iter().find(|p| p.is_master).cloned()
    }

    pub fn get(&self, address: IpAddr) -> Option<Peer> {
        let peers = self.peers.read().expect("peer set lock");
        peers.iter().find(|p| p.address == address).cloned()
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.get(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("peer set lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every peer not heard from within `timeout`.
    pub fn evict_stale(&self, timeout: Duration, now: Instant) -> Vec<Peer> {
        let mut peers = self.peers.write().expect("peer set lock");
        let (stale, live): (Vec<Peer>, Vec<Peer>) = peers
            .drain(..)
            .partition(|p| now.saturating_duration_since(p.last_seen) > timeout);
        *peers = live;
        stale
    }
}
