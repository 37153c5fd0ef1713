//! Contact directory: what each known peer offers and where to reach it.
//!
//! Services are learned through the discovery exchange; addresses come from
//! explicit configuration, outbound discovery, or the listen address a peer
//! advertises when it opens a stream to us. Both live behind one lock.
//!
//! Any authenticated opener can make us record an address, so the address
//! map is bounded. When it is full the least recently set address of a peer
//! with no announced services goes first.

use chrono::{DateTime, Utc};
use parley_types::{PeerId, Role, Service};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Services announced by a single peer.
#[derive(Debug, Clone)]
pub struct ContactEntry {
    pub peer_id: PeerId,
    /// Announced services keyed by protocol key.
    pub services: HashMap<String, Service>,
    /// When the peer last announced services.
    pub last_seen: DateTime<Utc>,
}

/// Default bound on remembered peer addresses.
pub const DEFAULT_ADDRESS_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct KnownAddress {
    addr: SocketAddr,
    /// Write order, for eviction.
    stamp: u64,
}

#[derive(Debug)]
struct Directory {
    contacts: HashMap<PeerId, ContactEntry>,
    addresses: HashMap<PeerId, KnownAddress>,
    address_capacity: usize,
    next_stamp: u64,
}

impl Directory {
    /// Drop one address to make room, never `keep`'s.
    fn evict_address(&mut self, keep: &PeerId) {
        let candidates = self.addresses.iter().filter(|(peer, _)| *peer != keep);
        let victim = candidates
            .clone()
            .filter(|(peer, _)| !self.contacts.contains_key(*peer))
            .min_by_key(|(_, known)| known.stamp)
            .or_else(|| candidates.min_by_key(|(_, known)| known.stamp))
            .map(|(peer, _)| peer.clone());
        if let Some(peer) = victim {
            debug!(%peer, "Evicting peer address");
            self.addresses.remove(&peer);
        }
    }
}

/// Thread-safe directory of known peers.
#[derive(Debug, Clone)]
pub struct ContactDirectory {
    inner: Arc<RwLock<Directory>>,
}

impl Default for ContactDirectory {
    fn default() -> Self {
        Self::with_address_capacity(DEFAULT_ADDRESS_CAPACITY)
    }
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory remembering at most `capacity` addresses (at least one).
    pub fn with_address_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Directory {
                contacts: HashMap::new(),
                addresses: HashMap::new(),
                address_capacity: capacity.max(1),
                next_stamp: 0,
            })),
        }
    }

    /// Merge announced services into a peer's entry.
    ///
    /// A service replaces any earlier one with the same protocol key. An
    /// empty announcement leaves the directory untouched.
    pub fn add_services(&self, peer: &PeerId, services: Vec<Service>) {
        if services.is_empty() {
            return;
        }
        let mut dir = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = dir
            .contacts
            .entry(peer.clone())
            .or_insert_with(|| ContactEntry {
                peer_id: peer.clone(),
                services: HashMap::new(),
                last_seen: Utc::now(),
            });
        for service in services {
            entry.services.insert(service.key().to_string(), service);
        }
        entry.last_seen = Utc::now();
    }

    /// Remember where a peer listens.
    pub fn set_address(&self, peer: &PeerId, address: SocketAddr) {
        let mut dir = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let stamp = dir.next_stamp;
        dir.next_stamp += 1;
        dir.addresses.insert(
            peer.clone(),
            KnownAddress {
                addr: address,
                stamp,
            },
        );
        if dir.addresses.len() > dir.address_capacity {
            dir.evict_address(peer);
        }
    }

    pub fn address(&self, peer: &PeerId) -> Option<SocketAddr> {
        let dir = self.inner.read().unwrap_or_else(|e| e.into_inner());
        dir.addresses.get(peer).map(|known| known.addr)
    }

    /// Number of remembered addresses.
    pub fn address_count(&self) -> usize {
        let dir = self.inner.read().unwrap_or_else(|e| e.into_inner());
        dir.addresses.len()
    }

    /// Get a snapshot of a peer's entry.
    pub fn get(&self, peer: &PeerId) -> Option<ContactEntry> {
        let dir = self.inner.read().unwrap_or_else(|e| e.into_inner());
        dir.contacts.get(peer).cloned()
    }

    /// Services announced by a peer, in no particular order.
    pub fn services(&self, peer: &PeerId) -> Vec<Service> {
        let dir = self.inner.read().unwrap_or_else(|e| e.into_inner());
        dir.contacts
            .get(peer)
            .map(|c| c.services.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget a peer entirely (services and address).
    pub fn remove(&self, peer: &PeerId) -> Option<ContactEntry> {
        let mut dir = self.inner.write().unwrap_or_else(|e| e.into_inner());
        dir.addresses.remove(peer);
        dir.contacts.remove(peer)
    }

    /// Peers whose service for `protocol_key` includes `role`.
    pub fn find_contacts(&self, protocol_key: &str, role: &Role) -> Vec<PeerId> {
        let dir = self.inner.read().unwrap_or_else(|e| e.into_inner());
        dir.contacts
            .values()
            .filter(|c| {
                c.services
                    .get(protocol_key)
                    .is_some_and(|service| service.plays(role))
            })
            .map(|c| c.peer_id.clone())
            .collect()
    }

    /// Number of peers with announced services.
    pub fn len(&self) -> usize {
        let dir = self.inner.read().unwrap_or_else(|e| e.into_inner());
        dir.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
