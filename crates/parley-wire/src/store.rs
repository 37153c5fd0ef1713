//! Peer-contact persistence.
//!
//! A [`ContactStore`] is a get/put/has byte store keyed by peer identity.
//! The node writes a [`ContactRecord`] after every successful discovery
//! exchange so a restarted node can restore what it learned.

use crate::contacts::ContactDirectory;
use crate::discovery::{DiscoveryError, ServiceAnnouncement};
use parley_types::{PeerId, Service};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from contact persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Malformed contact record: {0}")]
    Record(String),
}

/// External key/value store for contact records.
pub trait ContactStore: Send + Sync + 'static {
    fn get(&self, peer: &PeerId) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, peer: &PeerId, value: Vec<u8>) -> Result<(), StoreError>;
    fn has(&self, peer: &PeerId) -> bool;
}

/// In-process [`ContactStore`].
#[derive(Debug, Default)]
pub struct MemoryContactStore {
    records: RwLock<HashMap<PeerId, Vec<u8>>>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContactStore for MemoryContactStore {
    fn get(&self, peer: &PeerId) -> Result<Option<Vec<u8>>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(peer).cloned())
    }

    fn put(&self, peer: &PeerId, value: Vec<u8>) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(peer.clone(), value);
        Ok(())
    }

    fn has(&self, peer: &PeerId) -> bool {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.contains_key(peer)
    }
}

/// Persisted form of a contact: identity, last known address, services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub peer_id: PeerId,
    #[serde(default)]
    pub address: Option<SocketAddr>,
    pub services: Vec<ServiceAnnouncement>,
}

impl ContactRecord {
    /// Capture a peer's current directory state.
    pub fn from_directory(
        contacts: &ContactDirectory,
        peer: &PeerId,
    ) -> Result<Self, DiscoveryError> {
        let mut services = contacts.services(peer);
        services.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(Self {
            peer_id: peer.clone(),
            address: contacts.address(peer),
            services: services
                .iter()
                .map(ServiceAnnouncement::from_service)
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Record(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(data).map_err(|e| StoreError::Record(e.to_string()))
    }

    /// Decode the stored announcements back into services.
    pub fn services(&self) -> Result<Vec<Service>, DiscoveryError> {
        self.services
            .iter()
            .cloned()
            .map(ServiceAnnouncement::into_service)
            .collect()
    }

    /// Load the record into a directory.
    pub fn restore_into(&self, contacts: &ContactDirectory) -> Result<(), DiscoveryError> {
        let services = self.services()?;
        contacts.add_services(&self.peer_id, services);
        if let Some(address) = self.address {
            contacts.set_address(&self.peer_id, address);
        }
        Ok(())
    }
}
