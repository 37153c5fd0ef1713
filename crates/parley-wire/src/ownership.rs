//! Ownership registry: who opened which instance.
//!
//! Every open instance key maps to the peer that created it with a
//! `NewInstance` event. Follow-up events for that key are only accepted from
//! the same peer, identified by the authenticated remote end of the stream
//! that carried them. Events are not signed individually.

use crate::event::EventType;
use parley_types::PeerId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Why an event was refused before reaching the reasoner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("Instance '{0}' already exists")]
    AlreadyExists(String),
    #[error("Instance '{0}' not found")]
    NotFound(String),
    #[error("Peer '{sender}' does not own instance '{instance_key}'")]
    Unauthorized {
        instance_key: String,
        sender: PeerId,
    },
}

/// Thread-safe map of open instance keys to their owners.
#[derive(Debug, Clone, Default)]
pub struct OwnershipRegistry {
    open: Arc<RwLock<HashMap<String, PeerId>>>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an event against the registry without changing it.
    pub fn authorize(
        &self,
        event_type: EventType,
        instance_key: &str,
        sender: &PeerId,
    ) -> Result<(), AuthorizationError> {
        let open = self.open.read().unwrap_or_else(|e| e.into_inner());
        check(&open, event_type, instance_key, sender)
    }

    /// Check an event and apply its ownership effect atomically.
    ///
    /// An admitted `NewInstance` records `sender` as owner; an admitted
    /// `Abort` or `Drop` removes the entry. The other variants leave the
    /// registry unchanged.
    pub fn admit(
        &self,
        event_type: EventType,
        instance_key: &str,
        sender: &PeerId,
    ) -> Result<(), AuthorizationError> {
        let mut open = self.open.write().unwrap_or_else(|e| e.into_inner());
        check(&open, event_type, instance_key, sender)?;
        match event_type {
            EventType::NewInstance => {
                open.insert(instance_key.to_string(), sender.clone());
            }
            EventType::Abort | EventType::Drop => {
                open.remove(instance_key);
            }
            EventType::NewMessage | EventType::Update => {}
        }
        Ok(())
    }

    /// Undo an admitted `NewInstance`, if `owner` still holds the key.
    pub fn release(&self, instance_key: &str, owner: &PeerId) -> bool {
        let mut open = self.open.write().unwrap_or_else(|e| e.into_inner());
        if open.get(instance_key) == Some(owner) {
            open.remove(instance_key);
            return true;
        }
        false
    }

    /// Record an owner directly, replacing any previous one.
    pub fn insert(&self, instance_key: impl Into<String>, owner: PeerId) {
        let mut open = self.open.write().unwrap_or_else(|e| e.into_inner());
        open.insert(instance_key.into(), owner);
    }

    pub fn owner(&self, instance_key: &str) -> Option<PeerId> {
        let open = self.open.read().unwrap_or_else(|e| e.into_inner());
        open.get(instance_key).cloned()
    }

    pub fn contains(&self, instance_key: &str) -> bool {
        let open = self.open.read().unwrap_or_else(|e| e.into_inner());
        open.contains_key(instance_key)
    }

    /// Snapshot of all open instances and their owners.
    pub fn open_instances(&self) -> Vec<(String, PeerId)> {
        let open = self.open.read().unwrap_or_else(|e| e.into_inner());
        open.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize {
        let open = self.open.read().unwrap_or_else(|e| e.into_inner());
        open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check(
    open: &HashMap<String, PeerId>,
    event_type: EventType,
    instance_key: &str,
    sender: &PeerId,
) -> Result<(), AuthorizationError> {
    match (event_type, open.get(instance_key)) {
        (EventType::NewInstance, None) => Ok(()),
        (EventType::NewInstance, Some(_)) => {
            Err(AuthorizationError::AlreadyExists(instance_key.to_string()))
        }
        (_, None) => Err(AuthorizationError::NotFound(instance_key.to_string())),
        (_, Some(owner)) if owner != sender => Err(AuthorizationError::Unauthorized {
            instance_key: instance_key.to_string(),
            sender: sender.clone(),
        }),
        (_, Some(_)) => Ok(()),
    }
}
