//! The reasoner seam.
//!
//! The wire layer never interprets protocol semantics. It forwards accepted
//! events to a [`Reasoner`], which validates state transitions and persists
//! instances. [`MemoryReasoner`] is a map-backed implementation with no
//! protocol rules, used by local nodes and tests.

use crate::instance::{Instance, Message};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Opaque failure reported by a reasoner. Propagated unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Reasoner error: {0}")]
pub struct ReasonerError(pub String);

impl ReasonerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Capability surface the event dispatcher consumes.
#[async_trait]
pub trait Reasoner: Send + Sync + 'static {
    /// A peer created a new instance.
    async fn register_instance(&self, instance: Instance) -> Result<(), ReasonerError>;

    /// A peer sent a message within an instance.
    async fn register_message(
        &self,
        instance_key: &str,
        message: Message,
    ) -> Result<(), ReasonerError>;

    /// A peer replaced its snapshot of an instance.
    async fn update_instance(&self, instance: Instance) -> Result<(), ReasonerError>;

    /// A peer cancelled an instance.
    async fn abort(&self, instance_key: &str, motive: &str) -> Result<(), ReasonerError>;

    /// A peer dropped an instance.
    async fn drop_instance(&self, instance_key: &str, motive: &str) -> Result<(), ReasonerError>;

    /// Look up an instance by key.
    fn get_instance(&self, instance_key: &str) -> Option<Instance>;
}

/// A call received by a [`MemoryReasoner`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonerCall {
    RegisterInstance(String),
    RegisterMessage { instance_key: String, schema: String },
    UpdateInstance(String),
    Abort { instance_key: String, motive: String },
    DropInstance { instance_key: String, motive: String },
}

/// Calls kept by a [`MemoryReasoner`]; older ones are discarded first.
pub const MAX_RECORDED_CALLS: usize = 1024;

/// Map-backed reasoner without protocol rules.
///
/// It rejects registering a key twice and touching an unknown key, and
/// records the most recent calls it receives (accepted or not).
#[derive(Debug, Default)]
pub struct MemoryReasoner {
    instances: RwLock<HashMap<String, Instance>>,
    calls: Mutex<VecDeque<ReasonerCall>>,
}

impl MemoryReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the calls received so far.
    pub fn calls(&self) -> Vec<ReasonerCall> {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.iter().cloned().collect()
    }

    /// Take the recorded calls, leaving the log empty.
    pub fn drain_calls(&self) -> Vec<ReasonerCall> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.drain(..).collect()
    }

    /// Number of instances currently held.
    pub fn instance_count(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn record(&self, call: ReasonerCall) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        if calls.len() == MAX_RECORDED_CALLS {
            calls.pop_front();
        }
        calls.push_back(call);
    }

    fn remove(&self, instance_key: &str) -> Result<(), ReasonerError> {
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        instances
            .remove(instance_key)
            .map(|_| ())
            .ok_or_else(|| ReasonerError::new(format!("Unknown instance '{instance_key}'")))
    }
}

#[async_trait]
impl Reasoner for MemoryReasoner {
    async fn register_instance(&self, instance: Instance) -> Result<(), ReasonerError> {
        let key = instance.key();
        self.record(ReasonerCall::RegisterInstance(key.clone()));
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        if instances.contains_key(&key) {
            return Err(ReasonerError::new(format!(
                "Instance '{key}' already registered"
            )));
        }
        instances.insert(key, instance);
        Ok(())
    }

    async fn register_message(
        &self,
        instance_key: &str,
        message: Message,
    ) -> Result<(), ReasonerError> {
        self.record(ReasonerCall::RegisterMessage {
            instance_key: instance_key.to_string(),
            schema: message.schema.clone(),
        });
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        let instance = instances
            .get_mut(instance_key)
            .ok_or_else(|| ReasonerError::new(format!("Unknown instance '{instance_key}'")))?;
        instance.add_message(message);
        Ok(())
    }

    async fn update_instance(&self, instance: Instance) -> Result<(), ReasonerError> {
        let key = instance.key();
        self.record(ReasonerCall::UpdateInstance(key.clone()));
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        match instances.get_mut(&key) {
            Some(existing) => {
                *existing = instance;
                Ok(())
            }
            None => Err(ReasonerError::new(format!("Unknown instance '{key}'"))),
        }
    }

    async fn abort(&self, instance_key: &str, motive: &str) -> Result<(), ReasonerError> {
        self.record(ReasonerCall::Abort {
            instance_key: instance_key.to_string(),
            motive: motive.to_string(),
        });
        self.remove(instance_key)
    }

    async fn drop_instance(&self, instance_key: &str, motive: &str) -> Result<(), ReasonerError> {
        self.record(ReasonerCall::DropInstance {
            instance_key: instance_key.to_string(),
            motive: motive.to_string(),
        });
        self.remove(instance_key)
    }

    fn get_instance(&self, instance_key: &str) -> Option<Instance> {
        self.instances
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(instance_key)
            .cloned()
    }
}
