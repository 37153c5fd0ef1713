//! Protocol instances and the messages exchanged within them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One in-progress run of a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Key of the protocol this instance runs.
    pub protocol: String,
    /// Bound key parameters, in the protocol's key order.
    pub keys: Vec<(String, String)>,
    /// Other bound parameter values.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    /// Messages observed so far, by message name.
    #[serde(default)]
    pub messages: BTreeMap<String, Message>,
}

impl Instance {
    /// Create an instance with the given key bindings.
    pub fn new<K, V>(protocol: impl Into<String>, keys: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            protocol: protocol.into(),
            keys: keys
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            values: BTreeMap::new(),
            messages: BTreeMap::new(),
        }
    }

    /// Bind a non-key parameter.
    pub fn with_value(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(param.into(), value.into());
        self
    }

    /// The instance key: bound key values joined with `,` in key order.
    pub fn key(&self) -> String {
        self.keys
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Record a message, replacing any previous message with the same schema.
    pub fn add_message(&mut self, message: Message) {
        self.messages.insert(message.schema.clone(), message);
    }
}

/// A message sent within an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the message schema in the protocol.
    pub schema: String,
    /// Key of the instance the message belongs to.
    pub instance_key: String,
    /// Parameter values carried by the message.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl Message {
    pub fn new(schema: impl Into<String>, instance_key: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            instance_key: instance_key.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(param.into(), value.into());
        self
    }
}
