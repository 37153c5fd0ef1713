//! Declarative interaction protocols and the services built on them.
//!
//! A [`Protocol`] names its roles, parameters, key parameters and the
//! messages roles may exchange. Parley never interprets the message
//! schemas; ordering and completion rules belong to the reasoner. A
//! [`Service`] is the pair a node advertises during discovery: a protocol
//! plus the roles the node plays in it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building protocol-level values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A service was declared with a role its protocol does not define.
    #[error("Role '{role}' is not defined by protocol '{protocol}'")]
    UnknownRole { protocol: String, role: String },
    /// A service was declared without any roles.
    #[error("No roles defined for protocol '{0}'")]
    NoRoles(String),
}

/// A role in a protocol (e.g. `Buyer`, `Seller`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    /// Create a role from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the role name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A message action between two roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    /// Message name, unique within the protocol.
    pub name: String,
    /// Sending role.
    pub from: Role,
    /// Receiving role.
    pub to: Role,
    /// Parameters carried by the message.
    #[serde(default)]
    pub params: Vec<String>,
}

/// A declarative protocol definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    /// Protocol name; also its key.
    pub name: String,
    /// Roles defined by the protocol.
    pub roles: Vec<Role>,
    /// All public parameters.
    #[serde(default)]
    pub params: Vec<String>,
    /// Key parameters, in key order. Their bound values identify an instance.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Message actions.
    #[serde(default)]
    pub messages: Vec<MessageSchema>,
}

impl Protocol {
    /// Create a protocol with the given roles and no parameters or messages.
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().collect(),
            params: Vec::new(),
            keys: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Declare the key parameters (also added to `params`).
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for key in keys {
            let key = key.into();
            if !self.params.contains(&key) {
                self.params.push(key.clone());
            }
            self.keys.push(key);
        }
        self
    }

    /// Add a message action.
    pub fn with_message(mut self, message: MessageSchema) -> Self {
        self.messages.push(message);
        self
    }

    /// The key under which this protocol is announced and looked up.
    pub fn key(&self) -> &str {
        &self.name
    }

    /// Whether the protocol defines `role`.
    pub fn defines_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

/// A protocol together with the roles an announcing node plays in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub protocol: Protocol,
    pub roles: Vec<Role>,
}

impl Service {
    /// Build a service, checking that every role is defined by the protocol.
    pub fn new(protocol: Protocol, roles: Vec<Role>) -> Result<Self, ProtocolError> {
        if roles.is_empty() {
            return Err(ProtocolError::NoRoles(protocol.name.clone()));
        }
        if let Some(role) = roles.iter().find(|r| !protocol.defines_role(r)) {
            return Err(ProtocolError::UnknownRole {
                protocol: protocol.name.clone(),
                role: role.0.clone(),
            });
        }
        Ok(Self { protocol, roles })
    }

    /// Key of the underlying protocol.
    pub fn key(&self) -> &str {
        self.protocol.key()
    }

    /// Whether the announcing node plays `role`.
    pub fn plays(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}
