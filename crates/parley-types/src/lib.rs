//! Core types and traits for Parley protocol agents.
//!
//! This crate defines the data shared between the wire layer and the
//! components it talks to: protocol definitions, instances and messages,
//! peer identities, the [`reasoner::Reasoner`] seam, and node configuration.
//! It contains no networking.

pub mod config;
pub mod instance;
pub mod peer;
pub mod protocol;
pub mod reasoner;

pub use config::{NodeConfig, ServiceConfig};
pub use instance::{Instance, Message};
pub use peer::PeerId;
pub use protocol::{MessageSchema, Protocol, ProtocolError, Role, Service};
pub use reasoner::{MemoryReasoner, Reasoner, ReasonerCall, ReasonerError};
