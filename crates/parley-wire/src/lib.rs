//! Parley wire layer — event exchange between protocol agents.
//!
//! Agents notify each other of instance creation, messages, updates, aborts
//! and drops by sending typed events over authenticated point-to-point
//! streams. The receiving node checks who owns the instance before anything
//! reaches its reasoner.
//!
//! ## Architecture
//!
//! - **Event**: the closed set of event variants and their JSON envelope
//! - **Framing**: separator/terminator delimited payload lists
//! - **OwnershipRegistry**: open instance key to owning peer
//! - **Dispatcher**: authorizes inbound events and answers `ok`/`err`
//! - **Discovery**: symmetric exchange of offered protocols and roles
//! - **ContactDirectory**: what each known peer offers and where it listens
//! - **NodeIdentity**: the Ed25519 keypair a node id is derived from
//! - **Node**: listener, labeled streams, and the outbound operations

pub mod config;
pub mod contacts;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod frame;
pub mod identity;
pub mod node;
pub mod ownership;
pub mod store;
pub mod transport;

pub use contacts::{ContactDirectory, ContactEntry};
pub use discovery::{DiscoveryError, ServiceAnnouncement};
pub use dispatch::{DispatchError, Dispatcher, RESPONSE_ERR, RESPONSE_OK};
pub use error::WireError;
pub use event::{run_event, CodecError, Event, EventEnvelope, EventKind, EventType};
pub use frame::{FrameError, SEPARATOR, TERMINATOR};
pub use identity::{IdentityError, NodeIdentity};
pub use node::Node;
pub use ownership::{AuthorizationError, OwnershipRegistry};
pub use store::{ContactRecord, ContactStore, MemoryContactStore, StoreError};
pub use transport::{StreamLabel, PROTOCOL_VERSION};
