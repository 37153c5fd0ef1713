//! Top-level error type for node operations.

use crate::discovery::DiscoveryError;
use crate::event::CodecError;
use crate::frame::FrameError;
use crate::identity::IdentityError;
use crate::store::StoreError;
use parley_types::{PeerId, ProtocolError};
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Event codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("Invalid service: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Contact store error: {0}")]
    Store(#[from] StoreError),
    #[error("Node identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Operation timed out")]
    Timeout,
    #[error("Node is shutting down")]
    Cancelled,
}
