//! Node configuration.
//!
//! Deserialized from TOML by `parley_wire::config::load_config`. Every field
//! has a default so partial files are accepted.

use crate::protocol::Role;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-operation I/O timeout.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;

/// Default upper bound on one framed payload list (16 MB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default rendezvous tag.
pub const DEFAULT_RENDEZVOUS: &str = "parley";

/// A protocol this node offers, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path to the JSON protocol definition.
    pub protocol_file: PathBuf,
    /// Roles this node plays in it.
    pub roles: Vec<Role>,
}

/// Configuration for a Parley node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// This node's identity. When empty it is derived from the key in
    /// `key_file`.
    pub node_id: String,
    /// Ed25519 key file; `~/.parley/node.key` when unset.
    pub key_file: Option<PathBuf>,
    /// Human-readable node name.
    pub node_name: String,
    /// Pre-shared key for stream authentication. Required to start.
    pub shared_secret: String,
    /// Rendezvous tag; peers with a different tag are refused.
    pub rendezvous: String,
    /// Timeout applied to every stream read/write and connect.
    pub io_timeout_secs: u64,
    /// Largest framed payload list accepted from a peer.
    pub max_frame_bytes: usize,
    /// Addresses contacted by `bootstrap`.
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Protocols offered by this node.
    pub services: Vec<ServiceConfig>,
}

impl NodeConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            node_id: String::new(),
            key_file: None,
            node_name: "parley-node".to_string(),
            shared_secret: String::new(),
            rendezvous: DEFAULT_RENDEZVOUS.to_string(),
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            bootstrap_peers: Vec::new(),
            services: Vec::new(),
        }
    }
}
