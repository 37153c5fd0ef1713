//! Key-based node identity.
//!
//! A node's id is the hex-encoded Ed25519 public key of a keypair kept on
//! disk, so a restarted node comes back as the same peer and keeps the
//! instances it opened. The key file holds the 32-byte secret as hex.
//!
//! Ids that parse as a public key must be proven during the handshake by a
//! signature; see [`crate::transport`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors from loading or storing a node key.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to access key file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed key file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// A node's signing keypair.
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id())
            .finish_non_exhaustive()
    }
}

impl NodeIdentity {
    /// A fresh keypair that is never written anywhere.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the keypair at `path`, creating and storing one if the file is absent.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            return Self::load(path);
        }
        let identity = Self::generate();
        identity.save(path)?;
        info!(path = %path.display(), node_id = %identity.node_id(), "Created node key");
        Ok(identity)
    }

    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let contents = std::fs::read_to_string(path).map_err(|source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let malformed = |reason: String| IdentityError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = hex::decode(contents.trim()).map_err(|e| malformed(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| malformed(format!("expected 32 bytes, found {}", b.len())))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Write the secret key to `path`, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let io = |source: std::io::Error| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, hex::encode(self.signing_key.to_bytes())).map_err(io)?;
        restrict_file_permissions(path);
        Ok(())
    }

    /// Hex-encoded public key.
    pub fn node_id(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Hex-encoded signature over `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        hex::encode(self.signing_key.sign(data).to_bytes())
    }
}

/// The public key a node id names, if it is key-derived.
pub fn public_key(node_id: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(node_id).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Check a hex signature over `data` against `key`.
pub fn verify_signature(key: &VerifyingKey, data: &[u8], signature: &str) -> bool {
    let Some(bytes) = hex::decode(signature)
        .ok()
        .and_then(|b| <[u8; 64]>::try_from(b).ok())
    else {
        return false;
    };
    key.verify(data, &Signature::from_bytes(&bytes)).is_ok()
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}
