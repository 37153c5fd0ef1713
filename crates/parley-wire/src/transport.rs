//! Labeled, authenticated TCP streams.
//!
//! Every logical stream is its own TCP connection. The handshake is a
//! challenge/response over the pre-shared secret:
//!
//! 1. the opener sends `hello` with its label, node id, listen address and a
//!    fresh nonce;
//! 2. the acceptor answers `challenge` with its own node id, a fresh
//!    challenge nonce, and an HMAC binding the opener's nonce;
//! 3. the opener checks that HMAC, then sends `auth`, an HMAC over the
//!    challenge, the label, its listen address, its node id and the
//!    rendezvous tag;
//! 4. the acceptor answers `hello_ack` or `hello_reject`.
//!
//! Neither side's proof is valid outside the exchange that produced it. A node
//! id that is an Ed25519 public key must also sign its side's data with that
//! key, so holding the shared secret is not enough to claim it. After the
//! handshake the stream belongs to the label's handler, and the opener's
//! authenticated node id is the stream's remote identity.

use crate::error::WireError;
use crate::frame::{read_frame, write_frame};
use crate::identity::{public_key, verify_signature, NodeIdentity};
use hmac::{Hmac, Mac};
use parley_types::{NodeConfig, PeerId};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::net::SocketAddr;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Current handshake version.
pub const PROTOCOL_VERSION: u32 = 2;

/// What a stream is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamLabel {
    /// One event, answered by `ok` or `err`.
    Event,
    /// Symmetric service announcement exchange.
    Discovery,
    /// Liveness check: the payload is echoed back.
    Echo,
}

impl std::fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamLabel::Event => "event",
            StreamLabel::Discovery => "discovery",
            StreamLabel::Echo => "echo",
        };
        f.write_str(s)
    }
}

/// Messages exchanged before a stream is handed to its handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Handshake {
    #[serde(rename = "hello")]
    Hello {
        label: StreamLabel,
        node_id: String,
        rendezvous: String,
        /// Where the opener accepts streams, if it listens.
        listen_addr: Option<SocketAddr>,
        protocol_version: u32,
        nonce: String,
    },
    #[serde(rename = "challenge")]
    Challenge {
        node_id: String,
        protocol_version: u32,
        nonce: String,
        /// HMAC over the opener's nonce, this nonce, node id and rendezvous.
        auth_hmac: String,
        /// Ed25519 signature over the same data, from key-derived ids.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename = "auth")]
    Auth {
        /// HMAC over the challenge, label, listen address, node id and rendezvous.
        auth_hmac: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename = "hello_ack")]
    HelloAck,
    #[serde(rename = "hello_reject")]
    HelloReject { code: u16, message: String },
}

/// An authenticated stream, ready for its label's handler.
#[derive(Debug)]
pub struct PeerStream {
    pub label: StreamLabel,
    pub remote: PeerId,
    pub remote_addr: SocketAddr,
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

/// An inbound stream plus the listen address its opener advertised.
#[derive(Debug)]
pub struct Accepted {
    pub stream: PeerStream,
    pub listen_addr: Option<SocketAddr>,
}

/// Generate HMAC-SHA256 signature for stream authentication.
fn hmac_sign(secret: &str, data: &[u8]) -> Result<String, WireError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WireError::HandshakeFailed(format!("Invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify HMAC-SHA256 signature using constant-time comparison.
fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    match hmac_sign(secret, data) {
        Ok(expected) => {
            subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
        }
        Err(_) => false,
    }
}

/// Data the acceptor signs: it proves knowledge of the secret for this
/// opener's nonce only.
fn challenge_data(
    opener_nonce: &str,
    challenge: &str,
    node_id: &str,
    rendezvous: &str,
) -> Vec<u8> {
    format!("challenge\n{opener_nonce}\n{challenge}\n{node_id}\n{rendezvous}").into_bytes()
}

/// Data the opener signs: it binds every field the acceptor acts on.
fn proof_data(
    challenge: &str,
    label: StreamLabel,
    listen_addr: Option<SocketAddr>,
    node_id: &str,
    rendezvous: &str,
) -> Vec<u8> {
    let listen = listen_addr.map(|a| a.to_string()).unwrap_or_default();
    format!("proof\n{challenge}\n{label}\n{listen}\n{node_id}\n{rendezvous}").into_bytes()
}

/// Key-derived ids must carry a valid signature; other ids need none.
fn signature_valid(node_id: &str, data: &[u8], signature: Option<&str>) -> bool {
    match public_key(node_id) {
        Some(key) => signature.is_some_and(|sig| verify_signature(&key, data, sig)),
        None => true,
    }
}

fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

async fn write_handshake(writer: &mut OwnedWriteHalf, msg: &Handshake) -> Result<(), WireError> {
    let bytes = serde_json::to_vec(msg)?;
    write_frame(writer, &bytes).await?;
    Ok(())
}

async fn read_handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    max: usize,
) -> Result<Handshake, WireError> {
    let body = read_frame(reader, max).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn reject(
    writer: &mut OwnedWriteHalf,
    code: u16,
    message: String,
) -> Result<WireError, WireError> {
    write_handshake(
        writer,
        &Handshake::HelloReject {
            code,
            message: message.clone(),
        },
    )
    .await?;
    Ok(WireError::HandshakeFailed(message))
}

fn unexpected(step: &str, msg: &Handshake) -> WireError {
    match msg {
        Handshake::HelloReject { code, message } => {
            WireError::HandshakeFailed(format!("Remote error {code}: {message}"))
        }
        _ => WireError::HandshakeFailed(format!("Unexpected message during {step}")),
    }
}

/// Connect to `addr` and authenticate a stream with the given label.
///
/// `identity` signs for `config.node_id` when that id is key-derived.
pub async fn open_stream(
    config: &NodeConfig,
    identity: Option<&NodeIdentity>,
    listen_addr: Option<SocketAddr>,
    addr: SocketAddr,
    label: StreamLabel,
) -> Result<PeerStream, WireError> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let nonce = new_nonce();
    let hello = Handshake::Hello {
        label,
        node_id: config.node_id.clone(),
        rendezvous: config.rendezvous.clone(),
        listen_addr,
        protocol_version: PROTOCOL_VERSION,
        nonce: nonce.clone(),
    };
    write_handshake(&mut writer, &hello).await?;

    let (remote_id, challenge) = match read_handshake(&mut reader, config.max_frame_bytes).await? {
        Handshake::Challenge {
            node_id,
            protocol_version,
            nonce: challenge,
            auth_hmac,
            signature,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(WireError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: protocol_version,
                });
            }
            let data = challenge_data(&nonce, &challenge, &node_id, &config.rendezvous);
            if !hmac_verify(&config.shared_secret, &data, &auth_hmac) {
                warn!(remote = %addr, "HMAC verification failed on challenge");
                return Err(reject(
                    &mut writer,
                    403,
                    "Challenge authentication failed".to_string(),
                )
                .await?);
            }
            if !signature_valid(&node_id, &data, signature.as_deref()) {
                warn!(
                    remote = %addr,
                    node_id = %node_id,
                    "Signature verification failed on challenge"
                );
                return Err(reject(
                    &mut writer,
                    403,
                    "Challenge signature invalid".to_string(),
                )
                .await?);
            }
            (node_id, challenge)
        }
        other => return Err(unexpected("hello", &other)),
    };

    let proof = proof_data(
        &challenge,
        label,
        listen_addr,
        &config.node_id,
        &config.rendezvous,
    );
    let auth = Handshake::Auth {
        auth_hmac: hmac_sign(&config.shared_secret, &proof)?,
        signature: identity.map(|id| id.sign(&proof)),
    };
    write_handshake(&mut writer, &auth).await?;

    match read_handshake(&mut reader, config.max_frame_bytes).await? {
        Handshake::HelloAck => Ok(PeerStream {
            label,
            remote: PeerId::new(remote_id),
            remote_addr: addr,
            reader,
            writer,
        }),
        other => Err(unexpected("auth", &other)),
    }
}

/// Authenticate an inbound connection and learn its label.
pub async fn accept_stream(
    config: &NodeConfig,
    identity: Option<&NodeIdentity>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<Accepted, WireError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let hello = read_handshake(&mut reader, config.max_frame_bytes).await?;
    let Handshake::Hello {
        label,
        node_id,
        rendezvous,
        listen_addr,
        protocol_version,
        nonce,
    } = hello
    else {
        warn!(remote = %addr, "Rejected stream without hello");
        return Err(reject(&mut writer, 401, "Hello required".to_string()).await?);
    };

    if protocol_version != PROTOCOL_VERSION {
        reject(
            &mut writer,
            1,
            format!("Protocol version mismatch: expected {PROTOCOL_VERSION}, got {protocol_version}"),
        )
        .await?;
        return Err(WireError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: protocol_version,
        });
    }

    if rendezvous != config.rendezvous {
        warn!(remote = %addr, %rendezvous, "Rejected stream from another rendezvous");
        return Err(reject(&mut writer, 404, format!("Unknown rendezvous '{rendezvous}'")).await?);
    }

    let challenge = new_nonce();
    let data = challenge_data(&nonce, &challenge, &config.node_id, &config.rendezvous);
    write_handshake(
        &mut writer,
        &Handshake::Challenge {
            node_id: config.node_id.clone(),
            protocol_version: PROTOCOL_VERSION,
            nonce: challenge.clone(),
            auth_hmac: hmac_sign(&config.shared_secret, &data)?,
            signature: identity.map(|id| id.sign(&data)),
        },
    )
    .await?;

    let (auth_hmac, signature) = match read_handshake(&mut reader, config.max_frame_bytes).await? {
        Handshake::Auth {
            auth_hmac,
            signature,
        } => (auth_hmac, signature),
        other @ Handshake::HelloReject { .. } => return Err(unexpected("challenge", &other)),
        _ => {
            warn!(remote = %addr, "Rejected stream without auth");
            return Err(reject(&mut writer, 401, "Auth required".to_string()).await?);
        }
    };

    let proof = proof_data(&challenge, label, listen_addr, &node_id, &rendezvous);
    if !hmac_verify(&config.shared_secret, &proof, &auth_hmac) {
        warn!(remote = %addr, node_id = %node_id, "HMAC verification failed on auth");
        return Err(reject(&mut writer, 403, "HMAC authentication failed".to_string()).await?);
    }
    if !signature_valid(&node_id, &proof, signature.as_deref()) {
        warn!(remote = %addr, node_id = %node_id, "Signature verification failed on auth");
        return Err(reject(&mut writer, 403, "Node key signature invalid".to_string()).await?);
    }

    write_handshake(&mut writer, &Handshake::HelloAck).await?;

    Ok(Accepted {
        stream: PeerStream {
            label,
            remote: PeerId::new(node_id),
            remote_addr: addr,
            reader,
            writer,
        },
        listen_addr,
    })
}
