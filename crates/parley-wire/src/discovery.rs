//! Discovery exchange — two peers swap the services they offer.
//!
//! Both ends of a discovery stream run the same exchange: one half writes
//! this node's announcements as a framed list, the other reads the remote
//! list and merges it into the contact directory. The halves run
//! concurrently and both finish before the stream is released, so a failed
//! write never stops the read from completing.

use crate::contacts::ContactDirectory;
use crate::frame::{read_framed_list, write_framed_list, FrameError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parley_types::{PeerId, Protocol, ProtocolError, Role, Service};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Errors from a discovery exchange.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Malformed service announcement: {0}")]
    Announcement(String),
    #[error("Invalid service: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Discovery exchange timed out")]
    Timeout,
}

/// Wire form of one announced service.
///
/// The protocol definition is base64-encoded JSON so the announcement stays
/// free of framing bytes whatever the definition contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAnnouncement {
    pub protocol: String,
    pub roles: Vec<Role>,
}

impl ServiceAnnouncement {
    pub fn from_service(service: &Service) -> Result<Self, DiscoveryError> {
        let protocol = serde_json::to_vec(&service.protocol)
            .map_err(|e| DiscoveryError::Announcement(e.to_string()))?;
        Ok(Self {
            protocol: BASE64.encode(protocol),
            roles: service.roles.clone(),
        })
    }

    /// Decode the protocol and rebuild the service, enforcing its role rules.
    pub fn into_service(self) -> Result<Service, DiscoveryError> {
        let bytes = BASE64
            .decode(self.protocol.as_bytes())
            .map_err(|e| DiscoveryError::Announcement(format!("protocol is not base64: {e}")))?;
        let protocol: Protocol = serde_json::from_slice(&bytes)
            .map_err(|e| DiscoveryError::Announcement(e.to_string()))?;
        Ok(Service::new(protocol, self.roles)?)
    }
}

/// Encode services as framed-list payloads.
pub fn encode_announcements(services: &[Service]) -> Result<Vec<Vec<u8>>, DiscoveryError> {
    services
        .iter()
        .map(|service| {
            let announcement = ServiceAnnouncement::from_service(service)?;
            serde_json::to_vec(&announcement)
                .map_err(|e| DiscoveryError::Announcement(e.to_string()))
        })
        .collect()
}

/// Decode framed-list payloads into services. One bad entry fails them all.
pub fn decode_announcements(payloads: &[Vec<u8>]) -> Result<Vec<Service>, DiscoveryError> {
    payloads
        .iter()
        .map(|payload| {
            let announcement: ServiceAnnouncement = serde_json::from_slice(payload)
                .map_err(|e| DiscoveryError::Announcement(e.to_string()))?;
            announcement.into_service()
        })
        .collect()
}

/// Run one side of a discovery exchange over a stream.
///
/// Returns the number of services learned from `remote`. On a read failure
/// nothing is merged into `contacts`.
pub async fn exchange<R, W>(
    reader: &mut R,
    writer: &mut W,
    local: &[Service],
    remote: &PeerId,
    contacts: &ContactDirectory,
    max_frame: usize,
    timeout: Duration,
) -> Result<usize, DiscoveryError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let write_half = async {
        let payloads = encode_announcements(local)?;
        tokio::time::timeout(timeout, write_framed_list(writer, &payloads))
            .await
            .map_err(|_| DiscoveryError::Timeout)??;
        debug!(peer = %remote, count = payloads.len(), "Sent service announcements");
        Ok::<_, DiscoveryError>(())
    };

    let read_half = async {
        let payloads = tokio::time::timeout(timeout, read_framed_list(reader, max_frame))
            .await
            .map_err(|_| DiscoveryError::Timeout)??;
        let services = decode_announcements(&payloads)?;
        if services.is_empty() {
            info!(peer = %remote, "No new protocols discovered");
            return Ok(0);
        }
        let learned = services.len();
        info!(
            peer = %remote,
            protocols = ?services.iter().map(Service::key).collect::<Vec<_>>(),
            "Discovered protocols"
        );
        contacts.add_services(remote, services);
        Ok::<_, DiscoveryError>(learned)
    };

    let (written, read) = tokio::join!(write_half, read_half);
    if let Err(e) = &written {
        warn!(peer = %remote, error = %e, "Failed to send service announcements");
    }
    let learned = read?;
    written?;
    Ok(learned)
}
