//! Event dispatcher, the receiving side of an event stream.
//!
//! For each inbound payload the dispatcher identifies the event from its
//! header, extracts the instance key, checks ownership, and only then hands
//! the event to the reasoner. The outcome is answered with a single framed
//! `ok` or `err` token; failures never leave the stream that caused them.

use crate::error::WireError;
use crate::event::{event_id, event_type, CodecError, Event, EventType};
use crate::frame::{read_frame, write_frame};
use crate::ownership::{AuthorizationError, OwnershipRegistry};
use parley_types::{PeerId, Reasoner, ReasonerError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{info, warn};

/// Response token for an accepted event.
pub const RESPONSE_OK: &[u8] = b"ok";

/// Response token for a refused or failed event.
pub const RESPONSE_ERR: &[u8] = b"err";

/// Why an inbound event was not applied.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Cannot identify event: {0}")]
    Unidentified(CodecError),
    #[error("Could not handle event '{id}': {source}")]
    Codec { id: String, source: CodecError },
    #[error("Could not handle event '{id}': {source}")]
    Authorization {
        id: String,
        source: AuthorizationError,
    },
    #[error("Could not handle event '{id}': {source}")]
    Reasoner { id: String, source: ReasonerError },
}

impl DispatchError {
    /// The authorization failure, if that is why the event was refused.
    pub fn authorization(&self) -> Option<&AuthorizationError> {
        match self {
            DispatchError::Authorization { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Applies inbound events on behalf of a node.
#[derive(Clone)]
pub struct Dispatcher {
    ownership: OwnershipRegistry,
    reasoner: Arc<dyn Reasoner>,
}

impl Dispatcher {
    pub fn new(ownership: OwnershipRegistry, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            ownership,
            reasoner,
        }
    }

    pub fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    /// Authorize and apply one marshalled event sent by `sender`.
    pub async fn dispatch(
        &self,
        payload: &[u8],
        sender: &PeerId,
    ) -> Result<EventType, DispatchError> {
        let id = event_id(payload).map_err(DispatchError::Unidentified)?;
        let event_type = event_type(payload).map_err(DispatchError::Unidentified)?;
        let event = Event::unmarshal(payload).map_err(|source| DispatchError::Codec {
            id: id.clone(),
            source,
        })?;
        let instance_key = event.instance_key();

        info!(
            event_id = %id,
            %event_type,
            %instance_key,
            %sender,
            "Run event"
        );

        self.ownership
            .admit(event_type, &instance_key, sender)
            .map_err(|source| DispatchError::Authorization {
                id: id.clone(),
                source,
            })?;

        if let Err(source) = event.apply(self.reasoner.as_ref()).await {
            if event_type == EventType::NewInstance {
                self.ownership.release(&instance_key, sender);
            }
            return Err(DispatchError::Reasoner { id, source });
        }
        Ok(event_type)
    }

    /// Serve one event stream: read a frame, dispatch it, answer `ok`/`err`.
    pub async fn handle_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        sender: &PeerId,
        max_frame: usize,
        timeout: Duration,
    ) -> Result<(), WireError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let payload = tokio::time::timeout(timeout, read_frame(reader, max_frame))
            .await
            .map_err(|_| WireError::Timeout)??;

        let response = match self.dispatch(&payload, sender).await {
            Ok(_) => RESPONSE_OK,
            Err(e) => {
                warn!(%sender, error = %e, "Event rejected");
                RESPONSE_ERR
            }
        };

        tokio::time::timeout(timeout, write_frame(writer, response))
            .await
            .map_err(|_| WireError::Timeout)??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TERMINATOR;
    use async_trait::async_trait;
    use parley_types::{Instance, MemoryReasoner, Message, ReasonerCall};
    use tokio::io::BufReader;

    fn dispatcher() -> (Dispatcher, Arc<MemoryReasoner>) {
        let reasoner = Arc::new(MemoryReasoner::new());
        (
            Dispatcher::new(OwnershipRegistry::new(), reasoner.clone()),
            reasoner,
        )
    }

    fn instance(key: &str) -> Instance {
        Instance::new("Purchase", [("ID", key)])
    }

    fn peer(id: &str) -> PeerId {
        PeerId::new(id)
    }

    async fn send(d: &Dispatcher, event: Event, sender: &str) -> Result<EventType, DispatchError> {
        d.dispatch(&event.marshal().unwrap(), &peer(sender)).await
    }

    #[tokio::test]
    async fn test_new_instance_then_abort() {
        let (d, reasoner) = dispatcher();
        send(&d, Event::new_instance(instance("k")), "a").await.unwrap();
        assert_eq!(d.ownership().owner("k"), Some(peer("a")));
        send(&d, Event::abort("k", "_"), "a").await.unwrap();
        assert!(!d.ownership().contains("k"));
        assert_eq!(reasoner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_new_instance() {
        let (d, reasoner) = dispatcher();
        send(&d, Event::new_instance(instance("k")), "a").await.unwrap();
        let err = send(&d, Event::new_instance(instance("k")), "a")
            .await
            .unwrap_err();
        assert_eq!(
            err.authorization(),
            Some(&AuthorizationError::AlreadyExists("k".to_string()))
        );
        assert_eq!(reasoner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_non_owner_refused_before_reasoner() {
        let (d, reasoner) = dispatcher();
        send(&d, Event::new_instance(instance("Y1")), "a").await.unwrap();
        let err = send(&d, Event::abort("Y1", "_"), "c").await.unwrap_err();
        assert!(matches!(
            err.authorization(),
            Some(AuthorizationError::Unauthorized { .. })
        ));
        assert_eq!(d.ownership().owner("Y1"), Some(peer("a")));
        assert_eq!(reasoner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_update_unopened_not_found() {
        let (d, _) = dispatcher();
        let err = send(&d, Event::update(instance("X42")), "c")
            .await
            .unwrap_err();
        assert_eq!(
            err.authorization(),
            Some(&AuthorizationError::NotFound("X42".to_string()))
        );
    }

    #[tokio::test]
    async fn test_message_from_owner_reaches_reasoner() {
        let (d, reasoner) = dispatcher();
        send(&d, Event::new_instance(instance("k")), "a").await.unwrap();
        let t = send(&d, Event::new_message("k", Message::new("rfq", "k")), "a")
            .await
            .unwrap();
        assert_eq!(t, EventType::NewMessage);
        assert_eq!(
            reasoner.calls()[1],
            ReasonerCall::RegisterMessage {
                instance_key: "k".to_string(),
                schema: "rfq".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_message_for_other_instance_refused() {
        let (d, reasoner) = dispatcher();
        send(&d, Event::new_instance(instance("A1")), "a").await.unwrap();
        // Owner of A1 tries to slip in a message belonging to Y1.
        let err = send(&d, Event::new_message("A1", Message::new("rfq", "Y1")), "a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Codec {
                source: CodecError::Decode(_),
                ..
            }
        ));
        assert_eq!(
            reasoner.calls(),
            vec![ReasonerCall::RegisterInstance("A1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unidentifiable_payload() {
        let (d, _) = dispatcher();
        let err = d.dispatch(b"garbage", &peer("a")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unidentified(_)));
        assert!(err.to_string().starts_with("Cannot identify event"));
    }

    /// Reasoner that refuses everything.
    struct RefusingReasoner;

    #[async_trait]
    impl Reasoner for RefusingReasoner {
        async fn register_instance(&self, _: Instance) -> Result<(), ReasonerError> {
            Err(ReasonerError::new("refused"))
        }
        async fn register_message(&self, _: &str, _: Message) -> Result<(), ReasonerError> {
            Err(ReasonerError::new("refused"))
        }
        async fn update_instance(&self, _: Instance) -> Result<(), ReasonerError> {
            Err(ReasonerError::new("refused"))
        }
        async fn abort(&self, _: &str, _: &str) -> Result<(), ReasonerError> {
            Err(ReasonerError::new("refused"))
        }
        async fn drop_instance(&self, _: &str, _: &str) -> Result<(), ReasonerError> {
            Err(ReasonerError::new("refused"))
        }
        fn get_instance(&self, _: &str) -> Option<Instance> {
            None
        }
    }

    #[tokio::test]
    async fn test_refused_new_instance_rolls_back() {
        let d = Dispatcher::new(OwnershipRegistry::new(), Arc::new(RefusingReasoner));
        let err = send(&d, Event::new_instance(instance("k")), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Reasoner { .. }));
        assert!(!d.ownership().contains("k"));
    }

    #[tokio::test]
    async fn test_drop_removes_entry_even_if_reasoner_fails() {
        let d = Dispatcher::new(OwnershipRegistry::new(), Arc::new(RefusingReasoner));
        d.ownership().insert("k", peer("a"));
        let err = send(&d, Event::drop_instance("k", "bye"), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Reasoner { .. }));
        assert!(!d.ownership().contains("k"));
    }

    #[tokio::test]
    async fn test_handle_stream_answers_tokens() {
        let (d, _) = dispatcher();
        let mut request = Event::new_instance(instance("k")).marshal().unwrap();
        request.push(TERMINATOR);

        let mut reader = BufReader::new(&request[..]);
        let mut response = Vec::new();
        d.handle_stream(
            &mut reader,
            &mut response,
            &peer("a"),
            1024,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(response, [RESPONSE_OK, &[TERMINATOR]].concat());

        let mut reader = BufReader::new(&request[..]);
        let mut response = Vec::new();
        d.handle_stream(
            &mut reader,
            &mut response,
            &peer("a"),
            1024,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(response, [RESPONSE_ERR, &[TERMINATOR]].concat());
    }

    #[tokio::test]
    async fn test_handle_stream_incomplete_frame() {
        let (d, _) = dispatcher();
        let mut reader = BufReader::new(&b"{\"id\":"[..]);
        let mut response = Vec::new();
        let err = d
            .handle_stream(
                &mut reader,
                &mut response,
                &peer("a"),
                1024,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Frame(_)));
        assert!(response.is_empty());
    }
}
