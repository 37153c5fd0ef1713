//! Event model and codec.
//!
//! An [`Event`] tells a peer that something happened to a protocol instance.
//! On the wire every variant shares one JSON envelope:
//!
//! ```text
//! {"arguments": "<base64>", "id": "<uuid>", "instance_key": "<key>",
//!  "event_type": "new_instance" | "new_message" | "update" | "abort" | "drop"}
//! ```
//!
//! The argument (an instance snapshot, a message, or a motive) is always
//! base64-encoded so the envelope stays plain text whatever the payload
//! contains. [`event_id`] and [`event_type`] read only the envelope header,
//! which lets the dispatcher route a payload before decoding its argument.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parley_types::{Instance, Message, Reasoner, ReasonerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from encoding or decoding events.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope, its base64 argument, or the embedded payload is malformed.
    #[error("Malformed event: {0}")]
    Decode(String),
    /// `event_type` is missing or outside the closed set.
    #[error("Unknown event type: '{0}'")]
    UnknownEventType(String),
    /// An embedded instance or message failed to serialize.
    #[error("Cannot encode event payload: {0}")]
    Encode(serde_json::Error),
}

/// Errors from [`run_event`].
#[derive(Debug, Error)]
pub enum RunEventError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Reasoner(#[from] ReasonerError),
}

/// The closed set of event variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewInstance,
    NewMessage,
    Update,
    Abort,
    Drop,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::NewInstance,
        EventType::NewMessage,
        EventType::Update,
        EventType::Abort,
        EventType::Drop,
    ];

    /// Wire name of the variant.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::NewInstance => "new_instance",
            EventType::NewMessage => "new_message",
            EventType::Update => "update",
            EventType::Abort => "abort",
            EventType::Drop => "drop",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CodecError::UnknownEventType(s.to_string()))
    }
}

/// Wire form shared by all variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "arguments")]
    pub argument: String,
    pub id: String,
    pub instance_key: String,
    pub event_type: String,
}

/// Variant payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// An instance was created; carries the initial snapshot.
    NewInstance(Instance),
    /// A message was sent within an instance.
    NewMessage {
        instance_key: String,
        message: Message,
    },
    /// The sender's snapshot of an instance changed.
    Update(Instance),
    /// The instance was cancelled by one of its parties.
    Abort { instance_key: String, motive: String },
    /// The instance was dropped by its owner.
    Drop { instance_key: String, motive: String },
}

/// Borrowed view of an event's argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argument<'a> {
    Instance(&'a Instance),
    Message(&'a Message),
    Motive(&'a str),
}

/// A protocol occurrence sent from one node to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: String,
    kind: EventKind,
}

impl Event {
    fn with_kind(kind: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
        }
    }

    pub fn new_instance(instance: Instance) -> Self {
        Self::with_kind(EventKind::NewInstance(instance))
    }

    pub fn new_message(instance_key: impl Into<String>, message: Message) -> Self {
        Self::with_kind(EventKind::NewMessage {
            instance_key: instance_key.into(),
            message,
        })
    }

    pub fn update(instance: Instance) -> Self {
        Self::with_kind(EventKind::Update(instance))
    }

    pub fn abort(instance_key: impl Into<String>, motive: impl Into<String>) -> Self {
        Self::with_kind(EventKind::Abort {
            instance_key: instance_key.into(),
            motive: motive.into(),
        })
    }

    pub fn drop_instance(instance_key: impl Into<String>, motive: impl Into<String>) -> Self {
        Self::with_kind(EventKind::Drop {
            instance_key: instance_key.into(),
            motive: motive.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::NewInstance(_) => EventType::NewInstance,
            EventKind::NewMessage { .. } => EventType::NewMessage,
            EventKind::Update(_) => EventType::Update,
            EventKind::Abort { .. } => EventType::Abort,
            EventKind::Drop { .. } => EventType::Drop,
        }
    }

    /// Key of the instance the event is about.
    pub fn instance_key(&self) -> String {
        match &self.kind {
            EventKind::NewInstance(instance) | EventKind::Update(instance) => instance.key(),
            EventKind::NewMessage { instance_key, .. }
            | EventKind::Abort { instance_key, .. }
            | EventKind::Drop { instance_key, .. } => instance_key.clone(),
        }
    }

    pub fn argument(&self) -> Argument<'_> {
        match &self.kind {
            EventKind::NewInstance(instance) | EventKind::Update(instance) => {
                Argument::Instance(instance)
            }
            EventKind::NewMessage { message, .. } => Argument::Message(message),
            EventKind::Abort { motive, .. } | EventKind::Drop { motive, .. } => {
                Argument::Motive(motive)
            }
        }
    }

    /// Serialize to the envelope form.
    pub fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        let argument = match &self.kind {
            EventKind::NewInstance(instance) | EventKind::Update(instance) => {
                encode_payload(instance)?
            }
            EventKind::NewMessage { message, .. } => encode_payload(message)?,
            EventKind::Abort { motive, .. } | EventKind::Drop { motive, .. } => {
                BASE64.encode(motive.as_bytes())
            }
        };
        let envelope = EventEnvelope {
            argument,
            id: self.id.clone(),
            instance_key: self.instance_key(),
            event_type: self.event_type().as_str().to_string(),
        };
        serde_json::to_vec(&envelope).map_err(CodecError::Encode)
    }

    /// Decode a full event, argument included.
    pub fn unmarshal(data: &[u8]) -> Result<Self, CodecError> {
        let object = read_object(data)?;
        let (event_type, _) = read_header(&object)?;
        let envelope: EventEnvelope = serde_json::from_value(Value::Object(object))
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        let argument = BASE64
            .decode(envelope.argument.as_bytes())
            .map_err(|e| CodecError::Decode(format!("arguments are not base64: {e}")))?;

        let kind = match event_type {
            EventType::NewInstance => EventKind::NewInstance(decode_instance(&envelope, &argument)?),
            EventType::Update => EventKind::Update(decode_instance(&envelope, &argument)?),
            EventType::NewMessage => {
                let message: Message = decode_payload(&argument)?;
                if message.instance_key != envelope.instance_key {
                    return Err(CodecError::Decode(format!(
                        "envelope key '{}' does not match message key '{}'",
                        envelope.instance_key, message.instance_key
                    )));
                }
                EventKind::NewMessage {
                    instance_key: envelope.instance_key,
                    message,
                }
            }
            EventType::Abort => EventKind::Abort {
                instance_key: envelope.instance_key,
                motive: decode_motive(argument)?,
            },
            EventType::Drop => EventKind::Drop {
                instance_key: envelope.instance_key,
                motive: decode_motive(argument)?,
            },
        };

        Ok(Self {
            id: envelope.id,
            kind,
        })
    }

    /// Hand the event to the reasoner method matching its variant.
    pub async fn apply(self, reasoner: &dyn Reasoner) -> Result<(), ReasonerError> {
        match self.kind {
            EventKind::NewInstance(instance) => reasoner.register_instance(instance).await,
            EventKind::NewMessage {
                instance_key,
                message,
            } => reasoner.register_message(&instance_key, message).await,
            EventKind::Update(instance) => reasoner.update_instance(instance).await,
            EventKind::Abort {
                instance_key,
                motive,
            } => reasoner.abort(&instance_key, &motive).await,
            EventKind::Drop {
                instance_key,
                motive,
            } => reasoner.drop_instance(&instance_key, &motive).await,
        }
    }
}

/// Parse the payload as a JSON object. Arrays and scalars are malformed.
fn read_object(data: &[u8]) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))? {
        Value::Object(object) => Ok(object),
        _ => Err(CodecError::Decode("event is not a JSON object".to_string())),
    }
}

/// The envelope fields read without touching the argument.
fn read_header(object: &Map<String, Value>) -> Result<(EventType, Option<String>), CodecError> {
    let event_type = match object.get("event_type") {
        Some(Value::String(name)) => name.parse()?,
        None => return Err(CodecError::UnknownEventType(String::new())),
        Some(_) => {
            return Err(CodecError::Decode(
                "field `event_type` is not a string".to_string(),
            ))
        }
    };
    let id = match object.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        None => None,
        Some(_) => return Err(CodecError::Decode("field `id` is not a string".to_string())),
    };
    Ok((event_type, id))
}

/// Type of a marshalled event, read from the header only.
pub fn event_type(data: &[u8]) -> Result<EventType, CodecError> {
    read_header(&read_object(data)?).map(|(t, _)| t)
}

/// ID of a marshalled event, read from the header only.
pub fn event_id(data: &[u8]) -> Result<String, CodecError> {
    match read_header(&read_object(data)?)? {
        (_, Some(id)) => Ok(id),
        (_, None) => Err(CodecError::Decode("missing field `id`".to_string())),
    }
}

/// Instance key of a marshalled event. Requires a full decode.
pub fn instance_key(data: &[u8]) -> Result<String, CodecError> {
    Event::unmarshal(data).map(|e| e.instance_key())
}

/// Decode a marshalled event and run it on the reasoner. No retries.
pub async fn run_event(reasoner: &dyn Reasoner, data: &[u8]) -> Result<(), RunEventError> {
    let event = Event::unmarshal(data)?;
    event.apply(reasoner).await?;
    Ok(())
}

fn encode_payload<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let bytes = serde_json::to_vec(value).map_err(CodecError::Encode)?;
    Ok(BASE64.encode(bytes))
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

fn decode_instance(envelope: &EventEnvelope, bytes: &[u8]) -> Result<Instance, CodecError> {
    let instance: Instance = decode_payload(bytes)?;
    if instance.key() != envelope.instance_key {
        return Err(CodecError::Decode(format!(
            "envelope key '{}' does not match instance key '{}'",
            envelope.instance_key,
            instance.key()
        )));
    }
    Ok(instance)
}

fn decode_motive(bytes: Vec<u8>) -> Result<String, CodecError> {
    String::from_utf8(bytes).map_err(|e| CodecError::Decode(format!("motive is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::{MemoryReasoner, ReasonerCall};

    fn instance() -> Instance {
        Instance::new("Purchase", [("ID", "X42")]).with_value("item", "ball")
    }

    fn message() -> Message {
        Message::new("rfq", "X42").with_value("item", "ball")
    }

    fn all_variants() -> Vec<Event> {
        vec![
            Event::new_instance(instance()),
            Event::new_message("X42", message()),
            Event::update(instance()),
            Event::abort("X42", "too expensive"),
            Event::drop_instance("X42", "changed my mind"),
        ]
    }

    #[test]
    fn test_roundtrip_all_variants() {
        for event in all_variants() {
            let bytes = event.marshal().unwrap();
            let decoded = Event::unmarshal(&bytes).unwrap();
            assert_eq!(decoded, event, "variant {}", event.event_type());
            assert_eq!(decoded.argument(), event.argument());
        }
    }

    #[test]
    fn test_header_reads_match_event() {
        for event in all_variants() {
            let bytes = event.marshal().unwrap();
            assert_eq!(event_type(&bytes).unwrap(), event.event_type());
            assert_eq!(event_id(&bytes).unwrap(), event.id());
            assert_eq!(instance_key(&bytes).unwrap(), "X42");
        }
    }

    #[test]
    fn test_header_read_ignores_broken_argument() {
        let json = br#"{"arguments":"!!not base64!!","id":"e-1","instance_key":"k","event_type":"update"}"#;
        assert_eq!(event_type(json).unwrap(), EventType::Update);
        assert_eq!(event_id(json).unwrap(), "e-1");
        assert!(matches!(
            Event::unmarshal(json),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_envelope_field_names() {
        let bytes = Event::abort("X42", "_").marshal().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event_type"], "abort");
        assert_eq!(value["instance_key"], "X42");
        assert_eq!(value["arguments"], BASE64.encode("_"));
        assert!(value["id"].is_string());
    }

    #[test]
    fn test_unknown_event_type_rejected_everywhere() {
        let payloads: [&[u8]; 2] = [
            br#"{"arguments":"","id":"e-1","instance_key":"k","event_type":"explode"}"#,
            br#"{"arguments":"","id":"e-1","instance_key":"k"}"#,
        ];
        for data in payloads {
            assert!(matches!(event_type(data), Err(CodecError::UnknownEventType(_))));
            assert!(matches!(event_id(data), Err(CodecError::UnknownEventType(_))));
            assert!(matches!(
                Event::unmarshal(data),
                Err(CodecError::UnknownEventType(_))
            ));
            assert!(matches!(
                instance_key(data),
                Err(CodecError::UnknownEventType(_))
            ));
        }
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        assert!(matches!(event_type(b"{nope"), Err(CodecError::Decode(_))));
        assert!(matches!(event_id(b"[]"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_non_object_envelope_rejected() {
        let arrays: [&[u8]; 2] = [b"[]", br#"["e-1","update"]"#];
        for data in arrays {
            assert!(matches!(event_type(data), Err(CodecError::Decode(_))));
            assert!(matches!(event_id(data), Err(CodecError::Decode(_))));
            assert!(matches!(Event::unmarshal(data), Err(CodecError::Decode(_))));
        }
        let encoded = BASE64.encode("_");
        let as_array = format!(r#"["{encoded}","e-1","k","abort"]"#);
        assert!(matches!(
            Event::unmarshal(as_array.as_bytes()),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_non_string_header_fields_rejected() {
        let data = br#"{"arguments":"","id":7,"instance_key":"k","event_type":"abort"}"#;
        assert!(matches!(event_id(data), Err(CodecError::Decode(_))));
        let data = br#"{"arguments":"","id":"e-1","instance_key":"k","event_type":1}"#;
        assert!(matches!(event_type(data), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_message_key_mismatch_rejected() {
        let data = Event::new_message("A1", Message::new("rfq", "Y1"))
            .marshal()
            .unwrap();
        assert!(matches!(Event::unmarshal(&data), Err(CodecError::Decode(_))));
        assert!(instance_key(&data).is_err());
    }

    #[test]
    fn test_missing_id_is_decode_error() {
        let data = br#"{"arguments":"","instance_key":"k","event_type":"drop"}"#;
        assert!(matches!(event_id(data), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_instance_key_mismatch_rejected() {
        let envelope = EventEnvelope {
            argument: BASE64.encode(serde_json::to_vec(&instance()).unwrap()),
            id: "e-1".to_string(),
            instance_key: "Y1".to_string(),
            event_type: "new_instance".to_string(),
        };
        let data = serde_json::to_vec(&envelope).unwrap();
        assert!(matches!(Event::unmarshal(&data), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_fresh_ids_per_event() {
        let a = Event::abort("X42", "_");
        let b = Event::abort("X42", "_");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_event_type_from_str() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!("New_Instance".parse::<EventType>().is_err());
    }

    #[tokio::test]
    async fn test_run_event_routes_to_reasoner() {
        let reasoner = MemoryReasoner::new();
        let events = [
            Event::new_instance(instance()),
            Event::new_message("X42", message()),
            Event::update(instance()),
            Event::drop_instance("X42", "done"),
        ];
        for event in &events {
            run_event(&reasoner, &event.marshal().unwrap()).await.unwrap();
        }
        assert_eq!(
            reasoner.calls(),
            vec![
                ReasonerCall::RegisterInstance("X42".to_string()),
                ReasonerCall::RegisterMessage {
                    instance_key: "X42".to_string(),
                    schema: "rfq".to_string(),
                },
                ReasonerCall::UpdateInstance("X42".to_string()),
                ReasonerCall::DropInstance {
                    instance_key: "X42".to_string(),
                    motive: "done".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_run_event_propagates_reasoner_error() {
        let reasoner = MemoryReasoner::new();
        let data = Event::abort("never-opened", "_").marshal().unwrap();
        let err = run_event(&reasoner, &data).await.unwrap_err();
        assert!(matches!(err, RunEventError::Reasoner(_)));
    }
}
