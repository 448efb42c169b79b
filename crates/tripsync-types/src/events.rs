use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::models::{Message, Reaction};

/// Topic name for a trip's chat channel. One channel per trip.
pub fn topic_for_trip(trip_id: Uuid) -> String {
    format!("trip-{}-chat", trip_id)
}

/// Frames exchanged over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// An application event fanned out to every subscriber of the topic
    Broadcast { event: String, payload: Value },

    /// Channel lifecycle notice from the transport
    System {
        status: SystemStatus,
        #[serde(default)]
        message: Option<String>,
    },

    /// Liveness probe
    Ping,

    Pong,
}

impl Frame {
    pub fn broadcast(event: ChatEvent, payload: Value) -> Self {
        Self::Broadcast {
            event: event.as_str().to_string(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Subscribed,
    Closed,
    Error,
}

/// Event names carried on a trip chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEvent {
    Message,
    Typing,
    Reaction,
    MessageEdit,
    MessageDelete,
}

impl ChatEvent {
    pub const ALL: [ChatEvent; 5] = [
        Self::Message,
        Self::Typing,
        Self::Reaction,
        Self::MessageEdit,
        Self::MessageDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Typing => "typing",
            Self::Reaction => "reaction",
            Self::MessageEdit => "message_edit",
            Self::MessageDelete => "message_delete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

/// Outbound "message" payload: the persisted record plus a send timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload<'a> {
    #[serde(flatten)]
    pub message: &'a Message,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub action: ReactionAction,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub emoji: String,
    /// Persisted reaction row, present on `add`
    #[serde(default)]
    pub reaction: Option<Reaction>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEdit {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub encrypted: bool,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelete {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub sender_id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
    pub is_typing: bool,
    pub timestamp: DateTime<Utc>,
}

/// A validated, strictly-typed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(Message),
    Reaction(ReactionEvent),
    Edit(MessageEdit),
    Delete(MessageDelete),
    Typing(TypingEvent),
}

impl InboundEvent {
    /// Normalize and type a raw broadcast payload. Returns `None` (and logs)
    /// for anything without a usable identity or with the wrong shape.
    pub fn parse(event: ChatEvent, payload: &Value) -> Option<Self> {
        let Some(record) = normalize(payload) else {
            warn!("Dropping {} event without id or sender_id", event.as_str());
            return None;
        };
        let value = Value::Object(record.clone());

        let parsed = match event {
            ChatEvent::Message => serde_json::from_value(value).map(Self::Message),
            ChatEvent::Reaction => serde_json::from_value(value).map(Self::Reaction),
            ChatEvent::MessageEdit => serde_json::from_value(value).map(Self::Edit),
            ChatEvent::MessageDelete => serde_json::from_value(value).map(Self::Delete),
            ChatEvent::Typing => serde_json::from_value(value).map(Self::Typing),
        };

        match parsed {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!("Dropping malformed {} event: {}", event.as_str(), e);
                None
            }
        }
    }

    pub fn sender_id(&self) -> Uuid {
        match self {
            Self::Message(m) => m.sender_id,
            Self::Reaction(r) => r.sender_id,
            Self::Edit(e) => e.sender_id,
            Self::Delete(d) => d.sender_id,
            Self::Typing(t) => t.sender_id,
        }
    }
}

/// Unwrap a broadcast payload to the entity record it carries.
///
/// Payloads may arrive double-wrapped (`{"payload": {...}}`); one level of
/// nesting is peeled when the outer object has no identity of its own.
pub fn normalize(payload: &Value) -> Option<&Map<String, Value>> {
    let outer = payload.as_object()?;
    if has_identity(outer) {
        return Some(outer);
    }
    let inner = outer.get("payload")?.as_object()?;
    has_identity(inner).then_some(inner)
}

fn has_identity(record: &Map<String, Value>) -> bool {
    ["id", "sender_id"]
        .iter()
        .any(|key| record.get(*key).is_some_and(|v| !v.is_null()))
}
