// ── Domain events parsed from the event streams ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tablecast_api::Topic;

/// What happened to the entity.
///
/// Carried in the SSE `id:` field. Orders and reservations share the
/// vocabulary; anything the backend adds later lands in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventKind {
    Created,
    StatusUpdated,
    Updated,
    Deleted,
    Other(String),
}

impl EventKind {
    /// Parse the event identifier. Absent or empty means `Updated`.
    pub fn from_identifier(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            None | Some("") => Self::Updated,
            Some(s) => Self::from(s.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::StatusUpdated => "status-updated",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "created" => Self::Created,
            "status-updated" => Self::StatusUpdated,
            "updated" => Self::Updated,
            "deleted" => Self::Deleted,
            _ => Self::Other(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to an order or reservation, as received from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub topic: Topic,
    pub kind: EventKind,
    /// The entity exactly as the backend serialized it.
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(topic: Topic, kind: EventKind, payload: Value) -> Self {
        Self {
            topic,
            kind,
            payload,
            received_at: Utc::now(),
        }
    }

    /// The entity identifier rendered as text, if present.
    pub fn entity_id(&self) -> Option<String> {
        match self.payload.get("id")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// The entity's status, if present.
    pub fn status(&self) -> Option<String> {
        match self.payload.get("status")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
