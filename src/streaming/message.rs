//! Message envelopes delivered through streaming subscriptions
//!
//! Three envelope shapes flow out of the facade:
//!
//! - [`StreamingMessage`]: PushTopic notifications carrying the matched
//!   record's selected fields and an operation descriptor.
//! - [`GenericStreamingMessage`]: custom-channel events carrying an opaque
//!   JSON payload.
//! - Change data capture events, delivered as [`GenericStreamingMessage`]s
//!   whose payload embeds a [`ChangeEventHeader`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operation that produced a PushTopic notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    Undeleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Created => write!(f, "created"),
            EventType::Updated => write!(f, "updated"),
            EventType::Deleted => write!(f, "deleted"),
            EventType::Undeleted => write!(f, "undeleted"),
        }
    }
}

/// Event descriptor attached to every delivered message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Operation type; present on PushTopic notifications only
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    /// Position of this event in the channel's history
    #[serde(rename = "replayId")]
    pub replay_id: u64,
    /// When the event was created on the org
    #[serde(rename = "createdDate")]
    pub created_date: DateTime<Utc>,
}

/// A PushTopic notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingMessage {
    /// Selected fields of the matched record (always includes `Id`)
    pub sobject: Map<String, Value>,
    /// Event descriptor with the operation type and replay id
    pub event: EventDescriptor,
}

impl StreamingMessage {
    /// Fetch a field of the matched record as a string, if present
    pub fn sobject_str(&self, field: &str) -> Option<&str> {
        self.sobject.get(field).and_then(Value::as_str)
    }
}

/// An event delivered on a generic or change data capture channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericStreamingMessage {
    /// Opaque payload; for CDC channels an object embedding a
    /// `ChangeEventHeader`
    pub payload: Value,
    /// Event descriptor with the replay id
    pub event: EventDescriptor,
}

impl GenericStreamingMessage {
    /// Payload as a string, for plain-text custom channel pushes
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// Parse the embedded change event header, if this is a CDC message
    pub fn change_event_header(&self) -> Option<ChangeEventHeader> {
        let header = self.payload.get("ChangeEventHeader")?;
        serde_json::from_value(header.clone()).ok()
    }

    /// Fetch a top-level payload field as a string
    pub fn payload_field_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Change operation recorded in a [`ChangeEventHeader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Undelete,
}

/// Header carried by every change data capture event
///
/// One header may cover several records: mutations landing close together are
/// coalesced into a single event listing every affected record id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEventHeader {
    /// Entity the change applies to, e.g. `Account`
    pub entity_name: String,
    /// Ids of every record covered by this event
    pub record_ids: Vec<String>,
    /// Operation that produced the change
    pub change_type: ChangeType,
    /// Opaque key grouping changes committed together
    pub transaction_key: String,
    /// Commit time in milliseconds since the epoch
    pub commit_timestamp: i64,
}

/// Request body for pushing an event to a custom channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    /// Payload delivered to subscribers
    pub payload: Value,
    /// Targeted user ids; empty delivers to all subscribers
    #[serde(rename = "userIds", default)]
    pub user_ids: Vec<String>,
}

impl PushEnvelope {
    /// Envelope with a string payload and no user targeting
    pub fn broadcast(payload: impl Into<String>) -> Self {
        Self {
            payload: Value::String(payload.into()),
            user_ids: Vec::new(),
        }
    }
}

/// Result of pushing an event to a custom channel
///
/// `fanout_count` follows the remote service's convention: `-1` means the
/// event was delivered to an active durable subscription, `0` means no live
/// subscriber received it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    /// Delivery accounting, see type-level docs
    #[serde(rename = "fanoutCount")]
    pub fanout_count: i64,
    /// Online status per targeted user id
    #[serde(rename = "userOnlineStatus")]
    pub user_online_status: std::collections::HashMap<String, bool>,
}
