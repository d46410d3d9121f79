//! Per-channel retained event log with replay support
//!
//! Each channel keeps a bounded backlog of delivered events, identified by a
//! replay id that increases monotonically from 1 and is never reused, even
//! after old events are trimmed. Live delivery rides a `tokio::sync::broadcast`
//! channel; replay subscriptions first drain the retained backlog, then switch
//! to the live feed. The backlog snapshot and the broadcast receiver are taken
//! under the same lock that publishing sends under, so no event published
//! during the switchover is lost or duplicated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::{ForcestreamError, Result};
use crate::streaming::message::{
    EventDescriptor, EventType, GenericStreamingMessage, StreamingMessage,
};
use crate::streaming::replay::ReplayId;

/// What kind of traffic a channel carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Custom generic streaming channel (`/u/...`), pushable by clients
    Custom,
    /// PushTopic notification channel (`/topic/...`)
    Topic,
    /// Standing change data capture channel (`/data/...ChangeEvent`)
    ChangeData,
}

/// An event as retained in a channel log
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Position of this event in the channel's history
    pub replay_id: u64,
    /// When the event was published
    pub created_date: DateTime<Utc>,
    /// Event payload
    pub payload: Value,
    /// PushTopic operation type, when applicable
    pub event_type: Option<EventType>,
}

impl StoredEvent {
    fn descriptor(&self) -> EventDescriptor {
        EventDescriptor {
            event_type: self.event_type,
            replay_id: self.replay_id,
            created_date: self.created_date,
        }
    }

    /// View this event as a generic streaming message
    pub fn into_generic(self) -> GenericStreamingMessage {
        let event = self.descriptor();
        GenericStreamingMessage {
            payload: self.payload,
            event,
        }
    }

    /// View this event as a PushTopic notification.
    ///
    /// Non-object payloads yield an empty sobject map; topic channels only
    /// ever publish objects.
    pub fn into_topic_message(self) -> StreamingMessage {
        let event = self.descriptor();
        let sobject = match self.payload {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        StreamingMessage { sobject, event }
    }
}

#[derive(Debug)]
struct LogState {
    next_replay_id: u64,
    retained: VecDeque<StoredEvent>,
}

/// A single channel: retained backlog plus live broadcast
#[derive(Debug)]
pub struct ChannelLog {
    name: String,
    kind: ChannelKind,
    state: Mutex<LogState>,
    sender: broadcast::Sender<StoredEvent>,
    durable_subscribers: AtomicUsize,
    retention_capacity: usize,
    retention_window: Duration,
}

impl ChannelLog {
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        retention_capacity: usize,
        retention_window: Duration,
        delivery_buffer: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(delivery_buffer.max(1));
        Self {
            name: name.into(),
            kind,
            state: Mutex::new(LogState {
                next_replay_id: 1,
                retained: VecDeque::new(),
            }),
            sender,
            durable_subscribers: AtomicUsize::new(0),
            retention_capacity,
            retention_window,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Append an event, assign its replay id, fan it out to live subscribers
    pub fn publish(&self, payload: Value, event_type: Option<EventType>) -> StoredEvent {
        let mut state = self.state.lock();
        let event = StoredEvent {
            replay_id: state.next_replay_id,
            created_date: Utc::now(),
            payload,
            event_type,
        };
        state.next_replay_id += 1;
        state.retained.push_back(event.clone());
        self.trim(&mut state);
        // Sent under the state lock: a receiver subscribe() takes after this
        // point already has the event in its backlog, one taken before sees
        // it live, never both. Send errors mean no live receiver; the event
        // stays retained for replay.
        let delivered = self.sender.send(event.clone()).unwrap_or(0);
        drop(state);
        trace!(
            channel = %self.name,
            replay_id = event.replay_id,
            live_receivers = delivered,
            "published event"
        );
        event
    }

    fn trim(&self, state: &mut LogState) {
        while state.retained.len() > self.retention_capacity {
            state.retained.pop_front();
        }
        let Ok(window) = chrono::Duration::from_std(self.retention_window) else {
            return;
        };
        let cutoff = Utc::now() - window;
        while state
            .retained
            .front()
            .is_some_and(|event| event.created_date < cutoff)
        {
            state.retained.pop_front();
        }
    }

    /// Register a durable subscription at the given cursor.
    ///
    /// Returns the retained backlog the cursor selects plus a live receiver.
    /// Both are captured under the log lock: every event is in exactly one of
    /// the two.
    pub fn subscribe(
        &self,
        cursor: ReplayId,
    ) -> Result<(Vec<StoredEvent>, broadcast::Receiver<StoredEvent>)> {
        let state = self.state.lock();
        if let ReplayId::After(replay_id) = cursor {
            if replay_id >= state.next_replay_id {
                return Err(ForcestreamError::ReplayOutOfRange {
                    channel: self.name.clone(),
                    replay_id,
                });
            }
        }
        let backlog: Vec<StoredEvent> = match cursor {
            ReplayId::NewOnly => Vec::new(),
            ReplayId::AllRetained => state.retained.iter().cloned().collect(),
            ReplayId::After(replay_id) => state
                .retained
                .iter()
                .filter(|event| event.replay_id > replay_id)
                .cloned()
                .collect(),
        };
        let receiver = self.sender.subscribe();
        self.durable_subscribers.fetch_add(1, Ordering::SeqCst);
        debug!(
            channel = %self.name,
            cursor = cursor.as_raw(),
            backlog = backlog.len(),
            "subscription registered"
        );
        Ok((backlog, receiver))
    }

    /// Drop one durable subscription registration
    pub fn release_subscriber(&self) {
        let previous = self.durable_subscribers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "release without matching subscribe");
        debug!(channel = %self.name, remaining = previous.saturating_sub(1), "subscription released");
    }

    /// Number of active durable subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.durable_subscribers.load(Ordering::SeqCst)
    }

    /// Publish-time delivery accounting: `-1` when an active durable
    /// subscription exists, `0` when nobody would receive the event live
    pub fn fanout_count(&self) -> i64 {
        if self.subscriber_count() > 0 {
            -1
        } else {
            0
        }
    }

    /// Highest replay id issued so far, 0 if nothing was published
    pub fn latest_replay_id(&self) -> u64 {
        self.state.lock().next_replay_id - 1
    }

    /// Number of events currently retained for replay
    pub fn retained_len(&self) -> usize {
        self.state.lock().retained.len()
    }
}
