//! Change data capture emission
//!
//! Record mutations are turned into change events on the entity's standing
//! `/data/<Entity>ChangeEvent` channel. Mutations of the same entity and
//! operation landing inside the coalescing window flush as ONE event whose
//! `ChangeEventHeader.recordIds` lists every affected record, mirroring the
//! remote service's habit of batching near-simultaneous commits. A zero
//! window emits one event per record immediately.
//!
//! Delivery multiplicity is therefore deliberately ambiguous: consumers get
//! at least one message covering each affected record, either one per record
//! or one for all of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::streaming::message::{ChangeEventHeader, ChangeType};

use super::channel::ChannelLog;

/// A buffered record mutation awaiting flush
struct PendingChange {
    channel: Arc<ChannelLog>,
    entity: String,
    change_type: ChangeType,
    record_id: String,
    fields: Map<String, Value>,
}

struct BufferState {
    pending: Vec<PendingChange>,
    flush_scheduled: bool,
}

/// Buffers record mutations and flushes them as change events
pub struct ChangeBuffer {
    window: Duration,
    state: Mutex<BufferState>,
}

impl ChangeBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(BufferState {
                pending: Vec::new(),
                flush_scheduled: false,
            }),
        }
    }

    /// Record a mutation. Coalescing defers the flush to a tokio task;
    /// without a runtime on the calling thread the change is flushed
    /// synchronously instead, as if the window were zero.
    pub fn record(
        self: &Arc<Self>,
        channel: Arc<ChannelLog>,
        entity: &str,
        change_type: ChangeType,
        record_id: String,
        fields: Map<String, Value>,
    ) {
        let change = PendingChange {
            channel,
            entity: entity.to_string(),
            change_type,
            record_id,
            fields,
        };

        if self.window.is_zero() {
            emit(vec![change]);
            return;
        }

        let schedule = {
            let mut state = self.state.lock();
            state.pending.push(change);
            !std::mem::replace(&mut state.flush_scheduled, true)
        };
        if schedule {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let buffer = Arc::clone(self);
                    let window = self.window;
                    handle.spawn(async move {
                        tokio::time::sleep(window).await;
                        buffer.flush();
                    });
                }
                // No runtime to defer on; emit without coalescing.
                Err(_) => self.flush(),
            }
        }
    }

    /// Drain the buffer, emitting one event per (entity, operation) group
    pub fn flush(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.flush_scheduled = false;
            std::mem::take(&mut state.pending)
        };
        if pending.is_empty() {
            return;
        }

        // Group while preserving first-seen order.
        let mut order: Vec<(String, ChangeType)> = Vec::new();
        let mut groups: HashMap<(String, ChangeType), Vec<PendingChange>> = HashMap::new();
        for change in pending {
            let key = (change.entity.clone(), change.change_type);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(change);
        }
        for key in order {
            if let Some(group) = groups.remove(&key) {
                emit(group);
            }
        }
    }
}

/// Emit one change event covering every record in `group`
fn emit(group: Vec<PendingChange>) {
    let Some(last) = group.last() else {
        return;
    };
    let header = ChangeEventHeader {
        entity_name: last.entity.clone(),
        record_ids: group.iter().map(|c| c.record_id.clone()).collect(),
        change_type: last.change_type,
        transaction_key: Uuid::new_v4().to_string(),
        commit_timestamp: chrono::Utc::now().timestamp_millis(),
    };
    // Field values come from the last mutation in the group; the header's
    // record id list is authoritative for coverage.
    let mut payload = last.fields.clone();
    let channel = Arc::clone(&last.channel);
    let records = header.record_ids.len();
    payload.insert(
        "ChangeEventHeader".to_string(),
        serde_json::to_value(&header).unwrap_or(Value::Null),
    );
    let event = channel.publish(Value::Object(payload), None);
    debug!(
        channel = channel.name(),
        replay_id = event.replay_id,
        records,
        change_type = ?header.change_type,
        "change event emitted"
    );
}
