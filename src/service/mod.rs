//! Embedded in-memory org
//!
//! `EmbeddedOrg` plays the remote service's part so integration tests run
//! hermetically: an sobject record store, provisionable custom streaming
//! channels, query-backed PushTopics, and standing change data capture
//! channels per entity. Only the semantics the streaming client consumes are
//! modeled; there is no wire transport and nothing survives the process.
//!
//! # Example
//!
//! ```ignore
//! use forcestream::{EmbeddedOrg, OrgConfig};
//! use serde_json::json;
//!
//! let org = EmbeddedOrg::new(OrgConfig::default());
//! org.create_record("StreamingChannel", json!({"Name": "/u/Demo"}))?;
//! let channel = org.channel("/u/Demo")?;
//! ```

pub mod cdc;
pub mod channel;
pub mod query;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::OrgConfig;
use crate::error::{ForcestreamError, Result};
use crate::sobject::SaveResult;
use crate::streaming::message::{ChangeType, EventType, PushEnvelope, PushResult};

use cdc::ChangeBuffer;
use channel::{ChannelKind, ChannelLog};
use query::TopicQuery;

/// Prefix required of custom streaming channel names
const CUSTOM_CHANNEL_PREFIX: &str = "/u/";

/// A registered PushTopic
struct TopicDef {
    query: TopicQuery,
    notify_create: bool,
    notify_update: bool,
    notify_delete: bool,
    notify_undelete: bool,
}

impl TopicDef {
    fn notifies(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::Created => self.notify_create,
            EventType::Updated => self.notify_update,
            EventType::Deleted => self.notify_delete,
            EventType::Undeleted => self.notify_undelete,
        }
    }
}

struct StoredRecord {
    id: String,
    fields: Map<String, Value>,
}

struct OrgInner {
    config: OrgConfig,
    /// sobject type -> records in insertion order
    records: RwLock<HashMap<String, Vec<StoredRecord>>>,
    channels: RwLock<HashMap<String, Arc<ChannelLog>>>,
    topics: RwLock<HashMap<String, TopicDef>>,
    changes: Arc<ChangeBuffer>,
}

/// In-memory stand-in for the remote org
#[derive(Clone)]
pub struct EmbeddedOrg {
    inner: Arc<OrgInner>,
}

impl EmbeddedOrg {
    pub fn new(config: OrgConfig) -> Self {
        let changes = Arc::new(ChangeBuffer::new(config.cdc_coalesce_window));
        info!(
            retention_capacity = config.retention_capacity,
            coalesce_ms = config.cdc_coalesce_window.as_millis() as u64,
            "embedded org started"
        );
        Self {
            inner: Arc::new(OrgInner {
                config,
                records: RwLock::new(HashMap::new()),
                channels: RwLock::new(HashMap::new()),
                topics: RwLock::new(HashMap::new()),
                changes,
            }),
        }
    }

    /// Issue a session token
    pub fn open_session(&self) -> String {
        let token = Uuid::new_v4().to_string();
        info!("session opened");
        token
    }

    // ------------------------------------------------------------------
    // sobject store
    // ------------------------------------------------------------------

    /// Create a record. `StreamingChannel` and `PushTopic` records provision
    /// streaming fixtures; every other type is a plain record whose mutations
    /// feed matching PushTopics and the entity's CDC channel.
    pub fn create_record(&self, sobject_type: &str, fields: Value) -> Result<SaveResult> {
        let Value::Object(mut fields) = fields else {
            return Err(ForcestreamError::InvalidRecord(
                "record fields must be an object".to_string(),
            ));
        };

        match sobject_type {
            "StreamingChannel" => self.provision_channel(&fields)?,
            "PushTopic" => self.provision_topic(&fields)?,
            _ => {}
        }

        let id = Uuid::new_v4().simple().to_string();
        fields.insert("Id".to_string(), Value::String(id.clone()));
        self.inner
            .records
            .write()
            .entry(sobject_type.to_string())
            .or_default()
            .push(StoredRecord {
                id: id.clone(),
                fields: fields.clone(),
            });
        debug!(sobject_type, id = %id, "record created");

        if !is_streaming_fixture(sobject_type) {
            self.notify_topics(sobject_type, &fields, EventType::Created);
            self.emit_change(sobject_type, ChangeType::Create, &id, &fields);
        }
        Ok(SaveResult { success: true, id })
    }

    /// Update a record's fields in place
    pub fn update_record(&self, sobject_type: &str, id: &str, updates: Value) -> Result<()> {
        let Value::Object(updates) = updates else {
            return Err(ForcestreamError::InvalidRecord(
                "record fields must be an object".to_string(),
            ));
        };
        let fields = {
            let mut records = self.inner.records.write();
            let record = records
                .get_mut(sobject_type)
                .and_then(|list| list.iter_mut().find(|r| r.id == id))
                .ok_or(ForcestreamError::RecordNotFound)?;
            for (key, value) in updates {
                record.fields.insert(key, value);
            }
            record.fields.clone()
        };
        if !is_streaming_fixture(sobject_type) {
            self.notify_topics(sobject_type, &fields, EventType::Updated);
            self.emit_change(sobject_type, ChangeType::Update, id, &fields);
        }
        Ok(())
    }

    /// Query records by filter, optionally projecting to selected fields.
    /// Filters support field equality and `{"$in": [...]}` membership.
    pub fn find(
        &self,
        sobject_type: &str,
        filter: &Value,
        fields: Option<&[&str]>,
    ) -> Result<Vec<Value>> {
        let records = self.inner.records.read();
        let list = match records.get(sobject_type) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for record in list {
            if matches_filter(&record.fields, filter)? {
                out.push(Value::Object(project(&record.fields, fields)));
            }
        }
        Ok(out)
    }

    /// Delete a single record by id
    pub fn delete_record(&self, sobject_type: &str, id: &str) -> Result<()> {
        let record = {
            let mut records = self.inner.records.write();
            let list = records
                .get_mut(sobject_type)
                .ok_or(ForcestreamError::RecordNotFound)?;
            let position = list
                .iter()
                .position(|r| r.id == id)
                .ok_or(ForcestreamError::RecordNotFound)?;
            list.remove(position)
        };

        match sobject_type {
            "StreamingChannel" => self.remove_provisioned_channel(&record.fields),
            "PushTopic" => self.remove_provisioned_topic(&record.fields),
            _ => {
                self.notify_topics(sobject_type, &record.fields, EventType::Deleted);
                self.emit_change(sobject_type, ChangeType::Delete, &record.id, &record.fields);
            }
        }
        debug!(sobject_type, id, "record deleted");
        Ok(())
    }

    /// Bulk delete. Deleting nothing, or naming a missing id, is an error so
    /// leaked test data surfaces instead of rotting.
    pub fn destroy(&self, sobject_type: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Err(ForcestreamError::RecordNotFound);
        }
        for id in ids {
            self.delete_record(sobject_type, id)?;
        }
        Ok(ids.len())
    }

    // ------------------------------------------------------------------
    // streaming channels
    // ------------------------------------------------------------------

    /// Look up a channel. Standing `/data/<Entity>ChangeEvent` channels are
    /// created on first use; custom channels must have been provisioned.
    pub fn channel(&self, name: &str) -> Result<Arc<ChannelLog>> {
        if let Some(log) = self.inner.channels.read().get(name) {
            return Ok(Arc::clone(log));
        }
        if cdc_entity(name).is_some() {
            return Ok(self.ensure_channel(name, ChannelKind::ChangeData));
        }
        Err(ForcestreamError::ChannelNotFound(name.to_string()))
    }

    /// Channel backing a PushTopic's notifications
    pub fn topic_channel(&self, topic_name: &str) -> Result<Arc<ChannelLog>> {
        if !self.inner.topics.read().contains_key(topic_name) {
            return Err(ForcestreamError::TopicNotFound(topic_name.to_string()));
        }
        self.channel(&topic_channel_name(topic_name))
    }

    /// Push an event to a custom channel
    pub fn push(&self, channel_name: &str, envelope: PushEnvelope) -> Result<PushResult> {
        let channel = self.channel(channel_name)?;
        if channel.kind() != ChannelKind::Custom {
            return Err(ForcestreamError::PushRejected(format!(
                "{channel_name} is not a custom streaming channel"
            )));
        }
        let fanout_count = channel.fanout_count();
        let event = channel.publish(envelope.payload, None);
        let online = fanout_count == -1;
        let user_online_status = envelope
            .user_ids
            .iter()
            .map(|user| (user.clone(), online))
            .collect();
        debug!(
            channel = channel_name,
            replay_id = event.replay_id,
            fanout_count,
            "event pushed"
        );
        Ok(PushResult {
            fanout_count,
            user_online_status,
        })
    }

    fn ensure_channel(&self, name: &str, kind: ChannelKind) -> Arc<ChannelLog> {
        let mut channels = self.inner.channels.write();
        let config = &self.inner.config;
        Arc::clone(channels.entry(name.to_string()).or_insert_with(|| {
            info!(channel = name, ?kind, "channel created");
            Arc::new(ChannelLog::new(
                name,
                kind,
                config.retention_capacity,
                config.retention_window,
                config.delivery_buffer,
            ))
        }))
    }

    fn provision_channel(&self, fields: &Map<String, Value>) -> Result<()> {
        let name = required_str(fields, "Name")?;
        if !name.starts_with(CUSTOM_CHANNEL_PREFIX) {
            return Err(ForcestreamError::InvalidRecord(format!(
                "custom channel name must start with {CUSTOM_CHANNEL_PREFIX}: {name}"
            )));
        }
        if self.inner.channels.read().contains_key(name) {
            return Err(ForcestreamError::ChannelAlreadyExists(name.to_string()));
        }
        self.ensure_channel(name, ChannelKind::Custom);
        Ok(())
    }

    fn remove_provisioned_channel(&self, fields: &Map<String, Value>) {
        if let Some(name) = fields.get("Name").and_then(Value::as_str) {
            if self.inner.channels.write().remove(name).is_some() {
                info!(channel = name, "channel removed");
            }
        }
    }

    // ------------------------------------------------------------------
    // push topics
    // ------------------------------------------------------------------

    fn provision_topic(&self, fields: &Map<String, Value>) -> Result<()> {
        let name = required_str(fields, "Name")?;
        let query = TopicQuery::parse(required_str(fields, "Query")?)?;
        let mut topics = self.inner.topics.write();
        if topics.contains_key(name) {
            return Err(ForcestreamError::TopicAlreadyExists(name.to_string()));
        }
        let def = TopicDef {
            query,
            notify_create: flag(fields, "NotifyForOperationCreate", true),
            notify_update: flag(fields, "NotifyForOperationUpdate", true),
            notify_delete: flag(fields, "NotifyForOperationDelete", false),
            notify_undelete: flag(fields, "NotifyForOperationUndelete", false),
        };
        info!(topic = name, entity = %def.query.entity, "push topic registered");
        topics.insert(name.to_string(), def);
        drop(topics);
        self.ensure_channel(&topic_channel_name(name), ChannelKind::Topic);
        Ok(())
    }

    fn remove_provisioned_topic(&self, fields: &Map<String, Value>) {
        if let Some(name) = fields.get("Name").and_then(Value::as_str) {
            if self.inner.topics.write().remove(name).is_some() {
                info!(topic = name, "push topic removed");
            }
            self.inner
                .channels
                .write()
                .remove(&topic_channel_name(name));
        }
    }

    fn notify_topics(&self, entity: &str, record: &Map<String, Value>, event_type: EventType) {
        let topics = self.inner.topics.read();
        for (name, def) in topics.iter() {
            if def.query.entity != entity || !def.notifies(event_type) || !def.query.matches(record)
            {
                continue;
            }
            let payload = Value::Object(def.query.project(record));
            if let Ok(channel) = self.channel(&topic_channel_name(name)) {
                let event = channel.publish(payload, Some(event_type));
                debug!(
                    topic = %name,
                    replay_id = event.replay_id,
                    %event_type,
                    "push topic notification"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // change data capture
    // ------------------------------------------------------------------

    fn emit_change(
        &self,
        entity: &str,
        change_type: ChangeType,
        record_id: &str,
        fields: &Map<String, Value>,
    ) {
        let channel = self.ensure_channel(&cdc_channel_name(entity), ChannelKind::ChangeData);
        self.inner.changes.record(
            channel,
            entity,
            change_type,
            record_id.to_string(),
            fields.clone(),
        );
    }

    /// Flush any buffered change events immediately
    pub fn flush_changes(&self) {
        self.inner.changes.flush();
    }
}

impl Default for EmbeddedOrg {
    fn default() -> Self {
        Self::new(OrgConfig::default())
    }
}

fn is_streaming_fixture(sobject_type: &str) -> bool {
    matches!(sobject_type, "StreamingChannel" | "PushTopic")
}

/// Name of the standing CDC channel for an entity
pub fn cdc_channel_name(entity: &str) -> String {
    format!("/data/{entity}ChangeEvent")
}

/// Name of the channel backing a PushTopic
pub fn topic_channel_name(topic: &str) -> String {
    format!("/topic/{topic}")
}

/// Entity watched by a standing CDC channel name, if it is one
fn cdc_entity(channel_name: &str) -> Option<&str> {
    let entity = channel_name
        .strip_prefix("/data/")?
        .strip_suffix("ChangeEvent")?;
    (!entity.is_empty()).then_some(entity)
}

fn required_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ForcestreamError::InvalidRecord(format!("missing field {key}")))
}

fn flag(fields: &Map<String, Value>, key: &str, default: bool) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn matches_filter(record: &Map<String, Value>, filter: &Value) -> Result<bool> {
    let Value::Object(conditions) = filter else {
        return Err(ForcestreamError::InvalidQuery(
            "filter must be an object".to_string(),
        ));
    };
    for (field, expected) in conditions {
        let actual = record.get(field).unwrap_or(&Value::Null);
        let matched = match expected {
            Value::Object(op) => match op.get("$in") {
                Some(Value::Array(options)) => options.contains(actual),
                _ => {
                    return Err(ForcestreamError::InvalidQuery(format!(
                        "unsupported operator in filter on {field}"
                    )))
                }
            },
            _ => actual == expected,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn project(record: &Map<String, Value>, fields: Option<&[&str]>) -> Map<String, Value> {
    match fields {
        None => record.clone(),
        Some(selected) => {
            let mut out = Map::new();
            for field in selected {
                if let Some(value) = record.get(*field) {
                    out.insert((*field).to_string(), value.clone());
                }
            }
            out
        }
    }
}
