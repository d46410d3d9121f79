//! sobject CRUD facade
//!
//! The slice of the record API the streaming suite consumes: create, filtered
//! find with optional field projection, find-one-and-delete, and bulk
//! destroy. Creating `StreamingChannel` or `PushTopic` records provisions the
//! corresponding streaming fixture on the org; other record mutations feed
//! matching PushTopics and the entity's change data capture channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Connection;
use crate::error::Result;

/// Outcome of creating a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResult {
    pub success: bool,
    pub id: String,
}

/// CRUD access to one sobject type, obtained from [`Connection::sobject`]
pub struct SObjectCollection {
    conn: Connection,
    sobject_type: String,
}

impl SObjectCollection {
    pub(crate) fn new(conn: Connection, sobject_type: String) -> Self {
        Self { conn, sobject_type }
    }

    /// Create a record from a JSON object of fields
    pub async fn create(&self, fields: Value) -> Result<SaveResult> {
        self.conn.require_session()?;
        self.conn.org().create_record(&self.sobject_type, fields)
    }

    /// Update an existing record's fields
    pub async fn update(&self, id: &str, fields: Value) -> Result<()> {
        self.conn.require_session()?;
        self.conn.org().update_record(&self.sobject_type, id, fields)
    }

    /// Find records matching `filter`, projected to `fields` (empty slice
    /// returns whole records). Filters support equality and `{"$in": [...]}`.
    pub async fn find(&self, filter: Value, fields: &[&str]) -> Result<Vec<Value>> {
        self.conn.require_session()?;
        let projection = (!fields.is_empty()).then_some(fields);
        self.conn.org().find(&self.sobject_type, &filter, projection)
    }

    /// First record matching `filter`, as a deletable reference
    pub async fn find_one(&self, filter: Value) -> Result<Option<RecordRef>> {
        self.conn.require_session()?;
        let mut found = self.conn.org().find(&self.sobject_type, &filter, None)?;
        if found.is_empty() {
            return Ok(None);
        }
        let record = found.remove(0);
        let id = record
            .get("Id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Some(RecordRef {
            conn: self.conn.clone(),
            sobject_type: self.sobject_type.clone(),
            id,
            fields: record,
        }))
    }

    /// Bulk delete by id. Deleting nothing is an error: leaked fixtures must
    /// surface.
    pub async fn destroy(&self, ids: &[String]) -> Result<usize> {
        self.conn.require_session()?;
        self.conn.org().destroy(&self.sobject_type, ids)
    }
}

/// A found record that can be deleted in place
pub struct RecordRef {
    conn: Connection,
    sobject_type: String,
    /// Record id
    pub id: String,
    /// The record's fields as found
    pub fields: Value,
}

impl RecordRef {
    /// Delete this record
    pub async fn delete(self) -> Result<()> {
        self.conn.org().delete_record(&self.sobject_type, &self.id)
    }
}
