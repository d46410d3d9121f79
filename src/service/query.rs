//! Minimal SOQL subset for PushTopic queries
//!
//! PushTopic definitions carry queries of the form
//! `SELECT <fields> FROM <Entity> [WHERE <Field> = '<value>']`, which is the
//! whole subset the streaming suite exercises. Anything else is rejected as
//! an invalid query rather than silently matching nothing.

use serde_json::{Map, Value};

use crate::error::{ForcestreamError, Result};

/// A parsed PushTopic query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQuery {
    /// Selected field names; bounds what a notification carries
    pub fields: Vec<String>,
    /// Entity the query watches, e.g. `Account`
    pub entity: String,
    /// Optional `field = 'value'` equality filter
    pub filter: Option<(String, String)>,
}

impl TopicQuery {
    /// Parse the supported SOQL subset
    pub fn parse(query: &str) -> Result<Self> {
        let invalid = |reason: &str| ForcestreamError::InvalidQuery(format!("{reason}: {query}"));

        let trimmed = query.trim();
        let lower = trimmed.to_ascii_lowercase();
        if !lower.starts_with("select ") {
            return Err(invalid("expected SELECT"));
        }
        let from_pos = lower.find(" from ").ok_or_else(|| invalid("expected FROM"))?;

        let fields: Vec<String> = trimmed["select ".len()..from_pos]
            .split(',')
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .collect();
        if fields.is_empty() {
            return Err(invalid("no fields selected"));
        }

        let rest = trimmed[from_pos + " from ".len()..].trim();
        let rest_lower = rest.to_ascii_lowercase();
        let (entity, filter) = match rest_lower.find(" where ") {
            None => (rest.to_string(), None),
            Some(where_pos) => {
                let entity = rest[..where_pos].trim().to_string();
                let condition = rest[where_pos + " where ".len()..].trim();
                (entity, Some(Self::parse_condition(condition, invalid)?))
            }
        };
        if entity.is_empty() || entity.contains(char::is_whitespace) {
            return Err(invalid("bad entity name"));
        }

        Ok(TopicQuery {
            fields,
            entity,
            filter,
        })
    }

    fn parse_condition(
        condition: &str,
        invalid: impl Fn(&str) -> ForcestreamError,
    ) -> Result<(String, String)> {
        let (field, value) = condition
            .split_once('=')
            .ok_or_else(|| invalid("expected equality condition"))?;
        let field = field.trim();
        let value = value.trim();
        if field.is_empty() || field.contains(char::is_whitespace) {
            return Err(invalid("bad filter field"));
        }
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .ok_or_else(|| invalid("filter value must be single-quoted"))?;
        Ok((field.to_string(), value.to_string()))
    }

    /// Does a record satisfy this query's filter?
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        match &self.filter {
            None => true,
            Some((field, expected)) => record
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|actual| actual == expected),
        }
    }

    /// Project a record down to the selected fields, always keeping `Id`
    pub fn project(&self, record: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in &self.fields {
            if let Some(value) = record.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
        if let Some(id) = record.get("Id") {
            out.insert("Id".to_string(), id.clone());
        }
        out
    }
}
