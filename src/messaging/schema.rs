// src/messaging/schema.rs

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{MessageError, RelayError, Result};

/// JSON type a required message field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    /// A string that parses as a UUID.
    Uuid,
    Integer,
    Bool,
}

impl FieldType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Uuid => value
                .as_str()
                .map(|s| Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Uuid => "uuid string",
            FieldType::Integer => "integer",
            FieldType::Bool => "bool",
        }
    }
}

/// A wire message with a statically known field set.
pub trait MessageSchema: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    fn required_fields() -> &'static [(&'static str, FieldType)];
}

/// Field requirements captured once when a consumer subscribes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [(&'static str, FieldType)],
}

impl Schema {
    pub fn of<M: MessageSchema>() -> Self {
        Self {
            name: M::NAME,
            fields: M::required_fields(),
        }
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(name, _)| *name).collect()
    }

    fn mismatch(&self, reason: String) -> MessageError {
        MessageError::Schema {
            schema: self.name,
            reason,
            expected: self.field_names(),
        }
    }

    /// Checks presence and JSON type of every required field.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), MessageError> {
        let object = value
            .as_object()
            .ok_or_else(|| self.mismatch("body is not a JSON object".to_string()))?;

        for (field, kind) in self.fields {
            match object.get(*field) {
                None => return Err(self.mismatch(format!("missing field '{}'", field))),
                Some(v) if !kind.matches(v) => {
                    return Err(self.mismatch(format!(
                        "field '{}' must be a {}",
                        field,
                        kind.describe()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Decodes a delivery body: UTF-8, then JSON, then schema, then typed value.
pub fn decode_message<M: MessageSchema>(
    body: &[u8],
    schema: &Schema,
) -> std::result::Result<M, MessageError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| MessageError::Decode(format!("body is not UTF-8: {}", e)))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| MessageError::Decode(format!("{}. Message: {}", e, text)))?;

    schema.validate(&value)?;

    serde_json::from_value(value).map_err(|e| schema.mismatch(e.to_string()))
}

/// Canonical JSON encoding used for every published message.
pub fn encode_message<M: Serialize>(message: &M) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Explicit map from queue name to the message schema it carries.
///
/// Consumers look their queue up here at subscribe time, so a handler wired
/// to the wrong queue fails before any message is taken.
#[derive(Debug, Clone, Default)]
pub struct QueueSchemas {
    schemas: HashMap<String, Schema>,
}

impl QueueSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: MessageSchema>(mut self, queue_name: impl Into<String>) -> Self {
        self.schemas.insert(queue_name.into(), Schema::of::<M>());
        self
    }

    pub fn get(&self, queue_name: &str) -> Option<&Schema> {
        self.schemas.get(queue_name)
    }

    /// Returns the schema registered for `queue_name`, checking it is the
    /// one the handler expects.
    pub fn resolve<M: MessageSchema>(&self, queue_name: &str) -> Result<Schema> {
        match self.schemas.get(queue_name) {
            Some(schema) if schema.name == M::NAME => Ok(schema.clone()),
            Some(schema) => Err(RelayError::ConfigError(format!(
                "Queue '{}' carries '{}' but handler expects '{}'",
                queue_name,
                schema.name,
                M::NAME
            ))),
            None => Err(RelayError::ConfigError(format!(
                "No message schema registered for queue '{}'",
                queue_name
            ))),
        }
    }
}
