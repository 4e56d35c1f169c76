use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::messaging::schema::{FieldType, MessageSchema};

/// Authenticated user identity. Always positive.
pub type UserId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Pending,
    Success,
    Error,
    Cancelled,
}

impl PromptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Pending => "pending",
            PromptStatus::Success => "success",
            PromptStatus::Error => "error",
            PromptStatus::Cancelled => "cancelled",
        }
    }

    /// Status only ever moves forward out of `pending`.
    pub fn can_transition_to(&self, next: PromptStatus) -> bool {
        matches!(self, PromptStatus::Pending) && !matches!(next, PromptStatus::Pending)
    }
}

impl fmt::Display for PromptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded image and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: Uuid,
    pub user_id: UserId,
    pub prompt_id: String,
    pub raw_key: String,
    pub result_key: Option<String>,
    pub status: PromptStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Published at confirm time; consumed by the inference worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPromptMessage {
    pub id: Uuid,
    pub raw_key: String,
}

/// Published by the inference worker; consumed by the result updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPromptMessage {
    pub id: Uuid,
    pub result_key: String,
}

impl MessageSchema for RawPromptMessage {
    const NAME: &'static str = "RawPromptMessage";

    fn required_fields() -> &'static [(&'static str, FieldType)] {
        &[("id", FieldType::Uuid), ("raw_key", FieldType::String)]
    }
}

impl MessageSchema for ResultPromptMessage {
    const NAME: &'static str = "ResultPromptMessage";

    fn required_fields() -> &'static [(&'static str, FieldType)] {
        &[("id", FieldType::Uuid), ("result_key", FieldType::String)]
    }
}

/// Form returned to the client for a direct upload to object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedPost {
    pub url: String,
    pub fields: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&PromptStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn status_never_moves_backwards() {
        assert!(PromptStatus::Pending.can_transition_to(PromptStatus::Success));
        assert!(PromptStatus::Pending.can_transition_to(PromptStatus::Error));
        assert!(PromptStatus::Pending.can_transition_to(PromptStatus::Cancelled));
        assert!(!PromptStatus::Pending.can_transition_to(PromptStatus::Pending));
        assert!(!PromptStatus::Success.can_transition_to(PromptStatus::Pending));
        assert!(!PromptStatus::Error.can_transition_to(PromptStatus::Success));
    }

    #[test]
    fn raw_message_round_trips() {
        let msg = RawPromptMessage {
            id: Uuid::new_v4(),
            raw_key: "raw/user_42/prompt_abc123".to_string(),
        };
        let body = serde_json::to_vec(&msg).unwrap();
        let decoded: RawPromptMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded, msg);
    }
}
