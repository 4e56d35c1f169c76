// src/path_strategy.rs

//! Object-key layout for prompt images: `{object_type}/user_{user_id}/prompt_{prompt_id}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data_model::UserId;

/// Length of the random suffix identifying one upload.
pub const PROMPT_ID_LEN: usize = 6;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(raw|results)/user_([1-9][0-9]*)/prompt_([A-Za-z0-9]+)$")
        .unwrap_or_else(|e| panic!("invalid prompt key pattern: {}", e))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptObjectType {
    Raw,
    #[serde(rename = "results")]
    Result,
}

impl PromptObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptObjectType::Raw => "raw",
            PromptObjectType::Result => "results",
        }
    }
}

/// A parsed or freshly generated object key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptLink {
    pub object_type: PromptObjectType,
    pub user_id: UserId,
    pub prompt_id: String,
    pub key_path: String,
    /// `key_path` without its last segment; upload policies pin keys to it.
    pub key_starts_with: String,
}

pub fn generate_path(object_type: PromptObjectType, user_id: UserId, prompt_id: &str) -> PromptLink {
    let key_starts_with = format!("{}/user_{}", object_type.as_str(), user_id);
    let key_path = format!("{}/prompt_{}", key_starts_with, prompt_id);
    PromptLink {
        object_type,
        user_id,
        prompt_id: prompt_id.to_string(),
        key_path,
        key_starts_with,
    }
}

/// Key for a new upload by `user_id`, with a random prompt id.
pub fn new_raw_link(user_id: UserId) -> PromptLink {
    let prompt_id: String = Uuid::new_v4().simple().to_string()[..PROMPT_ID_LEN].to_string();
    generate_path(PromptObjectType::Raw, user_id, &prompt_id)
}

/// Where the worker stores the processed image for `raw`.
pub fn result_link_for(raw: &PromptLink) -> PromptLink {
    generate_path(PromptObjectType::Result, raw.user_id, &raw.prompt_id)
}

/// Parses a key; `None` for anything not matching the layout exactly.
pub fn parse_path(path: &str) -> Option<PromptLink> {
    let caps = KEY_PATTERN.captures(path)?;
    let object_type = match &caps[1] {
        "raw" => PromptObjectType::Raw,
        _ => PromptObjectType::Result,
    };
    let user_id: UserId = caps[2].parse().ok()?;
    Some(generate_path(object_type, user_id, &caps[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_key() {
        let link = parse_path("raw/user_42/prompt_abc123").unwrap();
        assert_eq!(link.object_type, PromptObjectType::Raw);
        assert_eq!(link.user_id, 42);
        assert_eq!(link.prompt_id, "abc123");
        assert_eq!(link.key_starts_with, "raw/user_42");
        assert_eq!(link.key_path, "raw/user_42/prompt_abc123");
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in [
            "",
            "raw/user_42",
            "raw/user_0/prompt_abc",
            "raw/user_-1/prompt_abc",
            "thumbs/user_42/prompt_abc",
            "raw/user_42/prompt_abc/extra",
            "/raw/user_42/prompt_abc",
            "raw/user_42/prompt_",
            "raw/user_99999999999999999999999/prompt_abc",
        ] {
            assert!(parse_path(bad).is_none(), "{} should not parse", bad);
        }
    }

    #[test]
    fn result_link_mirrors_raw_link() {
        let raw = parse_path("raw/user_42/prompt_abc123").unwrap();
        let result = result_link_for(&raw);
        assert_eq!(result.key_path, "results/user_42/prompt_abc123");
        assert_eq!(result.object_type, PromptObjectType::Result);
    }

    #[test]
    fn new_raw_links_parse_back() {
        let link = new_raw_link(7);
        assert_eq!(link.prompt_id.len(), PROMPT_ID_LEN);
        assert_eq!(parse_path(&link.key_path), Some(link));
    }
}
