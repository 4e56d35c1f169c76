// In-memory collaborators for local runs and tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ObjectStore, PromptRepository};
use crate::data_model::{PresignedPost, Prompt, PromptStatus, UserId};
use crate::error::{RepositoryError, Result};
use crate::path_strategy::new_raw_link;

/// Smallest and largest accepted upload, in bytes.
pub const MIN_UPLOAD_BYTES: u64 = 1024;
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const PRESIGN_EXPIRES_SECS: u64 = 600;

#[derive(Default)]
pub struct InMemoryPromptRepository {
    prompts: RwLock<HashMap<Uuid, Prompt>>,
}

impl InMemoryPromptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.prompts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prompts.read().await.is_empty()
    }
}

#[async_trait]
impl PromptRepository for InMemoryPromptRepository {
    async fn create(
        &self,
        user_id: UserId,
        prompt_id: &str,
        raw_key: &str,
    ) -> std::result::Result<Prompt, RepositoryError> {
        let mut prompts = self.prompts.write().await;
        if prompts
            .values()
            .any(|p| p.user_id == user_id && p.prompt_id == prompt_id)
        {
            return Err(RepositoryError::UniqueViolation(format!(
                "prompt ({}, {}) already exists",
                user_id, prompt_id
            )));
        }

        let now = Utc::now();
        let prompt = Prompt {
            id: Uuid::new_v4(),
            user_id,
            prompt_id: prompt_id.to_string(),
            raw_key: raw_key.to_string(),
            result_key: None,
            status: PromptStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        prompts.insert(prompt.id, prompt.clone());
        Ok(prompt)
    }

    async fn update_status(
        &self,
        id: Uuid,
        result_key: &str,
        status: PromptStatus,
    ) -> std::result::Result<Prompt, RepositoryError> {
        let mut prompts = self.prompts.write().await;
        let prompt = prompts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::EmptyResult(format!("prompt {}", id)))?;

        if !prompt.status.can_transition_to(status) {
            return Err(RepositoryError::InvalidStatusTransition {
                id,
                from: prompt.status.to_string(),
                to: status.to_string(),
            });
        }

        prompt.status = status;
        prompt.result_key = Some(result_key.to_string());
        prompt.updated_at = Utc::now();
        Ok(prompt.clone())
    }

    async fn get(&self, id: Uuid) -> std::result::Result<Prompt, RepositoryError> {
        self.prompts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::EmptyResult(format!("prompt {}", id)))
    }
}

/// Object store that only remembers which keys were uploaded.
pub struct InMemoryObjectStore {
    base_url: String,
    objects: RwLock<HashSet<String>>,
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashSet::new()),
        }
    }

    /// Records an upload, as the storage service would after a client POST.
    pub async fn put_object(&self, key: impl Into<String>) {
        self.objects.write().await.insert(key.into());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn presign_upload(&self, user_id: UserId) -> Result<PresignedPost> {
        let link = new_raw_link(user_id);
        let mut fields = BTreeMap::new();
        fields.insert("Content-Type".to_string(), "image/".to_string());
        fields.insert("key".to_string(), link.key_path.clone());
        fields.insert("key-starts-with".to_string(), link.key_starts_with.clone());
        fields.insert(
            "content-length-range".to_string(),
            format!("{},{}", MIN_UPLOAD_BYTES, MAX_UPLOAD_BYTES),
        );
        fields.insert("expires-in".to_string(), PRESIGN_EXPIRES_SECS.to_string());
        Ok(PresignedPost {
            url: self.base_url.clone(),
            fields,
        })
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_user_prompt_is_a_unique_violation() {
        let repo = InMemoryPromptRepository::new();
        repo.create(42, "abc123", "raw/user_42/prompt_abc123").await.unwrap();
        let err = repo
            .create(42, "abc123", "raw/user_42/prompt_abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueViolation(_)));

        // Same prompt id under another user is a different row.
        assert!(repo.create(43, "abc123", "raw/user_43/prompt_abc123").await.is_ok());
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn status_cannot_be_reversed() {
        let repo = InMemoryPromptRepository::new();
        let prompt = repo.create(1, "aaaaaa", "raw/user_1/prompt_aaaaaa").await.unwrap();

        let updated = repo
            .update_status(prompt.id, "results/user_1/prompt_aaaaaa", PromptStatus::Success)
            .await
            .unwrap();
        assert_eq!(updated.status, PromptStatus::Success);
        assert_eq!(updated.result_key.as_deref(), Some("results/user_1/prompt_aaaaaa"));

        let err = repo
            .update_status(prompt.id, "results/user_1/prompt_aaaaaa", PromptStatus::Error)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_id_is_empty_result() {
        let repo = InMemoryPromptRepository::new();
        let err = repo
            .update_status(Uuid::new_v4(), "results/user_1/prompt_x", PromptStatus::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::EmptyResult(_)));
    }

    #[tokio::test]
    async fn presigned_form_pins_key_to_user_prefix() {
        let store = InMemoryObjectStore::new("http://storage.local/user-prompts");
        let post = store.presign_upload(9).await.unwrap();
        assert_eq!(post.url, "http://storage.local/user-prompts");
        assert!(post.fields["key"].starts_with("raw/user_9/prompt_"));
        assert_eq!(post.fields["key-starts-with"], "raw/user_9");
        assert!(!store.object_exists(&post.fields["key"]).await.unwrap());
    }
}
