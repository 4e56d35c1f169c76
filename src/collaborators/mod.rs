// Interfaces to the systems around the messaging core: persistence and
// object storage. Production deployments plug real clients in behind these.

use async_trait::async_trait;
use uuid::Uuid;

use crate::data_model::{PresignedPost, Prompt, PromptStatus, UserId};
use crate::error::{RepositoryError, Result};

pub mod memory;

pub use memory::{InMemoryObjectStore, InMemoryPromptRepository};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload form for a fresh raw key owned by `user_id`.
    async fn presign_upload(&self, user_id: UserId) -> Result<PresignedPost>;

    async fn object_exists(&self, key: &str) -> Result<bool>;
}

#[async_trait]
pub trait PromptRepository: Send + Sync {
    /// Inserts a `pending` prompt. Fails with
    /// [`RepositoryError::UniqueViolation`] when `(user_id, prompt_id)` exists.
    async fn create(
        &self,
        user_id: UserId,
        prompt_id: &str,
        raw_key: &str,
    ) -> std::result::Result<Prompt, RepositoryError>;

    /// Fails with [`RepositoryError::EmptyResult`] for unknown ids and
    /// [`RepositoryError::InvalidStatusTransition`] when the prompt already
    /// left `pending`.
    async fn update_status(
        &self,
        id: Uuid,
        result_key: &str,
        status: PromptStatus,
    ) -> std::result::Result<Prompt, RepositoryError>;

    async fn get(&self, id: Uuid) -> std::result::Result<Prompt, RepositoryError>;
}
