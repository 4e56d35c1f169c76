// src/services/prompt.rs

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::{ObjectStore, PromptRepository};
use crate::data_model::{
    PresignedPost, Prompt, PromptStatus, RawPromptMessage, ResultPromptMessage, UserId,
};
use crate::error::{RelayError, RepositoryError, Result};
use crate::messaging::consumer::MessageHandler;
use crate::messaging::producer::MessagePublisher;
use crate::messaging::schema::encode_message;
use crate::notifications::NotificationRegistry;
use crate::path_strategy::{parse_path, PromptObjectType};

/// Confirm and completion phases of the prompt pipeline.
pub struct PromptService {
    object_store: Arc<dyn ObjectStore>,
    repository: Arc<dyn PromptRepository>,
    publisher: Arc<dyn MessagePublisher>,
    notifications: Arc<NotificationRegistry>,
    raw_queue_name: String,
}

impl PromptService {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        repository: Arc<dyn PromptRepository>,
        publisher: Arc<dyn MessagePublisher>,
        notifications: Arc<NotificationRegistry>,
        raw_queue_name: impl Into<String>,
    ) -> Self {
        Self {
            object_store,
            repository,
            publisher,
            notifications,
            raw_queue_name: raw_queue_name.into(),
        }
    }

    pub async fn generate_presigned_post(&self, user_id: UserId) -> Result<PresignedPost> {
        self.object_store.presign_upload(user_id).await
    }

    /// Registers an uploaded raw image and queues it for inference.
    ///
    /// The row is written before the publish. If the publish fails the row
    /// stays `pending` and [`RelayError::CannotProcessPrompt`] is returned;
    /// nothing compensates the insert.
    #[instrument(skip(self))]
    pub async fn confirm_prompt(&self, key_path: &str, user_id: UserId) -> Result<Prompt> {
        let link = parse_path(key_path).ok_or(RelayError::InvalidPromptPath)?;
        if link.object_type != PromptObjectType::Raw || link.user_id != user_id {
            return Err(RelayError::InvalidPromptPath);
        }

        if !self.object_store.object_exists(&link.key_path).await? {
            return Err(RelayError::RawPromptNotFound);
        }

        let prompt = self
            .repository
            .create(link.user_id, &link.prompt_id, &link.key_path)
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueViolation(_) => RelayError::RawPromptAlreadyExists,
                other => RelayError::from(other),
            })?;

        let message = RawPromptMessage {
            id: prompt.id,
            raw_key: prompt.raw_key.clone(),
        };
        let body = encode_message(&message)?;
        if let Err(e) = self.publisher.publish(&self.raw_queue_name, body).await {
            error!(
                prompt = %prompt.id,
                error = %e,
                "Prompt stored but raw message was not published"
            );
            return Err(RelayError::CannotProcessPrompt);
        }

        info!(prompt = %prompt.id, raw_key = %prompt.raw_key, "Prompt confirmed");
        Ok(prompt)
    }

    /// Applies a worker result and notifies the owner if they are online.
    ///
    /// Returns the updated prompt, or `None` when the message referred to an
    /// unknown prompt or one that already left `pending` (a redelivery).
    #[instrument(skip(self, message), fields(prompt = %message.id))]
    pub async fn handle_result(&self, message: ResultPromptMessage) -> Result<Option<Prompt>> {
        let prompt = match self
            .repository
            .update_status(message.id, &message.result_key, PromptStatus::Success)
            .await
        {
            Ok(prompt) => prompt,
            Err(RepositoryError::EmptyResult(reason)) => {
                warn!(%reason, "Result for unknown prompt, skipping");
                return Ok(None);
            }
            Err(e @ RepositoryError::InvalidStatusTransition { .. }) => {
                warn!(error = %e, "Result for an already finished prompt, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if self.notifications.is_connected(prompt.user_id).await {
            let delivered = self.notifications.send_json(prompt.user_id, &prompt).await?;
            debug!(user_id = prompt.user_id, delivered, "Result pushed to user");
        } else {
            debug!(user_id = prompt.user_id, "User offline, result stored only");
        }
        Ok(Some(prompt))
    }
}

/// Feeds the result queue into [`PromptService::handle_result`].
pub struct PromptResultHandler {
    service: Arc<PromptService>,
}

impl PromptResultHandler {
    pub fn new(service: Arc<PromptService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for PromptResultHandler {
    type Message = ResultPromptMessage;

    fn name(&self) -> &'static str {
        "prompt-results"
    }

    async fn handle(&self, message: ResultPromptMessage) -> Result<()> {
        self.service.handle_result(message).await.map(|_| ())
    }
}
