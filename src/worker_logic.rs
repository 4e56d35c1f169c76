// src/worker_logic.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, instrument};

use crate::data_model::{RawPromptMessage, ResultPromptMessage};
use crate::error::{RelayError, Result};
use crate::executor::{InferenceExecutor, InferenceTask};
use crate::messaging::consumer::{Consumer, MessageHandler};
use crate::messaging::producer::MessagePublisher;
use crate::messaging::schema::encode_message;
use crate::path_strategy::{parse_path, result_link_for, PromptObjectType};
use crate::utils::prometheus_metrics::CONSUMER_RESUBSCRIBES_TOTAL;

/// Keeps `handler` subscribed to `queue_name` forever.
///
/// Every time the consume loop aborts (broker down, channel closed, stream
/// ended) the error is logged and the subscription is retried after `delay`.
/// Cancel by dropping the future, e.g. from a `tokio::select!` on shutdown.
pub async fn run_consumer_loop<H: MessageHandler>(
    consumer: &Consumer,
    queue_name: &str,
    handler: &H,
    is_dlq: bool,
    delay: Duration,
) {
    loop {
        match consumer.consume(queue_name, handler, is_dlq).await {
            Ok(()) => info!(queue = %queue_name, "Consumer finished"),
            Err(e) => error!(queue = %queue_name, error = %e, "Consumer aborted"),
        }
        CONSUMER_RESUBSCRIBES_TOTAL.inc();
        info!(queue = %queue_name, "Resubscribing in {:?}", delay);
        sleep(delay).await;
    }
}

/// Worker side of the pipeline: raw prompt in, result message out.
pub struct RawPromptHandler {
    executor: Arc<InferenceExecutor>,
    publisher: Arc<dyn MessagePublisher>,
    results_queue: String,
}

impl RawPromptHandler {
    pub fn new(
        executor: Arc<InferenceExecutor>,
        publisher: Arc<dyn MessagePublisher>,
        results_queue: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            publisher,
            results_queue: results_queue.into(),
        }
    }

    /// Runs inference for one raw prompt and returns the result message that
    /// was published.
    #[instrument(skip(self, message), fields(prompt = %message.id, raw_key = %message.raw_key))]
    pub async fn process(&self, message: RawPromptMessage) -> Result<ResultPromptMessage> {
        let raw = parse_path(&message.raw_key)
            .filter(|link| link.object_type == PromptObjectType::Raw)
            .ok_or(RelayError::InvalidPromptPath)?;
        let task = InferenceTask {
            result: result_link_for(&raw),
            raw,
        };

        self.executor.run(&task).await?;

        let result = ResultPromptMessage {
            id: message.id,
            result_key: task.result.key_path,
        };
        self.publisher
            .publish(&self.results_queue, encode_message(&result)?)
            .await?;
        info!(result_key = %result.result_key, "Result published");
        Ok(result)
    }
}

#[async_trait]
impl MessageHandler for RawPromptHandler {
    type Message = RawPromptMessage;

    fn name(&self) -> &'static str {
        "raw-prompts"
    }

    async fn handle(&self, message: RawPromptMessage) -> Result<()> {
        self.process(message).await.map(|_| ())
    }
}
