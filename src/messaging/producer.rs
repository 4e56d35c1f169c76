// src/messaging/producer.rs

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{options::BasicPublishOptions, protocol::basic::AMQPProperties, types::FieldTable};
use tracing::{debug, error, instrument};

use crate::error::{RelayError, Result};
use crate::messaging::connector::Connector;
use crate::messaging::topology::{declare_durable_queue, DeadLetterConfig};
use crate::utils::prometheus_metrics::{MESSAGES_PUBLISHED_TOTAL, MESSAGE_PUBLISH_ERRORS_TOTAL};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Anything that can durably hand an encoded message to a named queue.
///
/// The broker-backed [`Producer`] is the production implementation; tests
/// swap in recorders.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, queue_name: &str, body: Vec<u8>) -> Result<()>;
}

pub struct Producer {
    connector: Arc<Connector>,
    dead_letter: Option<DeadLetterConfig>,
}

impl Producer {
    /// `dead_letter` must match what consumers of the same queues declare,
    /// otherwise the broker refuses the second declaration.
    pub fn new(connector: Arc<Connector>, dead_letter: Option<DeadLetterConfig>) -> Self {
        Self {
            connector,
            dead_letter,
        }
    }

    fn properties() -> AMQPProperties {
        AMQPProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type(JSON_CONTENT_TYPE.into())
    }
}

#[async_trait]
impl MessagePublisher for Producer {
    /// Declares the queue, publishes persistently and waits for the broker
    /// confirmation. No retry here; the caller owns the retry policy.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    async fn publish(&self, queue_name: &str, body: Vec<u8>) -> Result<()> {
        let result = async {
            let channel = self.connector.get_channel().await?;
            let args = self
                .dead_letter
                .as_ref()
                .map(DeadLetterConfig::work_queue_arguments)
                .unwrap_or_else(FieldTable::default);
            declare_durable_queue(&channel, queue_name, args).await?;

            let confirmation = channel
                .basic_publish(
                    "",
                    queue_name,
                    BasicPublishOptions::default(),
                    &body,
                    Self::properties(),
                )
                .await?
                .await?;
            if confirmation.is_nack() {
                return Err(RelayError::TransportError(format!(
                    "broker rejected publish to '{}'",
                    queue_name
                )));
            }
            Ok::<(), RelayError>(())
        }
        .await;

        match result {
            Ok(()) => {
                MESSAGES_PUBLISHED_TOTAL.inc();
                debug!(queue = %queue_name, "Published message");
                Ok(())
            }
            Err(e) => {
                MESSAGE_PUBLISH_ERRORS_TOTAL.inc();
                error!(queue = %queue_name, error = %e, "Publication error");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_persistent_json() {
        let props = Producer::properties();
        assert_eq!(props.delivery_mode(), &Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(
            props.content_type().as_ref().map(|ct| ct.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
    }
}
