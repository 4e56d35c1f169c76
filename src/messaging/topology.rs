// src/messaging/topology.rs

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::error::{RelayError, Result};

pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// Where rejected or expired messages end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterConfig {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl DeadLetterConfig {
    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self {
            exchange: config.dlx_exchange.clone(),
            queue: config.dlq_name.clone(),
            routing_key: config.dlq_routing_key.clone(),
        }
    }

    /// Queue arguments binding a work queue to the dead-letter exchange.
    pub fn work_queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            DEAD_LETTER_EXCHANGE_ARG.into(),
            AMQPValue::LongString(self.exchange.as_str().into()),
        );
        args.insert(
            DEAD_LETTER_ROUTING_KEY_ARG.into(),
            AMQPValue::LongString(self.routing_key.as_str().into()),
        );
        args
    }

    /// Declares the direct dead-letter exchange and its queue and binds them.
    /// Safe to repeat; every declaration is idempotent on the broker.
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RelayError::TransportError(format!(
                    "failed to declare dead-letter exchange '{}': {}",
                    self.exchange, e
                ))
            })?;

        declare_durable_queue(channel, &self.queue, FieldTable::default()).await?;

        channel
            .queue_bind(
                &self.queue,
                &self.exchange,
                &self.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                RelayError::TransportError(format!(
                    "failed to bind dead-letter queue '{}': {}",
                    self.queue, e
                ))
            })?;

        info!(
            exchange = %self.exchange,
            queue = %self.queue,
            routing_key = %self.routing_key,
            "Dead-letter topology declared"
        );
        Ok(())
    }
}

/// Declares `name` as a durable queue. Redeclaring with identical arguments
/// is a no-op on the broker.
pub async fn declare_durable_queue(channel: &Channel, name: &str, args: FieldTable) -> Result<()> {
    let queue = channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|e| {
            RelayError::TransportError(format!("failed to declare queue '{}': {}", name, e))
        })?;
    debug!(
        queue = %name,
        messages = queue.message_count(),
        consumers = queue.consumer_count(),
        "Queue declared"
    );
    Ok(())
}
