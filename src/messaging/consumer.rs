// src/messaging/consumer.rs

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions},
    types::FieldTable,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{MessageError, RelayError, Result};
use crate::messaging::connector::Connector;
use crate::messaging::schema::{decode_message, MessageSchema, QueueSchemas, Schema};
use crate::messaging::topology::{declare_durable_queue, DeadLetterConfig};
use crate::utils::prometheus_metrics::*;

/// Typed receiver of one queue's messages.
///
/// The message type is fixed by the implementation, so the schema a queue
/// is checked against is known before the first delivery arrives.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Message: MessageSchema;

    fn name(&self) -> &'static str;

    async fn handle(&self, message: Self::Message) -> Result<()>;
}

/// A received message that can be acknowledged.
#[async_trait]
pub trait AckableDelivery: Send + Sync {
    fn body(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    async fn acknowledge(&self) -> Result<()>;
}

#[async_trait]
impl AckableDelivery for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    async fn acknowledge(&self) -> Result<()> {
        self.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}

/// What happened to a single delivery before it was acknowledged.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled,
    /// Body could not be decoded or failed the schema; never reached the handler.
    Dropped(MessageError),
    HandlerFailed(RelayError),
}

/// Decodes, validates and hands one body to `handler`. Never fails: every
/// problem is logged and reported in the outcome.
pub async fn dispatch_one<H: MessageHandler>(
    handler: &H,
    schema: &Schema,
    body: &[u8],
) -> DispatchOutcome {
    MESSAGES_CONSUMED_TOTAL.inc();

    let message = match decode_message::<H::Message>(body, schema) {
        Ok(message) => message,
        Err(e @ MessageError::Decode(_)) => {
            MESSAGE_DECODE_ERRORS_TOTAL.inc();
            warn!(error = %e, "Dropping undecodable message");
            return DispatchOutcome::Dropped(e);
        }
        Err(e) => {
            MESSAGE_SCHEMA_ERRORS_TOTAL.inc();
            warn!(
                error = %e,
                payload = %String::from_utf8_lossy(body),
                "Validation error, dropping message"
            );
            return DispatchOutcome::Dropped(e);
        }
    };

    let timer = HANDLER_DURATION_SECONDS.start_timer();
    let result = handler.handle(message).await;
    timer.observe_duration();

    match result {
        Ok(()) => DispatchOutcome::Handled,
        Err(e) => {
            HANDLER_ERRORS_TOTAL.inc();
            error!(handler = handler.name(), error = %e, "Error while processing message");
            DispatchOutcome::HandlerFailed(e)
        }
    }
}

/// Processes deliveries one at a time until the stream fails or ends.
///
/// Every delivery is acknowledged after dispatch, whatever the outcome.
/// A stream error or a failed ack aborts the loop with a transport error;
/// so does the end of the stream, since a live consumer never ends on its own.
pub async fn run_dispatch_loop<H, S, D, E>(
    handler: &H,
    schema: &Schema,
    queue_name: &str,
    mut deliveries: S,
) -> Result<()>
where
    H: MessageHandler,
    S: Stream<Item = std::result::Result<D, E>> + Unpin,
    D: AckableDelivery,
    E: Into<RelayError>,
{
    while let Some(next) = deliveries.next().await {
        let delivery = next.map_err(|e| {
            let err: RelayError = e.into();
            error!(queue = %queue_name, error = %err, "Error receiving message, consumer stopping");
            err
        })?;

        let tag = delivery.delivery_tag();
        let outcome = dispatch_one(handler, schema, delivery.body())
            .instrument(info_span!("dispatch", queue = %queue_name, delivery_tag = tag))
            .await;
        debug!(delivery_tag = tag, outcome = ?outcome, "Message dispatched");

        delivery.acknowledge().await.map_err(|e| {
            error!(delivery_tag = tag, error = %e, "Failed to ack message");
            e
        })?;
    }

    warn!(queue = %queue_name, "Consumer stream ended");
    Err(RelayError::TransportError(format!(
        "consumer stream for '{}' ended",
        queue_name
    )))
}

pub struct Consumer {
    connector: Arc<Connector>,
    schemas: Arc<QueueSchemas>,
    dead_letter: DeadLetterConfig,
}

impl Consumer {
    pub fn new(
        connector: Arc<Connector>,
        schemas: Arc<QueueSchemas>,
        dead_letter: DeadLetterConfig,
    ) -> Self {
        Self {
            connector,
            schemas,
            dead_letter,
        }
    }

    /// Subscribes `handler` to `queue_name` and runs until the broker link
    /// fails. Only returns with an error; the caller decides when to
    /// resubscribe.
    ///
    /// Work queues (`is_dlq == false`) are declared bound to the dead-letter
    /// exchange; the dead-letter queue itself is declared plain.
    pub async fn consume<H: MessageHandler>(
        &self,
        queue_name: &str,
        handler: &H,
        is_dlq: bool,
    ) -> Result<()> {
        let schema = self.schemas.resolve::<H::Message>(queue_name)?;

        let channel = self.connector.get_channel().await?;
        let args = if is_dlq {
            FieldTable::default()
        } else {
            self.dead_letter.declare(&channel).await?;
            self.dead_letter.work_queue_arguments()
        };
        declare_durable_queue(&channel, queue_name, args).await?;

        let consumer_tag = format!(
            "{}-{}-{}",
            handler.name(),
            std::process::id(),
            chrono::Utc::now().timestamp()
        );
        let deliveries = channel
            .basic_consume(
                queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %queue_name,
            handler = handler.name(),
            schema = schema.name,
            %consumer_tag,
            "Consuming queue"
        );
        run_dispatch_loop(handler, &schema, queue_name, deliveries).await
    }
}
