// AMQP plumbing: connection pool, queue topology, typed publish/consume.

pub mod connector;
pub mod consumer;
pub mod producer;
pub mod schema;
pub mod topology;

pub use connector::{Connector, ConnectorConfig, PooledChannel};
pub use consumer::{Consumer, DispatchOutcome, MessageHandler};
pub use producer::{MessagePublisher, Producer};
pub use schema::{decode_message, encode_message, FieldType, MessageSchema, QueueSchemas, Schema};
pub use topology::DeadLetterConfig;
