// src/utils/prometheus_metrics.rs

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};

// Broker connection
pub static BROKER_CONNECT_ATTEMPTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_broker_connect_attempts_total",
        "Total number of attempts to open the broker connection."
    )
    .expect("Failed to register BROKER_CONNECT_ATTEMPTS_TOTAL counter")
});

pub static BROKER_CONNECT_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_broker_connect_failures_total",
        "Total number of times all connection attempts were exhausted."
    )
    .expect("Failed to register BROKER_CONNECT_FAILURES_TOTAL counter")
});

// Producer
pub static MESSAGES_PUBLISHED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_messages_published_total",
        "Total number of messages published and confirmed by the broker."
    )
    .expect("Failed to register MESSAGES_PUBLISHED_TOTAL counter")
});

pub static MESSAGE_PUBLISH_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_message_publish_errors_total",
        "Total number of failed publishes (declare, transport, broker nack)."
    )
    .expect("Failed to register MESSAGE_PUBLISH_ERRORS_TOTAL counter")
});

// Consumer
pub static MESSAGES_CONSUMED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_messages_consumed_total",
        "Total number of deliveries taken from any queue."
    )
    .expect("Failed to register MESSAGES_CONSUMED_TOTAL counter")
});

pub static MESSAGE_DECODE_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_message_decode_errors_total",
        "Total number of deliveries dropped because the body was not UTF-8 JSON."
    )
    .expect("Failed to register MESSAGE_DECODE_ERRORS_TOTAL counter")
});

pub static MESSAGE_SCHEMA_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_message_schema_errors_total",
        "Total number of deliveries dropped because they did not match the queue schema."
    )
    .expect("Failed to register MESSAGE_SCHEMA_ERRORS_TOTAL counter")
});

pub static HANDLER_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_handler_errors_total",
        "Total number of messages whose handler failed (message still acknowledged)."
    )
    .expect("Failed to register HANDLER_ERRORS_TOTAL counter")
});

pub static HANDLER_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "relay_handler_duration_seconds",
        "Time spent inside message handlers.",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .expect("Failed to register HANDLER_DURATION_SECONDS histogram")
});

pub static CONSUMER_RESUBSCRIBES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_consumer_resubscribes_total",
        "Total number of times a consume loop aborted and was restarted."
    )
    .expect("Failed to register CONSUMER_RESUBSCRIBES_TOTAL counter")
});

// Push notifications
pub static ACTIVE_PUSH_CONNECTIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "relay_active_push_connections",
        "Number of registered push connections."
    )
    .expect("Failed to register ACTIVE_PUSH_CONNECTIONS gauge")
});

pub static NOTIFICATIONS_SENT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_notifications_sent_total",
        "Total number of payloads delivered to push connections."
    )
    .expect("Failed to register NOTIFICATIONS_SENT_TOTAL counter")
});

pub static NOTIFICATION_DELIVERY_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_notification_delivery_failures_total",
        "Total number of push sends that failed and evicted their connection."
    )
    .expect("Failed to register NOTIFICATION_DELIVERY_FAILURES_TOTAL counter")
});
