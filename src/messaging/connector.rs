// src/messaging/connector.rs

//! Broker connection ownership.
//!
//! A [`Connector`] holds the single AMQP connection of the process and a
//! bounded pool of channels on top of it. Producers and consumers borrow a
//! channel with [`Connector::get_channel`]; the borrow is returned to the pool
//! when the [`PooledChannel`] guard drops. At most `pool_size` channels are
//! lent out at once, further callers wait for a slot.

use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use lapin::{
    options::{BasicQosOptions, ConfirmSelectOptions},
    uri::AMQPUri,
    Channel, Connection, ConnectionProperties,
};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BrokerConfig;
use crate::error::{RelayError, Result};
use crate::utils::prometheus_metrics::{BROKER_CONNECT_ATTEMPTS_TOTAL, BROKER_CONNECT_FAILURES_TOTAL};

/// Messages a channel may hold unacknowledged. One keeps every consumer
/// strictly sequential and bounds in-flight work.
pub const PREFETCH_COUNT: u16 = 1;

/// Settings the connector needs out of [`BrokerConfig`].
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub amqp_addr: String,
    pub heartbeat: u16,
    pub pool_size: usize,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl From<&BrokerConfig> for ConnectorConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            amqp_addr: config.amqp_addr.clone(),
            heartbeat: config.heartbeat,
            pool_size: config.pool_size,
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// Runs `attempt` up to `max_attempts` times, sleeping `delay` between
/// failures. Returns the last error once attempts are exhausted.
pub async fn retry_with_fixed_backoff<T, E, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    mut attempt: F,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(attempts).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                error!(
                    attempt = attempts,
                    max_attempts,
                    error = %e,
                    "Connection attempt failed"
                );
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!("Retrying after {:?}...", delay);
                sleep(delay).await;
            }
        }
    }
}

type IdleChannels = Arc<StdMutex<Vec<Channel>>>;

pub struct Connector {
    config: ConnectorConfig,
    connection: Mutex<Option<Connection>>,
    idle: IdleChannels,
    slots: Arc<Semaphore>,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        let pool_size = config.pool_size.max(1);
        Self {
            config,
            connection: Mutex::new(None),
            idle: Arc::new(StdMutex::new(Vec::with_capacity(pool_size))),
            slots: Arc::new(Semaphore::new(pool_size)),
        }
    }

    pub fn from_broker_config(config: &BrokerConfig) -> Self {
        Self::new(ConnectorConfig::from(config))
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn connection_uri(&self) -> Result<AMQPUri> {
        let mut uri: AMQPUri = self.config.amqp_addr.parse().map_err(|e: String| {
            RelayError::ConfigError(format!("Invalid AMQP address: {}", e))
        })?;
        uri.query.heartbeat = Some(self.config.heartbeat);
        Ok(uri)
    }

    /// Opens the connection unless an open one exists.
    ///
    /// Tries `max_reconnect_attempts` times with a fixed delay; the final
    /// failure is returned as a transport error.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.status().connected() {
                return Ok(());
            }
            debug!("Existing broker connection is closed, reconnecting");
        }

        let uri = self.connection_uri()?;
        let conn = retry_with_fixed_backoff(
            self.config.max_reconnect_attempts,
            self.config.reconnect_delay,
            |_| {
                BROKER_CONNECT_ATTEMPTS_TOTAL.inc();
                let options = ConnectionProperties::default()
                    .with_executor(tokio_executor_trait::Tokio::current())
                    .with_reactor(tokio_reactor_trait::Tokio);
                Connection::connect_uri(uri.clone(), options)
            },
        )
        .await
        .map_err(|e| {
            BROKER_CONNECT_FAILURES_TOTAL.inc();
            error!(error = %e, "Couldn't connect to RabbitMQ server");
            RelayError::from(e)
        })?;

        info!("Successfully connected to RabbitMQ");
        // Channels of a previous connection are dead along with it.
        self.lock_idle().clear();
        *guard = Some(conn);
        Ok(())
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Channel>> {
        // A poisoned pool only ever holds channels; keep using it.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn open_channel(&self) -> Result<Channel> {
        self.connect().await?;
        let guard = self.connection.lock().await;
        let conn = guard.as_ref().ok_or_else(|| {
            RelayError::TransportError("connection vanished while opening channel".to_string())
        })?;
        let channel = conn.create_channel().await?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        debug!(channel_id = channel.id(), "Opened channel");
        Ok(channel)
    }

    /// Borrows a channel from the pool, opening the connection and a new
    /// channel when needed.
    pub async fn get_channel(&self) -> Result<PooledChannel> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| RelayError::TransportError("channel pool is shut down".to_string()))?;

        let reusable = {
            let mut idle = self.lock_idle();
            let mut found = None;
            while let Some(channel) = idle.pop() {
                if channel.status().connected() {
                    found = Some(channel);
                    break;
                }
            }
            found
        };

        let channel = match reusable {
            Some(channel) => channel,
            None => self.open_channel().await?,
        };

        Ok(PooledChannel {
            channel: Some(channel),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Closes pooled channels, then the connection. Calling it again is a
    /// no-op; a later `get_channel` reconnects lazily.
    pub async fn close(&self) -> Result<()> {
        let channels: Vec<Channel> = self.lock_idle().drain(..).collect();
        for channel in channels {
            if channel.status().connected() {
                if let Err(e) = channel.close(200, "Connector closing").await {
                    warn!(error = %e, "Failed to close pooled channel");
                }
            }
        }

        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.take() {
            if conn.status().connected() {
                conn.close(200, "Connector closing").await?;
                info!("RabbitMQ connection closed");
            }
        }
        Ok(())
    }
}

/// A channel on loan from the [`Connector`] pool.
pub struct PooledChannel {
    channel: Option<Channel>,
    idle: IdleChannels,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        self.channel
            .as_ref()
            .unwrap_or_else(|| unreachable!("channel is only taken on drop"))
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            if channel.status().connected() {
                let mut idle = self.idle.lock().unwrap_or_else(|p| p.into_inner());
                idle.push(channel);
            }
        }
        // The permit drops after this, freeing the slot.
    }
}
