// src/bin/server.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use prompt_relay::collaborators::{InMemoryObjectStore, InMemoryPromptRepository};
use prompt_relay::config::resolve_broker_config;
use prompt_relay::config::server::Args;
use prompt_relay::data_model::{RawPromptMessage, ResultPromptMessage};
use prompt_relay::messaging::{Connector, Consumer, DeadLetterConfig, Producer, QueueSchemas};
use prompt_relay::notifications::NotificationRegistry;
use prompt_relay::server::{run_server, AppState};
use prompt_relay::services::{PromptResultHandler, PromptService};
use prompt_relay::utils::{init_tracing, setup_prometheus_metrics};
use prompt_relay::worker_logic::run_consumer_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_json, args.log_dir.as_deref(), "relay-server.log");

    info!("Starting prompt relay server with args: {:?}", args);

    setup_prometheus_metrics(args.metrics_port)
        .await
        .context("starting metrics endpoint")?;

    let broker = resolve_broker_config(args.broker_config.as_deref(), args.amqp_addr.as_deref())
        .context("loading broker configuration")?;
    let dead_letter = DeadLetterConfig::from_broker_config(&broker);

    let connector = Arc::new(Connector::from_broker_config(&broker));
    connector
        .connect()
        .await
        .context("connecting to the broker")?;

    let publisher = Arc::new(Producer::new(connector.clone(), Some(dead_letter.clone())));
    let schemas = Arc::new(
        QueueSchemas::new()
            .register::<RawPromptMessage>(broker.raw_prompts_queue.clone())
            .register::<ResultPromptMessage>(broker.result_prompts_queue.clone()),
    );
    let consumer = Consumer::new(connector.clone(), schemas, dead_letter);

    let notifications = Arc::new(NotificationRegistry::new());
    let service = Arc::new(PromptService::new(
        Arc::new(InMemoryObjectStore::new(args.storage_url.clone())),
        Arc::new(InMemoryPromptRepository::new()),
        publisher,
        notifications.clone(),
        broker.raw_prompts_queue.clone(),
    ));
    let result_handler = PromptResultHandler::new(service.clone());

    let state = AppState {
        prompts: service,
        notifications,
    };
    let resubscribe_delay = Duration::from_secs(args.resubscribe_delay_secs);

    tokio::select! {
        res = run_server(state, &args.bind, async {
            let _ = signal::ctrl_c().await;
        }) => {
            if let Err(e) = res {
                error!("HTTP server stopped: {}", e);
            }
        }
        _ = run_consumer_loop(
            &consumer,
            &broker.result_prompts_queue,
            &result_handler,
            false,
            resubscribe_delay,
        ) => {}
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down.");
        }
    }

    if let Err(e) = connector.close().await {
        error!("Error closing broker connection: {}", e);
    }
    info!("Server shut down.");
    Ok(())
}
