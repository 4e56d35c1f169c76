// src/bin/worker.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use prompt_relay::config::resolve_broker_config;
use prompt_relay::config::worker::Args;
use prompt_relay::data_model::{RawPromptMessage, ResultPromptMessage};
use prompt_relay::executor::{InferenceExecutor, InferenceStep, PassThroughStep};
use prompt_relay::messaging::{Connector, Consumer, DeadLetterConfig, Producer, QueueSchemas};
use prompt_relay::utils::{init_tracing, setup_prometheus_metrics};
use prompt_relay::worker_logic::{run_consumer_loop, RawPromptHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_json, args.log_dir.as_deref(), "worker.log");

    let broker = resolve_broker_config(args.broker_config.as_deref(), args.amqp_addr.as_deref())
        .context("loading broker configuration")?;

    if args.validate_config {
        println!("Broker configuration is valid:");
        println!("{:#?}", broker);
        return Ok(());
    }

    info!("Starting inference worker with args: {:?}", args);

    setup_prometheus_metrics(args.metrics_port)
        .await
        .context("starting metrics endpoint")?;

    let dead_letter = DeadLetterConfig::from_broker_config(&broker);
    let connector = Arc::new(Connector::from_broker_config(&broker));
    connector
        .connect()
        .await
        .context("connecting to the broker")?;

    let steps: Vec<Box<dyn InferenceStep>> = vec![Box::new(PassThroughStep)];
    info!("Inference executor built with {} step(s).", steps.len());
    let executor = Arc::new(InferenceExecutor::new(steps));

    let publisher = Arc::new(Producer::new(connector.clone(), Some(dead_letter.clone())));
    let handler = RawPromptHandler::new(executor, publisher, broker.result_prompts_queue.clone());

    let schemas = Arc::new(
        QueueSchemas::new()
            .register::<RawPromptMessage>(broker.raw_prompts_queue.clone())
            .register::<ResultPromptMessage>(broker.result_prompts_queue.clone()),
    );
    let consumer = Consumer::new(connector.clone(), schemas, dead_letter);

    tokio::select! {
        _ = run_consumer_loop(
            &consumer,
            &broker.raw_prompts_queue,
            &handler,
            false,
            Duration::from_secs(args.resubscribe_delay_secs),
        ) => {}
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down.");
        }
    }

    if let Err(e) = connector.close().await {
        error!("Error closing broker connection: {}", e);
    }
    info!("Worker shut down.");
    Ok(())
}
