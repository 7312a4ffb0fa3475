use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use envconfig::Envconfig;
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use kafka_client::{GroupConsumer, KafkaClient, KafkaConfig, PollOutcome};

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutdown status change: TERMINATING");
}

/// Polls and commits until `stop` is raised or the session fails.
fn consume(consumer: &GroupConsumer, stop: &AtomicBool) -> anyhow::Result<u64> {
    let mut processed = 0;
    while !stop.load(Ordering::Relaxed) {
        match consumer.poll()? {
            PollOutcome::Message(message) => {
                info!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    size = message.payload().len(),
                    "received message"
                );
                consumer.commit(&message)?;
                processed += 1;
            }
            PollOutcome::EndOfPartition { partition } => {
                info!(partition, "reached end of partition");
            }
            PollOutcome::Idle => {}
        }
    }
    Ok(processed)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = KafkaConfig::init_from_env().context("invalid configuration")?;
    let client = KafkaClient::from_config(config)?;
    let topic = client.topic().to_string();

    let setup = client.clone();
    let consumer = tokio::task::spawn_blocking(move || -> anyhow::Result<GroupConsumer> {
        setup
            .create_topic(setup.topic())
            .with_context(|| format!("failed to ensure topic {}", setup.topic()))?;
        Ok(setup.subscribe()?)
    })
    .await??;
    info!(topic = %topic, "consumer started");

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();
    let mut worker = tokio::task::spawn_blocking(move || {
        let result = consume(&consumer, &worker_stop);
        (consumer, result)
    });

    let (consumer, result) = tokio::select! {
        joined = &mut worker => joined?,
        _ = shutdown_signal() => {
            stop.store(true, Ordering::Relaxed);
            worker.await?
        }
    };

    match &result {
        Ok(processed) => info!(processed, "consume loop stopped"),
        Err(e) => error!(error = %e, "consume loop failed"),
    }

    let closed = tokio::task::spawn_blocking(move || consumer.shutdown(true)).await?;
    match (closed, result) {
        (Ok(outcome), Ok(_)) => {
            info!(
                committed_partitions = outcome.committed_partitions,
                "shutdown complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        (Ok(_), Err(_)) => Ok(ExitCode::FAILURE),
        (Err(e), _) => {
            warn!(error = %e, "shutdown failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
