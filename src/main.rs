mod adapters;
mod analysis;
mod config;
mod domain;
mod error;
mod ports;
mod service;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use crate::adapters::{KafkaAdapter, MqttAdapter, TimescaleRepository};
use crate::adapters::mqtt::run_ingest_loop;
use crate::config::AppConfig;
use crate::service::alarm::AlarmEngine;
use crate::service::buffer::IngestBuffer;
use crate::service::flusher::BatchFlusher;
use crate::service::worker_pool::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 0. Load env vars first
    dotenvy::dotenv().ok();

    // 1. Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting telemetry ingestor...");

    // 1b. Initialize metrics
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .with_http_listener(([0, 0, 0, 0], 9000))
        .idle_timeout(
            metrics_util::MetricKindMask::ALL,
            Some(Duration::from_secs(60)),
        )
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;
    info!("Prometheus metrics listening on 0.0.0.0:9000");

    // 2. Load configuration
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded.");

    // 3. Initialize database pool
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(50)
        .connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to DB: {:?}", e))?;
    info!("Database connection established.");

    // 4. Initialize adapters
    let storage = Arc::new(TimescaleRepository::new(pool));

    let (mqtt_client, eventloop) = MqttAdapter::build(&config);
    let notifier = Arc::new(MqttAdapter::new(mqtt_client.clone()));

    // 5. Initialize alarm engine and warm the rule cache
    let alarms = Arc::new(AlarmEngine::new(storage.clone(), notifier));
    if let Err(e) = alarms.load_all().await {
        error!("Failed to load alarm rules: {:?}", e);
        std::process::exit(1);
    }

    // 6. Ingest buffer and flusher
    let buffer = Arc::new(IngestBuffer::new(config.batch_size));
    let flusher = Arc::new(BatchFlusher::new(buffer.clone(), storage.clone()));

    // 7. Pipeline channel: MQTT ingest -> worker pool. Bounded so a stalled
    // DB shows up as broker backpressure instead of unbounded memory growth.
    let (tx, rx) = tokio::sync::mpsc::channel(10_000);

    // 8. Background tasks
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    // Separate signal for the flusher: its final drain must run after the
    // worker pool has stopped adding to the buffer.
    let (flush_shutdown_tx, flusher_shutdown) = tokio::sync::watch::channel(false);

    let flusher_for_timer = flusher.clone();
    let flush_interval = Duration::from_millis(config.flush_interval_ms);
    let flusher_handle = tokio::spawn(async move {
        flusher_for_timer
            .run_interval_loop(flush_interval, flusher_shutdown)
            .await;
    });

    let worker_pool = WorkerPool::new(
        buffer.clone(),
        flusher.clone(),
        alarms.clone(),
        config.worker_concurrency,
    );
    let worker_handle = tokio::spawn(async move {
        worker_pool.run(rx).await;
    });

    // Optional second leg: bridged MQTT traffic arriving through Kafka
    // feeds the same worker channel.
    let kafka_handle = match &config.kafka_brokers {
        Some(brokers) => {
            let adapter = KafkaAdapter::new(brokers, &config.kafka_group_id, &config.kafka_topic)?;
            let kafka_tx = tx.clone();
            let kafka_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = adapter.run_loop(kafka_tx, kafka_shutdown).await {
                    error!("Kafka ingest loop error: {:?}", e);
                }
            }))
        }
        None => None,
    };

    let ingest_topic = config.ingest_topic.clone();
    let ingest_shutdown = shutdown_rx.clone();
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = run_ingest_loop(eventloop, mqtt_client, ingest_topic, tx, ingest_shutdown).await {
            error!("MQTT ingest loop error: {:?}", e);
        }
    });

    info!("System running. MQTT -> buffer -> DB. Press Ctrl+C to stop.");

    // 9. Shutdown signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received..."),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }

    // 10. Graceful shutdown: ingest loop exits -> drops `tx` -> worker pool
    // drains the channel and exits -> flusher timer drains the buffer.
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(ingest_handle);
    if let Some(handle) = kafka_handle {
        let _ = tokio::join!(handle);
    }
    info!("Waiting for worker pool to stop...");
    let _ = tokio::join!(worker_handle);

    info!("Waiting for final flush...");
    let _ = flush_shutdown_tx.send(true);
    let grace = Duration::from_secs(20);
    match tokio::time::timeout(grace, flusher_handle).await {
        Ok(_) => info!("Final flush complete."),
        Err(_) => warn!("Timeout waiting for final flush."),
    }

    info!("Shutdown complete.");
    Ok(())
}
