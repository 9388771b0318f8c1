use serde::Deserialize;
use std::env;
use anyhow::Context;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id_prefix: String,
    pub database_url: String,
    pub ingest_topic: String,
    pub instance_id: String,
    /// Optional second ingest leg: consume bridged MQTT traffic from Kafka
    /// when set, alongside the direct broker subscription.
    pub kafka_brokers: Option<String>,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub worker_concurrency: usize,
    pub python_executable: String,
    pub python_scripts_dir: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists, ignore if not

        let config = AppConfig {
            mqtt_host: env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string()),
            mqtt_port: env::var("MQTT_PORT")
                .unwrap_or_else(|_| "1883".to_string())
                .parse()
                .context("MQTT_PORT must be a valid u16")?,
            mqtt_client_id_prefix: env::var("MQTT_CLIENT_ID_PREFIX")
                .unwrap_or_else(|_| "telemetry_ingestor".to_string()),
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            ingest_topic: env::var("INGEST_TOPIC")
                .unwrap_or_else(|_| "devices/+/readings".to_string()),
            instance_id: env::var("INSTANCE_ID").unwrap_or_else(|_| "1".to_string()),
            kafka_brokers: env::var("KAFKA_BROKERS").ok(),
            kafka_topic: env::var("KAFKA_TOPIC")
                .unwrap_or_else(|_| "telemetry-bridge".to_string()),
            kafka_group_id: env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "telemetry_ingestor".to_string()),
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("BATCH_SIZE must be a valid usize")?,
            flush_interval_ms: env::var("FLUSH_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("FLUSH_INTERVAL_MS must be a valid u64")?,
            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_CONCURRENCY must be a valid usize")?,
            python_executable: env::var("PYTHON_EXECUTABLE")
                .unwrap_or_else(|_| "python3".to_string()),
            python_scripts_dir: env::var("PYTHON_SCRIPTS_DIR")
                .unwrap_or_else(|_| "scripts".to_string()),
        };

        Ok(config)
    }
}
