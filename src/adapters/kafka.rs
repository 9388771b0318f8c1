use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::mpsc::Sender;
use tracing::{error, info, instrument, warn};

use crate::domain::Reading;

/// Envelope produced by an MQTT-to-Kafka bridge (EMQX data bridge layout):
/// the original topic travels alongside the payload, which arrives either as
/// a stringified JSON body or as the object itself.
#[derive(serde::Deserialize, Debug)]
struct BridgeEnvelope {
    topic: String,
    payload: serde_json::Value,
}

/// Second ingest leg for deployments that fan broker traffic out through
/// Kafka. Decoded readings join the same worker channel as the direct MQTT
/// subscription.
pub struct KafkaAdapter {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaAdapter {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    #[instrument(skip(self, sender, shutdown), fields(topic = %self.topic))]
    pub async fn run_loop(
        &self,
        sender: Sender<Reading>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        self.consumer.subscribe(&[&self.topic])?;
        info!("Kafka ingest loop started. Subscribed to {}", self.topic);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received in Kafka ingest loop.");
                        break;
                    }
                }

                res = self.consumer.recv() => {
                    match res {
                        Err(e) => error!("Kafka error: {}", e),
                        Ok(message) => {
                            if let Some(payload) = message.payload() {
                                match decode_envelope(payload) {
                                    Ok(readings) => {
                                        for reading in readings {
                                            if sender.send(reading).await.is_err() {
                                                error!("Ingest channel closed. Stopping Kafka loop.");
                                                return Ok(());
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Dropping undecodable bridge message: {:?}", e);
                                        metrics::counter!("ingest_decode_failures_total", 1);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("Kafka ingest loop exited.");
        Ok(())
    }
}

/// Unwrap the bridge envelope, then decode exactly as the MQTT path does.
fn decode_envelope(payload: &[u8]) -> anyhow::Result<Vec<Reading>> {
    let envelope: BridgeEnvelope = serde_json::from_slice(payload)?;
    let body = match envelope.payload {
        serde_json::Value::String(s) => s.into_bytes(),
        v => serde_json::to_vec(&v)?,
    };
    super::mqtt::decode_batch(&envelope.topic, &body)
}
