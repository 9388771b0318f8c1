use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::{AlarmRecord, Reading};
use crate::ports::NotificationSink;

/// Batch payload published by devices: the topic carries the device id,
/// the body carries one or more readings.
#[derive(serde::Deserialize, Debug)]
struct ReadingBatchPayload {
    readings: Vec<Reading>,
}

pub struct MqttAdapter {
    client: AsyncClient,
}

impl MqttAdapter {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    /// Build the client and its event loop. The event loop goes to the
    /// ingest loop; the client is shared for publishing notifications.
    pub fn build(config: &AppConfig) -> (AsyncClient, rumqttc::EventLoop) {
        // Stable client id for persistent sessions
        let client_id = format!("{}_{}", config.mqtt_client_id_prefix, config.instance_id);

        let mut mqttoptions = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        // Broker queues QoS 1 messages across restarts.
        mqttoptions.set_clean_session(false);

        // Inflight window sized for high-rate telemetry; the default of 10
        // stalls the client almost immediately.
        AsyncClient::new(mqttoptions, 1000)
    }
}

#[async_trait]
impl NotificationSink for MqttAdapter {
    #[instrument(skip(self, record), fields(device_id = record.device_id, channel_id = %record.channel_id))]
    async fn notify(&self, record: &AlarmRecord) -> anyhow::Result<()> {
        let topic = format!("devices/{}/alarms", record.device_id);
        let payload = serde_json::to_vec(record)?;
        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| anyhow::anyhow!("MQTT publish failed: {:?}", e))?;
        Ok(())
    }
}

/// Consume reading batches from the broker and feed decoded readings into
/// the worker channel. Decode failures are dropped and counted rather than
/// stalling the loop; the channel send applies backpressure when workers
/// fall behind.
pub async fn run_ingest_loop(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    topic_filter: String,
    sender: Sender<Reading>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    client.subscribe(&topic_filter, QoS::AtLeastOnce).await?;
    info!("MQTT ingest loop started. Subscribed to {}", topic_filter);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown signal received in MQTT ingest loop.");
                    break;
                }
            }

            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match decode_batch(&publish.topic, &publish.payload) {
                            Ok(readings) => {
                                for reading in readings {
                                    if sender.send(reading).await.is_err() {
                                        error!("Ingest channel closed. Stopping MQTT loop.");
                                        return Ok(());
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, "Dropping undecodable payload: {:?}", e);
                                metrics::counter!("ingest_decode_failures_total", 1);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected. Resubscribing to {}", topic_filter);
                        client.subscribe(&topic_filter, QoS::AtLeastOnce).await?;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("MQTT ingest loop exited.");
    Ok(())
}

/// Topic layout: `devices/{device_id}/readings`. Shared with the Kafka leg,
/// whose bridge envelope preserves the original MQTT topic.
pub(crate) fn decode_batch(topic: &str, payload: &[u8]) -> anyhow::Result<Vec<Reading>> {
    let parts: Vec<&str> = topic.split('/').collect();
    let device_id: i64 = match parts.as_slice() {
        ["devices", id, "readings"] => id
            .parse()
            .map_err(|_| anyhow::anyhow!("non-numeric device id in topic: {}", topic))?,
        _ => anyhow::bail!("unexpected topic layout: {}", topic),
    };

    let batch: ReadingBatchPayload = serde_json::from_slice(payload)?;
    if batch.readings.is_empty() {
        anyhow::bail!("empty reading batch");
    }

    Ok(batch
        .readings
        .into_iter()
        .map(|mut reading| {
            reading.device_id = device_id;
            reading
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_batch_and_injects_device_id() {
        let payload = br#"{
            "readings": [
                {"channel_id": "ch1", "value": 1.5, "unit": "mV", "type": "amplitude",
                 "collected_at": "2026-08-01T12:00:00Z"},
                {"channel_id": "ch2", "value": -2.0, "unit": "mV", "type": "amplitude",
                 "collected_at": "2026-08-01T12:00:01Z"}
            ]
        }"#;

        let readings = decode_batch("devices/42/readings", payload).unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.device_id == 42));
        assert_eq!(readings[0].channel_id, "ch1");
        assert_eq!(readings[1].value, -2.0);
    }

    #[test]
    fn rejects_bad_topic_and_bad_payload() {
        assert!(decode_batch("devices/abc/readings", b"{}").is_err());
        assert!(decode_batch("other/42/topic", b"{}").is_err());
        assert!(decode_batch("devices/42/readings", b"not json").is_err());
        assert!(decode_batch("devices/42/readings", br#"{"readings": []}"#).is_err());
    }
}
