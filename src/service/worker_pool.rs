use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info};

use crate::domain::Reading;
use crate::service::alarm::AlarmEngine;
use crate::service::buffer::IngestBuffer;
use crate::service::flusher::BatchFlusher;

/// Semaphore-bounded pool that takes decoded readings off the ingest channel.
/// Each job appends to the buffer, fires a threshold flush when the add
/// crossed the batch size, and runs alarm detection. Producers only ever
/// touch the channel, so persistence and notification I/O stay off their
/// critical path.
pub struct WorkerPool {
    buffer: Arc<IngestBuffer>,
    flusher: Arc<BatchFlusher>,
    alarms: Arc<AlarmEngine>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        buffer: Arc<IngestBuffer>,
        flusher: Arc<BatchFlusher>,
        alarms: Arc<AlarmEngine>,
        concurrency: usize,
    ) -> Self {
        Self { buffer, flusher, alarms, concurrency }
    }

    /// Runs until the channel closes (all producers dropped their senders).
    pub async fn run(self, mut receiver: Receiver<Reading>) {
        info!("WorkerPool starting with {} workers", self.concurrency);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency));
        let active_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        while let Some(reading) = receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    error!("Semaphore closed");
                    break;
                }
            };

            let buffer = self.buffer.clone();
            let flusher = self.flusher.clone();
            let alarms = self.alarms.clone();
            let active_count = active_count.clone();

            tokio::spawn(async move {
                let _permit = permit; // Hold permit until task completion

                let current = active_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                metrics::gauge!("worker_active_count", current as f64);
                metrics::counter!("readings_ingested_total", 1);

                let start = std::time::Instant::now();

                buffer.add(reading.clone());
                if buffer.should_flush() {
                    flusher.flush().await;
                }

                // Alarm detection runs on every accepted reading, independent
                // of batching.
                if let Err(e) = alarms.detect(&reading).await {
                    error!(
                        device_id = reading.device_id,
                        channel_id = %reading.channel_id,
                        "Alarm detection failed: {:?}", e
                    );
                    metrics::counter!("worker_errors_total", 1, "type" => "alarm_detect");
                }

                metrics::histogram!("worker_processing_duration_seconds", start.elapsed().as_secs_f64());

                let remaining = active_count.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) - 1;
                metrics::gauge!("worker_active_count", remaining as f64);
            });
        }

        // Let in-flight jobs finish before the flusher's final drain runs.
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!("WorkerPool shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlarmRecord, AlarmRule, AlarmType};
    use crate::ports::{NotificationSink, StorageRepository};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    struct CountingStorage {
        persisted: Mutex<usize>,
        alarms: Mutex<usize>,
    }

    #[async_trait]
    impl StorageRepository for CountingStorage {
        async fn store_reading_batch(&self, batch: &[Reading]) -> anyhow::Result<()> {
            *self.persisted.lock().unwrap() += batch.len();
            Ok(())
        }
        async fn upsert_rule(&self, _r: &AlarmRule) -> anyhow::Result<()> { Ok(()) }
        async fn delete_rule(&self, _d: i64, _c: &str, _n: &str) -> anyhow::Result<()> { Ok(()) }
        async fn find_rules(&self, _d: i64) -> anyhow::Result<Vec<AlarmRule>> { Ok(vec![]) }
        async fn load_all_rules(&self) -> anyhow::Result<Vec<AlarmRule>> { Ok(vec![]) }
        async fn insert_alarm(&self, _r: &AlarmRecord) -> anyhow::Result<i64> {
            let mut n = self.alarms.lock().unwrap();
            *n += 1;
            Ok(*n as i64)
        }
        async fn find_alarm(&self, _id: i64) -> anyhow::Result<Option<AlarmRecord>> { Ok(None) }
        async fn update_alarm(&self, _r: &AlarmRecord) -> anyhow::Result<()> { Ok(()) }
        async fn delete_alarm(&self, _id: i64) -> anyhow::Result<()> { Ok(()) }
        async fn find_unhandled_alarms(&self, _u: i64) -> anyhow::Result<Vec<AlarmRecord>> { Ok(vec![]) }
        async fn find_alarms_in_range(
            &self,
            _u: i64,
            _from: Option<OffsetDateTime>,
            _to: Option<OffsetDateTime>,
        ) -> anyhow::Result<Vec<AlarmRecord>> { Ok(vec![]) }
    }

    struct NullNotifier;

    #[async_trait]
    impl NotificationSink for NullNotifier {
        async fn notify(&self, _record: &AlarmRecord) -> anyhow::Result<()> { Ok(()) }
    }

    fn reading(value: f64) -> Reading {
        Reading {
            device_id: 1,
            channel_id: "ch1".to_string(),
            value,
            unit: "mV".to_string(),
            data_type: "amplitude".to_string(),
            collected_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn pool_buffers_detects_and_flushes() {
        let storage = Arc::new(CountingStorage {
            persisted: Mutex::new(0),
            alarms: Mutex::new(0),
        });
        let buffer = Arc::new(IngestBuffer::new(5));
        let flusher = Arc::new(BatchFlusher::new(buffer.clone(), storage.clone()));
        let engine = Arc::new(AlarmEngine::new(storage.clone(), Arc::new(NullNotifier)));
        engine
            .set_rule(
                1,
                AlarmRule {
                    id: None,
                    device_id: 1,
                    channel_id: "ch1".to_string(),
                    alarm_type: AlarmType::ThresholdUpper,
                    rule_type: "threshold".to_string(),
                    rule_name: "hot".to_string(),
                    threshold_value: 50.0,
                    alarm_level: "critical".to_string(),
                    enabled: true,
                },
            )
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let pool = WorkerPool::new(buffer.clone(), flusher.clone(), engine, 4);
        let handle = tokio::spawn(pool.run(rx));

        for i in 0..20 {
            let value = if i == 3 { 60.0 } else { 20.0 };
            tx.send(reading(value)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        // Whatever threshold flushes missed, the catch-up flush persists.
        while flusher.flush().await > 0 {}

        assert_eq!(*storage.persisted.lock().unwrap(), 20);
        assert_eq!(*storage.alarms.lock().unwrap(), 1);
    }
}
