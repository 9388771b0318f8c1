use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::ports::StorageRepository;
use crate::service::buffer::IngestBuffer;

/// Drains the ingest buffer into one bulk insert per trigger. Triggered
/// explicitly by a worker whose add crossed the batch threshold, and by a
/// fixed interval timer that picks up low-traffic channels.
pub struct BatchFlusher {
    buffer: Arc<IngestBuffer>,
    storage: Arc<dyn StorageRepository>,
}

impl BatchFlusher {
    pub fn new(buffer: Arc<IngestBuffer>, storage: Arc<dyn StorageRepository>) -> Self {
        Self { buffer, storage }
    }

    /// Drain once and persist. Returns the number of readings persisted;
    /// zero when the buffer was empty, another drain was in flight, or the
    /// bulk insert failed.
    ///
    /// A persistence failure drops the batch: best-effort, at most once per
    /// batch, surfaced through logs and counters rather than to producers.
    pub async fn flush(&self) -> usize {
        let batch = self.buffer.drain(self.buffer.batch_size());
        if batch.is_empty() {
            return 0;
        }

        metrics::histogram!("batch_size", batch.len() as f64);
        let start = std::time::Instant::now();

        match self.storage.store_reading_batch(&batch).await {
            Ok(()) => {
                metrics::histogram!("db_write_duration_seconds", start.elapsed().as_secs_f64());
                metrics::counter!("readings_persisted_total", batch.len() as u64);
                batch.len()
            }
            Err(e) => {
                error!(
                    batch_len = batch.len(),
                    "Batch insert failed, dropping batch: {:?}", e
                );
                metrics::counter!("batch_flush_failures_total", 1);
                metrics::counter!("readings_dropped_total", batch.len() as u64);
                0
            }
        }
    }

    /// Periodic catch-up loop. On shutdown it drains whatever remains before
    /// returning, so buffered readings survive a clean stop.
    pub async fn run_interval_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!("Batch flusher timer started (interval: {:?})", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    metrics::gauge!("ingest_buffer_depth", self.buffer.size() as f64);
                    let flushed = self.flush().await;
                    if flushed > 0 {
                        info!("Timer flush persisted {} readings", flushed);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Final drain; repeated in case the buffer holds more than one batch.
        loop {
            let batch_len = self.buffer.size();
            if batch_len == 0 || self.flush().await == 0 {
                break;
            }
        }
        info!("Batch flusher stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlarmRecord, AlarmRule, Reading};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use time::OffsetDateTime;

    struct MockStorage {
        batches: Mutex<Vec<usize>>,
        fail_next: AtomicBool,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl StorageRepository for MockStorage {
        async fn store_reading_batch(&self, batch: &[Reading]) -> anyhow::Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("db unavailable");
            }
            self.batches.lock().unwrap().push(batch.len());
            Ok(())
        }
        async fn upsert_rule(&self, _rule: &AlarmRule) -> anyhow::Result<()> { Ok(()) }
        async fn delete_rule(&self, _d: i64, _c: &str, _n: &str) -> anyhow::Result<()> { Ok(()) }
        async fn find_rules(&self, _d: i64) -> anyhow::Result<Vec<AlarmRule>> { Ok(vec![]) }
        async fn load_all_rules(&self) -> anyhow::Result<Vec<AlarmRule>> { Ok(vec![]) }
        async fn insert_alarm(&self, _r: &AlarmRecord) -> anyhow::Result<i64> { Ok(1) }
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
    async fn flush_persists_one_batch() {
        let buffer = Arc::new(IngestBuffer::new(10));
        let storage = Arc::new(MockStorage::new());
        let flusher = BatchFlusher::new(buffer.clone(), storage.clone());

        buffer.add_all((0..7).map(|i| reading(i as f64)));
        assert_eq!(flusher.flush().await, 7);
        assert_eq!(*storage.batches.lock().unwrap(), vec![7]);
        assert_eq!(buffer.size(), 0);
    }

    #[tokio::test]
    async fn failed_flush_drops_batch_and_recovers() {
        let buffer = Arc::new(IngestBuffer::new(10));
        let storage = Arc::new(MockStorage::new());
        let flusher = BatchFlusher::new(buffer.clone(), storage.clone());

        buffer.add_all((0..5).map(|i| reading(i as f64)));
        storage.fail_next.store(true, Ordering::SeqCst);

        // Batch is lost, not re-enqueued.
        assert_eq!(flusher.flush().await, 0);
        assert_eq!(buffer.size(), 0);
        assert!(storage.batches.lock().unwrap().is_empty());

        // Next batch goes through.
        buffer.add_all((0..3).map(|i| reading(i as f64)));
        assert_eq!(flusher.flush().await, 3);
        assert_eq!(*storage.batches.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn shutdown_drains_remaining_readings() {
        let buffer = Arc::new(IngestBuffer::new(4));
        let storage = Arc::new(MockStorage::new());
        let flusher = Arc::new(BatchFlusher::new(buffer.clone(), storage.clone()));

        // More than two full batches left behind.
        buffer.add_all((0..10).map(|i| reading(i as f64)));

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(
            flusher.run_interval_loop(Duration::from_secs(3600), shutdown_rx),
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(buffer.size(), 0);
        let total: usize = storage.batches.lock().unwrap().iter().sum();
        assert_eq!(total, 10);
    }
}
