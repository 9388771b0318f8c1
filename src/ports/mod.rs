use async_trait::async_trait;
use time::OffsetDateTime;

use crate::domain::{AlarmRecord, AlarmRule, Reading};

#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Persist a batch of readings in a single bulk insert.
    /// No deduplication key exists on `Reading`; a failed call loses the batch.
    async fn store_reading_batch(&self, batch: &[Reading]) -> anyhow::Result<()>;

    /// Insert or update a rule keyed on (device_id, channel_id, rule_name).
    async fn upsert_rule(&self, rule: &AlarmRule) -> anyhow::Result<()>;

    async fn delete_rule(&self, device_id: i64, channel_id: &str, rule_name: &str) -> anyhow::Result<()>;

    /// All rules for a device, enabled or not.
    async fn find_rules(&self, device_id: i64) -> anyhow::Result<Vec<AlarmRule>>;

    /// Every rule in the store, used to warm the in-memory cache at startup.
    async fn load_all_rules(&self) -> anyhow::Result<Vec<AlarmRule>>;

    /// Insert an alarm record, returning its assigned id.
    async fn insert_alarm(&self, record: &AlarmRecord) -> anyhow::Result<i64>;

    async fn find_alarm(&self, alarm_id: i64) -> anyhow::Result<Option<AlarmRecord>>;

    /// Overwrite an existing alarm record by id.
    async fn update_alarm(&self, record: &AlarmRecord) -> anyhow::Result<()>;

    async fn delete_alarm(&self, alarm_id: i64) -> anyhow::Result<()>;

    /// Unhandled alarms owned by a user, newest first.
    async fn find_unhandled_alarms(&self, user_id: i64) -> anyhow::Result<Vec<AlarmRecord>>;

    /// Alarms owned by a user whose creation time falls inside the given
    /// bounds, newest first. `None` leaves that side of the window open.
    async fn find_alarms_in_range(
        &self,
        user_id: i64,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> anyhow::Result<Vec<AlarmRecord>>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Best-effort delivery of a triggered alarm. Failures are logged by the
    /// caller and never roll back the alarm record.
    async fn notify(&self, record: &AlarmRecord) -> anyhow::Result<()>;
}
