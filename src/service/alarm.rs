use dashmap::DashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::domain::{AlarmRecord, AlarmRule, AlarmType, Reading};
use crate::error::CoreError;
use crate::ports::{NotificationSink, StorageRepository};

type RuleKey = (i64, String);

/// Threshold alarm evaluation and alarm record lifecycle.
///
/// Enabled rules are kept in a write-through cache keyed on
/// (device_id, channel_id) so the detect path never touches storage for the
/// rule lookup. Actor identity is always an explicit parameter; there is no
/// ambient "current user".
pub struct AlarmEngine {
    storage: Arc<dyn StorageRepository>,
    notifier: Arc<dyn NotificationSink>,
    rules: DashMap<RuleKey, Vec<AlarmRule>>,
}

impl AlarmEngine {
    pub fn new(storage: Arc<dyn StorageRepository>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            storage,
            notifier,
            rules: DashMap::new(),
        }
    }

    /// Warm the rule cache from storage on startup.
    pub async fn load_all(&self) -> anyhow::Result<()> {
        let all = self.storage.load_all_rules().await?;
        let count = all.len();
        self.rules.clear();
        for rule in all {
            self.rules
                .entry((rule.device_id, rule.channel_id.clone()))
                .or_default()
                .push(rule);
        }
        info!("Loaded {} alarm rules into cache", count);
        Ok(())
    }

    /// Evaluate every enabled rule for the reading's device/channel and
    /// create one alarm record per triggered rule. Notification delivery is
    /// fire-and-forget; its failure never rolls back the record.
    ///
    /// Returns the records created, with their assigned ids.
    pub async fn detect(&self, reading: &Reading) -> Result<Vec<AlarmRecord>, CoreError> {
        let key = (reading.device_id, reading.channel_id.clone());
        let matching: Vec<AlarmRule> = match self.rules.get(&key) {
            Some(rules) => rules.iter().filter(|r| r.enabled).cloned().collect(),
            None => return Ok(Vec::new()),
        };

        let mut created = Vec::new();
        for rule in &matching {
            if !is_triggered(reading.value, rule) {
                continue;
            }

            let mut record = AlarmRecord::triggered(reading.device_id, reading.channel_id.clone());
            let id = self.storage.insert_alarm(&record).await?;
            record.id = Some(id);

            warn!(
                device_id = reading.device_id,
                channel_id = %reading.channel_id,
                rule_name = %rule.rule_name,
                value = reading.value,
                threshold = rule.threshold_value,
                "Alarm triggered"
            );
            metrics::counter!("alarms_triggered_total", 1, "alarm_type" => rule.alarm_type.as_str());

            let notifier = self.notifier.clone();
            let to_notify = record.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&to_notify).await {
                    error!("Alarm notification failed (record kept): {:?}", e);
                    metrics::counter!("notification_failures_total", 1);
                }
            });

            created.push(record);
        }
        Ok(created)
    }

    /// Upsert a rule keyed on (device_id, channel_id, rule_name). An upsert
    /// re-enables the rule.
    pub async fn set_rule(&self, device_id: i64, rule: AlarmRule) -> Result<(), CoreError> {
        if rule.rule_name.is_empty() {
            return Err(CoreError::invalid("rule name cannot be empty"));
        }

        let mut rule = rule;
        rule.device_id = device_id;
        rule.enabled = true;

        self.storage.upsert_rule(&rule).await?;

        // Write-through: replace any cached rule with the same name.
        let key = (device_id, rule.channel_id.clone());
        let mut entry = self.rules.entry(key).or_default();
        match entry.iter().position(|r| r.rule_name == rule.rule_name) {
            Some(i) => entry[i] = rule,
            None => entry.push(rule),
        }
        Ok(())
    }

    pub async fn delete_rule(
        &self,
        device_id: i64,
        channel_id: &str,
        rule_name: &str,
    ) -> Result<(), CoreError> {
        self.storage.delete_rule(device_id, channel_id, rule_name).await?;
        if let Some(mut entry) = self.rules.get_mut(&(device_id, channel_id.to_string())) {
            entry.retain(|r| r.rule_name != rule_name);
        }
        Ok(())
    }

    pub async fn get_rules(&self, device_id: i64) -> Result<Vec<AlarmRule>, CoreError> {
        Ok(self.storage.find_rules(device_id).await?)
    }

    /// Manual alarm insertion with an explicit owning actor.
    pub async fn add_record(
        &self,
        device_id: i64,
        channel_id: String,
        actor_id: i64,
    ) -> Result<AlarmRecord, CoreError> {
        let mut record = AlarmRecord::triggered(device_id, channel_id);
        record.user_id = Some(actor_id);
        let id = self.storage.insert_alarm(&record).await?;
        record.id = Some(id);
        Ok(record)
    }

    /// Mark an alarm handled. The transition is one-way: a second handle on
    /// the same record is rejected so the original handler's fields stand.
    pub async fn handle(
        &self,
        alarm_id: i64,
        actor_id: i64,
        note: &str,
    ) -> Result<AlarmRecord, CoreError> {
        let mut record = self
            .storage
            .find_alarm(alarm_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("alarm record {}", alarm_id)))?;

        if record.is_handled {
            return Err(CoreError::invalid(format!(
                "alarm record {} is already handled",
                alarm_id
            )));
        }

        record.is_handled = true;
        record.handle_time = Some(OffsetDateTime::now_utc());
        record.handle_user_id = Some(actor_id);
        record.handle_note = Some(note.to_string());

        self.storage.update_alarm(&record).await?;
        Ok(record)
    }

    /// Permanently remove an alarm record. Only its owning user may delete it.
    pub async fn delete(&self, alarm_id: i64, actor_id: i64) -> Result<(), CoreError> {
        let record = self
            .storage
            .find_alarm(alarm_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("alarm record {}", alarm_id)))?;

        if record.user_id != Some(actor_id) {
            return Err(CoreError::Forbidden(format!(
                "alarm record {} is not owned by user {}",
                alarm_id, actor_id
            )));
        }

        self.storage.delete_alarm(alarm_id).await?;
        info!("Alarm record deleted: {}", alarm_id);
        Ok(())
    }

    pub async fn unhandled_for(&self, actor_id: i64) -> Result<Vec<AlarmRecord>, CoreError> {
        Ok(self.storage.find_unhandled_alarms(actor_id).await?)
    }

    /// Alarms owned by an actor within an optional creation-time window,
    /// newest first. Either bound may be left open.
    pub async fn alarms_for(
        &self,
        actor_id: i64,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<Vec<AlarmRecord>, CoreError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(CoreError::invalid("query window start is after its end"));
            }
        }
        Ok(self.storage.find_alarms_in_range(actor_id, from, to).await?)
    }
}

fn is_triggered(value: f64, rule: &AlarmRule) -> bool {
    match rule.alarm_type {
        AlarmType::ThresholdUpper => value > rule.threshold_value,
        AlarmType::ThresholdLower => value < rule.threshold_value,
        // Exact equality, as configured upstream. Rarely fires for
        // continuous sensor values; changing this to an epsilon comparison
        // would change alarm behavior for existing rules.
        AlarmType::ThresholdEqual => value == rule.threshold_value,
    }
}
