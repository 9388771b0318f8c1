use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One timestamped sensor measurement on one device/channel.
/// Immutable once decoded by an adapter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Reading {
    #[serde(skip_deserializing)] // Populated from the topic, not from JSON
    pub device_id: i64,
    pub channel_id: String,
    pub value: f64,
    pub unit: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub collected_at: OffsetDateTime,
}

/// Ordered time/value pairs for offline analysis. Analysis functions never
/// mutate the input; `sampling_rate` is informational and not derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
    pub sampling_rate: f64,
}

impl TimeSeries {
    pub fn new(times: Vec<f64>, values: Vec<f64>, sampling_rate: f64) -> Self {
        Self { times, values, sampling_rate }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmType {
    ThresholdUpper,
    ThresholdLower,
    ThresholdEqual,
}

impl AlarmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmType::ThresholdUpper => "THRESHOLD_UPPER",
            AlarmType::ThresholdLower => "THRESHOLD_LOWER",
            AlarmType::ThresholdEqual => "THRESHOLD_EQUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "THRESHOLD_UPPER" => Some(AlarmType::ThresholdUpper),
            "THRESHOLD_LOWER" => Some(AlarmType::ThresholdLower),
            "THRESHOLD_EQUAL" => Some(AlarmType::ThresholdEqual),
            _ => None,
        }
    }
}

/// Per-device-channel threshold condition. Unique on
/// (device_id, channel_id, rule_name); upserted, never auto-expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: Option<i64>,
    pub device_id: i64,
    pub channel_id: String,
    pub alarm_type: AlarmType,
    pub rule_type: String,
    pub rule_name: String,
    pub threshold_value: f64,
    pub alarm_level: String,
    pub enabled: bool,
}

/// Alarm produced by rule evaluation or manual insertion.
/// `is_handled` transitions one way: false -> true, with all three handle
/// fields set together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: Option<i64>,
    pub device_id: i64,
    pub channel_id: String,
    /// Owning user. None for system-triggered records (detect path).
    pub user_id: Option<i64>,
    pub is_handled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub handle_time: Option<OffsetDateTime>,
    pub handle_user_id: Option<i64>,
    pub handle_note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AlarmRecord {
    /// Unhandled record as created by the detect path.
    pub fn triggered(device_id: i64, channel_id: String) -> Self {
        Self {
            id: None,
            device_id,
            channel_id,
            user_id: None,
            is_handled: false,
            handle_time: None,
            handle_user_id: None,
            handle_note: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
