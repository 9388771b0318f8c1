use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::domain::{AlarmRecord, AlarmRule, AlarmType, Reading};
use crate::ports::StorageRepository;

pub struct TimescaleRepository {
    pool: PgPool,
}

impl TimescaleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rule_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<AlarmRule> {
    let alarm_type: String = row.try_get("alarm_type")?;
    let alarm_type = AlarmType::parse(&alarm_type)
        .ok_or_else(|| anyhow::anyhow!("unknown alarm type in store: {}", alarm_type))?;
    Ok(AlarmRule {
        id: Some(row.try_get("id")?),
        device_id: row.try_get("device_id")?,
        channel_id: row.try_get("channel_id")?,
        alarm_type,
        rule_type: row.try_get("rule_type")?,
        rule_name: row.try_get("rule_name")?,
        threshold_value: row.try_get("threshold_value")?,
        alarm_level: row.try_get("alarm_level")?,
        enabled: row.try_get("is_enabled")?,
    })
}

fn alarm_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<AlarmRecord> {
    Ok(AlarmRecord {
        id: Some(row.try_get("id")?),
        device_id: row.try_get("device_id")?,
        channel_id: row.try_get("channel_id")?,
        user_id: row.try_get("user_id")?,
        is_handled: row.try_get("is_handled")?,
        handle_time: row.try_get("handle_time")?,
        handle_user_id: row.try_get("handle_user_id")?,
        handle_note: row.try_get("handle_note")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl StorageRepository for TimescaleRepository {
    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    async fn store_reading_batch(&self, batch: &[Reading]) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO readings (collected_at, device_id, channel_id, data_value, data_unit, data_type) ",
        );

        query_builder.push_values(batch, |mut b, reading| {
            b.push_bind(reading.collected_at)
                .push_bind(reading.device_id)
                .push_bind(&reading.channel_id)
                .push_bind(reading.value)
                .push_bind(&reading.unit)
                .push_bind(&reading.data_type);
        });

        let result = query_builder.build().execute(&self.pool).await?;
        info!("Batch stored successfully. Rows affected: {}", result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self, rule), fields(device_id = rule.device_id, rule_name = %rule.rule_name))]
    async fn upsert_rule(&self, rule: &AlarmRule) -> anyhow::Result<()> {
        let query = r#"
            INSERT INTO alarm_rules
                (device_id, channel_id, rule_name, rule_type, alarm_type, threshold_value, alarm_level, is_enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (device_id, channel_id, rule_name)
            DO UPDATE SET
                rule_type = EXCLUDED.rule_type,
                alarm_type = EXCLUDED.alarm_type,
                threshold_value = EXCLUDED.threshold_value,
                alarm_level = EXCLUDED.alarm_level,
                is_enabled = EXCLUDED.is_enabled
        "#;

        sqlx::query(query)
            .bind(rule.device_id)
            .bind(&rule.channel_id)
            .bind(&rule.rule_name)
            .bind(&rule.rule_type)
            .bind(rule.alarm_type.as_str())
            .bind(rule.threshold_value)
            .bind(&rule.alarm_level)
            .bind(rule.enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_rule(&self, device_id: i64, channel_id: &str, rule_name: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM alarm_rules WHERE device_id = $1 AND channel_id = $2 AND rule_name = $3")
            .bind(device_id)
            .bind(channel_id)
            .bind(rule_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_rules(&self, device_id: i64) -> anyhow::Result<Vec<AlarmRule>> {
        let rows = sqlx::query("SELECT * FROM alarm_rules WHERE device_id = $1")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    async fn load_all_rules(&self) -> anyhow::Result<Vec<AlarmRule>> {
        let rows = sqlx::query("SELECT * FROM alarm_rules")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rule_from_row).collect()
    }

    #[instrument(skip(self, record), fields(device_id = record.device_id, channel_id = %record.channel_id))]
    async fn insert_alarm(&self, record: &AlarmRecord) -> anyhow::Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO alarm_records
                (device_id, channel_id, user_id, is_handled, handle_time, handle_user_id, handle_note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(record.device_id)
        .bind(&record.channel_id)
        .bind(record.user_id)
        .bind(record.is_handled)
        .bind(record.handle_time)
        .bind(record.handle_user_id)
        .bind(&record.handle_note)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn find_alarm(&self, alarm_id: i64) -> anyhow::Result<Option<AlarmRecord>> {
        let row = sqlx::query("SELECT * FROM alarm_records WHERE id = $1")
            .bind(alarm_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alarm_from_row).transpose()
    }

    async fn update_alarm(&self, record: &AlarmRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE alarm_records
            SET is_handled = $1, handle_time = $2, handle_user_id = $3, handle_note = $4
            WHERE id = $5
            "#,
        )
        .bind(record.is_handled)
        .bind(record.handle_time)
        .bind(record.handle_user_id)
        .bind(&record.handle_note)
        .bind(record.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_alarm(&self, alarm_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM alarm_records WHERE id = $1")
            .bind(alarm_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_unhandled_alarms(&self, user_id: i64) -> anyhow::Result<Vec<AlarmRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM alarm_records WHERE user_id = $1 AND is_handled = FALSE ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alarm_from_row).collect()
    }

    async fn find_alarms_in_range(
        &self,
        user_id: i64,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> anyhow::Result<Vec<AlarmRecord>> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM alarm_records WHERE user_id = ");
        query_builder.push_bind(user_id);
        if let Some(from) = from {
            query_builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = to {
            query_builder.push(" AND created_at <= ").push_bind(to);
        }
        query_builder.push(" ORDER BY created_at DESC");

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(alarm_from_row).collect()
    }
}
