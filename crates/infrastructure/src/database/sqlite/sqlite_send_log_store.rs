use async_trait::async_trait;
use bulksend_core::errors::{DispatchError, DispatchResult};
use bulksend_core::models::{SendLogRecord, SendStatus};
use bulksend_core::traits::SendLogStore;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

const SELECT_COLUMNS: &str = "SELECT id, phone, body_hash, status, timestamp, retry_count FROM send_logs";

pub struct SqliteSendLogStore {
    pool: SqlitePool,
}

impl SqliteSendLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DispatchResult<SendLogRecord> {
        Ok(SendLogRecord {
            id: row.try_get("id")?,
            phone: row.try_get("phone")?,
            body_hash: row.try_get("body_hash")?,
            status: row.try_get("status")?,
            timestamp: row.try_get("timestamp")?,
            retry_count: row.try_get("retry_count")?,
        })
    }

    /// 条件更新失败后区分记录不存在与状态流转不合法
    async fn rejected_update(&self, id: i64, status: SendStatus) -> DispatchError {
        match self.get(id).await {
            Ok(Some(current)) => DispatchError::InvalidStatusTransition {
                id,
                from: current.status,
                to: status,
            },
            Ok(None) => DispatchError::SendLogNotFound { id },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl SendLogStore for SqliteSendLogStore {
    #[instrument(skip(self, record), fields(phone = %record.phone, status = %record.status))]
    async fn append(&self, record: &SendLogRecord) -> DispatchResult<SendLogRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO send_logs (phone, body_hash, status, timestamp, retry_count)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, phone, body_hash, status, timestamp, retry_count
            "#,
        )
        .bind(&record.phone)
        .bind(&record.body_hash)
        .bind(record.status)
        .bind(record.timestamp)
        .bind(record.retry_count)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_record(&row)?;
        debug!("已追加{}", created.entity_description());
        Ok(created)
    }

    #[instrument(skip(self), fields(older_than = %older_than))]
    async fn query_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<SendLogRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE status IN ($1, $2) AND timestamp < $3 ORDER BY timestamp ASC, id ASC LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(SendStatus::Pending)
            .bind(SendStatus::Sent)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<DispatchResult<Vec<_>>>()?;
        debug!("查询到 {} 条未决发送记录", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(send_log_id = %id, status = %status))]
    async fn update_status(&self, id: i64, status: SendStatus) -> DispatchResult<()> {
        let allowed: Vec<SendStatus> = SendStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(status))
            .collect();

        if allowed.is_empty() {
            return Err(self.rejected_update(id, status).await);
        }

        // 只在当前状态允许流转时更新，单条语句保证与对账服务并发时的原子性
        let placeholders = (0..allowed.len())
            .map(|i| format!("${}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE send_logs SET status = $1, updated_at = $2 WHERE id = $3 AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(status).bind(Utc::now()).bind(id);
        for from in allowed {
            query = query.bind(from);
        }
        let result = query.execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            let err = self.rejected_update(id, status).await;
            warn!("发送记录状态更新被拒绝: {}", err);
            return Err(err);
        }

        debug!("发送记录 {} 状态更新为 {}", id, status);
        Ok(())
    }

    #[instrument(skip(self), fields(send_log_id = %id))]
    async fn update_retry_count(&self, id: i64, retry_count: i32) -> DispatchResult<()> {
        let result = sqlx::query("UPDATE send_logs SET retry_count = $1, updated_at = $2 WHERE id = $3")
            .bind(retry_count)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DispatchError::SendLogNotFound { id });
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> DispatchResult<Option<SendLogRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_by_status(&self, status: SendStatus) -> DispatchResult<Vec<SendLogRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE status = $1 ORDER BY timestamp ASC, id ASC");
        let rows = sqlx::query(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
