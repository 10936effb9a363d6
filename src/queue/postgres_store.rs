//! PostgreSQL queue store.
//!
//! Table structure:
//! - `queue_messages` - one row per (recipient, channel) fan-out, JSONB
//!   content, TEXT status
//!
//! The claim path is a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE
//! SKIP LOCKED)` statement: selection and the flip to Processing are one
//! atomic unit, so concurrent workers race on row locks instead of
//! re-reading each other's candidates.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::metrics::{QUEUE_CLAIMED_TOTAL, QUEUE_ENQUEUED_TOTAL, QUEUE_REQUEUED_TOTAL};
use crate::paging::{PageRequest, PagedResult};

use super::models::{MessageStatus, NewQueuedMessage, QueueFilter, QueueSummary, QueuedMessage};
use super::store::QueueStore;

const COLUMNS: &str =
    "id, request_id, recipient_id, channel, content, priority, status, scheduled_at, created_at, processed_at";

/// PostgreSQL-backed `QueueStore` implementation.
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &PgRow) -> Result<QueuedMessage> {
        let status: String = row.try_get("status")?;
        let status = MessageStatus::parse(&status)
            .ok_or_else(|| DispatchError::Decode(format!("unknown message status: {status}")))?;

        Ok(QueuedMessage {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            recipient_id: row.try_get("recipient_id")?,
            channel: row.try_get("channel")?,
            content: row.try_get("content")?,
            priority: row.try_get("priority")?,
            status,
            scheduled_at: row.try_get("scheduled_at")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    /// Push the filter's predicates onto a builder. Shared between the
    /// count and select halves of `query` so they can never drift apart.
    fn apply_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a QueueFilter) {
        if let Some(request_id) = filter.request_id {
            qb.push(" AND request_id = ").push_bind(request_id);
        }
        if let Some(ref recipient_id) = filter.recipient_id {
            qb.push(" AND recipient_id = ").push_bind(recipient_id);
        }
        if let Some(ref channel) = filter.channel {
            qb.push(" AND channel = ").push_bind(channel);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(after) = filter.created_after {
            qb.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(before);
        }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn enqueue(&self, new: NewQueuedMessage) -> Result<QueuedMessage> {
        new.validate()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO queue_messages
                (request_id, recipient_id, channel, content, priority, status, scheduled_at, created_at)
            VALUES ($1, $2, $3, $4, $5, 'queued', COALESCE($6, NOW()), NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(new.request_id)
        .bind(&new.recipient_id)
        .bind(&new.channel)
        .bind(&new.content)
        .bind(new.priority)
        .bind(new.scheduled_at)
        .fetch_one(&self.pool)
        .await?;

        QUEUE_ENQUEUED_TOTAL.inc();

        Self::row_to_message(&row)
    }

    async fn bulk_enqueue(&self, batch: Vec<NewQueuedMessage>) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        for new in &batch {
            new.validate()?;
        }

        // One transaction for the whole batch: all rows land or none do.
        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO queue_messages \
             (request_id, recipient_id, channel, content, priority, status, scheduled_at, created_at) ",
        );
        qb.push_values(&batch, |mut b, new| {
            b.push_bind(new.request_id)
                .push_bind(&new.recipient_id)
                .push_bind(&new.channel)
                .push_bind(&new.content)
                .push_bind(new.priority)
                .push_bind("queued")
                .push_bind(new.scheduled_at.unwrap_or_else(Utc::now))
                .push_bind(Utc::now());
        });

        let result = qb.build().execute(&mut *tx).await?;
        tx.commit().await?;

        let count = result.rows_affected();
        QUEUE_ENQUEUED_TOTAL.inc_by(count);

        Ok(count)
    }

    async fn dequeue_next(&self) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE queue_messages
            SET status = 'processing', processed_at = NOW()
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE status = 'queued' AND scheduled_at <= NOW()
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                QUEUE_CLAIMED_TOTAL.inc();
                Ok(Some(Self::row_to_message(&row)?))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM queue_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_message).transpose()
    }

    async fn requeue(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'queued', processed_at = NULL, priority = priority + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected() > 0;
        if requeued {
            QUEUE_REQUEUED_TOTAL.inc();
        }
        Ok(requeued)
    }

    async fn mark_processing(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE queue_messages SET status = 'processing', processed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE queue_messages SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, error: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'failed',
                content = CASE
                    WHEN $2::text IS NULL THEN content
                    ELSE jsonb_set(content, '{errorDetails}', to_jsonb($2::text))
                END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_priority(&self, id: i64, priority: i32) -> Result<bool> {
        let result = sqlx::query("UPDATE queue_messages SET priority = $2 WHERE id = $1")
            .bind(id)
            .bind(priority)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn promote_priority(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE queue_messages SET priority = priority + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(
        &self,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<PagedResult<QueuedMessage>> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM queue_messages WHERE 1=1");
        Self::apply_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select_qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM queue_messages WHERE 1=1"));
        Self::apply_filter(&mut select_qb, filter);
        if filter.high_priority_first {
            select_qb.push(" ORDER BY priority DESC, created_at ASC, id ASC");
        } else {
            select_qb.push(" ORDER BY created_at ASC, id ASC");
        }
        select_qb.push(" LIMIT ").push_bind(page.limit());
        select_qb.push(" OFFSET ").push_bind(page.offset());

        let rows = select_qb.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;

        Ok(PagedResult::new(items, total, page))
    }

    async fn reschedule_stale(
        &self,
        older_than: Duration,
        from_status: MessageStatus,
    ) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'queued', processed_at = NULL, priority = priority + 1
            WHERE status = $1 AND processed_at IS NOT NULL AND processed_at < $2
            "#,
        )
        .bind(from_status.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let rescued = result.rows_affected();
        if rescued > 0 {
            QUEUE_REQUEUED_TOTAL.inc_by(rescued);
            tracing::info!(
                rescued = rescued,
                from_status = %from_status,
                "Rescheduled stale queue rows"
            );
        }

        Ok(rescued)
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE status IN ('completed', 'failed')
              AND processed_at IS NOT NULL AND processed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn fail_for_request(&self, request_id: Uuid, error: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'failed',
                content = jsonb_set(content, '{errorDetails}', to_jsonb($2::text))
            WHERE request_id = $1 AND status = 'queued'
            "#,
        )
        .bind(request_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn status_summary(&self) -> Result<QueueSummary> {
        let mut summary = QueueSummary::default();

        let status_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queue_messages GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        for (status, count) in status_rows {
            match status.as_str() {
                "queued" => summary.queued = count,
                "processing" => summary.processing = count,
                "failed" => summary.failed = count,
                _ => {}
            }
        }

        let channel_rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT channel, COUNT(*) FROM queue_messages
            WHERE status IN ('queued', 'processing')
            GROUP BY channel
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        summary.by_channel = channel_rows.into_iter().collect();

        let priority_rows: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT priority, COUNT(*) FROM queue_messages
            WHERE status IN ('queued', 'processing')
            GROUP BY priority
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        summary.by_priority = priority_rows.into_iter().collect();

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_builds_bound_predicates() {
        let filter = QueueFilter {
            request_id: Some(Uuid::now_v7()),
            channel: Some("sms".to_string()),
            status: Some(MessageStatus::Queued),
            ..Default::default()
        };

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM queue_messages WHERE 1=1");
        PostgresQueueStore::apply_filter(&mut qb, &filter);

        let sql = qb.into_sql();
        assert!(sql.contains("request_id = $1"));
        assert!(sql.contains("channel = $2"));
        assert!(sql.contains("status = $3"));
        assert!(!sql.contains("recipient_id"));
        assert!(!sql.contains('\''));
    }

    #[test]
    fn test_validation_happens_before_any_sql() {
        // Validation is shared with the memory store; a bad message must be
        // rejected without a pool in reach.
        let bad = NewQueuedMessage::new(Uuid::now_v7(), "", "sms", json!({}));
        assert!(bad.validate().is_err());
    }
}
