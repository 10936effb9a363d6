//! PostgreSQL delivery store.
//!
//! Table structure:
//! - `message_deliveries` - one row per dispatch attempt series, JSONB
//!   content snapshot, TEXT status
//!
//! `mark_delivered` keeps the original timestamp on repeat calls via
//! `COALESCE(delivered_at, NOW())`; the retry sweep excludes rows whose
//! content carries the permanent-failure tag.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;

use crate::error::{DispatchError, Result};
use crate::paging::{PageRequest, PagedResult};

use super::models::{DeliveryFilter, DeliveryStatus, MessageDelivery, NewDelivery};
use super::store::DeliveryStore;

const COLUMNS: &str = "id, queue_id, request_id, recipient_id, provider_id, channel, content, \
     status, attempt_count, last_attempt_at, delivered_at, provider_response, \
     provider_message_id, created_at";

/// PostgreSQL-backed `DeliveryStore` implementation.
pub struct PostgresDeliveryStore {
    pool: PgPool,
}

impl PostgresDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_delivery(row: &PgRow) -> Result<MessageDelivery> {
        let status: String = row.try_get("status")?;
        let status = DeliveryStatus::parse(&status)
            .ok_or_else(|| DispatchError::Decode(format!("unknown delivery status: {status}")))?;

        Ok(MessageDelivery {
            id: row.try_get("id")?,
            queue_id: row.try_get("queue_id")?,
            request_id: row.try_get("request_id")?,
            recipient_id: row.try_get("recipient_id")?,
            provider_id: row.try_get("provider_id")?,
            channel: row.try_get("channel")?,
            content: row.try_get("content")?,
            status,
            attempt_count: row.try_get("attempt_count")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            delivered_at: row.try_get("delivered_at")?,
            provider_response: row.try_get("provider_response")?,
            provider_message_id: row.try_get("provider_message_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn apply_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a DeliveryFilter) {
        if let Some(request_id) = filter.request_id {
            qb.push(" AND request_id = ").push_bind(request_id);
        }
        if let Some(queue_id) = filter.queue_id {
            qb.push(" AND queue_id = ").push_bind(queue_id);
        }
        if let Some(ref recipient_id) = filter.recipient_id {
            qb.push(" AND recipient_id = ").push_bind(recipient_id);
        }
        if let Some(ref provider_id) = filter.provider_id {
            qb.push(" AND provider_id = ").push_bind(provider_id);
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
impl DeliveryStore for PostgresDeliveryStore {
    async fn create(&self, new: NewDelivery) -> Result<MessageDelivery> {
        new.validate()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO message_deliveries
                (queue_id, request_id, recipient_id, provider_id, channel, content,
                 status, attempt_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'queued', 0, NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(new.queue_id)
        .bind(new.request_id)
        .bind(&new.recipient_id)
        .bind(&new.provider_id)
        .bind(&new.channel)
        .bind(&new.content)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_delivery(&row)
    }

    async fn get(&self, id: i64) -> Result<Option<MessageDelivery>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM message_deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_delivery).transpose()
    }

    async fn mark_attempted(
        &self,
        id: i64,
        provider_response: &str,
        provider_message_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE message_deliveries
            SET status = 'attempted',
                attempt_count = attempt_count + 1,
                last_attempt_at = NOW(),
                provider_response = $2,
                provider_message_id = COALESCE($3, provider_message_id)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(provider_response)
        .bind(provider_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE message_deliveries
            SET status = 'delivered',
                delivered_at = COALESCE(delivered_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, reason: &str, permanent: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE message_deliveries
            SET status = 'failed',
                provider_response = $2,
                content = CASE
                    WHEN $3 THEN jsonb_set(content, '{permanent}', 'true'::jsonb)
                    ELSE content
                END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(permanent)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn retry(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE message_deliveries SET status = 'queued', attempt_count = attempt_count + 1 WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reassign_provider(&self, id: i64, new_provider_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE message_deliveries SET provider_id = $2, status = 'queued' WHERE id = $1",
        )
        .bind(id)
        .bind(new_provider_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(
        &self,
        filter: &DeliveryFilter,
        page: PageRequest,
    ) -> Result<PagedResult<MessageDelivery>> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM message_deliveries WHERE 1=1");
        Self::apply_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select_qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM message_deliveries WHERE 1=1"
        ));
        Self::apply_filter(&mut select_qb, filter);
        select_qb.push(" ORDER BY created_at DESC, id DESC");
        select_qb.push(" LIMIT ").push_bind(page.limit());
        select_qb.push(" OFFSET ").push_bind(page.offset());

        let rows = select_qb.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_delivery)
            .collect::<Result<Vec<_>>>()?;

        Ok(PagedResult::new(items, total, page))
    }

    async fn status_distribution(&self) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM message_deliveries GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM message_deliveries WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn retry_failed_older_than(&self, age: Duration, max_attempts: i32) -> Result<u64> {
        let cutoff = Utc::now() - age;
        let result = sqlx::query(
            r#"
            UPDATE message_deliveries
            SET status = 'queued'
            WHERE status = 'failed'
              AND COALESCE(last_attempt_at, created_at) < $1
              AND attempt_count < $2
              AND NOT COALESCE((content->>'permanent')::boolean, false)
            "#,
        )
        .bind(cutoff)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            tracing::info!(requeued = requeued, "Retry sweep requeued failed deliveries");
        }
        Ok(requeued)
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM message_deliveries
            WHERE status IN ('delivered', 'failed') AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
