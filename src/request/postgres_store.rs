//! PostgreSQL request store.
//!
//! Table structure:
//! - `notification_requests` - UUID primary key, TEXT status/priority,
//!   JSONB payload
//!
//! The terminal-closure invariant is enforced in the WHERE clause of every
//! transition: `status IN ('pending', 'processing')`. A transition racing a
//! concurrent terminal write simply affects zero rows and reports false.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::paging::{PageRequest, PagedResult};

use super::models::{
    NewRequest, NotificationRequest, RequestFilter, RequestPriority, RequestStatus,
};
use super::store::RequestStore;

const COLUMNS: &str = "id, application_id, template_id, payload, priority, status, created_at, expires_at, callback_url, requested_by";

const NON_TERMINAL: &str = "status IN ('pending', 'processing')";

/// Priority band sort rank used by `query`.
const PRIORITY_RANK: &str =
    "CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 WHEN 'low' THEN 2 ELSE 3 END";

/// PostgreSQL-backed `RequestStore` implementation.
pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &PgRow) -> Result<NotificationRequest> {
        let status: String = row.try_get("status")?;
        let status = RequestStatus::parse(&status)
            .ok_or_else(|| DispatchError::Decode(format!("unknown request status: {status}")))?;

        let priority: String = row.try_get("priority")?;
        let priority = RequestPriority::parse(&priority)
            .ok_or_else(|| DispatchError::Decode(format!("unknown request priority: {priority}")))?;

        Ok(NotificationRequest {
            id: row.try_get("id")?,
            application_id: row.try_get("application_id")?,
            template_id: row.try_get("template_id")?,
            payload: row.try_get("payload")?,
            priority,
            status,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            callback_url: row.try_get("callback_url")?,
            requested_by: row.try_get("requested_by")?,
        })
    }

    fn apply_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a RequestFilter) {
        if let Some(ref application_id) = filter.application_id {
            qb.push(" AND application_id = ").push_bind(application_id);
        }
        if let Some(ref template_id) = filter.template_id {
            qb.push(" AND template_id = ").push_bind(template_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(ref requested_by) = filter.requested_by {
            qb.push(" AND requested_by = ").push_bind(requested_by);
        }
        if let Some(after) = filter.created_after {
            qb.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(before);
        }
    }

    async fn guarded_status_update(&self, id: Uuid, status: RequestStatus) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE notification_requests SET status = $2 WHERE id = $1 AND {NON_TERMINAL}"
        ))
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    async fn create(&self, new: NewRequest) -> Result<NotificationRequest> {
        new.validate()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO notification_requests
                (id, application_id, template_id, payload, priority, status, created_at, expires_at, callback_url, requested_by)
            VALUES ($1, $2, $3, $4, $5, 'pending', NOW(), $6, $7, $8)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&new.application_id)
        .bind(&new.template_id)
        .bind(&new.payload)
        .bind(new.priority.as_str())
        .bind(new.expires_at)
        .bind(&new.callback_url)
        .bind(&new.requested_by)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_request(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM notification_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_request).transpose()
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool> {
        self.guarded_status_update(id, RequestStatus::Processing).await
    }

    async fn mark_completed(&self, id: Uuid) -> Result<bool> {
        self.guarded_status_update(id, RequestStatus::Completed).await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE notification_requests
            SET status = 'failed',
                payload = jsonb_set(payload, '{{errorDetails}}', to_jsonb($2::text))
            WHERE id = $1 AND {NON_TERMINAL}
            "#
        ))
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool> {
        self.guarded_status_update(id, RequestStatus::Cancelled).await
    }

    async fn update_status(&self, id: Uuid, status: RequestStatus) -> Result<bool> {
        self.guarded_status_update(id, status).await
    }

    async fn update_priority(&self, id: Uuid, priority: RequestPriority) -> Result<bool> {
        let result =
            sqlx::query("UPDATE notification_requests SET priority = $2 WHERE id = $1")
                .bind(id)
                .bind(priority.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn bulk_update_status(&self, ids: &[Uuid], status: RequestStatus) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(&format!(
            "UPDATE notification_requests SET status = $2 WHERE id = ANY($1) AND {NON_TERMINAL}"
        ))
        .bind(ids)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn bulk_cancel(&self, ids: &[Uuid]) -> Result<u64> {
        self.bulk_update_status(ids, RequestStatus::Cancelled).await
    }

    async fn expired(&self) -> Result<Vec<NotificationRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM notification_requests
            WHERE {NON_TERMINAL} AND expires_at IS NOT NULL AND expires_at < $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_request).collect()
    }

    async fn query(
        &self,
        filter: &RequestFilter,
        page: PageRequest,
    ) -> Result<PagedResult<NotificationRequest>> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM notification_requests WHERE 1=1");
        Self::apply_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select_qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM notification_requests WHERE 1=1"
        ));
        Self::apply_filter(&mut select_qb, filter);
        select_qb.push(format!(" ORDER BY {PRIORITY_RANK}, created_at DESC"));
        select_qb.push(" LIMIT ").push_bind(page.limit());
        select_qb.push(" OFFSET ").push_bind(page.offset());

        let rows = select_qb.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_request)
            .collect::<Result<Vec<_>>>()?;

        Ok(PagedResult::new(items, total, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builds_bound_predicates() {
        let filter = RequestFilter {
            application_id: Some("herdbook".to_string()),
            status: Some(RequestStatus::Pending),
            priority: Some(RequestPriority::High),
            ..Default::default()
        };

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM notification_requests WHERE 1=1");
        PostgresRequestStore::apply_filter(&mut qb, &filter);

        let sql = qb.into_sql();
        assert!(sql.contains("application_id = $1"));
        assert!(sql.contains("status = $2"));
        assert!(sql.contains("priority = $3"));
        assert!(!sql.contains("template_id"));
    }

    #[test]
    fn test_priority_rank_covers_all_bands() {
        for band in ["high", "normal", "low"] {
            assert!(PRIORITY_RANK.contains(band));
        }
    }
}
